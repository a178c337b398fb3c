//! Relative-date vocabulary (English and Spanish).
//!
//! Rules are tried in table order against a normalized phrase; the first
//! rule that matches decides the window. Every rule resolves against the
//! caller-supplied current day, so the same phrase and day always give the
//! same window.

use std::sync::OnceLock;

use chrono::{Datelike, Duration, NaiveDate};
use regex::Regex;

use crate::time::{month_from_name, DateWindow, MONTH_NAMES};

/// Longest "last N days" span accepted.
const MAX_TRAILING_DAYS: u32 = 3660;

#[derive(Debug, Clone, Copy)]
enum Fixed {
    Today,
    Yesterday,
    ThisWeek,
    LastWeek,
    ThisMonth,
    LastMonth,
    ThisQuarter,
    LastQuarter,
    ThisYear,
    LastYear,
}

const FIXED_PHRASES: &[(Fixed, &[&str])] = &[
    (Fixed::Today, &["today", "hoy"]),
    (Fixed::Yesterday, &["yesterday", "ayer"]),
    (Fixed::ThisWeek, &["this week", "current week", "esta semana"]),
    (
        Fixed::LastWeek,
        &["last week", "previous week", "semana pasada", "semana anterior"],
    ),
    (
        Fixed::ThisMonth,
        &["this month", "current month", "month to date", "este mes", "mes actual", "en lo que va del mes"],
    ),
    (
        Fixed::LastMonth,
        &["last month", "previous month", "mes pasado", "mes anterior", "ultimo mes"],
    ),
    (
        Fixed::ThisQuarter,
        &["this quarter", "current quarter", "este trimestre", "trimestre actual"],
    ),
    (
        Fixed::LastQuarter,
        &["last quarter", "previous quarter", "trimestre pasado", "trimestre anterior"],
    ),
    (
        Fixed::ThisYear,
        &[
            "this year",
            "current year",
            "year to date",
            "ytd",
            "este ano",
            "ano actual",
            "en lo que va del ano",
        ],
    ),
    (
        Fixed::LastYear,
        &["last year", "previous year", "ano pasado", "ano anterior"],
    ),
];

fn trailing_days_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:last|past|previous|ultimos|pasados)\s+(\d{1,4})\s+(?:days|dias)\b")
            .expect("static regex is valid")
    })
}

fn named_month_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let names: Vec<&str> = MONTH_NAMES.iter().map(|(n, _)| *n).collect();
        let pattern = format!(
            r"(?:\b(in|during|for|since|of|en|durante|de)\s+)?\b({})\b(?:\s+(?:of\s+|de\s+|del\s+)?((?:19|20)\d{{2}}))?",
            names.join("|")
        );
        Regex::new(&pattern).expect("static regex is valid")
    })
}

fn year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b((?:19|20)\d{2})\b").expect("static regex is valid")
    })
}

fn week_of(day: NaiveDate) -> DateWindow {
    let monday = day - Duration::days(i64::from(day.weekday().num_days_from_monday()));
    DateWindow::days_ending(monday + Duration::days(6), 7)
}

fn quarter_of(day: NaiveDate) -> Option<DateWindow> {
    DateWindow::quarter(day.year(), (day.month() - 1) / 3 + 1)
}

fn resolve_fixed(rule: Fixed, today: NaiveDate) -> Option<DateWindow> {
    match rule {
        Fixed::Today => Some(DateWindow::day(today)),
        Fixed::Yesterday => Some(DateWindow::day(today - Duration::days(1))),
        Fixed::ThisWeek => Some(week_of(today)),
        Fixed::LastWeek => Some(week_of(today - Duration::days(7))),
        Fixed::ThisMonth => DateWindow::month(today.year(), today.month()),
        Fixed::LastMonth => DateWindow::month(today.year(), today.month()).map(|m| m.previous_month()),
        Fixed::ThisQuarter => quarter_of(today),
        Fixed::LastQuarter => quarter_of(today).and_then(|q| quarter_of(q.start - Duration::days(1))),
        Fixed::ThisYear => DateWindow::year(today.year()),
        Fixed::LastYear => DateWindow::year(today.year() - 1),
    }
}

/// A resolved date phrase: the matched text and its window.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DateMatch {
    /// Matched vocabulary.
    pub phrase: String,
    /// Resolved window.
    pub window: DateWindow,
}

/// Resolves the first relative-date expression in a normalized phrase.
pub(crate) fn resolve(phrase: &str, today: NaiveDate) -> Option<DateMatch> {
    for (rule, phrases) in FIXED_PHRASES {
        if let Some(matched) = phrases.iter().find(|p| super::contains_phrase(phrase, p)) {
            if let Some(window) = resolve_fixed(*rule, today) {
                return Some(DateMatch {
                    phrase: (*matched).to_string(),
                    window,
                });
            }
        }
    }

    if let Some(caps) = trailing_days_re().captures(phrase) {
        if let Ok(days) = caps[1].parse::<u32>() {
            if (1..=MAX_TRAILING_DAYS).contains(&days) {
                return Some(DateMatch {
                    phrase: caps[0].to_string(),
                    window: DateWindow::days_ending(today, days),
                });
            }
        }
    }

    for caps in named_month_re().captures_iter(phrase) {
        let name = &caps[2];
        let has_context = caps.get(1).is_some();
        let explicit_year = caps.get(3).and_then(|y| y.as_str().parse::<i32>().ok());
        // "may" is also a modal verb; only trust it with context or a year.
        if name == "may" && !has_context && explicit_year.is_none() {
            continue;
        }
        let Some(month) = month_from_name(name) else {
            continue;
        };
        let year = explicit_year.unwrap_or_else(|| {
            if month > today.month() {
                today.year() - 1
            } else {
                today.year()
            }
        });
        if let Some(window) = DateWindow::month(year, month) {
            return Some(DateMatch {
                phrase: caps[0].trim().to_string(),
                window,
            });
        }
    }

    if let Some(caps) = year_re().captures(phrase) {
        if let Some(window) = caps[1].parse::<i32>().ok().and_then(DateWindow::year) {
            return Some(DateMatch {
                phrase: caps[1].to_string(),
                window,
            });
        }
    }

    None
}

/// A period named in free text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PeriodMention {
    Month { month: u32, year: Option<i32>, text: String },
    Year { year: i32, text: String },
}

/// Named months and bare years mentioned in a normalized phrase.
///
/// Years that belong to a month mention (`may 2024`) are reported only as
/// part of that month. The same "may" rule as [`resolve`] applies.
pub(crate) fn period_mentions(phrase: &str) -> Vec<PeriodMention> {
    let mut mentions = Vec::new();
    let mut spans: Vec<(usize, usize)> = Vec::new();
    for caps in named_month_re().captures_iter(phrase) {
        let name = &caps[2];
        let year = caps.get(3).and_then(|y| y.as_str().parse::<i32>().ok());
        if name == "may" && caps.get(1).is_none() && year.is_none() {
            continue;
        }
        let (Some(month), Some(whole)) = (month_from_name(name), caps.get(0)) else {
            continue;
        };
        spans.push((whole.start(), whole.end()));
        mentions.push(PeriodMention::Month {
            month,
            year,
            text: whole.as_str().trim().to_string(),
        });
    }
    for m in year_re().find_iter(phrase) {
        if spans.iter().any(|(s, e)| m.start() >= *s && m.end() <= *e) {
            continue;
        }
        if let Ok(year) = m.as_str().parse::<i32>() {
            mentions.push(PeriodMention::Year {
                year,
                text: m.as_str().to_string(),
            });
        }
    }
    mentions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn window(phrase: &str, today: NaiveDate) -> Option<DateWindow> {
        resolve(phrase, today).map(|m| m.window)
    }

    #[test]
    fn test_today_and_yesterday() {
        let today = d(2024, 5, 15);
        assert_eq!(window("sales today", today), Some(DateWindow::day(today)));
        assert_eq!(window("ventas de ayer", today), Some(DateWindow::day(d(2024, 5, 14))));
    }

    #[test]
    fn test_this_and_last_month() {
        let today = d(2024, 3, 10);
        assert_eq!(window("this month", today), DateWindow::month(2024, 3));
        assert_eq!(window("last month", today), DateWindow::month(2024, 2));
        assert_eq!(window("mes pasado", d(2024, 1, 5)), DateWindow::month(2023, 12));
    }

    #[test]
    fn test_weeks_are_monday_aligned() {
        // 2024-05-15 is a Wednesday.
        let w = window("this week", d(2024, 5, 15)).unwrap();
        assert_eq!(w.start, d(2024, 5, 13));
        assert_eq!(w.end, d(2024, 5, 19));
        let last = window("last week", d(2024, 5, 15)).unwrap();
        assert_eq!(last.start, d(2024, 5, 6));
    }

    #[test]
    fn test_quarters() {
        assert_eq!(window("this quarter", d(2024, 5, 15)), DateWindow::quarter(2024, 2));
        assert_eq!(window("last quarter", d(2024, 2, 1)), DateWindow::quarter(2023, 4));
    }

    #[test]
    fn test_years() {
        assert_eq!(window("this year", d(2024, 5, 15)), DateWindow::year(2024));
        assert_eq!(window("ano pasado", d(2024, 5, 15)), DateWindow::year(2023));
        assert_eq!(window("revenue in 2022", d(2024, 5, 15)), DateWindow::year(2022));
    }

    #[test]
    fn test_trailing_days() {
        let w = window("last 30 days", d(2024, 5, 15)).unwrap();
        assert_eq!(w.end, d(2024, 5, 15));
        assert_eq!(w.span_days(), 30);
        assert_eq!(window("ultimos 7 dias", d(2024, 5, 15)).unwrap().span_days(), 7);
        assert!(window("last 0 days", d(2024, 5, 15)).is_none());
    }

    #[test]
    fn test_named_month_infers_most_recent_year() {
        let today = d(2024, 3, 10);
        assert_eq!(window("march", today), DateWindow::month(2024, 3));
        assert_eq!(window("november", today), DateWindow::month(2023, 11));
        assert_eq!(window("marzo de 2022", today), DateWindow::month(2022, 3));
        assert_eq!(window("june 2021", today), DateWindow::month(2021, 6));
    }

    #[test]
    fn test_may_requires_context() {
        let today = d(2024, 6, 1);
        assert!(window("what may be pending", today).is_none());
        assert_eq!(window("orders in may", today), DateWindow::month(2024, 5));
        assert_eq!(window("may 2023", today), DateWindow::month(2023, 5));
    }

    #[test]
    fn test_fixed_phrases_take_precedence() {
        // "last month" wins over the bare year.
        let w = window("last month 2020", d(2024, 5, 15)).unwrap();
        assert_eq!(w, DateWindow::month(2024, 4).unwrap());
    }

    #[test]
    fn test_period_mentions() {
        let found = period_mentions("in may 2024 sales beat 2023, unlike marzo; it may rain");
        assert_eq!(
            found,
            vec![
                PeriodMention::Month {
                    month: 5,
                    year: Some(2024),
                    text: "in may 2024".to_string()
                },
                PeriodMention::Month {
                    month: 3,
                    year: None,
                    text: "marzo".to_string()
                },
                PeriodMention::Year {
                    year: 2023,
                    text: "2023".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_no_date_vocabulary() {
        assert!(resolve("confirmed orders by customer", d(2024, 5, 15)).is_none());
    }
}
