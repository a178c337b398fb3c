//! Calendar windows for filters and period-over-period comparison.
//!
//! A [`DateWindow`] is a closed interval `[start, end]` of calendar days.
//! Windows are what the filter translator resolves relative-date vocabulary
//! into, what the comparison engine shifts, and what the grounding validator
//! checks period claims against.

use std::fmt;

use chrono::{Datelike, Duration, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// English and Spanish month names, lower-case and without diacritics.
pub const MONTH_NAMES: &[(&str, u32)] = &[
    ("january", 1),
    ("february", 2),
    ("march", 3),
    ("april", 4),
    ("may", 5),
    ("june", 6),
    ("july", 7),
    ("august", 8),
    ("september", 9),
    ("october", 10),
    ("november", 11),
    ("december", 12),
    ("enero", 1),
    ("febrero", 2),
    ("marzo", 3),
    ("abril", 4),
    ("mayo", 5),
    ("junio", 6),
    ("julio", 7),
    ("agosto", 8),
    ("septiembre", 9),
    ("setiembre", 9),
    ("octubre", 10),
    ("noviembre", 11),
    ("diciembre", 12),
];

const MONTH_LABELS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Looks up a month number by (normalized) name.
#[must_use]
pub fn month_from_name(name: &str) -> Option<u32> {
    MONTH_NAMES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, m)| *m)
}

/// English display label for a month number (1-12).
#[must_use]
pub fn month_label(month: u32) -> &'static str {
    let idx = month.clamp(1, 12) as usize - 1;
    MONTH_LABELS[idx]
}

/// A closed interval of calendar days with a human-readable label.
///
/// # Examples
///
/// ```
/// use groundql::DateWindow;
///
/// let may = DateWindow::month(2024, 5).unwrap();
/// assert_eq!(may.label, "May 2024");
/// assert_eq!(may.span_days(), 31);
///
/// let april = may.previous_month();
/// assert_eq!(april.label, "April 2024");
/// assert!(april.end < may.start);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateWindow {
    /// First day (inclusive).
    pub start: NaiveDate,
    /// Last day (inclusive).
    pub end: NaiveDate,
    /// Human-readable label, e.g. `May 2024`.
    pub label: String,
}

impl DateWindow {
    /// Creates a window from two dates with a derived label.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidDateRange` if `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::InvalidDateRange { start, end });
        }
        Ok(Self::unchecked(start, end))
    }

    fn unchecked(start: NaiveDate, end: NaiveDate) -> Self {
        let mut window = Self {
            start,
            end,
            label: String::new(),
        };
        window.label = window.describe();
        window
    }

    /// Replaces the derived label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        let label = label.into();
        if !label.trim().is_empty() {
            self.label = label.trim().to_string();
        }
        self
    }

    /// A single day.
    #[must_use]
    pub fn day(date: NaiveDate) -> Self {
        Self::unchecked(date, date)
    }

    /// A full calendar month. Returns `None` for an invalid year/month.
    #[must_use]
    pub fn month(year: i32, month: u32) -> Option<Self> {
        let start = NaiveDate::from_ymd_opt(year, month, 1)?;
        let end = start.checked_add_months(Months::new(1))? - Duration::days(1);
        Some(Self::unchecked(start, end))
    }

    /// A full calendar quarter (1-4).
    #[must_use]
    pub fn quarter(year: i32, quarter: u32) -> Option<Self> {
        if !(1..=4).contains(&quarter) {
            return None;
        }
        let start = NaiveDate::from_ymd_opt(year, (quarter - 1) * 3 + 1, 1)?;
        let end = start.checked_add_months(Months::new(3))? - Duration::days(1);
        Some(Self::unchecked(start, end))
    }

    /// A full calendar year.
    #[must_use]
    pub fn year(year: i32) -> Option<Self> {
        let start = NaiveDate::from_ymd_opt(year, 1, 1)?;
        let end = NaiveDate::from_ymd_opt(year, 12, 31)?;
        Some(Self::unchecked(start, end))
    }

    /// The `days` days ending on (and including) `end`.
    #[must_use]
    pub fn days_ending(end: NaiveDate, days: u32) -> Self {
        let days = i64::from(days.max(1));
        Self::unchecked(end - Duration::days(days - 1), end)
    }

    /// Number of days covered, inclusive.
    #[must_use]
    pub fn span_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// True if `date` lies within the window.
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// True if the two windows share at least one day.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// True if the window is exactly one calendar month.
    #[must_use]
    pub fn is_full_month(&self) -> bool {
        self.spans_months_from_start(1)
    }

    /// True if the window is exactly one calendar year.
    #[must_use]
    pub fn is_full_year(&self) -> bool {
        self.start.ordinal() == 1
            && self.end.year() == self.start.year()
            && self.end.month() == 12
            && self.end.day() == 31
    }

    fn is_full_quarter(&self) -> bool {
        (self.start.month() - 1) % 3 == 0 && self.spans_months_from_start(3)
    }

    /// True if the window starts on a first and runs exactly `months` months.
    fn spans_months_from_start(&self, months: u32) -> bool {
        self.start.day() == 1
            && self
                .start
                .checked_add_months(Months::new(months))
                .is_some_and(|next| next - Duration::days(1) == self.end)
    }

    /// The same window one calendar month earlier.
    ///
    /// Full months map to full months. Other windows shift both ends back one
    /// month (clamping to month end); if the result would overlap `self`, the
    /// window of equal span immediately preceding `self` is used instead.
    #[must_use]
    pub fn previous_month(&self) -> Self {
        if self.is_full_month() {
            let prev = self.start - Duration::days(1);
            if let Some(window) = Self::month(prev.year(), prev.month()) {
                return window;
            }
        }
        self.shifted_back(Months::new(1))
    }

    /// The same window one calendar year earlier.
    #[must_use]
    pub fn previous_year(&self) -> Self {
        if self.is_full_year() {
            if let Some(window) = Self::year(self.start.year() - 1) {
                return window;
            }
        }
        if self.is_full_month() {
            if let Some(window) = Self::month(self.start.year() - 1, self.start.month()) {
                return window;
            }
        }
        self.shifted_back(Months::new(12))
    }

    fn shifted_back(&self, months: Months) -> Self {
        let shifted = self
            .start
            .checked_sub_months(months)
            .zip(self.end.checked_sub_months(months));
        match shifted {
            Some((start, end)) if end < self.start => Self::unchecked(start, end),
            _ => {
                let end = self.start - Duration::days(1);
                Self::unchecked(end - Duration::days(self.span_days() - 1), end)
            }
        }
    }

    /// Every `(year, month)` pair the window touches, in order.
    #[must_use]
    pub fn months_covered(&self) -> Vec<(i32, u32)> {
        let mut out = Vec::new();
        let mut cursor = NaiveDate::from_ymd_opt(self.start.year(), self.start.month(), 1);
        while let Some(first) = cursor {
            if first > self.end {
                break;
            }
            out.push((first.year(), first.month()));
            cursor = first.checked_add_months(Months::new(1));
        }
        out
    }

    fn describe(&self) -> String {
        if self.is_full_year() {
            format!("{}", self.start.year())
        } else if self.is_full_quarter() {
            format!("Q{} {}", (self.start.month() - 1) / 3 + 1, self.start.year())
        } else if self.is_full_month() {
            format!("{} {}", month_label(self.start.month()), self.start.year())
        } else if self.start == self.end {
            self.start.format("%Y-%m-%d").to_string()
        } else {
            format!(
                "{} to {}",
                self.start.format("%Y-%m-%d"),
                self.end.format("%Y-%m-%d")
            )
        }
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{} → {}]", self.label, self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_new_rejects_inverted_range() {
        assert!(DateWindow::new(d(2024, 5, 2), d(2024, 5, 1)).is_err());
        assert!(DateWindow::new(d(2024, 5, 1), d(2024, 5, 1)).is_ok());
    }

    #[test]
    fn test_month_bounds_and_label() {
        let feb = DateWindow::month(2024, 2).unwrap();
        assert_eq!(feb.start, d(2024, 2, 1));
        assert_eq!(feb.end, d(2024, 2, 29));
        assert_eq!(feb.label, "February 2024");
        assert!(feb.is_full_month());
        assert!(DateWindow::month(2024, 13).is_none());
    }

    #[test]
    fn test_aligned_windows_label_without_recursing() {
        let may = DateWindow::month(2024, 5).unwrap();
        assert_eq!(may.label, "May 2024");
        assert_eq!(may.end, d(2024, 5, 31));

        let q = DateWindow::new(d(2024, 4, 1), d(2024, 6, 30)).unwrap();
        assert_eq!(q.label, "Q2 2024");
        let not_quarter = DateWindow::new(d(2024, 2, 1), d(2024, 4, 30)).unwrap();
        assert_eq!(not_quarter.label, "2024-02-01 to 2024-04-30");
        let partial = DateWindow::new(d(2024, 5, 1), d(2024, 5, 20)).unwrap();
        assert!(!partial.is_full_month());
        assert_eq!(partial.previous_month().end, d(2024, 4, 20));
    }

    #[test]
    fn test_quarter_and_year_labels() {
        assert_eq!(DateWindow::quarter(2024, 2).unwrap().label, "Q2 2024");
        assert_eq!(DateWindow::year(2023).unwrap().label, "2023");
        assert!(DateWindow::quarter(2024, 5).is_none());
    }

    #[test]
    fn test_previous_month_of_full_month() {
        let march = DateWindow::month(2024, 3).unwrap();
        let feb = march.previous_month();
        assert_eq!(feb, DateWindow::month(2024, 2).unwrap());
        assert!(feb.end < march.start);
    }

    #[test]
    fn test_previous_month_clamps_month_end() {
        let w = DateWindow::new(d(2023, 3, 29), d(2023, 3, 31)).unwrap();
        let prev = w.previous_month();
        assert_eq!(prev.start, d(2023, 2, 28));
        assert_eq!(prev.end, d(2023, 2, 28));
        assert!(!prev.overlaps(&w));
    }

    #[test]
    fn test_previous_month_of_long_window_never_overlaps() {
        let w = DateWindow::new(d(2024, 4, 10), d(2024, 5, 25)).unwrap();
        let prev = w.previous_month();
        assert!(prev.end < w.start);
        assert_eq!(prev.span_days(), w.span_days());
    }

    #[test]
    fn test_previous_year_handles_leap_day() {
        let w = DateWindow::new(d(2024, 2, 1), d(2024, 2, 29)).unwrap();
        let prev = w.previous_year();
        assert_eq!(prev, DateWindow::month(2023, 2).unwrap());

        let partial = DateWindow::new(d(2024, 2, 10), d(2024, 2, 29)).unwrap();
        let prev = partial.previous_year();
        assert_eq!(prev.start, d(2023, 2, 10));
        assert_eq!(prev.end, d(2023, 2, 28));
    }

    #[test]
    fn test_previous_year_of_full_year() {
        let y = DateWindow::year(2024).unwrap();
        assert_eq!(y.previous_year(), DateWindow::year(2023).unwrap());
    }

    #[test]
    fn test_days_ending() {
        let w = DateWindow::days_ending(d(2024, 5, 10), 7);
        assert_eq!(w.start, d(2024, 5, 4));
        assert_eq!(w.span_days(), 7);
    }

    #[test]
    fn test_months_covered() {
        let w = DateWindow::new(d(2023, 12, 15), d(2024, 2, 3)).unwrap();
        assert_eq!(w.months_covered(), vec![(2023, 12), (2024, 1), (2024, 2)]);
    }

    #[test]
    fn test_with_label_ignores_blank() {
        let w = DateWindow::month(2024, 5).unwrap().with_label("  ");
        assert_eq!(w.label, "May 2024");
        let w = w.with_label("Q2 promo");
        assert_eq!(w.label, "Q2 promo");
    }

    #[test]
    fn test_month_lookup() {
        assert_eq!(month_from_name("mayo"), Some(5));
        assert_eq!(month_from_name("setiembre"), Some(9));
        assert_eq!(month_from_name("smarch"), None);
        assert_eq!(month_label(12), "December");
    }

    #[test]
    fn test_serialization() {
        let w = DateWindow::month(2024, 5).unwrap();
        let json = serde_json::to_string(&w).unwrap();
        let back: DateWindow = serde_json::from_str(&json).unwrap();
        assert_eq!(w, back);
    }
}
