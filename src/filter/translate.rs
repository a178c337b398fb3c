//! Natural-language filter translation.
//!
//! Translation is best-effort: recognized date and status vocabulary become
//! predicates, everything else is dropped. An unrecognized phrase yields an
//! empty (match-all) filter; the engine's state-warning check covers the
//! risk of silently summing across lifecycle states.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{dates, normalize_text, window_predicates, DomainFilter, Operator, Predicate};
use crate::error::ValidationError;
use crate::query::ExplicitDateRange;
use crate::schema::EntitySchema;
use crate::time::DateWindow;
use crate::value::Value;

/// Output of a translation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Translation {
    /// The resolved predicates.
    pub domain: DomainFilter,
    /// The date window applied to the entity's date field, if any.
    pub window: Option<DateWindow>,
    /// Vocabulary that was recognized, in match order.
    pub recognized: Vec<String>,
}

/// Where a translation's date window came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowSource {
    /// The caller's explicit date range.
    Explicit,
    /// Date vocabulary in the filter text.
    Phrase,
    /// The comparison default (current month or year).
    Default,
}

/// Turns `(entity, filter text, explicit range)` into a [`DomainFilter`].
///
/// The translator is stateless; its output depends only on its inputs and
/// the supplied current day.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterTranslator;

impl FilterTranslator {
    /// Creates a translator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Translates a filter phrase for `schema`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidDateRange` if the explicit range is inverted.
    pub fn translate(
        &self,
        schema: &EntitySchema,
        filter_text: Option<&str>,
        explicit: Option<&ExplicitDateRange>,
        today: NaiveDate,
    ) -> Result<Translation, ValidationError> {
        let phrase = filter_text.map(normalize_text).unwrap_or_default();
        let mut predicates: Vec<Predicate> = schema.base_domain.clone();
        let mut recognized = Vec::new();

        let window = if let Some(range) = explicit {
            let window = range.to_window()?;
            recognized.push(format!("range:{}", window.label));
            Some(window)
        } else if let Some(found) = dates::resolve(&phrase, today) {
            recognized.push(found.phrase);
            Some(found.window)
        } else {
            None
        };

        if let Some(window) = &window {
            predicates.extend(window_predicates(&schema.date_field, schema.date_kind, window));
        }

        for rule in &schema.status_rules {
            let Some(keyword) = rule.keywords.iter().find(|k| super::contains_phrase(&phrase, k)) else {
                continue;
            };
            recognized.push(keyword.clone());
            for predicate in &rule.predicates {
                push_unique(&mut predicates, predicate.clone());
            }
            if let Some(field) = &rule.before_today {
                push_unique(
                    &mut predicates,
                    Predicate::new(field.as_str(), Operator::Lt, Value::Date(today)),
                );
            }
        }

        debug!(
            entity = %schema.name,
            phrase = %phrase,
            recognized = ?recognized,
            predicates = predicates.len(),
            "translated filter"
        );

        Ok(Translation {
            domain: DomainFilter::new(predicates),
            window,
            recognized,
        })
    }

    /// Translates with a fallback window when the phrase names no period.
    ///
    /// # Errors
    ///
    /// Same as [`FilterTranslator::translate`].
    pub fn translate_with_default_window(
        &self,
        schema: &EntitySchema,
        filter_text: Option<&str>,
        explicit: Option<&ExplicitDateRange>,
        today: NaiveDate,
        fallback: &DateWindow,
    ) -> Result<(Translation, WindowSource), ValidationError> {
        let translation = self.translate(schema, filter_text, explicit, today)?;
        if translation.window.is_some() {
            let source = if explicit.is_some() {
                WindowSource::Explicit
            } else {
                WindowSource::Phrase
            };
            return Ok((translation, source));
        }
        let domain = translation
            .domain
            .with_window(&schema.date_field, schema.date_kind, fallback);
        let mut recognized = translation.recognized;
        recognized.push(format!("default:{}", fallback.label));
        Ok((
            Translation {
                domain,
                window: Some(fallback.clone()),
                recognized,
            },
            WindowSource::Default,
        ))
    }
}

fn push_unique(predicates: &mut Vec<Predicate>, predicate: Predicate) {
    if !predicates.contains(&predicate) {
        predicates.push(predicate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EntityRegistry;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn translate(entity: &str, text: Option<&str>, today: NaiveDate) -> Translation {
        let registry = EntityRegistry::odoo();
        let schema = registry.resolve(entity).unwrap();
        FilterTranslator::new()
            .translate(&schema, text, None, today)
            .unwrap()
    }

    #[test]
    fn test_this_month_on_orders() {
        let t = translate("orders", Some("this month"), d(2024, 5, 15));
        assert_eq!(t.window, DateWindow::month(2024, 5));
        assert_eq!(
            t.domain.to_json(),
            serde_json::json!([
                ["date_order", ">=", "2024-05-01 00:00:00"],
                ["date_order", "<=", "2024-05-31 23:59:59"]
            ])
        );
    }

    #[test]
    fn test_status_vocabulary() {
        let t = translate("orders", Some("Confirmed orders last month"), d(2024, 5, 15));
        assert_eq!(t.window, DateWindow::month(2024, 4));
        assert!(t.domain.touches_field("state"));
        assert_eq!(t.recognized, vec!["last month".to_string(), "confirmed".to_string()]);
    }

    #[test]
    fn test_invoice_base_domain_and_overdue() {
        let today = d(2024, 5, 15);
        let t = translate("invoices", Some("facturas vencidas"), today);
        let json = t.domain.to_json();
        assert_eq!(json[0], serde_json::json!(["move_type", "=", "out_invoice"]));
        assert!(json
            .as_array()
            .unwrap()
            .contains(&serde_json::json!(["invoice_date_due", "<", "2024-05-15"])));
        assert!(t.window.is_none());
    }

    #[test]
    fn test_overlapping_rules_do_not_duplicate_predicates() {
        let t = translate("invoices", Some("pending receivable"), d(2024, 5, 15));
        let states = t
            .domain
            .predicates()
            .iter()
            .filter(|p| p.field == "state")
            .count();
        assert_eq!(states, 1);
    }

    #[test]
    fn test_unrecognized_phrase_yields_empty_filter() {
        let t = translate("orders", Some("the shiny ones please"), d(2024, 5, 15));
        assert!(t.domain.is_empty());
        assert!(t.window.is_none());
        assert!(t.recognized.is_empty());

        let t = translate("orders", None, d(2024, 5, 15));
        assert!(t.domain.is_empty());
    }

    #[test]
    fn test_explicit_range_skips_phrase_dates() {
        let registry = EntityRegistry::odoo();
        let schema = registry.resolve("invoices").unwrap();
        let range = ExplicitDateRange {
            start: d(2024, 1, 1),
            end: d(2024, 1, 15),
            label: Some("first half of January".to_string()),
        };
        let t = FilterTranslator::new()
            .translate(&schema, Some("last year posted"), Some(&range), d(2024, 5, 15))
            .unwrap();
        let window = t.window.unwrap();
        assert_eq!(window.start, d(2024, 1, 1));
        assert_eq!(window.label, "first half of January");
        // Status vocabulary still applies.
        assert!(t.domain.touches_field("state"));
    }

    #[test]
    fn test_inverted_explicit_range_is_rejected() {
        let registry = EntityRegistry::odoo();
        let schema = registry.resolve("orders").unwrap();
        let range = ExplicitDateRange {
            start: d(2024, 2, 1),
            end: d(2024, 1, 1),
            label: None,
        };
        assert!(FilterTranslator::new()
            .translate(&schema, None, Some(&range), d(2024, 5, 15))
            .is_err());
    }

    #[test]
    fn test_default_window_applies_only_without_period() {
        let registry = EntityRegistry::odoo();
        let schema = registry.resolve("orders").unwrap();
        let fallback = DateWindow::month(2024, 5).unwrap();
        let (t, source) = FilterTranslator::new()
            .translate_with_default_window(&schema, Some("confirmed"), None, d(2024, 5, 15), &fallback)
            .unwrap();
        assert_eq!(source, WindowSource::Default);
        assert_eq!(t.window, Some(fallback.clone()));
        assert!(t.domain.touches_field("date_order"));

        let (t, source) = FilterTranslator::new()
            .translate_with_default_window(&schema, Some("last month"), None, d(2024, 5, 15), &fallback)
            .unwrap();
        assert_eq!(source, WindowSource::Phrase);
        assert_eq!(t.window, DateWindow::month(2024, 4));
    }

    #[test]
    fn test_translation_is_deterministic() {
        let a = translate("orders", Some("pending   orders this month"), d(2024, 5, 15));
        let b = translate("orders", Some("pending orders this month"), d(2024, 5, 15));
        assert_eq!(a.domain, b.domain);
        assert_eq!(a.domain.canonical(), b.domain.canonical());
    }
}
