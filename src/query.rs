//! Sub-query specifications and request batches.
//!
//! These are the shapes the language model proposes through the tool
//! interface. They are validated before execution: deserialized input is
//! untrusted, so size limits and id uniqueness are enforced here rather than
//! assumed.

use std::collections::HashSet;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::time::DateWindow;

/// Upper bound for free-form text fields.
pub const MAX_TEXT_LEN: usize = 1024;

/// Upper bound for group-by fields on one sub-query.
pub const MAX_GROUP_FIELDS: usize = 3;

/// The read operation a sub-query performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Fetch matching records.
    Search,
    /// Count matching records.
    Count,
    /// Sum the entity's amount, optionally grouped.
    Aggregate,
    /// List the entity's fields.
    Discover,
    /// Distinct values of the first group-by field.
    Distinct,
    /// One sample record with all fields.
    Inspect,
}

impl Operation {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Count => "count",
            Self::Aggregate => "aggregate",
            Self::Discover => "discover",
            Self::Distinct => "distinct",
            Self::Inspect => "inspect",
        }
    }

    /// True for operations whose count/total feed the merged answer.
    #[must_use]
    pub const fn is_metric(self) -> bool {
        matches!(self, Self::Count | Self::Aggregate | Self::Distinct)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Period-over-period comparison mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompareMode {
    /// Against the previous calendar month.
    #[serde(alias = "mom", alias = "month_over_month")]
    MonthOverMonth,
    /// Against the same period a year earlier.
    #[serde(alias = "yoy", alias = "year_over_year")]
    YearOverYear,
}

impl CompareMode {
    /// The prior window for `current`.
    #[must_use]
    pub fn previous(self, current: &DateWindow) -> DateWindow {
        match self {
            Self::MonthOverMonth => current.previous_month(),
            Self::YearOverYear => current.previous_year(),
        }
    }
}

/// A caller-supplied date range that overrides phrase parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExplicitDateRange {
    /// First day, inclusive.
    pub start: NaiveDate,
    /// Last day, inclusive.
    pub end: NaiveDate,
    /// Display label; derived from the dates when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ExplicitDateRange {
    /// Converts to a window, keeping the caller's label when present.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidDateRange` if `start > end`.
    pub fn to_window(&self) -> Result<DateWindow, ValidationError> {
        let window = DateWindow::new(self.start, self.end)?;
        Ok(match &self.label {
            Some(label) => window.with_label(label.as_str()),
            None => window,
        })
    }
}

/// One structured sub-query proposed by the language model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubQuerySpec {
    /// Correlates partial results; unique within a batch.
    pub id: String,
    /// Entity name or alias (e.g. `orders`, `facturas`, `sale.order`).
    pub entity: String,
    /// What to run.
    pub operation: Operation,
    /// Natural-language filter, e.g. `posted last month`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_text: Option<String>,
    /// Overrides any date vocabulary in `filter_text`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explicit_date_range: Option<ExplicitDateRange>,
    /// Group-by aliases or raw fields, at most three.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<String>,
    /// Row limit for `search`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Order clause for `search`, e.g. `amount_total desc`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    /// Requests a period-over-period comparison.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compare_mode: Option<CompareMode>,
}

impl SubQuerySpec {
    /// Creates a spec with only the required fields.
    #[must_use]
    pub fn new(id: impl Into<String>, entity: impl Into<String>, operation: Operation) -> Self {
        Self {
            id: id.into(),
            entity: entity.into(),
            operation,
            filter_text: None,
            explicit_date_range: None,
            group_by: Vec::new(),
            limit: None,
            order_by: None,
            compare_mode: None,
        }
    }

    /// Sets the filter text.
    #[must_use]
    pub fn filter(mut self, text: impl Into<String>) -> Self {
        self.filter_text = Some(text.into());
        self
    }

    /// Sets an explicit date range.
    #[must_use]
    pub fn date_range(mut self, range: ExplicitDateRange) -> Self {
        self.explicit_date_range = Some(range);
        self
    }

    /// Adds a group-by field.
    #[must_use]
    pub fn group_by(mut self, field: impl Into<String>) -> Self {
        self.group_by.push(field.into());
        self
    }

    /// Sets the search row limit.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the search order clause.
    #[must_use]
    pub fn order_by(mut self, order: impl Into<String>) -> Self {
        self.order_by = Some(order.into());
        self
    }

    /// Requests a comparison.
    #[must_use]
    pub const fn compare(mut self, mode: CompareMode) -> Self {
        self.compare_mode = Some(mode);
        self
    }

    /// Validates this spec against the search limit ceiling.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self, max_limit: usize) -> Result<(), ValidationError> {
        validate_non_empty("id", &self.id)?;
        validate_non_empty("entity", &self.entity)?;
        validate_optional_text("filterText", self.filter_text.as_deref())?;
        validate_optional_text("orderBy", self.order_by.as_deref())?;
        if let Some(range) = &self.explicit_date_range {
            range.to_window()?;
        }
        if self.group_by.len() > MAX_GROUP_FIELDS {
            return Err(ValidationError::FieldTooLong {
                field: "groupBy".to_string(),
                max_length: MAX_GROUP_FIELDS,
            });
        }
        for field in &self.group_by {
            validate_non_empty("groupBy", field)?;
        }
        if let Some(limit) = self.limit {
            if limit == 0 || limit > max_limit {
                return Err(ValidationError::LimitOutOfRange {
                    limit,
                    max: max_limit,
                });
            }
        }
        if self.operation == Operation::Distinct && self.group_by.is_empty() {
            return Err(ValidationError::MissingField {
                field: "groupBy".to_string(),
            });
        }
        Ok(())
    }
}

/// The single tool invocation: a batch of sub-queries plus enrichment flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryBatch {
    /// Sub-queries, run concurrently.
    pub queries: Vec<SubQuerySpec>,
    /// Compare the first metric month over month when no sub-query asks.
    #[serde(default)]
    pub include_comparison: bool,
    /// Derive insights from the results.
    #[serde(default)]
    pub include_insights: bool,
}

impl QueryBatch {
    /// Creates a batch with comparison and insights enabled.
    #[must_use]
    pub const fn new(queries: Vec<SubQuerySpec>) -> Self {
        Self {
            queries,
            include_comparison: true,
            include_insights: true,
        }
    }

    /// Validates batch size, id uniqueness and every spec.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self, max_batch: usize, max_limit: usize) -> Result<(), ValidationError> {
        if self.queries.is_empty() {
            return Err(ValidationError::EmptyBatch);
        }
        if self.queries.len() > max_batch {
            return Err(ValidationError::BatchTooLarge {
                actual: self.queries.len(),
                max: max_batch,
            });
        }
        let mut seen = HashSet::with_capacity(self.queries.len());
        for spec in &self.queries {
            spec.validate(max_limit)?;
            if !seen.insert(spec.id.trim()) {
                return Err(ValidationError::DuplicateId {
                    id: spec.id.clone(),
                });
            }
        }
        Ok(())
    }
}

fn validate_non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    let v = value.trim();
    if v.is_empty() {
        return Err(ValidationError::MissingField {
            field: field.to_string(),
        });
    }
    if v.len() > MAX_TEXT_LEN {
        return Err(ValidationError::FieldTooLong {
            field: field.to_string(),
            max_length: MAX_TEXT_LEN,
        });
    }
    Ok(())
}

fn validate_optional_text(field: &'static str, value: Option<&str>) -> Result<(), ValidationError> {
    match value {
        Some(v) if v.len() > MAX_TEXT_LEN => Err(ValidationError::FieldTooLong {
            field: field.to_string(),
            max_length: MAX_TEXT_LEN,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str) -> SubQuerySpec {
        SubQuerySpec::new(id, "orders", Operation::Aggregate)
    }

    #[test]
    fn test_deserialize_tool_arguments() {
        let json = serde_json::json!({
            "queries": [{
                "id": "q1",
                "entity": "orders",
                "operation": "aggregate",
                "filterText": "this month",
                "groupBy": ["customer"],
                "compareMode": "month-over-month"
            }, {
                "id": "q2",
                "entity": "invoices",
                "operation": "count",
                "explicitDateRange": {"start": "2024-01-01", "end": "2024-01-31"},
                "compareMode": "yoy"
            }],
            "includeInsights": true
        });
        let batch: QueryBatch = serde_json::from_value(json).unwrap();
        assert_eq!(batch.queries.len(), 2);
        assert_eq!(batch.queries[0].group_by, vec!["customer".to_string()]);
        assert_eq!(batch.queries[0].compare_mode, Some(CompareMode::MonthOverMonth));
        assert_eq!(batch.queries[1].compare_mode, Some(CompareMode::YearOverYear));
        assert!(batch.include_insights);
        assert!(!batch.include_comparison);
        assert!(batch.validate(5, 200).is_ok());
    }

    #[test]
    fn test_batch_size_cap() {
        let batch = QueryBatch::new((0..6).map(|i| spec(&format!("q{i}"))).collect());
        assert_eq!(
            batch.validate(5, 200),
            Err(ValidationError::BatchTooLarge { actual: 6, max: 5 })
        );
        assert_eq!(QueryBatch::new(vec![]).validate(5, 200), Err(ValidationError::EmptyBatch));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let batch = QueryBatch::new(vec![spec("q1"), spec(" q1 ")]);
        assert!(matches!(
            batch.validate(5, 200),
            Err(ValidationError::DuplicateId { .. })
        ));
    }

    #[test]
    fn test_limit_bounds() {
        assert!(spec("q").limit(0).validate(200).is_err());
        assert!(spec("q").limit(201).validate(200).is_err());
        assert!(spec("q").limit(200).validate(200).is_ok());
    }

    #[test]
    fn test_distinct_requires_group_field() {
        let s = SubQuerySpec::new("q", "orders", Operation::Distinct);
        assert!(s.validate(200).is_err());
        assert!(s.group_by("customer").validate(200).is_ok());
    }

    #[test]
    fn test_inverted_range_rejected() {
        let s = spec("q").date_range(ExplicitDateRange {
            start: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            label: None,
        });
        assert!(matches!(
            s.validate(200),
            Err(ValidationError::InvalidDateRange { .. })
        ));
    }

    #[test]
    fn test_compare_mode_previous() {
        let may = DateWindow::month(2024, 5).unwrap();
        assert_eq!(CompareMode::MonthOverMonth.previous(&may), DateWindow::month(2024, 4).unwrap());
        assert_eq!(CompareMode::YearOverYear.previous(&may), DateWindow::month(2023, 5).unwrap());
    }
}
