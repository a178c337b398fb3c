//! Result shapes returned to the drafting step.
//!
//! Everything here is created per request and discarded at response time;
//! only [`QueryResult`] values outlive a request, as cache entries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::filter::{DomainFilter, WindowSource};
use crate::query::Operation;
use crate::time::DateWindow;

/// Per-label accumulator inside `grouped`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupBucket {
    /// Number of records in the group.
    pub count: u64,
    /// Sum of the entity's amount field (0 when the entity has none).
    pub total: f64,
}

impl GroupBucket {
    /// Creates a bucket.
    #[must_use]
    pub const fn new(count: u64, total: f64) -> Self {
        Self { count, total }
    }

    /// Adds another bucket into this one.
    pub fn absorb(&mut self, other: Self) {
        self.count += other.count;
        self.total += other.total;
    }
}

/// Label-keyed groups. Labels are display names, never record ids.
pub type Grouped = BTreeMap<String, GroupBucket>;

/// Merges `from` into `into` label by label.
pub fn merge_grouped(into: &mut Grouped, from: &Grouped) {
    for (label, bucket) in from {
        into.entry(label.clone()).or_default().absorb(*bucket);
    }
}

/// Groups sorted by descending total, then descending count, then label.
#[must_use]
pub fn ranked(grouped: &Grouped) -> Vec<(&str, GroupBucket)> {
    let mut entries: Vec<(&str, GroupBucket)> = grouped.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    entries.sort_by(|a, b| {
        b.1.total
            .total_cmp(&a.1.total)
            .then(b.1.count.cmp(&a.1.count))
            .then(a.0.cmp(b.0))
    });
    entries
}

/// Formats an amount with two decimals and `,` thousands separators.
///
/// ```
/// assert_eq!(groundql::result::format_amount(1234567.891), "1,234,567.89");
/// assert_eq!(groundql::result::format_amount(-40.0), "-40.00");
/// ```
#[must_use]
pub fn format_amount(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let (int_part, frac) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (idx, ch) in int_part.chars().enumerate() {
        if idx > 0 && (int_part.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if value < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("{sign}{grouped}.{frac}")
}

/// Raised when an aggregation spans several lifecycle states with no
/// explicit status filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateWarning {
    /// The lifecycle field inspected.
    pub field: String,
    /// State label → records and amount in that state.
    pub distribution: Grouped,
    /// Human-readable recommendation.
    pub suggestion: String,
    /// The narrower filter the caller may re-ask with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_filter: Option<DomainFilter>,
}

/// Outcome of one sub-query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// False if the sub-query failed; `error` then says why.
    pub success: bool,
    /// Rows of a search, inspect or discover.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<serde_json::Value>>,
    /// Matching record count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// Sum of the amount field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    /// Per-group count and total.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grouped: Option<Grouped>,
    /// Set when an aggregate mixes lifecycle states.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_warning: Option<StateWarning>,
    /// True if served from the result cache.
    pub cached: bool,
    /// Wall time in milliseconds.
    pub execution_ms: u64,
    /// Failure text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResult {
    /// A failed sub-query carrying the error text.
    #[must_use]
    pub fn failure(error: impl Into<String>, execution_ms: u64) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            execution_ms,
            ..Self::default()
        }
    }

    /// True if the result holds no rows, no groups and a zero count.
    ///
    /// Empty results are valid answers but are never cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.as_ref().map_or(true, Vec::is_empty)
            && self.grouped.as_ref().map_or(true, BTreeMap::is_empty)
            && self.count.unwrap_or(0) == 0
    }

    /// True if this is a successful result with literally nothing in it.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.success && self.is_empty() && self.total.unwrap_or(0.0) == 0.0
    }
}

/// One sub-query's result, correlated by id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubQueryResult {
    /// Sub-query id.
    pub id: String,
    /// Entity as requested.
    pub entity: String,
    /// Operation run.
    pub operation: Operation,
    /// The date window the result was computed over, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<DateWindow>,
    /// The outcome.
    #[serde(flatten)]
    pub result: QueryResult,
}

/// Identity of a merged metric: same entity, operation and grouping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricKey {
    /// Canonical entity name.
    pub entity: String,
    /// Operation run.
    pub operation: Operation,
    /// Group-by fields, resolved.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<String>,
}

/// Sub-queries that answer the same metric, summed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedMetric {
    /// What was merged.
    #[serde(flatten)]
    pub key: MetricKey,
    /// Display label of the entity.
    pub label: String,
    /// Summed count.
    pub count: u64,
    /// Present when at least one contributing result carried a total.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    /// Groups summed by key.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub grouped: Grouped,
    /// Contributing sub-query ids, in batch order.
    pub sources: Vec<String>,
}

/// Direction of a period-over-period change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    /// Current exceeds previous.
    Up,
    /// Current is below previous.
    Down,
    /// No change.
    Flat,
}

/// Change between two periods.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variation {
    /// `current - previous`.
    pub absolute: f64,
    /// `(current - previous) / previous`; `None` when the previous period is zero.
    pub percent: Option<f64>,
    /// Direction of the change.
    pub trend: Trend,
    /// Human-readable summary, e.g. `+25.0%`.
    pub label: String,
}

/// Which number a comparison compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonMetric {
    /// Sum of the amount field.
    Total,
    /// Record count.
    Count,
}

/// Display labels of the two compared windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodLabels {
    /// Label of the current window.
    pub current: String,
    /// Label of the previous window.
    pub previous: String,
}

/// A period-over-period comparison for one sub-query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    /// The sub-query compared.
    pub query_id: String,
    /// Which number was compared.
    pub metric: ComparisonMetric,
    /// Value in the current window.
    pub current_value: f64,
    /// Value in the previous window.
    pub previous_value: f64,
    /// Groups in the current window.
    pub current_grouped: Grouped,
    /// Groups in the previous window.
    pub previous_grouped: Grouped,
    /// Change between the two.
    pub variation: Variation,
    /// Display labels of both windows.
    pub period_labels: PeriodLabels,
    /// The current window.
    pub current_window: DateWindow,
    /// The shifted window.
    pub previous_window: DateWindow,
}

/// Category of a derived observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    /// One group holds a large share of the total.
    Concentration,
    /// A period-over-period change exceeds the swing threshold.
    Swing,
    /// The result is literally zero.
    Empty,
    /// An aggregation mixes lifecycle states.
    StateMix,
    /// Some sub-queries failed.
    PartialFailure,
}

/// An advisory observation built from already-retrieved numbers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insight {
    /// Category.
    pub kind: InsightKind,
    /// Display text.
    pub text: String,
    /// Lower sorts first.
    pub priority: u8,
}

/// Chart flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    /// Grouped totals.
    Bar,
    /// Current vs previous period.
    Comparison,
}

/// Series for a front-end chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartData {
    /// Chart flavor.
    pub kind: ChartKind,
    /// Chart title.
    pub title: String,
    /// Category labels.
    pub labels: Vec<String>,
    /// One value per label.
    pub values: Vec<f64>,
}

/// Audit record for one sub-query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMetadata {
    /// Sub-query id.
    pub id: String,
    /// Entity as requested.
    pub entity: String,
    /// Resolved model on the data service; empty when the entity was unknown.
    pub model: String,
    /// Operation run.
    pub operation: Operation,
    /// Filter text as requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_text: Option<String>,
    /// The resolved predicate list.
    pub domain: DomainFilter,
    /// Date window applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<DateWindow>,
    /// Where the window came from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_source: Option<WindowSource>,
    /// Recognized vocabulary, in match order.
    pub recognized: Vec<String>,
    /// True if served from cache.
    pub cached: bool,
    /// True if the sub-query succeeded.
    pub success: bool,
    /// Failure text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall time in milliseconds.
    pub execution_ms: u64,
}

/// The tool's return value, injected back into the drafting conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// Id of this tool call.
    pub request_id: Uuid,
    /// True if at least one sub-query succeeded.
    pub success: bool,
    /// Records of the first successful search/inspect/discover sub-query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<serde_json::Value>>,
    /// Mirrors the first merged metric.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// Mirrors the first merged metric.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    /// Mirrors the first merged metric.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grouped: Option<Grouped>,
    /// All merged metrics, in first-seen batch order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<MergedMetric>,
    /// Per-sub-query results.
    pub results: Vec<SubQueryResult>,
    /// The first comparison in batch order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<ComparisonResult>,
    /// Every comparison when more than one sub-query requested one.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub comparisons: Vec<ComparisonResult>,
    /// Derived observations, by priority.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub insights: Vec<Insight>,
    /// Chart series.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub chart_data: Vec<ChartData>,
    /// First lifecycle-state warning in batch order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_warning: Option<StateWarning>,
    /// True if every successful sub-query was served from cache.
    pub cached: bool,
    /// Batch wall time in milliseconds.
    pub execution_ms: u64,
    /// Audit record per sub-query.
    #[serde(rename = "query_metadata")]
    pub query_metadata: Vec<QueryMetadata>,
    /// Set when every sub-query failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    /// Number of sub-queries that succeeded.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.result.success).count()
    }

    /// Every comparison, whether one or many.
    pub fn all_comparisons(&self) -> impl Iterator<Item = &ComparisonResult> {
        self.comparison
            .iter()
            .chain(self.comparisons.iter().skip(usize::from(self.comparison.is_some())))
    }

    /// Date windows the successful results were computed over.
    pub fn windows(&self) -> impl Iterator<Item = &DateWindow> {
        self.results
            .iter()
            .filter(|r| r.result.success)
            .filter_map(|r| r.window.as_ref())
    }

    /// True if every successful metric is literally zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        let successes: Vec<&QueryResult> = self
            .results
            .iter()
            .map(|r| &r.result)
            .filter(|r| r.success)
            .collect();
        !successes.is_empty() && successes.iter().all(|r| r.is_zero())
    }

    /// Serializes to the JSON handed to the drafter.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Category of a grounding issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// A name-like token not present in the retrieved data.
    UnknownName,
    /// A currency-like number not present in the retrieved data.
    UnknownAmount,
    /// A period reference inconsistent with the windows used.
    PeriodMismatch,
    /// A zero result not stated as a literal zero.
    MissingZero,
}

/// One ungrounded claim found in a draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroundingIssue {
    /// Category.
    pub kind: IssueKind,
    /// The offending text as it appears in the draft.
    pub token: String,
}

/// Outcome of validating a drafted answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationVerdict {
    /// True if the draft has no issues.
    pub is_clean: bool,
    /// Issues in draft order.
    pub issues: Vec<GroundingIssue>,
    /// Names present in the retrieved data.
    pub ground_truth_names: Vec<String>,
    /// Present, and non-empty, whenever `is_clean` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repaired_answer: Option<String>,
}

impl ValidationVerdict {
    /// A clean verdict.
    #[must_use]
    pub fn clean(ground_truth_names: Vec<String>) -> Self {
        Self {
            is_clean: true,
            issues: Vec::new(),
            ground_truth_names,
            repaired_answer: None,
        }
    }

    /// The text to return: the draft when clean, the repaired answer otherwise.
    #[must_use]
    pub fn final_answer<'a>(&'a self, draft: &'a str) -> &'a str {
        match (&self.repaired_answer, self.is_clean) {
            (Some(repaired), false) => repaired,
            _ => draft,
        }
    }
}
