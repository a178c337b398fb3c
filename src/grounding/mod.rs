//! Grounding validation of drafted answers.
//!
//! The drafter's text is untrusted. Before it is returned, every name-like
//! token and currency-like number in it must fuzzy-match something the
//! engine actually retrieved, every period it mentions must overlap a window
//! the engine actually queried, and an all-zero result must be stated as a
//! literal zero. Any violation swaps the draft for a deterministic answer
//! rebuilt from the retrieved data alone.

mod extract;
mod repair;

use std::collections::{BTreeSet, HashSet};

use tracing::{debug, instrument, warn};

use crate::config::GroundingConfig;
use crate::filter::dates::{period_mentions, PeriodMention};
use crate::filter::{contains_phrase, normalize_text};
use crate::result::{Grouped, GroundingIssue, IssueKind, ToolResult, ValidationVerdict};
use crate::time::DateWindow;

use extract::{all_number_values, amount_tokens, fold, is_common, name_candidates, states_zero};

/// Tokens accepted in any answer.
const ALWAYS_ALLOWED: &[&str] = &["KPI", "VAT", "IVA", "ERP", "Odoo", "OK", "PDF", "CSV", "ID"];

/// Literal names and amounts present in a tool result.
///
/// Names keep their display form; matching happens on folded text.
#[derive(Debug, Clone, Default)]
pub struct GroundTruth {
    names: BTreeSet<String>,
    amounts: Vec<f64>,
}

impl GroundTruth {
    /// Collects every label, string field and number the result carries,
    /// plus derived figures a faithful answer may quote (averages, shares,
    /// period deltas).
    #[must_use]
    pub fn from_result(result: &ToolResult) -> Self {
        let mut truth = Self::default();
        for r in &result.results {
            truth.add_name(&r.id);
            truth.add_name(&r.entity);
            if let Some(window) = &r.window {
                truth.add_name(&window.label);
            }
            if !r.result.success {
                continue;
            }
            truth.add_totals(r.result.count, r.result.total);
            if let Some(grouped) = &r.result.grouped {
                truth.add_grouped(grouped);
            }
            if let Some(records) = &r.result.records {
                for record in records {
                    truth.add_json(record);
                }
            }
            if let Some(warning) = &r.result.state_warning {
                truth.add_grouped(&warning.distribution);
            }
        }
        truth.add_totals(result.count, result.total);
        for metric in &result.metrics {
            truth.add_name(&metric.label);
            truth.add_name(&metric.key.entity);
            truth.add_totals(Some(metric.count), metric.total);
            truth.add_grouped(&metric.grouped);
        }
        for c in result.all_comparisons() {
            truth.add_name(&c.period_labels.current);
            truth.add_name(&c.period_labels.previous);
            truth.amounts.extend([c.current_value, c.previous_value, c.variation.absolute.abs()]);
            if let Some(p) = c.variation.percent {
                truth.amounts.push(p * 100.0);
            }
            truth.add_grouped(&c.current_grouped);
            truth.add_grouped(&c.previous_grouped);
        }
        if let Some(data) = &result.data {
            for record in data {
                truth.add_json(record);
            }
        }
        truth
    }

    /// Adds the names and numbers of the user's question; restating the
    /// question is not a retrieved-fact claim.
    #[must_use]
    pub fn with_question(mut self, question: &str) -> Self {
        self.amounts.extend(all_number_values(question));
        self
    }

    /// Ground-truth names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Ground-truth amounts, unsorted.
    #[must_use]
    pub fn amounts(&self) -> &[f64] {
        &self.amounts
    }

    fn add_name(&mut self, name: &str) {
        let trimmed = name.trim();
        if !trimmed.is_empty() && trimmed.len() <= 200 {
            self.names.insert(trimmed.to_string());
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn add_totals(&mut self, count: Option<u64>, total: Option<f64>) {
        if let Some(count) = count {
            self.amounts.push(count as f64);
        }
        if let Some(total) = total {
            self.amounts.push(total);
            if let Some(count) = count.filter(|c| *c > 0) {
                self.amounts.push(total / count as f64);
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn add_grouped(&mut self, grouped: &Grouped) {
        let overall_total: f64 = grouped.values().map(|b| b.total).sum();
        let overall_count: u64 = grouped.values().map(|b| b.count).sum();
        for (label, bucket) in grouped {
            self.add_name(label);
            self.add_totals(Some(bucket.count), Some(bucket.total));
            if overall_total != 0.0 {
                self.amounts.push(bucket.total / overall_total * 100.0);
            }
            if overall_count > 0 {
                self.amounts.push(bucket.count as f64 / overall_count as f64 * 100.0);
            }
        }
    }

    fn add_json(&mut self, value: &serde_json::Value) {
        match value {
            serde_json::Value::String(s) => self.add_name(s),
            serde_json::Value::Number(n) => {
                if let Some(f) = n.as_f64() {
                    self.amounts.push(f);
                }
            }
            serde_json::Value::Array(items) => items.iter().for_each(|v| self.add_json(v)),
            serde_json::Value::Object(map) => map.values().for_each(|v| self.add_json(v)),
            serde_json::Value::Bool(_) | serde_json::Value::Null => {}
        }
    }

    fn matches_name(&self, candidate: &str, min_overlap: f64) -> bool {
        let folded = fold(candidate);
        self.names
            .iter()
            .any(|name| fuzzy_match(&folded, &fold(name), min_overlap))
    }

    fn matches_amount(&self, value: f64, rounding: f64, tolerance: f64) -> bool {
        let value = value.abs();
        self.amounts.iter().any(|truth| {
            let truth = truth.abs();
            (value - truth).abs() <= rounding + tolerance * truth
        })
    }
}

/// Fuzzy name match on folded text.
///
/// Matches when either side occurs in the other on word boundaries (the
/// shorter side at least 3 characters, and not a common word), or when at
/// least `min_overlap` of the candidate's significant tokens occur in the
/// name.
///
/// ```
/// use groundql::grounding::fuzzy_match;
///
/// assert!(fuzzy_match("acme", "acme corp", 0.5));
/// assert!(fuzzy_match("banco chile", "banco de chile", 0.5));
/// assert!(!fuzzy_match("customerc", "customera", 0.5));
/// ```
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn fuzzy_match(candidate: &str, name: &str, min_overlap: f64) -> bool {
    if candidate.is_empty() || name.is_empty() {
        return false;
    }
    if candidate == name {
        return true;
    }
    let shorter = candidate.len().min(name.len());
    if shorter >= 3 {
        if contains_phrase(name, candidate) {
            return true;
        }
        let name_is_generic = name.split(' ').all(is_common);
        if !name_is_generic && contains_phrase(candidate, name) {
            return true;
        }
    }
    let significant: Vec<&str> = candidate
        .split(' ')
        .filter(|t| t.len() >= 3 && !is_common(t))
        .collect();
    if significant.is_empty() {
        return false;
    }
    let name_tokens: HashSet<&str> = name.split(' ').collect();
    let hits = significant.iter().filter(|t| name_tokens.contains(*t)).count();
    hits > 0 && hits as f64 / significant.len() as f64 >= min_overlap
}

/// Checks drafted answers against the data they claim to report.
#[derive(Debug, Clone, Default)]
pub struct GroundingValidator {
    config: GroundingConfig,
}

impl GroundingValidator {
    /// Creates a validator with the given thresholds.
    #[must_use]
    pub const fn new(config: GroundingConfig) -> Self {
        Self { config }
    }

    /// Ground truth for `result`, including what the question itself says.
    #[must_use]
    pub fn ground_truth(&self, result: &ToolResult, question: &str) -> GroundTruth {
        GroundTruth::from_result(result).with_question(question)
    }

    /// Validates `draft` against `result`.
    ///
    /// Any issue yields a verdict carrying the repaired answer. A result whose
    /// sub-queries all failed backs no figure, so every claimed name or amount
    /// is an issue there.
    #[instrument(skip_all, fields(request_id = %result.request_id))]
    pub fn validate(&self, draft: &str, result: &ToolResult, question: &str) -> ValidationVerdict {
        let truth = self.ground_truth(result, question);
        let names: Vec<String> = truth.names().map(ToString::to_string).collect();
        let issues = self.issues(draft, result, &truth, question);
        if issues.is_empty() {
            debug!(names = names.len(), amounts = truth.amounts().len(), "draft is grounded");
            return ValidationVerdict::clean(names);
        }

        let kinds: Vec<IssueKind> = issues.iter().map(|i| i.kind).collect();
        warn!(issues = issues.len(), ?kinds, "draft failed grounding, substituting repaired answer");
        ValidationVerdict {
            is_clean: false,
            issues,
            ground_truth_names: names,
            repaired_answer: Some(self.repair(result)),
        }
    }

    /// The deterministic answer built from `result` alone. Never empty.
    #[must_use]
    pub fn repair(&self, result: &ToolResult) -> String {
        repair::repaired_answer(result, self.config.max_repaired_entries)
    }

    fn issues(
        &self,
        draft: &str,
        result: &ToolResult,
        truth: &GroundTruth,
        question: &str,
    ) -> Vec<GroundingIssue> {
        let mut issues = Vec::new();
        let mut push = |kind: IssueKind, token: String| {
            let issue = GroundingIssue { kind, token };
            if !issues.contains(&issue) {
                issues.push(issue);
            }
        };

        let folded_question = fold(question);
        for candidate in name_candidates(draft) {
            if !self.name_is_grounded(&candidate, truth, &folded_question) {
                push(IssueKind::UnknownName, candidate);
            }
        }

        for token in amount_tokens(draft) {
            let grounded = token.readings.iter().any(|r| {
                truth.matches_amount(r.value, r.rounding, self.config.amount_tolerance)
            });
            if !grounded {
                push(IssueKind::UnknownAmount, token.text);
            }
        }

        let windows: Vec<&DateWindow> = result
            .windows()
            .chain(result.all_comparisons().flat_map(|c| [&c.current_window, &c.previous_window]))
            .collect();
        if !windows.is_empty() {
            for mention in period_mentions(&normalize_text(draft)) {
                if !period_is_covered(&mention, &windows) {
                    let text = match mention {
                        PeriodMention::Month { text, .. } | PeriodMention::Year { text, .. } => text,
                    };
                    push(IssueKind::PeriodMismatch, text);
                }
            }
        }

        if result.is_zero() && !states_zero(draft) {
            push(IssueKind::MissingZero, "0".to_string());
        }
        issues
    }

    fn name_is_grounded(&self, candidate: &str, truth: &GroundTruth, folded_question: &str) -> bool {
        let folded = fold(candidate);
        if folded.chars().filter(|c| c.is_alphanumeric()).count() < 2 {
            return true;
        }
        ALWAYS_ALLOWED.iter().any(|a| a.eq_ignore_ascii_case(candidate))
            || contains_phrase(folded_question, &folded)
            || truth.matches_name(candidate, self.config.min_token_overlap)
    }
}

fn period_is_covered(mention: &PeriodMention, windows: &[&DateWindow]) -> bool {
    match mention {
        PeriodMention::Month {
            month,
            year: Some(year),
            ..
        } => DateWindow::month(*year, *month).is_some_and(|m| windows.iter().any(|w| w.overlaps(&m))),
        PeriodMention::Month { month, year: None, .. } => windows
            .iter()
            .any(|w| w.months_covered().iter().any(|(_, m)| m == month)),
        PeriodMention::Year { year, .. } => {
            DateWindow::year(*year).is_some_and(|y| windows.iter().any(|w| w.overlaps(&y)))
        }
    }
}
