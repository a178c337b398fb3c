//! Period-over-period comparison.
//!
//! For each compared sub-query the previous window is derived from the
//! window its primary result was computed over, and the same query is re-run
//! through the execution engine (and its cache) with only the date
//! predicates swapped. Comparisons of different sub-queries run
//! concurrently.

use futures::future::join_all;
use tracing::{debug, warn};

use crate::config::ComparisonConfig;
use crate::engine::{BatchOutcome, ExecutionEngine, PreparedQuery};
use crate::result::{
    ComparisonMetric, ComparisonResult, PeriodLabels, QueryResult, SubQueryResult, Trend, Variation,
};

/// Computes the change between two period values.
///
/// ```
/// use groundql::comparison::variation;
/// use groundql::result::Trend;
///
/// let v = variation(125.0, 100.0, 0.01);
/// assert_eq!(v.percent, Some(0.25));
/// assert_eq!(v.trend, Trend::Up);
/// assert_eq!(v.label, "+25.0%");
///
/// let v = variation(10.0, 0.0, 0.01);
/// assert_eq!(v.percent, None);
/// ```
#[must_use]
pub fn variation(current: f64, previous: f64, flat_threshold: f64) -> Variation {
    let absolute = current - previous;
    let direction = if absolute > 0.0 {
        Trend::Up
    } else if absolute < 0.0 {
        Trend::Down
    } else {
        Trend::Flat
    };
    if previous == 0.0 {
        let label = if current == 0.0 {
            "no activity in either period".to_string()
        } else {
            "no activity in the previous period; change is indeterminate".to_string()
        };
        return Variation {
            absolute,
            percent: None,
            trend: direction,
            label,
        };
    }
    let percent = absolute / previous;
    let trend = if percent.abs() < flat_threshold {
        Trend::Flat
    } else {
        direction
    };
    Variation {
        absolute,
        percent: Some(percent),
        trend,
        label: format!("{:+.1}%", percent * 100.0),
    }
}

#[allow(clippy::cast_precision_loss)]
fn metric_value(result: &QueryResult, metric: ComparisonMetric) -> f64 {
    match metric {
        ComparisonMetric::Total => result.total.unwrap_or(0.0),
        ComparisonMetric::Count => result.count.unwrap_or(0) as f64,
    }
}

/// Runs comparisons for a completed batch.
#[derive(Debug, Clone, Default)]
pub struct ComparisonEngine {
    config: ComparisonConfig,
}

impl ComparisonEngine {
    /// Creates a comparison engine with the given settings.
    #[must_use]
    pub const fn new(config: ComparisonConfig) -> Self {
        Self { config }
    }

    /// Compares every successful sub-query that requested a comparison.
    /// Results are in batch order.
    pub async fn compare_batch(
        &self,
        engine: &ExecutionEngine,
        outcome: &BatchOutcome,
    ) -> Vec<ComparisonResult> {
        let pending = outcome
            .successes()
            .filter(|(p, _)| p.compare.is_some())
            .map(|(p, current)| self.compare_one(engine, p, current));
        join_all(pending).await.into_iter().flatten().collect()
    }

    /// Compares one sub-query whose primary result is already known.
    pub async fn compare_one(
        &self,
        engine: &ExecutionEngine,
        prepared: &PreparedQuery,
        current: &SubQueryResult,
    ) -> Option<ComparisonResult> {
        let mode = prepared.compare?;
        let Some(current_window) = prepared.window().cloned() else {
            debug!(id = %prepared.spec.id, "no date window, comparison skipped");
            return None;
        };
        let previous_window = mode.previous(&current_window);
        if previous_window.end >= current_window.start {
            warn!(
                id = %prepared.spec.id,
                current = %current_window,
                "previous window overlaps, comparison skipped"
            );
            return None;
        }

        let previous = engine.run(&prepared.with_window(previous_window.clone())).await;
        if !previous.success {
            warn!(
                id = %prepared.spec.id,
                error = previous.error.as_deref().unwrap_or_default(),
                "previous-period query failed"
            );
            return None;
        }

        let metric = if prepared.schema.amount_field.is_some() && current.result.total.is_some() {
            ComparisonMetric::Total
        } else {
            ComparisonMetric::Count
        };
        let current_value = metric_value(&current.result, metric);
        let previous_value = metric_value(&previous, metric);
        let variation = variation(current_value, previous_value, self.config.flat_threshold);
        debug!(
            id = %prepared.spec.id,
            current = current_value,
            previous = previous_value,
            label = %variation.label,
            "comparison computed"
        );

        Some(ComparisonResult {
            query_id: prepared.spec.id.clone(),
            metric,
            current_value,
            previous_value,
            current_grouped: current.result.grouped.clone().unwrap_or_default(),
            previous_grouped: previous.grouped.unwrap_or_default(),
            variation,
            period_labels: PeriodLabels {
                current: current_window.label.clone(),
                previous: previous_window.label.clone(),
            },
            current_window,
            previous_window,
        })
    }
}
