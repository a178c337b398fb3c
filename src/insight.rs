//! Insight generation and chart series.
//!
//! Insights are advisory text built only from numbers already present in
//! the merged result, so they carry no claim the validator would reject.

use crate::config::InsightConfig;
use crate::result::{
    format_amount, ranked, ChartData, ChartKind, ComparisonMetric, ComparisonResult, Insight, InsightKind,
    MergedMetric, SubQueryResult, Trend,
};

/// Bars kept in a grouped chart.
const CHART_MAX_BARS: usize = 12;

fn metric_noun(metric: &MergedMetric) -> String {
    metric.label.to_lowercase()
}

/// Derives ranked observations from a merged batch.
#[derive(Debug, Clone, Default)]
pub struct InsightGenerator {
    config: InsightConfig,
}

impl InsightGenerator {
    /// Creates a generator with the given thresholds.
    #[must_use]
    pub const fn new(config: InsightConfig) -> Self {
        Self { config }
    }

    /// Insights sorted by priority (most important first), capped at
    /// `max_insights`.
    #[must_use]
    pub fn generate(
        &self,
        results: &[SubQueryResult],
        metrics: &[MergedMetric],
        comparisons: &[ComparisonResult],
    ) -> Vec<Insight> {
        let mut insights = Vec::new();
        self.partial_failure(results, &mut insights);
        self.empty(results, &mut insights);
        for comparison in comparisons {
            self.swing(comparison, &mut insights);
        }
        for metric in metrics {
            self.concentration(metric, &mut insights);
        }
        for r in results {
            if let Some(warning) = &r.result.state_warning {
                insights.push(Insight {
                    kind: InsightKind::StateMix,
                    text: warning.suggestion.clone(),
                    priority: 1,
                });
            }
        }
        insights.sort_by_key(|i| i.priority);
        insights.truncate(self.config.max_insights);
        insights
    }

    fn partial_failure(&self, results: &[SubQueryResult], out: &mut Vec<Insight>) {
        let failed: Vec<&str> = results
            .iter()
            .filter(|r| !r.result.success)
            .map(|r| r.id.as_str())
            .collect();
        if failed.is_empty() {
            return;
        }
        let text = if failed.len() == results.len() {
            "No data was retrieved: every sub-query failed.".to_string()
        } else {
            format!(
                "{} of {} sub-queries failed ({}); the figures cover the remaining results only.",
                failed.len(),
                results.len(),
                failed.join(", ")
            )
        };
        out.push(Insight {
            kind: InsightKind::PartialFailure,
            text,
            priority: 0,
        });
    }

    fn empty(&self, results: &[SubQueryResult], out: &mut Vec<Insight>) {
        for r in results.iter().filter(|r| r.result.is_zero()) {
            let period = r
                .window
                .as_ref()
                .map(|w| format!(" for {}", w.label))
                .unwrap_or_default();
            out.push(Insight {
                kind: InsightKind::Empty,
                text: format!("{} ({}){period}: 0 records matched, total 0.", r.entity, r.id),
                priority: 0,
            });
        }
    }

    fn swing(&self, c: &ComparisonResult, out: &mut Vec<Insight>) {
        let what = match c.metric {
            ComparisonMetric::Total => "Total",
            ComparisonMetric::Count => "Record count",
        };
        let (cur, prev) = (format_amount(c.current_value), format_amount(c.previous_value));
        match c.variation.percent {
            Some(p) if p.abs() > self.config.swing_threshold => {
                let verb = if c.variation.trend == Trend::Up { "rose" } else { "fell" };
                out.push(Insight {
                    kind: InsightKind::Swing,
                    text: format!(
                        "{what} for {} {verb} {:.1}% from {} ({prev}) to {} ({cur}).",
                        c.query_id,
                        p.abs() * 100.0,
                        c.period_labels.previous,
                        c.period_labels.current
                    ),
                    priority: 1,
                });
            }
            None if c.current_value != 0.0 => out.push(Insight {
                kind: InsightKind::Swing,
                text: format!(
                    "{what} for {} was 0 in {} and {cur} in {}; no percentage change can be computed.",
                    c.query_id, c.period_labels.previous, c.period_labels.current
                ),
                priority: 2,
            }),
            _ => {}
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn concentration(&self, metric: &MergedMetric, out: &mut Vec<Insight>) {
        if metric.grouped.len() < 2 {
            return;
        }
        let by_amount = metric.total.is_some();
        let value = |b: &crate::result::GroupBucket| if by_amount { b.total } else { b.count as f64 };
        let overall: f64 = metric.grouped.values().map(value).sum();
        if overall <= 0.0 {
            return;
        }
        let Some((label, top)) = ranked(&metric.grouped).into_iter().next() else {
            return;
        };
        let share = value(&top) / overall;
        if share <= self.config.concentration_share {
            return;
        }
        let text = if by_amount {
            format!(
                "{label} accounts for {:.1}% of the {} total ({} of {}).",
                share * 100.0,
                metric_noun(metric),
                format_amount(top.total),
                format_amount(overall)
            )
        } else {
            format!(
                "{label} accounts for {:.1}% of {} records ({} of {}).",
                share * 100.0,
                metric_noun(metric),
                top.count,
                overall
            )
        };
        out.push(Insight {
            kind: InsightKind::Concentration,
            text,
            priority: 2,
        });
    }
}

/// Chart series for the merged result: a bar chart of the first grouped
/// metric and a two-bar chart of the first comparison.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn chart_data(metrics: &[MergedMetric], comparisons: &[ComparisonResult]) -> Vec<ChartData> {
    let mut charts = Vec::new();
    if let Some(metric) = metrics.iter().find(|m| !m.grouped.is_empty()) {
        let by_amount = metric.total.is_some();
        let (labels, values) = ranked(&metric.grouped)
            .into_iter()
            .take(CHART_MAX_BARS)
            .map(|(label, b)| (label.to_string(), if by_amount { b.total } else { b.count as f64 }))
            .unzip();
        charts.push(ChartData {
            kind: ChartKind::Bar,
            title: metric.label.clone(),
            labels,
            values,
        });
    }
    if let Some(c) = comparisons.first() {
        charts.push(ChartData {
            kind: ChartKind::Comparison,
            title: format!("{} vs {}", c.period_labels.current, c.period_labels.previous),
            labels: vec![c.period_labels.previous.clone(), c.period_labels.current.clone()],
            values: vec![c.previous_value, c.current_value],
        });
    }
    charts
}
