//! Deterministic answers rebuilt from retrieved data.

use crate::result::{format_amount, ranked, ComparisonMetric, MergedMetric, ToolResult};

/// Keys tried, in order, when listing search records by name.
const RECORD_NAME_KEYS: &[&str] = &["name", "display_name", "value"];

fn period_of(result: &ToolResult, metric: &MergedMetric) -> String {
    let labels: Vec<&str> = metric
        .sources
        .iter()
        .filter_map(|id| result.results.iter().find(|r| &r.id == id))
        .filter_map(|r| r.window.as_ref().map(|w| w.label.as_str()))
        .collect();
    match labels.split_first() {
        Some((first, rest)) if rest.iter().all(|l| l == first) => format!(" for {first}"),
        _ => String::new(),
    }
}

fn metric_lines(result: &ToolResult, metric: &MergedMetric, max_entries: usize, out: &mut Vec<String>) {
    let mut headline = format!("{}{}: {} records", metric.label, period_of(result, metric), metric.count);
    if let Some(total) = metric.total {
        headline.push_str(&format!(", total {}", format_amount(total)));
    }
    headline.push('.');
    out.push(headline);

    if metric.grouped.is_empty() {
        return;
    }
    let entries = ranked(&metric.grouped);
    let shown = entries.len().min(max_entries);
    let by = if metric.total.is_some() { "total" } else { "count" };
    out.push(format!("Top {shown} by {by}:"));
    for (idx, (label, bucket)) in entries.iter().take(shown).enumerate() {
        let mut line = format!("{}. {label}: {} records", idx + 1, bucket.count);
        if metric.total.is_some() {
            line.push_str(&format!(", total {}", format_amount(bucket.total)));
        }
        out.push(line);
    }
    if entries.len() > shown {
        out.push(format!("{} more groups are not listed.", entries.len() - shown));
    }
}

fn record_names(result: &ToolResult, max_entries: usize) -> Option<String> {
    let data = result.data.as_ref()?;
    let names: Vec<&str> = data
        .iter()
        .filter_map(|record| {
            RECORD_NAME_KEYS
                .iter()
                .find_map(|key| record.get(*key).and_then(serde_json::Value::as_str))
        })
        .take(max_entries)
        .collect();
    let mut line = format!("Found {} records", data.len());
    if names.is_empty() {
        line.push('.');
    } else {
        line.push_str(&format!(": {}.", names.join("; ")));
    }
    Some(line)
}

/// Rebuilds an answer from `result` alone.
///
/// Every name and number in the output comes straight from the result, so
/// the output passes the validator that produced it.
pub(crate) fn repaired_answer(result: &ToolResult, max_entries: usize) -> String {
    if result.succeeded() == 0 {
        return "No data could be retrieved for this question, so no figures can be reported.".to_string();
    }

    let mut lines = Vec::new();
    if result.is_zero() {
        let period = result
            .windows()
            .next()
            .map(|w| format!(" for {}", w.label))
            .unwrap_or_default();
        lines.push(format!("The result is 0: 0 records matched{period}, total 0."));
    } else {
        for metric in &result.metrics {
            metric_lines(result, metric, max_entries, &mut lines);
        }
        if result.metrics.is_empty() {
            lines.extend(record_names(result, max_entries));
        }
        for c in result.all_comparisons() {
            let value = |v: f64| match c.metric {
                ComparisonMetric::Total => format_amount(v),
                ComparisonMetric::Count => format!("{v:.0}"),
            };
            lines.push(format!(
                "{}: {} vs {}: {} ({}).",
                c.period_labels.current,
                value(c.current_value),
                c.period_labels.previous,
                value(c.previous_value),
                c.variation.label
            ));
        }
    }

    if let Some(warning) = &result.state_warning {
        lines.push(format!("Note: {}", warning.suggestion));
    }
    let failed: Vec<&str> = result
        .results
        .iter()
        .filter(|r| !r.result.success)
        .map(|r| r.id.as_str())
        .collect();
    if !failed.is_empty() {
        lines.push(format!(
            "Note: {} of {} sub-queries failed ({}) and are not reflected above.",
            failed.len(),
            result.results.len(),
            failed.join(", ")
        ));
    }
    if lines.is_empty() {
        lines.push("The query returned 0 records.".to_string());
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Operation;
    use crate::result::{GroupBucket, Grouped, MetricKey, QueryResult, SubQueryResult};
    use crate::time::DateWindow;
    use serde_json::json;
    use uuid::Uuid;

    fn sub(id: &str, result: QueryResult) -> SubQueryResult {
        SubQueryResult {
            id: id.to_string(),
            entity: "orders".to_string(),
            operation: Operation::Aggregate,
            window: DateWindow::month(2024, 5),
            result,
        }
    }

    fn base(results: Vec<SubQueryResult>) -> ToolResult {
        ToolResult {
            request_id: Uuid::nil(),
            success: true,
            data: None,
            count: None,
            total: None,
            grouped: None,
            metrics: Vec::new(),
            results,
            comparison: None,
            comparisons: Vec::new(),
            insights: Vec::new(),
            chart_data: Vec::new(),
            state_warning: None,
            cached: false,
            execution_ms: 0,
            query_metadata: Vec::new(),
            error: None,
        }
    }

    #[test]
    fn test_lists_ranked_groups() {
        let grouped: Grouped = [("CustomerB", 1, 40.0), ("CustomerA", 3, 100.0), ("CustomerD", 1, 5.0)]
            .iter()
            .map(|(l, c, t)| ((*l).to_string(), GroupBucket::new(*c, *t)))
            .collect();
        let ok = QueryResult {
            success: true,
            count: Some(5),
            total: Some(145.0),
            ..QueryResult::default()
        };
        let mut result = base(vec![sub("q1", ok), sub("q2", QueryResult::failure("timeout", 5))]);
        result.metrics.push(MergedMetric {
            key: MetricKey {
                entity: "orders".to_string(),
                operation: Operation::Aggregate,
                group_by: vec!["partner_id".to_string()],
            },
            label: "Sales Orders".to_string(),
            count: 5,
            total: Some(145.0),
            grouped,
            sources: vec!["q1".to_string()],
        });

        let text = repaired_answer(&result, 2);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Sales Orders for May 2024: 5 records, total 145.00.",
                "Top 2 by total:",
                "1. CustomerA: 3 records, total 100.00",
                "2. CustomerB: 1 records, total 40.00",
                "1 more groups are not listed.",
                "Note: 1 of 2 sub-queries failed (q2) and are not reflected above.",
            ]
        );
    }

    #[test]
    fn test_zero_statement() {
        let zero = QueryResult {
            success: true,
            count: Some(0),
            total: Some(0.0),
            ..QueryResult::default()
        };
        let text = repaired_answer(&base(vec![sub("q1", zero)]), 10);
        assert_eq!(text, "The result is 0: 0 records matched for May 2024, total 0.");
    }

    #[test]
    fn test_search_records_by_name() {
        let ok = QueryResult {
            success: true,
            count: Some(2),
            ..QueryResult::default()
        };
        let mut result = base(vec![sub("q1", ok)]);
        result.data = Some(vec![json!({"name": "S00012"}), json!({"name": "S00013"})]);
        assert_eq!(repaired_answer(&result, 10), "Found 2 records: S00012; S00013.");
    }

    #[test]
    fn test_nothing_retrieved() {
        let text = repaired_answer(&base(vec![sub("q1", QueryResult::failure("boom", 1))]), 10);
        assert!(text.starts_with("No data could be retrieved"));
    }
}
