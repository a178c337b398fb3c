//! Cross-sub-query merge.
//!
//! Results answering the same metric (entity, operation, grouping) are
//! summed into one accumulator; `grouped` merges label by label. Two
//! sub-queries with the same cache key asked the same question, so only the
//! first contributes.

use std::collections::{HashMap, HashSet};

use super::PreparedQuery;
use crate::cache::CacheKey;
use crate::result::{merge_grouped, MergedMetric, MetricKey, SubQueryResult};

/// Merges successful metric results in batch order.
pub(crate) fn merge_metrics<'a, I>(entries: I) -> Vec<MergedMetric>
where
    I: IntoIterator<Item = (&'a PreparedQuery, &'a SubQueryResult)>,
{
    let mut metrics: Vec<MergedMetric> = Vec::new();
    let mut index: HashMap<MetricKey, usize> = HashMap::new();
    let mut seen: HashSet<CacheKey> = HashSet::new();

    for (prepared, sub) in entries {
        if !sub.result.success || !prepared.spec.operation.is_metric() {
            continue;
        }
        if !seen.insert(prepared.key) {
            continue;
        }
        let key = MetricKey {
            entity: prepared.schema.name.clone(),
            operation: prepared.spec.operation,
            group_by: prepared.group_fields.clone(),
        };
        let idx = *index.entry(key.clone()).or_insert_with(|| {
            metrics.push(MergedMetric {
                key,
                label: prepared.schema.label.clone(),
                count: 0,
                total: None,
                grouped: crate::result::Grouped::new(),
                sources: Vec::new(),
            });
            metrics.len() - 1
        });
        let metric = &mut metrics[idx];
        metric.count += sub.result.count.unwrap_or(0);
        if let Some(total) = sub.result.total {
            *metric.total.get_or_insert(0.0) += total;
        }
        if let Some(grouped) = &sub.result.grouped {
            merge_grouped(&mut metric.grouped, grouped);
        }
        metric.sources.push(sub.id.clone());
    }
    metrics
}
