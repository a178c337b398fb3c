use std::time::{Duration, Instant};

use chrono::{Datelike, NaiveDate};
use proptest::prelude::*;
use uuid::Uuid;

use groundql::config::GroundingConfig;
use groundql::result::{merge_grouped, MergedMetric, MetricKey};
use groundql::time::month_from_name;
use groundql::{
    CacheKey, CompareMode, DateWindow, EntityRegistry, FilterTranslator, GroundingValidator, GroupBucket, Grouped,
    Operation, QueryResult, ResultCache, SubQueryResult, ToolResult,
};

const VOCABULARY: &[&str] = &[
    "confirmed",
    "cancelled",
    "posted",
    "paid",
    "unpaid",
    "overdue",
    "draft",
    "this month",
    "last month",
    "this year",
    "last year",
    "last 7 days",
    "last 30 days",
    "today",
    "yesterday",
    "in may 2024",
    "march",
    "q2 2023",
    "2023",
    "ventas",
    "facturas vencidas",
    "este mes",
    "by customer",
];

fn date() -> impl Strategy<Value = NaiveDate> {
    (2000i32..2040, 1u32..=12, 1u32..=28).prop_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

fn phrase() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(VOCABULARY), 0..4).prop_map(|words| words.join(" "))
}

fn grouped() -> impl Strategy<Value = Grouped> {
    prop::collection::btree_map("[a-e]{1,3}", (1u64..50, 0u32..100_000), 0..6).prop_map(|m| {
        m.into_iter()
            .map(|(k, (c, cents))| (k, GroupBucket::new(c, f64::from(cents) / 100.0)))
            .collect()
    })
}

fn capitalized_word() -> impl Strategy<Value = String> {
    "[A-Z][a-z]{3,8}".prop_filter("month names are periods", |w| month_from_name(&w.to_lowercase()).is_none())
}

fn customer_label() -> impl Strategy<Value = String> {
    (capitalized_word(), capitalized_word()).prop_map(|(a, b)| format!("{a} {b}"))
}

fn tool_result(grouped: Grouped) -> ToolResult {
    let count = grouped.values().map(|b| b.count).sum();
    let total = grouped.values().map(|b| b.total).sum();
    let result = QueryResult {
        success: true,
        count: Some(count),
        total: Some(total),
        grouped: Some(grouped.clone()),
        ..QueryResult::default()
    };
    ToolResult {
        request_id: Uuid::new_v4(),
        success: true,
        data: None,
        count: Some(count),
        total: Some(total),
        grouped: Some(grouped.clone()),
        metrics: vec![MergedMetric {
            key: MetricKey {
                entity: "orders".to_string(),
                operation: Operation::Aggregate,
                group_by: vec!["partner_id".to_string()],
            },
            label: "Sales Orders".to_string(),
            count,
            total: Some(total),
            grouped,
            sources: vec!["q1".to_string()],
        }],
        results: vec![SubQueryResult {
            id: "q1".to_string(),
            entity: "orders".to_string(),
            operation: Operation::Aggregate,
            window: DateWindow::month(2024, 5),
            result,
        }],
        comparison: None,
        comparisons: Vec::new(),
        insights: Vec::new(),
        chart_data: Vec::new(),
        state_warning: None,
        cached: false,
        execution_ms: 1,
        query_metadata: Vec::new(),
        error: None,
    }
}

proptest! {
    #[test]
    fn translation_is_deterministic(
        text in phrase(),
        today in date(),
        entity in prop::sample::select(&["orders", "invoices", "bills"][..])
    ) {
        let registry = EntityRegistry::odoo();
        let schema = registry.resolve(entity).unwrap();
        let translator = FilterTranslator::new();
        let first = translator.translate(&schema, Some(&text), None, today).unwrap();
        let second = translator.translate(&schema, Some(&text), None, today).unwrap();
        prop_assert_eq!(first.domain.canonical(), second.domain.canonical());
        prop_assert_eq!(first, second);
    }

    #[test]
    fn previous_window_never_overlaps_current(end in date(), days in 1u32..800, yoy in any::<bool>()) {
        let current = DateWindow::days_ending(end, days);
        let mode = if yoy { CompareMode::YearOverYear } else { CompareMode::MonthOverMonth };
        let previous = mode.previous(&current);
        prop_assert!(previous.end < current.start, "{previous:?} overlaps {current:?}");
        prop_assert!(previous.start <= previous.end);
    }

    #[test]
    fn month_over_month_spans_stay_comparable(end in date(), days in 1u32..120) {
        let current = DateWindow::days_ending(end, days);
        let previous = CompareMode::MonthOverMonth.previous(&current);
        prop_assert!((current.span_days() - previous.span_days()).abs() <= 3);
    }

    #[test]
    fn full_months_compare_to_the_previous_full_month(year in 2000i32..2040, month in 1u32..=12) {
        let current = DateWindow::month(year, month).unwrap();
        let previous = CompareMode::MonthOverMonth.previous(&current);
        prop_assert!(previous.is_full_month());
        prop_assert_eq!(previous.end.succ_opt().unwrap(), current.start);
        prop_assert_eq!(previous.start.day(), 1);
    }

    #[test]
    fn cache_serves_entries_only_within_ttl(
        ttl_ms in 10u64..10_000,
        offset_ms in 0u64..20_000,
        count in 1u64..1_000
    ) {
        let cache = ResultCache::with_limits(Duration::from_millis(ttl_ms), 8);
        let all = groundql::DomainFilter::all();
        let key = CacheKey::new("sale.order", Operation::Count, &all, &[], None, None);
        let stored = QueryResult { success: true, count: Some(count), ..QueryResult::default() };
        let t0 = Instant::now();
        prop_assert!(cache.insert_at(key, &stored, t0));

        let hit = cache.get_at(&key, t0 + Duration::from_millis(offset_ms));
        if offset_ms < ttl_ms {
            let hit = hit.unwrap();
            prop_assert_eq!(hit.count, Some(count));
            prop_assert!(hit.cached);
        } else {
            prop_assert!(hit.is_none());
        }
    }

    #[test]
    fn merging_groups_adds_counts_and_totals(a in grouped(), b in grouped()) {
        let mut merged = a.clone();
        merge_grouped(&mut merged, &b);
        for (label, bucket) in &merged {
            let left = a.get(label).copied().unwrap_or_default();
            let right = b.get(label).copied().unwrap_or_default();
            prop_assert_eq!(bucket.count, left.count + right.count);
            prop_assert!((bucket.total - (left.total + right.total)).abs() < 1e-6);
        }
        prop_assert!(a.keys().chain(b.keys()).all(|k| merged.contains_key(k)));
    }

    #[test]
    fn repaired_answers_are_always_grounded(
        groups in prop::collection::btree_map(customer_label(), (1u64..40, 1u32..50_000_000), 1..8)
    ) {
        let grouped: Grouped = groups
            .into_iter()
            .map(|(label, (count, cents))| (label, GroupBucket::new(count, f64::from(cents) / 100.0)))
            .collect();
        let result = tool_result(grouped);
        let validator = GroundingValidator::new(GroundingConfig::default());
        let repaired = validator.repair(&result);
        let verdict = validator.validate(&repaired, &result, "");
        prop_assert!(verdict.is_clean, "{repaired}\n{:?}", verdict.issues);
    }
}
