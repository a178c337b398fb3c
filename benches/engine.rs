use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;

use groundql::config::{ExecutionConfig, GroundingConfig};
use groundql::llm::ScriptedDrafter;
use groundql::{
    AnalyticsPipeline, CacheKey, DataService, EngineConfig, EntityRegistry, ExecutionEngine, FilterTranslator,
    GroundingValidator, InMemoryDataService, Operation, QueryBatch, QueryResult, ResultCache, SubQuerySpec,
};

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 20).unwrap()
}

fn seeded_service(orders: u32) -> InMemoryDataService {
    let records = (0..orders)
        .map(|i| {
            let customer = i % 25;
            json!({
                "id": i,
                "name": format!("S{i:05}"),
                "state": if i % 7 == 0 { "draft" } else { "sale" },
                "partner_id": [customer, format!("Customer {customer}")],
                "date_order": format!("2024-05-{:02} 10:00:00", 1 + i % 28),
                "amount_total": f64::from(i % 500) + 0.5,
            })
        })
        .collect();
    InMemoryDataService::new().with_model("sale.order", records)
}

fn bench_translate(c: &mut Criterion) {
    let registry = EntityRegistry::odoo();
    let invoices = registry.resolve("invoices").unwrap();
    let translator = FilterTranslator::new();

    let mut group = c.benchmark_group("translate");
    group.throughput(Throughput::Elements(1));
    group.bench_function("overdue_last_month", |b| {
        b.iter(|| {
            translator
                .translate(&invoices, Some("overdue invoices last month"), None, today())
                .unwrap()
        });
    });
    group.bench_function("named_month_spanish", |b| {
        b.iter(|| {
            translator
                .translate(&invoices, Some("facturas publicadas de marzo 2024"), None, today())
                .unwrap()
        });
    });
    group.finish();
}

fn bench_cache(c: &mut Criterion) {
    let cache = ResultCache::default();
    let keys: Vec<CacheKey> = (0..64)
        .map(|i| {
            CacheKey::new(
                "sale.order",
                Operation::Count,
                &groundql::DomainFilter::all(),
                &[],
                Some(i),
                None,
            )
        })
        .collect();
    let result = QueryResult {
        success: true,
        count: Some(42),
        ..QueryResult::default()
    };
    for key in &keys {
        cache.insert(*key, &result);
    }

    let mut group = c.benchmark_group("cache");
    group.throughput(Throughput::Elements(1));
    group.bench_function("hit", |b| {
        let mut i = 0usize;
        b.iter(|| {
            i = (i + 1) % keys.len();
            cache.get(&keys[i])
        });
    });
    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();
    let service: Arc<dyn DataService> = Arc::new(seeded_service(5_000));
    let now = today().and_hms_opt(12, 0, 0).unwrap();
    let batch = QueryBatch {
        queries: vec![
            SubQuerySpec::new("by_customer", "orders", Operation::Aggregate)
                .filter("confirmed this month")
                .group_by("customer"),
            SubQuerySpec::new("count", "orders", Operation::Count).filter("this month"),
            SubQuerySpec::new("top", "orders", Operation::Search).filter("confirmed").limit(10),
        ],
        include_comparison: false,
        include_insights: false,
    };

    let mut group = c.benchmark_group("batch");
    group.throughput(Throughput::Elements(3));
    group.bench_function("uncached_three_queries_5k_orders", |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                // Fresh cache per iteration so every sub-query reaches the service.
                let engine = ExecutionEngine::new(
                    Arc::new(EntityRegistry::odoo()),
                    Arc::clone(&service),
                    Arc::new(ResultCache::default()),
                    ExecutionConfig::default(),
                );
                rt.block_on(engine.execute_batch(&batch, now)).unwrap();
            }
            start.elapsed()
        });
    });
    group.finish();
}

fn bench_validate(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    let config = EngineConfig::default();
    let engine = ExecutionEngine::new(
        Arc::new(EntityRegistry::odoo()),
        Arc::new(seeded_service(1_000)),
        Arc::new(ResultCache::new(&config.cache)),
        config.execution.clone(),
    );
    let pipeline = AnalyticsPipeline::new(engine, Arc::new(ScriptedDrafter::new()), &config);
    let batch = QueryBatch {
        queries: vec![SubQuerySpec::new("q1", "orders", Operation::Aggregate)
            .filter("confirmed this month")
            .group_by("customer")],
        include_comparison: false,
        include_insights: false,
    };
    let result = rt
        .block_on(pipeline.execute_tool(&batch, today().and_hms_opt(12, 0, 0).unwrap()))
        .unwrap();
    let validator = GroundingValidator::new(GroundingConfig::default());
    let draft = "Customer 3 led May 2024 with $9,875.50, followed by Customer 11 and Customer 7.";

    let mut group = c.benchmark_group("grounding");
    group.throughput(Throughput::Elements(1));
    group.bench_function("validate_grouped_draft", |b| {
        b.iter(|| validator.validate(draft, &result, "who bought most this month?"));
    });
    group.finish();
}

criterion_group!(engine, bench_translate, bench_cache, bench_batch, bench_validate);
criterion_main!(engine);
