//! Execution engine: runs a batch of sub-queries against the data service.
//!
//! Each sub-query is translated into a domain filter, looked up in the
//! result cache and, on a miss, executed with a per-call timeout. All
//! sub-queries of a batch run concurrently; a failed or timed-out sub-query
//! becomes a `success: false` entry without affecting its siblings.

mod merge;

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheKey, ResultCache};
use crate::config::ExecutionConfig;
use crate::error::{ExecutionError, GroundError, ServiceError};
use crate::filter::{DomainFilter, FilterTranslator, Translation, WindowSource};
use crate::query::{CompareMode, Operation, QueryBatch, SubQuerySpec};
use crate::result::{
    GroupBucket, Grouped, MergedMetric, QueryMetadata, QueryResult, StateWarning, SubQueryResult,
};
use crate::schema::{EntityRegistry, EntitySchema};
use crate::service::{humanize_record, DataService, GroupRow};
use crate::time::DateWindow;

/// A sub-query resolved against its schema, ready to run.
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    /// The sub-query as requested.
    pub spec: SubQuerySpec,
    /// Schema of the resolved entity.
    pub schema: Arc<EntitySchema>,
    /// Translated filter and recognized vocabulary.
    pub translation: Translation,
    /// Where the date window came from.
    pub window_source: Option<WindowSource>,
    /// Group-by aliases resolved to field specs (e.g. `date_order:month`).
    pub group_fields: Vec<String>,
    /// Effective row limit (search only).
    pub limit: Option<usize>,
    /// Effective order clause (search only).
    pub order: Option<String>,
    /// Comparison requested for this sub-query, if any.
    pub compare: Option<CompareMode>,
    /// Result cache key.
    pub key: CacheKey,
}

impl PreparedQuery {
    /// The domain filter sent to the data service.
    #[must_use]
    pub fn domain(&self) -> &DomainFilter {
        &self.translation.domain
    }

    /// The window the query covers, if any.
    #[must_use]
    pub fn window(&self) -> Option<&DateWindow> {
        self.translation.window.as_ref()
    }

    /// The same query over another window. Only the date predicates change.
    #[must_use]
    pub fn with_window(&self, window: DateWindow) -> Self {
        let domain = self
            .translation
            .domain
            .with_window(&self.schema.date_field, self.schema.date_kind, &window);
        let mut next = self.clone();
        next.key = cache_key(
            &self.schema,
            self.spec.operation,
            &domain,
            &self.group_fields,
            self.limit,
            self.order.as_deref(),
        );
        next.translation = Translation {
            domain,
            window: Some(window),
            recognized: self.translation.recognized.clone(),
        };
        next
    }
}

fn cache_key(
    schema: &EntitySchema,
    operation: Operation,
    domain: &DomainFilter,
    group_fields: &[String],
    limit: Option<usize>,
    order: Option<&str>,
) -> CacheKey {
    CacheKey::new(&schema.model, operation, domain, group_fields, limit, order)
}

/// Outcome of one batch.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// Per-sub-query results, in batch order.
    pub results: Vec<SubQueryResult>,
    /// Prepared form of each sub-query; `None` where preparation failed.
    pub prepared: Vec<Option<PreparedQuery>>,
    /// Merged metrics, in first-seen batch order.
    pub metrics: Vec<MergedMetric>,
    /// Audit trail, one entry per sub-query.
    pub metadata: Vec<QueryMetadata>,
    /// Batch wall time in milliseconds.
    pub elapsed_ms: u64,
}

impl BatchOutcome {
    /// Successful prepared queries paired with their results.
    pub fn successes(&self) -> impl Iterator<Item = (&PreparedQuery, &SubQueryResult)> {
        self.prepared
            .iter()
            .zip(&self.results)
            .filter_map(|(p, r)| p.as_ref().filter(|_| r.result.success).map(|p| (p, r)))
    }

    /// Number of failed sub-queries.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.result.success).count()
    }
}

/// Which sub-queries get a period comparison.
///
/// A sub-query carrying a `compareMode` is always compared. With
/// `includeComparison` and no explicit mode anywhere, the first count or
/// aggregate sub-query is compared month over month.
#[must_use]
pub fn comparison_plan(batch: &QueryBatch) -> Vec<Option<CompareMode>> {
    let comparable =
        |spec: &SubQuerySpec| matches!(spec.operation, Operation::Count | Operation::Aggregate);
    let explicit = batch.queries.iter().any(|q| q.compare_mode.is_some());
    if explicit || !batch.include_comparison {
        return batch
            .queries
            .iter()
            .map(|q| q.compare_mode.filter(|_| comparable(q)))
            .collect();
    }
    let first = batch.queries.iter().position(comparable);
    (0..batch.queries.len())
        .map(|idx| (Some(idx) == first).then_some(CompareMode::MonthOverMonth))
        .collect()
}

fn default_window(mode: CompareMode, today: NaiveDate) -> Option<DateWindow> {
    match mode {
        CompareMode::MonthOverMonth => DateWindow::month(today.year(), today.month()),
        CompareMode::YearOverYear => DateWindow::year(today.year()),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Runs sub-query batches against a [`DataService`].
pub struct ExecutionEngine {
    registry: Arc<EntityRegistry>,
    service: Arc<dyn DataService>,
    cache: Arc<ResultCache>,
    translator: FilterTranslator,
    config: ExecutionConfig,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("config", &self.config)
            .field("cache", &self.cache.stats())
            .finish_non_exhaustive()
    }
}

impl ExecutionEngine {
    /// Creates an engine. The cache is shared: pass the same instance to
    /// every engine of a deployment.
    #[must_use]
    pub fn new(
        registry: Arc<EntityRegistry>,
        service: Arc<dyn DataService>,
        cache: Arc<ResultCache>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            registry,
            service,
            cache,
            translator: FilterTranslator::new(),
            config,
        }
    }

    /// Entity schemas.
    #[must_use]
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Shared result cache.
    #[must_use]
    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Execution limits.
    #[must_use]
    pub const fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Resolves the schema, translates the filter and computes the cache key.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntity` for unresolvable entities, or a validation
    /// error for an inverted explicit range.
    pub fn prepare(
        &self,
        spec: &SubQuerySpec,
        compare: Option<CompareMode>,
        today: NaiveDate,
    ) -> Result<PreparedQuery, GroundError> {
        let schema = self
            .registry
            .resolve(&spec.entity)
            .ok_or_else(|| ExecutionError::UnknownEntity {
                name: spec.entity.clone(),
            })?;
        let filter_text = spec.filter_text.as_deref();
        let explicit = spec.explicit_date_range.as_ref();

        let fallback = compare.and_then(|mode| default_window(mode, today));
        let (translation, window_source) = match fallback {
            Some(fallback) => {
                let (t, source) = self.translator.translate_with_default_window(
                    &schema,
                    filter_text,
                    explicit,
                    today,
                    &fallback,
                )?;
                (t, Some(source))
            }
            None => {
                let t = self.translator.translate(&schema, filter_text, explicit, today)?;
                let source = match (&t.window, explicit) {
                    (None, _) => None,
                    (Some(_), Some(_)) => Some(WindowSource::Explicit),
                    (Some(_), None) => Some(WindowSource::Phrase),
                };
                (t, source)
            }
        };

        let group_fields: Vec<String> = spec
            .group_by
            .iter()
            .map(|alias| schema.resolve_group_field(alias))
            .collect();
        let (limit, order) = match spec.operation {
            Operation::Search => (
                Some(spec.limit.unwrap_or(self.config.default_search_limit)),
                Some(
                    spec.order_by
                        .clone()
                        .unwrap_or_else(|| format!("{} desc", schema.date_field)),
                ),
            ),
            _ => (None, None),
        };
        let key = cache_key(
            &schema,
            spec.operation,
            &translation.domain,
            &group_fields,
            limit,
            order.as_deref(),
        );

        Ok(PreparedQuery {
            spec: spec.clone(),
            schema,
            translation,
            window_source,
            group_fields,
            limit,
            order,
            compare,
            key,
        })
    }

    /// Validates and runs a batch concurrently.
    ///
    /// # Errors
    ///
    /// Only batch-level validation fails the call; sub-query failures are
    /// reported as `success: false` entries.
    #[instrument(skip(self, batch), fields(sub_queries = batch.queries.len()))]
    pub async fn execute_batch(
        &self,
        batch: &QueryBatch,
        now: NaiveDateTime,
    ) -> Result<BatchOutcome, GroundError> {
        let started = Instant::now();
        batch.validate(self.config.max_batch_size, self.config.max_search_limit)?;
        let today = now.date();
        let plan = comparison_plan(batch);

        let prepared: Vec<Result<PreparedQuery, GroundError>> = batch
            .queries
            .iter()
            .zip(&plan)
            .map(|(spec, compare)| self.prepare(spec, *compare, today))
            .collect();

        let results: Vec<QueryResult> = join_all(prepared.iter().map(|p| async move {
            match p {
                Ok(p) => self.run(p).await,
                Err(err) => QueryResult::failure(err.to_string(), 0),
            }
        }))
        .await;

        let mut outcome = BatchOutcome {
            results: Vec::with_capacity(results.len()),
            prepared: Vec::with_capacity(results.len()),
            metrics: Vec::new(),
            metadata: Vec::with_capacity(results.len()),
            elapsed_ms: 0,
        };
        for ((spec, prepared), result) in batch.queries.iter().zip(prepared).zip(results) {
            let prepared = prepared.ok();
            outcome.metadata.push(metadata(spec, prepared.as_ref(), &result));
            outcome.results.push(SubQueryResult {
                id: spec.id.clone(),
                entity: prepared
                    .as_ref()
                    .map_or_else(|| spec.entity.clone(), |p| p.schema.name.clone()),
                operation: spec.operation,
                window: prepared.as_ref().and_then(|p| p.translation.window.clone()),
                result,
            });
            outcome.prepared.push(prepared);
        }
        outcome.metrics = merge::merge_metrics(
            outcome
                .prepared
                .iter()
                .zip(&outcome.results)
                .filter_map(|(p, r)| p.as_ref().map(|p| (p, r))),
        );
        outcome.elapsed_ms = elapsed_ms(started);

        let failed = outcome.failed();
        info!(
            sub_queries = outcome.results.len(),
            succeeded = outcome.results.len() - failed,
            failed,
            metrics = outcome.metrics.len(),
            elapsed_ms = outcome.elapsed_ms,
            "batch executed"
        );
        Ok(outcome)
    }

    /// Runs one prepared query through the cache.
    pub async fn run(&self, prepared: &PreparedQuery) -> QueryResult {
        let started = Instant::now();
        if let Some(mut hit) = self.cache.get(&prepared.key) {
            hit.execution_ms = elapsed_ms(started);
            return hit;
        }
        match self.fetch(prepared).await {
            Ok(mut result) => {
                result.execution_ms = elapsed_ms(started);
                self.cache.insert(prepared.key, &result);
                result
            }
            Err(err) => {
                warn!(
                    id = %prepared.spec.id,
                    entity = %prepared.schema.name,
                    operation = %prepared.spec.operation,
                    retryable = err.is_retryable(),
                    error = %err,
                    "sub-query failed"
                );
                QueryResult::failure(err.to_string(), elapsed_ms(started))
            }
        }
    }

    async fn timed<T, F>(&self, call: F) -> Result<T, ExecutionError>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        match tokio::time::timeout(self.config.rpc_timeout(), call).await {
            Ok(result) => result.map_err(ExecutionError::from),
            Err(_) => Err(ExecutionError::Timeout {
                duration_ms: self.config.rpc_timeout_ms,
            }),
        }
    }

    async fn fetch(&self, p: &PreparedQuery) -> Result<QueryResult, ExecutionError> {
        let model = p.schema.model.as_str();
        let domain = p.domain();
        let mut result = QueryResult {
            success: true,
            ..QueryResult::default()
        };

        match p.spec.operation {
            Operation::Search => {
                let (records, count) = futures::try_join!(
                    self.timed(self.service.search_read(
                        model,
                        domain,
                        &p.schema.search_fields,
                        p.limit,
                        p.order.as_deref()
                    )),
                    self.timed(self.service.search_count(model, domain)),
                )?;
                result.records = Some(records.iter().map(humanize_record).collect());
                result.count = Some(count);
            }
            Operation::Count => {
                if p.group_fields.is_empty() {
                    let count = self.timed(self.service.search_count(model, domain)).await?;
                    result.count = Some(count);
                } else {
                    let rows = self
                        .timed(self.service.read_group(model, domain, &[], &p.group_fields))
                        .await?;
                    let (count, _, grouped) = summarize(&rows, &p.group_fields, None);
                    result.count = Some(count);
                    result.grouped = Some(grouped);
                }
            }
            Operation::Aggregate => {
                let sums: Vec<String> = p.schema.amount_field.iter().cloned().collect();
                let rows = self
                    .timed(self.service.read_group(model, domain, &sums, &p.group_fields))
                    .await?;
                let amount = p.schema.amount_field.as_deref();
                let (count, total, grouped) = summarize(&rows, &p.group_fields, amount);
                result.count = Some(count);
                result.total = amount.map(|_| total);
                if !p.group_fields.is_empty() {
                    result.grouped = Some(grouped);
                }
                result.state_warning = match self.state_warning(p, &rows).await {
                    Ok(warning) => warning,
                    Err(err) => {
                        warn!(
                            id = %p.spec.id,
                            error = %err,
                            "state distribution unavailable, returning result without it"
                        );
                        None
                    }
                };
            }
            Operation::Distinct => {
                let field =
                    p.group_fields.first().ok_or_else(|| ExecutionError::UnsupportedOperation {
                        operation: Operation::Distinct.to_string(),
                        requirement: "a group-by field".to_string(),
                    })?;
                let spec = std::slice::from_ref(field);
                let rows = self.timed(self.service.read_group(model, domain, &[], spec)).await?;
                let (_, _, grouped) = summarize(&rows, spec, None);
                result.count = Some(grouped.len() as u64);
                result.records = Some(
                    grouped
                        .iter()
                        .map(|(label, bucket)| {
                            serde_json::json!({"value": label, "count": bucket.count})
                        })
                        .collect(),
                );
                result.grouped = Some(grouped);
            }
            Operation::Discover => {
                let fields = self.timed(self.service.fields_get(model)).await?;
                result.count = Some(fields.len() as u64);
                result.records = Some(
                    fields
                        .iter()
                        .map(|f| serde_json::to_value(f).unwrap_or(serde_json::Value::Null))
                        .collect(),
                );
            }
            Operation::Inspect => {
                let records = self
                    .timed(self.service.search_read(model, domain, &[], Some(1), None))
                    .await?;
                result.count = Some(records.len() as u64);
                result.records = Some(records.iter().map(humanize_record).collect());
            }
        }
        Ok(result)
    }

    /// Lifecycle distribution check for aggregations with no status filter.
    async fn state_warning(
        &self,
        p: &PreparedQuery,
        rows: &[GroupRow],
    ) -> Result<Option<StateWarning>, ExecutionError> {
        let schema = &p.schema;
        let Some(state_field) = schema.state_field.as_deref() else {
            return Ok(None);
        };
        if !schema.has_lifecycle()
            || p.domain()
                .predicates()
                .iter()
                .any(|pred| schema.is_status_field(&pred.field))
        {
            return Ok(None);
        }

        let amount = schema.amount_field.as_deref();
        let state_spec = [state_field.to_string()];
        let distribution_rows;
        let rows = if p.group_fields == state_spec {
            rows
        } else {
            let sums: Vec<String> = amount.iter().map(ToString::to_string).collect();
            distribution_rows = self
                .timed(self.service.read_group(&schema.model, p.domain(), &sums, &state_spec))
                .await?;
            &distribution_rows
        };

        let mut distribution = Grouped::new();
        for row in rows.iter().filter(|r| r.count > 0) {
            let raw = row.label(state_field);
            let bucket = GroupBucket::new(row.count, amount.map_or(0.0, |f| row.sum(f)));
            distribution.entry(schema.state_label(&raw)).or_default().absorb(bucket);
        }
        if distribution.len() < 2 {
            return Ok(None);
        }

        let labels: Vec<&str> = distribution.keys().map(String::as_str).collect();
        let recommended = schema.recommended_predicates();
        let suggestion = match schema.recommended_status.as_deref() {
            Some(keyword) if !recommended.is_empty() => format!(
                "This result mixes {} {} states ({}). \
                 Add \"{keyword}\" to the filter to count only {keyword} records.",
                distribution.len(),
                schema.label.to_lowercase(),
                labels.join(", ")
            ),
            _ => format!(
                "This result mixes {} states ({}). Add a status to the filter to narrow it.",
                distribution.len(),
                labels.join(", ")
            ),
        };
        let suggested_filter = (!recommended.is_empty()).then(|| {
            recommended
                .into_iter()
                .fold(p.domain().clone(), |domain, pred| domain.and(pred))
        });
        warn!(
            id = %p.spec.id,
            entity = %schema.name,
            states = distribution.len(),
            "aggregation spans several lifecycle states"
        );
        Ok(Some(StateWarning {
            field: state_field.to_string(),
            distribution,
            suggestion,
            suggested_filter,
        }))
    }
}

/// Totals and label-keyed groups from read-group rows.
///
/// Labels join multiple group fields with ` / `. Rows that map to the same
/// label are summed.
fn summarize(
    rows: &[GroupRow],
    group_fields: &[String],
    amount: Option<&str>,
) -> (u64, f64, Grouped) {
    let mut count = 0;
    let mut total = 0.0;
    let mut grouped = Grouped::new();
    for row in rows {
        let bucket = GroupBucket::new(row.count, amount.map_or(0.0, |f| row.sum(f)));
        count += bucket.count;
        total += bucket.total;
        if !group_fields.is_empty() && row.count > 0 {
            let label = group_fields
                .iter()
                .map(|spec| row.label(spec))
                .collect::<Vec<_>>()
                .join(" / ");
            grouped.entry(label).or_default().absorb(bucket);
        }
    }
    (count, total, grouped)
}

fn metadata(
    spec: &SubQuerySpec,
    prepared: Option<&PreparedQuery>,
    result: &QueryResult,
) -> QueryMetadata {
    debug!(id = %spec.id, success = result.success, cached = result.cached, "sub-query metadata");
    QueryMetadata {
        id: spec.id.clone(),
        entity: spec.entity.clone(),
        model: prepared.map(|p| p.schema.model.clone()).unwrap_or_default(),
        operation: spec.operation,
        filter_text: spec.filter_text.clone(),
        domain: prepared.map(|p| p.domain().clone()).unwrap_or_default(),
        window: prepared.and_then(|p| p.translation.window.clone()),
        window_source: prepared.and_then(|p| p.window_source),
        recognized: prepared.map(|p| p.translation.recognized.clone()).unwrap_or_default(),
        cached: result.cached,
        success: result.success,
        error: result.error.clone(),
        execution_ms: result.execution_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::service::InMemoryDataService;
    use serde_json::json;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 15)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn service() -> Arc<InMemoryDataService> {
        Arc::new(InMemoryDataService::new().with_model(
            "sale.order",
            vec![
                json!({"id": 1, "partner_id": [1, "CustomerA"], "state": "sale",
                       "date_order": "2024-05-02 10:00:00", "amount_total": 60.0}),
                json!({"id": 2, "partner_id": [1, "CustomerA"], "state": "draft",
                       "date_order": "2024-05-03 10:00:00", "amount_total": 40.0}),
                json!({"id": 3, "partner_id": [2, "CustomerB"], "state": "sale",
                       "date_order": "2024-04-03 10:00:00", "amount_total": 25.0}),
            ],
        ))
    }

    fn engine(service: Arc<InMemoryDataService>) -> ExecutionEngine {
        ExecutionEngine::new(
            Arc::new(EntityRegistry::odoo()),
            service,
            Arc::new(ResultCache::new(&CacheConfig::default())),
            ExecutionConfig::default(),
        )
    }

    fn batch(queries: Vec<SubQuerySpec>) -> QueryBatch {
        QueryBatch {
            queries,
            include_comparison: false,
            include_insights: false,
        }
    }

    #[test]
    fn test_comparison_plan() {
        let agg = SubQuerySpec::new("a", "orders", Operation::Aggregate);
        let search = SubQuerySpec::new("s", "orders", Operation::Search);

        let mut b = batch(vec![search.clone(), agg.clone()]);
        assert_eq!(comparison_plan(&b), vec![None, None]);

        b.include_comparison = true;
        assert_eq!(comparison_plan(&b), vec![None, Some(CompareMode::MonthOverMonth)]);

        let b = batch(vec![
            search.compare(CompareMode::YearOverYear),
            agg.compare(CompareMode::YearOverYear),
        ]);
        assert_eq!(comparison_plan(&b), vec![None, Some(CompareMode::YearOverYear)]);
    }

    #[test]
    fn test_prepare_defaults_window_when_compared() {
        let e = engine(service());
        let spec = SubQuerySpec::new("a", "orders", Operation::Aggregate).filter("confirmed");
        let today = now().date();

        let plain = e.prepare(&spec, None, today).unwrap();
        assert!(plain.window().is_none());
        assert_eq!(plain.window_source, None);

        let compared = e.prepare(&spec, Some(CompareMode::MonthOverMonth), today).unwrap();
        assert_eq!(compared.window(), DateWindow::month(2024, 5).as_ref());
        assert_eq!(compared.window_source, Some(WindowSource::Default));
        assert_ne!(plain.key, compared.key);
    }

    #[test]
    fn test_prepare_unknown_entity() {
        let e = engine(service());
        let spec = SubQuerySpec::new("x", "spaceships", Operation::Count);
        let err = e.prepare(&spec, None, now().date()).unwrap_err();
        assert!(err.is_execution());
    }

    #[test]
    fn test_with_window_changes_key_and_domain() {
        let e = engine(service());
        let spec =
            SubQuerySpec::new("a", "orders", Operation::Aggregate).filter("this month confirmed");
        let p = e.prepare(&spec, None, now().date()).unwrap();
        let april = DateWindow::month(2024, 4).unwrap();
        let q = p.with_window(april.clone());
        assert_ne!(p.key, q.key);
        assert_eq!(q.window(), Some(&april));
        assert_eq!(q.domain().len(), p.domain().len());
        assert!(q.domain().touches_field("state"));
    }

    #[tokio::test]
    async fn test_aggregate_grouped_by_customer_uses_names() {
        let e = engine(service());
        let spec = SubQuerySpec::new("q1", "orders", Operation::Aggregate)
            .filter("this month")
            .group_by("customer");
        let out = e.execute_batch(&batch(vec![spec]), now()).await.unwrap();
        let r = &out.results[0].result;
        assert!(r.success);
        let grouped = r.grouped.as_ref().unwrap();
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped["CustomerA"], GroupBucket::new(2, 100.0));
        assert_eq!(r.total, Some(100.0));
        assert_eq!(r.count, Some(2));
    }

    #[tokio::test]
    async fn test_state_warning_raised_without_status_filter() {
        let e = engine(service());
        let spec = SubQuerySpec::new("q1", "orders", Operation::Aggregate).filter("this month");
        let out = e.execute_batch(&batch(vec![spec]), now()).await.unwrap();
        let warning = out.results[0].result.state_warning.as_ref().unwrap();
        assert_eq!(warning.field, "state");
        assert_eq!(warning.distribution["Sales Order"], GroupBucket::new(1, 60.0));
        assert_eq!(warning.distribution["Quotation"], GroupBucket::new(1, 40.0));
        assert!(warning.suggestion.contains("confirmed"));
        assert!(warning.suggested_filter.as_ref().unwrap().touches_field("state"));

        let spec =
            SubQuerySpec::new("q1", "orders", Operation::Aggregate).filter("confirmed this month");
        let out = e.execute_batch(&batch(vec![spec]), now()).await.unwrap();
        assert!(out.results[0].result.state_warning.is_none());
        assert_eq!(out.results[0].result.total, Some(60.0));
    }

    #[tokio::test]
    async fn test_state_warning_inferred_from_state_grouping() {
        let svc = service();
        let e = engine(Arc::clone(&svc));
        let spec = SubQuerySpec::new("q1", "orders", Operation::Aggregate).group_by("state");
        let out = e.execute_batch(&batch(vec![spec]), now()).await.unwrap();
        assert!(out.results[0].result.state_warning.is_some());
        // One read_group call: the distribution came from the grouped rows.
        assert_eq!(svc.calls(), 1);
    }

    #[tokio::test]
    async fn test_distinct_and_discover_and_inspect() {
        let e = engine(service());
        let out = e
            .execute_batch(
                &batch(vec![
                    SubQuerySpec::new("d", "orders", Operation::Distinct).group_by("customer"),
                    SubQuerySpec::new("f", "orders", Operation::Discover),
                    SubQuerySpec::new("i", "orders", Operation::Inspect),
                ]),
                now(),
            )
            .await
            .unwrap();
        assert_eq!(out.results[0].result.count, Some(2));
        let fields = out.results[1].result.records.as_ref().unwrap();
        assert!(fields.iter().any(|f| f["name"] == "partner_id"));
        let sample = &out.results[2].result.records.as_ref().unwrap()[0];
        assert_eq!(sample["partner_id"], "CustomerA");
    }

    #[tokio::test]
    async fn test_duplicate_cache_keys_count_once() {
        let e = engine(service());
        let out = e
            .execute_batch(
                &batch(vec![
                    SubQuerySpec::new("a", "orders", Operation::Count).filter("this month"),
                    SubQuerySpec::new("b", "orders", Operation::Count).filter("THIS   month"),
                ]),
                now(),
            )
            .await
            .unwrap();
        assert_eq!(out.metrics.len(), 1);
        assert_eq!(out.metrics[0].count, 2);
        assert_eq!(out.metrics[0].sources, vec!["a".to_string()]);
    }

    #[test]
    fn test_summarize_joins_multi_field_labels() {
        let rows = vec![GroupRow {
            values: serde_json::from_value(json!({
                "partner_id": [1, "CustomerA"],
                "date_order:month": "May 2024"
            }))
            .unwrap(),
            count: 2,
            sums: [("amount_total".to_string(), 10.0)].into_iter().collect(),
        }];
        let fields = vec!["partner_id".to_string(), "date_order:month".to_string()];
        let (count, total, grouped) = summarize(&rows, &fields, Some("amount_total"));
        assert_eq!(count, 2);
        assert!((total - 10.0).abs() < f64::EPSILON);
        assert!(grouped.contains_key("CustomerA / May 2024"));
    }
}
