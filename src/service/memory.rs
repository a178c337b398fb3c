//! In-memory data service.
//!
//! Evaluates domain filters over JSON records the way the remote service
//! would. Relational values are stored as `[id, "Name"]`; related-field
//! predicates such as `location_id.usage` read a flattened key of the same
//! name. Failures and latency can be injected per model.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde_json::Value as J;

use super::{display_label, DataService, FieldInfo, GroupRow, Record};
use crate::error::ServiceError;
use crate::filter::{DomainFilter, Operator, Predicate};
use crate::value::DATE_FORMAT;

static UNSET: J = J::Bool(false);

fn lock_err(context: &'static str) -> ServiceError {
    ServiceError::ConnectionFailed {
        message: format!("poisoned lock: {context}"),
    }
}

#[derive(Debug, Default)]
struct ModelData {
    records: Vec<Record>,
    fields: Vec<FieldInfo>,
}

#[derive(Debug, Default)]
struct Behavior {
    failures: HashMap<String, ServiceError>,
    latency: HashMap<String, Duration>,
}

/// A [`DataService`] over in-memory JSON records.
///
/// # Examples
///
/// ```
/// use groundql::service::{DataService, InMemoryDataService};
/// use groundql::filter::DomainFilter;
/// use serde_json::json;
///
/// let service = InMemoryDataService::new().with_model(
///     "sale.order",
///     vec![json!({"id": 1, "amount_total": 10.0}), json!({"id": 2, "amount_total": 5.0})],
/// );
/// let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
/// let count = rt.block_on(service.search_count("sale.order", &DomainFilter::all())).unwrap();
/// assert_eq!(count, 2);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryDataService {
    models: RwLock<HashMap<String, ModelData>>,
    behavior: RwLock<Behavior>,
    calls: AtomicU64,
}

impl InMemoryDataService {
    /// An empty service with no models.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a model with records. Non-object values are ignored.
    #[must_use]
    pub fn with_model(mut self, model: &str, records: Vec<J>) -> Self {
        let models = self.models.get_mut().unwrap_or_else(PoisonError::into_inner);
        let data = models.entry(model.to_string()).or_default();
        data.records.extend(records.into_iter().filter_map(|r| match r {
            J::Object(map) => Some(map),
            _ => None,
        }));
        self
    }

    /// Declares the field list `fields_get` reports for `model`.
    #[must_use]
    pub fn with_fields(mut self, model: &str, fields: Vec<FieldInfo>) -> Self {
        let models = self.models.get_mut().unwrap_or_else(PoisonError::into_inner);
        models.entry(model.to_string()).or_default().fields = fields;
        self
    }

    /// Appends a record to `model`, creating the model if needed.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::MalformedResponse` if `record` is not an object.
    pub fn insert(&self, model: &str, record: J) -> Result<(), ServiceError> {
        let J::Object(map) = record else {
            return Err(ServiceError::MalformedResponse {
                message: "record must be a JSON object".to_string(),
            });
        };
        let mut models = self.models.write().map_err(|_| lock_err("models.insert"))?;
        models.entry(model.to_string()).or_default().records.push(map);
        Ok(())
    }

    /// Makes every call on `model` fail with `error` until cleared.
    pub fn fail_model(&self, model: &str, error: ServiceError) {
        let mut behavior = self.behavior.write().unwrap_or_else(PoisonError::into_inner);
        behavior.failures.insert(model.to_string(), error);
    }

    /// Removes an injected failure.
    pub fn clear_failure(&self, model: &str) {
        let mut behavior = self.behavior.write().unwrap_or_else(PoisonError::into_inner);
        behavior.failures.remove(model);
    }

    /// Delays every call on `model` by `delay`.
    pub fn set_latency(&self, model: &str, delay: Duration) {
        let mut behavior = self.behavior.write().unwrap_or_else(PoisonError::into_inner);
        behavior.latency.insert(model.to_string(), delay);
    }

    /// Number of RPC calls received.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(AtomicOrdering::Relaxed)
    }

    async fn enter(&self, model: &str) -> Result<(), ServiceError> {
        self.calls.fetch_add(1, AtomicOrdering::Relaxed);
        let (delay, failure) = {
            let behavior = self.behavior.read().map_err(|_| lock_err("behavior.read"))?;
            (
                behavior.latency.get(model).copied(),
                behavior.failures.get(model).cloned(),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn matching(&self, model: &str, domain: &DomainFilter) -> Result<Vec<Record>, ServiceError> {
        let models = self.models.read().map_err(|_| lock_err("models.read"))?;
        let data = models.get(model).ok_or_else(|| ServiceError::UnknownModel {
            model: model.to_string(),
        })?;
        Ok(data
            .records
            .iter()
            .filter(|r| domain.predicates().iter().all(|p| matches_predicate(r, p)))
            .cloned()
            .collect())
    }
}

fn field_value<'a>(record: &'a Record, field: &str) -> &'a J {
    record.get(field).unwrap_or(&UNSET)
}

fn is_relation(value: &J) -> Option<(f64, &str)> {
    match value.as_array().map(Vec::as_slice) {
        Some([J::Number(id), J::String(name)]) => id.as_f64().map(|id| (id, name.as_str())),
        _ => None,
    }
}

fn values_equal(actual: &J, operand: &J) -> bool {
    if let Some((id, name)) = is_relation(actual) {
        return match operand {
            J::Number(n) => n.as_f64().is_some_and(|n| (n - id).abs() < f64::EPSILON),
            J::String(s) => s == name,
            _ => false,
        };
    }
    match (actual, operand) {
        (J::Number(a), J::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
            _ => false,
        },
        (J::Null, J::Bool(false)) => true,
        _ => actual == operand,
    }
}

fn compare(actual: &J, operand: &J) -> Option<Ordering> {
    if let Some((id, _)) = is_relation(actual) {
        return operand.as_f64().and_then(|n| id.partial_cmp(&n));
    }
    match (actual, operand) {
        (J::Number(a), J::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (J::String(a), J::String(b)) => Some(a.as_str().cmp(b.as_str())),
        _ => None,
    }
}

fn matches_predicate(record: &Record, predicate: &Predicate) -> bool {
    let actual = field_value(record, &predicate.field);
    let operand = predicate.value.to_json();
    let in_list = || {
        operand
            .as_array()
            .is_some_and(|items| items.iter().any(|item| values_equal(actual, item)))
    };
    match predicate.operator {
        Operator::Eq => values_equal(actual, &operand),
        Operator::Ne => !values_equal(actual, &operand),
        Operator::Gt => compare(actual, &operand) == Some(Ordering::Greater),
        Operator::Ge => matches!(compare(actual, &operand), Some(Ordering::Greater | Ordering::Equal)),
        Operator::Lt => compare(actual, &operand) == Some(Ordering::Less),
        Operator::Le => matches!(compare(actual, &operand), Some(Ordering::Less | Ordering::Equal)),
        Operator::In => in_list(),
        Operator::NotIn => !in_list(),
        Operator::ILike => {
            let needle = operand.as_str().unwrap_or_default().replace('%', "").to_lowercase();
            display_label(actual).to_lowercase().contains(&needle)
        }
    }
}

fn parse_day(value: &J) -> Option<NaiveDate> {
    let text = value.as_str()?;
    NaiveDate::parse_from_str(text.get(..10)?, DATE_FORMAT).ok()
}

fn group_value(record: &Record, spec: &str) -> J {
    let Some((field, granularity)) = spec.split_once(':') else {
        return field_value(record, spec).clone();
    };
    let Some(day) = parse_day(field_value(record, field)) else {
        return J::Bool(false);
    };
    let label = match granularity {
        "day" => day.format("%d %b %Y").to_string(),
        "week" => format!("W{:02} {}", day.iso_week().week(), day.iso_week().year()),
        "quarter" => format!("Q{} {}", (day.month() - 1) / 3 + 1, day.year()),
        "year" => day.year().to_string(),
        _ => day.format("%B %Y").to_string(),
    };
    J::String(label)
}

fn infer_type(value: &J) -> &'static str {
    match value {
        J::Bool(_) => "boolean",
        J::Number(n) if n.is_i64() || n.is_u64() => "integer",
        J::Number(_) => "float",
        J::Array(_) if is_relation(value).is_some() => "many2one",
        J::Array(_) => "many2many",
        J::String(s) if s.len() == 10 && parse_day(value).is_some() => "date",
        J::String(s) if s.len() == 19 && parse_day(value).is_some() => "datetime",
        _ => "char",
    }
}

fn field_label(name: &str) -> String {
    name.trim_end_matches("_id")
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            chars
                .next()
                .map(|c| c.to_uppercase().chain(chars).collect::<String>())
                .unwrap_or_default()
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl DataService for InMemoryDataService {
    async fn search_read(
        &self,
        model: &str,
        domain: &DomainFilter,
        fields: &[String],
        limit: Option<usize>,
        order: Option<&str>,
    ) -> Result<Vec<Record>, ServiceError> {
        self.enter(model).await?;
        let mut records = self.matching(model, domain)?;
        if let Some(order) = order.and_then(|o| o.split(',').next()) {
            let mut parts = order.split_whitespace();
            let field = parts.next().unwrap_or_default().to_string();
            let descending = parts.next().is_some_and(|d| d.eq_ignore_ascii_case("desc"));
            records.sort_by(|a, b| {
                let ord = compare(field_value(a, &field), field_value(b, &field)).unwrap_or(Ordering::Equal);
                if descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        if fields.is_empty() {
            return Ok(records);
        }
        Ok(records
            .into_iter()
            .map(|record| {
                let mut projected = Record::new();
                if let Some(id) = record.get("id") {
                    projected.insert("id".to_string(), id.clone());
                }
                for field in fields {
                    projected.insert(field.clone(), field_value(&record, field).clone());
                }
                projected
            })
            .collect())
    }

    async fn search_count(&self, model: &str, domain: &DomainFilter) -> Result<u64, ServiceError> {
        self.enter(model).await?;
        Ok(self.matching(model, domain)?.len() as u64)
    }

    async fn read_group(
        &self,
        model: &str,
        domain: &DomainFilter,
        sum_fields: &[String],
        group_by: &[String],
    ) -> Result<Vec<GroupRow>, ServiceError> {
        self.enter(model).await?;
        let records = self.matching(model, domain)?;
        let mut rows: Vec<GroupRow> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        if group_by.is_empty() {
            rows.push(GroupRow {
                values: Record::new(),
                count: 0,
                sums: sum_fields.iter().map(|f| (f.clone(), 0.0)).collect(),
            });
            index.insert(String::new(), 0);
        }

        for record in &records {
            let mut values = Record::new();
            for spec in group_by {
                values.insert(spec.clone(), group_value(record, spec));
            }
            let key = if group_by.is_empty() {
                String::new()
            } else {
                J::Object(values.clone()).to_string()
            };
            let idx = *index.entry(key).or_insert_with(|| {
                rows.push(GroupRow {
                    values,
                    count: 0,
                    sums: HashMap::new(),
                });
                rows.len() - 1
            });
            let row = &mut rows[idx];
            row.count += 1;
            for field in sum_fields {
                *row.sums.entry(field.clone()).or_default() +=
                    field_value(record, field).as_f64().unwrap_or(0.0);
            }
        }
        Ok(rows)
    }

    async fn fields_get(&self, model: &str) -> Result<Vec<FieldInfo>, ServiceError> {
        self.enter(model).await?;
        let models = self.models.read().map_err(|_| lock_err("models.fields"))?;
        let data = models.get(model).ok_or_else(|| ServiceError::UnknownModel {
            model: model.to_string(),
        })?;
        if !data.fields.is_empty() {
            return Ok(data.fields.clone());
        }
        let names: BTreeSet<&String> = data.records.iter().flat_map(|r| r.keys()).collect();
        Ok(names
            .into_iter()
            .map(|name| {
                let sample = data
                    .records
                    .iter()
                    .filter_map(|r| r.get(name))
                    .find(|v| !matches!(v, J::Bool(false) | J::Null))
                    .unwrap_or(&UNSET);
                FieldInfo {
                    name: name.clone(),
                    field_type: infer_type(sample).to_string(),
                    label: field_label(name),
                    relation: None,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use serde_json::json;

    fn orders() -> InMemoryDataService {
        InMemoryDataService::new().with_model(
            "sale.order",
            vec![
                json!({"id": 1, "name": "S1", "partner_id": [1, "CustomerA"], "state": "sale",
                       "date_order": "2024-05-02 10:00:00", "amount_total": 60.0}),
                json!({"id": 2, "name": "S2", "partner_id": [1, "CustomerA"], "state": "sale",
                       "date_order": "2024-05-10 10:00:00", "amount_total": 40.0}),
                json!({"id": 3, "name": "S3", "partner_id": [2, "CustomerB"], "state": "draft",
                       "date_order": "2024-04-20 09:00:00", "amount_total": 40.0}),
                json!({"id": 4, "name": "S4", "partner_id": false, "state": "cancel",
                       "date_order": "2024-05-20 09:00:00", "amount_total": 5.0}),
            ],
        )
    }

    fn domain(preds: Vec<Predicate>) -> DomainFilter {
        DomainFilter::new(preds)
    }

    #[tokio::test]
    async fn test_domain_evaluation() {
        let svc = orders();
        let states = domain(vec![Predicate::new("state", Operator::In, Value::list(["sale", "done"]))]);
        assert_eq!(svc.search_count("sale.order", &states).await.unwrap(), 2);

        let by_partner_id = domain(vec![Predicate::new("partner_id", Operator::Eq, 2_i64)]);
        assert_eq!(svc.search_count("sale.order", &by_partner_id).await.unwrap(), 1);

        let since = domain(vec![Predicate::new("date_order", Operator::Ge, "2024-05-01 00:00:00")]);
        assert_eq!(svc.search_count("sale.order", &since).await.unwrap(), 3);

        let named = domain(vec![Predicate::new("partner_id", Operator::ILike, "customera")]);
        assert_eq!(svc.search_count("sale.order", &named).await.unwrap(), 2);

        let unset = domain(vec![Predicate::new("partner_id", Operator::Eq, false)]);
        assert_eq!(svc.search_count("sale.order", &unset).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_search_read_order_limit_projection() {
        let svc = orders();
        let fields = vec!["amount_total".to_string()];
        let rows = svc
            .search_read("sale.order", &DomainFilter::all(), &fields, Some(2), Some("amount_total desc"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], 1);
        assert_eq!(rows[0].len(), 2);
    }

    #[tokio::test]
    async fn test_read_group_by_partner_and_month() {
        let svc = orders();
        let sums = vec!["amount_total".to_string()];
        let rows = svc
            .read_group("sale.order", &DomainFilter::all(), &sums, &["partner_id".to_string()])
            .await
            .unwrap();
        let a = rows.iter().find(|r| r.label("partner_id") == "CustomerA").unwrap();
        assert_eq!(a.count, 2);
        assert!((a.sum("amount_total") - 100.0).abs() < f64::EPSILON);
        assert!(rows.iter().any(|r| r.label("partner_id") == "Undefined"));

        let months = svc
            .read_group("sale.order", &DomainFilter::all(), &sums, &["date_order:month".to_string()])
            .await
            .unwrap();
        let labels: Vec<String> = months.iter().map(|r| r.label("date_order:month")).collect();
        assert_eq!(labels, vec!["May 2024".to_string(), "April 2024".to_string()]);
    }

    #[tokio::test]
    async fn test_ungrouped_read_group_always_returns_a_row() {
        let svc = orders();
        let none = domain(vec![Predicate::new("state", Operator::Eq, "done")]);
        let rows = svc
            .read_group("sale.order", &none, &["amount_total".to_string()], &[])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].count, 0);
    }

    #[tokio::test]
    async fn test_failure_injection_and_unknown_model() {
        let svc = orders();
        svc.fail_model(
            "sale.order",
            ServiceError::RemoteFault {
                code: 500,
                message: "boom".to_string(),
            },
        );
        assert!(svc.search_count("sale.order", &DomainFilter::all()).await.is_err());
        svc.clear_failure("sale.order");
        assert!(svc.search_count("sale.order", &DomainFilter::all()).await.is_ok());
        assert!(matches!(
            svc.search_count("res.partner", &DomainFilter::all()).await,
            Err(ServiceError::UnknownModel { .. })
        ));
        assert_eq!(svc.calls(), 3);
    }

    #[tokio::test]
    async fn test_fields_get_inferred() {
        let svc = orders();
        let fields = svc.fields_get("sale.order").await.unwrap();
        let partner = fields.iter().find(|f| f.name == "partner_id").unwrap();
        assert_eq!(partner.field_type, "many2one");
        assert_eq!(partner.label, "Partner");
        let date = fields.iter().find(|f| f.name == "date_order").unwrap();
        assert_eq!(date.field_type, "datetime");
    }

    #[tokio::test]
    async fn test_insert_appends() {
        let svc = orders();
        svc.insert("sale.order", json!({"id": 5, "state": "sale"})).unwrap();
        assert!(svc.insert("sale.order", json!([1, 2])).is_err());
        assert_eq!(svc.search_count("sale.order", &DomainFilter::all()).await.unwrap(), 5);
    }
}
