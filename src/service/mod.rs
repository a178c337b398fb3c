//! The external data service seam.
//!
//! [`DataService`] is the read-only RPC surface the engine needs: search/read,
//! count, grouped aggregation and field discovery. There is no
//! write method. Two backends ship with the crate:
//!
//! - [`InMemoryDataService`]: evaluates domains over JSON records.
//! - `JsonRpcDataService` (feature `jsonrpc`): Odoo-style `execute_kw` over HTTP.

mod memory;

#[cfg(feature = "jsonrpc")]
mod jsonrpc;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::filter::DomainFilter;

pub use memory::InMemoryDataService;

#[cfg(feature = "jsonrpc")]
pub use jsonrpc::{JsonRpcConfig, JsonRpcDataService};

/// A record as returned by the data service.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// One row of a grouped aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRow {
    /// Group-by spec → raw group value (e.g. `[7, "Acme"]`, `"May 2024"`, `false`).
    pub values: Record,
    /// Records in the group.
    pub count: u64,
    /// Sum field → sum over the group.
    pub sums: HashMap<String, f64>,
}

impl GroupRow {
    /// Display label for the value of `spec`.
    #[must_use]
    pub fn label(&self, spec: &str) -> String {
        self.values
            .get(spec)
            .map_or_else(|| UNDEFINED_LABEL.to_string(), display_label)
    }

    /// Sum of `field`, 0 when absent.
    #[must_use]
    pub fn sum(&self, field: &str) -> f64 {
        self.sums.get(field).copied().unwrap_or(0.0)
    }
}

/// Field description from `fields_get`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    /// Technical field name.
    pub name: String,
    /// Field type, e.g. `monetary` or `many2one`.
    #[serde(rename = "type")]
    pub field_type: String,
    /// Display label.
    pub label: String,
    /// Target model of relational fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
}

/// Label used for groups whose value is unset.
pub const UNDEFINED_LABEL: &str = "Undefined";

/// Human-readable label for a raw field value.
///
/// Relational values arrive as `[id, "Display Name"]`; the display name is
/// used, never the id.
#[must_use]
pub fn display_label(value: &serde_json::Value) -> String {
    use serde_json::Value as J;
    match value {
        J::Array(items) => match items.as_slice() {
            [J::Number(_), J::String(name), ..] => name.clone(),
            [single] => display_label(single),
            _ => items.iter().map(display_label).collect::<Vec<_>>().join(", "),
        },
        J::String(s) if !s.trim().is_empty() => s.clone(),
        J::Number(n) => n.to_string(),
        J::Bool(true) => "Yes".to_string(),
        _ => UNDEFINED_LABEL.to_string(),
    }
}

/// Replaces relational `[id, name]` pairs with their display names.
#[must_use]
pub fn humanize_record(record: &Record) -> serde_json::Value {
    let mut out = serde_json::Map::with_capacity(record.len());
    for (key, value) in record {
        let shown = match value {
            serde_json::Value::Array(items)
                if items.len() == 2 && items[0].is_number() && items[1].is_string() =>
            {
                items[1].clone()
            }
            other => other.clone(),
        };
        out.insert(key.clone(), shown);
    }
    serde_json::Value::Object(out)
}

/// Read-only access to the external data service.
#[async_trait]
pub trait DataService: Send + Sync {
    /// Records matching `domain`, projected to `fields` (all fields when empty).
    async fn search_read(
        &self,
        model: &str,
        domain: &DomainFilter,
        fields: &[String],
        limit: Option<usize>,
        order: Option<&str>,
    ) -> Result<Vec<Record>, ServiceError>;

    /// Number of records matching `domain`.
    async fn search_count(&self, model: &str, domain: &DomainFilter) -> Result<u64, ServiceError>;

    /// Grouped counts and sums. With an empty `group_by` a single row covers
    /// every match.
    async fn read_group(
        &self,
        model: &str,
        domain: &DomainFilter,
        sum_fields: &[String],
        group_by: &[String],
    ) -> Result<Vec<GroupRow>, ServiceError>;

    /// Field descriptions of `model`.
    async fn fields_get(&self, model: &str) -> Result<Vec<FieldInfo>, ServiceError>;
}
