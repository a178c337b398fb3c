//! Odoo-style JSON-RPC transport (`/jsonrpc`, `object.execute_kw`).
//!
//! Only read methods are reachable: [`ReadMethod`] is the complete list of
//! model methods this client can invoke.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as J};
use tracing::debug;

use super::{DataService, FieldInfo, GroupRow, Record};
use crate::error::ServiceError;
use crate::filter::DomainFilter;

/// Connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcConfig {
    /// Base URL, e.g. `https://erp.example.com`.
    pub url: String,
    /// Database name.
    pub database: String,
    /// User login.
    pub login: String,
    /// Password or API key.
    pub password: String,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

const fn default_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Copy)]
enum ReadMethod {
    SearchRead,
    SearchCount,
    ReadGroup,
    FieldsGet,
}

impl ReadMethod {
    const fn as_str(self) -> &'static str {
        match self {
            Self::SearchRead => "search_read",
            Self::SearchCount => "search_count",
            Self::ReadGroup => "read_group",
            Self::FieldsGet => "fields_get",
        }
    }
}

/// A [`DataService`] backed by an Odoo-compatible JSON-RPC endpoint.
#[derive(Debug)]
pub struct JsonRpcDataService {
    client: Client,
    endpoint: String,
    database: String,
    uid: i64,
    password: String,
    next_id: AtomicU64,
}

impl JsonRpcDataService {
    /// Authenticates and returns a connected client.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionFailed` on transport errors or rejected credentials.
    pub async fn connect(config: JsonRpcConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ServiceError::ConnectionFailed {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        let endpoint = format!("{}/jsonrpc", config.url.trim_end_matches('/'));
        let mut service = Self {
            client,
            endpoint,
            database: config.database,
            uid: 0,
            password: config.password,
            next_id: AtomicU64::new(1),
        };
        let uid = service
            .call("common", "login", json!([service.database, config.login, service.password]))
            .await?;
        service.uid = uid.as_i64().filter(|uid| *uid > 0).ok_or_else(|| ServiceError::ConnectionFailed {
            message: "authentication rejected".to_string(),
        })?;
        Ok(service)
    }

    async fn call(&self, service: &str, method: &str, args: J) -> Result<J, ServiceError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": {"service": service, "method": method, "args": args},
            "id": id,
        });
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::ConnectionFailed {
                message: e.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::RemoteFault {
                code: i64::from(status.as_u16()),
                message: format!("HTTP {status}"),
            });
        }
        let mut payload: J = response.json().await.map_err(|e| ServiceError::MalformedResponse {
            message: e.to_string(),
        })?;
        if let Some(error) = payload.get("error") {
            return Err(ServiceError::RemoteFault {
                code: error["code"].as_i64().unwrap_or(-1),
                message: error["data"]["message"]
                    .as_str()
                    .or_else(|| error["message"].as_str())
                    .unwrap_or("unknown remote error")
                    .to_string(),
            });
        }
        payload
            .get_mut("result")
            .map(J::take)
            .ok_or_else(|| malformed("a result member"))
    }

    async fn execute_kw(
        &self,
        model: &str,
        method: ReadMethod,
        args: J,
        kwargs: J,
    ) -> Result<J, ServiceError> {
        debug!(model, method = method.as_str(), "execute_kw");
        self.call(
            "object",
            "execute_kw",
            json!([self.database, self.uid, self.password, model, method.as_str(), args, kwargs]),
        )
        .await
    }
}

fn malformed(what: &str) -> ServiceError {
    ServiceError::MalformedResponse {
        message: format!("expected {what}"),
    }
}

fn into_records(value: J) -> Result<Vec<Record>, ServiceError> {
    let J::Array(items) = value else {
        return Err(malformed("a list of records"));
    };
    items
        .into_iter()
        .map(|item| match item {
            J::Object(map) => Ok(map),
            _ => Err(malformed("record objects")),
        })
        .collect()
}

#[async_trait]
impl DataService for JsonRpcDataService {
    async fn search_read(
        &self,
        model: &str,
        domain: &DomainFilter,
        fields: &[String],
        limit: Option<usize>,
        order: Option<&str>,
    ) -> Result<Vec<Record>, ServiceError> {
        let mut kwargs = json!({"fields": fields});
        if let Some(limit) = limit {
            kwargs["limit"] = json!(limit);
        }
        if let Some(order) = order {
            kwargs["order"] = json!(order);
        }
        let result = self
            .execute_kw(model, ReadMethod::SearchRead, json!([domain.to_json()]), kwargs)
            .await?;
        into_records(result)
    }

    async fn search_count(&self, model: &str, domain: &DomainFilter) -> Result<u64, ServiceError> {
        let result = self
            .execute_kw(model, ReadMethod::SearchCount, json!([domain.to_json()]), json!({}))
            .await?;
        result.as_u64().ok_or_else(|| malformed("an integer count"))
    }

    async fn read_group(
        &self,
        model: &str,
        domain: &DomainFilter,
        sum_fields: &[String],
        group_by: &[String],
    ) -> Result<Vec<GroupRow>, ServiceError> {
        let fields: Vec<String> = sum_fields.iter().map(|f| format!("{f}:sum")).collect();
        let kwargs = json!({
            "domain": domain.to_json(),
            "fields": fields,
            "groupby": group_by,
            "lazy": false,
        });
        let rows = into_records(self.execute_kw(model, ReadMethod::ReadGroup, json!([]), kwargs).await?)?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let values = group_by
                    .iter()
                    .map(|spec| (spec.clone(), row.get(spec).cloned().unwrap_or(J::Bool(false))))
                    .collect();
                let sums = sum_fields
                    .iter()
                    .map(|f| (f.clone(), row.get(f).and_then(J::as_f64).unwrap_or(0.0)))
                    .collect();
                GroupRow {
                    values,
                    count: row.get("__count").and_then(J::as_u64).unwrap_or(0),
                    sums,
                }
            })
            .collect())
    }

    async fn fields_get(&self, model: &str) -> Result<Vec<FieldInfo>, ServiceError> {
        let kwargs = json!({"attributes": ["string", "type", "relation"]});
        let result = self.execute_kw(model, ReadMethod::FieldsGet, json!([]), kwargs).await?;
        let J::Object(map) = result else {
            return Err(malformed("a field map"));
        };
        Ok(map
            .into_iter()
            .map(|(name, attrs)| FieldInfo {
                label: attrs["string"].as_str().unwrap_or(&name).to_string(),
                field_type: attrs["type"].as_str().unwrap_or("char").to_string(),
                relation: attrs["relation"].as_str().map(ToString::to_string),
                name,
            })
            .collect())
    }
}
