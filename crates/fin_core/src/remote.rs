//! Remote backend transport
//!
//! The transport classifies every failure into a typed [`FinError`]:
//! connectivity problems become `Network` (eligible for offline fallback),
//! server-side rule violations become `Domain`, and missing/duplicate rows
//! become `NotFound`/`Conflict`. Callers never inspect message text.

use crate::ops::RemoteCall;
use async_trait::async_trait;
use fin_common::sanitizer::LogSanitizer;
use fin_common::{Collection, DomainError, FinError, Result};
use fin_config::RemoteConfig;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Header carrying the queue entry id so the server can drop duplicate replays
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Execute a mutation; returns the response `data`.
    async fn execute(&self, call: &RemoteCall, idempotency_key: Option<&str>) -> Result<Value>;

    /// Fetch the full snapshot of a collection visible to the session.
    async fn fetch(&self, collection: Collection) -> Result<Vec<Value>>;
}

/// Error body returned by the REST/RPC gateway
#[derive(Debug, Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP client for a PostgREST-style backend
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    access_token: Option<String>,
    sanitizer: LogSanitizer,
}

impl HttpRemote {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| FinError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            access_token: config.access_token.clone(),
            sanitizer: LogSanitizer::new(),
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("apikey", &self.api_key)
            .bearer_auth(bearer)
    }

    async fn send(&self, builder: reqwest::RequestBuilder, label: &str) -> Result<Value> {
        let response = builder.send().await.map_err(|e| {
            tracing::debug!("Transport failure on {}: {}", label, e);
            classify_transport(&e)
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| classify_transport(&e))?;

        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            let value: Value = serde_json::from_str(&text)?;
            return Ok(unwrap_envelope(value)?);
        }

        tracing::warn!(
            "Remote call {} failed with {}: {}",
            label,
            status,
            self.sanitizer.sanitize(&text)
        );
        Err(classify_status(status, &text))
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn execute(&self, call: &RemoteCall, idempotency_key: Option<&str>) -> Result<Value> {
        let label = call.label();
        let mut builder = match call {
            RemoteCall::Rpc { function, body } => self
                .request(Method::POST, &format!("/rest/v1/rpc/{}", function))
                .json(body),
            RemoteCall::Insert { table, rows } => self
                .request(Method::POST, &format!("/rest/v1/{}", table.table()))
                .header("Prefer", "return=representation")
                .json(rows),
            RemoteCall::Update { table, id, patch } => self
                .request(Method::PATCH, &format!("/rest/v1/{}?id=eq.{}", table.table(), id))
                .header("Prefer", "return=representation")
                .json(patch),
            RemoteCall::Delete { table, id } => {
                self.request(Method::DELETE, &format!("/rest/v1/{}?id=eq.{}", table.table(), id))
            }
            RemoteCall::SignOut => self.request(Method::POST, "/auth/v1/logout"),
        };
        if let Some(key) = idempotency_key {
            builder = builder.header(IDEMPOTENCY_HEADER, key);
        }
        tracing::debug!("Remote call {}", label);
        self.send(builder, &label).await
    }

    async fn fetch(&self, collection: Collection) -> Result<Vec<Value>> {
        let label = format!("fetch:{}", collection.table());
        let builder = self.request(
            Method::GET,
            &format!("/rest/v1/{}?select=*", collection.table()),
        );
        match self.send(builder, &label).await? {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            other => Err(FinError::Conflict(format!(
                "unexpected {} payload: {}",
                collection.table(),
                other
            ))),
        }
    }
}

fn classify_transport(e: &reqwest::Error) -> FinError {
    if e.is_timeout() {
        FinError::Network(format!("timeout: {}", e))
    } else if e.is_connect() || e.is_request() || e.is_body() {
        FinError::Network(e.to_string())
    } else if e.is_decode() {
        FinError::Storage(format!("undecodable response: {}", e))
    } else {
        FinError::Network(e.to_string())
    }
}

/// Map an HTTP failure to the error taxonomy.
pub fn classify_status(status: StatusCode, body: &str) -> FinError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .or(parsed.error)
        .unwrap_or_else(|| body.trim().to_string());
    let code = parsed.code;

    match status {
        // Gateway/edge-function unavailability is a connectivity problem
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            FinError::Network(format!("{}: {}", status, message))
        }
        StatusCode::NOT_FOUND => FinError::NotFound(message),
        StatusCode::CONFLICT => FinError::Conflict(message),
        _ => match code.as_deref() {
            Some("PGRST116") | Some("P0002") => FinError::NotFound(message),
            Some("23505") => FinError::Conflict(message),
            Some("22023") | Some("23514") | Some("23502") => FinError::validation("payload", message),
            _ => FinError::Domain(DomainError::parse(code.as_deref(), &message)),
        },
    }
}

/// Accept both bare payloads and `{data, error}` envelopes.
pub fn unwrap_envelope(value: Value) -> Result<Value> {
    let is_envelope = value
        .as_object()
        .map(|map| map.len() <= 2 && map.contains_key("data") && map.keys().all(|k| k == "data" || k == "error"))
        .unwrap_or(false);
    if !is_envelope {
        return Ok(value);
    }

    match (value.get("data").cloned(), value.get("error")) {
        (_, Some(error)) if !error.is_null() => {
            let code = error.get("code").and_then(Value::as_str);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            Err(FinError::Domain(DomainError::parse(code, &message)))
        }
        (Some(data), _) => Ok(data),
        (None, _) => Ok(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_gateway_errors_are_network() {
        let err = classify_status(StatusCode::SERVICE_UNAVAILABLE, "edge function unavailable");
        assert!(err.is_retryable_offline());
    }

    #[test]
    fn test_domain_error_mentioning_network_stays_domain() {
        let body = r#"{"code":"P0001","message":"network account mismatch"}"#;
        let err = classify_status(StatusCode::BAD_REQUEST, body);
        assert!(matches!(err, FinError::Domain(_)));
        assert!(!err.is_retryable_offline());
    }

    #[test]
    fn test_credit_limit_is_parsed() {
        let body = r#"{"code":"P0001","message":"CREDIT_LIMIT_EXCEEDED|limit=100000|used=90000|requested=20000"}"#;
        match classify_status(StatusCode::BAD_REQUEST, body) {
            FinError::Domain(DomainError::CreditLimitExceeded { requested, .. }) => {
                assert_eq!(requested, 20000)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_not_found_and_conflict() {
        assert!(matches!(
            classify_status(StatusCode::NOT_ACCEPTABLE, r#"{"code":"PGRST116","message":"no rows"}"#),
            FinError::NotFound(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::CONFLICT, "duplicate"),
            FinError::Conflict(_)
        ));
    }

    #[test]
    fn test_envelope_unwrapping() {
        assert_eq!(unwrap_envelope(json!({"data": {"id": "x"}, "error": null})).unwrap(), json!({"id": "x"}));
        assert_eq!(unwrap_envelope(json!({"id": "x"})).unwrap(), json!({"id": "x"}));
        assert!(unwrap_envelope(json!({"data": null, "error": {"message": "nope"}})).is_err());
    }
}
