//! Reference HTTP dispatcher for the Errand backend.
//!
//! Every action kind is posted to `{base}/v1/actions/{kind}` with the action
//! id as `Idempotency-Key`, so a resubmission after a crash is harmless.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{ActionId, ActionKind, QueuedAction};
use crate::util::{compact_text, is_http_url, normalize_text_option};

use super::dispatch::Dispatcher;
use super::error::DispatchError;

const DISPATCH_HTTP_TIMEOUT_SECS: u64 = 15;
const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Clone)]
pub struct HttpDispatcher {
    base_url: String,
    api_token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpDispatcher {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpDispatcher")
            .field("base_url", &self.base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct ActionEnvelope<'a> {
    id: ActionId,
    kind: ActionKind,
    payload: &'a Value,
    attempt: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

impl HttpDispatcher {
    pub fn new(base_url: impl Into<String>, api_token: Option<String>) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DISPATCH_HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;
        Ok(Self {
            base_url,
            api_token: normalize_text_option(api_token),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn action_url(&self, kind: ActionKind) -> String {
        format!("{}/v1/actions/{}", self.base_url, kind.as_str())
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(&self, action: &QueuedAction) -> std::result::Result<Value, DispatchError> {
        let mut request = self
            .client
            .post(self.action_url(action.kind))
            .header(reqwest::header::ACCEPT, "application/json")
            .header(IDEMPOTENCY_HEADER, action.id.as_str())
            .json(&ActionEnvelope {
                id: action.id,
                kind: action.kind,
                payload: &action.payload,
                attempt: action.attempts,
            });
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if status.is_success() {
            return Ok(parse_success_body(&body));
        }

        let error = DispatchError::status(status.as_u16(), parse_api_error(status, &body));
        if error.is_conflict() {
            if let Some(server_state) = extract_server_state(&body) {
                return Err(error.with_server_state(server_state));
            }
        }
        Err(error)
    }
}

/// `GET {base}/health`; any success status counts as reachable.
pub async fn probe_reachability(base_url: &str, timeout: Duration) -> bool {
    let Ok(base_url) = normalize_base_url(base_url.to_string()) else {
        return false;
    };
    let Ok(client) = reqwest::Client::builder().timeout(timeout).build() else {
        return false;
    };

    match client.get(format!("{base_url}/health")).send().await {
        Ok(response) => response.status().is_success(),
        Err(error) => {
            tracing::debug!("Reachability probe failed: {}", error);
            false
        }
    }
}

fn normalize_base_url(raw: String) -> Result<String> {
    let base_url = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::Config("API base URL must not be empty".to_string()))?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(Error::Config(
            "API base URL must include http:// or https://".to_string(),
        ))
    }
}

fn transport_error(error: reqwest::Error) -> DispatchError {
    let message = compact_text(&error.to_string());
    if error.is_timeout() {
        DispatchError::transport("ETIMEDOUT", message)
    } else if error.is_connect() {
        DispatchError::transport("ECONNREFUSED", message)
    } else if error.is_body() || error.is_request() {
        DispatchError::transport("ECONNRESET", message)
    } else {
        DispatchError::new(format!("network request failed: {message}"))
    }
}

fn parse_success_body(body: &str) -> Value {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return compact_text(&message);
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        trimmed
    }
}

/// A conflict body is either `{"server_state": ...}` or the state itself
fn extract_server_state(body: &str) -> Option<Value> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value {
        Value::Object(mut fields) if fields.contains_key("server_state") => {
            fields.remove("server_state")
        }
        Value::Object(_) => Some(value),
        _ => None,
    }
}
