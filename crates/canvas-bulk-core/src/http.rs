//! HTTP transport for the remote REST and GraphQL APIs.
//!
//! Maps every response into either an [`ApiResponse`] or a classified
//! [`TaskError`], so walkers and task operations never see raw reqwest
//! errors.

use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use reqwest::Method;
use reqwest::header::{ACCEPT, AUTHORIZATION, LINK};
use serde_json::Value;

use crate::error::TaskError;

/// Longest raw body excerpt kept in an error message
const MAX_ERROR_BODY: usize = 200;

/// Shared tokio runtime for sync entry points (CLI).
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Decoded response: status, raw `Link` header and JSON body
/// (`Null` for an empty body).
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub link: Option<String>,
    pub body: Value,
}

/// Minimal request surface the pagination walkers need.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str) -> impl Future<Output = Result<ApiResponse, TaskError>> + Send;

    fn post_json(
        &self,
        url: &str,
        body: &Value,
    ) -> impl Future<Output = Result<ApiResponse, TaskError>> + Send;
}

/// Connection settings for [`ApiClient`]
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub token: Option<String>,
    /// Whole-request timeout; a stalled request otherwise stalls its window
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

/// reqwest-backed client with base URL resolution and bearer auth.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(settings: &ClientSettings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.timeout)
            .pool_max_idle_per_host(8)
            .build()?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            token: settings.token.clone(),
        })
    }

    /// Resolve a path against the base URL; absolute URLs (e.g. from a
    /// `Link` header) pass through unchanged.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    /// Issue one request. Non-2xx responses become [`TaskError::Http`].
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse, TaskError> {
        let url = self.url(path);
        log::trace!("{method} {url}");
        let mut request = self
            .client
            .request(method, &url)
            .header(ACCEPT, "application/json");
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(TaskError::from_reqwest)?;
        read_response(response).await
    }

    /// Issue one request and treat an `errors` list in a 2xx body as a failure.
    pub async fn request_json(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, TaskError> {
        let response = self.send(method, path, body).await?;
        check_application_errors(response.status, &response.body)?;
        Ok(response.body)
    }
}

impl Transport for ApiClient {
    async fn get(&self, url: &str) -> Result<ApiResponse, TaskError> {
        self.send(Method::GET, url, None).await
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<ApiResponse, TaskError> {
        self.send(Method::POST, url, Some(body)).await
    }
}

async fn read_response(response: reqwest::Response) -> Result<ApiResponse, TaskError> {
    let status = response.status();
    let link = response
        .headers()
        .get(LINK)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    // Headers already arrived, so a failed body read still carries the status
    let text = response
        .text()
        .await
        .map_err(|e| TaskError::http(status.as_u16(), e.without_url().to_string()))?;

    if !status.is_success() {
        return Err(TaskError::http(
            status.as_u16(),
            error_message(&text, status.canonical_reason()),
        ));
    }

    let body = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).map_err(|e| {
            TaskError::application(status.as_u16(), format!("invalid JSON body: {e}"))
        })?
    };
    Ok(ApiResponse {
        status: status.as_u16(),
        link,
        body,
    })
}

/// Fail with [`TaskError::Application`] when a successful response still
/// carries a non-empty `errors` list (GraphQL, some REST endpoints).
pub fn check_application_errors(status: u16, body: &Value) -> Result<(), TaskError> {
    match body.get("errors") {
        Some(Value::Array(errors)) if !errors.is_empty() => {
            let messages: Vec<String> = errors.iter().map(describe_error).collect();
            Err(TaskError::application(status, messages.join("; ")))
        }
        _ => Ok(()),
    }
}

fn describe_error(error: &Value) -> String {
    error
        .get("message")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| error.to_string())
}

/// Best-effort message from an error body.
///
/// Canvas returns `{"errors": [{"message": ..}]}`, `{"errors": {"field": [..]}}`
/// or `{"message": ..}`; anything else is reported as a truncated raw body.
fn error_message(text: &str, reason: Option<&str>) -> String {
    if let Ok(body) = serde_json::from_str::<Value>(text) {
        match body.get("errors") {
            Some(Value::Array(errors)) if !errors.is_empty() => {
                return errors.iter().map(describe_error).collect::<Vec<_>>().join("; ");
            }
            Some(Value::Object(fields)) if !fields.is_empty() => {
                return fields
                    .iter()
                    .map(|(field, detail)| format!("{field}: {detail}"))
                    .collect::<Vec<_>>()
                    .join("; ");
            }
            _ => {}
        }
        if let Some(message) = body.get("message").and_then(Value::as_str) {
            return message.to_string();
        }
    }
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return reason.unwrap_or("request failed").to_string();
    }
    trimmed.chars().take(MAX_ERROR_BODY).collect()
}
