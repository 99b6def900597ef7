use crate::{AnalysisError, ConfigError};
use reqwest::{Client, Response};
use serde_json::Value;
use std::time::Duration;

const MAX_UPSTREAM_MESSAGE_CHARS: usize = 500;

/// Shared HTTP client for upstream calls. The timeout bounds every request,
/// including credential lookups against the metadata server.
pub fn build_http_client(timeout: Duration) -> Result<Client, ConfigError> {
    Ok(Client::builder()
        .timeout(timeout)
        .user_agent(concat!("report-summary/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Converts a non-success response into an [`AnalysisError::Upstream`],
/// keeping the service's own message when the body carries one.
pub(crate) async fn upstream_error(service: &'static str, response: Response) -> AnalysisError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();

    AnalysisError::Upstream {
        service,
        status,
        message: upstream_message(&body),
    }
}

/// Google APIs wrap failures as `{"error": {"message": ...}}`; anything else
/// is passed through as trimmed text.
pub(crate) fn upstream_message(body: &str) -> Option<String> {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        let message = value
            .pointer("/error/message")
            .and_then(Value::as_str)
            .or_else(|| value.get("message").and_then(Value::as_str));
        if let Some(message) = message {
            return Some(message.to_string());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.chars().take(MAX_UPSTREAM_MESSAGE_CHARS).collect())
    }
}
