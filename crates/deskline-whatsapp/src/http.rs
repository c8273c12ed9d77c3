// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

use deskline_core::{DesklineError, SendResult};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;

use crate::classify::classify_transport;

/// Status and body of a completed HTTP exchange.
pub(crate) struct RawResponse {
    pub status: StatusCode,
    pub text: String,
}

impl RawResponse {
    /// Body as JSON, or `Null` when it is not JSON.
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.text).unwrap_or(Value::Null)
    }
}

pub(crate) fn build_client(headers: HeaderMap, timeout: Duration) -> Result<reqwest::Client, DesklineError> {
    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|e| DesklineError::Provider {
            message: format!("failed to build HTTP client: {e}"),
            source: Some(Box::new(e)),
        })
}

pub(crate) fn header_value(name: &str, value: &str) -> Result<HeaderValue, DesklineError> {
    HeaderValue::from_str(value)
        .map_err(|e| DesklineError::Config(format!("invalid {name} header value: {e}")))
}

/// Execute `request`, turning transport errors into a failed [`SendResult`].
pub(crate) async fn execute(provider: &str, request: RequestBuilder) -> Result<RawResponse, SendResult> {
    let response = match request.send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(provider, error = %e, "provider request failed before a response");
            return Err(SendResult::failed(classify_transport(&e), e.to_string()));
        }
    };
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    tracing::debug!(provider, status = %status, "provider response received");
    Ok(RawResponse { status, text })
}

/// Render a JSON scalar as a string id.
pub(crate) fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
