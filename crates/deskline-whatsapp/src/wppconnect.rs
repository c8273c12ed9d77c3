// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Driver for a self-hosted WPPConnect server.
//!
//! Endpoints: `POST /api/send-message`, `POST /api/send-media`, `GET /api/status`.
//! Full channel ids (anything containing `@`) are forwarded verbatim, which is
//! how opaque `@lid` contacts stay reachable through this provider.

use async_trait::async_trait;
use deskline_config::model::ProviderConfig;
use deskline_core::{ConnectionStatus, DesklineError, MediaKind, ProviderDriver, SendResult};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::classify::{classify_soft_failure, classify_status};
use crate::http::{RawResponse, build_client, execute, header_value, id_string};
use crate::phone::normalize_phone;

const NAME: &str = "wppconnect";

#[derive(Debug, Clone)]
pub struct WppconnectDriver {
    client: reqwest::Client,
    base_url: String,
    country_code: String,
}

impl WppconnectDriver {
    pub fn new(config: &ProviderConfig) -> Result<Self, DesklineError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = config.wppconnect.api_key.as_deref().filter(|k| !k.is_empty()) {
            headers.insert("x-api-key", header_value("X-API-Key", key)?);
        }
        Ok(Self {
            client: build_client(headers, config.timeout())?,
            base_url: config.wppconnect.base_url.trim_end_matches('/').to_string(),
            country_code: config.default_country_code.clone(),
        })
    }

    fn recipient(&self, address: &str) -> String {
        if address.contains('@') {
            address.to_string()
        } else {
            normalize_phone(address, &self.country_code)
        }
    }

    async fn post(&self, path: &str, payload: Value) -> SendResult {
        let request = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(&payload);
        match execute(NAME, request).await {
            Ok(response) => interpret(&response),
            Err(failed) => failed,
        }
    }
}

fn interpret(response: &RawResponse) -> SendResult {
    if !response.status.is_success() {
        let kind = classify_status(response.status, &response.text);
        warn!(provider = NAME, status = %response.status, error_kind = %kind, "send rejected");
        return SendResult::failed(kind, format!("HTTP {}: {}", response.status, response.text));
    }
    let body = response.json();
    if body["success"].as_bool() == Some(true) {
        let id = id_string(&body["message_id"]);
        info!(provider = NAME, provider_message_id = ?id, "message accepted");
        return SendResult::delivered(id);
    }
    let detail = body["error"]
        .as_str()
        .or_else(|| body["message"].as_str())
        .unwrap_or("unknown error")
        .to_string();
    SendResult::failed(classify_soft_failure(&detail), detail)
}

#[async_trait]
impl ProviderDriver for WppconnectDriver {
    fn name(&self) -> &str {
        NAME
    }

    async fn send_text(&self, address: &str, body: &str) -> SendResult {
        let payload = json!({
            "phone": self.recipient(address),
            "message": body,
        });
        self.post("/api/send-message", payload).await
    }

    async fn send_media(
        &self,
        address: &str,
        media_url: &str,
        media_type: MediaKind,
        caption: Option<&str>,
    ) -> SendResult {
        let mut payload = json!({
            "phone": self.recipient(address),
            "media_url": media_url,
            "media_type": media_type.to_string(),
        });
        if let Some(caption) = caption.filter(|c| !c.is_empty()) {
            payload["caption"] = json!(caption);
        }
        self.post("/api/send-media", payload).await
    }

    async fn connection_status(&self) -> ConnectionStatus {
        let request = self.client.get(format!("{}/api/status", self.base_url));
        match execute(NAME, request).await {
            Ok(response) if response.status.is_success() => {
                let body = response.json();
                let connected = body["connected"].as_bool().unwrap_or(false);
                let detail = body["phone"]
                    .as_str()
                    .map(|p| format!("session phone {p}"))
                    .unwrap_or_else(|| "no active session".to_string());
                ConnectionStatus { connected, detail }
            }
            Ok(response) => ConnectionStatus {
                connected: false,
                detail: format!("HTTP {}", response.status),
            },
            Err(failed) => ConnectionStatus {
                connected: false,
                detail: failed.error_detail.unwrap_or_default(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskline_core::ErrorKind;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn driver(server: &MockServer) -> WppconnectDriver {
        let mut config = ProviderConfig::default();
        config.wppconnect.base_url = format!("{}/", server.uri());
        config.wppconnect.api_key = Some("secret".into());
        WppconnectDriver::new(&config).unwrap()
    }

    #[tokio::test]
    async fn text_send_normalises_plain_numbers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/send-message"))
            .and(header("x-api-key", "secret"))
            .and(body_partial_json(json!({"phone": "201001234567", "message": "hi"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "message_id": "true_2010@c.us_ABC"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let result = driver(&server).send_text("01001234567", "hi").await;
        assert!(result.success);
        assert_eq!(result.provider_message_id.as_deref(), Some("true_2010@c.us_ABC"));
    }

    #[tokio::test]
    async fn channel_ids_pass_through() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/send-message"))
            .and(body_partial_json(json!({"phone": "123456789012345@lid"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let result = driver(&server).send_text("123456789012345@lid", "hello").await;
        assert!(result.success);
        assert_eq!(result.provider_message_id, None);
    }

    #[tokio::test]
    async fn soft_failure_in_body_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/send-media"))
            .and(body_partial_json(json!({"media_type": "image", "caption": "receipt"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": false, "error": "No LID for user"})),
            )
            .mount(&server)
            .await;

        let result = driver(&server)
            .send_media("201001234567", "https://cdn/x.png", MediaKind::Image, Some("receipt"))
            .await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::InvalidRecipient));
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("restarting"))
            .mount(&server)
            .await;

        let result = driver(&server).send_text("201001234567", "hi").await;
        assert_eq!(result.error_kind, Some(ErrorKind::TransientProviderError));
        assert!(result.error_detail.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn unreachable_server_is_transient() {
        let mut config = ProviderConfig::default();
        config.wppconnect.base_url = "http://127.0.0.1:9".into();
        let result = WppconnectDriver::new(&config)
            .unwrap()
            .send_text("201001234567", "hi")
            .await;
        assert_eq!(result.error_kind, Some(ErrorKind::TransientProviderError));
    }

    #[tokio::test]
    async fn status_reports_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/status"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"connected": true, "phone": "201000000001"})),
            )
            .mount(&server)
            .await;

        let status = driver(&server).connection_status().await;
        assert!(status.connected);
        assert!(status.detail.contains("201000000001"));
    }
}
