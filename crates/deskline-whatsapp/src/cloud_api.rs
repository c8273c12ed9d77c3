// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Driver for the WhatsApp Business Cloud API (Meta Graph).

use async_trait::async_trait;
use deskline_config::model::ProviderConfig;
use deskline_core::{ConnectionStatus, DesklineError, ErrorKind, MediaKind, ProviderDriver, SendResult};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::classify::{classify_cloud_code, classify_status};
use crate::http::{RawResponse, build_client, execute, header_value, id_string};
use crate::phone::{is_opaque_id, normalize_phone, strip_domain};

const NAME: &str = "cloud_api";

#[derive(Debug, Clone)]
pub struct CloudApiDriver {
    client: reqwest::Client,
    /// `{base_url}/{api_version}/{phone_number_id}`
    endpoint: String,
    country_code: String,
}

impl CloudApiDriver {
    pub fn new(config: &ProviderConfig) -> Result<Self, DesklineError> {
        let cloud = &config.cloud_api;
        let token = cloud
            .access_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| DesklineError::Config("provider.cloud_api.access_token is not set".into()))?;
        let phone_number_id = cloud
            .phone_number_id
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                DesklineError::Config("provider.cloud_api.phone_number_id is not set".into())
            })?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(AUTHORIZATION, header_value("Authorization", &format!("Bearer {token}"))?);

        Ok(Self {
            client: build_client(headers, config.timeout())?,
            endpoint: format!(
                "{}/{}/{}",
                cloud.base_url.trim_end_matches('/'),
                cloud.api_version,
                phone_number_id
            ),
            country_code: config.default_country_code.clone(),
        })
    }

    /// Opaque linked ids cannot be addressed through the Cloud API.
    fn recipient(&self, address: &str) -> Result<String, SendResult> {
        if is_opaque_id(address) {
            return Err(SendResult::failed(
                ErrorKind::InvalidRecipient,
                format!("{address} is a linked id without a phone number; the Cloud API cannot reach it"),
            ));
        }
        Ok(normalize_phone(strip_domain(address), &self.country_code))
    }

    async fn post(&self, payload: Value) -> SendResult {
        let request = self
            .client
            .post(format!("{}/messages", self.endpoint))
            .json(&payload);
        match execute(NAME, request).await {
            Ok(response) => interpret(&response),
            Err(failed) => failed,
        }
    }
}

fn interpret(response: &RawResponse) -> SendResult {
    let body = response.json();
    if response.status.is_success() {
        return match id_string(&body["messages"][0]["id"]) {
            Some(id) => {
                info!(provider = NAME, provider_message_id = %id, "message accepted");
                SendResult::delivered(Some(id))
            }
            None => SendResult::failed(
                ErrorKind::TransientProviderError,
                "response carried no message id",
            ),
        };
    }

    let error = &body["error"];
    let message = error["message"].as_str().unwrap_or(&response.text);
    let kind = error["code"]
        .as_i64()
        .and_then(classify_cloud_code)
        .unwrap_or_else(|| classify_status(response.status, message));
    warn!(provider = NAME, status = %response.status, error_kind = %kind, code = ?error["code"].as_i64(), "send rejected");
    let detail = match error["code"].as_i64() {
        Some(code) => format!("({code}) {message}"),
        None => format!("HTTP {}: {message}", response.status),
    };
    SendResult::failed(kind, detail)
}

fn cloud_type(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Image => "image",
        MediaKind::Video => "video",
        MediaKind::Audio => "audio",
        MediaKind::Document => "document",
    }
}

#[async_trait]
impl ProviderDriver for CloudApiDriver {
    fn name(&self) -> &str {
        NAME
    }

    async fn send_text(&self, address: &str, body: &str) -> SendResult {
        let to = match self.recipient(address) {
            Ok(to) => to,
            Err(rejected) => return rejected,
        };
        self.post(json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": { "preview_url": false, "body": body },
        }))
        .await
    }

    async fn send_media(
        &self,
        address: &str,
        media_url: &str,
        media_type: MediaKind,
        caption: Option<&str>,
    ) -> SendResult {
        let to = match self.recipient(address) {
            Ok(to) => to,
            Err(rejected) => return rejected,
        };
        let kind = cloud_type(media_type);
        let mut media = json!({ "link": media_url });
        if let Some(caption) = caption.filter(|c| !c.is_empty() && media_type.supports_caption()) {
            media["caption"] = json!(caption);
        }
        self.post(json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": kind,
            kind: media,
        }))
        .await
    }

    async fn connection_status(&self) -> ConnectionStatus {
        match execute(NAME, self.client.get(&self.endpoint)).await {
            Ok(response) if response.status.is_success() => {
                let body = response.json();
                let phone = body["display_phone_number"].as_str().unwrap_or("unknown number");
                let name = body["verified_name"].as_str().unwrap_or("unverified");
                ConnectionStatus {
                    connected: true,
                    detail: format!("{phone} ({name})"),
                }
            }
            Ok(response) => ConnectionStatus {
                connected: false,
                detail: response.json()["error"]["message"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("HTTP {}", response.status)),
            },
            Err(failed) => ConnectionStatus {
                connected: false,
                detail: failed.error_detail.unwrap_or_default(),
            },
        }
    }
}
