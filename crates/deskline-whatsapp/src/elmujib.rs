// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Driver for the Elmujib hosted WhatsApp gateway.
//!
//! The token travels either as a bearer header or as a `token` query
//! parameter, depending on `[provider.elmujib].auth_method`. Elmujib reports
//! success in several shapes, so acceptance is detected leniently.

use async_trait::async_trait;
use deskline_config::model::{ElmujibAuth, ProviderConfig};
use deskline_core::{ConnectionStatus, DesklineError, ErrorKind, MediaKind, ProviderDriver, SendResult};
use reqwest::Url;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::classify::{classify_soft_failure, classify_status};
use crate::http::{RawResponse, build_client, execute, header_value, id_string};
use crate::phone::{is_opaque_id, normalize_phone, strip_domain};

const NAME: &str = "elmujib";
const ACCEPTED_MESSAGES: &[&str] = &["message processed", "processed", "ok"];

#[derive(Debug, Clone)]
pub struct ElmujibDriver {
    client: reqwest::Client,
    /// `{base_url}/{vendor_uid}/contact`
    contact_url: String,
    query_token: Option<String>,
    from_phone_number_id: Option<String>,
    country_code: String,
    vendor_uid: String,
    has_token: bool,
}

impl ElmujibDriver {
    pub fn new(config: &ProviderConfig) -> Result<Self, DesklineError> {
        let elmujib = &config.elmujib;
        let vendor_uid = elmujib.vendor_uid.clone().unwrap_or_default();
        let token = elmujib.bearer_token.clone().unwrap_or_default();

        let has_token = !token.is_empty();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let query_token = match elmujib.auth_method {
            ElmujibAuth::Header => {
                if has_token {
                    headers.insert(AUTHORIZATION, header_value("Authorization", &format!("Bearer {token}"))?);
                }
                None
            }
            ElmujibAuth::Query => Some(token),
        };

        Ok(Self {
            client: build_client(headers, config.timeout())?,
            contact_url: format!("{}/{vendor_uid}/contact", elmujib.base_url.trim_end_matches('/')),
            query_token,
            from_phone_number_id: elmujib.from_phone_number_id.clone().filter(|s| !s.is_empty()),
            country_code: config.default_country_code.clone(),
            vendor_uid,
            has_token,
        })
    }

    fn url(&self, action: &str) -> Result<Url, SendResult> {
        let mut url = Url::parse(&format!("{}/{action}", self.contact_url)).map_err(|e| {
            SendResult::failed(ErrorKind::PermanentProviderError, format!("bad endpoint URL: {e}"))
        })?;
        if let Some(token) = &self.query_token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }

    fn recipient(&self, address: &str) -> Result<String, SendResult> {
        if is_opaque_id(address) {
            return Err(SendResult::failed(
                ErrorKind::InvalidRecipient,
                format!("{address} is a linked id without a phone number; Elmujib cannot reach it"),
            ));
        }
        Ok(normalize_phone(strip_domain(address), &self.country_code))
    }

    async fn post(&self, action: &str, mut payload: Value) -> SendResult {
        let url = match self.url(action) {
            Ok(url) => url,
            Err(failed) => return failed,
        };
        if let Some(from) = &self.from_phone_number_id {
            payload["from_phone_number_id"] = json!(from);
        }
        match execute(NAME, self.client.post(url).json(&payload)).await {
            Ok(response) => interpret(&response),
            Err(failed) => failed,
        }
    }
}

fn accepted(body: &Value) -> bool {
    body["success"].as_bool() == Some(true)
        || matches!(body["status"].as_str(), Some("success" | "processed"))
        || body["message"]
            .as_str()
            .is_some_and(|m| ACCEPTED_MESSAGES.contains(&m.to_ascii_lowercase().as_str()))
}

fn interpret(response: &RawResponse) -> SendResult {
    let body = response.json();
    let detail = || {
        body["error"]
            .as_str()
            .or_else(|| body["message"].as_str())
            .map(str::to_string)
            .unwrap_or_else(|| response.text.clone())
    };

    if !response.status.is_success() {
        let detail = detail();
        let kind = classify_status(response.status, &detail);
        warn!(provider = NAME, status = %response.status, error_kind = %kind, "send rejected");
        return SendResult::failed(kind, format!("HTTP {}: {detail}", response.status));
    }
    if accepted(&body) {
        let id = id_string(&body["message_id"]).or_else(|| id_string(&body["id"]));
        info!(provider = NAME, provider_message_id = ?id, "message accepted");
        return SendResult::delivered(id);
    }
    let detail = detail();
    SendResult::failed(classify_soft_failure(&detail), detail)
}

#[async_trait]
impl ProviderDriver for ElmujibDriver {
    fn name(&self) -> &str {
        NAME
    }

    async fn send_text(&self, address: &str, body: &str) -> SendResult {
        let phone = match self.recipient(address) {
            Ok(p) => p,
            Err(rejected) => return rejected,
        };
        self.post(
            "send-message",
            json!({ "phone_number": phone, "message_body": body }),
        )
        .await
    }

    async fn send_media(
        &self,
        address: &str,
        media_url: &str,
        media_type: MediaKind,
        caption: Option<&str>,
    ) -> SendResult {
        let phone = match self.recipient(address) {
            Ok(p) => p,
            Err(rejected) => return rejected,
        };
        let caption = caption.filter(|c| !c.is_empty());
        let mut payload = json!({
            "phone_number": phone,
            "media_type": media_type.to_string(),
            "media_url": media_url,
        });
        if let Some(c) = caption.filter(|_| media_type.supports_caption()) {
            payload["caption"] = json!(c);
        }
        if media_type == MediaKind::Document {
            payload["file_name"] = json!(caption.unwrap_or("document"));
        }
        self.post("send-media-message", payload).await
    }

    /// Elmujib exposes no session status endpoint; report whether credentials are usable.
    async fn connection_status(&self) -> ConnectionStatus {
        let connected = !self.vendor_uid.is_empty() && self.has_token;
        ConnectionStatus {
            connected,
            detail: if connected {
                format!("credentials configured for vendor {}", self.vendor_uid)
            } else {
                "missing vendor_uid or bearer_token".to_string()
            },
        }
    }
}
