// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted provider driver.
//!
//! Results are popped from a FIFO queue; when it is empty every send succeeds
//! with a generated provider id. Every call is recorded for assertions.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use deskline_core::{ConnectionStatus, ErrorKind, MediaKind, ProviderDriver, SendResult};
use tokio::sync::Mutex;

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCall {
    pub address: String,
    pub body: String,
    pub media_url: Option<String>,
    pub media_type: Option<MediaKind>,
}

#[derive(Debug, Default)]
pub struct MockDriver {
    script: Mutex<VecDeque<SendResult>>,
    calls: Mutex<Vec<SentCall>>,
    latency: Mutex<Option<Duration>>,
    next_id: AtomicU64,
    disconnected: AtomicBool,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue results to return, in order, before falling back to success.
    pub async fn push_results(&self, results: impl IntoIterator<Item = SendResult>) {
        self.script.lock().await.extend(results);
    }

    /// Queue `n` failures of the same kind.
    pub async fn fail_next(&self, n: usize, kind: ErrorKind) {
        let failures = (0..n).map(|i| SendResult::failed(kind, format!("scripted failure {}", i + 1)));
        self.push_results(failures).await;
    }

    /// Delay every send, to exercise timeouts.
    pub async fn set_latency(&self, latency: Duration) {
        *self.latency.lock().await = Some(latency);
    }

    pub fn set_connected(&self, connected: bool) {
        self.disconnected.store(!connected, Ordering::SeqCst);
    }

    pub async fn calls(&self) -> Vec<SentCall> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    async fn respond(&self, call: SentCall) -> SendResult {
        self.calls.lock().await.push(call);
        let latency = *self.latency.lock().await;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match self.script.lock().await.pop_front() {
            Some(result) => result,
            None => {
                let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                SendResult::delivered(Some(format!("mock-{n}")))
            }
        }
    }
}

#[async_trait]
impl ProviderDriver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send_text(&self, address: &str, body: &str) -> SendResult {
        self.respond(SentCall {
            address: address.to_string(),
            body: body.to_string(),
            media_url: None,
            media_type: None,
        })
        .await
    }

    async fn send_media(
        &self,
        address: &str,
        media_url: &str,
        media_type: MediaKind,
        caption: Option<&str>,
    ) -> SendResult {
        self.respond(SentCall {
            address: address.to_string(),
            body: caption.unwrap_or_default().to_string(),
            media_url: Some(media_url.to_string()),
            media_type: Some(media_type),
        })
        .await
    }

    async fn connection_status(&self) -> ConnectionStatus {
        let connected = !self.disconnected.load(Ordering::SeqCst);
        ConnectionStatus {
            connected,
            detail: if connected { "mock session".into() } else { "mock offline".into() },
        }
    }
}
