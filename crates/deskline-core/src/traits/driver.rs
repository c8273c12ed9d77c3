// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provider driver trait implemented once per upstream messaging API.

use async_trait::async_trait;

use crate::types::{ConnectionStatus, MediaKind, SendResult};

/// A single upstream messaging provider.
///
/// Implementations own address normalisation for their provider and never
/// surface provider-specific error shapes: every failure is reported as a
/// [`SendResult`] carrying an [`crate::ErrorKind`].
#[async_trait]
pub trait ProviderDriver: Send + Sync + 'static {
    /// Short provider name used in logs (`wppconnect`, `cloud_api`, ...).
    fn name(&self) -> &str;

    /// Send a plain text message.
    async fn send_text(&self, address: &str, body: &str) -> SendResult;

    /// Send a media message. Providers that cannot caption `media_type` drop the caption.
    async fn send_media(
        &self,
        address: &str,
        media_url: &str,
        media_type: MediaKind,
        caption: Option<&str>,
    ) -> SendResult;

    /// Report whether the provider session is usable.
    async fn connection_status(&self) -> ConnectionStatus;
}
