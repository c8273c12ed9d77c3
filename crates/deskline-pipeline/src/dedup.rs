// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Duplicate suppression for outbound enqueues and inbound receipts.
//!
//! Both checks read before the write. The unique index on
//! `messages.provider_message_id` backs up the inbound check under races.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use deskline_core::{AgentId, DesklineError, MessageId, TicketId};
use deskline_storage::Database;
use deskline_storage::queries::messages;
use sha2::{Digest, Sha256};

/// Hash of `(ticket, body, author, minute bucket)` used for outbound dedup.
pub fn content_hash(ticket_id: TicketId, body: &str, author: Option<AgentId>, at: DateTime<Utc>) -> String {
    let author = author.map_or_else(|| "system".to_string(), |a| a.to_string());
    let bucket = at.format("%Y%m%d%H%M");
    let digest = Sha256::digest(format!("{ticket_id}:{body}:{author}:{bucket}").as_bytes());
    hex::encode(digest)
}

#[derive(Clone)]
pub struct DedupGuard {
    db: Database,
    outbound_window: TimeDelta,
    inbound_window: TimeDelta,
}

impl DedupGuard {
    pub fn new(db: Database, outbound_window: Duration, inbound_window: Duration) -> Self {
        Self {
            db,
            outbound_window: TimeDelta::from_std(outbound_window).unwrap_or(TimeDelta::MAX),
            inbound_window: TimeDelta::from_std(inbound_window).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Existing outgoing message with the same hash inside the window.
    pub async fn outbound_duplicate(
        &self,
        ticket_id: TicketId,
        hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<MessageId>, DesklineError> {
        let since = now.checked_sub_signed(self.outbound_window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        messages::find_recent_by_hash(&self.db, ticket_id, hash.to_string(), since).await
    }

    /// Whether an inbound receipt was already stored.
    ///
    /// Keyed by provider id when there is one; otherwise the same customer
    /// body on the same ticket inside the short content window.
    pub async fn inbound_duplicate(
        &self,
        provider_message_id: Option<&str>,
        ticket_id: Option<TicketId>,
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DesklineError> {
        if let Some(id) = provider_message_id {
            return messages::provider_id_exists(&self.db, id.to_string()).await;
        }
        let Some(ticket_id) = ticket_id else {
            return Ok(false);
        };
        let since = now.checked_sub_signed(self.inbound_window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        messages::recent_customer_body_exists(&self.db, ticket_id, body.to_string(), since).await
    }
}
