// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Deskline delivery pipeline.

use thiserror::Error;

use crate::types::TicketId;

/// The primary error type returned by storage, queue, and service operations.
///
/// Provider send failures are not errors at this level: drivers report them
/// through [`crate::SendResult`] so a single failed message never aborts a
/// batch.
#[derive(Debug, Error)]
pub enum DesklineError {
    /// Configuration errors (invalid TOML, missing credentials, bad values).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (connection, query failure, row decoding).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Provider wiring errors (HTTP client construction, unknown driver).
    #[error("provider error: {message}")]
    Provider {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The ticket's customer cannot be reached through the configured channel.
    #[error("invalid recipient {address}: {reason}")]
    InvalidRecipient { address: String, reason: String },

    /// An identical message was enqueued for this ticket within the dedup window.
    #[error("duplicate message for ticket {ticket_id}")]
    Duplicate { ticket_id: TicketId },

    /// A referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The provider rate limit is exhausted.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: std::time::Duration },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DesklineError {
    /// Shorthand for a missing-record error.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    pub fn is_invalid_recipient(&self) -> bool {
        matches!(self, Self::InvalidRecipient { .. })
    }
}
