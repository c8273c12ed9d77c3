// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delivery state machine and send-failure taxonomy.
//!
//! Outgoing messages move `pending -> sending -> sent -> delivered`, or end in
//! `failed`. The only backward moves are `sending -> pending` (a deferred or
//! retryable attempt) and `failed -> pending` (an operator retry reset).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Sending,
    Sent,
    Delivered,
    Failed,
}

impl DeliveryState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: DeliveryState) -> bool {
        use DeliveryState::*;
        matches!(
            (self, next),
            (Pending, Sending)
                | (Sending, Sent)
                | (Sending, Pending)
                | (Sending, Failed)
                | (Sent, Delivered)
                | (Failed, Pending)
        )
    }

    /// Sent, delivered, and failed rows are never touched by the worker.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Delivered | Self::Failed)
    }
}

/// Why a send attempt did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or unroutable address. Never retried.
    InvalidRecipient,
    /// Dedup hit on enqueue. Not stored on a message.
    DuplicateMessage,
    /// Provider or local limiter refused the call. Deferred without counting.
    RateLimited,
    /// Timeouts, 5xx, connection errors.
    TransientProviderError,
    /// Bad credentials, opted-out recipient, rejected payload.
    PermanentProviderError,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::TransientProviderError)
    }

    /// Operator-facing explanation stored alongside the provider detail.
    pub fn user_note(self) -> &'static str {
        match self {
            Self::InvalidRecipient => {
                "automated delivery is impossible for this contact; reply to the customer manually"
            }
            Self::DuplicateMessage => "identical message was already queued",
            Self::RateLimited => "provider rate limit reached; message deferred",
            Self::TransientProviderError => "temporary provider failure; will retry",
            Self::PermanentProviderError => "provider rejected the message",
        }
    }
}

/// Where a message lands after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub state: DeliveryState,
    pub retry_count: u32,
    /// Whether the attempt should stamp `last_retry_at`.
    pub counts_as_attempt: bool,
}

/// Pure transition for a failed attempt of a message currently at `retry_count`.
pub fn outcome_after_failure(kind: ErrorKind, retry_count: u32, max_retries: u32) -> FailureOutcome {
    match kind {
        ErrorKind::RateLimited => FailureOutcome {
            state: DeliveryState::Pending,
            retry_count: retry_count.min(max_retries),
            counts_as_attempt: false,
        },
        ErrorKind::InvalidRecipient
        | ErrorKind::PermanentProviderError
        | ErrorKind::DuplicateMessage => FailureOutcome {
            state: DeliveryState::Failed,
            retry_count: max_retries,
            counts_as_attempt: true,
        },
        ErrorKind::TransientProviderError => {
            let next = retry_count.saturating_add(1).min(max_retries);
            let state = if next >= max_retries {
                DeliveryState::Failed
            } else {
                DeliveryState::Pending
            };
            FailureOutcome {
                state,
                retry_count: next,
                counts_as_attempt: true,
            }
        }
    }
}

/// Wait required after the `retry_count`-th failure before the next attempt.
///
/// Indexed by `retry_count - 1` and clamped to the last entry. A message that
/// has never failed is due immediately.
pub fn backoff_delay(table_secs: &[u64], retry_count: u32) -> Duration {
    if retry_count == 0 || table_secs.is_empty() {
        return Duration::ZERO;
    }
    let index = (retry_count as usize - 1).min(table_secs.len() - 1);
    Duration::from_secs(table_secs[index])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn backoff_uses_table_then_clamps() {
        let table = [5, 30, 120];
        assert_eq!(backoff_delay(&table, 0), Duration::ZERO);
        assert_eq!(backoff_delay(&table, 1), Duration::from_secs(5));
        assert_eq!(backoff_delay(&table, 2), Duration::from_secs(30));
        assert_eq!(backoff_delay(&table, 3), Duration::from_secs(120));
        assert_eq!(backoff_delay(&table, 9), Duration::from_secs(120));
        assert_eq!(backoff_delay(&[], 2), Duration::ZERO);
    }

    #[test]
    fn three_transient_failures_exhaust_retries() {
        let mut rc = 0;
        let mut state = DeliveryState::Pending;
        for _ in 0..3 {
            let out = outcome_after_failure(ErrorKind::TransientProviderError, rc, 3);
            rc = out.retry_count;
            state = out.state;
        }
        assert_eq!(state, DeliveryState::Failed);
        assert_eq!(rc, 3);
    }

    #[test]
    fn invalid_recipient_forces_max_on_first_attempt() {
        let out = outcome_after_failure(ErrorKind::InvalidRecipient, 0, 3);
        assert_eq!(out.state, DeliveryState::Failed);
        assert_eq!(out.retry_count, 3);
    }

    #[test]
    fn rate_limited_does_not_count() {
        let out = outcome_after_failure(ErrorKind::RateLimited, 1, 3);
        assert_eq!(out.state, DeliveryState::Pending);
        assert_eq!(out.retry_count, 1);
        assert!(!out.counts_as_attempt);
    }

    #[test]
    fn only_manual_reset_leaves_failed() {
        assert!(DeliveryState::Failed.can_transition_to(DeliveryState::Pending));
        assert!(!DeliveryState::Failed.can_transition_to(DeliveryState::Sending));
        assert!(!DeliveryState::Sent.can_transition_to(DeliveryState::Pending));
        assert!(!DeliveryState::Delivered.can_transition_to(DeliveryState::Sent));
    }

    fn any_kind() -> impl Strategy<Value = ErrorKind> {
        prop_oneof![
            Just(ErrorKind::InvalidRecipient),
            Just(ErrorKind::DuplicateMessage),
            Just(ErrorKind::RateLimited),
            Just(ErrorKind::TransientProviderError),
            Just(ErrorKind::PermanentProviderError),
        ]
    }

    proptest! {
        #[test]
        fn retry_count_never_exceeds_max_and_max_means_failed(
            kinds in proptest::collection::vec(any_kind(), 1..20),
            max in 1u32..6,
        ) {
            let mut rc = 0u32;
            let mut state = DeliveryState::Pending;
            for kind in kinds {
                if state == DeliveryState::Failed {
                    break;
                }
                let out = outcome_after_failure(kind, rc, max);
                prop_assert!(out.retry_count <= max);
                if out.retry_count == max {
                    prop_assert_eq!(out.state, DeliveryState::Failed);
                }
                prop_assert!(DeliveryState::Sending.can_transition_to(out.state));
                rc = out.retry_count;
                state = out.state;
            }
        }
    }
}
