// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound message queue.
//!
//! `enqueue` only persists a `pending` row; nothing talks to the provider
//! until `process_pending` runs. Every attempt first claims its row with a
//! `pending -> sending` update stamped with the claim time, and only the
//! holder of that stamp may call the provider or settle the row. Any number
//! of concurrent callers (the worker loop, an HTTP trigger, the CLI) and
//! stale-claim recovery can share the queue without double-sending.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use deskline_bus::{DeskEvent, EventBus};
use deskline_config::DesklineConfig;
use deskline_core::{
    AgentId, Clock, DeliveryState, DesklineError, Direction, ErrorKind, MediaRef, Message, MessageId,
    ProcessSummary, ProviderDriver, QueueStats, SendResult, SenderKind, TicketId,
    classify_address, is_placeholder_phone, outcome_after_failure,
};
use deskline_storage::queries::{customers, messages, tickets};
use deskline_storage::{Database, NewMessage};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dedup::{DedupGuard, content_hash};
use crate::delay::DelayTracker;
use crate::rate_limit::RateLimiter;

/// Queue tunables lifted out of [`DesklineConfig`].
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub max_retries: u32,
    pub retry_delays_secs: Vec<u64>,
    pub send_timeout: Duration,
    pub max_wait: Duration,
    pub country_code: String,
    pub placeholder_prefix: String,
}

impl QueueSettings {
    pub fn from_config(config: &DesklineConfig) -> Self {
        Self {
            max_retries: config.queue.max_retries,
            retry_delays_secs: config.queue.retry_delays_secs.clone(),
            send_timeout: config.queue.send_timeout(),
            max_wait: config.rate_limit.max_wait(),
            country_code: config.provider.default_country_code.clone(),
            placeholder_prefix: config.inbound.placeholder_prefix.clone(),
        }
    }
}

/// An outbound message to queue. No author means a system message.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub ticket_id: TicketId,
    pub author_id: Option<AgentId>,
    pub body: String,
    pub media: Option<MediaRef>,
}

impl EnqueueRequest {
    pub fn text(ticket_id: TicketId, author_id: Option<AgentId>, body: impl Into<String>) -> Self {
        Self {
            ticket_id,
            author_id,
            body: body.into(),
            media: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Enqueued {
    pub message_id: MessageId,
    pub ticket_id: TicketId,
    pub ticket_number: String,
    pub state: DeliveryState,
}

/// What happened to one message during a processing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    /// Another caller owns the row, or it is no longer pending.
    Skipped,
    Sent,
    Failed { terminal: bool },
    /// Left pending without counting an attempt.
    Deferred,
}

#[derive(Clone)]
pub struct MessageQueue {
    db: Database,
    driver: Arc<dyn ProviderDriver>,
    limiter: Arc<RateLimiter>,
    dedup: DedupGuard,
    delay: DelayTracker,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    settings: QueueSettings,
}

impl MessageQueue {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        driver: Arc<dyn ProviderDriver>,
        limiter: Arc<RateLimiter>,
        dedup: DedupGuard,
        delay: DelayTracker,
        bus: EventBus,
        clock: Arc<dyn Clock>,
        settings: QueueSettings,
    ) -> Self {
        Self {
            db,
            driver,
            limiter,
            dedup,
            delay,
            bus,
            clock,
            settings,
        }
    }

    pub fn driver(&self) -> &Arc<dyn ProviderDriver> {
        &self.driver
    }

    /// Validate and persist an outbound message in the `pending` state.
    ///
    /// Fails with `NotFound` for an unknown ticket, `InvalidRecipient` when the
    /// ticket's customer has no routable address, and `Duplicate` when the same
    /// author queued the same body on the ticket within the dedup window.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<Enqueued, DesklineError> {
        let now = self.clock.now();
        let ticket = tickets::get_ticket(&self.db, request.ticket_id)
            .await?
            .ok_or_else(|| DesklineError::not_found("ticket", request.ticket_id))?;
        let customer = customers::get_customer(&self.db, ticket.customer_id)
            .await?
            .ok_or_else(|| DesklineError::not_found("customer", ticket.customer_id))?;

        let address = customer.delivery_address();
        if let Err(e) = classify_address(address, &self.settings.country_code) {
            return Err(DesklineError::InvalidRecipient {
                address: address.to_string(),
                reason: e.to_string(),
            });
        }
        if customer.channel_address.as_deref().is_none_or(str::is_empty)
            && is_placeholder_phone(&customer.phone_number, &self.settings.placeholder_prefix)
        {
            return Err(DesklineError::InvalidRecipient {
                address: address.to_string(),
                reason: "placeholder phone without a channel address".into(),
            });
        }

        let hash = content_hash(ticket.id, &request.body, request.author_id, now);
        if let Some(existing) = self.dedup.outbound_duplicate(ticket.id, &hash, now).await? {
            debug!(ticket_id = %ticket.id, existing_id = %existing, "duplicate enqueue rejected");
            return Err(DesklineError::Duplicate {
                ticket_id: ticket.id,
            });
        }

        let sender = if request.author_id.is_some() {
            SenderKind::Agent
        } else {
            SenderKind::System
        };
        let message_id = messages::insert_message(
            &self.db,
            NewMessage {
                ticket_id: ticket.id,
                direction: Direction::Outgoing,
                sender,
                sender_agent_id: request.author_id,
                body: request.body,
                media: request.media,
                provider_message_id: None,
                content_hash: Some(hash),
                state: DeliveryState::Pending,
                sent_at: None,
            },
            now,
        )
        .await?;

        match sender {
            SenderKind::Agent => {
                tickets::record_agent_message(&self.db, ticket.id, now).await?;
                self.delay.evaluate(ticket.id).await?;
            }
            _ => tickets::record_system_message(&self.db, ticket.id).await?,
        }

        info!(
            message_id = %message_id,
            ticket_id = %ticket.id,
            agent_id = ?request.author_id,
            "message queued"
        );
        self.bus.publish(DeskEvent::MessageQueued {
            message_id,
            ticket_id: ticket.id,
        });

        Ok(Enqueued {
            message_id,
            ticket_id: ticket.id,
            ticket_number: ticket.ticket_number,
            state: DeliveryState::Pending,
        })
    }

    /// Attempt up to `batch_size` due messages, oldest first.
    ///
    /// One message's failure never aborts the batch. Cancellation is checked
    /// between messages, never during a send. A rate-limit deferral ends the
    /// pass since every later message would be refused as well.
    pub async fn process_pending(
        &self,
        batch_size: u32,
        cancel: &CancellationToken,
    ) -> Result<ProcessSummary, DesklineError> {
        let due = messages::due_pending(
            &self.db,
            self.clock.now(),
            self.settings.retry_delays_secs.clone(),
            self.settings.max_retries,
            batch_size,
        )
        .await?;

        let mut summary = ProcessSummary::default();
        for message in due {
            if cancel.is_cancelled() {
                info!(processed = summary.processed, "queue pass cancelled");
                break;
            }
            match self.attempt(&message).await {
                Ok(Attempt::Skipped) => {}
                Ok(Attempt::Sent) => {
                    summary.processed += 1;
                    summary.sent += 1;
                }
                Ok(Attempt::Failed { .. }) => {
                    summary.processed += 1;
                    summary.failed += 1;
                }
                Ok(Attempt::Deferred) => {
                    summary.processed += 1;
                    summary.deferred += 1;
                    break;
                }
                Err(e) => {
                    error!(
                        message_id = %message.id,
                        ticket_id = %message.ticket_id,
                        error = %e,
                        "message attempt aborted"
                    );
                }
            }
        }

        if summary.processed > 0 {
            info!(
                processed = summary.processed,
                sent = summary.sent,
                failed = summary.failed,
                deferred = summary.deferred,
                "queue pass finished"
            );
        }
        Ok(summary)
    }

    /// Attempt one message now, ignoring its backoff. Returns whether it was sent.
    pub async fn process_message(&self, message_id: MessageId) -> Result<bool, DesklineError> {
        let message = messages::get_message(&self.db, message_id)
            .await?
            .ok_or_else(|| DesklineError::not_found("message", message_id))?;
        if message.state != DeliveryState::Pending {
            return Ok(false);
        }
        Ok(self.attempt(&message).await? == Attempt::Sent)
    }

    async fn attempt(&self, message: &Message) -> Result<Attempt, DesklineError> {
        let claimed_at = self.clock.now();
        if !messages::claim(&self.db, message.id, claimed_at).await? {
            debug!(message_id = %message.id, "message claimed elsewhere, skipping");
            return Ok(Attempt::Skipped);
        }

        if !self.limiter.acquire_within(self.settings.max_wait).await {
            messages::release_claim(&self.db, message.id, claimed_at).await?;
            warn!(
                message_id = %message.id,
                ticket_id = %message.ticket_id,
                "local rate limit reached, message deferred"
            );
            return Ok(Attempt::Deferred);
        }

        let address = self.resolve_address(message.ticket_id).await?;

        // The limiter wait may have outlived the claim. Restamping proves the
        // row is still ours and restarts its stale clock for the send.
        let held = self.clock.now();
        if !messages::restamp_claim(&self.db, message.id, claimed_at, held).await? {
            warn!(
                message_id = %message.id,
                ticket_id = %message.ticket_id,
                "claim was recovered while waiting for a rate-limit slot, skipping"
            );
            return Ok(Attempt::Skipped);
        }

        let result = match address {
            Ok(address) => self.send(&address, message).await,
            Err(reason) => SendResult::failed(ErrorKind::InvalidRecipient, reason),
        };

        if result.success {
            return self.record_sent(message, held, result.provider_message_id).await;
        }
        self.record_failed(message, held, result).await
    }

    /// Delivery address of the ticket's customer, or why there is none.
    async fn resolve_address(&self, ticket_id: TicketId) -> Result<Result<String, String>, DesklineError> {
        let Some(ticket) = tickets::get_ticket(&self.db, ticket_id).await? else {
            return Ok(Err(format!("ticket {ticket_id} no longer exists")));
        };
        let Some(customer) = customers::get_customer(&self.db, ticket.customer_id).await? else {
            return Ok(Err(format!("customer {} no longer exists", ticket.customer_id)));
        };
        let address = customer.delivery_address();
        Ok(match classify_address(address, &self.settings.country_code) {
            Ok(_) => Ok(address.to_string()),
            Err(e) => Err(format!("{address}: {e}")),
        })
    }

    async fn send(&self, address: &str, message: &Message) -> SendResult {
        debug!(
            message_id = %message.id,
            provider = self.driver.name(),
            retry_count = message.retry_count,
            "sending message"
        );
        let call = async {
            match &message.media {
                Some(media) => {
                    let caption = (!message.body.is_empty()).then_some(message.body.as_str());
                    self.driver.send_media(address, &media.url, media.kind(), caption).await
                }
                None => self.driver.send_text(address, &message.body).await,
            }
        };
        match tokio::time::timeout(self.settings.send_timeout, call).await {
            Ok(result) => result,
            Err(_) => SendResult::failed(
                ErrorKind::TransientProviderError,
                format!("provider call timed out after {:?}", self.settings.send_timeout),
            ),
        }
    }

    async fn record_sent(
        &self,
        message: &Message,
        claimed_at: DateTime<Utc>,
        provider_message_id: Option<String>,
    ) -> Result<Attempt, DesklineError> {
        let now = self.clock.now();
        if !messages::mark_sent(&self.db, message.id, claimed_at, provider_message_id.clone(), now).await? {
            error!(
                message_id = %message.id,
                ticket_id = %message.ticket_id,
                provider_message_id = provider_message_id.as_deref().unwrap_or(""),
                "claim lost during the provider call, send not recorded"
            );
            return Ok(Attempt::Skipped);
        }
        info!(
            message_id = %message.id,
            ticket_id = %message.ticket_id,
            provider = self.driver.name(),
            provider_message_id = provider_message_id.as_deref().unwrap_or(""),
            "message sent"
        );
        self.bus.publish(DeskEvent::MessageSent {
            message_id: message.id,
            ticket_id: message.ticket_id,
            provider_message_id,
        });
        Ok(Attempt::Sent)
    }

    async fn record_failed(
        &self,
        message: &Message,
        claimed_at: DateTime<Utc>,
        result: SendResult,
    ) -> Result<Attempt, DesklineError> {
        let kind = result.error_kind.unwrap_or(ErrorKind::TransientProviderError);
        let raw_detail = result.error_detail.unwrap_or_default();
        let detail = if kind == ErrorKind::InvalidRecipient {
            format!("{} ({raw_detail})", kind.user_note())
        } else {
            raw_detail
        };
        let outcome = outcome_after_failure(kind, message.retry_count, self.settings.max_retries);
        let now = self.clock.now();
        if !messages::record_failure(&self.db, message.id, claimed_at, outcome, kind, detail.clone(), now).await? {
            warn!(message_id = %message.id, error_kind = %kind, "claim lost before the failure was recorded");
            return Ok(Attempt::Skipped);
        }

        if kind == ErrorKind::RateLimited {
            warn!(
                message_id = %message.id,
                ticket_id = %message.ticket_id,
                provider = self.driver.name(),
                "provider rate limit reached, message deferred"
            );
            return Ok(Attempt::Deferred);
        }

        let terminal = outcome.state == DeliveryState::Failed;
        if terminal {
            error!(
                message_id = %message.id,
                ticket_id = %message.ticket_id,
                error_kind = %kind,
                provider = self.driver.name(),
                retry_count = outcome.retry_count,
                detail = %detail,
                "message delivery failed permanently"
            );
        } else {
            warn!(
                message_id = %message.id,
                ticket_id = %message.ticket_id,
                error_kind = %kind,
                provider = self.driver.name(),
                retry_count = outcome.retry_count,
                detail = %detail,
                "message delivery failed, will retry"
            );
        }
        self.bus.publish(DeskEvent::MessageFailed {
            message_id: message.id,
            ticket_id: message.ticket_id,
            error_kind: kind,
            retry_count: outcome.retry_count,
            terminal,
        });
        Ok(Attempt::Failed { terminal })
    }

    /// Reset recently failed messages that still have retries left.
    pub async fn retry_failed(&self, within_hours: u32) -> Result<u64, DesklineError> {
        let since = self.clock.now() - TimeDelta::hours(i64::from(within_hours));
        let reset = messages::reset_failed(&self.db, since, self.settings.max_retries).await?;
        info!(reset, within_hours, "failed messages reset");
        Ok(reset)
    }

    /// Reset one failed message, unless its recipient was rejected.
    pub async fn requeue(&self, message_id: MessageId) -> Result<bool, DesklineError> {
        if messages::get_message(&self.db, message_id).await?.is_none() {
            return Err(DesklineError::not_found("message", message_id));
        }
        let requeued = messages::requeue(&self.db, message_id).await?;
        if requeued {
            info!(message_id = %message_id, "message requeued");
        }
        Ok(requeued)
    }

    pub async fn queue_stats(&self) -> Result<QueueStats, DesklineError> {
        messages::queue_stats(&self.db).await
    }

    /// Apply a delivery receipt for a sent message.
    pub async fn mark_delivered(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<MessageId>, DesklineError> {
        let updated =
            messages::mark_delivered(&self.db, provider_message_id.to_string(), self.clock.now())
                .await?;
        let Some((message_id, ticket_id)) = updated else {
            debug!(provider_message_id, "delivery receipt for unknown or unsent message");
            return Ok(None);
        };
        debug!(message_id = %message_id, ticket_id = %ticket_id, "message delivered");
        self.bus.publish(DeskEvent::MessageDelivered {
            message_id,
            ticket_id,
        });
        Ok(Some(message_id))
    }

    /// Return rows left in `sending` by a crashed caller to the queue.
    pub async fn recover_stale_sending(&self, older_than: Duration) -> Result<u64, DesklineError> {
        let now = self.clock.now();
        let cutoff = now - TimeDelta::from_std(older_than).unwrap_or(TimeDelta::zero());
        let recovered =
            messages::recover_stale(&self.db, cutoff, self.settings.max_retries, now).await?;
        if recovered > 0 {
            warn!(recovered, "recovered messages stuck in sending");
        }
        Ok(recovered)
    }
}
