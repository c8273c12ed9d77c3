// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inbound message intake.
//!
//! Consumes provider-independent [`InboundEvent`]s: finds or creates the
//! customer and their active ticket, drops duplicates, stores the message and
//! re-evaluates the ticket's delay state.

use std::sync::Arc;

use deskline_bus::{DeskEvent, EventBus};
use deskline_core::{
    ChannelAddress, Clock, Customer, DeliveryState, DesklineError, Direction, InboundEvent,
    MessageId, SenderKind, Ticket, TicketId, TicketStatus, classify_address,
};
use deskline_storage::queries::{customers, messages, tickets};
use deskline_storage::{Database, NewCustomer, NewMessage, NewTicket};
use tracing::{debug, info};

use crate::assign::AgentAssigner;
use crate::dedup::DedupGuard;
use crate::delay::DelayTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Sent by this business account.
    Echo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    Ignored(IgnoreReason),
    Duplicate,
    Accepted {
        message_id: MessageId,
        ticket_id: TicketId,
        ticket_created: bool,
    },
}

/// Phone to store for a contact first seen through `event`.
///
/// Opaque ids carry no phone, so the customer gets a placeholder built from
/// `prefix` and the id's last six digits.
pub fn customer_phone(event: &InboundEvent, country_code: &str, prefix: &str) -> String {
    if let Some(phone) = event.normalized_phone.as_deref().filter(|p| !p.trim().is_empty()) {
        return phone.trim().to_string();
    }
    let digits: String = event
        .channel_address
        .split('@')
        .next()
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    match classify_address(&event.channel_address, country_code) {
        Ok(ChannelAddress::Phone(_) | ChannelAddress::Qualified(_)) => digits,
        _ => {
            let tail = &digits[digits.len().saturating_sub(6)..];
            format!("{prefix}{tail:0>6}")
        }
    }
}

#[derive(Clone)]
pub struct InboundHandler {
    db: Database,
    dedup: DedupGuard,
    delay: DelayTracker,
    assigner: AgentAssigner,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    country_code: String,
    placeholder_prefix: String,
}

impl InboundHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        dedup: DedupGuard,
        delay: DelayTracker,
        assigner: AgentAssigner,
        bus: EventBus,
        clock: Arc<dyn Clock>,
        country_code: String,
        placeholder_prefix: String,
    ) -> Self {
        Self {
            db,
            dedup,
            delay,
            assigner,
            bus,
            clock,
            country_code,
            placeholder_prefix,
        }
    }

    pub async fn handle(&self, event: InboundEvent) -> Result<InboundOutcome, DesklineError> {
        if event.is_echo {
            debug!(channel_address = %event.channel_address, "ignoring echo of our own message");
            return Ok(InboundOutcome::Ignored(IgnoreReason::Echo));
        }

        let now = self.clock.now();
        let provider_id = event.provider_id().map(str::to_string);
        if provider_id.is_some()
            && self
                .dedup
                .inbound_duplicate(provider_id.as_deref(), None, &event.body_text, now)
                .await?
        {
            debug!(provider_message_id = ?provider_id, "duplicate inbound receipt");
            return Ok(InboundOutcome::Duplicate);
        }

        let customer = self.resolve_customer(&event).await?;
        let (ticket, ticket_created) = self.active_ticket(&customer).await?;

        if provider_id.is_none()
            && self
                .dedup
                .inbound_duplicate(None, Some(ticket.id), &event.body_text, now)
                .await?
        {
            debug!(ticket_id = %ticket.id, "duplicate inbound content");
            return Ok(InboundOutcome::Duplicate);
        }

        let inserted = messages::insert_message(
            &self.db,
            NewMessage {
                ticket_id: ticket.id,
                direction: Direction::Incoming,
                sender: SenderKind::Customer,
                sender_agent_id: None,
                body: event.body_text.clone(),
                media: event.media(),
                provider_message_id: provider_id,
                content_hash: None,
                state: DeliveryState::Delivered,
                sent_at: event.sent_at(),
            },
            now,
        )
        .await;
        let message_id = match inserted {
            Ok(id) => id,
            Err(e) if e.is_duplicate() => return Ok(InboundOutcome::Duplicate),
            Err(e) => return Err(e),
        };

        customers::record_contact(&self.db, customer.id, now, ticket_created).await?;
        tickets::record_customer_message(&self.db, ticket.id, now).await?;
        self.delay.evaluate(ticket.id).await?;

        info!(
            message_id = %message_id,
            ticket_id = %ticket.id,
            customer_id = %customer.id,
            kind = %event.kind,
            ticket_created,
            "inbound message stored"
        );
        self.bus.publish(DeskEvent::InboundReceived {
            message_id,
            ticket_id: ticket.id,
        });

        Ok(InboundOutcome::Accepted {
            message_id,
            ticket_id: ticket.id,
            ticket_created,
        })
    }

    async fn resolve_customer(&self, event: &InboundEvent) -> Result<Customer, DesklineError> {
        let phone = event
            .normalized_phone
            .clone()
            .filter(|p| !p.trim().is_empty());
        let address = event.channel_address.trim().to_string();

        if let Some(customer) =
            customers::find_by_contact(&self.db, phone.clone(), address.clone()).await?
        {
            if customer.channel_address.as_deref() != Some(address.as_str()) && !address.is_empty() {
                customers::set_channel_address(&self.db, customer.id, address.clone()).await?;
                debug!(customer_id = %customer.id, "channel address updated");
            }
            return Ok(Customer {
                channel_address: Some(address),
                ..customer
            });
        }

        let new = NewCustomer {
            name: event.sender_display_name.clone(),
            phone_number: customer_phone(event, &self.country_code, &self.placeholder_prefix),
            channel_address: Some(address.clone()),
        };
        match customers::insert_customer(&self.db, new, self.clock.now()).await {
            Ok(customer) => {
                info!(customer_id = %customer.id, "new customer");
                Ok(customer)
            }
            // A concurrent receipt created the same customer first.
            Err(e) => customers::find_by_contact(&self.db, phone, address)
                .await?
                .ok_or(e),
        }
    }

    async fn active_ticket(&self, customer: &Customer) -> Result<(Ticket, bool), DesklineError> {
        if let Some(ticket) = tickets::find_active_for_customer(&self.db, customer.id).await? {
            return Ok((ticket, false));
        }

        let ticket = tickets::create_ticket(
            &self.db,
            NewTicket {
                customer_id: customer.id,
                assigned_agent_id: None,
                status: TicketStatus::Pending,
                category: None,
            },
            self.clock.now(),
        )
        .await?;
        info!(ticket_id = %ticket.id, ticket_number = %ticket.ticket_number, "ticket created");
        self.bus.publish(DeskEvent::TicketCreated {
            ticket_id: ticket.id,
            ticket_number: ticket.ticket_number.clone(),
        });

        self.assigner.assign_ticket(ticket.id).await?;
        let ticket = tickets::get_ticket(&self.db, ticket.id)
            .await?
            .ok_or_else(|| DesklineError::not_found("ticket", ticket.id))?;
        Ok((ticket, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskline_core::InboundKind;

    fn event(address: &str, phone: Option<&str>) -> InboundEvent {
        InboundEvent {
            provider_message_id: None,
            channel_address: address.into(),
            normalized_phone: phone.map(Into::into),
            body_text: "hi".into(),
            kind: InboundKind::Text,
            sender_display_name: None,
            media_url: None,
            mime_type: None,
            timestamp_unix: 0,
            is_echo: false,
        }
    }

    #[test]
    fn phone_prefers_normalized_value() {
        let e = event("201001234567@c.us", Some("201001234567"));
        assert_eq!(customer_phone(&e, "20", "201000"), "201001234567");
    }

    #[test]
    fn qualified_address_yields_its_digits() {
        let e = event("201001234567@c.us", None);
        assert_eq!(customer_phone(&e, "20", "201000"), "201001234567");
    }

    #[test]
    fn opaque_id_yields_placeholder() {
        let e = event("123456789012345@lid", None);
        assert_eq!(customer_phone(&e, "20", "201000"), "201000012345");
        let bare = event("98765432109876", None);
        assert_eq!(customer_phone(&bare, "20", "201000"), "201000109876");
    }
}
