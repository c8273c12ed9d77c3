// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use chrono::{DateTime, Utc};
use deskline_core::{AgentId, DelayEndReason, ErrorKind, MessageId, TicketId};
use serde::{Deserialize, Serialize};

/// Something that happened in the pipeline, published after commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeskEvent {
    MessageQueued {
        message_id: MessageId,
        ticket_id: TicketId,
    },
    MessageSent {
        message_id: MessageId,
        ticket_id: TicketId,
        provider_message_id: Option<String>,
    },
    MessageFailed {
        message_id: MessageId,
        ticket_id: TicketId,
        error_kind: ErrorKind,
        retry_count: u32,
        /// False while the message is still waiting for another attempt.
        terminal: bool,
    },
    MessageDelivered {
        message_id: MessageId,
        ticket_id: TicketId,
    },
    InboundReceived {
        message_id: MessageId,
        ticket_id: TicketId,
    },
    TicketCreated {
        ticket_id: TicketId,
        ticket_number: String,
    },
    TicketAssigned {
        ticket_id: TicketId,
        agent_id: AgentId,
    },
    DelayStarted {
        ticket_id: TicketId,
        agent_id: Option<AgentId>,
        started_at: DateTime<Utc>,
    },
    DelayEnded {
        ticket_id: TicketId,
        agent_id: Option<AgentId>,
        duration_secs: i64,
        reason: DelayEndReason,
    },
}

impl DeskEvent {
    /// Stable short name, used as a log field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageQueued { .. } => "message_queued",
            Self::MessageSent { .. } => "message_sent",
            Self::MessageFailed { .. } => "message_failed",
            Self::MessageDelivered { .. } => "message_delivered",
            Self::InboundReceived { .. } => "inbound_received",
            Self::TicketCreated { .. } => "ticket_created",
            Self::TicketAssigned { .. } => "ticket_assigned",
            Self::DelayStarted { .. } => "delay_started",
            Self::DelayEnded { .. } => "delay_ended",
        }
    }

    pub fn ticket_id(&self) -> TicketId {
        match self {
            Self::MessageQueued { ticket_id, .. }
            | Self::MessageSent { ticket_id, .. }
            | Self::MessageFailed { ticket_id, .. }
            | Self::MessageDelivered { ticket_id, .. }
            | Self::InboundReceived { ticket_id, .. }
            | Self::TicketCreated { ticket_id, .. }
            | Self::TicketAssigned { ticket_id, .. }
            | Self::DelayStarted { ticket_id, .. }
            | Self::DelayEnded { ticket_id, .. } => *ticket_id,
        }
    }
}

/// An event together with its publish time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: DeskEvent,
}
