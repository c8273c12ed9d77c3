// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain records shared across the Deskline workspace.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::delivery::{DeliveryState, ErrorKind};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Row id of a message.
    MessageId
);
id_type!(
    /// Row id of a ticket.
    TicketId
);
id_type!(
    /// Row id of an agent.
    AgentId
);
id_type!(
    /// Row id of a customer.
    CustomerId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SenderKind {
    Customer,
    Agent,
    System,
}

/// Ticket lifecycle. `FollowUp` is a reopened conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Pending,
    Open,
    Closed,
    FollowUp,
}

impl TicketStatus {
    /// Whether the conversation is still being worked on.
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Closed)
    }

    /// Whether the response-time clock runs for this status.
    pub fn tracks_delay(self) -> bool {
        matches!(self, Self::Open | Self::FollowUp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Available,
    Busy,
    OnBreak,
    Offline,
}

/// Attachment carried by a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
}

impl MediaRef {
    pub fn kind(&self) -> MediaKind {
        self.mime
            .as_deref()
            .map(MediaKind::from_mime)
            .unwrap_or(MediaKind::Document)
    }
}

/// Media category understood by every provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaKind {
    pub fn from_mime(mime: &str) -> Self {
        let top = mime.split('/').next().unwrap_or_default();
        match top.to_ascii_lowercase().as_str() {
            "image" => Self::Image,
            "video" => Self::Video,
            "audio" => Self::Audio,
            _ => Self::Document,
        }
    }

    /// Captions are only rendered by providers for visual media.
    pub fn supports_caption(self) -> bool {
        matches!(self, Self::Image | Self::Video)
    }
}

/// Common result shape returned by every provider driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResult {
    pub success: bool,
    pub provider_message_id: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub error_detail: Option<String>,
}

impl SendResult {
    pub fn delivered(provider_message_id: Option<String>) -> Self {
        Self {
            success: true,
            provider_message_id,
            error_kind: None,
            error_detail: None,
        }
    }

    pub fn failed(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            success: false,
            provider_message_id: None,
            error_kind: Some(kind),
            error_detail: Some(detail.into()),
        }
    }
}

/// Provider connectivity as reported by a driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub ticket_id: TicketId,
    pub direction: Direction,
    pub sender: SenderKind,
    pub sender_agent_id: Option<AgentId>,
    pub body: String,
    pub media: Option<MediaRef>,
    pub provider_message_id: Option<String>,
    pub content_hash: Option<String>,
    pub state: DeliveryState,
    pub retry_count: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub error_kind: Option<ErrorKind>,
    pub error_detail: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub ticket_number: String,
    pub customer_id: CustomerId,
    pub assigned_agent_id: Option<AgentId>,
    pub status: TicketStatus,
    pub category: Option<String>,
    pub category_selected_at: Option<DateTime<Utc>>,
    pub last_customer_message_at: Option<DateTime<Utc>>,
    pub last_agent_message_at: Option<DateTime<Utc>>,
    pub first_response_at: Option<DateTime<Utc>>,
    pub is_delayed: bool,
    pub delay_started_at: Option<DateTime<Utc>>,
    pub delay_count: u32,
    pub message_count: u32,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub user_id: i64,
    pub display_name: String,
    pub is_online: bool,
    pub is_on_break: bool,
    pub break_started_at: Option<DateTime<Utc>>,
    pub status: AgentStatus,
    pub current_active_tickets: u32,
    pub max_capacity: u32,
    pub last_assigned_at: Option<DateTime<Utc>>,
}

impl Agent {
    /// Eligibility for new work, ignoring concurrent claims.
    pub fn can_take_ticket(&self) -> bool {
        self.is_online
            && !self.is_on_break
            && self.status != AgentStatus::Busy
            && self.current_active_tickets < self.max_capacity
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: Option<String>,
    pub phone_number: String,
    pub channel_address: Option<String>,
    pub total_tickets: u32,
    pub last_contact_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Customer {
    /// The address a driver should receive: the channel id when known, else the phone.
    pub fn delivery_address(&self) -> &str {
        self.channel_address
            .as_deref()
            .filter(|a| !a.is_empty())
            .unwrap_or(&self.phone_number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DelayEndReason {
    CustomerReplied,
    AgentReplied,
    TicketClosed,
}

/// One contiguous period during which a ticket breached its response threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayEvent {
    pub id: i64,
    pub ticket_id: TicketId,
    pub agent_id: Option<AgentId>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
    pub end_reason: Option<DelayEndReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InboundKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
}

/// Provider-independent inbound message produced by webhook normalisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    #[serde(default)]
    pub provider_message_id: Option<String>,
    pub channel_address: String,
    #[serde(default)]
    pub normalized_phone: Option<String>,
    #[serde(default)]
    pub body_text: String,
    #[serde(default = "default_inbound_kind")]
    pub kind: InboundKind,
    #[serde(default)]
    pub sender_display_name: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    pub timestamp_unix: i64,
    #[serde(default)]
    pub is_echo: bool,
}

fn default_inbound_kind() -> InboundKind {
    InboundKind::Text
}

impl InboundEvent {
    /// Provider id with empty strings treated as absent.
    pub fn provider_id(&self) -> Option<&str> {
        self.provider_message_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// Provider send time. Zero or out-of-range timestamps count as unknown.
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        (self.timestamp_unix > 0)
            .then(|| DateTime::from_timestamp(self.timestamp_unix, 0))
            .flatten()
    }

    pub fn media(&self) -> Option<MediaRef> {
        self.media_url
            .as_ref()
            .filter(|url| !url.is_empty())
            .map(|url| MediaRef {
                url: url.clone(),
                mime: self.mime_type.clone(),
            })
    }
}

/// Outgoing message counts by delivery state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub sending: u64,
    pub sent: u64,
    pub delivered: u64,
    pub failed: u64,
    pub total: u64,
}

/// Outcome of one `process_pending` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSummary {
    pub processed: u32,
    pub sent: u32,
    pub failed: u32,
    pub deferred: u32,
}
