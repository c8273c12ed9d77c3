// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Insert payloads and storage-only records.
//!
//! The persisted entities themselves live in `deskline_core::types`.

use chrono::{DateTime, NaiveDate, Utc};
use deskline_core::{
    AgentId, CustomerId, DeliveryState, Direction, MediaRef, SenderKind, TicketId, TicketStatus,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default)]
pub struct NewCustomer {
    pub name: Option<String>,
    pub phone_number: String,
    pub channel_address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewAgent {
    pub user_id: i64,
    pub display_name: String,
    pub max_capacity: u32,
    pub is_online: bool,
}

#[derive(Debug, Clone)]
pub struct NewTicket {
    pub customer_id: CustomerId,
    pub assigned_agent_id: Option<AgentId>,
    pub status: TicketStatus,
    pub category: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub ticket_id: TicketId,
    pub direction: Direction,
    pub sender: SenderKind,
    pub sender_agent_id: Option<AgentId>,
    pub body: String,
    pub media: Option<MediaRef>,
    pub provider_message_id: Option<String>,
    pub content_hash: Option<String>,
    pub state: DeliveryState,
    /// Provider-reported send time. Sent and delivered rows fall back to the
    /// insert time.
    pub sent_at: Option<DateTime<Utc>>,
}

/// Per-agent, per-day performance summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentKpi {
    pub agent_id: AgentId,
    pub kpi_date: NaiveDate,
    pub total_tickets: u32,
    pub closed_tickets: u32,
    pub messages_sent: u32,
    pub messages_failed: u32,
    pub delay_count: u32,
    pub delayed_tickets: u32,
    pub total_delay_secs: i64,
    pub avg_first_response_secs: Option<f64>,
    pub overall_score: f64,
}

/// Raw counts for one agent over one day, before scoring.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct KpiCounts {
    pub total_tickets: u32,
    pub closed_tickets: u32,
    pub messages_sent: u32,
    pub messages_failed: u32,
    pub delay_count: u32,
    pub delayed_tickets: u32,
    pub total_delay_secs: i64,
    pub avg_first_response_secs: Option<f64>,
}
