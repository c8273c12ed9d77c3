// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Deskline delivery pipeline.
//!
//! This crate holds the domain records shared by every other crate (messages,
//! tickets, agents, customers), the delivery state machine, the send-failure
//! taxonomy, and the traits that provider drivers and clocks implement.

pub mod address;
pub mod delivery;
pub mod error;
pub mod traits;
pub mod types;

pub use address::{AddressError, ChannelAddress, classify_address, is_placeholder_phone};
pub use delivery::{DeliveryState, ErrorKind, FailureOutcome, backoff_delay, outcome_after_failure};
pub use error::DesklineError;
pub use traits::{Clock, ProviderDriver, SystemClock};
pub use types::{
    Agent, AgentId, AgentStatus, ConnectionStatus, Customer, CustomerId, DelayEndReason,
    DelayEvent, Direction, InboundEvent, InboundKind, MediaKind, MediaRef, Message, MessageId,
    ProcessSummary, QueueStats, SendResult, SenderKind, Ticket, TicketId, TicketStatus,
};
