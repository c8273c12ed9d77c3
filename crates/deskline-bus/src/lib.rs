// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process event bus.
//!
//! Pipeline components publish a [`DeskEvent`] after the state change it
//! describes has been committed. Subscribers (logging, KPI refresh, agent
//! notification) receive events through a tokio broadcast channel. Publishing
//! never fails: with no subscribers the event is simply dropped.

pub mod events;

pub use events::{DeskEvent, EventEnvelope};

use chrono::Utc;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1024;

/// Cloneable handle to a broadcast channel of [`EventEnvelope`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Stamp and broadcast `event`. Returns the number of receivers reached.
    pub fn publish(&self, event: DeskEvent) -> usize {
        tracing::trace!(event = event.name(), "publishing desk event");
        let envelope = EventEnvelope {
            at: Utc::now(),
            event,
        };
        self.tx.send(envelope).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
