// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Response-time tracking per ticket.
//!
//! A ticket is either on time or delayed. The decision is a pure function of
//! the ticket's timestamps ([`delay_anchor`]) so the same rule applies when a
//! message lands and when the periodic sweep runs. Each delayed period is
//! recorded as one delay event that is closed with a duration when the
//! ticket goes back on time.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use deskline_bus::{DeskEvent, EventBus};
use deskline_core::{Clock, DelayEndReason, DelayEvent, DesklineError, Ticket, TicketId};
use deskline_storage::Database;
use deskline_storage::queries::{delay_events, tickets};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Instant the response-time clock started for `ticket`, if it is running.
///
/// The clock runs only for open and follow-up tickets. Once an agent has
/// written, a later customer message stops it; otherwise it runs from the
/// agent's last message, or from category selection when that came later.
/// Before any agent message the clock starts at category selection, falling
/// back to the last customer message while the ticket is still untriaged.
pub fn delay_anchor(ticket: &Ticket) -> Option<DateTime<Utc>> {
    if !ticket.status.tracks_delay() {
        return None;
    }
    match ticket.last_agent_message_at {
        Some(agent_at) => {
            if ticket.last_customer_message_at.is_some_and(|c| c > agent_at) {
                return None;
            }
            Some(ticket.category_selected_at.map_or(agent_at, |cat| cat.max(agent_at)))
        }
        None => ticket.category_selected_at.or(ticket.last_customer_message_at),
    }
}

/// Reason recorded when a delayed ticket goes back on time.
fn end_reason(ticket: &Ticket) -> DelayEndReason {
    if !ticket.status.is_active() {
        return DelayEndReason::TicketClosed;
    }
    match (ticket.last_customer_message_at, ticket.last_agent_message_at) {
        (Some(customer), Some(agent)) if customer > agent => DelayEndReason::CustomerReplied,
        (Some(_), None) => DelayEndReason::CustomerReplied,
        _ => DelayEndReason::AgentReplied,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayTransition {
    Unchanged,
    Started,
    Ended(DelayEndReason),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub checked: u32,
    pub started: u32,
    pub ended: u32,
}

#[derive(Clone)]
pub struct DelayTracker {
    db: Database,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    threshold: TimeDelta,
}

impl DelayTracker {
    pub fn new(db: Database, bus: EventBus, clock: Arc<dyn Clock>, threshold: Duration) -> Self {
        Self {
            db,
            bus,
            clock,
            threshold: TimeDelta::from_std(threshold).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Re-derive the delay state of one ticket and apply any transition.
    pub async fn evaluate(&self, ticket_id: TicketId) -> Result<DelayTransition, DesklineError> {
        let ticket = tickets::get_ticket(&self.db, ticket_id)
            .await?
            .ok_or_else(|| DesklineError::not_found("ticket", ticket_id))?;
        self.apply(&ticket).await
    }

    /// Evaluate every ticket that is open or still flagged as delayed.
    pub async fn sweep(&self) -> Result<SweepReport, DesklineError> {
        let candidates = tickets::delay_candidates(&self.db).await?;
        let mut report = SweepReport::default();
        for ticket in candidates {
            report.checked += 1;
            match self.apply(&ticket).await {
                Ok(DelayTransition::Started) => report.started += 1,
                Ok(DelayTransition::Ended(_)) => report.ended += 1,
                Ok(DelayTransition::Unchanged) => {}
                Err(e) => warn!(ticket_id = %ticket.id, error = %e, "delay evaluation failed"),
            }
        }
        debug!(
            checked = report.checked,
            started = report.started,
            ended = report.ended,
            "delay sweep finished"
        );
        Ok(report)
    }

    /// Close the open delay event of a ticket that is being closed.
    ///
    /// The ticket row's flag is cleared by the status change itself.
    pub async fn close_out(&self, ticket: &Ticket) -> Result<Option<DelayEvent>, DesklineError> {
        let now = self.clock.now();
        let closed =
            delay_events::close_open_event(&self.db, ticket.id, now, DelayEndReason::TicketClosed)
                .await?;
        if let Some(event) = &closed {
            self.publish_end(event, DelayEndReason::TicketClosed);
        }
        Ok(closed)
    }

    async fn apply(&self, ticket: &Ticket) -> Result<DelayTransition, DesklineError> {
        let now = self.clock.now();
        let anchor = delay_anchor(ticket).filter(|anchor| now - *anchor > self.threshold);

        match (anchor, ticket.is_delayed) {
            (Some(anchor), false) => {
                let started_at = anchor.min(now);
                if !tickets::start_delay(&self.db, ticket.id, started_at).await? {
                    return Ok(DelayTransition::Unchanged);
                }
                delay_events::open_event(&self.db, ticket.id, ticket.assigned_agent_id, started_at)
                    .await?;
                info!(
                    ticket_id = %ticket.id,
                    agent_id = ?ticket.assigned_agent_id,
                    %started_at,
                    "ticket delayed"
                );
                self.bus.publish(DeskEvent::DelayStarted {
                    ticket_id: ticket.id,
                    agent_id: ticket.assigned_agent_id,
                    started_at,
                });
                Ok(DelayTransition::Started)
            }
            (None, true) => {
                let reason = end_reason(ticket);
                if !tickets::clear_delay(&self.db, ticket.id).await? {
                    return Ok(DelayTransition::Unchanged);
                }
                if let Some(event) =
                    delay_events::close_open_event(&self.db, ticket.id, now, reason).await?
                {
                    self.publish_end(&event, reason);
                }
                Ok(DelayTransition::Ended(reason))
            }
            _ => Ok(DelayTransition::Unchanged),
        }
    }

    fn publish_end(&self, event: &DelayEvent, reason: DelayEndReason) {
        let duration_secs = event.duration_secs.unwrap_or_default();
        info!(
            ticket_id = %event.ticket_id,
            agent_id = ?event.agent_id,
            duration_secs,
            %reason,
            "ticket back on time"
        );
        self.bus.publish(DeskEvent::DelayEnded {
            ticket_id: event.ticket_id,
            agent_id: event.agent_id,
            duration_secs,
            reason,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskline_core::{CustomerId, TicketStatus};
    use deskline_test_utils::TestHarness;

    fn ticket_at(status: TicketStatus) -> Ticket {
        Ticket {
            id: TicketId(1),
            ticket_number: "TKT-20260314-00001".into(),
            customer_id: CustomerId(1),
            assigned_agent_id: None,
            status,
            category: None,
            category_selected_at: None,
            last_customer_message_at: None,
            last_agent_message_at: None,
            first_response_at: None,
            is_delayed: false,
            delay_started_at: None,
            delay_count: 0,
            message_count: 0,
            created_at: DateTime::<Utc>::MIN_UTC,
            closed_at: None,
        }
    }

    fn min(m: u32) -> DateTime<Utc> {
        use chrono::TimeZone;
        Utc.with_ymd_and_hms(2026, 3, 14, 9, m, 0).unwrap()
    }

    #[test]
    fn anchor_follows_last_agent_message() {
        let mut t = ticket_at(TicketStatus::Open);
        t.last_customer_message_at = Some(min(0));
        t.last_agent_message_at = Some(min(2));
        assert_eq!(delay_anchor(&t), Some(min(2)));

        t.last_customer_message_at = Some(min(3));
        assert_eq!(delay_anchor(&t), None);
    }

    #[test]
    fn anchor_before_and_after_classification() {
        let mut t = ticket_at(TicketStatus::Open);
        t.last_customer_message_at = Some(min(1));
        assert_eq!(delay_anchor(&t), Some(min(1)));

        t.category_selected_at = Some(min(4));
        assert_eq!(delay_anchor(&t), Some(min(4)));

        t.last_agent_message_at = Some(min(2));
        assert_eq!(delay_anchor(&t), Some(min(4)), "selection after the reply restarts the clock");
        t.last_agent_message_at = Some(min(6));
        assert_eq!(delay_anchor(&t), Some(min(6)));
    }

    #[test]
    fn anchor_ignores_pending_and_closed() {
        let mut t = ticket_at(TicketStatus::Pending);
        t.last_customer_message_at = Some(min(1));
        assert_eq!(delay_anchor(&t), None);
        t.status = TicketStatus::Closed;
        assert_eq!(delay_anchor(&t), None);
        t.status = TicketStatus::FollowUp;
        assert_eq!(delay_anchor(&t), Some(min(1)));
    }

    fn tracker(h: &TestHarness) -> DelayTracker {
        DelayTracker::new(h.db.clone(), h.bus.clone(), h.clock.clone(), h.config.delay.threshold())
    }

    #[tokio::test]
    async fn agent_message_without_reply_becomes_delayed_then_customer_clears_it() {
        let h = TestHarness::new().await.unwrap();
        let agent = h.agent(1, 5, true).await.unwrap();
        let customer = h.customer("201001234567").await.unwrap();
        let ticket = h.open_ticket(&customer).await.unwrap();
        tickets::assign(&h.db, ticket.id, agent.id).await.unwrap();
        let tracker = tracker(&h);
        let mut rx = h.bus.subscribe();

        let agent_at = h.clock.now();
        tickets::record_agent_message(&h.db, ticket.id, agent_at).await.unwrap();
        h.clock.advance_secs(240);

        assert_eq!(tracker.evaluate(ticket.id).await.unwrap(), DelayTransition::Started);
        let delayed = h.ticket(&ticket).await.unwrap();
        assert!(delayed.is_delayed);
        assert_eq!(delayed.delay_started_at, Some(agent_at));
        assert!(delayed.delay_started_at.unwrap() <= h.clock.now());
        assert_eq!(delayed.delay_count, 1);
        assert!(matches!(rx.recv().await.unwrap().event, DeskEvent::DelayStarted { .. }));

        // Repeat evaluation is a no-op.
        assert_eq!(tracker.evaluate(ticket.id).await.unwrap(), DelayTransition::Unchanged);

        h.clock.advance_secs(1);
        tickets::record_customer_message(&h.db, ticket.id, h.clock.now()).await.unwrap();
        assert_eq!(
            tracker.evaluate(ticket.id).await.unwrap(),
            DelayTransition::Ended(DelayEndReason::CustomerReplied)
        );
        let cleared = h.ticket(&ticket).await.unwrap();
        assert!(!cleared.is_delayed);
        assert_eq!(cleared.delay_started_at, None);

        let events = delay_events::list_for_ticket(&h.db, ticket.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].agent_id, Some(agent.id));
        assert_eq!(events[0].duration_secs, Some(241));
        assert_eq!(events[0].end_reason, Some(DelayEndReason::CustomerReplied));
        match rx.recv().await.unwrap().event {
            DeskEvent::DelayEnded { duration_secs, reason, .. } => {
                assert_eq!(duration_secs, 241);
                assert_eq!(reason, DelayEndReason::CustomerReplied);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn delay_starts_only_once_the_threshold_is_exceeded() {
        let h = TestHarness::new().await.unwrap();
        let customer = h.customer("201001234567").await.unwrap();
        let ticket = h.open_ticket(&customer).await.unwrap();
        let tracker = tracker(&h);
        tickets::record_agent_message(&h.db, ticket.id, h.clock.now()).await.unwrap();

        h.clock.advance_secs(179);
        assert_eq!(tracker.evaluate(ticket.id).await.unwrap(), DelayTransition::Unchanged);
        h.clock.advance_secs(1);
        assert_eq!(tracker.evaluate(ticket.id).await.unwrap(), DelayTransition::Unchanged);
        assert!(!h.ticket(&ticket).await.unwrap().is_delayed);

        h.clock.advance_secs(1);
        assert_eq!(tracker.evaluate(ticket.id).await.unwrap(), DelayTransition::Started);
    }

    #[tokio::test]
    async fn new_agent_message_restarts_the_clock() {
        let h = TestHarness::new().await.unwrap();
        let customer = h.customer("201001234567").await.unwrap();
        let ticket = h.open_ticket(&customer).await.unwrap();
        let tracker = tracker(&h);

        tickets::record_agent_message(&h.db, ticket.id, h.clock.now()).await.unwrap();
        h.clock.advance_secs(200);
        tracker.evaluate(ticket.id).await.unwrap();

        tickets::record_agent_message(&h.db, ticket.id, h.clock.now()).await.unwrap();
        assert_eq!(
            tracker.evaluate(ticket.id).await.unwrap(),
            DelayTransition::Ended(DelayEndReason::AgentReplied)
        );

        h.clock.advance_secs(200);
        let report = tracker.sweep().await.unwrap();
        assert_eq!(report, SweepReport { checked: 1, started: 1, ended: 0 });
        assert_eq!(h.ticket(&ticket).await.unwrap().delay_count, 2);
    }

    #[tokio::test]
    async fn close_out_records_ticket_closed() {
        let h = TestHarness::new().await.unwrap();
        let customer = h.customer("201001234567").await.unwrap();
        let ticket = h.open_ticket(&customer).await.unwrap();
        let tracker = tracker(&h);
        tickets::record_customer_message(&h.db, ticket.id, h.clock.now()).await.unwrap();
        h.clock.advance_secs(300);
        assert_eq!(tracker.evaluate(ticket.id).await.unwrap(), DelayTransition::Started);

        tickets::set_status(&h.db, ticket.id, TicketStatus::Closed, h.clock.now()).await.unwrap();
        let closed = tracker.close_out(&ticket).await.unwrap().unwrap();
        assert_eq!(closed.end_reason, Some(DelayEndReason::TicketClosed));
        assert_eq!(closed.duration_secs, Some(300));
        assert!(tracker.close_out(&ticket).await.unwrap().is_none());
    }
}
