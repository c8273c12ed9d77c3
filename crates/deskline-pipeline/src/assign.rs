// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Least-loaded agent assignment and agent availability.
//!
//! Capacity is claimed with a conditional update on the agent row, so two
//! concurrent assignments can never push an agent past `max_capacity`. A
//! claim that loses the race simply moves on to the next candidate.

use std::sync::Arc;

use deskline_bus::{DeskEvent, EventBus};
use deskline_core::{Agent, AgentId, Clock, DesklineError, TicketId, TicketStatus};
use deskline_storage::Database;
use deskline_storage::queries::{agents, tickets};
use tracing::{debug, info};

use crate::delay::DelayTracker;

#[derive(Clone)]
pub struct AgentAssigner {
    db: Database,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    delay: DelayTracker,
}

impl AgentAssigner {
    pub fn new(db: Database, bus: EventBus, clock: Arc<dyn Clock>, delay: DelayTracker) -> Self {
        Self {
            db,
            bus,
            clock,
            delay,
        }
    }

    /// The agent that would receive the next ticket, without claiming it.
    ///
    /// Fewest active tickets first, then longest since last assignment, then
    /// lowest id. `None` when every agent is offline, on break, or full.
    pub async fn pick_agent(&self) -> Result<Option<Agent>, DesklineError> {
        let candidates = agents::eligible_agents(&self.db).await?;
        Ok(candidates.into_iter().find(Agent::can_take_ticket))
    }

    /// Assign an unassigned ticket to the least-loaded agent.
    ///
    /// Returns the ticket's agent afterwards, which is `None` when nobody is
    /// available. A ticket already assigned keeps its agent.
    pub async fn assign_ticket(&self, ticket_id: TicketId) -> Result<Option<AgentId>, DesklineError> {
        let ticket = tickets::get_ticket(&self.db, ticket_id)
            .await?
            .ok_or_else(|| DesklineError::not_found("ticket", ticket_id))?;
        if ticket.assigned_agent_id.is_some() || ticket.status == TicketStatus::Closed {
            return Ok(ticket.assigned_agent_id);
        }

        for agent in agents::eligible_agents(&self.db).await? {
            if !agent.can_take_ticket() {
                continue;
            }
            if !agents::try_claim_slot(&self.db, agent.id, self.clock.now()).await? {
                debug!(agent_id = %agent.id, "agent filled up concurrently, trying next");
                continue;
            }
            if !tickets::assign(&self.db, ticket_id, agent.id).await? {
                // Someone else assigned the ticket between our read and claim.
                agents::release_slot(&self.db, agent.id).await?;
                let current = tickets::get_ticket(&self.db, ticket_id).await?;
                return Ok(current.and_then(|t| t.assigned_agent_id));
            }
            info!(ticket_id = %ticket_id, agent_id = %agent.id, "ticket assigned");
            self.bus.publish(DeskEvent::TicketAssigned {
                ticket_id,
                agent_id: agent.id,
            });
            return Ok(Some(agent.id));
        }

        debug!(ticket_id = %ticket_id, "no agent available, ticket left unassigned");
        Ok(None)
    }

    /// Try to place every waiting ticket, oldest first.
    pub async fn assign_waiting(&self) -> Result<u32, DesklineError> {
        let mut assigned = 0;
        for ticket in tickets::unassigned(&self.db).await? {
            match self.assign_ticket(ticket.id).await? {
                Some(_) => assigned += 1,
                None => break,
            }
        }
        Ok(assigned)
    }

    /// Return one capacity slot, e.g. when the agent's ticket closes.
    pub async fn release(&self, agent_id: AgentId) -> Result<(), DesklineError> {
        agents::release_slot(&self.db, agent_id).await
    }

    pub async fn start_break(&self, agent_id: AgentId) -> Result<bool, DesklineError> {
        let started = agents::start_break(&self.db, agent_id, self.clock.now()).await?;
        if started {
            info!(agent_id = %agent_id, "agent on break");
        }
        Ok(started)
    }

    pub async fn end_break(&self, agent_id: AgentId) -> Result<bool, DesklineError> {
        let ended = agents::end_break(&self.db, agent_id).await?;
        if ended {
            info!(agent_id = %agent_id, "agent back from break");
        }
        Ok(ended)
    }

    pub async fn set_online(&self, agent_id: AgentId, online: bool) -> Result<(), DesklineError> {
        agents::set_online(&self.db, agent_id, online).await?;
        info!(agent_id = %agent_id, online, "agent presence changed");
        Ok(())
    }

    /// Close a ticket: stop its delay clock and free the agent's slot.
    ///
    /// Returns `false` if the ticket was already closed.
    pub async fn close_ticket(&self, ticket_id: TicketId) -> Result<bool, DesklineError> {
        let ticket = tickets::get_ticket(&self.db, ticket_id)
            .await?
            .ok_or_else(|| DesklineError::not_found("ticket", ticket_id))?;
        if !tickets::set_status(&self.db, ticket_id, TicketStatus::Closed, self.clock.now()).await? {
            return Ok(false);
        }
        self.delay.close_out(&ticket).await?;
        if let Some(agent_id) = ticket.assigned_agent_id {
            self.release(agent_id).await?;
        }
        info!(ticket_id = %ticket_id, ticket_number = %ticket.ticket_number, "ticket closed");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskline_core::{AgentStatus, DelayEndReason};
    use deskline_storage::queries::delay_events;
    use deskline_test_utils::TestHarness;

    fn assigner(h: &TestHarness) -> AgentAssigner {
        let delay = DelayTracker::new(
            h.db.clone(),
            h.bus.clone(),
            h.clock.clone(),
            h.config.delay.threshold(),
        );
        AgentAssigner::new(h.db.clone(), h.bus.clone(), h.clock.clone(), delay)
    }

    async fn agent_row(h: &TestHarness, id: AgentId) -> Agent {
        agents::get_agent(&h.db, id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn picks_least_loaded_agent() {
        let h = TestHarness::new().await.unwrap();
        let a = h.agent(1, 5, true).await.unwrap();
        let b = h.agent(2, 5, true).await.unwrap();
        let assigner = assigner(&h);
        agents::try_claim_slot(&h.db, a.id, h.clock.now()).await.unwrap();

        assert_eq!(assigner.pick_agent().await.unwrap().unwrap().id, b.id);
    }

    #[tokio::test]
    async fn ties_go_to_longest_idle_agent() {
        let h = TestHarness::new().await.unwrap();
        let a = h.agent(1, 5, true).await.unwrap();
        let b = h.agent(2, 5, true).await.unwrap();
        let assigner = assigner(&h);
        let customer = h.customer("201001234567").await.unwrap();

        let first = h.open_ticket(&customer).await.unwrap();
        assert_eq!(assigner.assign_ticket(first.id).await.unwrap(), Some(a.id));
        assigner.release(a.id).await.unwrap();

        h.clock.advance_secs(5);
        let second = h.open_ticket(&customer).await.unwrap();
        assert_eq!(assigner.assign_ticket(second.id).await.unwrap(), Some(b.id));
    }

    #[tokio::test]
    async fn full_or_unavailable_agents_are_never_picked() {
        let h = TestHarness::new().await.unwrap();
        let full_a = h.agent(1, 1, true).await.unwrap();
        let full_b = h.agent(2, 1, true).await.unwrap();
        let on_break = h.agent(3, 5, true).await.unwrap();
        let _offline = h.agent(4, 5, false).await.unwrap();
        let assigner = assigner(&h);

        agents::try_claim_slot(&h.db, full_a.id, h.clock.now()).await.unwrap();
        agents::try_claim_slot(&h.db, full_b.id, h.clock.now()).await.unwrap();
        assert!(assigner.start_break(on_break.id).await.unwrap());

        assert!(assigner.pick_agent().await.unwrap().is_none());

        let customer = h.customer("201001234567").await.unwrap();
        let ticket = h.open_ticket(&customer).await.unwrap();
        assert_eq!(assigner.assign_ticket(ticket.id).await.unwrap(), None);
        assert_eq!(h.ticket(&ticket).await.unwrap().assigned_agent_id, None);

        assert!(assigner.end_break(on_break.id).await.unwrap());
        assert_eq!(assigner.assign_waiting().await.unwrap(), 1);
        assert_eq!(h.ticket(&ticket).await.unwrap().assigned_agent_id, Some(on_break.id));
    }

    #[tokio::test]
    async fn concurrent_assignments_respect_capacity() {
        let h = TestHarness::new().await.unwrap();
        let agent = h.agent(1, 3, true).await.unwrap();
        let assigner = assigner(&h);
        let customer = h.customer("201001234567").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let ticket = h.open_ticket(&customer).await.unwrap();
            let assigner = assigner.clone();
            handles.push(tokio::spawn(async move { assigner.assign_ticket(ticket.id).await }));
        }
        let mut assigned = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_some() {
                assigned += 1;
            }
        }
        assert_eq!(assigned, 3);
        let row = agent_row(&h, agent.id).await;
        assert_eq!(row.current_active_tickets, 3);
        assert_eq!(row.status, AgentStatus::Busy);
    }

    #[tokio::test]
    async fn closing_a_ticket_frees_the_agent_and_ends_the_delay() {
        let h = TestHarness::new().await.unwrap();
        let agent = h.agent(1, 1, true).await.unwrap();
        let assigner = assigner(&h);
        let customer = h.customer("201001234567").await.unwrap();
        let ticket = h.open_ticket(&customer).await.unwrap();
        assigner.assign_ticket(ticket.id).await.unwrap();
        assert_eq!(agent_row(&h, agent.id).await.status, AgentStatus::Busy);

        tickets::record_customer_message(&h.db, ticket.id, h.clock.now()).await.unwrap();
        h.clock.advance_secs(600);
        assigner.delay.evaluate(ticket.id).await.unwrap();

        assert!(assigner.close_ticket(ticket.id).await.unwrap());
        assert!(!assigner.close_ticket(ticket.id).await.unwrap());

        let row = agent_row(&h, agent.id).await;
        assert_eq!(row.current_active_tickets, 0);
        assert_eq!(row.status, AgentStatus::Available);
        let closed = h.ticket(&ticket).await.unwrap();
        assert_eq!(closed.status, TicketStatus::Closed);
        assert!(!closed.is_delayed);
        let events = delay_events::list_for_ticket(&h.db, ticket.id).await.unwrap();
        assert_eq!(events[0].end_reason, Some(DelayEndReason::TicketClosed));
    }
}
