// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Agent presence and capacity counters.
//!
//! Capacity is claimed with one conditional `UPDATE`, so two concurrent
//! assignments can never push an agent past `max_capacity`.

use chrono::{DateTime, Utc};
use deskline_core::{Agent, AgentId, DesklineError};
use rusqlite::{OptionalExtension, params};

use crate::convert::{get_enum, get_opt_ts, ts};
use crate::database::{Database, map_tr_err};
use crate::models::NewAgent;

const COLUMNS: &str = "id, user_id, display_name, is_online, is_on_break, break_started_at,
    status, current_active_tickets, max_capacity, last_assigned_at";

/// Eligibility predicate shared by the candidate scan and the claim.
const ELIGIBLE: &str = "is_online = 1 AND is_on_break = 0 AND status != 'busy'
    AND current_active_tickets < max_capacity";

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Agent> {
    Ok(Agent {
        id: AgentId(row.get(0)?),
        user_id: row.get(1)?,
        display_name: row.get(2)?,
        is_online: row.get(3)?,
        is_on_break: row.get(4)?,
        break_started_at: get_opt_ts(row, 5)?,
        status: get_enum(row, 6)?,
        current_active_tickets: row.get(7)?,
        max_capacity: row.get(8)?,
        last_assigned_at: get_opt_ts(row, 9)?,
    })
}

pub async fn insert_agent(db: &Database, new: NewAgent) -> Result<Agent, DesklineError> {
    db.connection()
        .call(move |conn| {
            let status = if new.is_online { "available" } else { "offline" };
            conn.execute(
                "INSERT INTO agents (user_id, display_name, is_online, status, max_capacity)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    new.user_id,
                    new.display_name,
                    new.is_online,
                    status,
                    new.max_capacity
                ],
            )?;
            let id = conn.last_insert_rowid();
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM agents WHERE id = ?1"),
                params![id],
                from_row,
            )
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_agent(db: &Database, id: AgentId) -> Result<Option<Agent>, DesklineError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM agents WHERE id = ?1"),
                params![id.0],
                from_row,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn list_agents(db: &Database) -> Result<Vec<Agent>, DesklineError> {
    db.connection()
        .call(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM agents ORDER BY id"))?;
            let rows = stmt.query_map([], from_row)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Eligible agents, least loaded first, then longest since last assignment.
pub async fn eligible_agents(db: &Database) -> Result<Vec<Agent>, DesklineError> {
    db.connection()
        .call(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM agents
                 WHERE {ELIGIBLE}
                 ORDER BY current_active_tickets ASC,
                          last_assigned_at IS NOT NULL,
                          last_assigned_at ASC,
                          id ASC"
            ))?;
            let rows = stmt.query_map([], from_row)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Take one capacity slot if the agent is still eligible.
///
/// Returns `false` when another caller filled the agent first. The agent
/// becomes `busy` when this claim reaches capacity.
pub async fn try_claim_slot(
    db: &Database,
    id: AgentId,
    now: DateTime<Utc>,
) -> Result<bool, DesklineError> {
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                &format!(
                    "UPDATE agents
                     SET current_active_tickets = current_active_tickets + 1,
                         last_assigned_at = ?2,
                         status = CASE WHEN current_active_tickets + 1 >= max_capacity
                                       THEN 'busy' ELSE status END
                     WHERE id = ?1 AND {ELIGIBLE}"
                ),
                params![id.0, ts(now)],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Give back one slot. A busy agent drops back to available.
pub async fn release_slot(db: &Database, id: AgentId) -> Result<(), DesklineError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE agents
                 SET current_active_tickets = MAX(current_active_tickets - 1, 0),
                     status = CASE WHEN status = 'busy' THEN 'available' ELSE status END
                 WHERE id = ?1",
                params![id.0],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Mark an agent online or offline. Going offline also ends any break.
pub async fn set_online(db: &Database, id: AgentId, online: bool) -> Result<(), DesklineError> {
    db.connection()
        .call(move |conn| {
            let sql = if online {
                "UPDATE agents
                 SET is_online = 1,
                     status = CASE
                         WHEN is_on_break = 1 THEN 'on_break'
                         WHEN current_active_tickets >= max_capacity THEN 'busy'
                         ELSE 'available' END
                 WHERE id = ?1"
            } else {
                "UPDATE agents
                 SET is_online = 0, is_on_break = 0, break_started_at = NULL, status = 'offline'
                 WHERE id = ?1"
            };
            conn.execute(sql, params![id.0])?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn start_break(
    db: &Database,
    id: AgentId,
    now: DateTime<Utc>,
) -> Result<bool, DesklineError> {
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE agents
                 SET is_on_break = 1, break_started_at = ?2, status = 'on_break'
                 WHERE id = ?1 AND is_on_break = 0",
                params![id.0, ts(now)],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn end_break(db: &Database, id: AgentId) -> Result<bool, DesklineError> {
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE agents
                 SET is_on_break = 0,
                     break_started_at = NULL,
                     status = CASE
                         WHEN is_online = 0 THEN 'offline'
                         WHEN current_active_tickets >= max_capacity THEN 'busy'
                         ELSE 'available' END
                 WHERE id = ?1 AND is_on_break = 1",
                params![id.0],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}
