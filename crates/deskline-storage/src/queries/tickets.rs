// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ticket lifecycle, conversation timestamps, and delay flags.

use chrono::{DateTime, Utc};
use deskline_core::{AgentId, CustomerId, DesklineError, Ticket, TicketId, TicketStatus};
use rusqlite::{OptionalExtension, params};

use crate::convert::{get_enum, get_opt_ts, get_ts, ts};
use crate::database::{Database, map_tr_err};
use crate::models::NewTicket;

const COLUMNS: &str = "id, ticket_number, customer_id, assigned_agent_id, status, category,
    category_selected_at, last_customer_message_at, last_agent_message_at, first_response_at,
    is_delayed, delay_started_at, delay_count, message_count, created_at, closed_at";

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Ticket> {
    Ok(Ticket {
        id: TicketId(row.get(0)?),
        ticket_number: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        customer_id: CustomerId(row.get(2)?),
        assigned_agent_id: row.get::<_, Option<i64>>(3)?.map(AgentId),
        status: get_enum(row, 4)?,
        category: row.get(5)?,
        category_selected_at: get_opt_ts(row, 6)?,
        last_customer_message_at: get_opt_ts(row, 7)?,
        last_agent_message_at: get_opt_ts(row, 8)?,
        first_response_at: get_opt_ts(row, 9)?,
        is_delayed: row.get(10)?,
        delay_started_at: get_opt_ts(row, 11)?,
        delay_count: row.get(12)?,
        message_count: row.get(13)?,
        created_at: get_ts(row, 14)?,
        closed_at: get_opt_ts(row, 15)?,
    })
}

fn select_one(conn: &rusqlite::Connection, id: i64) -> rusqlite::Result<Option<Ticket>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM tickets WHERE id = ?1"),
        params![id],
        from_row,
    )
    .optional()
}

/// Create a ticket numbered `TKT-YYYYMMDD-NNNNN`.
pub async fn create_ticket(
    db: &Database,
    new: NewTicket,
    now: DateTime<Utc>,
) -> Result<Ticket, DesklineError> {
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO tickets (customer_id, assigned_agent_id, status, category, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    new.customer_id.0,
                    new.assigned_agent_id.map(|a| a.0),
                    new.status.to_string(),
                    new.category,
                    ts(now)
                ],
            )?;
            let id = tx.last_insert_rowid();
            let number = format!("TKT-{}-{id:05}", now.format("%Y%m%d"));
            tx.execute(
                "UPDATE tickets SET ticket_number = ?2 WHERE id = ?1",
                params![id, number],
            )?;
            let ticket = select_one(&tx, id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            tx.commit()?;
            Ok(ticket)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_ticket(db: &Database, id: TicketId) -> Result<Option<Ticket>, DesklineError> {
    db.connection()
        .call(move |conn| select_one(conn, id.0))
        .await
        .map_err(map_tr_err)
}

/// Most recent ticket of the customer that is not closed.
pub async fn find_active_for_customer(
    db: &Database,
    customer_id: CustomerId,
) -> Result<Option<Ticket>, DesklineError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {COLUMNS} FROM tickets
                     WHERE customer_id = ?1 AND status IN ('pending', 'open', 'follow_up')
                     ORDER BY created_at DESC, id DESC LIMIT 1"
                ),
                params![customer_id.0],
                from_row,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Tickets whose delay state may need re-evaluation.
pub async fn delay_candidates(db: &Database) -> Result<Vec<Ticket>, DesklineError> {
    db.connection()
        .call(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM tickets
                 WHERE status IN ('open', 'follow_up') OR is_delayed = 1
                 ORDER BY id"
            ))?;
            let rows = stmt.query_map([], from_row)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Pending tickets waiting for an agent, oldest first.
pub async fn unassigned(db: &Database) -> Result<Vec<Ticket>, DesklineError> {
    db.connection()
        .call(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM tickets
                 WHERE assigned_agent_id IS NULL AND status IN ('pending', 'open', 'follow_up')
                 ORDER BY created_at, id"
            ))?;
            let rows = stmt.query_map([], from_row)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn record_customer_message(
    db: &Database,
    id: TicketId,
    at: DateTime<Utc>,
) -> Result<(), DesklineError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE tickets
                 SET last_customer_message_at = MAX(COALESCE(last_customer_message_at, ''), ?2),
                     message_count = message_count + 1
                 WHERE id = ?1",
                params![id.0, ts(at)],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Stamp an agent reply; the first one also becomes the first response.
pub async fn record_agent_message(
    db: &Database,
    id: TicketId,
    at: DateTime<Utc>,
) -> Result<(), DesklineError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE tickets
                 SET last_agent_message_at = MAX(COALESCE(last_agent_message_at, ''), ?2),
                     first_response_at = COALESCE(first_response_at, ?2),
                     message_count = message_count + 1
                 WHERE id = ?1",
                params![id.0, ts(at)],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Count a system message without touching either side's timestamps.
pub async fn record_system_message(db: &Database, id: TicketId) -> Result<(), DesklineError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE tickets SET message_count = message_count + 1 WHERE id = ?1",
                params![id.0],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Assign an unassigned ticket. Pending tickets open on assignment.
pub async fn assign(
    db: &Database,
    id: TicketId,
    agent_id: AgentId,
) -> Result<bool, DesklineError> {
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE tickets
                 SET assigned_agent_id = ?2,
                     status = CASE WHEN status = 'pending' THEN 'open' ELSE status END
                 WHERE id = ?1 AND assigned_agent_id IS NULL AND status != 'closed'",
                params![id.0, agent_id.0],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn set_category(
    db: &Database,
    id: TicketId,
    category: String,
    at: DateTime<Utc>,
) -> Result<(), DesklineError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE tickets SET category = ?2, category_selected_at = ?3 WHERE id = ?1",
                params![id.0, category, ts(at)],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Change status. Closing stamps `closed_at` and clears the delay flag.
pub async fn set_status(
    db: &Database,
    id: TicketId,
    status: TicketStatus,
    at: DateTime<Utc>,
) -> Result<bool, DesklineError> {
    db.connection()
        .call(move |conn| {
            let changed = if status == TicketStatus::Closed {
                conn.execute(
                    "UPDATE tickets
                     SET status = 'closed', closed_at = ?2, is_delayed = 0, delay_started_at = NULL
                     WHERE id = ?1 AND status != 'closed'",
                    params![id.0, ts(at)],
                )?
            } else {
                conn.execute(
                    "UPDATE tickets SET status = ?2, closed_at = NULL WHERE id = ?1",
                    params![id.0, status.to_string()],
                )?
            };
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Enter the delayed state. Returns `false` if the ticket was already delayed.
pub async fn start_delay(
    db: &Database,
    id: TicketId,
    started_at: DateTime<Utc>,
) -> Result<bool, DesklineError> {
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE tickets
                 SET is_delayed = 1, delay_started_at = ?2, delay_count = delay_count + 1
                 WHERE id = ?1 AND is_delayed = 0",
                params![id.0, ts(started_at)],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Leave the delayed state. Returns `false` if the ticket was not delayed.
pub async fn clear_delay(db: &Database, id: TicketId) -> Result<bool, DesklineError> {
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE tickets SET is_delayed = 0, delay_started_at = NULL
                 WHERE id = ?1 AND is_delayed = 1",
                params![id.0],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}
