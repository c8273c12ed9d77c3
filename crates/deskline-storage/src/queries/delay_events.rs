// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delay event log. At most one open event exists per ticket.

use chrono::{DateTime, Utc};
use deskline_core::{AgentId, DelayEndReason, DelayEvent, DesklineError, TicketId};
use rusqlite::{OptionalExtension, params};

use crate::convert::{get_opt_enum, get_opt_ts, get_ts, is_constraint_violation, ts};
use crate::database::{Database, map_tr_err};

const COLUMNS: &str = "id, ticket_id, agent_id, started_at, ended_at, duration_secs, end_reason";

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DelayEvent> {
    Ok(DelayEvent {
        id: row.get(0)?,
        ticket_id: TicketId(row.get(1)?),
        agent_id: row.get::<_, Option<i64>>(2)?.map(AgentId),
        started_at: get_ts(row, 3)?,
        ended_at: get_opt_ts(row, 4)?,
        duration_secs: row.get(5)?,
        end_reason: get_opt_enum(row, 6)?,
    })
}

/// Open a delay event. Returns `None` if the ticket already has one open.
pub async fn open_event(
    db: &Database,
    ticket_id: TicketId,
    agent_id: Option<AgentId>,
    started_at: DateTime<Utc>,
) -> Result<Option<i64>, DesklineError> {
    db.connection()
        .call(move |conn| -> Result<Option<i64>, rusqlite::Error> {
            let result = conn.execute(
                "INSERT INTO delay_events (ticket_id, agent_id, started_at) VALUES (?1, ?2, ?3)",
                params![ticket_id.0, agent_id.map(|a| a.0), ts(started_at)],
            );
            match result {
                Ok(_) => Ok(Some(conn.last_insert_rowid())),
                Err(e) if is_constraint_violation(&e) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Close the ticket's open event, recording its duration.
pub async fn close_open_event(
    db: &Database,
    ticket_id: TicketId,
    ended_at: DateTime<Utc>,
    reason: DelayEndReason,
) -> Result<Option<DelayEvent>, DesklineError> {
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let open = tx
                .query_row(
                    &format!(
                        "SELECT {COLUMNS} FROM delay_events WHERE ticket_id = ?1 AND ended_at IS NULL"
                    ),
                    params![ticket_id.0],
                    from_row,
                )
                .optional()?;
            let Some(mut event) = open else {
                return Ok(None);
            };
            let duration = (ended_at - event.started_at).num_seconds().max(0);
            tx.execute(
                "UPDATE delay_events SET ended_at = ?2, duration_secs = ?3, end_reason = ?4
                 WHERE id = ?1",
                params![event.id, ts(ended_at), duration, reason.to_string()],
            )?;
            tx.commit()?;
            event.ended_at = Some(ended_at);
            event.duration_secs = Some(duration);
            event.end_reason = Some(reason);
            Ok(Some(event))
        })
        .await
        .map_err(map_tr_err)
}

pub async fn open_event_for(db: &Database, ticket_id: TicketId) -> Result<Option<DelayEvent>, DesklineError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM delay_events WHERE ticket_id = ?1 AND ended_at IS NULL"),
                params![ticket_id.0],
                from_row,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn list_for_ticket(db: &Database, ticket_id: TicketId) -> Result<Vec<DelayEvent>, DesklineError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM delay_events WHERE ticket_id = ?1 ORDER BY started_at, id"
            ))?;
            let rows = stmt.query_map(params![ticket_id.0], from_row)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}
