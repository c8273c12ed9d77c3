// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-agent daily counters and the `agent_kpis` summary table.

use chrono::{DateTime, NaiveDate, Utc};
use deskline_core::{AgentId, DesklineError};
use rusqlite::{OptionalExtension, params};

use crate::convert::ts;
use crate::database::{Database, map_tr_err};
use crate::models::{AgentKpi, KpiCounts};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Gather raw counts for `agent_id` on `date` (UTC day).
pub async fn day_counts(
    db: &Database,
    agent_id: AgentId,
    date: NaiveDate,
) -> Result<KpiCounts, DesklineError> {
    let day = date.format(DATE_FORMAT).to_string();
    db.connection()
        .call(move |conn| {
            let (total_tickets, closed_tickets, avg_first_response_secs) = conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(status = 'closed'), 0),
                        AVG(CASE WHEN first_response_at IS NOT NULL
                            THEN (julianday(first_response_at) - julianday(created_at)) * 86400.0
                            END)
                 FROM tickets
                 WHERE assigned_agent_id = ?1 AND substr(created_at, 1, 10) = ?2",
                params![agent_id.0, day],
                |row| Ok((row.get::<_, u32>(0)?, row.get::<_, u32>(1)?, row.get::<_, Option<f64>>(2)?)),
            )?;

            let (messages_sent, messages_failed) = conn.query_row(
                "SELECT COALESCE(SUM(state IN ('sent', 'delivered')), 0),
                        COALESCE(SUM(state = 'failed'), 0)
                 FROM messages
                 WHERE direction = 'outgoing' AND sender_agent_id = ?1
                   AND substr(created_at, 1, 10) = ?2",
                params![agent_id.0, day],
                |row| Ok((row.get::<_, u32>(0)?, row.get::<_, u32>(1)?)),
            )?;

            let (delay_count, delayed_tickets, total_delay_secs) = conn.query_row(
                "SELECT COUNT(*), COUNT(DISTINCT ticket_id), COALESCE(SUM(duration_secs), 0)
                 FROM delay_events
                 WHERE agent_id = ?1 AND substr(started_at, 1, 10) = ?2",
                params![agent_id.0, day],
                |row| Ok((row.get::<_, u32>(0)?, row.get::<_, u32>(1)?, row.get::<_, i64>(2)?)),
            )?;

            Ok(KpiCounts {
                total_tickets,
                closed_tickets,
                messages_sent,
                messages_failed,
                delay_count,
                delayed_tickets,
                total_delay_secs,
                avg_first_response_secs,
            })
        })
        .await
        .map_err(map_tr_err)
}

pub async fn upsert_kpi(db: &Database, kpi: AgentKpi, now: DateTime<Utc>) -> Result<(), DesklineError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO agent_kpis (agent_id, kpi_date, total_tickets, closed_tickets,
                     messages_sent, messages_failed, delay_count, delayed_tickets,
                     total_delay_secs, avg_first_response_secs, overall_score, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT (agent_id, kpi_date) DO UPDATE SET
                     total_tickets = excluded.total_tickets,
                     closed_tickets = excluded.closed_tickets,
                     messages_sent = excluded.messages_sent,
                     messages_failed = excluded.messages_failed,
                     delay_count = excluded.delay_count,
                     delayed_tickets = excluded.delayed_tickets,
                     total_delay_secs = excluded.total_delay_secs,
                     avg_first_response_secs = excluded.avg_first_response_secs,
                     overall_score = excluded.overall_score,
                     updated_at = excluded.updated_at",
                params![
                    kpi.agent_id.0,
                    kpi.kpi_date.format(DATE_FORMAT).to_string(),
                    kpi.total_tickets,
                    kpi.closed_tickets,
                    kpi.messages_sent,
                    kpi.messages_failed,
                    kpi.delay_count,
                    kpi.delayed_tickets,
                    kpi.total_delay_secs,
                    kpi.avg_first_response_secs,
                    kpi.overall_score,
                    ts(now),
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_kpi(
    db: &Database,
    agent_id: AgentId,
    date: NaiveDate,
) -> Result<Option<AgentKpi>, DesklineError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT total_tickets, closed_tickets, messages_sent, messages_failed,
                        delay_count, delayed_tickets, total_delay_secs,
                        avg_first_response_secs, overall_score
                 FROM agent_kpis WHERE agent_id = ?1 AND kpi_date = ?2",
                params![agent_id.0, date.format(DATE_FORMAT).to_string()],
                |row| {
                    Ok(AgentKpi {
                        agent_id,
                        kpi_date: date,
                        total_tickets: row.get(0)?,
                        closed_tickets: row.get(1)?,
                        messages_sent: row.get(2)?,
                        messages_failed: row.get(3)?,
                        delay_count: row.get(4)?,
                        delayed_tickets: row.get(5)?,
                        total_delay_secs: row.get(6)?,
                        avg_first_response_secs: row.get(7)?,
                        overall_score: row.get(8)?,
                    })
                },
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}
