// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Customer lookups and contact counters.

use chrono::{DateTime, Utc};
use deskline_core::{Customer, CustomerId, DesklineError};
use rusqlite::{OptionalExtension, params};

use crate::convert::{get_opt_ts, get_ts, ts};
use crate::database::{Database, map_tr_err};
use crate::models::NewCustomer;

const COLUMNS: &str =
    "id, name, phone_number, channel_address, total_tickets, last_contact_at, created_at";

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Customer> {
    Ok(Customer {
        id: CustomerId(row.get(0)?),
        name: row.get(1)?,
        phone_number: row.get(2)?,
        channel_address: row.get(3)?,
        total_tickets: row.get(4)?,
        last_contact_at: get_opt_ts(row, 5)?,
        created_at: get_ts(row, 6)?,
    })
}

pub async fn insert_customer(
    db: &Database,
    new: NewCustomer,
    now: DateTime<Utc>,
) -> Result<Customer, DesklineError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO customers (name, phone_number, channel_address, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![new.name, new.phone_number, new.channel_address, ts(now)],
            )?;
            let id = conn.last_insert_rowid();
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM customers WHERE id = ?1"),
                params![id],
                from_row,
            )
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_customer(db: &Database, id: CustomerId) -> Result<Option<Customer>, DesklineError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM customers WHERE id = ?1"),
                params![id.0],
                from_row,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Find a customer by normalized phone or by channel address, oldest first.
pub async fn find_by_contact(
    db: &Database,
    phone: Option<String>,
    channel_address: String,
) -> Result<Option<Customer>, DesklineError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {COLUMNS} FROM customers
                     WHERE (?1 IS NOT NULL AND phone_number = ?1) OR channel_address = ?2
                     ORDER BY id ASC LIMIT 1"
                ),
                params![phone, channel_address],
                from_row,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Stamp the last contact and optionally count a new ticket.
pub async fn record_contact(
    db: &Database,
    id: CustomerId,
    at: DateTime<Utc>,
    opened_ticket: bool,
) -> Result<(), DesklineError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE customers
                 SET last_contact_at = ?2,
                     total_tickets = total_tickets + ?3
                 WHERE id = ?1",
                params![id.0, ts(at), i64::from(opened_ticket)],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Fill in a channel address learned from a later inbound message.
pub async fn set_channel_address(
    db: &Database,
    id: CustomerId,
    channel_address: String,
) -> Result<(), DesklineError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE customers SET channel_address = ?2 WHERE id = ?1",
                params![id.0, channel_address],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}
