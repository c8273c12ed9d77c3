// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message persistence and delivery-state transitions.
//!
//! Every transition is a conditional `UPDATE ... WHERE state = <expected>`;
//! a zero row count means another worker got there first.

use chrono::{DateTime, Utc};
use deskline_core::{
    AgentId, DeliveryState, DesklineError, ErrorKind, FailureOutcome, MediaRef, Message,
    MessageId, QueueStats, SenderKind, TicketId, backoff_delay,
};
use rusqlite::{OptionalExtension, params};

use crate::convert::{get_enum, get_opt_enum, get_opt_ts, get_ts, is_constraint_violation, ts};
use crate::database::{Database, map_tr_err};
use crate::models::NewMessage;

const COLUMNS: &str = "id, ticket_id, direction, sender, sender_agent_id, body, media_url,
    media_mime, provider_message_id, content_hash, state, retry_count, last_retry_at,
    error_kind, error_detail, sent_at, delivered_at, created_at";

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let media_url: Option<String> = row.get(6)?;
    let media_mime: Option<String> = row.get(7)?;
    Ok(Message {
        id: MessageId(row.get(0)?),
        ticket_id: TicketId(row.get(1)?),
        direction: get_enum(row, 2)?,
        sender: get_enum(row, 3)?,
        sender_agent_id: row.get::<_, Option<i64>>(4)?.map(AgentId),
        body: row.get(5)?,
        media: media_url.map(|url| MediaRef {
            url,
            mime: media_mime,
        }),
        provider_message_id: row.get(8)?,
        content_hash: row.get(9)?,
        state: get_enum(row, 10)?,
        retry_count: row.get(11)?,
        last_retry_at: get_opt_ts(row, 12)?,
        error_kind: get_opt_enum(row, 13)?,
        error_detail: row.get(14)?,
        sent_at: get_opt_ts(row, 15)?,
        delivered_at: get_opt_ts(row, 16)?,
        created_at: get_ts(row, 17)?,
    })
}

/// Insert a message. Returns `Duplicate` when its provider id already exists.
pub async fn insert_message(
    db: &Database,
    new: NewMessage,
    now: DateTime<Utc>,
) -> Result<MessageId, DesklineError> {
    let ticket_id = new.ticket_id;
    let inserted = db
        .connection()
        .call(move |conn| -> Result<Option<i64>, rusqlite::Error> {
            let (media_url, media_mime) = match new.media {
                Some(m) => (Some(m.url), m.mime),
                None => (None, None),
            };
            let result = conn.execute(
                "INSERT INTO messages (ticket_id, direction, sender, sender_agent_id, body,
                     media_url, media_mime, provider_message_id, content_hash, state,
                     sent_at, delivered_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    new.ticket_id.0,
                    new.direction.to_string(),
                    new.sender.to_string(),
                    new.sender_agent_id.map(|a| a.0),
                    new.body,
                    media_url,
                    media_mime,
                    new.provider_message_id,
                    new.content_hash,
                    new.state.to_string(),
                    new.sent_at
                        .or_else(|| {
                            matches!(new.state, DeliveryState::Sent | DeliveryState::Delivered)
                                .then_some(now)
                        })
                        .map(ts),
                    (new.state == DeliveryState::Delivered).then(|| ts(now)),
                    ts(now),
                ],
            );
            match result {
                Ok(_) => Ok(Some(conn.last_insert_rowid())),
                Err(e) if is_constraint_violation(&e) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(map_tr_err)?;

    inserted
        .map(MessageId)
        .ok_or(DesklineError::Duplicate { ticket_id })
}

pub async fn get_message(db: &Database, id: MessageId) -> Result<Option<Message>, DesklineError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM messages WHERE id = ?1"),
                params![id.0],
                from_row,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn list_for_ticket(db: &Database, ticket_id: TicketId) -> Result<Vec<Message>, DesklineError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM messages WHERE ticket_id = ?1 ORDER BY created_at, id"
            ))?;
            let rows = stmt.query_map(params![ticket_id.0], from_row)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Outgoing message on `ticket_id` with the same content hash created at or after `since`.
pub async fn find_recent_by_hash(
    db: &Database,
    ticket_id: TicketId,
    content_hash: String,
    since: DateTime<Utc>,
) -> Result<Option<MessageId>, DesklineError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT id FROM messages
                 WHERE ticket_id = ?1 AND direction = 'outgoing'
                   AND content_hash = ?2 AND created_at >= ?3
                 ORDER BY id DESC LIMIT 1",
                params![ticket_id.0, content_hash, ts(since)],
                |row| row.get(0),
            )
            .optional()
        })
        .await
        .map(|id| id.map(MessageId))
        .map_err(map_tr_err)
}

pub async fn provider_id_exists(db: &Database, provider_message_id: String) -> Result<bool, DesklineError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM messages WHERE provider_message_id = ?1)",
                params![provider_message_id],
                |row| row.get(0),
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Whether the customer sent the same body on this ticket at or after `since`.
pub async fn recent_customer_body_exists(
    db: &Database,
    ticket_id: TicketId,
    body: String,
    since: DateTime<Utc>,
) -> Result<bool, DesklineError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT EXISTS(
                     SELECT 1 FROM messages
                     WHERE ticket_id = ?1 AND direction = 'incoming' AND sender = ?2
                       AND body = ?3 AND created_at >= ?4)",
                params![ticket_id.0, SenderKind::Customer.to_string(), body, ts(since)],
                |row| row.get(0),
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Oldest pending outgoing messages whose backoff has elapsed.
///
/// Rows are scanned in `created_at` order and filtered with the backoff table
/// on the database thread; at most `limit` are returned.
pub async fn due_pending(
    db: &Database,
    now: DateTime<Utc>,
    retry_delays_secs: Vec<u64>,
    max_retries: u32,
    limit: u32,
) -> Result<Vec<Message>, DesklineError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM messages
                 WHERE direction = 'outgoing' AND state = 'pending' AND retry_count < ?1
                 ORDER BY created_at, id"
            ))?;
            let mut rows = stmt.query(params![max_retries])?;
            let mut due = Vec::new();
            while let Some(row) = rows.next()? {
                if due.len() >= limit as usize {
                    break;
                }
                let message = from_row(row)?;
                let wait = backoff_delay(&retry_delays_secs, message.retry_count);
                let ready = match message.last_retry_at {
                    Some(last) => now.signed_duration_since(last).to_std().unwrap_or_default() >= wait,
                    None => true,
                };
                if ready {
                    due.push(message);
                }
            }
            Ok(due)
        })
        .await
        .map_err(map_tr_err)
}

/// `pending -> sending`. Only one caller can win a given row.
pub async fn claim(db: &Database, id: MessageId, now: DateTime<Utc>) -> Result<bool, DesklineError> {
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE messages SET state = 'sending', claimed_at = ?2
                 WHERE id = ?1 AND state = 'pending'",
                params![id.0, ts(now)],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Move a held claim's stamp to `now`. Fails when the claim recorded at
/// `held` was recovered or taken over since.
pub async fn restamp_claim(
    db: &Database,
    id: MessageId,
    held: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<bool, DesklineError> {
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE messages SET claimed_at = ?3
                 WHERE id = ?1 AND state = 'sending' AND claimed_at = ?2",
                params![id.0, ts(held), ts(now)],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// `sending -> sent`, recording the provider id. Only the holder of the claim
/// stamped `claimed_at` can complete it.
pub async fn mark_sent(
    db: &Database,
    id: MessageId,
    claimed_at: DateTime<Utc>,
    provider_message_id: Option<String>,
    now: DateTime<Utc>,
) -> Result<bool, DesklineError> {
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE messages
                 SET state = 'sent', provider_message_id = ?2, sent_at = ?3,
                     claimed_at = NULL, error_kind = NULL, error_detail = NULL
                 WHERE id = ?1 AND state = 'sending' AND claimed_at = ?4",
                params![id.0, provider_message_id, ts(now), ts(claimed_at)],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// `sending -> pending` without consuming an attempt.
pub async fn release_claim(
    db: &Database,
    id: MessageId,
    claimed_at: DateTime<Utc>,
) -> Result<bool, DesklineError> {
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE messages SET state = 'pending', claimed_at = NULL
                 WHERE id = ?1 AND state = 'sending' AND claimed_at = ?2",
                params![id.0, ts(claimed_at)],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Apply a failed attempt computed by `outcome_after_failure`.
pub async fn record_failure(
    db: &Database,
    id: MessageId,
    claimed_at: DateTime<Utc>,
    outcome: FailureOutcome,
    kind: ErrorKind,
    detail: String,
    now: DateTime<Utc>,
) -> Result<bool, DesklineError> {
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE messages
                 SET state = ?2, retry_count = ?3,
                     last_retry_at = CASE WHEN ?4 THEN ?5 ELSE last_retry_at END,
                     error_kind = ?6, error_detail = ?7, claimed_at = NULL
                 WHERE id = ?1 AND state = 'sending' AND claimed_at = ?8",
                params![
                    id.0,
                    outcome.state.to_string(),
                    outcome.retry_count,
                    outcome.counts_as_attempt,
                    ts(now),
                    kind.to_string(),
                    detail,
                    ts(claimed_at)
                ],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// `sent -> delivered` by provider id. Returns the message when it advanced.
pub async fn mark_delivered(
    db: &Database,
    provider_message_id: String,
    now: DateTime<Utc>,
) -> Result<Option<(MessageId, TicketId)>, DesklineError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "UPDATE messages SET state = 'delivered', delivered_at = ?2
                 WHERE provider_message_id = ?1 AND state = 'sent'
                 RETURNING id, ticket_id",
                params![provider_message_id, ts(now)],
                |row| Ok((MessageId(row.get(0)?), TicketId(row.get(1)?))),
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Reset recent failed messages that still have attempts left.
pub async fn reset_failed(
    db: &Database,
    since: DateTime<Utc>,
    max_retries: u32,
) -> Result<u64, DesklineError> {
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE messages
                 SET state = 'pending', error_kind = NULL, error_detail = NULL, claimed_at = NULL
                 WHERE direction = 'outgoing' AND state = 'failed'
                   AND retry_count < ?1 AND created_at >= ?2",
                params![max_retries, ts(since)],
            )?;
            Ok(changed as u64)
        })
        .await
        .map_err(map_tr_err)
}

/// Give one failed message a fresh set of attempts, unless it cannot be routed.
pub async fn requeue(db: &Database, id: MessageId) -> Result<bool, DesklineError> {
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE messages
                 SET state = 'pending', retry_count = 0, last_retry_at = NULL,
                     error_kind = NULL, error_detail = NULL, claimed_at = NULL
                 WHERE id = ?1 AND direction = 'outgoing' AND state = 'failed'
                   AND COALESCE(error_kind, '') != 'invalid_recipient'",
                params![id.0],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Return abandoned `sending` rows to the queue, counting the lost attempt.
pub async fn recover_stale(
    db: &Database,
    claimed_before: DateTime<Utc>,
    max_retries: u32,
    now: DateTime<Utc>,
) -> Result<u64, DesklineError> {
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE messages
                 SET retry_count = MIN(retry_count + 1, ?2),
                     state = CASE WHEN retry_count + 1 >= ?2 THEN 'failed' ELSE 'pending' END,
                     last_retry_at = ?3,
                     error_kind = 'transient_provider_error',
                     error_detail = 'send attempt abandoned before completion',
                     claimed_at = NULL
                 WHERE state = 'sending' AND claimed_at IS NOT NULL AND claimed_at <= ?1",
                params![ts(claimed_before), max_retries, ts(now)],
            )?;
            Ok(changed as u64)
        })
        .await
        .map_err(map_tr_err)
}

/// Outgoing message counts grouped by delivery state.
pub async fn queue_stats(db: &Database) -> Result<QueueStats, DesklineError> {
    db.connection()
        .call(|conn| {
            let mut stmt = conn.prepare(
                "SELECT state, COUNT(*) FROM messages WHERE direction = 'outgoing' GROUP BY state",
            )?;
            let mut rows = stmt.query([])?;
            let mut stats = QueueStats::default();
            while let Some(row) = rows.next()? {
                let state: DeliveryState = get_enum(row, 0)?;
                let count = row.get::<_, i64>(1)? as u64;
                match state {
                    DeliveryState::Pending => stats.pending = count,
                    DeliveryState::Sending => stats.sending = count,
                    DeliveryState::Sent => stats.sent = count,
                    DeliveryState::Delivered => stats.delivered = count,
                    DeliveryState::Failed => stats.failed = count,
                }
                stats.total += count;
            }
            Ok(stats)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewCustomer, NewTicket};
    use crate::queries::customers::insert_customer;
    use crate::queries::test_support::{at, setup_db};
    use crate::queries::tickets::create_ticket;
    use deskline_core::{Direction, TicketStatus, outcome_after_failure};

    async fn seed_ticket(db: &Database) -> TicketId {
        let customer = insert_customer(
            db,
            NewCustomer {
                phone_number: "201001234567".into(),
                ..Default::default()
            },
            at(8, 0, 0),
        )
        .await
        .unwrap();
        create_ticket(
            db,
            NewTicket {
                customer_id: customer.id,
                assigned_agent_id: None,
                status: TicketStatus::Open,
                category: None,
            },
            at(8, 0, 0),
        )
        .await
        .unwrap()
        .id
    }

    fn outgoing(ticket_id: TicketId, body: &str) -> NewMessage {
        NewMessage {
            ticket_id,
            direction: Direction::Outgoing,
            sender: SenderKind::Agent,
            sender_agent_id: None,
            body: body.into(),
            media: None,
            provider_message_id: None,
            content_hash: Some(format!("hash-{body}")),
            state: DeliveryState::Pending,
            sent_at: None,
        }
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let (db, _dir) = setup_db().await;
        let t = seed_ticket(&db).await;
        let id = insert_message(&db, outgoing(t, "hi"), at(9, 0, 0)).await.unwrap();

        assert!(claim(&db, id, at(9, 0, 1)).await.unwrap());
        assert!(!claim(&db, id, at(9, 0, 1)).await.unwrap());
        assert!(mark_sent(&db, id, at(9, 0, 1), Some("wamid.1".into()), at(9, 0, 2)).await.unwrap());

        let m = get_message(&db, id).await.unwrap().unwrap();
        assert_eq!(m.state, DeliveryState::Sent);
        assert_eq!(m.provider_message_id.as_deref(), Some("wamid.1"));
        assert_eq!(m.sent_at, Some(at(9, 0, 2)));

        let delivered = mark_delivered(&db, "wamid.1".into(), at(9, 1, 0)).await.unwrap();
        assert_eq!(delivered, Some((id, t)));
        assert!(mark_delivered(&db, "wamid.1".into(), at(9, 1, 0)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recovered_claim_cannot_be_completed_by_its_old_holder() {
        let (db, _dir) = setup_db().await;
        let t = seed_ticket(&db).await;
        let id = insert_message(&db, outgoing(t, "hi"), at(9, 0, 0)).await.unwrap();

        assert!(claim(&db, id, at(9, 0, 0)).await.unwrap());
        assert!(restamp_claim(&db, id, at(9, 0, 0), at(9, 0, 4)).await.unwrap());
        assert!(!restamp_claim(&db, id, at(9, 0, 0), at(9, 0, 5)).await.unwrap());

        assert_eq!(recover_stale(&db, at(9, 5, 0), 3, at(9, 5, 0)).await.unwrap(), 1);
        assert!(claim(&db, id, at(9, 5, 1)).await.unwrap());

        // The first holder's stamps no longer match the row.
        assert!(!restamp_claim(&db, id, at(9, 0, 4), at(9, 5, 2)).await.unwrap());
        assert!(!mark_sent(&db, id, at(9, 0, 4), Some("wamid.old".into()), at(9, 5, 2)).await.unwrap());
        let out = outcome_after_failure(ErrorKind::TransientProviderError, 1, 3);
        assert!(
            !record_failure(&db, id, at(9, 0, 4), out, ErrorKind::TransientProviderError, "x".into(), at(9, 5, 2))
                .await
                .unwrap()
        );
        assert!(!release_claim(&db, id, at(9, 0, 4)).await.unwrap());

        assert!(mark_sent(&db, id, at(9, 5, 1), Some("wamid.new".into()), at(9, 5, 3)).await.unwrap());
        let m = get_message(&db, id).await.unwrap().unwrap();
        assert_eq!(m.state, DeliveryState::Sent);
        assert_eq!(m.provider_message_id.as_deref(), Some("wamid.new"));
    }

    #[tokio::test]
    async fn duplicate_provider_id_is_rejected() {
        let (db, _dir) = setup_db().await;
        let t = seed_ticket(&db).await;
        let mut incoming = outgoing(t, "hello");
        incoming.direction = Direction::Incoming;
        incoming.sender = SenderKind::Customer;
        incoming.state = DeliveryState::Delivered;
        incoming.provider_message_id = Some("in-1".into());

        insert_message(&db, incoming.clone(), at(9, 0, 0)).await.unwrap();
        let err = insert_message(&db, incoming, at(9, 0, 1)).await.unwrap_err();
        assert!(err.is_duplicate());
        assert!(provider_id_exists(&db, "in-1".into()).await.unwrap());
    }

    #[tokio::test]
    async fn due_pending_honours_backoff_and_order() {
        let (db, _dir) = setup_db().await;
        let t = seed_ticket(&db).await;
        let first = insert_message(&db, outgoing(t, "a"), at(9, 0, 0)).await.unwrap();
        let second = insert_message(&db, outgoing(t, "b"), at(9, 0, 1)).await.unwrap();

        // First message fails once at 9:00:10 and must wait 5s.
        claim(&db, first, at(9, 0, 10)).await.unwrap();
        let out = outcome_after_failure(ErrorKind::TransientProviderError, 0, 3);
        record_failure(
            &db,
            first,
            at(9, 0, 10),
            out,
            ErrorKind::TransientProviderError,
            "503".into(),
            at(9, 0, 10),
        )
        .await
        .unwrap();

        let delays = vec![5, 30, 120];
        let due = due_pending(&db, at(9, 0, 12), delays.clone(), 3, 10).await.unwrap();
        assert_eq!(due.iter().map(|m| m.id).collect::<Vec<_>>(), vec![second]);

        let due = due_pending(&db, at(9, 0, 15), delays.clone(), 3, 10).await.unwrap();
        assert_eq!(due.iter().map(|m| m.id).collect::<Vec<_>>(), vec![first, second]);

        let due = due_pending(&db, at(9, 0, 15), delays, 3, 1).await.unwrap();
        assert_eq!(due.len(), 1);
    }

    #[tokio::test]
    async fn reset_and_requeue_rules() {
        let (db, _dir) = setup_db().await;
        let t = seed_ticket(&db).await;
        let exhausted = insert_message(&db, outgoing(t, "a"), at(9, 0, 0)).await.unwrap();
        let unroutable = insert_message(&db, outgoing(t, "b"), at(9, 0, 0)).await.unwrap();

        for (id, kind) in [
            (exhausted, ErrorKind::PermanentProviderError),
            (unroutable, ErrorKind::InvalidRecipient),
        ] {
            claim(&db, id, at(9, 0, 1)).await.unwrap();
            let out = outcome_after_failure(kind, 0, 3);
            record_failure(&db, id, at(9, 0, 1), out, kind, "rejected".into(), at(9, 0, 1))
                .await
                .unwrap();
        }

        // Both sit at max retries, so the bulk reset leaves them alone.
        assert_eq!(reset_failed(&db, at(8, 0, 0), 3).await.unwrap(), 0);
        // Raising the limit makes them eligible again.
        assert_eq!(reset_failed(&db, at(8, 0, 0), 5).await.unwrap(), 2);

        for id in [exhausted, unroutable] {
            claim(&db, id, at(9, 1, 0)).await.unwrap();
            let out = outcome_after_failure(ErrorKind::InvalidRecipient, 3, 3);
            record_failure(&db, id, at(9, 1, 0), out, ErrorKind::InvalidRecipient, "lid".into(), at(9, 1, 0))
                .await
                .unwrap();
        }
        assert!(!requeue(&db, unroutable).await.unwrap());

        let stats = queue_stats(&db).await.unwrap();
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.total, 2);
    }

    #[tokio::test]
    async fn stale_claims_return_to_pending() {
        let (db, _dir) = setup_db().await;
        let t = seed_ticket(&db).await;
        let id = insert_message(&db, outgoing(t, "a"), at(9, 0, 0)).await.unwrap();
        claim(&db, id, at(9, 0, 0)).await.unwrap();

        assert_eq!(recover_stale(&db, at(8, 59, 0), 3, at(9, 10, 0)).await.unwrap(), 0);
        assert_eq!(recover_stale(&db, at(9, 5, 0), 3, at(9, 10, 0)).await.unwrap(), 1);

        let m = get_message(&db, id).await.unwrap().unwrap();
        assert_eq!(m.state, DeliveryState::Pending);
        assert_eq!(m.retry_count, 1);
        assert_eq!(m.error_kind, Some(ErrorKind::TransientProviderError));
    }
}
