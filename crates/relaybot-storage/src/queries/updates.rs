// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Update ingest and the update-job queue.
//!
//! `accept_update` is the single-transaction ingest procedure shared by
//! the webhook and the poller: insert the raw envelope keyed by
//! (bot_id, update_id), and on success enqueue the matching job. The
//! primary-key conflict on the envelope IS the deduplication mechanism.

use relaybot_core::RelayError;
use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

use crate::database::{Database, is_unique_violation, map_tr_err};
use crate::models::UpdateJobLease;
use crate::queries::{MAX_ATTEMPTS, retry_backoff_ms};

/// Accept one inbound update. Returns `false` when the update was a
/// duplicate and nothing was enqueued.
pub async fn accept_update(
    db: &Database,
    bot_id: &str,
    update_id: i64,
    chat_id: Option<String>,
    payload_json: String,
    now: i64,
) -> Result<bool, RelayError> {
    let bot_id = bot_id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let inserted = tx.execute(
                "INSERT INTO telegram_updates (bot_id, update_id, chat_id, payload_json, received_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![bot_id, update_id, chat_id, payload_json, now],
            );
            match inserted {
                Ok(_) => {}
                Err(err) if is_unique_violation(&err, "telegram_updates") => {
                    tx.commit()?;
                    return Ok(false);
                }
                Err(err) => return Err(err.into()),
            }
            tx.execute(
                "INSERT INTO telegram_update_jobs
                     (id, bot_id, update_id, status, lease_owner, lease_expires_at,
                      available_at, attempts, last_error, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'queued', NULL, NULL, ?4, 0, NULL, ?4, ?4)",
                params![Uuid::new_v4().to_string(), bot_id, update_id, now],
            )?;
            tx.commit()?;
            Ok(true)
        })
        .await
        .map_err(map_tr_err)
}

/// Atomically claim the oldest runnable update job for this bot.
///
/// A job is runnable when it is queued, or when its lease has expired.
/// Claiming increments `attempts` and stamps the new lease.
pub async fn lease_next_update_job(
    db: &Database,
    bot_id: &str,
    owner: &str,
    now: i64,
    lease_ms: i64,
) -> Result<Option<UpdateJobLease>, RelayError> {
    let bot_id = bot_id.to_string();
    let owner = owner.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let row = tx
                .query_row(
                    "SELECT id, update_id FROM telegram_update_jobs
                     WHERE bot_id = ?1
                       AND available_at <= ?2
                       AND (
                         status = 'queued'
                         OR (status = 'leased'
                             AND lease_expires_at IS NOT NULL
                             AND lease_expires_at < ?2)
                       )
                     ORDER BY available_at ASC, created_at ASC
                     LIMIT 1",
                    params![bot_id, now],
                    |row| {
                        Ok(UpdateJobLease {
                            id: row.get(0)?,
                            update_id: row.get(1)?,
                        })
                    },
                )
                .optional()?;

            let Some(lease) = row else {
                tx.commit()?;
                return Ok(None);
            };

            tx.execute(
                "UPDATE telegram_update_jobs
                 SET status = 'leased', lease_owner = ?1, lease_expires_at = ?2,
                     attempts = attempts + 1, updated_at = ?3
                 WHERE id = ?4",
                params![owner, now + lease_ms, now, lease.id],
            )?;
            tx.commit()?;
            Ok(Some(lease))
        })
        .await
        .map_err(map_tr_err)
}

/// Extend the lease deadline; only meaningful while still leased.
pub async fn renew_update_job_lease(
    db: &Database,
    job_id: &str,
    now: i64,
    lease_ms: i64,
) -> Result<(), RelayError> {
    let job_id = job_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE telegram_update_jobs
                 SET lease_expires_at = ?1, updated_at = ?2
                 WHERE id = ?3 AND status = 'leased'",
                params![now + lease_ms, now, job_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn complete_update_job(db: &Database, job_id: &str, now: i64) -> Result<(), RelayError> {
    let job_id = job_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE telegram_update_jobs
                 SET status = 'completed', lease_owner = NULL, lease_expires_at = NULL,
                     updated_at = ?1
                 WHERE id = ?2",
                params![now, job_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Record a failure. Below the attempts cap the job is requeued with
/// exponential backoff; at the cap it stays failed.
pub async fn fail_update_job(
    db: &Database,
    job_id: &str,
    now: i64,
    error: &str,
) -> Result<(), RelayError> {
    let job_id = job_id.to_string();
    let error: String = error.chars().take(2000).collect();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let attempts: i64 = tx
                .query_row(
                    "SELECT attempts FROM telegram_update_jobs WHERE id = ?1",
                    params![job_id],
                    |row| row.get(0),
                )
                .optional()?
                .unwrap_or(0);

            if attempts < MAX_ATTEMPTS {
                tx.execute(
                    "UPDATE telegram_update_jobs
                     SET status = 'queued', lease_owner = NULL, lease_expires_at = NULL,
                         available_at = ?1, last_error = ?2, updated_at = ?3
                     WHERE id = ?4",
                    params![now + retry_backoff_ms(attempts), error, now, job_id],
                )?;
            } else {
                tx.execute(
                    "UPDATE telegram_update_jobs
                     SET status = 'failed', lease_owner = NULL, lease_expires_at = NULL,
                         last_error = ?1, updated_at = ?2
                     WHERE id = ?3",
                    params![error, now, job_id],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Load the raw envelope stored at ingest time.
pub async fn get_update_payload(
    db: &Database,
    bot_id: &str,
    update_id: i64,
) -> Result<Option<String>, RelayError> {
    let bot_id = bot_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT payload_json FROM telegram_updates
                 WHERE bot_id = ?1 AND update_id = ?2",
                params![bot_id, update_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
        })
        .await
        .map_err(map_tr_err)
}

/// Highest update_id ever ingested for this bot; seeds the poller offset.
pub async fn get_max_update_id(db: &Database, bot_id: &str) -> Result<Option<i64>, RelayError> {
    let bot_id = bot_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT MAX(update_id) FROM telegram_updates WHERE bot_id = ?1",
                params![bot_id],
                |row| row.get::<_, Option<i64>>(0),
            )
            .map_err(Into::into)
        })
        .await
        .map_err(map_tr_err)
}

/// Drop all ingest state for this bot. Used by the poller against local
/// mock platforms whose update_id counter resets on restart.
pub async fn reset_ingest_state(db: &Database, bot_id: &str) -> Result<(), RelayError> {
    let bot_id = bot_id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM telegram_update_jobs WHERE bot_id = ?1",
                params![bot_id],
            )?;
            tx.execute(
                "DELETE FROM telegram_updates WHERE bot_id = ?1",
                params![bot_id],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}
