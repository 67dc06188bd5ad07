// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turns, the run-job queue, persisted adapter events, and deferred
//! button actions.
//!
//! The partial unique index `uq_cli_run_jobs_bot_chat_active` allows at
//! most one run job per chat in {queued, leased, in_flight}; the insert
//! conflict in `create_turn_and_job` is the signal callers report back as
//! "a run is already active".

use relaybot_core::RelayError;
use rusqlite::{OptionalExtension, Row, params};
use uuid::Uuid;

use crate::database::{Database, is_unique_violation, map_tr_err};
use crate::models::{CliEventRow, EnqueueOutcome, PromotedAction, RunJobLease, TurnRow};
use crate::queries::{MAX_ATTEMPTS, retry_backoff_ms};

fn turn_from_row(row: &Row<'_>) -> rusqlite::Result<TurnRow> {
    Ok(TurnRow {
        turn_id: row.get(0)?,
        session_id: row.get(1)?,
        bot_id: row.get(2)?,
        chat_id: row.get(3)?,
        user_text: row.get(4)?,
        assistant_text: row.get(5)?,
        status: row.get(6)?,
        error_text: row.get(7)?,
        started_at: row.get(8)?,
        finished_at: row.get(9)?,
        created_at: row.get(10)?,
    })
}

const TURN_COLUMNS: &str = "turn_id, session_id, bot_id, chat_id, user_text, assistant_text, \
     status, error_text, started_at, finished_at, created_at";

/// Insert a queued Turn and its RunJob in one transaction.
pub async fn create_turn_and_job(
    db: &Database,
    session_id: &str,
    bot_id: &str,
    chat_id: &str,
    user_text: &str,
    now: i64,
) -> Result<EnqueueOutcome, RelayError> {
    let session_id = session_id.to_string();
    let bot_id = bot_id.to_string();
    let chat_id = chat_id.to_string();
    let user_text = user_text.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let turn_id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO turns
                     (turn_id, session_id, bot_id, chat_id, user_text, assistant_text,
                      status, error_text, started_at, finished_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL, 'queued', NULL, NULL, NULL, ?6)",
                params![turn_id, session_id, bot_id, chat_id, user_text, now],
            )?;
            let job = tx.execute(
                "INSERT INTO cli_run_jobs
                     (id, turn_id, bot_id, chat_id, status, lease_owner, lease_expires_at,
                      available_at, attempts, last_error, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'queued', NULL, NULL, ?5, 0, NULL, ?5, ?5)",
                params![Uuid::new_v4().to_string(), turn_id, bot_id, chat_id, now],
            );
            match job {
                Ok(_) => {
                    tx.commit()?;
                    Ok(EnqueueOutcome::Created { turn_id })
                }
                Err(err) if is_unique_violation(&err, "uq_cli_run_jobs_bot_chat_active") => {
                    // Rolls the turn insert back too.
                    drop(tx);
                    Ok(EnqueueOutcome::ActiveRunExists)
                }
                Err(err) => Err(err.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Atomically claim the oldest runnable run job for this bot.
pub async fn lease_next_run_job(
    db: &Database,
    bot_id: &str,
    owner: &str,
    now: i64,
    lease_ms: i64,
) -> Result<Option<RunJobLease>, RelayError> {
    let bot_id = bot_id.to_string();
    let owner = owner.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let row = tx
                .query_row(
                    "SELECT id, turn_id, chat_id FROM cli_run_jobs
                     WHERE bot_id = ?1
                       AND available_at <= ?2
                       AND (
                         status = 'queued'
                         OR (status IN ('leased', 'in_flight')
                             AND lease_expires_at IS NOT NULL
                             AND lease_expires_at < ?2)
                       )
                     ORDER BY available_at ASC, created_at ASC
                     LIMIT 1",
                    params![bot_id, now],
                    |row| {
                        Ok(RunJobLease {
                            id: row.get(0)?,
                            turn_id: row.get(1)?,
                            chat_id: row.get(2)?,
                        })
                    },
                )
                .optional()?;

            let Some(lease) = row else {
                tx.commit()?;
                return Ok(None);
            };

            tx.execute(
                "UPDATE cli_run_jobs
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

/// Move a leased job and its turn to in_flight in one transaction.
pub async fn mark_run_in_flight(
    db: &Database,
    job_id: &str,
    turn_id: &str,
    now: i64,
) -> Result<(), RelayError> {
    let job_id = job_id.to_string();
    let turn_id = turn_id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE cli_run_jobs SET status = 'in_flight', updated_at = ?1 WHERE id = ?2",
                params![now, job_id],
            )?;
            tx.execute(
                "UPDATE turns SET status = 'in_flight', started_at = ?1 WHERE turn_id = ?2",
                params![now, turn_id],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn renew_run_job_lease(
    db: &Database,
    job_id: &str,
    now: i64,
    lease_ms: i64,
) -> Result<(), RelayError> {
    let job_id = job_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE cli_run_jobs
                 SET lease_expires_at = ?1, updated_at = ?2
                 WHERE id = ?3 AND status IN ('leased', 'in_flight')",
                params![now + lease_ms, now, job_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn complete_run_job_and_turn(
    db: &Database,
    job_id: &str,
    turn_id: &str,
    assistant_text: &str,
    now: i64,
) -> Result<(), RelayError> {
    let job_id = job_id.to_string();
    let turn_id = turn_id.to_string();
    let assistant_text = assistant_text.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE cli_run_jobs
                 SET status = 'completed', lease_owner = NULL, lease_expires_at = NULL,
                     updated_at = ?1
                 WHERE id = ?2",
                params![now, job_id],
            )?;
            tx.execute(
                "UPDATE turns
                 SET status = 'completed', assistant_text = ?1, finished_at = ?2
                 WHERE turn_id = ?3",
                params![assistant_text, now, turn_id],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Record a failure.
///
/// With `requeue` set and attempts below the cap, the job goes back to
/// `queued` with exponential backoff and the turn back to `queued` for a
/// clean retry. Otherwise both reach their terminal failed state. Callers
/// pass `requeue = false` once a terminal event envelope has been
/// persisted for the turn, so the event log never gets a second
/// `turn_completed`.
pub async fn fail_run_job_and_turn(
    db: &Database,
    job_id: &str,
    turn_id: &str,
    error_text: &str,
    requeue: bool,
    now: i64,
) -> Result<(), RelayError> {
    let job_id = job_id.to_string();
    let turn_id = turn_id.to_string();
    let error_text: String = error_text.chars().take(2000).collect();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let attempts: i64 = tx
                .query_row(
                    "SELECT attempts FROM cli_run_jobs WHERE id = ?1",
                    params![job_id],
                    |row| row.get(0),
                )
                .optional()?
                .unwrap_or(0);

            if requeue && attempts < MAX_ATTEMPTS {
                tx.execute(
                    "UPDATE cli_run_jobs
                     SET status = 'queued', lease_owner = NULL, lease_expires_at = NULL,
                         available_at = ?1, last_error = ?2, updated_at = ?3
                     WHERE id = ?4",
                    params![now + retry_backoff_ms(attempts), error_text, now, job_id],
                )?;
                tx.execute(
                    "UPDATE turns SET status = 'queued', error_text = ?1 WHERE turn_id = ?2",
                    params![error_text, turn_id],
                )?;
            } else {
                tx.execute(
                    "UPDATE cli_run_jobs
                     SET status = 'failed', lease_owner = NULL, lease_expires_at = NULL,
                         last_error = ?1, updated_at = ?2
                     WHERE id = ?3",
                    params![error_text, now, job_id],
                )?;
                tx.execute(
                    "UPDATE turns
                     SET status = 'failed', error_text = ?1, finished_at = ?2
                     WHERE turn_id = ?3",
                    params![error_text, now, turn_id],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn mark_run_job_cancelled(
    db: &Database,
    job_id: &str,
    turn_id: &str,
    now: i64,
) -> Result<(), RelayError> {
    let job_id = job_id.to_string();
    let turn_id = turn_id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE cli_run_jobs
                 SET status = 'cancelled', lease_owner = NULL, lease_expires_at = NULL,
                     updated_at = ?1
                 WHERE id = ?2",
                params![now, job_id],
            )?;
            tx.execute(
                "UPDATE turns SET status = 'cancelled', finished_at = ?1 WHERE turn_id = ?2",
                params![now, turn_id],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// `/stop`: flag the newest active run for this chat as cancelled.
///
/// This is the soft cancellation signal; the run worker observes it at
/// the next event boundary via [`is_turn_cancelled`]. Returns the
/// cancelled turn id, or `None` when no run was active.
pub async fn cancel_active_run(
    db: &Database,
    bot_id: &str,
    chat_id: &str,
    now: i64,
) -> Result<Option<String>, RelayError> {
    let bot_id = bot_id.to_string();
    let chat_id = chat_id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let row = tx
                .query_row(
                    "SELECT id, turn_id FROM cli_run_jobs
                     WHERE bot_id = ?1 AND chat_id = ?2
                       AND status IN ('queued', 'leased', 'in_flight')
                     ORDER BY created_at DESC LIMIT 1",
                    params![bot_id, chat_id],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()?;

            let Some((job_id, turn_id)) = row else {
                tx.commit()?;
                return Ok(None);
            };

            tx.execute(
                "UPDATE cli_run_jobs
                 SET status = 'cancelled', lease_owner = NULL, lease_expires_at = NULL,
                     updated_at = ?1
                 WHERE id = ?2",
                params![now, job_id],
            )?;
            tx.execute(
                "UPDATE turns SET status = 'cancelled', finished_at = ?1 WHERE turn_id = ?2",
                params![now, turn_id],
            )?;
            tx.commit()?;
            Ok(Some(turn_id))
        })
        .await
        .map_err(map_tr_err)
}

pub async fn is_turn_cancelled(db: &Database, turn_id: &str) -> Result<bool, RelayError> {
    let turn_id = turn_id.to_string();
    db.connection()
        .call(move |conn| {
            let status: Option<String> = conn
                .query_row(
                    "SELECT status FROM turns WHERE turn_id = ?1",
                    params![turn_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(status.as_deref() == Some("cancelled"))
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_turn(db: &Database, turn_id: &str) -> Result<Option<TurnRow>, RelayError> {
    let turn_id = turn_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {TURN_COLUMNS} FROM turns WHERE turn_id = ?1"),
                params![turn_id],
                turn_from_row,
            )
            .optional()
            .map_err(Into::into)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_latest_completed_turn(
    db: &Database,
    session_id: &str,
) -> Result<Option<TurnRow>, RelayError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {TURN_COLUMNS} FROM turns
                     WHERE session_id = ?1 AND status = 'completed'
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![session_id],
                turn_from_row,
            )
            .optional()
            .map_err(Into::into)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn has_active_run(
    db: &Database,
    bot_id: &str,
    chat_id: &str,
) -> Result<bool, RelayError> {
    let bot_id = bot_id.to_string();
    let chat_id = chat_id.to_string();
    db.connection()
        .call(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM cli_run_jobs
                 WHERE bot_id = ?1 AND chat_id = ?2
                   AND status IN ('queued', 'leased', 'in_flight')",
                params![bot_id, chat_id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// Append one adapter event. `(turn_id, seq)` uniqueness is enforced by
/// the schema; the writer owns sequence allocation, so a conflict here is
/// a bug and surfaces as a storage error.
pub async fn append_cli_event(
    db: &Database,
    turn_id: &str,
    bot_id: &str,
    seq: i64,
    event_type: &str,
    payload_json: &str,
    now: i64,
) -> Result<(), RelayError> {
    let turn_id = turn_id.to_string();
    let bot_id = bot_id.to_string();
    let event_type = event_type.to_string();
    let payload_json = payload_json.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO cli_events (turn_id, bot_id, seq, event_type, payload_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![turn_id, bot_id, seq, event_type, payload_json, now],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn count_turn_events(db: &Database, turn_id: &str) -> Result<i64, RelayError> {
    let turn_id = turn_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM cli_events WHERE turn_id = ?1",
                params![turn_id],
                |row| row.get(0),
            )
            .map_err(Into::into)
        })
        .await
        .map_err(map_tr_err)
}

/// All events for a turn in seq order.
pub async fn list_turn_events(
    db: &Database,
    turn_id: &str,
) -> Result<Vec<CliEventRow>, RelayError> {
    let turn_id = turn_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT turn_id, bot_id, seq, event_type, payload_json, created_at
                 FROM cli_events WHERE turn_id = ?1 ORDER BY seq ASC",
            )?;
            let rows = stmt.query_map(params![turn_id], |row| {
                Ok(CliEventRow {
                    turn_id: row.get(0)?,
                    bot_id: row.get(1)?,
                    seq: row.get(2)?,
                    event_type: row.get(3)?,
                    payload_json: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?;
            let mut events = Vec::new();
            for row in rows {
                events.push(row?);
            }
            Ok(events)
        })
        .await
        .map_err(map_tr_err)
}

/// Queue a follow-up turn intent produced by a button press. The queue is
/// bounded per chat; overflow cancels the oldest queued entries.
pub async fn enqueue_deferred_action(
    db: &Database,
    bot_id: &str,
    chat_id: &str,
    session_id: &str,
    action_type: &str,
    prompt_text: &str,
    origin_turn_id: &str,
    max_queue: usize,
    now: i64,
) -> Result<String, RelayError> {
    let bot_id = bot_id.to_string();
    let chat_id = chat_id.to_string();
    let session_id = session_id.to_string();
    let action_type = action_type.to_string();
    let prompt_text = prompt_text.to_string();
    let origin_turn_id = origin_turn_id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let action_id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO deferred_button_actions
                     (id, bot_id, chat_id, session_id, action_type, prompt_text,
                      origin_turn_id, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'queued', ?8, ?8)",
                params![
                    action_id,
                    bot_id,
                    chat_id,
                    session_id,
                    action_type,
                    prompt_text,
                    origin_turn_id,
                    now
                ],
            )?;

            let queued: i64 = tx.query_row(
                "SELECT COUNT(*) FROM deferred_button_actions
                 WHERE bot_id = ?1 AND chat_id = ?2 AND status = 'queued'",
                params![bot_id, chat_id],
                |row| row.get(0),
            )?;
            let overflow = queued - (max_queue.max(1) as i64);
            if overflow > 0 {
                tx.execute(
                    "UPDATE deferred_button_actions
                     SET status = 'cancelled', updated_at = ?1
                     WHERE id IN (
                        SELECT id FROM deferred_button_actions
                        WHERE bot_id = ?2 AND chat_id = ?3 AND status = 'queued'
                        ORDER BY created_at ASC LIMIT ?4
                     )",
                    params![now, bot_id, chat_id, overflow],
                )?;
            }
            tx.commit()?;
            Ok(action_id)
        })
        .await
        .map_err(map_tr_err)
}

/// Promote the oldest queued deferred action into a fresh Turn + RunJob,
/// provided no run is currently active in the chat.
pub async fn promote_next_deferred_action(
    db: &Database,
    bot_id: &str,
    chat_id: &str,
    now: i64,
) -> Result<Option<PromotedAction>, RelayError> {
    let bot_id = bot_id.to_string();
    let chat_id = chat_id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let active: i64 = tx.query_row(
                "SELECT COUNT(*) FROM cli_run_jobs
                 WHERE bot_id = ?1 AND chat_id = ?2
                   AND status IN ('queued', 'leased', 'in_flight')",
                params![bot_id, chat_id],
                |row| row.get(0),
            )?;
            if active > 0 {
                tx.commit()?;
                return Ok(None);
            }

            let row = tx
                .query_row(
                    "SELECT id, session_id, action_type, prompt_text
                     FROM deferred_button_actions
                     WHERE bot_id = ?1 AND chat_id = ?2 AND status = 'queued'
                     ORDER BY created_at ASC LIMIT 1",
                    params![bot_id, chat_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()?;

            let Some((action_id, session_id, action_type, prompt_text)) = row else {
                tx.commit()?;
                return Ok(None);
            };

            tx.execute(
                "UPDATE deferred_button_actions SET status = 'promoted', updated_at = ?1
                 WHERE id = ?2",
                params![now, action_id],
            )?;

            let turn_id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO turns
                     (turn_id, session_id, bot_id, chat_id, user_text, assistant_text,
                      status, error_text, started_at, finished_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL, 'queued', NULL, NULL, NULL, ?6)",
                params![turn_id, session_id, bot_id, chat_id, prompt_text, now],
            )?;
            tx.execute(
                "INSERT INTO cli_run_jobs
                     (id, turn_id, bot_id, chat_id, status, lease_owner, lease_expires_at,
                      available_at, attempts, last_error, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'queued', NULL, NULL, ?5, 0, NULL, ?5, ?5)",
                params![Uuid::new_v4().to_string(), turn_id, bot_id, chat_id, now],
            )?;
            tx.commit()?;
            Ok(Some(PromotedAction {
                action_id,
                action_type,
                turn_id,
            }))
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::sessions::get_or_create_active_session;
    use tempfile::tempdir;

    async fn setup() -> (Database, String, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db").to_str().unwrap())
            .await
            .unwrap();
        let session = get_or_create_active_session(&db, "b", "1001", "gemini", None, 1)
            .await
            .unwrap();
        (db, session.session_id, dir)
    }

    async fn enqueue(db: &Database, session_id: &str, text: &str, now: i64) -> EnqueueOutcome {
        create_turn_and_job(db, session_id, "b", "1001", text, now)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn second_enqueue_hits_active_run_uniqueness() {
        let (db, session_id, _dir) = setup().await;

        let first = enqueue(&db, &session_id, "task A", 10).await;
        assert!(matches!(first, EnqueueOutcome::Created { .. }));

        let second = enqueue(&db, &session_id, "task B", 11).await;
        assert_eq!(second, EnqueueOutcome::ActiveRunExists);

        // The conflicting turn was rolled back with its job.
        let turns: i64 = db
            .connection()
            .call(|conn| {
                conn.query_row("SELECT COUNT(*) FROM turns", [], |row| row.get(0))
                    .map_err(Into::into)
            })
            .await
            .unwrap();
        assert_eq!(turns, 1);
    }

    #[tokio::test]
    async fn lease_transitions_and_completion() {
        let (db, session_id, _dir) = setup().await;
        let EnqueueOutcome::Created { turn_id } = enqueue(&db, &session_id, "hello", 10).await
        else {
            panic!("expected creation");
        };

        let lease = lease_next_run_job(&db, "b", "w", 20, 30_000)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lease.turn_id, turn_id);
        assert_eq!(lease.chat_id, "1001");

        mark_run_in_flight(&db, &lease.id, &lease.turn_id, 21).await.unwrap();
        let turn = get_turn(&db, &turn_id).await.unwrap().unwrap();
        assert_eq!(turn.status, "in_flight");
        assert_eq!(turn.started_at, Some(21));

        complete_run_job_and_turn(&db, &lease.id, &turn_id, "answer", 30)
            .await
            .unwrap();
        let done = get_turn(&db, &turn_id).await.unwrap().unwrap();
        assert_eq!(done.status, "completed");
        assert_eq!(done.assistant_text.as_deref(), Some("answer"));
        assert_eq!(done.finished_at, Some(30));

        // Terminal job frees the active-run slot.
        assert!(!has_active_run(&db, "b", "1001").await.unwrap());
        assert!(matches!(
            enqueue(&db, &session_id, "next", 40).await,
            EnqueueOutcome::Created { .. }
        ));
    }

    #[tokio::test]
    async fn fail_without_requeue_is_terminal() {
        let (db, session_id, _dir) = setup().await;
        let EnqueueOutcome::Created { turn_id } = enqueue(&db, &session_id, "x", 10).await else {
            panic!()
        };
        let lease = lease_next_run_job(&db, "b", "w", 20, 30_000)
            .await
            .unwrap()
            .unwrap();

        fail_run_job_and_turn(&db, &lease.id, &turn_id, "adapter exploded", false, 30)
            .await
            .unwrap();

        let turn = get_turn(&db, &turn_id).await.unwrap().unwrap();
        assert_eq!(turn.status, "failed");
        assert_eq!(turn.error_text.as_deref(), Some("adapter exploded"));
        assert!(
            lease_next_run_job(&db, "b", "w", 10_000, 30_000)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn fail_with_requeue_backs_off_then_retries() {
        let (db, session_id, _dir) = setup().await;
        let EnqueueOutcome::Created { turn_id } = enqueue(&db, &session_id, "x", 0).await else {
            panic!()
        };
        let lease = lease_next_run_job(&db, "b", "w", 0, 1_000)
            .await
            .unwrap()
            .unwrap();

        fail_run_job_and_turn(&db, &lease.id, &turn_id, "transient", true, 100)
            .await
            .unwrap();

        // Not yet available inside the backoff window.
        assert!(
            lease_next_run_job(&db, "b", "w", 200, 1_000)
                .await
                .unwrap()
                .is_none()
        );
        // Available after the backoff elapses, same turn.
        let retried = lease_next_run_job(&db, "b", "w", 100 + 2_500, 1_000)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(retried.turn_id, turn_id);
    }

    #[tokio::test]
    async fn cancel_active_run_flags_turn() {
        let (db, session_id, _dir) = setup().await;
        let EnqueueOutcome::Created { turn_id } = enqueue(&db, &session_id, "x", 10).await else {
            panic!()
        };

        let cancelled = cancel_active_run(&db, "b", "1001", 20).await.unwrap();
        assert_eq!(cancelled.as_deref(), Some(turn_id.as_str()));
        assert!(is_turn_cancelled(&db, &turn_id).await.unwrap());

        // Nothing active anymore.
        assert_eq!(cancel_active_run(&db, "b", "1001", 21).await.unwrap(), None);
    }

    #[tokio::test]
    async fn cli_events_are_unique_per_seq() {
        let (db, session_id, _dir) = setup().await;
        let EnqueueOutcome::Created { turn_id } = enqueue(&db, &session_id, "x", 10).await else {
            panic!()
        };

        append_cli_event(&db, &turn_id, "b", 1, "thread_started", "{}", 11)
            .await
            .unwrap();
        append_cli_event(&db, &turn_id, "b", 2, "assistant_message", "{}", 12)
            .await
            .unwrap();
        assert_eq!(count_turn_events(&db, &turn_id).await.unwrap(), 2);

        let conflict = append_cli_event(&db, &turn_id, "b", 2, "reasoning", "{}", 13).await;
        assert!(conflict.is_err(), "duplicate seq must be rejected");

        let events = list_turn_events(&db, &turn_id).await.unwrap();
        let seqs: Vec<i64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[tokio::test]
    async fn deferred_actions_queue_cap_and_promotion() {
        let (db, session_id, _dir) = setup().await;
        let EnqueueOutcome::Created { turn_id } = enqueue(&db, &session_id, "x", 10).await else {
            panic!()
        };

        // Active run present: promotion is refused.
        enqueue_deferred_action(&db, "b", "1001", &session_id, "regen", "p1", &turn_id, 2, 20)
            .await
            .unwrap();
        assert!(
            promote_next_deferred_action(&db, "b", "1001", 21)
                .await
                .unwrap()
                .is_none()
        );

        enqueue_deferred_action(&db, "b", "1001", &session_id, "next", "p2", &turn_id, 2, 22)
            .await
            .unwrap();
        // Third entry overflows the cap of 2; the oldest gets cancelled.
        enqueue_deferred_action(&db, "b", "1001", &session_id, "summary", "p3", &turn_id, 2, 23)
            .await
            .unwrap();

        let lease = lease_next_run_job(&db, "b", "w", 30, 1_000).await.unwrap().unwrap();
        complete_run_job_and_turn(&db, &lease.id, &lease.turn_id, "done", 31)
            .await
            .unwrap();

        let promoted = promote_next_deferred_action(&db, "b", "1001", 40)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(promoted.action_type, "next");

        let turn = get_turn(&db, &promoted.turn_id).await.unwrap().unwrap();
        assert_eq!(turn.user_text, "p2");
        assert!(has_active_run(&db, "b", "1001").await.unwrap());
    }
}
