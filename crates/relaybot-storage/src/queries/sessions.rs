// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session lifecycle operations.
//!
//! The partial unique index `uq_sessions_bot_chat_active` guarantees at
//! most one active session per (bot_id, chat_id); `get_or_create` treats
//! an insert conflict as "someone else won the race" and re-reads.

use relaybot_core::RelayError;
use rusqlite::{OptionalExtension, Row, params};
use uuid::Uuid;

use crate::database::{Database, is_unique_violation, map_tr_err};
use crate::models::SessionRow;

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        session_id: row.get(0)?,
        bot_id: row.get(1)?,
        chat_id: row.get(2)?,
        adapter_name: row.get(3)?,
        adapter_model: row.get(4)?,
        adapter_thread_id: row.get(5)?,
        status: row.get(6)?,
        rolling_summary_md: row.get(7)?,
        last_turn_at: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

const SESSION_COLUMNS: &str = "session_id, bot_id, chat_id, adapter_name, adapter_model, \
     adapter_thread_id, status, rolling_summary_md, last_turn_at, created_at, updated_at";

/// Return the active session for the chat, creating one when absent.
pub async fn get_or_create_active_session(
    db: &Database,
    bot_id: &str,
    chat_id: &str,
    adapter_name: &str,
    adapter_model: Option<String>,
    now: i64,
) -> Result<SessionRow, RelayError> {
    let bot_id = bot_id.to_string();
    let chat_id = chat_id.to_string();
    let adapter_name = adapter_name.to_string();
    db.connection()
        .call(move |conn| {
            let select = format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE bot_id = ?1 AND chat_id = ?2 AND status = 'active'
                 ORDER BY updated_at DESC LIMIT 1"
            );
            if let Some(existing) = conn
                .query_row(&select, params![bot_id, chat_id], session_from_row)
                .optional()?
            {
                return Ok(existing);
            }

            let session_id = Uuid::new_v4().to_string();
            let inserted = conn.execute(
                "INSERT INTO sessions
                     (session_id, bot_id, chat_id, adapter_name, adapter_model,
                      adapter_thread_id, status, rolling_summary_md, last_turn_at,
                      created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL, 'active', '', NULL, ?6, ?6)",
                params![session_id, bot_id, chat_id, adapter_name, adapter_model, now],
            );
            match inserted {
                Ok(_) => {}
                Err(err) if is_unique_violation(&err, "uq_sessions_bot_chat_active") => {
                    // Lost the race; the winner's row is the answer.
                }
                Err(err) => return Err(err.into()),
            }

            conn.query_row(&select, params![bot_id, chat_id], session_from_row)
                .map_err(Into::into)
        })
        .await
        .map_err(map_tr_err)
}

/// The active session, or the most recently updated one of any status.
pub async fn get_latest_session(
    db: &Database,
    bot_id: &str,
    chat_id: &str,
) -> Result<Option<SessionRow>, RelayError> {
    let bot_id = bot_id.to_string();
    let chat_id = chat_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions
                     WHERE bot_id = ?1 AND chat_id = ?2
                     ORDER BY CASE WHEN status = 'active' THEN 0 ELSE 1 END,
                              updated_at DESC, created_at DESC, session_id DESC
                     LIMIT 1"
                ),
                params![bot_id, chat_id],
                session_from_row,
            )
            .optional()
            .map_err(Into::into)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_session(
    db: &Database,
    session_id: &str,
) -> Result<Option<SessionRow>, RelayError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?1"),
                params![session_id],
                session_from_row,
            )
            .optional()
            .map_err(Into::into)
        })
        .await
        .map_err(map_tr_err)
}

/// Retire the active session(s) for the chat and create a fresh one that
/// inherits the newest rolling summary. The inherited summary becomes the
/// recovery preamble on the first turn of the new session.
pub async fn create_fresh_session(
    db: &Database,
    bot_id: &str,
    chat_id: &str,
    adapter_name: &str,
    adapter_model: Option<String>,
    now: i64,
) -> Result<SessionRow, RelayError> {
    let bot_id = bot_id.to_string();
    let chat_id = chat_id.to_string();
    let adapter_name = adapter_name.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let inherited: String = tx
                .query_row(
                    "SELECT rolling_summary_md FROM sessions
                     WHERE bot_id = ?1 AND chat_id = ?2
                     ORDER BY CASE WHEN status = 'active' THEN 0 ELSE 1 END,
                              updated_at DESC
                     LIMIT 1",
                    params![bot_id, chat_id],
                    |row| row.get(0),
                )
                .optional()?
                .unwrap_or_default();

            tx.execute(
                "UPDATE sessions
                 SET status = 'reset', adapter_thread_id = NULL, updated_at = ?1
                 WHERE bot_id = ?2 AND chat_id = ?3 AND status = 'active'",
                params![now, bot_id, chat_id],
            )?;

            let session_id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO sessions
                     (session_id, bot_id, chat_id, adapter_name, adapter_model,
                      adapter_thread_id, status, rolling_summary_md, last_turn_at,
                      created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL, 'active', ?6, NULL, ?7, ?7)",
                params![
                    session_id,
                    bot_id,
                    chat_id,
                    adapter_name,
                    adapter_model,
                    inherited,
                    now
                ],
            )?;

            let created = tx.query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?1"),
                params![session_id],
                session_from_row,
            )?;
            tx.commit()?;
            Ok(created)
        })
        .await
        .map_err(map_tr_err)
}

/// Mark a session reset and drop its agent thread. The rolling summary
/// stays on the row as a snapshot.
pub async fn reset_session(db: &Database, session_id: &str, now: i64) -> Result<(), RelayError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE sessions
                 SET status = 'reset', adapter_thread_id = NULL, updated_at = ?1
                 WHERE session_id = ?2",
                params![now, session_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Switch the session to a different agent. Threads are per-agent, so the
/// thread id is cleared; the rolling summary is preserved.
pub async fn set_session_adapter(
    db: &Database,
    session_id: &str,
    adapter_name: &str,
    adapter_model: Option<String>,
    now: i64,
) -> Result<(), RelayError> {
    let session_id = session_id.to_string();
    let adapter_name = adapter_name.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let target = tx
                .query_row(
                    "SELECT bot_id, chat_id FROM sessions WHERE session_id = ?1",
                    params![session_id],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()?;
            let Some((bot_id, chat_id)) = target else {
                tx.commit()?;
                return Ok(());
            };

            tx.execute(
                "UPDATE sessions
                 SET status = 'reset', adapter_thread_id = NULL, updated_at = ?1
                 WHERE bot_id = ?2 AND chat_id = ?3 AND status = 'active'
                   AND session_id != ?4",
                params![now, bot_id, chat_id, session_id],
            )?;
            tx.execute(
                "UPDATE sessions
                 SET adapter_name = ?1, adapter_model = ?2, adapter_thread_id = NULL,
                     status = 'active', updated_at = ?3
                 WHERE session_id = ?4",
                params![adapter_name, adapter_model, now, session_id],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Change only the session model; clears the thread id because the agent
/// cannot resume a thread under a different model.
pub async fn set_session_model(
    db: &Database,
    session_id: &str,
    adapter_model: Option<String>,
    now: i64,
) -> Result<(), RelayError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE sessions
                 SET adapter_model = ?1, adapter_thread_id = NULL, updated_at = ?2
                 WHERE session_id = ?3",
                params![adapter_model, now, session_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn set_session_thread_id(
    db: &Database,
    session_id: &str,
    thread_id: Option<String>,
    now: i64,
) -> Result<(), RelayError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE sessions
                 SET adapter_thread_id = ?1, updated_at = ?2
                 WHERE session_id = ?3",
                params![thread_id, now, session_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Persist the new rolling summary and its append-only snapshot in one
/// transaction, stamping `last_turn_at`.
pub async fn upsert_session_summary(
    db: &Database,
    session_id: &str,
    bot_id: &str,
    turn_id: &str,
    summary_md: &str,
    now: i64,
) -> Result<(), RelayError> {
    let session_id = session_id.to_string();
    let bot_id = bot_id.to_string();
    let turn_id = turn_id.to_string();
    let summary_md = summary_md.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE sessions
                 SET rolling_summary_md = ?1, last_turn_at = ?2, updated_at = ?2,
                     status = 'active'
                 WHERE session_id = ?3",
                params![summary_md, now, session_id],
            )?;
            tx.execute(
                "INSERT INTO session_summaries (id, session_id, bot_id, turn_id, summary_md, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    Uuid::new_v4().to_string(),
                    session_id,
                    bot_id,
                    turn_id,
                    summary_md,
                    now
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Number of summary snapshots recorded for a session.
pub async fn count_session_summaries(
    db: &Database,
    session_id: &str,
) -> Result<i64, RelayError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM session_summaries WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .map_err(Into::into)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db").to_str().unwrap())
            .await
            .unwrap();
        (db, dir)
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let (db, _dir) = setup_db().await;

        let first = get_or_create_active_session(&db, "b", "1001", "gemini", None, 10)
            .await
            .unwrap();
        let second = get_or_create_active_session(&db, "b", "1001", "codex", None, 20)
            .await
            .unwrap();
        assert_eq!(first.session_id, second.session_id);
        // The existing session's adapter is not silently replaced.
        assert_eq!(second.adapter_name, "gemini");
    }

    #[tokio::test]
    async fn fresh_session_inherits_summary_and_demotes_old() {
        let (db, _dir) = setup_db().await;

        let old = get_or_create_active_session(&db, "b", "1001", "gemini", None, 10)
            .await
            .unwrap();
        upsert_session_summary(&db, &old.session_id, "b", "turn-x", "## Goal\n- prior", 20)
            .await
            .unwrap();

        let fresh = create_fresh_session(&db, "b", "1001", "gemini", None, 30)
            .await
            .unwrap();
        assert_ne!(fresh.session_id, old.session_id);
        assert_eq!(fresh.status, "active");
        assert_eq!(fresh.rolling_summary_md, "## Goal\n- prior");
        assert!(fresh.adapter_thread_id.is_none());

        let old_now = get_session(&db, &old.session_id).await.unwrap().unwrap();
        assert_eq!(old_now.status, "reset");

        // Invariant: one active session per chat.
        let active = get_or_create_active_session(&db, "b", "1001", "gemini", None, 40)
            .await
            .unwrap();
        assert_eq!(active.session_id, fresh.session_id);
    }

    #[tokio::test]
    async fn switch_adapter_keeps_summary_clears_thread() {
        let (db, _dir) = setup_db().await;
        let session = get_or_create_active_session(&db, "b", "1", "gemini", None, 10)
            .await
            .unwrap();
        set_session_thread_id(&db, &session.session_id, Some("thr-1".into()), 11)
            .await
            .unwrap();
        upsert_session_summary(&db, &session.session_id, "b", "t", "summary text", 12)
            .await
            .unwrap();

        set_session_adapter(&db, &session.session_id, "claude", None, 20)
            .await
            .unwrap();

        let after = get_session(&db, &session.session_id).await.unwrap().unwrap();
        assert_eq!(after.adapter_name, "claude");
        assert!(after.adapter_thread_id.is_none());
        assert_eq!(after.rolling_summary_md, "summary text");
        assert_eq!(after.status, "active");
    }

    #[tokio::test]
    async fn latest_session_prefers_active() {
        let (db, _dir) = setup_db().await;
        let first = get_or_create_active_session(&db, "b", "1", "gemini", None, 10)
            .await
            .unwrap();
        let fresh = create_fresh_session(&db, "b", "1", "gemini", None, 20)
            .await
            .unwrap();

        let latest = get_latest_session(&db, "b", "1").await.unwrap().unwrap();
        assert_eq!(latest.session_id, fresh.session_id);
        assert_ne!(latest.session_id, first.session_id);
    }

    #[tokio::test]
    async fn summary_upsert_writes_snapshot_rows() {
        let (db, _dir) = setup_db().await;
        let session = get_or_create_active_session(&db, "b", "1", "gemini", None, 10)
            .await
            .unwrap();

        upsert_session_summary(&db, &session.session_id, "b", "t1", "one", 11)
            .await
            .unwrap();
        upsert_session_summary(&db, &session.session_id, "b", "t2", "two", 12)
            .await
            .unwrap();

        assert_eq!(
            count_session_summaries(&db, &session.session_id).await.unwrap(),
            2
        );
        let row = get_session(&db, &session.session_id).await.unwrap().unwrap();
        assert_eq!(row.rolling_summary_md, "two");
        assert_eq!(row.last_turn_at, Some(12));
    }

    #[tokio::test]
    async fn set_model_clears_thread() {
        let (db, _dir) = setup_db().await;
        let session = get_or_create_active_session(&db, "b", "1", "codex", None, 10)
            .await
            .unwrap();
        set_session_thread_id(&db, &session.session_id, Some("thr".into()), 11)
            .await
            .unwrap();

        set_session_model(&db, &session.session_id, Some("gpt-5".into()), 20)
            .await
            .unwrap();

        let after = get_session(&db, &session.session_id).await.unwrap().unwrap();
        assert_eq!(after.adapter_model.as_deref(), Some("gpt-5"));
        assert!(after.adapter_thread_id.is_none());
    }
}
