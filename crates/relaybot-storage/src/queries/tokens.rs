// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Action tokens backing inline keyboard buttons.
//!
//! A token is single-use: `consume_action_token` selects and stamps
//! `consumed_at` in one transaction, so a double press loses the race and
//! gets `None`.

use relaybot_core::RelayError;
use rusqlite::{OptionalExtension, params};

use crate::database::{Database, map_tr_err};
use crate::models::ActionTokenRow;

pub async fn create_action_token(
    db: &Database,
    token: &str,
    bot_id: &str,
    chat_id: &str,
    action: &str,
    payload_json: &str,
    expires_at: i64,
    now: i64,
) -> Result<(), RelayError> {
    let token = token.to_string();
    let bot_id = bot_id.to_string();
    let chat_id = chat_id.to_string();
    let action = action.to_string();
    let payload_json = payload_json.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO action_tokens
                     (token, bot_id, chat_id, action, payload_json, expires_at, consumed_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7)",
                params![token, bot_id, chat_id, action, payload_json, expires_at, now],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Consume a token bound to this bot and chat. Returns `None` when the
/// token does not exist, belongs elsewhere, is expired, or was already
/// consumed.
pub async fn consume_action_token(
    db: &Database,
    token: &str,
    bot_id: &str,
    chat_id: &str,
    now: i64,
) -> Result<Option<ActionTokenRow>, RelayError> {
    let token = token.to_string();
    let bot_id = bot_id.to_string();
    let chat_id = chat_id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let row = tx
                .query_row(
                    "SELECT token, bot_id, chat_id, action, payload_json, expires_at
                     FROM action_tokens
                     WHERE token = ?1 AND bot_id = ?2 AND chat_id = ?3
                       AND consumed_at IS NULL AND expires_at >= ?4
                     LIMIT 1",
                    params![token, bot_id, chat_id, now],
                    |row| {
                        Ok(ActionTokenRow {
                            token: row.get(0)?,
                            bot_id: row.get(1)?,
                            chat_id: row.get(2)?,
                            action: row.get(3)?,
                            payload_json: row.get(4)?,
                            expires_at: row.get(5)?,
                        })
                    },
                )
                .optional()?;

            let Some(found) = row else {
                tx.commit()?;
                return Ok(None);
            };

            tx.execute(
                "UPDATE action_tokens SET consumed_at = ?1 WHERE token = ?2",
                params![now, found.token],
            )?;
            tx.commit()?;
            Ok(Some(found))
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
    async fn consume_is_single_use() {
        let (db, _dir) = setup_db().await;
        create_action_token(&db, "tok", "b", "1001", "regen", "{}", 1_000, 10)
            .await
            .unwrap();

        let first = consume_action_token(&db, "tok", "b", "1001", 500)
            .await
            .unwrap();
        assert!(first.is_some());
        assert_eq!(first.unwrap().action, "regen");

        let second = consume_action_token(&db, "tok", "b", "1001", 501)
            .await
            .unwrap();
        assert!(second.is_none(), "second consume must fail");
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let (db, _dir) = setup_db().await;
        create_action_token(&db, "tok", "b", "1001", "next", "{}", 100, 10)
            .await
            .unwrap();

        let result = consume_action_token(&db, "tok", "b", "1001", 200)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn token_is_bound_to_bot_and_chat() {
        let (db, _dir) = setup_db().await;
        create_action_token(&db, "tok", "b", "1001", "stop", "{}", 1_000, 10)
            .await
            .unwrap();

        assert!(
            consume_action_token(&db, "tok", "other-bot", "1001", 20)
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            consume_action_token(&db, "tok", "b", "2002", 20)
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            consume_action_token(&db, "tok", "b", "1001", 20)
                .await
                .unwrap()
                .is_some()
        );
    }
}
