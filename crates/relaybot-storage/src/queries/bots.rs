// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bot identity upsert, run once at process start.

use relaybot_core::RelayError;
use rusqlite::params;

use crate::database::Database;

pub async fn upsert_bot(
    db: &Database,
    bot_id: &str,
    name: &str,
    mode: &str,
    owner_user_id: Option<i64>,
    adapter_name: &str,
    now: i64,
) -> Result<(), RelayError> {
    let bot_id = bot_id.to_string();
    let name = name.to_string();
    let mode = mode.to_string();
    let adapter_name = adapter_name.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO bots (bot_id, name, mode, owner_user_id, adapter_name, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT (bot_id) DO UPDATE
                 SET name = excluded.name,
                     mode = excluded.mode,
                     owner_user_id = excluded.owner_user_id,
                     adapter_name = excluded.adapter_name,
                     updated_at = excluded.updated_at",
                params![bot_id, name, mode, owner_user_id, adapter_name, now],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn upsert_inserts_then_updates() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("t.db").to_str().unwrap())
            .await
            .unwrap();

        upsert_bot(&db, "bot-1", "Bot 1", "embedded", Some(9001), "gemini", 1)
            .await
            .unwrap();
        upsert_bot(&db, "bot-1", "Renamed", "embedded", Some(9001), "claude", 2)
            .await
            .unwrap();

        let (name, adapter): (String, String) = db
            .connection()
            .call(|conn| {
                conn.query_row(
                    "SELECT name, adapter_name FROM bots WHERE bot_id = 'bot-1'",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(Into::into)
            })
            .await
            .unwrap();
        assert_eq!(name, "Renamed");
        assert_eq!(adapter, "claude");
    }
}
