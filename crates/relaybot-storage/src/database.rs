// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and
//! embedded migrations.
//!
//! All access goes through tokio-rusqlite's single background thread.
//! Do NOT create additional Connection instances for writes; the
//! single-writer discipline is what makes the claim-then-update lease
//! transactions race-free within one process.

use relaybot_core::RelayError;
use tokio_rusqlite::Connection;
use tracing::debug;

use crate::migrations;

/// Handle to the SQLite database backing one bot runtime.
#[derive(Clone)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (creating if needed) the database at `path`, apply PRAGMAs,
    /// and run all pending migrations.
    pub async fn open(path: &str) -> Result<Self, RelayError> {
        let migrate_path = path.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), RelayError> {
            let mut conn = rusqlite::Connection::open(&migrate_path)
                .map_err(|e| RelayError::Storage { source: Box::new(e) })?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA busy_timeout = 5000;
                 PRAGMA foreign_keys = ON;",
            )
            .map_err(|e| RelayError::Storage { source: Box::new(e) })?;
            migrations::run_migrations(&mut conn)
        })
        .await
        .map_err(|e| RelayError::Internal(format!("migration task panicked: {e}")))??;

        let conn = Connection::open(path).await.map_err(map_tr_err)?;
        conn.call(|conn| {
            conn.execute_batch("PRAGMA busy_timeout = 5000; PRAGMA foreign_keys = ON;")?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        debug!(path, "database opened");
        Ok(Self { conn })
    }

    /// The shared tokio-rusqlite connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Cheap liveness probe used by `/readyz`.
    pub async fn health_check(&self) -> Result<(), RelayError> {
        self.conn
            .call(|conn| {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    /// Checkpoint the WAL; called on graceful shutdown.
    pub async fn close(&self) -> Result<(), RelayError> {
        self.conn
            .call(|conn| {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!("WAL checkpoint complete");
        Ok(())
    }
}

/// Map a tokio-rusqlite error into the workspace error type.
pub fn map_tr_err(err: tokio_rusqlite::Error) -> RelayError {
    RelayError::Storage {
        source: Box::new(err),
    }
}

/// True when the error is a uniqueness violation on the named index.
///
/// Callers lean on partial unique indexes to serialize races; this is
/// how they recognize losing one.
pub fn is_unique_violation(err: &rusqlite::Error, index_name: &str) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(failure, message) => {
            failure.code == rusqlite::ErrorCode::ConstraintViolation
                && message
                    .as_deref()
                    .is_some_and(|m| m.contains(index_name) || m.contains("UNIQUE"))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn open_creates_schema() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("t.db").to_str().unwrap())
            .await
            .unwrap();

        let tables: Vec<String> = db
            .connection()
            .call(|conn| {
                let mut stmt = conn
                    .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                let mut names = Vec::new();
                for row in rows {
                    names.push(row?);
                }
                Ok(names)
            })
            .await
            .unwrap();

        for expected in [
            "bots",
            "telegram_updates",
            "telegram_update_jobs",
            "sessions",
            "turns",
            "cli_run_jobs",
            "cli_events",
            "session_summaries",
            "action_tokens",
            "deferred_button_actions",
            "runtime_metric_counters",
        ] {
            assert!(
                tables.iter().any(|t| t == expected),
                "missing table {expected}, got {tables:?}"
            );
        }
    }

    #[tokio::test]
    async fn open_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        let db1 = Database::open(path.to_str().unwrap()).await.unwrap();
        db1.close().await.unwrap();
        let db2 = Database::open(path.to_str().unwrap()).await.unwrap();
        db2.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn health_check_succeeds() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("t.db").to_str().unwrap())
            .await
            .unwrap();
        db.health_check().await.unwrap();
    }
}
