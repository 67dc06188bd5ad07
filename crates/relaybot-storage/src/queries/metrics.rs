// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Monotonic metric counters and the `/metrics` readout.
//!
//! Counters live in the store so every process of a bot shares one
//! namespace; the increment is an upsert with `+=`.

use std::collections::BTreeMap;

use relaybot_core::RelayError;
use rusqlite::params;

use crate::database::{Database, map_tr_err};
use crate::models::MetricsSnapshot;

pub async fn increment_metric(
    db: &Database,
    bot_id: &str,
    metric_key: &str,
    now: i64,
    delta: i64,
) -> Result<(), RelayError> {
    if delta == 0 {
        return Ok(());
    }
    let bot_id = bot_id.to_string();
    let metric_key = metric_key.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO runtime_metric_counters (bot_id, metric_key, metric_value, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (bot_id, metric_key) DO UPDATE
                 SET metric_value = runtime_metric_counters.metric_value + excluded.metric_value,
                     updated_at = excluded.updated_at",
                params![bot_id, metric_key, delta, now],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_metric(db: &Database, bot_id: &str, metric_key: &str) -> Result<i64, RelayError> {
    let bot_id = bot_id.to_string();
    let metric_key = metric_key.to_string();
    db.connection()
        .call(move |conn| {
            let value: Option<i64> = conn
                .query_row(
                    "SELECT metric_value FROM runtime_metric_counters
                     WHERE bot_id = ?1 AND metric_key = ?2",
                    params![bot_id, metric_key],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|err| match err {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;
            Ok(value.unwrap_or(0))
        })
        .await
        .map_err(map_tr_err)
}

/// One-shot readout: raw counters plus jobs-by-status aggregates for both
/// queues and the count of in-flight runs.
pub async fn get_metrics(db: &Database, bot_id: &str) -> Result<MetricsSnapshot, RelayError> {
    let bot_id = bot_id.to_string();
    db.connection()
        .call(move |conn| {
            let updates_total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM telegram_updates WHERE bot_id = ?1",
                params![bot_id],
                |row| row.get(0),
            )?;
            let update_jobs: i64 = conn.query_row(
                "SELECT COUNT(*) FROM telegram_update_jobs WHERE bot_id = ?1",
                params![bot_id],
                |row| row.get(0),
            )?;
            let run_jobs: i64 = conn.query_row(
                "SELECT COUNT(*) FROM cli_run_jobs WHERE bot_id = ?1",
                params![bot_id],
                |row| row.get(0),
            )?;
            let in_flight: i64 = conn.query_row(
                "SELECT COUNT(*) FROM cli_run_jobs
                 WHERE bot_id = ?1 AND status IN ('leased', 'in_flight')",
                params![bot_id],
                |row| row.get(0),
            )?;

            let mut update_by_status = BTreeMap::new();
            {
                let mut stmt = conn.prepare(
                    "SELECT status, COUNT(*) FROM telegram_update_jobs
                     WHERE bot_id = ?1 GROUP BY status",
                )?;
                let rows = stmt.query_map(params![bot_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?;
                for row in rows {
                    let (status, count) = row?;
                    update_by_status.insert(status, count);
                }
            }

            let mut run_by_status = BTreeMap::new();
            {
                let mut stmt = conn.prepare(
                    "SELECT status, COUNT(*) FROM cli_run_jobs
                     WHERE bot_id = ?1 GROUP BY status",
                )?;
                let rows = stmt.query_map(params![bot_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?;
                for row in rows {
                    let (status, count) = row?;
                    run_by_status.insert(status, count);
                }
            }

            let mut counters = BTreeMap::new();
            {
                let mut stmt = conn.prepare(
                    "SELECT metric_key, metric_value FROM runtime_metric_counters
                     WHERE bot_id = ?1",
                )?;
                let rows = stmt.query_map(params![bot_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?;
                for row in rows {
                    let (key, value) = row?;
                    counters.insert(key, value);
                }
            }

            Ok(MetricsSnapshot {
                telegram_updates_total: updates_total,
                telegram_update_jobs: update_jobs,
                cli_run_jobs: run_jobs,
                in_flight_runs: in_flight,
                telegram_update_jobs_by_status: update_by_status,
                cli_run_jobs_by_status: run_by_status,
                runtime_counters: counters,
            })
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::updates::accept_update;
    use tempfile::tempdir;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db").to_str().unwrap())
            .await
            .unwrap();
        (db, dir)
    }

    #[tokio::test]
    async fn increment_accumulates() {
        let (db, _dir) = setup_db().await;
        increment_metric(&db, "b", "webhook_accept_total", 10, 1)
            .await
            .unwrap();
        increment_metric(&db, "b", "webhook_accept_total", 20, 1)
            .await
            .unwrap();
        increment_metric(&db, "b", "webhook_accept_total", 30, 0)
            .await
            .unwrap();

        assert_eq!(get_metric(&db, "b", "webhook_accept_total").await.unwrap(), 2);
        assert_eq!(get_metric(&db, "b", "never_touched").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn counters_are_per_bot() {
        let (db, _dir) = setup_db().await;
        increment_metric(&db, "b1", "k", 10, 5).await.unwrap();
        increment_metric(&db, "b2", "k", 10, 7).await.unwrap();

        assert_eq!(get_metric(&db, "b1", "k").await.unwrap(), 5);
        assert_eq!(get_metric(&db, "b2", "k").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn snapshot_includes_queue_aggregates() {
        let (db, _dir) = setup_db().await;
        accept_update(&db, "b", 1, None, "{}".into(), 10).await.unwrap();
        accept_update(&db, "b", 2, None, "{}".into(), 11).await.unwrap();
        increment_metric(&db, "b", "webhook_accept_total", 12, 2)
            .await
            .unwrap();

        let snapshot = get_metrics(&db, "b").await.unwrap();
        assert_eq!(snapshot.telegram_updates_total, 2);
        assert_eq!(snapshot.telegram_update_jobs, 2);
        assert_eq!(snapshot.cli_run_jobs, 0);
        assert_eq!(snapshot.in_flight_runs, 0);
        assert_eq!(
            snapshot.telegram_update_jobs_by_status.get("queued"),
            Some(&2)
        );
        assert_eq!(snapshot.runtime_counters.get("webhook_accept_total"), Some(&2));
    }
}
