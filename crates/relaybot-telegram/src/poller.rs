// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Long-polling ingress.
//!
//! Pulls updates with a moving offset seeded from the highest update_id
//! already ingested, and funnels each through the same accept procedure
//! the webhook uses. Against a local mock platform the persisted offset
//! is ignored and ingest state cleared, since a recreated mock restarts
//! its update_id counter.

use std::time::Duration;

use relaybot_core::{RelayError, now_ms};
use relaybot_storage::Storage;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::TelegramClient;
use crate::envelope::extract_chat_id;

pub async fn run_telegram_poller(
    bot_id: &str,
    storage: Storage,
    client: TelegramClient,
    poll_interval_ms: u64,
    cancel: CancellationToken,
    ignore_persisted_offset: bool,
) -> Result<(), RelayError> {
    if ignore_persisted_offset {
        storage.reset_ingest_state(bot_id).await?;
        info!(bot_id, "poller ignoring persisted offset");
    }

    if let Err(err) = client.delete_webhook().await {
        warn!(bot_id, error = %err, "poller deleteWebhook failed");
    }

    let mut offset = if ignore_persisted_offset {
        None
    } else {
        storage.get_max_update_id(bot_id).await?.map(|max| max + 1)
    };

    loop {
        if cancel.is_cancelled() {
            info!(bot_id, "telegram poller stopping");
            return Ok(());
        }

        let updates = tokio::select! {
            result = client.get_updates_raw(offset, 25, 100) => result,
            _ = cancel.cancelled() => {
                info!(bot_id, "telegram poller stopping");
                return Ok(());
            }
        };

        match updates {
            Ok(updates) => {
                if updates.is_empty() {
                    tokio::time::sleep(Duration::from_millis(poll_interval_ms)).await;
                    continue;
                }
                for (update_id, payload) in updates {
                    if cancel.is_cancelled() {
                        return Ok(());
                    }
                    if let Err(err) =
                        accept_polled_update(&storage, bot_id, update_id, &payload, now_ms()).await
                    {
                        warn!(bot_id, update_id, error = %err, "poller failed to accept update");
                        continue;
                    }
                    if offset.is_none_or(|current| update_id >= current) {
                        offset = Some(update_id + 1);
                    }
                }
            }
            Err(err) => {
                warn!(bot_id, error = %err, "telegram poller loop error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// The shared accept procedure for one polled update: store the
/// envelope, and count the outcome the same way the webhook does. The
/// counter increment is best effort so a metric hiccup cannot stall the
/// offset. Returns whether the update was fresh.
async fn accept_polled_update(
    storage: &Storage,
    bot_id: &str,
    update_id: i64,
    payload: &Value,
    now: i64,
) -> Result<bool, RelayError> {
    let chat_id = extract_chat_id(payload);
    let accepted = storage
        .accept_update(bot_id, update_id, chat_id, payload.to_string(), now)
        .await?;
    let counter = if accepted {
        "webhook_accept_total"
    } else {
        "webhook_duplicate_update"
    };
    if let Err(err) = storage.increment_metric(bot_id, counter, now).await {
        warn!(bot_id, update_id, counter, error = %err, "failed to count polled update");
    }
    Ok(accepted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn envelope(update_id: i64) -> Value {
        json!({
            "update_id": update_id,
            "message": {
                "message_id": 1,
                "chat": { "id": 1001 },
                "from": { "id": 9001 },
                "text": "hello",
            }
        })
    }

    #[tokio::test]
    async fn polled_accept_counts_fresh_updates() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path().join("poll.db").to_str().unwrap())
            .await
            .unwrap();

        assert!(
            accept_polled_update(&storage, "bot-1", 1, &envelope(1), 10)
                .await
                .unwrap()
        );
        assert!(
            accept_polled_update(&storage, "bot-1", 2, &envelope(2), 11)
                .await
                .unwrap()
        );

        assert_eq!(
            storage
                .get_metric("bot-1", "webhook_accept_total")
                .await
                .unwrap(),
            2
        );
        assert_eq!(
            storage
                .get_metric("bot-1", "webhook_duplicate_update")
                .await
                .unwrap(),
            0
        );
        // Both rows landed, so the next restart resumes past them.
        assert_eq!(storage.get_max_update_id("bot-1").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn polled_duplicate_counts_and_stops() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path().join("poll.db").to_str().unwrap())
            .await
            .unwrap();

        assert!(
            accept_polled_update(&storage, "bot-1", 1, &envelope(1), 10)
                .await
                .unwrap()
        );
        assert!(
            !accept_polled_update(&storage, "bot-1", 1, &envelope(1), 11)
                .await
                .unwrap()
        );

        assert_eq!(
            storage
                .get_metric("bot-1", "webhook_accept_total")
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            storage
                .get_metric("bot-1", "webhook_duplicate_update")
                .await
                .unwrap(),
            1
        );

        // The duplicate enqueued nothing: exactly one update job exists.
        let first = storage
            .lease_next_update_job("bot-1", "w", 1_000, 30_000)
            .await
            .unwrap();
        assert!(first.is_some());
        let second = storage
            .lease_next_update_job("bot-1", "w", 1_000, 30_000)
            .await
            .unwrap();
        assert!(second.is_none());
    }
}

