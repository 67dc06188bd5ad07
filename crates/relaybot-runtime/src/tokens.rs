// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Action tokens behind inline keyboard buttons.
//!
//! Each button carries `act:<token>` as callback data; the token row in
//! the store binds it to a bot, chat, action, and origin turn, with a
//! TTL. Consumption is single-use and validated against the presser's
//! bot + chat.

use relaybot_core::RelayError;
use relaybot_storage::Storage;
use serde_json::{Value, json};
use uuid::Uuid;

/// Default token lifetime: 24 hours.
pub const DEFAULT_TOKEN_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// Decoded token payload, as stored at issue time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionTokenPayload {
    pub action_type: String,
    pub run_source: String,
    pub chat_id: String,
    pub session_id: String,
    pub origin_turn_id: String,
}

#[derive(Clone)]
pub struct ActionTokenService {
    storage: Storage,
    ttl_ms: i64,
}

impl ActionTokenService {
    pub fn new(storage: Storage) -> Self {
        Self::with_ttl(storage, DEFAULT_TOKEN_TTL_MS)
    }

    pub fn with_ttl(storage: Storage, ttl_ms: i64) -> Self {
        Self {
            storage,
            ttl_ms: ttl_ms.max(60_000),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn issue(
        &self,
        bot_id: &str,
        chat_id: &str,
        action_type: &str,
        run_source: &str,
        session_id: &str,
        origin_turn_id: &str,
        now: i64,
    ) -> Result<String, RelayError> {
        let token = Uuid::new_v4().simple().to_string();
        let payload = json!({
            "action_type": action_type,
            "run_source": run_source,
            "chat_id": chat_id,
            "session_id": session_id,
            "origin_turn_id": origin_turn_id,
        });
        self.storage
            .create_action_token(
                &token,
                bot_id,
                chat_id,
                action_type,
                &payload.to_string(),
                now + self.ttl_ms,
                now,
            )
            .await?;
        Ok(token)
    }

    /// Consume and decode a token. `None` for unknown, expired, foreign,
    /// already-used, or undecodable tokens.
    pub async fn consume(
        &self,
        token: &str,
        bot_id: &str,
        chat_id: &str,
        now: i64,
    ) -> Result<Option<ActionTokenPayload>, RelayError> {
        let Some(row) = self
            .storage
            .consume_action_token(token, bot_id, chat_id, now)
            .await?
        else {
            return Ok(None);
        };

        let Ok(payload) = serde_json::from_str::<Value>(&row.payload_json) else {
            return Ok(None);
        };
        let field = |name: &str| -> Option<String> {
            payload
                .get(name)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let (Some(action_type), Some(run_source), Some(chat_id), Some(session_id), Some(origin)) = (
            field("action_type"),
            field("run_source"),
            field("chat_id"),
            field("session_id"),
            field("origin_turn_id"),
        ) else {
            return Ok(None);
        };
        Ok(Some(ActionTokenPayload {
            action_type,
            run_source,
            chat_id,
            session_id,
            origin_turn_id: origin,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn service() -> (ActionTokenService, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path().join("t.db").to_str().unwrap())
            .await
            .unwrap();
        (ActionTokenService::new(storage), dir)
    }

    #[tokio::test]
    async fn issue_and_consume_round_trip() {
        let (service, _dir) = service().await;
        let token = service
            .issue("b", "1001", "regen", "codex_cli", "sess-1", "turn-1", 10)
            .await
            .unwrap();

        let payload = service.consume(&token, "b", "1001", 20).await.unwrap().unwrap();
        assert_eq!(payload.action_type, "regen");
        assert_eq!(payload.session_id, "sess-1");
        assert_eq!(payload.origin_turn_id, "turn-1");

        // Single use.
        assert!(service.consume(&token, "b", "1001", 21).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_token_is_not_consumable() {
        let (service, _dir) = service().await;
        let service = ActionTokenService::with_ttl(service.storage.clone(), 60_000);
        let token = service
            .issue("b", "1001", "next", "codex_cli", "s", "t", 0)
            .await
            .unwrap();

        let late = service.consume(&token, "b", "1001", 60_001).await.unwrap();
        assert!(late.is_none());
    }
}
