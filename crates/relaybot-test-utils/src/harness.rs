// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end harness: temp SQLite store, mock Telegram, scripted
//! adapter, and both workers, steppable one job at a time.
//!
//! `accept_*` mirror the ingress accept procedure (including the
//! accept/duplicate counters); `drive_*` step the pipeline without
//! running worker loops, so tests stay deterministic.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use relaybot_core::{CliAdapter, RelayError, now_ms};
use relaybot_runtime::{BotIdentity, CommandHandler, RunWorker, UpdateWorker};
use relaybot_storage::Storage;
use serde_json::{Value, json};

use crate::mock_telegram::MockTelegram;
use crate::scripted_adapter::ScriptedAdapter;

pub struct TestHarnessBuilder {
    bot_id: String,
    owner_user_id: Option<i64>,
    default_adapter: String,
    run_timeout: Duration,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            bot_id: "bot-1".to_string(),
            owner_user_id: None,
            default_adapter: "gemini".to_string(),
            run_timeout: Duration::from_secs(900),
        }
    }

    pub fn with_owner(mut self, owner_user_id: i64) -> Self {
        self.owner_user_id = Some(owner_user_id);
        self
    }

    pub fn with_default_adapter(mut self, adapter: &str) -> Self {
        self.default_adapter = adapter.to_string();
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub async fn build(self) -> Result<TestHarness, RelayError> {
        let temp_dir = tempfile::TempDir::new()
            .map_err(|e| RelayError::Internal(format!("tempdir: {e}")))?;
        let db_path = temp_dir.path().join("harness.db");
        let storage = Storage::open(db_path.to_str().expect("utf-8 temp path")).await?;

        let telegram = Arc::new(MockTelegram::new());
        let adapter = Arc::new(ScriptedAdapter::new("scripted"));

        let bot = BotIdentity {
            bot_id: self.bot_id.clone(),
            bot_name: "Bot 1".to_string(),
            adapter: self.default_adapter.clone(),
            owner_user_id: self.owner_user_id,
            default_models: HashMap::new(),
        };
        let handler = Arc::new(CommandHandler::new(
            bot,
            telegram.clone(),
            storage.clone(),
            None,
        ));

        let update_worker = UpdateWorker::new(
            &self.bot_id,
            storage.clone(),
            handler.clone(),
            30_000,
            50,
        );

        let resolver_adapter: Arc<ScriptedAdapter> = adapter.clone();
        let run_worker = RunWorker::new(
            &self.bot_id,
            storage.clone(),
            telegram.clone(),
            Arc::new(move |_name: &str| Ok(resolver_adapter.clone() as Arc<dyn CliAdapter>)),
            HashMap::new(),
            None,
            30_000,
            50,
            self.run_timeout,
        );

        Ok(TestHarness {
            bot_id: self.bot_id,
            storage,
            telegram,
            adapter,
            handler,
            update_worker,
            run_worker,
            _temp_dir: temp_dir,
        })
    }
}

pub struct TestHarness {
    pub bot_id: String,
    pub storage: Storage,
    pub telegram: Arc<MockTelegram>,
    pub adapter: Arc<ScriptedAdapter>,
    pub handler: Arc<CommandHandler>,
    pub update_worker: UpdateWorker,
    pub run_worker: RunWorker,
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Ingress accept for a raw envelope; counts accept/duplicate the way
    /// the webhook does. Returns whether the update was accepted.
    pub async fn accept_envelope(&self, payload: Value) -> Result<bool, RelayError> {
        let update_id = payload
            .get("update_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| RelayError::Internal("envelope without update_id".into()))?;
        let now = now_ms();
        let chat_id = payload
            .pointer("/message/chat/id")
            .or_else(|| payload.pointer("/callback_query/message/chat/id"))
            .and_then(Value::as_i64)
            .map(|id| id.to_string());
        let accepted = self
            .storage
            .accept_update(&self.bot_id, update_id, chat_id, payload.to_string(), now)
            .await?;
        let counter = if accepted {
            "webhook_accept_total"
        } else {
            "webhook_duplicate_update"
        };
        self.storage
            .increment_metric(&self.bot_id, counter, now)
            .await?;
        Ok(accepted)
    }

    /// Accept a plain text message envelope.
    pub async fn accept_text(
        &self,
        update_id: i64,
        chat_id: i64,
        user_id: i64,
        text: &str,
    ) -> Result<bool, RelayError> {
        self.accept_envelope(json!({
            "update_id": update_id,
            "message": {
                "message_id": update_id,
                "chat": { "id": chat_id },
                "from": { "id": user_id },
                "text": text,
            }
        }))
        .await
    }

    /// Accept an inline button callback envelope.
    pub async fn accept_callback(
        &self,
        update_id: i64,
        chat_id: i64,
        user_id: i64,
        callback_query_id: &str,
        callback_data: &str,
    ) -> Result<bool, RelayError> {
        self.accept_envelope(json!({
            "update_id": update_id,
            "callback_query": {
                "id": callback_query_id,
                "from": { "id": user_id },
                "data": callback_data,
                "message": { "message_id": 1, "chat": { "id": chat_id } },
            }
        }))
        .await
    }

    /// Process at most one update job.
    pub async fn drive_update_worker(&self) -> Result<bool, RelayError> {
        self.update_worker.tick().await
    }

    /// Process at most one run job.
    pub async fn drive_run_worker(&mut self) -> Result<bool, RelayError> {
        self.run_worker.tick().await
    }

    /// Alternate both workers until neither has work.
    pub async fn drive_until_idle(&mut self) -> Result<(), RelayError> {
        loop {
            let updates = self.drive_update_worker().await?;
            let runs = self.drive_run_worker().await?;
            if !updates && !runs {
                return Ok(());
            }
        }
    }

    /// Pull the `act:<token>` callback datas out of the most recent
    /// keyboard sent to a chat, keyed by button label.
    pub fn last_keyboard_tokens(&self, chat_id: i64) -> HashMap<String, String> {
        let mut tokens = HashMap::new();
        for call in self.telegram.calls() {
            if let crate::mock_telegram::RecordedCall::SendMessage {
                chat_id: chat,
                reply_markup: Some(markup),
                ..
            } = call
                && chat == chat_id
            {
                let mut found = HashMap::new();
                if let Some(rows) = markup.get("inline_keyboard").and_then(Value::as_array) {
                    for row in rows {
                        for button in row.as_array().into_iter().flatten() {
                            let label = button.get("text").and_then(Value::as_str);
                            let data = button.get("callback_data").and_then(Value::as_str);
                            if let (Some(label), Some(data)) = (label, data) {
                                found.insert(label.to_string(), data.to_string());
                            }
                        }
                    }
                }
                if !found.is_empty() {
                    tokens = found;
                }
            }
        }
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn harness_builds_and_accepts() {
        let harness = TestHarness::builder().build().await.unwrap();
        assert!(harness.accept_text(1, 1001, 9001, "hello").await.unwrap());
        assert!(!harness.accept_text(1, 1001, 9001, "hello").await.unwrap());
        assert_eq!(
            harness
                .storage
                .get_metric(&harness.bot_id, "webhook_duplicate_update")
                .await
                .unwrap(),
            1
        );
    }
}
