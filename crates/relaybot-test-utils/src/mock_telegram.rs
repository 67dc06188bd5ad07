// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory Telegram API double.
//!
//! Records every call in order and can be scripted to fail specific
//! methods (rate limit or API error) on their next invocation, which is
//! how the retry paths get exercised.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use relaybot_core::{TelegramApi, TelegramError};
use serde_json::Value;

/// One recorded Bot API call.
#[derive(Debug, Clone)]
pub enum RecordedCall {
    SendMessage {
        chat_id: i64,
        text: String,
        parse_mode: Option<String>,
        reply_markup: Option<Value>,
        message_id: i64,
    },
    EditMessage {
        chat_id: i64,
        message_id: i64,
        text: String,
        parse_mode: Option<String>,
    },
    AnswerCallback {
        callback_query_id: String,
        text: Option<String>,
    },
    SendPhoto {
        chat_id: i64,
        path: PathBuf,
        caption: Option<String>,
    },
    SendDocument {
        chat_id: i64,
        path: PathBuf,
        caption: Option<String>,
    },
}

/// Scripted failure for one upcoming call of a method.
#[derive(Debug, Clone)]
enum ScriptedFailure {
    RateLimited { retry_after_secs: u64 },
    Api(String),
}

impl ScriptedFailure {
    fn into_error(self) -> TelegramError {
        match self {
            ScriptedFailure::RateLimited { retry_after_secs } => {
                TelegramError::RateLimited { retry_after_secs }
            }
            ScriptedFailure::Api(message) => TelegramError::Api(message),
        }
    }
}

#[derive(Default)]
pub struct MockTelegram {
    calls: Mutex<Vec<RecordedCall>>,
    failures: Mutex<HashMap<String, VecDeque<ScriptedFailure>>>,
    next_message_id: AtomicI64,
}

impl MockTelegram {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            next_message_id: AtomicI64::new(1),
        }
    }

    /// Script a 429 for the next call of `method`.
    pub fn queue_rate_limit(&self, method: &str, retry_after_secs: u64) {
        self.failures
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(ScriptedFailure::RateLimited { retry_after_secs });
    }

    /// Script a non-429 failure for the next call of `method`.
    pub fn queue_api_error(&self, method: &str, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(ScriptedFailure::Api(message.to_string()));
    }

    /// All calls in arrival order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Texts of sendMessage calls to one chat, in order.
    pub fn texts_sent_to(&self, chat_id: i64) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::SendMessage {
                    chat_id: chat,
                    text,
                    ..
                } if chat == chat_id => Some(text),
                _ => None,
            })
            .collect()
    }

    /// answerCallbackQuery calls, in order.
    pub fn answered_callbacks(&self) -> Vec<(String, Option<String>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::AnswerCallback {
                    callback_query_id,
                    text,
                } => Some((callback_query_id, text)),
                _ => None,
            })
            .collect()
    }

    fn take_failure(&self, method: &str) -> Option<TelegramError> {
        self.failures
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(VecDeque::pop_front)
            .map(ScriptedFailure::into_error)
    }
}

#[async_trait]
impl TelegramApi for MockTelegram {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        parse_mode: Option<&str>,
        reply_markup: Option<Value>,
    ) -> Result<i64, TelegramError> {
        if let Some(err) = self.take_failure("sendMessage") {
            return Err(err);
        }
        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(RecordedCall::SendMessage {
            chat_id,
            text: text.to_string(),
            parse_mode: parse_mode.map(str::to_string),
            reply_markup,
            message_id,
        });
        Ok(message_id)
    }

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        parse_mode: Option<&str>,
    ) -> Result<(), TelegramError> {
        if let Some(err) = self.take_failure("editMessageText") {
            return Err(err);
        }
        self.calls.lock().unwrap().push(RecordedCall::EditMessage {
            chat_id,
            message_id,
            text: text.to_string(),
            parse_mode: parse_mode.map(str::to_string),
        });
        Ok(())
    }

    async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<(), TelegramError> {
        if let Some(err) = self.take_failure("answerCallbackQuery") {
            return Err(err);
        }
        self.calls.lock().unwrap().push(RecordedCall::AnswerCallback {
            callback_query_id: callback_query_id.to_string(),
            text: text.map(str::to_string),
        });
        Ok(())
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        path: &Path,
        caption: Option<&str>,
    ) -> Result<(), TelegramError> {
        if let Some(err) = self.take_failure("sendPhoto") {
            return Err(err);
        }
        self.calls.lock().unwrap().push(RecordedCall::SendPhoto {
            chat_id,
            path: path.to_path_buf(),
            caption: caption.map(str::to_string),
        });
        Ok(())
    }

    async fn send_document(
        &self,
        chat_id: i64,
        path: &Path,
        caption: Option<&str>,
    ) -> Result<(), TelegramError> {
        if let Some(err) = self.take_failure("sendDocument") {
            return Err(err);
        }
        self.calls.lock().unwrap().push(RecordedCall::SendDocument {
            chat_id,
            path: path.to_path_buf(),
            caption: caption.map(str::to_string),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_calls_in_order_with_ids() {
        let mock = MockTelegram::new();
        let first = mock.send_message(1, "a", None, None).await.unwrap();
        let second = mock.send_message(1, "b", None, None).await.unwrap();
        assert_eq!((first, second), (1, 2));
        assert_eq!(mock.texts_sent_to(1), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn scripted_rate_limit_fires_once() {
        let mock = MockTelegram::new();
        mock.queue_rate_limit("sendMessage", 2);

        let err = mock.send_message(1, "x", None, None).await.unwrap_err();
        assert!(matches!(
            err,
            TelegramError::RateLimited {
                retry_after_secs: 2
            }
        ));

        // Next call succeeds.
        assert!(mock.send_message(1, "x", None, None).await.is_ok());
    }
}
