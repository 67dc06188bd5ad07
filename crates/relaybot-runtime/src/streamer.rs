// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ordered delivery of adapter events to the chat.
//!
//! One "live" message per turn accumulates `[seq][HH:MM:SS][type] body`
//! lines via edit-in-place. When the next line would blow the
//! per-message cap, the live message is left as-is and a `[continued]`
//! message starts. Sends are strictly sequential per turn, so the
//! platform sees event N only after N-1 was accepted.
//!
//! Rate limiting: a 429 sleeps for the platform's `retry_after` and
//! retries the same call, counting `telegram_rate_limit_retry.<method>`.
//! Other send errors propagate so the run worker can persist a
//! `delivery_error` event and move on.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use relaybot_core::{AdapterEvent, AdapterEventType, RelayError, TelegramApi, TelegramError};
use relaybot_storage::Storage;
use relaybot_telegram::render::{RenderMode, render_for_telegram};
use serde_json::Value;
use tracing::warn;

/// Per-message cap, leaving margin under Telegram's 4096.
pub const MAX_MESSAGE_LEN: usize = 3800;
const MAX_RETRIES: u32 = 5;

struct TurnStreamState {
    chat_id: i64,
    message_id: i64,
    text: String,
}

pub struct DeliveryStreamer {
    telegram: Arc<dyn TelegramApi>,
    storage: Storage,
    bot_id: String,
    states: HashMap<String, TurnStreamState>,
}

impl DeliveryStreamer {
    pub fn new(telegram: Arc<dyn TelegramApi>, storage: Storage, bot_id: &str) -> Self {
        Self {
            telegram,
            storage,
            bot_id: bot_id.to_string(),
            states: HashMap::new(),
        }
    }

    /// Deliver one event into the turn's live message.
    pub async fn append_event(
        &mut self,
        turn_id: &str,
        chat_id: i64,
        event: &AdapterEvent,
    ) -> Result<(), RelayError> {
        for line in format_event_lines(event) {
            self.append_line(turn_id, chat_id, &line).await?;
        }
        Ok(())
    }

    /// Surface a delivery failure to the user as its own event line.
    pub async fn append_delivery_error(
        &mut self,
        turn_id: &str,
        chat_id: i64,
        message: &str,
    ) -> Result<(), RelayError> {
        let clipped: String = message.chars().take(500).collect();
        let event = AdapterEvent::new(
            AdapterEventType::DeliveryError,
            serde_json::json!({ "message": clipped }),
        );
        self.append_event(turn_id, chat_id, &event).await
    }

    /// Drop the live-message state for a finished turn.
    pub fn close_turn(&mut self, turn_id: &str) {
        self.states.remove(turn_id);
    }

    async fn append_line(
        &mut self,
        turn_id: &str,
        chat_id: i64,
        line: &str,
    ) -> Result<(), RelayError> {
        let live = self
            .states
            .get(turn_id)
            .map(|state| (state.chat_id, state.message_id, state.text.clone()));

        match live {
            None => {
                let message_id = self.send_with_retry(chat_id, line).await?;
                self.states.insert(
                    turn_id.to_string(),
                    TurnStreamState {
                        chat_id,
                        message_id,
                        text: line.to_string(),
                    },
                );
            }
            Some((live_chat, message_id, text)) => {
                let candidate = format!("{text}\n{line}");
                if candidate.chars().count() <= MAX_MESSAGE_LEN {
                    self.edit_with_retry(live_chat, message_id, &candidate).await?;
                    if let Some(state) = self.states.get_mut(turn_id) {
                        state.text = candidate;
                    }
                } else {
                    let continuation = format!("[continued]\n{line}");
                    let message_id = self.send_with_retry(chat_id, &continuation).await?;
                    self.states.insert(
                        turn_id.to_string(),
                        TurnStreamState {
                            chat_id,
                            message_id,
                            text: continuation,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    async fn send_with_retry(&self, chat_id: i64, text: &str) -> Result<i64, TelegramError> {
        let clipped: String = text.chars().take(MAX_MESSAGE_LEN).collect();
        for attempt in 0..MAX_RETRIES {
            let (rendered, mode) = render_for_telegram(&clipped, MAX_MESSAGE_LEN);
            let parse_mode = match mode {
                RenderMode::Html => Some("HTML"),
                RenderMode::Plain => None,
            };
            match self
                .telegram
                .send_message(chat_id, &rendered, parse_mode, None)
                .await
            {
                Ok(message_id) => return Ok(message_id),
                Err(TelegramError::RateLimited { retry_after_secs }) => {
                    self.note_rate_limit("sendMessage").await;
                    tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
                }
                Err(err) if attempt + 1 >= MAX_RETRIES => return Err(err),
                Err(_) => {
                    tokio::time::sleep(Duration::from_millis(500 * (attempt as u64 + 1))).await;
                }
            }
        }
        Err(TelegramError::Api(
            "failed to send telegram message after retries".into(),
        ))
    }

    async fn edit_with_retry(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), TelegramError> {
        let clipped: String = text.chars().take(MAX_MESSAGE_LEN).collect();
        for attempt in 0..MAX_RETRIES {
            let (rendered, mode) = render_for_telegram(&clipped, MAX_MESSAGE_LEN);
            let parse_mode = match mode {
                RenderMode::Html => Some("HTML"),
                RenderMode::Plain => None,
            };
            match self
                .telegram
                .edit_message_text(chat_id, message_id, &rendered, parse_mode)
                .await
            {
                Ok(()) => return Ok(()),
                Err(TelegramError::RateLimited { retry_after_secs }) => {
                    self.note_rate_limit("editMessageText").await;
                    tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
                }
                Err(err) if attempt + 1 >= MAX_RETRIES => return Err(err),
                Err(_) => {
                    tokio::time::sleep(Duration::from_millis(500 * (attempt as u64 + 1))).await;
                }
            }
        }
        Err(TelegramError::Api(
            "failed to edit telegram message after retries".into(),
        ))
    }

    async fn note_rate_limit(&self, method: &str) {
        let now = relaybot_core::now_ms();
        for key in [
            "telegram_rate_limit_retry_total".to_string(),
            format!("telegram_rate_limit_retry.{method}"),
        ] {
            if let Err(err) = self.storage.increment_metric(&self.bot_id, &key, now).await {
                warn!(bot_id = %self.bot_id, key, error = %err, "failed to count rate limit retry");
            }
        }
    }
}

/// Render an event as `[seq][HH:MM:SS][type] body` lines, chunking
/// oversized bodies into `(i/n)`-annotated parts.
pub fn format_event_lines(event: &AdapterEvent) -> Vec<String> {
    let prefix = format!("[{}][{}][{}] ", event.seq, to_hhmmss(&event.ts), event.event_type);
    let body = event_payload_text(event);
    if body.is_empty() {
        return vec![prefix.trim_end().to_string()];
    }

    let marker_size = 16;
    let prefix_len = prefix.chars().count();
    let max_body = (MAX_MESSAGE_LEN.saturating_sub(prefix_len + marker_size)).max(200);
    let chunks = split_chunks(&body, max_body);
    if chunks.len() == 1 {
        return vec![format!("{prefix}{}", chunks[0]).trim().to_string()];
    }
    let total = chunks.len();
    chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| format!("{prefix}({}/{total}) {chunk}", index + 1).trim().to_string())
        .collect()
}

fn event_payload_text(event: &AdapterEvent) -> String {
    let payload = &event.payload;
    match event.event_type {
        AdapterEventType::AssistantMessage | AdapterEventType::Reasoning => {
            if let Some(text) = payload.get("text").and_then(Value::as_str)
                && !text.trim().is_empty()
            {
                return text.to_string();
            }
        }
        AdapterEventType::CommandStarted | AdapterEventType::CommandCompleted => {
            let mut parts: Vec<String> = Vec::new();
            if let Some(command) = payload.get("command").and_then(Value::as_str)
                && !command.is_empty()
            {
                parts.push(command.to_string());
            }
            if event.event_type == AdapterEventType::CommandCompleted {
                if let Some(exit_code) = payload.get("exit_code") {
                    parts.push(format!("exit_code={exit_code}"));
                }
                if let Some(output) = payload.get("aggregated_output").and_then(Value::as_str)
                    && !output.is_empty()
                {
                    parts.push(output.to_string());
                }
            }
            return parts.join("\n").trim().to_string();
        }
        AdapterEventType::Error | AdapterEventType::DeliveryError => {
            if let Some(message) = payload.get("message").and_then(Value::as_str) {
                return message.to_string();
            }
        }
        _ => {}
    }
    serde_json::to_string(payload).unwrap_or_default()
}

fn to_hhmmss(iso_ts: &str) -> String {
    match DateTime::parse_from_rfc3339(iso_ts) {
        Ok(parsed) => parsed.with_timezone(&Utc).format("%H:%M:%S").to_string(),
        Err(_) => "00:00:00".to_string(),
    }
}

fn split_chunks(text: &str, chunk_size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= chunk_size {
        return vec![text.to_string()];
    }
    chars
        .chunks(chunk_size)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(seq: i64, ty: AdapterEventType, payload: Value) -> AdapterEvent {
        AdapterEvent {
            seq,
            ts: "2026-03-01T12:34:56+00:00".into(),
            event_type: ty,
            payload,
        }
    }

    #[test]
    fn formats_assistant_message_line() {
        let lines = format_event_lines(&event(
            3,
            AdapterEventType::AssistantMessage,
            json!({"text": "hello there"}),
        ));
        assert_eq!(lines, vec!["[3][12:34:56][assistant_message] hello there"]);
    }

    #[test]
    fn formats_command_completed_with_exit_code() {
        let lines = format_event_lines(&event(
            4,
            AdapterEventType::CommandCompleted,
            json!({"command": "cargo test", "exit_code": 0, "aggregated_output": "ok"}),
        ));
        assert_eq!(
            lines,
            vec!["[4][12:34:56][command_completed] cargo test\nexit_code=0\nok"]
        );
    }

    #[test]
    fn empty_payload_renders_bare_prefix() {
        let lines = format_event_lines(&event(1, AdapterEventType::TurnStarted, json!({})));
        assert_eq!(lines, vec!["[1][12:34:56][turn_started] {}"]);
    }

    #[test]
    fn unparseable_timestamp_falls_back() {
        let mut ev = event(1, AdapterEventType::Error, json!({"message": "x"}));
        ev.ts = "garbage".into();
        let lines = format_event_lines(&ev);
        assert_eq!(lines, vec!["[1][00:00:00][error] x"]);
    }

    #[test]
    fn oversized_body_is_chunked_with_markers() {
        let body = "y".repeat(MAX_MESSAGE_LEN + 500);
        let lines = format_event_lines(&event(
            2,
            AdapterEventType::AssistantMessage,
            json!({"text": body}),
        ));
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("(1/2)"));
        assert!(lines[1].contains("(2/2)"));
        for line in &lines {
            assert!(line.chars().count() <= MAX_MESSAGE_LEN);
        }
    }

    #[test]
    fn split_chunks_covers_whole_text() {
        let chunks = split_chunks(&"abc".repeat(10), 7);
        assert_eq!(chunks.concat(), "abc".repeat(10));
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 7));
    }
}
