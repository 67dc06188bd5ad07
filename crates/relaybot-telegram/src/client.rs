// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Telegram Bot API client via teloxide.
//!
//! Only the request API is used; updates are leased from the durable
//! queue rather than dispatched in process, so there is no Dispatcher
//! here. The base URL is overridable so the mock platform can stand in
//! for api.telegram.org.

use std::path::Path;

use async_trait::async_trait;
use relaybot_core::{TelegramApi, TelegramError};
use serde_json::Value;
use teloxide::Bot;
use teloxide::prelude::Requester;
use teloxide::types::{ChatId, InputFile, MessageId, ReplyMarkup};
use tracing::warn;

/// Thin wrapper around a teloxide [`Bot`] with the handful of extra
/// methods the poller and webhook registration need.
#[derive(Clone)]
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(token: &str, base_url: &str) -> Result<Self, TelegramError> {
        let url = reqwest::Url::parse(base_url)
            .map_err(|e| TelegramError::Api(format!("invalid telegram base url: {e}")))?;
        let bot = Bot::new(token).set_api_url(url);
        Ok(Self { bot })
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    /// getUpdates as raw `(update_id, envelope)` pairs. The envelope is
    /// stored verbatim and re-parsed by workers.
    pub async fn get_updates_raw(
        &self,
        offset: Option<i64>,
        timeout_secs: u32,
        limit: u8,
    ) -> Result<Vec<(i64, Value)>, TelegramError> {
        let mut request = self.bot.get_updates();
        request.timeout = Some(timeout_secs);
        request.limit = Some(limit);
        if let Some(offset) = offset {
            request.offset = Some(offset as i32);
        }
        let updates = request
            .await
            .map_err(|e| map_request_error("getUpdates", e))?;

        let mut raw = Vec::with_capacity(updates.len());
        for update in updates {
            let update_id = update.id.0 as i64;
            match serde_json::to_value(&update) {
                Ok(value) => raw.push((update_id, value)),
                Err(err) => {
                    warn!(update_id, error = %err, "failed to re-serialize update, skipping");
                }
            }
        }
        Ok(raw)
    }

    pub async fn register_webhook(
        &self,
        public_url: &str,
        secret_token: &str,
    ) -> Result<(), TelegramError> {
        let url = reqwest::Url::parse(public_url)
            .map_err(|e| TelegramError::Api(format!("invalid webhook url: {e}")))?;
        self.bot
            .delete_webhook()
            .await
            .map_err(|e| map_request_error("deleteWebhook", e))?;
        let mut request = self.bot.set_webhook(url);
        request.secret_token = Some(secret_token.to_string());
        request
            .await
            .map_err(|e| map_request_error("setWebhook", e))?;
        Ok(())
    }

    pub async fn delete_webhook(&self) -> Result<(), TelegramError> {
        self.bot
            .delete_webhook()
            .await
            .map_err(|e| map_request_error("deleteWebhook", e))?;
        Ok(())
    }
}

#[async_trait]
impl TelegramApi for TelegramClient {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        parse_mode: Option<&str>,
        reply_markup: Option<Value>,
    ) -> Result<i64, TelegramError> {
        let mut request = self.bot.send_message(ChatId(chat_id), text);
        if let Some(mode) = parse_mode_of(parse_mode) {
            request.parse_mode = Some(mode);
        }
        if let Some(markup) = reply_markup {
            match serde_json::from_value::<teloxide::types::InlineKeyboardMarkup>(markup) {
                Ok(keyboard) => {
                    request.reply_markup = Some(ReplyMarkup::InlineKeyboard(keyboard));
                }
                Err(err) => {
                    warn!(error = %err, "invalid inline keyboard markup, sending without");
                }
            }
        }
        let message = request
            .await
            .map_err(|e| map_request_error("sendMessage", e))?;
        Ok(message.id.0 as i64)
    }

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        parse_mode: Option<&str>,
    ) -> Result<(), TelegramError> {
        let mut request = self
            .bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id as i32), text);
        if let Some(mode) = parse_mode_of(parse_mode) {
            request.parse_mode = Some(mode);
        }
        let result = request.await;
        match result {
            Ok(_) => Ok(()),
            // An identical edit is a no-op, not a failure.
            Err(err) if err.to_string().contains("message is not modified") => Ok(()),
            Err(err) => Err(map_request_error("editMessageText", err)),
        }
    }

    async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<(), TelegramError> {
        let mut request = self.bot.answer_callback_query(callback_query_id.to_string());
        if let Some(text) = text {
            request.text = Some(text.to_string());
        }
        request
            .await
            .map_err(|e| map_request_error("answerCallbackQuery", e))?;
        Ok(())
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        path: &Path,
        caption: Option<&str>,
    ) -> Result<(), TelegramError> {
        let mut request = self
            .bot
            .send_photo(ChatId(chat_id), InputFile::file(path.to_path_buf()));
        if let Some(caption) = caption {
            request.caption = Some(caption.to_string());
        }
        request
            .await
            .map_err(|e| map_request_error("sendPhoto", e))?;
        Ok(())
    }

    async fn send_document(
        &self,
        chat_id: i64,
        path: &Path,
        caption: Option<&str>,
    ) -> Result<(), TelegramError> {
        let mut request = self
            .bot
            .send_document(ChatId(chat_id), InputFile::file(path.to_path_buf()));
        if let Some(caption) = caption {
            request.caption = Some(caption.to_string());
        }
        request
            .await
            .map_err(|e| map_request_error("sendDocument", e))?;
        Ok(())
    }
}

fn parse_mode_of(raw: Option<&str>) -> Option<teloxide::types::ParseMode> {
    match raw {
        Some("HTML") => Some(teloxide::types::ParseMode::Html),
        Some("MarkdownV2") => Some(teloxide::types::ParseMode::MarkdownV2),
        _ => None,
    }
}

/// Map a teloxide error to the transport error, keeping 429s typed.
fn map_request_error(method: &str, err: teloxide::RequestError) -> TelegramError {
    match err {
        teloxide::RequestError::RetryAfter(seconds) => TelegramError::RateLimited {
            retry_after_secs: seconds.seconds() as u64,
        },
        other => TelegramError::Api(format!("{method} failed: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(TelegramClient::new("1:a", "not a url").is_err());
        assert!(TelegramClient::new("1:a", "http://127.0.0.1:8081").is_ok());
    }

    #[test]
    fn retry_after_maps_to_rate_limited() {
        let err = map_request_error(
            "sendMessage",
            teloxide::RequestError::RetryAfter(teloxide::types::Seconds::from_seconds(4)),
        );
        assert!(matches!(
            err,
            TelegramError::RateLimited {
                retry_after_secs: 4
            }
        ));
    }
}
