// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The Telegram Bot API seam.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TelegramError;

/// The five Bot API primitives the pipeline consumes.
///
/// Every method maps 1:1 to a Bot API call. `parse_mode` is the raw wire
/// value ("HTML") or `None` for plain text. A 429 response surfaces as
/// [`TelegramError::RateLimited`] carrying the platform's `retry_after`;
/// callers own the retry policy.
#[async_trait]
pub trait TelegramApi: Send + Sync {
    /// sendMessage; returns the new message id.
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        parse_mode: Option<&str>,
        reply_markup: Option<Value>,
    ) -> Result<i64, TelegramError>;

    /// editMessageText on a previously sent message.
    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        parse_mode: Option<&str>,
    ) -> Result<(), TelegramError>;

    /// answerCallbackQuery; must be called exactly once per callback.
    async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<(), TelegramError>;

    /// sendPhoto with a local file.
    async fn send_photo(
        &self,
        chat_id: i64,
        path: &Path,
        caption: Option<&str>,
    ) -> Result<(), TelegramError>;

    /// sendDocument with a local file.
    async fn send_document(
        &self,
        chat_id: i64,
        path: &Path,
        caption: Option<&str>,
    ) -> Result<(), TelegramError>;
}
