// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the relaybot bridge.

use thiserror::Error;

/// The primary error type used across the relaybot workspace.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Configuration errors (invalid bots file, missing required fields).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Telegram transport errors.
    #[error(transparent)]
    Channel(#[from] TelegramError),

    /// Adapter subprocess errors (spawn failure, broken stream).
    #[error("adapter error: {message}")]
    Adapter {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation exceeded its wall-clock budget.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors returned by the Telegram Bot API transport.
///
/// Rate limiting gets its own variant because the delivery streamer
/// branches on it: a 429 is retried after `retry_after_secs`, every
/// other failure is recorded as a `delivery_error` event.
#[derive(Debug, Error)]
pub enum TelegramError {
    /// HTTP 429 with the platform's suggested wait time.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Any other Bot API failure.
    #[error("telegram api error: {0}")]
    Api(String),
}
