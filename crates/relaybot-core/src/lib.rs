// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the relaybot bridge.
//!
//! Holds the error types, the shared domain enums, the adapter event
//! model, and the two collaborator traits ([`TelegramApi`], [`CliAdapter`])
//! everything else in the workspace builds on.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{RelayError, TelegramError};
pub use traits::{AdapterEventStream, CliAdapter, TelegramApi};
pub use types::{
    AdapterEvent, AdapterEventType, AdapterRunRequest, BotMode, JobStatus, TurnStatus, now_ms,
    utc_now_iso,
};
