// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait seams between the durable pipeline core and its collaborators.
//!
//! The core consumes exactly two external surfaces: the Telegram Bot API
//! client ([`TelegramApi`]) and the CLI agent adapter ([`CliAdapter`]).
//! Both are object-safe so the runtime can hold them as trait objects and
//! tests can substitute mocks.

pub mod adapter;
pub mod channel;

pub use adapter::{AdapterEventStream, CliAdapter};
pub use channel::TelegramApi;
