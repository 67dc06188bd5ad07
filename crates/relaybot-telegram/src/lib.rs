// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Telegram transport for the relaybot bridge: the Bot API client, raw
//! envelope parsing, outbound HTML rendering, and the long-polling
//! ingress.

pub mod client;
pub mod envelope;
pub mod poller;
pub mod render;

pub use client::TelegramClient;
pub use envelope::{ParsedUpdate, extract_chat_id, parse_incoming_update};
pub use poller::run_telegram_poller;
pub use render::{RenderMode, render_for_telegram};
