// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP surface for the relaybot bridge: health and readiness probes,
//! the JSON metrics readout, and the Telegram webhook ingest.

pub mod handlers;
pub mod server;

pub use handlers::SECRET_TOKEN_HEADER;
pub use server::{BotIngress, GatewayState, router, start_server};
