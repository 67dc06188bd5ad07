// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The durable two-stage pipeline: update worker, run worker, command
//! handling, session continuity, and ordered delivery back to the chat.

pub mod buttons;
pub mod commands;
pub mod run_worker;
pub mod session;
pub mod streamer;
pub mod summary;
pub mod tokens;
pub mod update_worker;
pub mod youtube;

pub use commands::{BotIdentity, CommandHandler, DEFERRED_MAX_QUEUE, INLINE_ACTIONS};
pub use run_worker::{AdapterResolver, RunWorker, default_adapter_resolver};
pub use session::{SessionService, SessionStatus};
pub use streamer::{DeliveryStreamer, MAX_MESSAGE_LEN};
pub use summary::{SummaryInput, build_recovery_preamble, build_summary};
pub use tokens::{ActionTokenPayload, ActionTokenService};
pub use update_worker::UpdateWorker;
pub use youtube::{YoutubeSearchResult, YoutubeSearchService};
