// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for the relaybot bridge: global environment settings
//! plus the YAML bots file.

pub mod loader;
pub mod model;

pub use loader::{load_bots_config, load_global_settings};
pub use model::{
    BotConfig, BotsFile, GlobalSettings, IngestMode, ProviderConfig, WebhookConfig,
    is_local_mock_base_url, resolve_bot_database_path, resolve_telegram_api_base_url,
};
