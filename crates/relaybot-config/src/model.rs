// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs.
//!
//! Global settings come from `RELAYBOT_`-prefixed environment variables;
//! the bot list comes from a YAML file. Bot entries use
//! `#[serde(deny_unknown_fields)]` so a typo in the bots file fails at
//! startup instead of silently dropping a setting.

use relaybot_core::BotMode;
use serde::{Deserialize, Serialize};

/// Process-wide defaults, loaded from the environment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalSettings {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Job lease duration in milliseconds for both queues.
    #[serde(default = "default_job_lease_ms")]
    pub job_lease_ms: i64,

    /// Idle sleep between queue polls in milliseconds.
    #[serde(default = "default_worker_poll_interval_ms")]
    pub worker_poll_interval_ms: u64,

    /// Wall-clock budget for one adapter run, in seconds.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,

    /// Maximum restart backoff for supervised child processes, in seconds.
    #[serde(default = "default_supervisor_restart_max_backoff_secs")]
    pub supervisor_restart_max_backoff_secs: u64,

    /// Telegram Bot API base URL. Pointing this at a 127.0.0.1 address
    /// switches the poller into mock-tolerant mode.
    #[serde(default = "default_telegram_api_base_url")]
    pub telegram_api_base_url: String,

    /// Bootstrap bot token for running without a bots file.
    #[serde(default)]
    pub telegram_bot_token: Option<String>,

    /// Bootstrap owner identity applied to bots that do not set one.
    #[serde(default)]
    pub telegram_owner_user_id: Option<i64>,

    /// Bootstrap bot id for running without a bots file.
    #[serde(default = "default_bot_id")]
    pub telegram_bot_id: String,

    /// Bootstrap bot display name.
    #[serde(default = "default_bot_name")]
    pub telegram_bot_name: String,

    /// Bootstrap webhook public URL; empty means polling.
    #[serde(default)]
    pub telegram_webhook_public_url: Option<String>,

    /// Bootstrap webhook path secret.
    #[serde(default)]
    pub telegram_webhook_path_secret: Option<String>,

    /// Bootstrap webhook header secret.
    #[serde(default)]
    pub telegram_webhook_secret_token: Option<String>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            log_level: default_log_level(),
            job_lease_ms: default_job_lease_ms(),
            worker_poll_interval_ms: default_worker_poll_interval_ms(),
            run_timeout_secs: default_run_timeout_secs(),
            supervisor_restart_max_backoff_secs: default_supervisor_restart_max_backoff_secs(),
            telegram_api_base_url: default_telegram_api_base_url(),
            telegram_bot_token: None,
            telegram_owner_user_id: None,
            telegram_bot_id: default_bot_id(),
            telegram_bot_name: default_bot_name(),
            telegram_webhook_public_url: None,
            telegram_webhook_path_secret: None,
            telegram_webhook_secret_token: None,
        }
    }
}

fn default_database_path() -> String {
    "relaybot.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_job_lease_ms() -> i64 {
    30_000
}

fn default_worker_poll_interval_ms() -> u64 {
    250
}

fn default_run_timeout_secs() -> u64 {
    900
}

fn default_supervisor_restart_max_backoff_secs() -> u64 {
    30
}

fn default_telegram_api_base_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_bot_id() -> String {
    "bot-1".to_string()
}

fn default_bot_name() -> String {
    "Bot 1".to_string()
}

/// Webhook settings for one bot. All fields optional; an empty
/// `public_url` means the bot ingests by long polling instead.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default)]
    pub path_secret: Option<String>,
    #[serde(default)]
    pub secret_token: Option<String>,
}

/// Per-provider model and sandbox options.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    #[serde(default)]
    pub model: Option<String>,
    /// Sandbox policy; only meaningful for providers that support one.
    #[serde(default)]
    pub sandbox: Option<String>,
}

/// One bot entry from the bots file.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BotConfig {
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mode: BotMode,
    /// Literal token, or the name of an environment variable to read it
    /// from at load time.
    pub telegram_token: String,
    #[serde(default)]
    pub owner_user_id: Option<i64>,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default = "default_adapter")]
    pub adapter: String,
    #[serde(default)]
    pub codex: ProviderConfig,
    #[serde(default)]
    pub gemini: ProviderConfig,
    #[serde(default)]
    pub claude: ProviderConfig,
    /// Per-bot database override for strict isolation between bots.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default)]
    pub telegram_api_base_url: Option<String>,
}

fn default_adapter() -> String {
    "gemini".to_string()
}

impl BotConfig {
    /// Webhook when a public URL is configured, polling otherwise.
    pub fn ingest_mode(&self) -> IngestMode {
        match self.webhook.public_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => IngestMode::Webhook,
            _ => IngestMode::Polling,
        }
    }

    /// Configured default model for the named provider.
    pub fn provider_model(&self, provider: &str) -> Option<String> {
        match provider {
            "codex" => self.codex.model.clone(),
            "gemini" => self.gemini.model.clone(),
            "claude" => self.claude.model.clone(),
            _ => None,
        }
    }
}

/// How a bot receives updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    Webhook,
    Polling,
}

/// Top-level shape of the bots YAML file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BotsFile {
    #[serde(default)]
    pub bots: Vec<BotConfig>,
}

/// Resolve the database path for a bot, falling back to the global one.
pub fn resolve_bot_database_path(bot: &BotConfig, settings: &GlobalSettings) -> String {
    bot.database_path
        .clone()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| settings.database_path.clone())
}

/// Resolve the Bot API base URL for a bot, falling back to the global one.
pub fn resolve_telegram_api_base_url(bot: &BotConfig, settings: &GlobalSettings) -> String {
    bot.telegram_api_base_url
        .clone()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| settings.telegram_api_base_url.clone())
}

/// True for base URLs that point at a local mock platform.
pub fn is_local_mock_base_url(base_url: &str) -> bool {
    let normalized = base_url.trim().to_ascii_lowercase();
    normalized.starts_with("http://127.0.0.1") || normalized.starts_with("http://localhost")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bot_with_webhook(url: Option<&str>) -> BotConfig {
        BotConfig {
            bot_id: Some("b".into()),
            name: None,
            mode: BotMode::Embedded,
            telegram_token: "t".into(),
            owner_user_id: None,
            webhook: WebhookConfig {
                public_url: url.map(str::to_string),
                path_secret: None,
                secret_token: None,
            },
            adapter: "gemini".into(),
            codex: ProviderConfig::default(),
            gemini: ProviderConfig::default(),
            claude: ProviderConfig::default(),
            database_path: None,
            telegram_api_base_url: None,
        }
    }

    #[test]
    fn ingest_mode_follows_public_url() {
        assert_eq!(bot_with_webhook(None).ingest_mode(), IngestMode::Polling);
        assert_eq!(bot_with_webhook(Some("  ")).ingest_mode(), IngestMode::Polling);
        assert_eq!(
            bot_with_webhook(Some("https://example.com/hook")).ingest_mode(),
            IngestMode::Webhook
        );
    }

    #[test]
    fn local_mock_base_url_detection() {
        assert!(is_local_mock_base_url("http://127.0.0.1:8081"));
        assert!(is_local_mock_base_url("HTTP://LOCALHOST:9000"));
        assert!(!is_local_mock_base_url("https://api.telegram.org"));
    }

    #[test]
    fn database_path_falls_back_to_global() {
        let settings = GlobalSettings::default();
        let mut bot = bot_with_webhook(None);
        assert_eq!(
            resolve_bot_database_path(&bot, &settings),
            settings.database_path
        );
        bot.database_path = Some("bot.db".into());
        assert_eq!(resolve_bot_database_path(&bot, &settings), "bot.db");
    }
}
