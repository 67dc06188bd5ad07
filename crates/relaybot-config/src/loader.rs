// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loading with Figment.
//!
//! Global settings merge compiled defaults with `RELAYBOT_` environment
//! variables. The bot list is a YAML file; each entry is normalized
//! (generated ids, webhook secret defaults, env token substitution) and
//! validated before use.

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use relaybot_core::RelayError;

use crate::model::{BotConfig, BotsFile, GlobalSettings, WebhookConfig, is_local_mock_base_url};

/// Fallback token handed to bots that target a local mock platform
/// without configuring a token of their own.
const VIRTUAL_TOKEN: &str = "mock_token_1";

/// Load global settings from compiled defaults plus `RELAYBOT_*` env vars.
pub fn load_global_settings() -> Result<GlobalSettings, RelayError> {
    Figment::new()
        .merge(Serialized::defaults(GlobalSettings::default()))
        .merge(Env::prefixed("RELAYBOT_"))
        .extract()
        .map_err(|e| RelayError::Config(format!("invalid global settings: {e}")))
}

/// Load and normalize the bots file.
///
/// A missing or empty file falls back to a single bot built from the
/// bootstrap environment settings when a token (or a mock base URL) is
/// available; otherwise loading fails.
pub fn load_bots_config(
    path: &Path,
    settings: &GlobalSettings,
) -> Result<Vec<BotConfig>, RelayError> {
    let mut bots = if path.exists() {
        let file: BotsFile = Figment::new()
            .merge(Yaml::file(path))
            .extract()
            .map_err(|e| RelayError::Config(format!("invalid bots config at {path:?}: {e}")))?;
        file.bots
    } else {
        Vec::new()
    };

    if bots.is_empty() {
        match build_env_bot(settings) {
            Some(bot) => bots.push(bot),
            None => {
                return Err(RelayError::Config(format!(
                    "bots config not found at {path:?} and RELAYBOT_TELEGRAM_BOT_TOKEN is not set"
                )));
            }
        }
    }

    let normalized = normalize_bots(bots, settings)?;

    let mut ids: Vec<&str> = normalized.iter().filter_map(|b| b.bot_id.as_deref()).collect();
    ids.sort_unstable();
    ids.dedup();
    if ids.len() != normalized.len() {
        return Err(RelayError::Config(
            "bots config contains duplicate bot_id values".into(),
        ));
    }
    let mut tokens: Vec<&str> = normalized.iter().map(|b| b.telegram_token.as_str()).collect();
    tokens.sort_unstable();
    tokens.dedup();
    if tokens.len() != normalized.len() {
        return Err(RelayError::Config(
            "bots config contains duplicate telegram_token values".into(),
        ));
    }

    Ok(normalized)
}

/// Build the single bootstrap bot from environment settings.
fn build_env_bot(settings: &GlobalSettings) -> Option<BotConfig> {
    let mut token = settings
        .telegram_bot_token
        .as_deref()
        .unwrap_or("")
        .trim()
        .to_string();
    if token.is_empty() && is_local_mock_base_url(&settings.telegram_api_base_url) {
        token = VIRTUAL_TOKEN.to_string();
    }
    if token.is_empty() {
        return None;
    }

    let bot_id = settings.telegram_bot_id.trim();
    let bot_id = if bot_id.is_empty() { "bot-1" } else { bot_id };

    Some(BotConfig {
        bot_id: Some(bot_id.to_string()),
        name: Some(settings.telegram_bot_name.clone()),
        mode: Default::default(),
        telegram_token: token,
        owner_user_id: settings.telegram_owner_user_id,
        webhook: WebhookConfig {
            public_url: settings.telegram_webhook_public_url.clone(),
            path_secret: settings.telegram_webhook_path_secret.clone(),
            secret_token: settings.telegram_webhook_secret_token.clone(),
        },
        adapter: "gemini".into(),
        codex: Default::default(),
        gemini: Default::default(),
        claude: Default::default(),
        database_path: None,
        telegram_api_base_url: None,
    })
}

/// Fill in generated ids, webhook secret defaults, and resolved tokens.
fn normalize_bots(
    bots: Vec<BotConfig>,
    settings: &GlobalSettings,
) -> Result<Vec<BotConfig>, RelayError> {
    let fallback_token = settings
        .telegram_bot_token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let mut normalized = Vec::with_capacity(bots.len());
    for (index, mut bot) in bots.into_iter().enumerate() {
        let ordinal = index + 1;
        let base_url = bot
            .telegram_api_base_url
            .as_deref()
            .unwrap_or(&settings.telegram_api_base_url);
        let is_mock = is_local_mock_base_url(base_url);

        let token = resolve_token(&bot.telegram_token, fallback_token, is_mock);
        let token = token.ok_or_else(|| {
            RelayError::Config(format!("bot[{ordinal}] telegram_token is required"))
        })?;
        bot.telegram_token = token;

        let bot_id = bot
            .bot_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("bot-{ordinal}"));
        if bot.name.as_deref().map(str::trim).unwrap_or("").is_empty() {
            bot.name = Some(format!("Bot {ordinal}"));
        }
        if bot.owner_user_id.is_none() {
            bot.owner_user_id = settings.telegram_owner_user_id;
        }
        if bot
            .webhook
            .path_secret
            .as_deref()
            .map(str::trim)
            .unwrap_or("")
            .is_empty()
        {
            bot.webhook.path_secret = Some(format!("{bot_id}-path"));
        }
        if bot
            .webhook
            .secret_token
            .as_deref()
            .map(str::trim)
            .unwrap_or("")
            .is_empty()
        {
            bot.webhook.secret_token = Some(format!("{bot_id}-secret"));
        }
        bot.bot_id = Some(bot_id);
        normalized.push(bot);
    }
    Ok(normalized)
}

/// Resolve a bot token: a literal value passes through; an env-var-shaped
/// value (ALL_CAPS identifier) is substituted from the environment; an
/// empty value falls back to the bootstrap token or, against a mock
/// platform, the virtual token.
fn resolve_token(raw: &str, fallback: Option<&str>, is_mock: bool) -> Option<String> {
    let trimmed = raw.trim();
    if looks_like_env_var(trimmed) {
        if let Ok(value) = std::env::var(trimmed) {
            let value = value.trim().to_string();
            if !value.is_empty() {
                return Some(value);
            }
        }
        return fallback
            .map(str::to_string)
            .or_else(|| is_mock.then(|| VIRTUAL_TOKEN.to_string()));
    }
    if trimmed.is_empty() {
        return fallback
            .map(str::to_string)
            .or_else(|| is_mock.then(|| VIRTUAL_TOKEN.to_string()));
    }
    Some(trimmed.to_string())
}

fn looks_like_env_var(value: &str) -> bool {
    !value.is_empty()
        && value.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        && value
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_bots_file(dir: &tempfile::TempDir, content: &str) -> std::path::PathBuf {
        let path = dir.path().join("bots.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_and_normalizes_bots_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_bots_file(
            &dir,
            "bots:\n  - telegram_token: \"123:abc\"\n    adapter: claude\n  - telegram_token: \"456:def\"\n    bot_id: named\n",
        );
        let settings = GlobalSettings::default();

        let bots = load_bots_config(&path, &settings).unwrap();
        assert_eq!(bots.len(), 2);
        assert_eq!(bots[0].bot_id.as_deref(), Some("bot-1"));
        assert_eq!(bots[0].adapter, "claude");
        assert_eq!(bots[0].webhook.path_secret.as_deref(), Some("bot-1-path"));
        assert_eq!(bots[1].bot_id.as_deref(), Some("named"));
        assert_eq!(
            bots[1].webhook.secret_token.as_deref(),
            Some("named-secret")
        );
    }

    #[test]
    fn duplicate_bot_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_bots_file(
            &dir,
            "bots:\n  - bot_id: dup\n    telegram_token: \"1:a\"\n  - bot_id: dup\n    telegram_token: \"2:b\"\n",
        );
        let settings = GlobalSettings::default();
        assert!(load_bots_config(&path, &settings).is_err());
    }

    #[test]
    fn missing_file_without_token_fails() {
        let dir = tempfile::tempdir().unwrap();
        let settings = GlobalSettings::default();
        let result = load_bots_config(&dir.path().join("absent.yaml"), &settings);
        assert!(result.is_err());
    }

    #[test]
    fn missing_file_with_bootstrap_token_builds_env_bot() {
        let dir = tempfile::tempdir().unwrap();
        let settings = GlobalSettings {
            telegram_bot_token: Some("999:zzz".into()),
            telegram_owner_user_id: Some(9001),
            ..GlobalSettings::default()
        };
        let bots = load_bots_config(&dir.path().join("absent.yaml"), &settings).unwrap();
        assert_eq!(bots.len(), 1);
        assert_eq!(bots[0].telegram_token, "999:zzz");
        assert_eq!(bots[0].owner_user_id, Some(9001));
    }

    #[test]
    fn mock_base_url_gets_virtual_token() {
        let dir = tempfile::tempdir().unwrap();
        let settings = GlobalSettings {
            telegram_api_base_url: "http://127.0.0.1:8081".into(),
            ..GlobalSettings::default()
        };
        let bots = load_bots_config(&dir.path().join("absent.yaml"), &settings).unwrap();
        assert_eq!(bots[0].telegram_token, VIRTUAL_TOKEN);
    }

    #[test]
    fn env_var_shaped_token_is_detected() {
        assert!(looks_like_env_var("TELEGRAM_BOT_TOKEN"));
        assert!(looks_like_env_var("MY_TOKEN_2"));
        assert!(!looks_like_env_var("123:abc-def"));
        assert!(!looks_like_env_var(""));
    }
}
