// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Model allow-lists per CLI provider.

/// Providers the bridge knows how to spawn.
pub const SUPPORTED_PROVIDERS: [&str; 3] = ["codex", "gemini", "claude"];

/// Allow-listed models per provider, best first.
pub fn available_models(provider: &str) -> &'static [&'static str] {
    match provider {
        "codex" => &[
            "gpt-5.3-codex",
            "gpt-5.3-codex-spark",
            "gpt-5.2-codex",
            "gpt-5.1-codex-max",
            "gpt-5.2",
            "gpt-5.1-codex-mini",
            "gpt-5",
        ],
        "gemini" => &["gemini-2.5-pro", "gemini-2.5-flash"],
        "claude" => &["claude-sonnet-4-5"],
        _ => &[],
    }
}

pub fn is_supported_provider(provider: &str) -> bool {
    SUPPORTED_PROVIDERS.contains(&provider)
}

pub fn is_allowed_model(provider: &str, model: &str) -> bool {
    available_models(provider).contains(&model)
}

/// The model a provider runs with when the session has none: the
/// configured default when allow-listed, otherwise the first preset.
pub fn resolve_provider_default_model(
    provider: &str,
    configured_default: Option<&str>,
) -> Option<String> {
    let models = available_models(provider);
    if models.is_empty() {
        return None;
    }
    if let Some(configured) = configured_default
        && models.contains(&configured)
    {
        return Some(configured.to_string());
    }
    Some(models[0].to_string())
}

/// The model an in-flight session runs with: its own allow-listed model
/// first, then the configured default, then the first preset.
pub fn resolve_selected_model(
    provider: &str,
    session_model: Option<&str>,
    configured_default: Option<&str>,
) -> Option<String> {
    if let Some(model) = session_model
        && is_allowed_model(provider, model)
    {
        return Some(model.to_string());
    }
    resolve_provider_default_model(provider, configured_default)
}

/// True when the provider binary is on PATH.
pub fn provider_installed(provider: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| {
        let candidate = dir.join(provider);
        candidate.is_file()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_prefers_configured_when_allowed() {
        assert_eq!(
            resolve_provider_default_model("gemini", Some("gemini-2.5-flash")),
            Some("gemini-2.5-flash".to_string())
        );
        assert_eq!(
            resolve_provider_default_model("gemini", Some("not-a-model")),
            Some("gemini-2.5-pro".to_string())
        );
        assert_eq!(resolve_provider_default_model("unknown", None), None);
    }

    #[test]
    fn selected_model_prefers_session_model() {
        assert_eq!(
            resolve_selected_model("codex", Some("gpt-5"), Some("gpt-5.2")),
            Some("gpt-5".to_string())
        );
        assert_eq!(
            resolve_selected_model("codex", Some("bogus"), Some("gpt-5.2")),
            Some("gpt-5.2".to_string())
        );
        assert_eq!(
            resolve_selected_model("codex", None, None),
            Some("gpt-5.3-codex".to_string())
        );
    }

    #[test]
    fn provider_support_checks() {
        assert!(is_supported_provider("claude"));
        assert!(!is_supported_provider("echo"));
        assert!(is_allowed_model("claude", "claude-sonnet-4-5"));
        assert!(!is_allowed_model("claude", "claude-2"));
    }
}
