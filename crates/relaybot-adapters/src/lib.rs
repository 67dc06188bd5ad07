// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI agent adapters for the relaybot bridge.
//!
//! Providers named in sessions resolve here: the known CLI agents run as
//! subprocesses through [`ProcessAdapter`]; `echo` is an in-process
//! sample used by tests and smoke checks.

pub mod echo;
pub mod presets;
pub mod process;

use std::sync::Arc;

use relaybot_core::{CliAdapter, RelayError};

pub use echo::EchoAdapter;
pub use presets::{
    SUPPORTED_PROVIDERS, available_models, is_allowed_model, is_supported_provider,
    provider_installed, resolve_provider_default_model, resolve_selected_model,
};
pub use process::ProcessAdapter;

/// Resolve a provider name to its adapter.
pub fn get_adapter(name: &str) -> Result<Arc<dyn CliAdapter>, RelayError> {
    match name {
        "echo" => Ok(Arc::new(EchoAdapter)),
        provider if is_supported_provider(provider) => Ok(Arc::new(ProcessAdapter::new(provider))),
        other => Err(RelayError::Adapter {
            message: format!("unknown provider: {other}"),
            source: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_providers_resolve() {
        for name in ["echo", "codex", "gemini", "claude"] {
            let adapter = get_adapter(name).unwrap();
            assert_eq!(adapter.name(), name);
        }
    }

    #[test]
    fn unknown_provider_is_an_error() {
        assert!(get_adapter("gpt4all").is_err());
    }
}
