// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session lifecycle service over the store.

use relaybot_core::RelayError;
use relaybot_storage::{SessionRow, Storage};

/// Condensed view returned for `/status`.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub session_id: String,
    pub adapter_name: String,
    pub adapter_model: Option<String>,
    pub adapter_thread_id: Option<String>,
    pub summary_preview: String,
}

#[derive(Clone)]
pub struct SessionService {
    storage: Storage,
}

impl SessionService {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub async fn get_or_create(
        &self,
        bot_id: &str,
        chat_id: &str,
        adapter_name: &str,
        adapter_model: Option<String>,
        now: i64,
    ) -> Result<SessionRow, RelayError> {
        self.storage
            .get_or_create_active_session(bot_id, chat_id, adapter_name, adapter_model, now)
            .await
    }

    /// `/new` and `/reset`: retire the active session and start a fresh
    /// one inheriting the rolling summary.
    pub async fn create_new(
        &self,
        bot_id: &str,
        chat_id: &str,
        adapter_name: &str,
        adapter_model: Option<String>,
        now: i64,
    ) -> Result<SessionRow, RelayError> {
        self.storage
            .create_fresh_session(bot_id, chat_id, adapter_name, adapter_model, now)
            .await
    }

    pub async fn switch_adapter(
        &self,
        session_id: &str,
        adapter_name: &str,
        adapter_model: Option<String>,
        now: i64,
    ) -> Result<(), RelayError> {
        self.storage
            .set_session_adapter(session_id, adapter_name, adapter_model, now)
            .await
    }

    pub async fn set_model(
        &self,
        session_id: &str,
        adapter_model: Option<String>,
        now: i64,
    ) -> Result<(), RelayError> {
        self.storage
            .set_session_model(session_id, adapter_model, now)
            .await
    }

    pub async fn status(
        &self,
        bot_id: &str,
        chat_id: &str,
    ) -> Result<Option<SessionStatus>, RelayError> {
        let Some(session) = self.storage.get_latest_session(bot_id, chat_id).await? else {
            return Ok(None);
        };
        Ok(Some(SessionStatus {
            summary_preview: preview(&session.rolling_summary_md),
            session_id: session.session_id,
            adapter_name: session.adapter_name,
            adapter_model: session.adapter_model,
            adapter_thread_id: session.adapter_thread_id,
        }))
    }

    pub async fn get_summary(&self, bot_id: &str, chat_id: &str) -> Result<String, RelayError> {
        Ok(self
            .storage
            .get_latest_session(bot_id, chat_id)
            .await?
            .map(|session| session.rolling_summary_md)
            .unwrap_or_default())
    }
}

fn preview(summary: &str) -> String {
    let flat = summary.trim().replace('\n', " ");
    if flat.chars().count() > 120 {
        let head: String = flat.chars().take(117).collect();
        format!("{head}...")
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn service() -> (SessionService, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path().join("t.db").to_str().unwrap())
            .await
            .unwrap();
        (SessionService::new(storage), dir)
    }

    #[test]
    fn preview_flattens_and_truncates() {
        assert_eq!(preview("a\nb"), "a b");
        let long = "x".repeat(200);
        let shortened = preview(&long);
        assert_eq!(shortened.chars().count(), 120);
        assert!(shortened.ends_with("..."));
    }

    #[tokio::test]
    async fn status_reports_latest_session() {
        let (service, _dir) = service().await;
        assert!(service.status("b", "1").await.unwrap().is_none());

        let session = service
            .get_or_create("b", "1", "gemini", None, 10)
            .await
            .unwrap();
        let status = service.status("b", "1").await.unwrap().unwrap();
        assert_eq!(status.session_id, session.session_id);
        assert_eq!(status.adapter_name, "gemini");
        assert_eq!(status.summary_preview, "");
    }

    #[tokio::test]
    async fn create_new_rolls_the_session() {
        let (service, _dir) = service().await;
        let first = service
            .get_or_create("b", "1", "gemini", None, 10)
            .await
            .unwrap();
        let fresh = service
            .create_new("b", "1", "gemini", None, 20)
            .await
            .unwrap();
        assert_ne!(first.session_id, fresh.session_id);

        let status = service.status("b", "1").await.unwrap().unwrap();
        assert_eq!(status.session_id, fresh.session_id);
    }
}
