// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite-backed store for the relaybot bridge.
//!
//! [`Storage`] is the single durable surface the workers cooperate
//! through: both job queues, sessions, turns, events, summaries, action
//! tokens, deferred button actions, and metric counters. All operations
//! delegate to the typed query modules.

pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;

use database::Database;
use relaybot_core::RelayError;

pub use models::{
    ActionTokenRow, CliEventRow, EnqueueOutcome, MetricsSnapshot, PromotedAction, RunJobLease,
    SessionRow, TurnRow, UpdateJobLease,
};

/// Handle to the store backing one bot runtime.
#[derive(Clone)]
pub struct Storage {
    db: Database,
}

impl Storage {
    /// Open the database at `path`, running migrations as needed.
    pub async fn open(path: &str) -> Result<Self, RelayError> {
        Ok(Self {
            db: Database::open(path).await?,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub async fn health_check(&self) -> Result<(), RelayError> {
        self.db.health_check().await
    }

    pub async fn close(&self) -> Result<(), RelayError> {
        self.db.close().await
    }

    // --- Bots ---

    pub async fn upsert_bot(
        &self,
        bot_id: &str,
        name: &str,
        mode: &str,
        owner_user_id: Option<i64>,
        adapter_name: &str,
        now: i64,
    ) -> Result<(), RelayError> {
        queries::bots::upsert_bot(&self.db, bot_id, name, mode, owner_user_id, adapter_name, now)
            .await
    }

    // --- Ingest + update-job queue ---

    pub async fn accept_update(
        &self,
        bot_id: &str,
        update_id: i64,
        chat_id: Option<String>,
        payload_json: String,
        now: i64,
    ) -> Result<bool, RelayError> {
        queries::updates::accept_update(&self.db, bot_id, update_id, chat_id, payload_json, now)
            .await
    }

    pub async fn lease_next_update_job(
        &self,
        bot_id: &str,
        owner: &str,
        now: i64,
        lease_ms: i64,
    ) -> Result<Option<UpdateJobLease>, RelayError> {
        queries::updates::lease_next_update_job(&self.db, bot_id, owner, now, lease_ms).await
    }

    pub async fn renew_update_job_lease(
        &self,
        job_id: &str,
        now: i64,
        lease_ms: i64,
    ) -> Result<(), RelayError> {
        queries::updates::renew_update_job_lease(&self.db, job_id, now, lease_ms).await
    }

    pub async fn complete_update_job(&self, job_id: &str, now: i64) -> Result<(), RelayError> {
        queries::updates::complete_update_job(&self.db, job_id, now).await
    }

    pub async fn fail_update_job(
        &self,
        job_id: &str,
        now: i64,
        error: &str,
    ) -> Result<(), RelayError> {
        queries::updates::fail_update_job(&self.db, job_id, now, error).await
    }

    pub async fn get_update_payload(
        &self,
        bot_id: &str,
        update_id: i64,
    ) -> Result<Option<String>, RelayError> {
        queries::updates::get_update_payload(&self.db, bot_id, update_id).await
    }

    pub async fn get_max_update_id(&self, bot_id: &str) -> Result<Option<i64>, RelayError> {
        queries::updates::get_max_update_id(&self.db, bot_id).await
    }

    pub async fn reset_ingest_state(&self, bot_id: &str) -> Result<(), RelayError> {
        queries::updates::reset_ingest_state(&self.db, bot_id).await
    }

    // --- Sessions ---

    pub async fn get_or_create_active_session(
        &self,
        bot_id: &str,
        chat_id: &str,
        adapter_name: &str,
        adapter_model: Option<String>,
        now: i64,
    ) -> Result<SessionRow, RelayError> {
        queries::sessions::get_or_create_active_session(
            &self.db,
            bot_id,
            chat_id,
            adapter_name,
            adapter_model,
            now,
        )
        .await
    }

    pub async fn get_latest_session(
        &self,
        bot_id: &str,
        chat_id: &str,
    ) -> Result<Option<SessionRow>, RelayError> {
        queries::sessions::get_latest_session(&self.db, bot_id, chat_id).await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionRow>, RelayError> {
        queries::sessions::get_session(&self.db, session_id).await
    }

    pub async fn create_fresh_session(
        &self,
        bot_id: &str,
        chat_id: &str,
        adapter_name: &str,
        adapter_model: Option<String>,
        now: i64,
    ) -> Result<SessionRow, RelayError> {
        queries::sessions::create_fresh_session(
            &self.db,
            bot_id,
            chat_id,
            adapter_name,
            adapter_model,
            now,
        )
        .await
    }

    pub async fn reset_session(&self, session_id: &str, now: i64) -> Result<(), RelayError> {
        queries::sessions::reset_session(&self.db, session_id, now).await
    }

    pub async fn set_session_adapter(
        &self,
        session_id: &str,
        adapter_name: &str,
        adapter_model: Option<String>,
        now: i64,
    ) -> Result<(), RelayError> {
        queries::sessions::set_session_adapter(&self.db, session_id, adapter_name, adapter_model, now)
            .await
    }

    pub async fn set_session_model(
        &self,
        session_id: &str,
        adapter_model: Option<String>,
        now: i64,
    ) -> Result<(), RelayError> {
        queries::sessions::set_session_model(&self.db, session_id, adapter_model, now).await
    }

    pub async fn set_session_thread_id(
        &self,
        session_id: &str,
        thread_id: Option<String>,
        now: i64,
    ) -> Result<(), RelayError> {
        queries::sessions::set_session_thread_id(&self.db, session_id, thread_id, now).await
    }

    pub async fn upsert_session_summary(
        &self,
        session_id: &str,
        bot_id: &str,
        turn_id: &str,
        summary_md: &str,
        now: i64,
    ) -> Result<(), RelayError> {
        queries::sessions::upsert_session_summary(&self.db, session_id, bot_id, turn_id, summary_md, now)
            .await
    }

    pub async fn count_session_summaries(&self, session_id: &str) -> Result<i64, RelayError> {
        queries::sessions::count_session_summaries(&self.db, session_id).await
    }

    // --- Turns + run-job queue ---

    pub async fn create_turn_and_job(
        &self,
        session_id: &str,
        bot_id: &str,
        chat_id: &str,
        user_text: &str,
        now: i64,
    ) -> Result<EnqueueOutcome, RelayError> {
        queries::runs::create_turn_and_job(&self.db, session_id, bot_id, chat_id, user_text, now)
            .await
    }

    pub async fn lease_next_run_job(
        &self,
        bot_id: &str,
        owner: &str,
        now: i64,
        lease_ms: i64,
    ) -> Result<Option<RunJobLease>, RelayError> {
        queries::runs::lease_next_run_job(&self.db, bot_id, owner, now, lease_ms).await
    }

    pub async fn mark_run_in_flight(
        &self,
        job_id: &str,
        turn_id: &str,
        now: i64,
    ) -> Result<(), RelayError> {
        queries::runs::mark_run_in_flight(&self.db, job_id, turn_id, now).await
    }

    pub async fn renew_run_job_lease(
        &self,
        job_id: &str,
        now: i64,
        lease_ms: i64,
    ) -> Result<(), RelayError> {
        queries::runs::renew_run_job_lease(&self.db, job_id, now, lease_ms).await
    }

    pub async fn complete_run_job_and_turn(
        &self,
        job_id: &str,
        turn_id: &str,
        assistant_text: &str,
        now: i64,
    ) -> Result<(), RelayError> {
        queries::runs::complete_run_job_and_turn(&self.db, job_id, turn_id, assistant_text, now)
            .await
    }

    pub async fn fail_run_job_and_turn(
        &self,
        job_id: &str,
        turn_id: &str,
        error_text: &str,
        requeue: bool,
        now: i64,
    ) -> Result<(), RelayError> {
        queries::runs::fail_run_job_and_turn(&self.db, job_id, turn_id, error_text, requeue, now)
            .await
    }

    pub async fn mark_run_job_cancelled(
        &self,
        job_id: &str,
        turn_id: &str,
        now: i64,
    ) -> Result<(), RelayError> {
        queries::runs::mark_run_job_cancelled(&self.db, job_id, turn_id, now).await
    }

    pub async fn cancel_active_run(
        &self,
        bot_id: &str,
        chat_id: &str,
        now: i64,
    ) -> Result<Option<String>, RelayError> {
        queries::runs::cancel_active_run(&self.db, bot_id, chat_id, now).await
    }

    pub async fn is_turn_cancelled(&self, turn_id: &str) -> Result<bool, RelayError> {
        queries::runs::is_turn_cancelled(&self.db, turn_id).await
    }

    pub async fn get_turn(&self, turn_id: &str) -> Result<Option<TurnRow>, RelayError> {
        queries::runs::get_turn(&self.db, turn_id).await
    }

    pub async fn get_latest_completed_turn(
        &self,
        session_id: &str,
    ) -> Result<Option<TurnRow>, RelayError> {
        queries::runs::get_latest_completed_turn(&self.db, session_id).await
    }

    pub async fn has_active_run(&self, bot_id: &str, chat_id: &str) -> Result<bool, RelayError> {
        queries::runs::has_active_run(&self.db, bot_id, chat_id).await
    }

    // --- Adapter events ---

    pub async fn append_cli_event(
        &self,
        turn_id: &str,
        bot_id: &str,
        seq: i64,
        event_type: &str,
        payload_json: &str,
        now: i64,
    ) -> Result<(), RelayError> {
        queries::runs::append_cli_event(&self.db, turn_id, bot_id, seq, event_type, payload_json, now)
            .await
    }

    pub async fn count_turn_events(&self, turn_id: &str) -> Result<i64, RelayError> {
        queries::runs::count_turn_events(&self.db, turn_id).await
    }

    pub async fn list_turn_events(&self, turn_id: &str) -> Result<Vec<CliEventRow>, RelayError> {
        queries::runs::list_turn_events(&self.db, turn_id).await
    }

    // --- Deferred button actions ---

    #[allow(clippy::too_many_arguments)]
    pub async fn enqueue_deferred_action(
        &self,
        bot_id: &str,
        chat_id: &str,
        session_id: &str,
        action_type: &str,
        prompt_text: &str,
        origin_turn_id: &str,
        max_queue: usize,
        now: i64,
    ) -> Result<String, RelayError> {
        queries::runs::enqueue_deferred_action(
            &self.db,
            bot_id,
            chat_id,
            session_id,
            action_type,
            prompt_text,
            origin_turn_id,
            max_queue,
            now,
        )
        .await
    }

    pub async fn promote_next_deferred_action(
        &self,
        bot_id: &str,
        chat_id: &str,
        now: i64,
    ) -> Result<Option<PromotedAction>, RelayError> {
        queries::runs::promote_next_deferred_action(&self.db, bot_id, chat_id, now).await
    }

    // --- Action tokens ---

    #[allow(clippy::too_many_arguments)]
    pub async fn create_action_token(
        &self,
        token: &str,
        bot_id: &str,
        chat_id: &str,
        action: &str,
        payload_json: &str,
        expires_at: i64,
        now: i64,
    ) -> Result<(), RelayError> {
        queries::tokens::create_action_token(
            &self.db,
            token,
            bot_id,
            chat_id,
            action,
            payload_json,
            expires_at,
            now,
        )
        .await
    }

    pub async fn consume_action_token(
        &self,
        token: &str,
        bot_id: &str,
        chat_id: &str,
        now: i64,
    ) -> Result<Option<ActionTokenRow>, RelayError> {
        queries::tokens::consume_action_token(&self.db, token, bot_id, chat_id, now).await
    }

    // --- Metrics ---

    pub async fn increment_metric(
        &self,
        bot_id: &str,
        metric_key: &str,
        now: i64,
    ) -> Result<(), RelayError> {
        queries::metrics::increment_metric(&self.db, bot_id, metric_key, now, 1).await
    }

    pub async fn get_metric(&self, bot_id: &str, metric_key: &str) -> Result<i64, RelayError> {
        queries::metrics::get_metric(&self.db, bot_id, metric_key).await
    }

    pub async fn get_metrics(&self, bot_id: &str) -> Result<MetricsSnapshot, RelayError> {
        queries::metrics::get_metrics(&self.db, bot_id).await
    }
}
