// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row types for the storage entities.
//!
//! Statuses are kept as the raw strings stored in SQLite; the typed enums
//! in `relaybot-core` define the legal values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One conversation state per (bot_id, chat_id). At most one row is
/// `active` per pair, enforced by a partial unique index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    pub session_id: String,
    pub bot_id: String,
    pub chat_id: String,
    pub adapter_name: String,
    pub adapter_model: Option<String>,
    pub adapter_thread_id: Option<String>,
    /// "active" or "reset".
    pub status: String,
    pub rolling_summary_md: String,
    pub last_turn_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One user request plus, once completed, the agent's reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRow {
    pub turn_id: String,
    pub session_id: String,
    pub bot_id: String,
    pub chat_id: String,
    pub user_text: String,
    pub assistant_text: Option<String>,
    pub status: String,
    pub error_text: Option<String>,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub created_at: i64,
}

/// A leased update job, handed to the update worker.
#[derive(Debug, Clone)]
pub struct UpdateJobLease {
    pub id: String,
    pub update_id: i64,
}

/// A leased run job, handed to the run worker.
#[derive(Debug, Clone)]
pub struct RunJobLease {
    pub id: String,
    pub turn_id: String,
    pub chat_id: String,
}

/// Outcome of creating a turn + run job pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Created { turn_id: String },
    /// Lost the active-run uniqueness race: a run is already queued,
    /// leased, or in flight for this chat.
    ActiveRunExists,
}

/// One persisted adapter event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliEventRow {
    pub turn_id: String,
    pub bot_id: String,
    pub seq: i64,
    pub event_type: String,
    pub payload_json: String,
    pub created_at: i64,
}

/// A consumed action token with its decoded-at-rest payload.
#[derive(Debug, Clone)]
pub struct ActionTokenRow {
    pub token: String,
    pub bot_id: String,
    pub chat_id: String,
    pub action: String,
    pub payload_json: String,
    pub expires_at: i64,
}

/// A deferred button action promoted into a fresh turn.
#[derive(Debug, Clone)]
pub struct PromotedAction {
    pub action_id: String,
    pub action_type: String,
    pub turn_id: String,
}

/// The `/metrics` readout: raw counters plus queue aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub telegram_updates_total: i64,
    pub telegram_update_jobs: i64,
    pub cli_run_jobs: i64,
    pub in_flight_runs: i64,
    pub telegram_update_jobs_by_status: BTreeMap<String, i64>,
    pub cli_run_jobs_by_status: BTreeMap<String, i64>,
    pub runtime_counters: BTreeMap<String, i64>,
}
