// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared across the relaybot workspace.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

/// Current time as epoch milliseconds, the unit used for every persisted
/// timestamp.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current time as an ISO 8601 string, the unit used on adapter events.
pub fn utc_now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Runtime mode of a bot: one process hosting everything, or a shared
/// ingress gateway plus a worker-only process.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize, Default,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BotMode {
    #[default]
    Embedded,
    Gateway,
}

/// State machine shared by both durable job queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Leased,
    InFlight,
    Completed,
    Failed,
    Cancelled,
}

/// Lifecycle of a single user turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Queued,
    InFlight,
    Completed,
    Failed,
    Cancelled,
}

/// Typed events emitted by a CLI adapter for one turn.
///
/// `DeliveryError` is never produced by adapters; the run worker
/// synthesizes it when a platform send fails mid-stream.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AdapterEventType {
    ThreadStarted,
    TurnStarted,
    Reasoning,
    CommandStarted,
    CommandCompleted,
    BridgeStatus,
    AssistantMessage,
    Artifact,
    Error,
    TurnCompleted,
    DeliveryError,
}

/// A single event in an adapter's output stream.
///
/// `seq` is assigned by the run worker at persistence time; adapters may
/// fill it with their own local numbering, which is overwritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterEvent {
    pub seq: i64,
    /// ISO 8601 emission timestamp.
    pub ts: String,
    pub event_type: AdapterEventType,
    /// Event-type-specific JSON payload.
    pub payload: Value,
}

impl AdapterEvent {
    pub fn new(event_type: AdapterEventType, payload: Value) -> Self {
        Self {
            seq: 0,
            ts: utc_now_iso(),
            event_type,
            payload,
        }
    }

    /// The terminal status carried by a `turn_completed` event, if any.
    pub fn completion_status(&self) -> Option<&str> {
        if self.event_type != AdapterEventType::TurnCompleted {
            return None;
        }
        self.payload.get("status").and_then(Value::as_str)
    }
}

/// Input for one adapter invocation.
///
/// `thread_id` is the opaque resumable identifier persisted on the
/// session; `None` starts a fresh agent thread. `cancel` is raised by the
/// run worker on `/stop`, a stop button, or the run timeout.
#[derive(Debug, Clone)]
pub struct AdapterRunRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub sandbox: Option<String>,
    pub preamble: Option<String>,
    pub thread_id: Option<String>,
    pub workdir: Option<std::path::PathBuf>,
    pub cancel: tokio_util::sync::CancellationToken,
}

impl AdapterRunRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: None,
            sandbox: None,
            preamble: None,
            thread_id: None,
            workdir: None,
            cancel: tokio_util::sync::CancellationToken::new(),
        }
    }

    /// The text handed to the agent binary: recovery preamble (when
    /// present) followed by the user message.
    pub fn composed_prompt(&self) -> String {
        match self.preamble.as_deref().map(str::trim) {
            Some(preamble) if !preamble.is_empty() => {
                format!("{preamble}\n\n[User Message]\n{}", self.prompt)
            }
            _ => self.prompt.clone(),
        }
    }
}
