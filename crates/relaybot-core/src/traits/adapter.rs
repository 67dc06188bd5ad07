// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The CLI agent adapter seam.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::RelayError;
use crate::types::{AdapterEvent, AdapterRunRequest};

/// The lazy, finite event sequence produced by one adapter invocation.
pub type AdapterEventStream = BoxStream<'static, AdapterEvent>;

/// An external command-line AI agent.
///
/// One invocation runs one turn and yields at least a `thread_started`
/// event and exactly one terminal `turn_completed` event. An adapter that
/// cannot start its binary must not fail the call; it yields a single
/// `error` event followed by `turn_completed(status=error)` so the run
/// worker always sees a well-formed envelope.
#[async_trait]
pub trait CliAdapter: Send + Sync {
    /// Provider name as used in sessions and `/mode` (e.g. "codex").
    fn name(&self) -> &str;

    /// Run one turn, new or resumed depending on `request.thread_id`.
    async fn run_turn(&self, request: AdapterRunRequest) -> Result<AdapterEventStream, RelayError>;

    /// Pull the resumable thread id out of a `thread_started` event.
    fn extract_thread_id(&self, event: &AdapterEvent) -> Option<String> {
        if event.event_type != crate::types::AdapterEventType::ThreadStarted {
            return None;
        }
        event
            .payload
            .get("thread_id")
            .and_then(serde_json::Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}
