// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted CLI adapter double.
//!
//! Each invocation pops the next scripted turn and streams its events,
//! honoring the request's cancellation token between events the same way
//! the subprocess adapter does.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use relaybot_core::{
    AdapterEvent, AdapterEventStream, AdapterEventType, AdapterRunRequest, CliAdapter, RelayError,
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// One scripted invocation.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTurn {
    pub events: Vec<AdapterEvent>,
    /// Pause before each event; lets tests exercise the run timeout.
    pub delay_between: Option<Duration>,
}

impl ScriptedTurn {
    /// The standard happy-path envelope around one assistant message.
    pub fn happy(thread_id: &str, reply: &str) -> Self {
        Self {
            events: vec![
                AdapterEvent::new(
                    AdapterEventType::ThreadStarted,
                    json!({ "thread_id": thread_id }),
                ),
                AdapterEvent::new(AdapterEventType::TurnStarted, json!({})),
                AdapterEvent::new(AdapterEventType::AssistantMessage, json!({ "text": reply })),
                AdapterEvent::new(
                    AdapterEventType::TurnCompleted,
                    json!({ "status": "success" }),
                ),
            ],
            delay_between: None,
        }
    }

    /// An envelope that fails with the given message.
    pub fn failing(message: &str) -> Self {
        Self {
            events: vec![
                AdapterEvent::new(AdapterEventType::Error, json!({ "message": message })),
                AdapterEvent::new(
                    AdapterEventType::TurnCompleted,
                    json!({ "status": "error" }),
                ),
            ],
            delay_between: None,
        }
    }
}

/// Snapshot of one recorded invocation.
#[derive(Debug, Clone)]
pub struct RecordedRun {
    pub prompt: String,
    pub preamble: Option<String>,
    pub thread_id: Option<String>,
    pub model: Option<String>,
}

pub struct ScriptedAdapter {
    name: String,
    turns: Mutex<VecDeque<ScriptedTurn>>,
    runs: Mutex<Vec<RecordedRun>>,
}

impl ScriptedAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            turns: Mutex::new(VecDeque::new()),
            runs: Mutex::new(Vec::new()),
        }
    }

    pub fn push_turn(&self, turn: ScriptedTurn) {
        self.turns.lock().unwrap().push_back(turn);
    }

    /// Inputs of every invocation so far.
    pub fn recorded_runs(&self) -> Vec<RecordedRun> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl CliAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_turn(&self, request: AdapterRunRequest) -> Result<AdapterEventStream, RelayError> {
        self.runs.lock().unwrap().push(RecordedRun {
            prompt: request.prompt.clone(),
            preamble: request.preamble.clone(),
            thread_id: request.thread_id.clone(),
            model: request.model.clone(),
        });

        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ScriptedTurn::happy("scripted-thread", "scripted reply"));

        let cancel = request.cancel.clone();
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for event in turn.events {
                if cancel.is_cancelled() {
                    let _ = tx
                        .send(AdapterEvent::new(
                            AdapterEventType::Error,
                            json!({ "message": "cancelled" }),
                        ))
                        .await;
                    let _ = tx
                        .send(AdapterEvent::new(
                            AdapterEventType::TurnCompleted,
                            json!({ "status": "cancelled" }),
                        ))
                        .await;
                    return;
                }
                if let Some(delay) = turn.delay_between {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {}
                    }
                }
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn pops_scripts_in_order_and_falls_back() {
        let adapter = ScriptedAdapter::new("scripted");
        adapter.push_turn(ScriptedTurn::failing("boom"));

        let first: Vec<AdapterEvent> = adapter
            .run_turn(AdapterRunRequest::new("one"))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(first[0].event_type, AdapterEventType::Error);

        let second: Vec<AdapterEvent> = adapter
            .run_turn(AdapterRunRequest::new("two"))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(second.last().unwrap().completion_status(), Some("success"));

        let runs = adapter.recorded_runs();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].prompt, "one");
    }

    #[tokio::test]
    async fn cancelled_token_ends_with_cancelled_envelope() {
        let adapter = ScriptedAdapter::new("scripted");
        adapter.push_turn(ScriptedTurn::happy("thr", "never delivered"));

        let request = AdapterRunRequest::new("x");
        request.cancel.cancel();
        let events: Vec<AdapterEvent> = adapter.run_turn(request).await.unwrap().collect().await;

        assert_eq!(events.last().unwrap().completion_status(), Some("cancelled"));
    }
}
