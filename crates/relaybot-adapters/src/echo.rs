// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process sample adapter that echoes the prompt back.
//!
//! Useful for exercising the full pipeline without any agent binary
//! installed.

use async_trait::async_trait;
use relaybot_core::{
    AdapterEvent, AdapterEventStream, AdapterEventType, AdapterRunRequest, CliAdapter, RelayError,
};
use serde_json::json;

pub struct EchoAdapter;

#[async_trait]
impl CliAdapter for EchoAdapter {
    fn name(&self) -> &str {
        "echo"
    }

    async fn run_turn(&self, request: AdapterRunRequest) -> Result<AdapterEventStream, RelayError> {
        let thread_id = request
            .thread_id
            .clone()
            .unwrap_or_else(|| "echo-thread".to_string());
        let reply = if request.thread_id.is_some() {
            format!("echo-resume: {}", request.prompt)
        } else {
            format!("echo: {}", request.prompt)
        };

        let events = vec![
            AdapterEvent::new(
                AdapterEventType::ThreadStarted,
                json!({ "thread_id": thread_id }),
            ),
            AdapterEvent::new(AdapterEventType::TurnStarted, json!({})),
            AdapterEvent::new(AdapterEventType::AssistantMessage, json!({ "text": reply })),
            AdapterEvent::new(AdapterEventType::TurnCompleted, json!({ "status": "success" })),
        ];
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn new_turn_emits_full_envelope() {
        let adapter = EchoAdapter;
        let stream = adapter
            .run_turn(AdapterRunRequest::new("hello"))
            .await
            .unwrap();
        let events: Vec<AdapterEvent> = stream.collect().await;

        assert_eq!(events.len(), 4);
        assert_eq!(events[0].event_type, AdapterEventType::ThreadStarted);
        assert_eq!(
            adapter.extract_thread_id(&events[0]).as_deref(),
            Some("echo-thread")
        );
        assert_eq!(events[2].payload["text"], "echo: hello");
        assert_eq!(events[3].completion_status(), Some("success"));
    }

    #[tokio::test]
    async fn resume_keeps_thread_id() {
        let adapter = EchoAdapter;
        let mut request = AdapterRunRequest::new("again");
        request.thread_id = Some("prior-thread".into());

        let events: Vec<AdapterEvent> = adapter.run_turn(request).await.unwrap().collect().await;
        assert_eq!(events[0].payload["thread_id"], "prior-thread");
        assert_eq!(events[2].payload["text"], "echo-resume: again");
    }
}
