// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Run-job worker: executes one turn end to end.
//!
//! Per leased job: mark in flight, compose the adapter input (recovery
//! preamble only while the session has no agent thread), spawn the
//! adapter, persist every event in order, stream each to the chat,
//! honor cancellation and the wall-clock budget, then settle the turn,
//! the session thread id, and the rolling summary.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use relaybot_core::{
    AdapterEvent, AdapterEventType, AdapterRunRequest, CliAdapter, RelayError, TelegramApi, now_ms,
};
use relaybot_storage::{RunJobLease, SessionRow, Storage, TurnRow};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::streamer::DeliveryStreamer;
use crate::summary::{SummaryInput, build_recovery_preamble, build_summary};

const HEARTBEAT_INTERVAL_MS: i64 = 5_000;

/// Extra time a cancelled adapter gets to flush its final events.
const CANCEL_DRAIN: Duration = Duration::from_secs(5);

/// How sessions' provider names resolve to adapters. Swappable so tests
/// can script the event stream.
pub type AdapterResolver =
    Arc<dyn Fn(&str) -> Result<Arc<dyn CliAdapter>, RelayError> + Send + Sync>;

pub fn default_adapter_resolver() -> AdapterResolver {
    Arc::new(relaybot_adapters::get_adapter)
}

pub struct RunWorker {
    bot_id: String,
    storage: Storage,
    telegram: Arc<dyn TelegramApi>,
    streamer: DeliveryStreamer,
    resolver: AdapterResolver,
    default_models: HashMap<String, Option<String>>,
    default_sandbox: Option<String>,
    lease_ms: i64,
    poll_interval_ms: u64,
    run_timeout: Duration,
    owner: String,
}

impl RunWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bot_id: &str,
        storage: Storage,
        telegram: Arc<dyn TelegramApi>,
        resolver: AdapterResolver,
        default_models: HashMap<String, Option<String>>,
        default_sandbox: Option<String>,
        lease_ms: i64,
        poll_interval_ms: u64,
        run_timeout: Duration,
    ) -> Self {
        let streamer = DeliveryStreamer::new(telegram.clone(), storage.clone(), bot_id);
        let owner = format!("run-worker:{bot_id}:{}", std::process::id());
        Self {
            bot_id: bot_id.to_string(),
            storage,
            telegram,
            streamer,
            resolver,
            default_models,
            default_sandbox,
            lease_ms,
            poll_interval_ms,
            run_timeout,
            owner,
        }
    }

    /// Worker loop; mirrors the update worker's discipline.
    pub async fn run(&mut self, cancel: CancellationToken) {
        let mut next_heartbeat_ms = 0_i64;
        while !cancel.is_cancelled() {
            let now = now_ms();
            if now >= next_heartbeat_ms {
                if let Err(err) = self
                    .storage
                    .increment_metric(&self.bot_id, "worker_heartbeat.run_worker", now)
                    .await
                {
                    warn!(bot_id = %self.bot_id, error = %err, "heartbeat metric failed");
                }
                next_heartbeat_ms = now + HEARTBEAT_INTERVAL_MS;
            }

            match self.tick().await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(self.poll_interval_ms)) => {}
                        _ = cancel.cancelled() => return,
                    }
                }
                Err(err) => {
                    error!(bot_id = %self.bot_id, error = %err, "run worker loop error");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                        _ = cancel.cancelled() => return,
                    }
                }
            }
        }
    }

    /// Lease and execute at most one run job.
    pub async fn tick(&mut self) -> Result<bool, RelayError> {
        let now = now_ms();
        let Some(lease) = self
            .storage
            .lease_next_run_job(&self.bot_id, &self.owner, now, self.lease_ms)
            .await?
        else {
            return Ok(false);
        };
        self.process_run_job(lease).await;
        Ok(true)
    }

    async fn process_run_job(&mut self, lease: RunJobLease) {
        let renew_cancel = CancellationToken::new();
        let renew_task = tokio::spawn(renew_run_lease_loop(
            self.storage.clone(),
            lease.id.clone(),
            self.lease_ms,
            renew_cancel.clone(),
        ));

        let result = self.execute(&lease).await;
        renew_cancel.cancel();
        let _ = renew_task.await;

        if let Err(err) = result {
            error!(bot_id = %self.bot_id, job_id = %lease.id, error = %err, "run worker failed job");
            if let Err(err) = self
                .storage
                .fail_run_job_and_turn(&lease.id, &lease.turn_id, &err.to_string(), true, now_ms())
                .await
            {
                error!(bot_id = %self.bot_id, error = %err, "failed to mark run job failed");
            }
            self.streamer.close_turn(&lease.turn_id);
        }

        // Whatever happened, give a queued button follow-up its chance.
        match self
            .storage
            .promote_next_deferred_action(&self.bot_id, &lease.chat_id, now_ms())
            .await
        {
            Ok(Some(promoted)) => {
                info!(
                    bot_id = %self.bot_id,
                    chat_id = %lease.chat_id,
                    action = %promoted.action_type,
                    turn_id = %promoted.turn_id,
                    "promoted deferred action"
                );
            }
            Ok(None) => {}
            Err(err) => {
                error!(bot_id = %self.bot_id, chat_id = %lease.chat_id, error = %err,
                    "failed to promote deferred action");
            }
        }
    }

    async fn execute(&mut self, lease: &RunJobLease) -> Result<(), RelayError> {
        let Some(turn) = self.storage.get_turn(&lease.turn_id).await? else {
            self.storage
                .fail_run_job_and_turn(&lease.id, &lease.turn_id, "missing turn", false, now_ms())
                .await?;
            return Ok(());
        };
        let Some(session) = self.storage.get_session(&turn.session_id).await? else {
            self.storage
                .fail_run_job_and_turn(&lease.id, &lease.turn_id, "missing session", false, now_ms())
                .await?;
            return Ok(());
        };

        self.storage
            .mark_run_in_flight(&lease.id, &turn.turn_id, now_ms())
            .await?;

        let provider = session.adapter_name.clone();
        let adapter = match (self.resolver)(&provider) {
            Ok(adapter) => adapter,
            Err(err) => {
                self.storage
                    .fail_run_job_and_turn(&lease.id, &turn.turn_id, &err.to_string(), false, now_ms())
                    .await?;
                self.count_provider_failure(&provider).await;
                return Ok(());
            }
        };

        let cancel = CancellationToken::new();
        let request = self.build_request(&session, &turn, cancel.clone());
        let stream = adapter.run_turn(request).await;
        let mut stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                self.storage
                    .fail_run_job_and_turn(&lease.id, &turn.turn_id, &err.to_string(), false, now_ms())
                    .await?;
                self.count_provider_failure(&provider).await;
                return Ok(());
            }
        };

        // Continue numbering after any events persisted by a previous
        // attempt that died mid-stream.
        let mut seq = self.storage.count_turn_events(&turn.turn_id).await? + 1;
        let chat_id: i64 = turn.chat_id.parse().unwrap_or_default();

        let mut assistant_parts: Vec<String> = Vec::new();
        let mut command_notes: Vec<String> = Vec::new();
        let mut thread_id: Option<String> = None;
        let mut completion_status = "success".to_string();
        let mut error_text: Option<String> = None;
        let mut saw_turn_completed = false;
        let mut timed_out = false;

        let mut deadline = tokio::time::Instant::now() + self.run_timeout;

        loop {
            // Soft cancellation is observed at every event boundary.
            if !cancel.is_cancelled() && self.storage.is_turn_cancelled(&turn.turn_id).await? {
                cancel.cancel();
                deadline = tokio::time::Instant::now() + CANCEL_DRAIN;
            }

            let next = tokio::time::timeout_at(deadline, stream.next()).await;
            let event = match next {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(_) if cancel.is_cancelled() => break,
                Err(_) => {
                    timed_out = true;
                    cancel.cancel();
                    deadline = tokio::time::Instant::now() + CANCEL_DRAIN;
                    continue;
                }
            };

            let event = AdapterEvent { seq, ..event };
            self.persist_and_stream(&turn, chat_id, &event, &mut seq).await?;

            match event.event_type {
                AdapterEventType::AssistantMessage => {
                    if let Some(text) = event.payload.get("text").and_then(Value::as_str)
                        && !text.trim().is_empty()
                    {
                        assistant_parts.push(text.to_string());
                    }
                }
                AdapterEventType::CommandStarted | AdapterEventType::CommandCompleted => {
                    if let Some(command) = event.payload.get("command").and_then(Value::as_str)
                        && !command.is_empty()
                    {
                        command_notes.push(command.to_string());
                    }
                }
                AdapterEventType::ThreadStarted => {
                    if let Some(candidate) = adapter.extract_thread_id(&event) {
                        thread_id = Some(candidate);
                    }
                }
                AdapterEventType::TurnCompleted => {
                    saw_turn_completed = true;
                    if let Some(status) = event.completion_status() {
                        completion_status = status.to_string();
                    }
                }
                AdapterEventType::Error => {
                    if error_text.is_none()
                        && let Some(message) = event.payload.get("message").and_then(Value::as_str)
                    {
                        error_text = Some(message.to_string());
                    }
                }
                AdapterEventType::Artifact => {
                    self.deliver_artifact(&turn, chat_id, &event, &mut seq).await?;
                }
                _ => {}
            }
        }
        drop(stream);

        let cancelled = self.storage.is_turn_cancelled(&turn.turn_id).await?
            || completion_status == "cancelled"
            || timed_out;
        if cancelled {
            // Downstream consumers always see a well-formed envelope.
            if !saw_turn_completed {
                if timed_out {
                    let message =
                        format!("run timed out after {}s", self.run_timeout.as_secs());
                    let event =
                        AdapterEvent::new(AdapterEventType::Error, json!({ "message": message }));
                    let event = AdapterEvent { seq, ..event };
                    self.persist_and_stream(&turn, chat_id, &event, &mut seq).await?;
                }
                let done = AdapterEvent::new(
                    AdapterEventType::TurnCompleted,
                    json!({ "status": "cancelled" }),
                );
                let done = AdapterEvent { seq, ..done };
                self.persist_and_stream(&turn, chat_id, &done, &mut seq).await?;
            }

            if timed_out {
                let message = format!("run timed out after {}s", self.run_timeout.as_secs());
                self.storage
                    .fail_run_job_and_turn(&lease.id, &turn.turn_id, &message, false, now_ms())
                    .await?;
                self.count_provider_failure(&provider).await;
            } else {
                self.storage
                    .mark_run_job_cancelled(&lease.id, &turn.turn_id, now_ms())
                    .await?;
            }
            self.streamer.close_turn(&turn.turn_id);
            return Ok(());
        }

        if let Some(thread_id) = &thread_id {
            self.storage
                .set_session_thread_id(&session.session_id, Some(thread_id.clone()), now_ms())
                .await?;
        }

        let assistant_text = assistant_parts
            .iter()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        // One timestamp for the terminal transition and the summary, so
        // the session's last_turn_at matches the turn's finish time.
        let finished_at = now_ms();
        let failed =
            completion_status == "error" || (error_text.is_some() && assistant_text.is_empty());
        if failed {
            let message = error_text
                .clone()
                .unwrap_or_else(|| "adapter execution failed".to_string());
            self.storage
                .fail_run_job_and_turn(&lease.id, &turn.turn_id, &message, false, finished_at)
                .await?;
            self.count_provider_failure(&provider).await;
        } else {
            self.storage
                .complete_run_job_and_turn(&lease.id, &turn.turn_id, &assistant_text, finished_at)
                .await?;
        }

        let summary = build_summary(&SummaryInput {
            previous_summary: session.rolling_summary_md.clone(),
            user_text: turn.user_text.clone(),
            assistant_text: assistant_text.clone(),
            command_notes,
            error_text,
        });
        self.storage
            .upsert_session_summary(
                &session.session_id,
                &self.bot_id,
                &turn.turn_id,
                &summary,
                finished_at,
            )
            .await?;

        self.streamer.close_turn(&turn.turn_id);
        Ok(())
    }

    fn build_request(
        &self,
        session: &SessionRow,
        turn: &TurnRow,
        cancel: CancellationToken,
    ) -> AdapterRunRequest {
        let provider = session.adapter_name.as_str();
        let mut request = AdapterRunRequest::new(turn.user_text.clone());
        request.model = relaybot_adapters::resolve_selected_model(
            provider,
            session.adapter_model.as_deref(),
            self.default_models.get(provider).cloned().flatten().as_deref(),
        );
        if provider == "codex" {
            request.sandbox = self
                .default_sandbox
                .clone()
                .or_else(|| Some("workspace-write".to_string()));
        }
        request.thread_id = session.adapter_thread_id.clone();
        // The recovery preamble rides only the first turn of a fresh
        // agent thread; once a thread id exists the agent has its own
        // memory of the conversation.
        if session.adapter_thread_id.is_none() {
            let preamble = build_recovery_preamble(&session.rolling_summary_md);
            if !preamble.is_empty() {
                request.preamble = Some(preamble);
            }
        }
        request.cancel = cancel;
        request
    }

    /// Persist one event, then deliver it. A delivery failure becomes a
    /// `delivery_error` event and the run continues.
    async fn persist_and_stream(
        &mut self,
        turn: &TurnRow,
        chat_id: i64,
        event: &AdapterEvent,
        seq: &mut i64,
    ) -> Result<(), RelayError> {
        let payload_json = json!({ "ts": event.ts, "payload": event.payload }).to_string();
        self.storage
            .append_cli_event(
                &turn.turn_id,
                &self.bot_id,
                event.seq,
                &event.event_type.to_string(),
                &payload_json,
                now_ms(),
            )
            .await?;
        *seq += 1;

        if let Err(err) = self.streamer.append_event(&turn.turn_id, chat_id, event).await {
            warn!(turn_id = %turn.turn_id, error = %err, "event delivery failed");
            let payload_json = json!({ "message": err.to_string() }).to_string();
            self.storage
                .append_cli_event(
                    &turn.turn_id,
                    &self.bot_id,
                    *seq,
                    "delivery_error",
                    &payload_json,
                    now_ms(),
                )
                .await?;
            *seq += 1;
        }
        Ok(())
    }

    /// Forward a reported artifact file: images via sendPhoto (falling
    /// back to sendDocument), everything else via sendDocument.
    async fn deliver_artifact(
        &mut self,
        turn: &TurnRow,
        chat_id: i64,
        event: &AdapterEvent,
        seq: &mut i64,
    ) -> Result<(), RelayError> {
        let Some(path_str) = event.payload.get("path").and_then(Value::as_str) else {
            return Ok(());
        };
        let path = Path::new(path_str);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path_str.to_string());

        let is_image = path
            .extension()
            .map(|ext| ext.to_ascii_lowercase())
            .is_some_and(|ext| {
                ["png", "jpg", "jpeg", "gif", "webp", "bmp", "svg"]
                    .iter()
                    .any(|image| ext == *image)
            });

        let delivery = if is_image {
            let caption = format!("[artifact:image] {name}");
            match self.telegram.send_photo(chat_id, path, Some(&caption)).await {
                Ok(()) => Ok(()),
                Err(_) => self.telegram.send_document(chat_id, path, Some(&caption)).await,
            }
        } else {
            let caption = format!("[artifact:file] {name}");
            self.telegram.send_document(chat_id, path, Some(&caption)).await
        };

        if let Err(err) = delivery {
            warn!(
                bot_id = %self.bot_id,
                chat_id,
                path = %path_str,
                error = %err,
                "artifact delivery failed"
            );
            let message = format!("artifact delivery failed for {name}: {err}");
            let payload_json = json!({ "message": message }).to_string();
            self.storage
                .append_cli_event(
                    &turn.turn_id,
                    &self.bot_id,
                    *seq,
                    "delivery_error",
                    &payload_json,
                    now_ms(),
                )
                .await?;
            *seq += 1;
            let _ = self
                .streamer
                .append_delivery_error(&turn.turn_id, chat_id, &message)
                .await;
        }
        Ok(())
    }

    async fn count_provider_failure(&self, provider: &str) {
        if let Err(err) = self
            .storage
            .increment_metric(&self.bot_id, &format!("provider_run_failed.{provider}"), now_ms())
            .await
        {
            warn!(bot_id = %self.bot_id, provider, error = %err, "failed to count provider failure");
        }
    }
}

async fn renew_run_lease_loop(
    storage: Storage,
    job_id: String,
    lease_ms: i64,
    cancel: CancellationToken,
) {
    let interval = Duration::from_millis((lease_ms / 2).max(1_000) as u64);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        if cancel.is_cancelled() {
            return;
        }
        if let Err(err) = storage.renew_run_job_lease(&job_id, now_ms(), lease_ms).await {
            warn!(job_id = %job_id, error = %err, "run job lease renewal failed");
        }
    }
}
