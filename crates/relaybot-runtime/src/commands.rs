// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Slash commands, plain-text turns, and inline button callbacks.
//!
//! The update worker hands every actionable envelope here. The strict
//! contract on callbacks: every callback query is answered exactly once,
//! even on malformed payloads or handler failure.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use relaybot_adapters::{
    SUPPORTED_PROVIDERS, available_models, is_allowed_model, provider_installed,
    resolve_provider_default_model, resolve_selected_model,
};
use relaybot_core::{RelayError, TelegramApi};
use relaybot_storage::{EnqueueOutcome, Storage};
use relaybot_telegram::parse_incoming_update;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::buttons;
use crate::session::SessionService;
use crate::tokens::{ActionTokenPayload, ActionTokenService};
use crate::youtube::YoutubeSearchService;

/// Actions wired to the inline keyboard under each queued turn.
pub const INLINE_ACTIONS: [&str; 4] = ["summary", "regen", "next", "stop"];

/// Bound on queued deferred button actions per chat.
pub const DEFERRED_MAX_QUEUE: usize = 10;

/// Identity of the bot this handler serves.
#[derive(Debug, Clone)]
pub struct BotIdentity {
    pub bot_id: String,
    pub bot_name: String,
    pub adapter: String,
    pub owner_user_id: Option<i64>,
    /// Configured default model per provider.
    pub default_models: HashMap<String, Option<String>>,
}

pub struct CommandHandler {
    bot: BotIdentity,
    telegram: Arc<dyn TelegramApi>,
    storage: Storage,
    sessions: SessionService,
    tokens: ActionTokenService,
    youtube: Option<YoutubeSearchService>,
}

impl CommandHandler {
    pub fn new(
        bot: BotIdentity,
        telegram: Arc<dyn TelegramApi>,
        storage: Storage,
        youtube: Option<YoutubeSearchService>,
    ) -> Self {
        let sessions = SessionService::new(storage.clone());
        let tokens = ActionTokenService::new(storage.clone());
        Self {
            bot,
            telegram,
            storage,
            sessions,
            tokens,
            youtube,
        }
    }

    /// Entry point for one leased update payload.
    pub async fn handle_update_payload(
        &self,
        payload: &Value,
        now_ms: i64,
    ) -> Result<(), RelayError> {
        let Some(parsed) = parse_incoming_update(payload) else {
            return Ok(());
        };

        // Owner gate.
        if let Some(owner) = self.bot.owner_user_id
            && parsed.user_id != owner
        {
            if let Some(callback_id) = &parsed.callback_query_id {
                self.safe_answer_callback(callback_id, Some("Access denied"), now_ms)
                    .await;
            } else {
                self.send(parsed.chat_id, "Access denied: owner only.").await?;
            }
            return Ok(());
        }

        if let Some(callback_id) = &parsed.callback_query_id {
            let Some(callback_data) = parsed.callback_data.as_deref() else {
                self.safe_answer_callback(callback_id, Some("Unsupported action"), now_ms)
                    .await;
                return Ok(());
            };
            if let Err(err) = self
                .handle_callback(parsed.chat_id, callback_id, callback_data, now_ms)
                .await
            {
                error!(
                    bot_id = %self.bot.bot_id,
                    chat_id = parsed.chat_id,
                    update_id = parsed.update_id,
                    error = %err,
                    "callback handling failed"
                );
                // Acknowledge and complete the job: a retry would answer
                // the same callback twice, breaking the exactly-once
                // contract.
                self.safe_answer_callback(callback_id, Some("Action failed"), now_ms)
                    .await;
            }
            return Ok(());
        }

        let text = parsed.text.as_deref().unwrap_or("").trim().to_string();
        if text.is_empty() {
            return Ok(());
        }

        let (youtube_intent, youtube_query) = parse_youtube_search_request(&text);
        if youtube_intent && self.youtube.is_some() {
            match youtube_query {
                Some(query) => self.handle_youtube_search(parsed.chat_id, &query).await?,
                None => {
                    self.send(
                        parsed.chat_id,
                        "YouTube 검색어를 함께 입력해 주세요. 예: 파이썬 asyncio 유튜브 찾아줘",
                    )
                    .await?;
                }
            }
            return Ok(());
        }

        if text.starts_with('/') {
            return self.handle_command(parsed.chat_id, &text, now_ms).await;
        }

        // Plain text: queue a turn.
        let chat_id = parsed.chat_id.to_string();
        let adapter_name = self.resolve_chat_adapter(&chat_id).await?;
        let adapter_model = self.provider_default_or_preset_model(&adapter_name);
        let session = self
            .sessions
            .get_or_create(&self.bot.bot_id, &chat_id, &adapter_name, adapter_model, now_ms)
            .await?;

        let outcome = self
            .storage
            .create_turn_and_job(&session.session_id, &self.bot.bot_id, &chat_id, &text, now_ms)
            .await?;
        let turn_id = match outcome {
            EnqueueOutcome::Created { turn_id } => turn_id,
            EnqueueOutcome::ActiveRunExists => {
                self.send(
                    parsed.chat_id,
                    "A run is already active in this chat. Use /stop first.",
                )
                .await?;
                return Ok(());
            }
        };

        let keyboard = self
            .build_turn_action_keyboard(parsed.chat_id, &session.session_id, &turn_id, now_ms)
            .await?;
        self.telegram
            .send_message(
                parsed.chat_id,
                &format!(
                    "Queued turn: {turn_id}\nsession={}\nagent={adapter_name}",
                    session.session_id
                ),
                None,
                keyboard,
            )
            .await?;
        Ok(())
    }

    async fn handle_callback(
        &self,
        chat_id: i64,
        callback_query_id: &str,
        callback_data: &str,
        now_ms: i64,
    ) -> Result<(), RelayError> {
        let chat_key = chat_id.to_string();

        if callback_data == "stop_run" {
            let stopped = self
                .storage
                .cancel_active_run(&self.bot.bot_id, &chat_key, now_ms)
                .await?;
            let reply = if stopped.is_some() { "Stopping..." } else { "No active run" };
            self.answer_callback(callback_query_id, Some(reply), now_ms).await;
            return Ok(());
        }

        let Some(token) = callback_data.strip_prefix("act:").map(str::trim) else {
            self.answer_callback(callback_query_id, Some("Unsupported action"), now_ms)
                .await;
            return Ok(());
        };
        if token.is_empty() {
            self.answer_callback(callback_query_id, Some("Invalid action token"), now_ms)
                .await;
            return Ok(());
        }

        let Some(payload) = self
            .tokens
            .consume(token, &self.bot.bot_id, &chat_key, now_ms)
            .await?
        else {
            self.answer_callback(callback_query_id, Some("Action expired or already used"), now_ms)
                .await;
            return Ok(());
        };

        if payload.run_source == "direct_cancel" || payload.action_type == "stop" {
            let stopped = self
                .storage
                .cancel_active_run(&self.bot.bot_id, &chat_key, now_ms)
                .await?;
            let reply = if stopped.is_some() { "Stopping..." } else { "No active run" };
            self.answer_callback(callback_query_id, Some(reply), now_ms).await;
            return Ok(());
        }

        if !["summary", "regen", "next"].contains(&payload.action_type.as_str()) {
            self.answer_callback(callback_query_id, Some("Unknown action"), now_ms)
                .await;
            return Ok(());
        }

        let Some(prompt_text) = self.build_prompt_from_action(&payload).await? else {
            self.answer_callback(callback_query_id, Some("Cannot build prompt for action"), now_ms)
                .await;
            return Ok(());
        };

        let active = self
            .storage
            .has_active_run(&self.bot.bot_id, &chat_key)
            .await?;
        if active {
            self.defer_action(&chat_key, &payload, &prompt_text, now_ms).await?;
            self.answer_callback(callback_query_id, Some("Queued after current run"), now_ms)
                .await;
            self.send(
                chat_id,
                &format!("[button] queued {} action.", payload.action_type),
            )
            .await?;
            return Ok(());
        }

        let outcome = self
            .storage
            .create_turn_and_job(
                &payload.session_id,
                &self.bot.bot_id,
                &chat_key,
                &prompt_text,
                now_ms,
            )
            .await?;
        let turn_id = match outcome {
            EnqueueOutcome::Created { turn_id } => turn_id,
            EnqueueOutcome::ActiveRunExists => {
                // Lost the race against a just-started run.
                self.defer_action(&chat_key, &payload, &prompt_text, now_ms).await?;
                self.answer_callback(callback_query_id, Some("Queued after current run"), now_ms)
                    .await;
                self.send(
                    chat_id,
                    &format!("[button] queued {} action.", payload.action_type),
                )
                .await?;
                return Ok(());
            }
        };

        self.answer_callback(callback_query_id, Some("Started"), now_ms).await;
        let keyboard = self
            .build_turn_action_keyboard(chat_id, &payload.session_id, &turn_id, now_ms)
            .await?;
        self.telegram
            .send_message(
                chat_id,
                &format!("[button] queued {}: {turn_id}", payload.action_type),
                None,
                keyboard,
            )
            .await?;
        Ok(())
    }

    async fn defer_action(
        &self,
        chat_key: &str,
        payload: &ActionTokenPayload,
        prompt_text: &str,
        now_ms: i64,
    ) -> Result<(), RelayError> {
        self.storage
            .enqueue_deferred_action(
                &self.bot.bot_id,
                chat_key,
                &payload.session_id,
                &payload.action_type,
                prompt_text,
                &payload.origin_turn_id,
                DEFERRED_MAX_QUEUE,
                now_ms,
            )
            .await?;
        Ok(())
    }

    /// Answer a callback and count the acknowledgement.
    async fn answer_callback(&self, callback_query_id: &str, text: Option<&str>, now_ms: i64) {
        match self.telegram.answer_callback_query(callback_query_id, text).await {
            Ok(()) => self.increment_metric("callback_ack_success", now_ms).await,
            Err(err) => {
                warn!(
                    bot_id = %self.bot.bot_id,
                    callback_query_id,
                    error = %err,
                    "failed to answer callback query"
                );
                self.increment_metric("callback_ack_failed", now_ms).await;
            }
        }
    }

    async fn safe_answer_callback(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
        now_ms: i64,
    ) {
        self.answer_callback(callback_query_id, text, now_ms).await;
    }

    async fn increment_metric(&self, metric_key: &str, now_ms: i64) {
        if let Err(err) = self
            .storage
            .increment_metric(&self.bot.bot_id, metric_key, now_ms)
            .await
        {
            warn!(bot_id = %self.bot.bot_id, metric_key, error = %err, "failed to increment metric");
        }
    }

    async fn handle_command(&self, chat_id: i64, text: &str, now_ms: i64) -> Result<(), RelayError> {
        let mut parts = text.splitn(2, char::is_whitespace);
        let command = parts.next().unwrap_or("");
        let arg = parts.next().unwrap_or("").trim().to_string();
        let chat_key = chat_id.to_string();

        match command {
            "/start" => self.send(chat_id, &self.welcome_text()).await,
            "/help" => self.send(chat_id, &self.help_text()).await,
            "/youtube" | "/yt" => {
                if self.youtube.is_none() {
                    return self.send(chat_id, "YouTube search is not enabled.").await;
                }
                if arg.is_empty() {
                    return self.send(chat_id, "Usage: /youtube <query>").await;
                }
                self.handle_youtube_search(chat_id, &arg).await
            }
            "/new" => {
                let adapter_name = self.resolve_chat_adapter(&chat_key).await?;
                let adapter_model = self.provider_default_or_preset_model(&adapter_name);
                let session = self
                    .sessions
                    .create_new(&self.bot.bot_id, &chat_key, &adapter_name, adapter_model, now_ms)
                    .await?;
                self.send(
                    chat_id,
                    &format!(
                        "New session created: {} (adapter={adapter_name})",
                        session.session_id
                    ),
                )
                .await
            }
            "/status" => {
                let Some(status) = self.sessions.status(&self.bot.bot_id, &chat_key).await? else {
                    return self
                        .send(chat_id, "No session yet. Send a message to start.")
                        .await;
                };
                let model = resolve_selected_model(
                    &status.adapter_name,
                    status.adapter_model.as_deref(),
                    self.provider_default_model(&status.adapter_name).as_deref(),
                )
                .unwrap_or_else(|| "default".to_string());
                let summary = if status.summary_preview.is_empty() {
                    "none".to_string()
                } else {
                    status.summary_preview.clone()
                };
                self.send(
                    chat_id,
                    &format!(
                        "bot={}\nadapter={}\nmodel={model}\nsession={}\nthread={}\nsummary={summary}",
                        self.bot.bot_id,
                        status.adapter_name,
                        status.session_id,
                        status.adapter_thread_id.as_deref().unwrap_or("none"),
                    ),
                )
                .await
            }
            "/reset" => {
                let existing = self.sessions.status(&self.bot.bot_id, &chat_key).await?;
                let adapter_name = existing
                    .as_ref()
                    .map(|status| status.adapter_name.clone())
                    .unwrap_or_else(|| self.bot.adapter.clone());
                let adapter_model = self.provider_default_or_preset_model(&adapter_name);
                let session = self
                    .sessions
                    .create_new(&self.bot.bot_id, &chat_key, &adapter_name, adapter_model, now_ms)
                    .await?;
                self.send(
                    chat_id,
                    &format!(
                        "Session reset. New session={} (adapter={adapter_name})",
                        session.session_id
                    ),
                )
                .await
            }
            "/summary" => {
                let summary = self.sessions.get_summary(&self.bot.bot_id, &chat_key).await?;
                if summary.trim().is_empty() {
                    self.send(chat_id, "No summary yet.").await
                } else {
                    let clipped: String = summary.chars().take(3500).collect();
                    self.send(chat_id, &format!("Summary:\n{clipped}")).await
                }
            }
            "/mode" => self.handle_mode_command(chat_id, &arg, now_ms).await,
            "/model" => self.handle_model_command(chat_id, &arg, now_ms).await,
            "/providers" => self.handle_providers_command(chat_id).await,
            "/stop" => {
                let stopped = self
                    .storage
                    .cancel_active_run(&self.bot.bot_id, &chat_key, now_ms)
                    .await?;
                let reply = if stopped.is_some() { "Stop requested." } else { "No active run." };
                self.send(chat_id, reply).await
            }
            "/echo" => {
                let reply = if arg.is_empty() { "(empty)" } else { arg.as_str() };
                self.send(chat_id, reply).await
            }
            other => {
                self.send(
                    chat_id,
                    &format!("Unknown command: {other}\n\n{}", self.help_text()),
                )
                .await
            }
        }
    }

    async fn handle_mode_command(
        &self,
        chat_id: i64,
        arg: &str,
        now_ms: i64,
    ) -> Result<(), RelayError> {
        let chat_key = chat_id.to_string();
        let status = self.sessions.status(&self.bot.bot_id, &chat_key).await?;
        let current_adapter = status
            .as_ref()
            .map(|s| s.adapter_name.clone())
            .unwrap_or_else(|| self.bot.adapter.clone());
        let current_model = resolve_selected_model(
            &current_adapter,
            status.as_ref().and_then(|s| s.adapter_model.as_deref()),
            self.provider_default_model(&current_adapter).as_deref(),
        )
        .unwrap_or_else(|| "default".to_string());

        if arg.is_empty() {
            return self
                .send(
                    chat_id,
                    &format!(
                        "mode=cli adapter={current_adapter} model={current_model}\n\
                         usage: /mode <codex|gemini|claude>\n\
                         providers={}",
                        SUPPORTED_PROVIDERS.join(", ")
                    ),
                )
                .await;
        }

        let next_adapter = arg.to_lowercase().trim().to_string();
        if !SUPPORTED_PROVIDERS.contains(&next_adapter.as_str()) {
            return self
                .send(
                    chat_id,
                    &format!(
                        "Unsupported provider: {arg}. Use one of: {}",
                        SUPPORTED_PROVIDERS.join(", ")
                    ),
                )
                .await;
        }

        if next_adapter == current_adapter {
            return self
                .send(chat_id, &format!("mode unchanged: adapter={current_adapter}"))
                .await;
        }

        let active = self
            .storage
            .has_active_run(&self.bot.bot_id, &chat_key)
            .await?;
        if active {
            return self
                .send(chat_id, "A run is active. Use /stop first, then retry /mode.")
                .await;
        }

        let next_model = self.provider_default_or_preset_model(&next_adapter);
        let session_id = match status {
            Some(status) => {
                self.sessions
                    .switch_adapter(&status.session_id, &next_adapter, next_model.clone(), now_ms)
                    .await?;
                status.session_id
            }
            None => {
                let session = self
                    .sessions
                    .get_or_create(
                        &self.bot.bot_id,
                        &chat_key,
                        &next_adapter,
                        next_model.clone(),
                        now_ms,
                    )
                    .await?;
                self.sessions
                    .switch_adapter(&session.session_id, &next_adapter, next_model.clone(), now_ms)
                    .await?;
                session.session_id
            }
        };

        self.increment_metric(&format!("provider_switch_total.{next_adapter}"), now_ms)
            .await;
        info!(
            bot_id = %self.bot.bot_id,
            chat_id,
            from = %current_adapter,
            to = %next_adapter,
            "provider switched"
        );
        self.send(
            chat_id,
            &format!(
                "mode switched: {current_adapter} -> {next_adapter}\n\
                 model={}\nsession={session_id}\n\
                 context continuity: rolling summary retained, provider thread reset.",
                next_model.as_deref().unwrap_or("default")
            ),
        )
        .await
    }

    async fn handle_model_command(
        &self,
        chat_id: i64,
        arg: &str,
        now_ms: i64,
    ) -> Result<(), RelayError> {
        let chat_key = chat_id.to_string();
        let status = self.sessions.status(&self.bot.bot_id, &chat_key).await?;
        let current_adapter = status
            .as_ref()
            .map(|s| s.adapter_name.clone())
            .unwrap_or_else(|| self.bot.adapter.clone());
        let current_model = resolve_selected_model(
            &current_adapter,
            status.as_ref().and_then(|s| s.adapter_model.as_deref()),
            self.provider_default_model(&current_adapter).as_deref(),
        )
        .unwrap_or_else(|| "default".to_string());
        let allowed = available_models(&current_adapter);

        if arg.is_empty() {
            return self
                .send(
                    chat_id,
                    &format!(
                        "adapter={current_adapter}\nmodel={current_model}\n\
                         available_models={}\nusage: /model <model-name>",
                        self.provider_models_text(&current_adapter)
                    ),
                )
                .await;
        }

        if allowed.is_empty() {
            return self
                .send(
                    chat_id,
                    &format!("No selectable model for provider={current_adapter}"),
                )
                .await;
        }
        if !is_allowed_model(&current_adapter, arg) {
            return self
                .send(
                    chat_id,
                    &format!(
                        "Unsupported model for {current_adapter}: {arg}\nallowed={}",
                        self.provider_models_text(&current_adapter)
                    ),
                )
                .await;
        }

        let active = self
            .storage
            .has_active_run(&self.bot.bot_id, &chat_key)
            .await?;
        if active {
            return self
                .send(chat_id, "A run is active. Use /stop first, then retry /model.")
                .await;
        }

        let session_id = match status {
            Some(status) => status.session_id,
            None => {
                self.sessions
                    .get_or_create(
                        &self.bot.bot_id,
                        &chat_key,
                        &current_adapter,
                        Some(arg.to_string()),
                        now_ms,
                    )
                    .await?
                    .session_id
            }
        };
        self.sessions
            .set_model(&session_id, Some(arg.to_string()), now_ms)
            .await?;

        self.send(
            chat_id,
            &format!(
                "model updated: {current_model} -> {arg}\n\
                 adapter={current_adapter}\nmodel={arg}\nsession={session_id}"
            ),
        )
        .await
    }

    async fn handle_providers_command(&self, chat_id: i64) -> Result<(), RelayError> {
        let mut lines = vec!["Available CLI providers:".to_string()];
        for provider in SUPPORTED_PROVIDERS {
            let installed = if provider_installed(provider) { "yes" } else { "no" };
            let model = self
                .provider_default_model(provider)
                .unwrap_or_else(|| "default".to_string());
            lines.push(format!("- {provider}: installed={installed}, model={model}"));
        }
        self.send(chat_id, &lines.join("\n")).await
    }

    async fn build_prompt_from_action(
        &self,
        payload: &ActionTokenPayload,
    ) -> Result<Option<String>, RelayError> {
        let Some(session) = self.storage.get_session(&payload.session_id).await? else {
            return Ok(None);
        };
        let Some(origin_turn) = self.storage.get_turn(&payload.origin_turn_id).await? else {
            return Ok(None);
        };
        let latest = self
            .storage
            .get_latest_completed_turn(&payload.session_id)
            .await?;

        let prompt = match payload.action_type.as_str() {
            "summary" => buttons::build_summary_prompt(&session, &origin_turn, latest.as_ref()),
            "regen" => buttons::build_regen_prompt(&session, &origin_turn),
            "next" => {
                let latest_assistant = latest
                    .as_ref()
                    .and_then(|turn| turn.assistant_text.clone())
                    .unwrap_or_default();
                buttons::build_next_prompt(&session, &origin_turn, &latest_assistant)
            }
            _ => return Ok(None),
        };
        Ok(Some(prompt))
    }

    /// Inline keyboard with one fresh ActionToken per button.
    async fn build_turn_action_keyboard(
        &self,
        chat_id: i64,
        session_id: &str,
        origin_turn_id: &str,
        now_ms: i64,
    ) -> Result<Option<Value>, RelayError> {
        let chat_key = chat_id.to_string();
        let mut token_map = HashMap::new();
        for action in INLINE_ACTIONS {
            let run_source = if action == "stop" { "direct_cancel" } else { "codex_cli" };
            let token = self
                .tokens
                .issue(
                    &self.bot.bot_id,
                    &chat_key,
                    action,
                    run_source,
                    session_id,
                    origin_turn_id,
                    now_ms,
                )
                .await?;
            token_map.insert(action, token);
        }

        Ok(Some(json!({
            "inline_keyboard": [
                [
                    { "text": "요약", "callback_data": format!("act:{}", token_map["summary"]) },
                    { "text": "다시생성", "callback_data": format!("act:{}", token_map["regen"]) },
                ],
                [
                    { "text": "다음추천", "callback_data": format!("act:{}", token_map["next"]) },
                    { "text": "중단", "callback_data": format!("act:{}", token_map["stop"]) },
                ],
            ]
        })))
    }

    async fn resolve_chat_adapter(&self, chat_key: &str) -> Result<String, RelayError> {
        let status = self.sessions.status(&self.bot.bot_id, chat_key).await?;
        Ok(status
            .map(|s| s.adapter_name)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.bot.adapter.clone()))
    }

    fn provider_default_model(&self, provider: &str) -> Option<String> {
        self.bot.default_models.get(provider).cloned().flatten()
    }

    fn provider_default_or_preset_model(&self, provider: &str) -> Option<String> {
        resolve_provider_default_model(provider, self.provider_default_model(provider).as_deref())
    }

    fn provider_models_text(&self, provider: &str) -> String {
        let models = available_models(provider);
        if models.is_empty() {
            "none".to_string()
        } else {
            models.join(", ")
        }
    }

    fn welcome_text(&self) -> String {
        format!(
            "{} ready.\nSend a message to run CLI.\nUse /help for commands.",
            self.bot.bot_name
        )
    }

    fn help_text(&self) -> String {
        "/start /help /new /status /reset /summary /mode /model /providers /stop /youtube\n\
         Plain text message => enqueue CLI turn"
            .to_string()
    }

    async fn handle_youtube_search(&self, chat_id: i64, query: &str) -> Result<(), RelayError> {
        let Some(youtube) = &self.youtube else {
            return Ok(());
        };
        let normalized = query.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.is_empty() {
            return self.send(chat_id, "YouTube 검색어를 입력해 주세요.").await;
        }

        match youtube.search_first_video(&normalized).await {
            // Watch URL only, so Telegram renders its native preview card.
            Some(result) => self.send(chat_id, &result.url).await,
            None => {
                self.send(
                    chat_id,
                    &format!("YouTube 검색 결과를 찾지 못했습니다: {normalized}"),
                )
                .await
            }
        }
    }

    async fn send(&self, chat_id: i64, text: &str) -> Result<(), RelayError> {
        self.telegram
            .send_message(chat_id, text, None, None)
            .await?;
        Ok(())
    }
}

/// Recognize natural-language YouTube search requests (Korean and
/// English phrasings) and extract the query.
pub fn parse_youtube_search_request(text: &str) -> (bool, Option<String>) {
    static CLEANUP: OnceLock<Vec<Regex>> = OnceLock::new();

    let lowered = text.to_lowercase();
    let youtube_variants = ["youtube", "유튜브", "유투브", "유트브", "유트뷰"];
    if !youtube_variants.iter().any(|v| lowered.contains(v)) {
        return (false, None);
    }

    let search_hints = [
        "search", "find", "recommend", "show", "찾아", "검색", "추천", "보여",
    ];
    if !search_hints.iter().any(|hint| lowered.contains(hint)) {
        return (false, None);
    }

    let patterns = CLEANUP.get_or_init(|| {
        let raw = [
            r"(?i)\byoutube\b",
            "유튜브",
            "유투브",
            "유트브",
            "유트뷰",
            "동영상",
            "영상",
            "찾아줘",
            "찾아 줘",
            "찾아",
            "검색해줘",
            "검색해 줘",
            "검색",
            "추천해줘",
            "추천해 줘",
            "추천",
            "보여줘",
            "보여 줘",
            "보여",
            "미리보기",
            "미리 보기",
            "형식으로",
            "형식",
            "이런",
            "같은",
            r"(?i)please",
            r"(?i)for me",
        ];
        raw.iter()
            .map(|pattern| Regex::new(pattern).expect("static cleanup pattern"))
            .collect()
    });

    let mut cleaned = text.to_string();
    for pattern in patterns {
        cleaned = pattern.replace_all(&cleaned, " ").into_owned();
    }
    let cleaned = cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches([' ', '.', ',', '!', '?', '\n', '\t'])
        .to_string();

    if cleaned.is_empty() {
        (true, None)
    } else {
        (true, Some(cleaned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn youtube_intent_requires_variant_and_hint() {
        assert_eq!(parse_youtube_search_request("hello world"), (false, None));
        assert_eq!(
            parse_youtube_search_request("youtube is great"),
            (false, None)
        );

        // Only the platform words are scrubbed; English hint verbs stay.
        let (intent, query) = parse_youtube_search_request("search youtube rust async");
        assert!(intent);
        assert_eq!(query.as_deref(), Some("search rust async"));
    }

    #[test]
    fn korean_phrasing_is_rewritten() {
        let (intent, query) = parse_youtube_search_request("파이썬 asyncio 유튜브 찾아줘");
        assert!(intent);
        assert_eq!(query.as_deref(), Some("파이썬 asyncio"));
    }

    #[test]
    fn bare_intent_yields_no_query() {
        let (intent, query) = parse_youtube_search_request("유튜브 검색");
        assert!(intent);
        assert!(query.is_none());
    }
}
