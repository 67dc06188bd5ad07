// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runtime assembly for a single bot (embedded or worker-only) and for
//! the shared gateway.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use relaybot_config::{
    BotConfig, GlobalSettings, IngestMode, is_local_mock_base_url, resolve_bot_database_path,
    resolve_telegram_api_base_url,
};
use relaybot_core::{RelayError, TelegramApi, now_ms};
use relaybot_gateway::{BotIngress, GatewayState, start_server};
use relaybot_runtime::{
    BotIdentity, CommandHandler, RunWorker, UpdateWorker, YoutubeSearchService,
    default_adapter_resolver,
};
use relaybot_storage::Storage;
use relaybot_telegram::{TelegramClient, run_telegram_poller};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("relaybot={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}

/// A cancellation token that fires on SIGINT or SIGTERM.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate());
            match term {
                Ok(mut term) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = term.recv() => {}
                    }
                }
                Err(_) => {
                    let _ = ctrl_c.await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("shutdown signal received");
        trigger.cancel();
    });
    token
}

struct BotRuntime {
    bot_id: String,
    storage: Storage,
    tasks: Vec<JoinHandle<()>>,
}

/// Build storage, client, and both workers for one bot, spawning the
/// worker loops (and the poller when the bot ingests by polling).
async fn start_bot_runtime(
    bot: &BotConfig,
    settings: &GlobalSettings,
    cancel: &CancellationToken,
) -> Result<BotRuntime, RelayError> {
    let bot_id = bot
        .bot_id
        .clone()
        .ok_or_else(|| RelayError::Config("bot entry missing bot_id".into()))?;
    let bot_name = bot.name.clone().unwrap_or_else(|| bot_id.clone());

    let storage = Storage::open(&resolve_bot_database_path(bot, settings)).await?;
    storage
        .upsert_bot(
            &bot_id,
            &bot_name,
            &bot.mode.to_string(),
            bot.owner_user_id,
            &bot.adapter,
            now_ms(),
        )
        .await?;

    let base_url = resolve_telegram_api_base_url(bot, settings);
    let client = TelegramClient::new(&bot.telegram_token, &base_url)?;
    let telegram: Arc<dyn TelegramApi> = Arc::new(client.clone());

    let default_models: HashMap<String, Option<String>> = ["codex", "gemini", "claude"]
        .into_iter()
        .map(|provider| (provider.to_string(), bot.provider_model(provider)))
        .collect();

    let handler = Arc::new(CommandHandler::new(
        BotIdentity {
            bot_id: bot_id.clone(),
            bot_name,
            adapter: bot.adapter.clone(),
            owner_user_id: bot.owner_user_id,
            default_models: default_models.clone(),
        },
        telegram.clone(),
        storage.clone(),
        Some(YoutubeSearchService::new()),
    ));

    let mut tasks = Vec::new();

    match bot.ingest_mode() {
        IngestMode::Webhook => {
            let public_url = bot.webhook.public_url.clone().unwrap_or_default();
            let secret = bot.webhook.secret_token.clone().unwrap_or_default();
            match client.register_webhook(&public_url, &secret).await {
                Ok(()) => info!(bot_id = %bot_id, "webhook registered"),
                Err(err) => warn!(bot_id = %bot_id, error = %err, "webhook registration failed"),
            }
        }
        IngestMode::Polling => {
            info!(bot_id = %bot_id, "polling mode enabled");
            let poller_storage = storage.clone();
            let poller_client = client.clone();
            let poller_cancel = cancel.clone();
            let poller_bot_id = bot_id.clone();
            let poll_interval = settings.worker_poll_interval_ms;
            let ignore_offset = is_local_mock_base_url(&base_url);
            tasks.push(tokio::spawn(async move {
                if let Err(err) = run_telegram_poller(
                    &poller_bot_id,
                    poller_storage,
                    poller_client,
                    poll_interval,
                    poller_cancel,
                    ignore_offset,
                )
                .await
                {
                    warn!(bot_id = %poller_bot_id, error = %err, "poller exited with error");
                }
            }));
        }
    }

    let update_worker = UpdateWorker::new(
        &bot_id,
        storage.clone(),
        handler,
        settings.job_lease_ms,
        settings.worker_poll_interval_ms,
    );
    let update_cancel = cancel.clone();
    tasks.push(tokio::spawn(async move {
        update_worker.run(update_cancel).await;
    }));

    let mut run_worker = RunWorker::new(
        &bot_id,
        storage.clone(),
        telegram,
        default_adapter_resolver(),
        default_models,
        bot.codex.sandbox.clone(),
        settings.job_lease_ms,
        settings.worker_poll_interval_ms,
        Duration::from_secs(settings.run_timeout_secs),
    );
    let run_cancel = cancel.clone();
    tasks.push(tokio::spawn(async move {
        run_worker.run(run_cancel).await;
    }));

    Ok(BotRuntime {
        bot_id,
        storage,
        tasks,
    })
}

/// Embedded mode: ingress, workers, and the HTTP surface in one process.
pub async fn run_embedded_bot(
    bot: &BotConfig,
    settings: &GlobalSettings,
    host: &str,
    port: u16,
) -> Result<(), RelayError> {
    let cancel = shutdown_token();
    let runtime = start_bot_runtime(bot, settings, &cancel).await?;
    info!(bot_id = %runtime.bot_id, host, port, "embedded runtime starting");

    let state = GatewayState::single(
        &runtime.bot_id,
        BotIngress {
            storage: runtime.storage.clone(),
            path_secret: bot.webhook.path_secret.clone(),
            secret_token: bot.webhook.secret_token.clone(),
        },
    );
    let serve_result = start_server(host, port, state, cancel.clone()).await;

    cancel.cancel();
    for task in runtime.tasks {
        let _ = task.await;
    }
    runtime.storage.close().await?;
    serve_result
}

/// Worker-only mode for gateway-mode bots: no HTTP surface of its own.
pub async fn run_worker_only(bot: &BotConfig, settings: &GlobalSettings) -> Result<(), RelayError> {
    let cancel = shutdown_token();
    let runtime = start_bot_runtime(bot, settings, &cancel).await?;
    info!(bot_id = %runtime.bot_id, "worker-only runtime starting");

    cancel.cancelled().await;
    for task in runtime.tasks {
        let _ = task.await;
    }
    runtime.storage.close().await?;
    Ok(())
}

/// Gateway mode: one HTTP surface ingesting webhooks for the fleet.
pub async fn run_gateway(
    bots: &[BotConfig],
    settings: &GlobalSettings,
    host: &str,
    port: u16,
) -> Result<(), RelayError> {
    let cancel = shutdown_token();
    let mut ingresses = BTreeMap::new();

    for bot in bots {
        let bot_id = bot
            .bot_id
            .clone()
            .ok_or_else(|| RelayError::Config("bot entry missing bot_id".into()))?;
        let storage = Storage::open(&resolve_bot_database_path(bot, settings)).await?;

        if bot.ingest_mode() == IngestMode::Webhook {
            let base_url = resolve_telegram_api_base_url(bot, settings);
            let client = TelegramClient::new(&bot.telegram_token, &base_url)?;
            let public_url = bot.webhook.public_url.clone().unwrap_or_default();
            let secret = bot.webhook.secret_token.clone().unwrap_or_default();
            match client.register_webhook(&public_url, &secret).await {
                Ok(()) => info!(bot_id = %bot_id, "webhook registered"),
                Err(err) => warn!(bot_id = %bot_id, error = %err, "webhook registration failed"),
            }
        }

        ingresses.insert(
            bot_id,
            BotIngress {
                storage,
                path_secret: bot.webhook.path_secret.clone(),
                secret_token: bot.webhook.secret_token.clone(),
            },
        );
    }

    info!(host, port, bots = ingresses.len(), "gateway starting");
    start_server(host, port, GatewayState::new(ingresses), cancel).await
}
