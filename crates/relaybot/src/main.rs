// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Relaybot - a bridge from Telegram chats to command-line AI agents.
//!
//! Binary entry point. `serve` supervises one child process per
//! configured bot; `run-bot` hosts a single bot runtime; `gateway`
//! hosts webhook ingress for the whole fleet.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use relaybot_config::{load_bots_config, load_global_settings};

mod serve;
mod supervisor;

/// Relaybot - a bridge from Telegram chats to command-line AI agents.
#[derive(Parser, Debug)]
#[command(name = "relaybot", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Supervise one process per configured bot.
    Serve {
        /// Path to the bots YAML file.
        #[arg(long, default_value = "bots.yaml")]
        config: PathBuf,
        #[arg(long, default_value = "127.0.0.1")]
        embedded_host: String,
        /// First HTTP port for embedded bots; each bot gets the next one.
        #[arg(long, default_value_t = 8081)]
        embedded_base_port: u16,
        #[arg(long, default_value = "127.0.0.1")]
        gateway_host: String,
        #[arg(long, default_value_t = 8080)]
        gateway_port: u16,
    },
    /// Run a single bot: embedded (ingress + workers + HTTP) or, for
    /// gateway-mode bots, workers only.
    RunBot {
        #[arg(long, default_value = "bots.yaml")]
        config: PathBuf,
        #[arg(long)]
        bot_id: String,
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8081)]
        port: u16,
    },
    /// Host webhook ingress for every configured bot.
    Gateway {
        #[arg(long, default_value = "bots.yaml")]
        config: PathBuf,
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match load_global_settings() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };
    serve::init_tracing(&settings.log_level);

    let result = match cli.command {
        Commands::Serve {
            config,
            embedded_host,
            embedded_base_port,
            gateway_host,
            gateway_port,
        } => {
            supervisor::run_supervisor(supervisor::SupervisorOptions {
                config_path: config,
                settings,
                embedded_host,
                embedded_base_port,
                gateway_host,
                gateway_port,
            })
            .await
        }
        Commands::RunBot {
            config,
            bot_id,
            host,
            port,
        } => match find_bot(&config, &settings, &bot_id) {
            Ok(bot) => {
                if bot.mode == relaybot_core::BotMode::Embedded {
                    serve::run_embedded_bot(&bot, &settings, &host, port).await
                } else {
                    serve::run_worker_only(&bot, &settings).await
                }
            }
            Err(err) => Err(err),
        },
        Commands::Gateway { config, host, port } => {
            match load_bots_config(&config, &settings) {
                Ok(bots) => serve::run_gateway(&bots, &settings, &host, port).await,
                Err(err) => Err(err),
            }
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // Fatal startup/runtime errors exit non-zero so the
            // supervisor restarts us with backoff.
            tracing::error!(error = %err, "fatal error");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn find_bot(
    config: &PathBuf,
    settings: &relaybot_config::GlobalSettings,
    bot_id: &str,
) -> Result<relaybot_config::BotConfig, relaybot_core::RelayError> {
    let bots = load_bots_config(config, settings)?;
    bots.into_iter()
        .find(|bot| bot.bot_id.as_deref() == Some(bot_id))
        .ok_or_else(|| {
            relaybot_core::RelayError::Config(format!("bot_id not found in config: {bot_id}"))
        })
}
