// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process supervisor.
//!
//! Spawns one child per configured bot (embedded bots get their own HTTP
//! port; gateway-mode bots run workers-only next to one shared gateway
//! process), restarts crashed children with capped exponential backoff,
//! and on shutdown propagates SIGTERM with a grace window before
//! SIGKILL. The bots file is re-read every cycle so added or removed
//! bots reconcile without restarting the supervisor.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use relaybot_config::{GlobalSettings, load_bots_config};
use relaybot_core::{BotMode, RelayError};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct SupervisorOptions {
    pub config_path: PathBuf,
    pub settings: GlobalSettings,
    pub embedded_host: String,
    pub embedded_base_port: u16,
    pub gateway_host: String,
    pub gateway_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ProcessSpec {
    name: String,
    args: Vec<String>,
}

struct ManagedProcess {
    spec: ProcessSpec,
    stop: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

pub async fn run_supervisor(options: SupervisorOptions) -> Result<(), RelayError> {
    let stop = CancellationToken::new();
    install_signal_handlers(stop.clone());

    let mut managed: HashMap<String, ManagedProcess> = HashMap::new();
    let poll_interval =
        Duration::from_millis(options.settings.worker_poll_interval_ms.max(500));

    loop {
        if stop.is_cancelled() {
            break;
        }

        match load_desired_specs(&options) {
            Ok(desired) => {
                reconcile(
                    &mut managed,
                    desired,
                    options.settings.supervisor_restart_max_backoff_secs,
                )
                .await;
            }
            Err(err) => {
                error!(config = %options.config_path.display(), error = %err,
                    "failed to load bots config");
            }
        }

        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    info!("supervisor shutting down");
    for (name, process) in managed.drain() {
        stop_managed(&name, process).await;
    }
    Ok(())
}

fn install_signal_handlers(stop: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = ctrl_c => info!("supervisor received SIGINT"),
                        _ = term.recv() => info!("supervisor received SIGTERM"),
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
        stop.cancel();
    });
}

fn load_desired_specs(
    options: &SupervisorOptions,
) -> Result<HashMap<String, ProcessSpec>, RelayError> {
    let bots = load_bots_config(&options.config_path, &options.settings)?;
    let config = options.config_path.display().to_string();

    let mut specs = HashMap::new();
    let mut embedded_port = options.embedded_base_port;
    let mut any_gateway = false;

    for bot in &bots {
        let bot_id = bot.bot_id.clone().unwrap_or_default();
        let spec = match bot.mode {
            BotMode::Embedded => {
                let spec = ProcessSpec {
                    name: format!("bot:{bot_id}:embedded"),
                    args: vec![
                        "run-bot".into(),
                        "--config".into(),
                        config.clone(),
                        "--bot-id".into(),
                        bot_id,
                        "--host".into(),
                        options.embedded_host.clone(),
                        "--port".into(),
                        embedded_port.to_string(),
                    ],
                };
                embedded_port += 1;
                spec
            }
            BotMode::Gateway => {
                any_gateway = true;
                ProcessSpec {
                    name: format!("bot:{bot_id}:worker"),
                    args: vec![
                        "run-bot".into(),
                        "--config".into(),
                        config.clone(),
                        "--bot-id".into(),
                        bot_id,
                    ],
                }
            }
        };
        specs.insert(spec.name.clone(), spec);
    }

    if any_gateway {
        specs.insert(
            "gateway".to_string(),
            ProcessSpec {
                name: "gateway".to_string(),
                args: vec![
                    "gateway".into(),
                    "--config".into(),
                    config,
                    "--host".into(),
                    options.gateway_host.clone(),
                    "--port".into(),
                    options.gateway_port.to_string(),
                ],
            },
        );
    }
    Ok(specs)
}

async fn reconcile(
    managed: &mut HashMap<String, ManagedProcess>,
    desired: HashMap<String, ProcessSpec>,
    max_backoff_secs: u64,
) {
    let current_names: Vec<String> = managed.keys().cloned().collect();
    for name in current_names {
        let keep = desired
            .get(&name)
            .is_some_and(|spec| *spec == managed[&name].spec);
        if !keep {
            info!(process = %name, "stopping removed or changed process");
            if let Some(process) = managed.remove(&name) {
                stop_managed(&name, process).await;
            }
        }
    }

    for (name, spec) in desired {
        if managed.contains_key(&name) {
            continue;
        }
        let stop = CancellationToken::new();
        let task = tokio::spawn(run_with_restart(spec.clone(), max_backoff_secs, stop.clone()));
        info!(process = %name, "started managed process");
        managed.insert(name, ManagedProcess { spec, stop, task });
    }
}

async fn stop_managed(name: &str, process: ManagedProcess) {
    process.stop.cancel();
    if tokio::time::timeout(Duration::from_secs(15), process.task)
        .await
        .is_err()
    {
        warn!(process = %name, "managed process did not stop in time");
    }
}

/// Keep one child alive, restarting on exit with capped exponential
/// backoff, until the stop token fires.
async fn run_with_restart(spec: ProcessSpec, max_backoff_secs: u64, stop: CancellationToken) {
    let program = match std::env::current_exe() {
        Ok(path) => path,
        Err(err) => {
            error!(process = %spec.name, error = %err, "cannot resolve current executable");
            return;
        }
    };

    let mut attempt: u32 = 0;
    while !stop.is_cancelled() {
        info!(process = %spec.name, args = ?spec.args, "starting child process");
        let child = Command::new(&program).args(&spec.args).spawn();
        let mut child = match child {
            Ok(child) => child,
            Err(err) => {
                error!(process = %spec.name, error = %err, "failed to spawn child");
                attempt += 1;
                let backoff = backoff_secs(attempt, max_backoff_secs);
                tokio::select! {
                    _ = stop.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_secs(backoff)) => continue,
                }
            }
        };

        let exit = tokio::select! {
            status = child.wait() => status,
            _ = stop.cancelled() => {
                terminate_child(&spec.name, &mut child).await;
                return;
            }
        };

        if stop.is_cancelled() {
            return;
        }
        attempt += 1;
        let backoff = backoff_secs(attempt, max_backoff_secs);
        match exit {
            Ok(status) => warn!(
                process = %spec.name,
                code = status.code().unwrap_or(-1),
                restart_in_secs = backoff,
                "child exited"
            ),
            Err(err) => warn!(process = %spec.name, error = %err, "child wait failed"),
        }
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_secs(backoff)) => {}
        }
    }
}

fn backoff_secs(attempt: u32, max_backoff_secs: u64) -> u64 {
    (1_u64 << attempt.min(6)).min(max_backoff_secs.max(1))
}

/// SIGTERM, a grace window, then SIGKILL.
async fn terminate_child(name: &str, child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };
    info!(process = %name, pid, "terminating child process");
    // SAFETY: plain kill(2) on the child's pid.
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
    match tokio::time::timeout(Duration::from_secs(10), child.wait()).await {
        Ok(_) => {}
        Err(_) => {
            warn!(process = %name, pid, "child did not terminate in time; killing");
            let _ = child.start_kill();
            let _ = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
        }
    }
}
