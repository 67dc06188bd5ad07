// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Update-job worker: leases accepted updates and dispatches them to the
//! command handler.

use std::sync::Arc;
use std::time::Duration;

use relaybot_core::{RelayError, now_ms};
use relaybot_storage::{Storage, UpdateJobLease};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::commands::CommandHandler;

/// Cadence of the `worker_heartbeat.update_worker` counter.
const HEARTBEAT_INTERVAL_MS: i64 = 5_000;

pub struct UpdateWorker {
    bot_id: String,
    storage: Storage,
    handler: Arc<CommandHandler>,
    lease_ms: i64,
    poll_interval_ms: u64,
    owner: String,
}

impl UpdateWorker {
    pub fn new(
        bot_id: &str,
        storage: Storage,
        handler: Arc<CommandHandler>,
        lease_ms: i64,
        poll_interval_ms: u64,
    ) -> Self {
        let owner = format!("update-worker:{bot_id}:{}", std::process::id());
        Self {
            bot_id: bot_id.to_string(),
            storage,
            handler,
            lease_ms,
            poll_interval_ms,
            owner,
        }
    }

    /// Worker loop. No error escapes: failures are logged, counted on the
    /// job, and the loop pauses briefly.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut next_heartbeat_ms = 0_i64;
        while !cancel.is_cancelled() {
            let now = now_ms();
            if now >= next_heartbeat_ms {
                if let Err(err) = self
                    .storage
                    .increment_metric(&self.bot_id, "worker_heartbeat.update_worker", now)
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
                    error!(bot_id = %self.bot_id, error = %err, "update worker loop error");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                        _ = cancel.cancelled() => return,
                    }
                }
            }
        }
    }

    /// Lease and process at most one job. Returns whether a job was
    /// processed; tests step the pipeline with this.
    pub async fn tick(&self) -> Result<bool, RelayError> {
        let now = now_ms();
        let Some(lease) = self
            .storage
            .lease_next_update_job(&self.bot_id, &self.owner, now, self.lease_ms)
            .await?
        else {
            return Ok(false);
        };
        self.process_job(lease).await;
        Ok(true)
    }

    async fn process_job(&self, lease: UpdateJobLease) {
        let renew_cancel = CancellationToken::new();
        let renew_task = tokio::spawn(renew_lease_loop(
            self.storage.clone(),
            lease.id.clone(),
            self.lease_ms,
            renew_cancel.clone(),
        ));

        let result = self.dispatch(&lease).await;
        renew_cancel.cancel();
        let _ = renew_task.await;

        if let Err(err) = result {
            error!(
                bot_id = %self.bot_id,
                update_id = lease.update_id,
                error = %err,
                "failed update job"
            );
            let message = err.to_string();
            if let Err(err) = self
                .storage
                .fail_update_job(&lease.id, now_ms(), &message)
                .await
            {
                error!(bot_id = %self.bot_id, error = %err, "failed to mark update job failed");
            }
        }
    }

    async fn dispatch(&self, lease: &UpdateJobLease) -> Result<(), RelayError> {
        let payload_json = self
            .storage
            .get_update_payload(&self.bot_id, lease.update_id)
            .await?;
        let Some(payload_json) = payload_json else {
            self.storage
                .fail_update_job(&lease.id, now_ms(), "missing telegram update row")
                .await?;
            return Ok(());
        };

        let payload: Value = match serde_json::from_str(&payload_json) {
            Ok(value) => value,
            Err(err) => {
                self.storage
                    .fail_update_job(&lease.id, now_ms(), &format!("invalid payload json: {err}"))
                    .await?;
                return Ok(());
            }
        };
        if !payload.is_object() {
            self.storage
                .fail_update_job(&lease.id, now_ms(), "payload must be object")
                .await?;
            return Ok(());
        }

        self.handler.handle_update_payload(&payload, now_ms()).await?;
        self.storage.complete_update_job(&lease.id, now_ms()).await?;
        Ok(())
    }
}

/// Extend the lease at half-TTL cadence until cancelled. A failed
/// renewal is logged and the loop keeps trying; if the lease lapses the
/// reaper hands the job to another worker.
pub(crate) async fn renew_lease_loop(
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
        if let Err(err) = storage
            .renew_update_job_lease(&job_id, now_ms(), lease_ms)
            .await
        {
            warn!(job_id = %job_id, error = %err, "update job lease renewal failed");
        }
    }
}
