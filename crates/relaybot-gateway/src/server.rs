// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! One router serves any number of bots: a single entry in embedded
//! mode, the whole fleet in gateway mode.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use relaybot_core::RelayError;
use relaybot_storage::Storage;
use tokio_util::sync::CancellationToken;

use crate::handlers;

/// Ingest surface of one hosted bot.
pub struct BotIngress {
    pub storage: Storage,
    pub path_secret: Option<String>,
    pub secret_token: Option<String>,
}

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub bots: Arc<BTreeMap<String, BotIngress>>,
}

impl GatewayState {
    pub fn new(bots: BTreeMap<String, BotIngress>) -> Self {
        Self {
            bots: Arc::new(bots),
        }
    }

    pub fn single(bot_id: &str, ingress: BotIngress) -> Self {
        let mut bots = BTreeMap::new();
        bots.insert(bot_id.to_string(), ingress);
        Self::new(bots)
    }
}

/// The runtime HTTP surface.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::get_healthz))
        .route("/readyz", get(handlers::get_readyz))
        .route("/metrics", get(handlers::get_metrics))
        .route(
            "/telegram/webhook/:bot_id/:path_secret",
            post(handlers::post_webhook),
        )
        .with_state(state)
}

/// Bind and serve until the cancellation token fires.
pub async fn start_server(
    host: &str,
    port: u16,
    state: GatewayState,
    cancel: CancellationToken,
) -> Result<(), RelayError> {
    let app = router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RelayError::Internal(format!("failed to bind gateway to {addr}: {e}")))?;

    tracing::info!(%addr, "gateway server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| RelayError::Internal(format!("gateway server error: {e}")))?;
    Ok(())
}
