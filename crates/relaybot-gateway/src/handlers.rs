// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Request handlers for the runtime HTTP surface.

use std::collections::BTreeMap;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use relaybot_core::now_ms;
use relaybot_storage::MetricsSnapshot;
use relaybot_telegram::extract_chat_id;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::server::GatewayState;

/// Header Telegram echoes the configured webhook secret in.
pub const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Liveness: the process is up.
pub async fn get_healthz() -> Json<Value> {
    Json(json!({ "ok": true }))
}

/// Readiness: every bot's database answers.
pub async fn get_readyz(State(state): State<GatewayState>) -> (StatusCode, Json<Value>) {
    for (bot_id, ingress) in state.bots.iter() {
        if let Err(err) = ingress.storage.health_check().await {
            warn!(bot_id = %bot_id, error = %err, "readiness check failed");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "ok": false, "bot_id": bot_id })),
            );
        }
    }
    (StatusCode::OK, Json(json!({ "ok": true })))
}

/// Counters plus queue aggregates for every hosted bot.
pub async fn get_metrics(
    State(state): State<GatewayState>,
) -> Result<Json<BTreeMap<String, MetricsSnapshot>>, StatusCode> {
    let mut snapshots = BTreeMap::new();
    for (bot_id, ingress) in state.bots.iter() {
        let snapshot = ingress
            .storage
            .get_metrics(bot_id)
            .await
            .map_err(|err| {
                warn!(bot_id = %bot_id, error = %err, "metrics readout failed");
                StatusCode::INTERNAL_SERVER_ERROR
            })?;
        snapshots.insert(bot_id.clone(), snapshot);
    }
    Ok(Json(snapshots))
}

/// Webhook ingest: validate secrets, then run the shared accept
/// procedure. Duplicates return 200 with the duplicate counter bumped.
pub async fn post_webhook(
    State(state): State<GatewayState>,
    Path((bot_id, path_secret)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let Some(ingress) = state.bots.get(&bot_id) else {
        // No storage to count against for a bot we do not host.
        warn!(bot_id = %bot_id, "webhook for unknown bot");
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "ok": false, "error": "bot not found" })),
        );
    };
    let now = now_ms();

    if let Some(expected) = ingress.path_secret.as_deref()
        && expected != path_secret
    {
        count(ingress, &bot_id, "webhook_reject_401", now).await;
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "ok": false, "error": "invalid path secret" })),
        );
    }
    if let Some(expected) = ingress.secret_token.as_deref() {
        let presented = headers
            .get(SECRET_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok());
        if presented != Some(expected) {
            count(ingress, &bot_id, "webhook_reject_401", now).await;
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "ok": false, "error": "invalid secret token" })),
            );
        }
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => {
            count(ingress, &bot_id, "webhook_reject_400", now).await;
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "ok": false, "error": "malformed json" })),
            );
        }
    };
    let Some(update_id) = payload.get("update_id").and_then(Value::as_i64) else {
        count(ingress, &bot_id, "webhook_reject_400", now).await;
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "ok": false, "error": "update_id is required" })),
        );
    };

    let chat_id = extract_chat_id(&payload);
    match ingress
        .storage
        .accept_update(&bot_id, update_id, chat_id, payload.to_string(), now)
        .await
    {
        Ok(true) => {
            count(ingress, &bot_id, "webhook_accept_total", now).await;
        }
        Ok(false) => {
            debug!(bot_id = %bot_id, update_id, "duplicate update dropped");
            count(ingress, &bot_id, "webhook_duplicate_update", now).await;
        }
        Err(err) => {
            warn!(bot_id = %bot_id, update_id, error = %err, "webhook accept failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "ok": false })),
            );
        }
    }

    (StatusCode::OK, Json(json!({ "ok": true })))
}

async fn count(ingress: &crate::server::BotIngress, bot_id: &str, key: &str, now: i64) {
    if let Err(err) = ingress.storage.increment_metric(bot_id, key, now).await {
        warn!(bot_id = %bot_id, key, error = %err, "failed to increment webhook counter");
    }
}
