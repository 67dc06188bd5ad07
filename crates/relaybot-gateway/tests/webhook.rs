// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Webhook ingest and HTTP surface tests against the real router.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use relaybot_gateway::{BotIngress, GatewayState, SECRET_TOKEN_HEADER, router};
use relaybot_storage::Storage;
use serde_json::{Value, json};
use tower::ServiceExt;

async fn state_with_bot() -> (GatewayState, Storage, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::open(dir.path().join("gw.db").to_str().unwrap())
        .await
        .unwrap();
    let state = GatewayState::single(
        "bot-1",
        BotIngress {
            storage: storage.clone(),
            path_secret: Some("path-secret".into()),
            secret_token: Some("header-secret".into()),
        },
    );
    (state, storage, dir)
}

fn webhook_request(path_secret: &str, header_secret: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/telegram/webhook/bot-1/{path_secret}"))
        .header("content-type", "application/json");
    if let Some(secret) = header_secret {
        builder = builder.header(SECRET_TOKEN_HEADER, secret);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn update_body(update_id: i64, text: &str) -> String {
    json!({
        "update_id": update_id,
        "message": {
            "message_id": 1,
            "chat": { "id": 1001 },
            "from": { "id": 9001 },
            "text": text,
        }
    })
    .to_string()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn accepts_update_and_enqueues_job() {
    let (state, storage, _dir) = state_with_bot().await;
    let app = router(state);

    let response = app
        .oneshot(webhook_request(
            "path-secret",
            Some("header-secret"),
            &update_body(1, "hello"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(
        storage.get_metric("bot-1", "webhook_accept_total").await.unwrap(),
        1
    );
    let lease = storage
        .lease_next_update_job("bot-1", "test", i64::MAX / 2, 30_000)
        .await
        .unwrap();
    assert!(lease.is_some(), "accepted update must be enqueued");
}

#[tokio::test]
async fn duplicate_update_returns_ok_and_counts() {
    let (state, storage, _dir) = state_with_bot().await;
    let app = router(state);

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(webhook_request(
                "path-secret",
                Some("header-secret"),
                &update_body(1, "hello"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(
        storage
            .get_metric("bot-1", "webhook_duplicate_update")
            .await
            .unwrap(),
        1
    );
    // Exactly one job despite two posts.
    let first = storage
        .lease_next_update_job("bot-1", "t", i64::MAX / 2, 30_000)
        .await
        .unwrap();
    assert!(first.is_some());
    let second = storage
        .lease_next_update_job("bot-1", "t", i64::MAX / 2, 30_000)
        .await
        .unwrap();
    assert!(second.is_none());
}

#[tokio::test]
async fn bad_path_secret_is_401() {
    let (state, storage, _dir) = state_with_bot().await;
    let app = router(state);

    let response = app
        .oneshot(webhook_request(
            "wrong",
            Some("header-secret"),
            &update_body(1, "x"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        storage.get_metric("bot-1", "webhook_reject_401").await.unwrap(),
        1
    );
}

#[tokio::test]
async fn bad_header_secret_is_401() {
    let (state, storage, _dir) = state_with_bot().await;
    let app = router(state);

    let response = app
        .oneshot(webhook_request("path-secret", None, &update_body(1, "x")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        storage.get_metric("bot-1", "webhook_reject_401").await.unwrap(),
        1
    );
}

#[tokio::test]
async fn malformed_body_is_400() {
    let (state, storage, _dir) = state_with_bot().await;
    let app = router(state.clone());

    let response = app
        .oneshot(webhook_request(
            "path-secret",
            Some("header-secret"),
            "{not json",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Missing update_id is a 400 too.
    let response = router(state)
        .oneshot(webhook_request(
            "path-secret",
            Some("header-secret"),
            r#"{"message": {}}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        storage.get_metric("bot-1", "webhook_reject_400").await.unwrap(),
        2
    );
}

#[tokio::test]
async fn unknown_bot_is_404() {
    // An unhosted bot id has no storage to count a rejection against;
    // the handler emits a `webhook for unknown bot` warning instead and
    // answers 404.
    let (state, _storage, _dir) = state_with_bot().await;
    let app = router(state);

    let request = Request::builder()
        .method("POST")
        .uri("/telegram/webhook/ghost/whatever")
        .header("content-type", "application/json")
        .body(Body::from(update_body(1, "x")))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_ready_and_metrics_endpoints() {
    let (state, _storage, _dir) = state_with_bot().await;
    let app = router(state);

    let health = app
        .clone()
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);

    let ready = app
        .clone()
        .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(ready.status(), StatusCode::OK);
    assert_eq!(body_json(ready).await, json!({ "ok": true }));

    // Accept one update, then check the aggregates in the readout.
    let accepted = app
        .clone()
        .oneshot(webhook_request(
            "path-secret",
            Some("header-secret"),
            &update_body(5, "hi"),
        ))
        .await
        .unwrap();
    assert_eq!(accepted.status(), StatusCode::OK);

    let metrics = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(metrics.status(), StatusCode::OK);
    let body = body_json(metrics).await;
    let snapshot = body.get("bot-1").expect("per-bot snapshot");
    assert_eq!(snapshot["telegram_updates_total"], 1);
    assert_eq!(snapshot["telegram_update_jobs_by_status"]["queued"], 1);
    assert_eq!(snapshot["runtime_counters"]["webhook_accept_total"], 1);
    assert_eq!(snapshot["in_flight_runs"], 0);
}
