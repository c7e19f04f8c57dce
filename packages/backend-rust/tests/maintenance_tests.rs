use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use tingxie_backend::auth::now_ms;
use tingxie_backend::backup::{backup_database, prune_backups};
use tingxie_backend::services::reminders::generate_reminders;
use tingxie_backend::state::local_offset;

mod common;

use common::{create_child, get, login, post, put, seed_curriculum, send, spawn_app, spawn_app_with, spawn_degraded_app, test_config};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

#[tokio::test]
async fn health_endpoints_report_database_state() {
    let t = spawn_app().await;

    let (status, body) = send(&t.app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "connected");

    let (status, body) = send(&t.app, Method::GET, "/health/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["databaseLatencyMs"].is_u64());

    let (_, body) = send(&t.app, Method::GET, "/health/info", None, None).await;
    assert_eq!(body["service"], "tingxie-backend");
    assert_eq!(body["workerLeader"], false);

    let degraded = spawn_degraded_app();
    let (status, body) = send(&degraded, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "degraded");

    let (status, body) = send(&degraded, Method::GET, "/health/live", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = send(
        &degraded,
        Method::POST,
        "/api/auth/wechat/login",
        None,
        Some(json!({ "code": "abc" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn unknown_routes_use_the_error_envelope() {
    let t = spawn_app().await;
    let (status, body) = send(&t.app, Method::GET, "/nope", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn reminders_are_generated_for_due_words() {
    let t = spawn_app().await;
    seed_curriculum(&t.db).await;
    let (token, _) = login(&t.app, "parent").await;
    let (other, _) = login(&t.app, "other").await;
    let child_id = create_child(&t.app, &token, "小明").await;

    let (_, task) = post(
        &t.app,
        "/api/dictation/task/create",
        &token,
        json!({ "child_id": child_id, "unit": 1 }),
    )
    .await;
    let task_id = task["data"]["id"].as_i64().unwrap();
    let (status, _) = post(
        &t.app,
        &format!("/api/dictation/task/{task_id}/submit"),
        &token,
        json!({ "results": [] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let offset = local_offset(8);
    let stats = generate_reminders(t.db.pool(), now_ms(), offset).await.unwrap();
    assert_eq!(stats.children_scanned, 1);
    assert_eq!(stats.reminders_written, 0);

    let later = now_ms() + 2 * DAY_MS;
    let stats = generate_reminders(t.db.pool(), later, offset).await.unwrap();
    assert_eq!(stats.reminders_written, 1);
    // running again on the same day refreshes instead of duplicating
    generate_reminders(t.db.pool(), later, offset).await.unwrap();

    let (status, list) = get(&t.app, "/api/reminders", &token).await;
    assert_eq!(status, StatusCode::OK);
    let list = list["data"].as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["childName"], "小明");
    assert_eq!(list[0]["dueCount"], 5);
    assert_eq!(list[0]["isRead"], false);
    let reminder_id = list[0]["id"].as_i64().unwrap();

    let (status, _) = put(&t.app, &format!("/api/reminders/{reminder_id}/read"), &other, json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = put(&t.app, &format!("/api/reminders/{reminder_id}/read"), &token, json!({})).await;
    assert_eq!(status, StatusCode::OK);

    let (_, unread) = get(&t.app, "/api/reminders?unread_only=true", &token).await;
    assert!(unread["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn backups_are_written_and_pruned() {
    let t = spawn_app().await;
    seed_curriculum(&t.db).await;
    let dir = tempfile::tempdir().unwrap();

    let first = backup_database(t.db.pool(), dir.path()).await.unwrap();
    let second = backup_database(t.db.pool(), dir.path()).await.unwrap();
    assert_ne!(first, second);
    assert!(first.exists());
    assert!(std::fs::metadata(&second).unwrap().len() > 0);

    let removed = prune_backups(dir.path(), 1).await.unwrap();
    assert_eq!(removed, 1);
    let remaining = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(remaining, 1);
}

#[tokio::test]
async fn api_requests_are_rate_limited() {
    let mut config = test_config();
    config.rate_limit.enabled = true;
    config.rate_limit.max = 2;
    config.rate_limit.window_ms = 60_000;
    let t = spawn_app_with(config).await;

    let request = || {
        Request::builder()
            .method(Method::GET)
            .uri("/api/users/me")
            .body(Body::empty())
            .unwrap()
    };

    for _ in 0..2 {
        let response = t.app.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = t.app.clone().oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));

    // health checks are outside /api
    let (status, _) = send(&t.app, Method::GET, "/health/live", None, None).await;
    assert_eq!(status, StatusCode::OK);
}
