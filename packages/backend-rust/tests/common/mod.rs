#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use tingxie_backend::config::{Config, JwtConfig};
use tingxie_backend::db::DatabaseProxy;
use tingxie_backend::services::curriculum::{import_items, ImportItem};
use tingxie_backend::state::AppState;
use tingxie_backend::wechat::{WechatConfig, WechatProviderType};

pub struct TestApp {
    pub app: Router,
    pub db: Arc<DatabaseProxy>,
}

pub fn test_config() -> Config {
    let mut config = Config::from_env();
    config.database_url = "sqlite::memory:".to_string();
    config.jwt = JwtConfig {
        secret: Some("test-secret".to_string()),
        expires_in: "1h".to_string(),
    };
    config.wechat = WechatConfig {
        provider: WechatProviderType::Mock,
        app_id: None,
        app_secret: None,
        api_base: String::new(),
    };
    config.tz_offset_hours = 8;
    config.rate_limit.enabled = false;
    config.workers.leader = false;
    config
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(test_config()).await
}

pub async fn spawn_app_with(config: Config) -> TestApp {
    let db = DatabaseProxy::connect(&config.database_url, 1)
        .await
        .expect("in-memory database");
    let app = tingxie_backend::create_app(AppState::new(config, Some(Arc::clone(&db))));
    TestApp { app, db }
}

/// App without a database attached.
pub fn spawn_degraded_app() -> Router {
    tingxie_backend::create_app(AppState::new(test_config(), None))
}

pub async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

pub async fn get(app: &Router, uri: &str, token: &str) -> (StatusCode, Value) {
    send(app, Method::GET, uri, Some(token), None).await
}

pub async fn post(app: &Router, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
    send(app, Method::POST, uri, Some(token), Some(body)).await
}

pub async fn put(app: &Router, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
    send(app, Method::PUT, uri, Some(token), Some(body)).await
}

pub async fn delete(app: &Router, uri: &str, token: &str) -> (StatusCode, Value) {
    send(app, Method::DELETE, uri, Some(token), None).await
}

/// Logs in through the mock WeChat provider; returns `(token, user_id)`.
pub async fn login(app: &Router, code: &str) -> (String, i64) {
    let (status, body) = send(
        app,
        Method::POST,
        "/api/auth/wechat/login",
        None,
        Some(serde_json::json!({ "code": code })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    let token = body["data"]["token"].as_str().unwrap().to_string();
    let user_id = body["data"]["user"]["id"].as_i64().unwrap();
    (token, user_id)
}

pub async fn make_admin(db: &DatabaseProxy, user_id: i64) {
    sqlx::query(r#"UPDATE "users" SET "role" = 'ADMIN' WHERE "id" = ?"#)
        .bind(user_id)
        .execute(db.pool())
        .await
        .unwrap();
}

/// Grade 1, semester 1, renjiao: unit 1 has five words, unit 2 has two.
pub async fn seed_curriculum(db: &DatabaseProxy) {
    let items: Vec<ImportItem> = serde_json::from_value(serde_json::json!([
        { "grade": 1, "semester": 1, "unit": 1, "word": "天", "pinyin": "tiān", "audioUrl": "https://cdn/tian.mp3" },
        { "grade": 1, "semester": 1, "unit": 1, "word": "地", "pinyin": "dì" },
        { "grade": 1, "semester": 1, "unit": 1, "word": "人", "pinyin": "rén" },
        { "grade": 1, "semester": 1, "unit": 1, "word": "你", "pinyin": "nǐ" },
        { "grade": 1, "semester": 1, "unit": 1, "word": "我", "pinyin": "wǒ" },
        { "grade": 1, "semester": 1, "unit": 2, "word": "山", "pinyin": "shān" },
        { "grade": 1, "semester": 1, "unit": 2, "word": "水", "pinyin": "shuǐ" }
    ]))
    .unwrap();
    import_items(db.pool(), &items).await.unwrap();
}

/// Creates a grade-1 child owned by the token's user; returns its id.
pub async fn create_child(app: &Router, token: &str, name: &str) -> i64 {
    let (status, body) = post(
        app,
        "/api/children",
        token,
        serde_json::json!({ "name": name, "grade": 1, "semester": 1 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "create child failed: {body}");
    body["data"]["id"].as_i64().unwrap()
}
