use axum::http::{Method, StatusCode};
use serde_json::json;

mod common;

use common::{get, login, post, put, send, spawn_app};

#[tokio::test]
async fn wechat_login_requires_code() {
    let t = spawn_app().await;

    let (status, body) = send(&t.app, Method::POST, "/api/auth/wechat/login", None, Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "MISSING_REQUIRED_PARAM");
}

#[tokio::test]
async fn wechat_login_creates_then_reuses_user() {
    let t = spawn_app().await;

    let (status, first) = send(
        &t.app,
        Method::POST,
        "/api/auth/wechat/login",
        None,
        Some(json!({ "code": "abc", "nickname": "小明妈妈" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["data"]["isNewUser"], true);
    assert_eq!(first["data"]["user"]["nickname"], "小明妈妈");
    assert!(first["data"]["expiresAt"].as_str().unwrap().ends_with('Z'));

    let (_, second) = send(
        &t.app,
        Method::POST,
        "/api/auth/wechat/login",
        None,
        Some(json!({ "code": "abc" })),
    )
    .await;
    assert_eq!(second["data"]["isNewUser"], false);
    assert_eq!(second["data"]["user"]["id"], first["data"]["user"]["id"]);
    assert_eq!(second["data"]["user"]["nickname"], "小明妈妈");
}

#[tokio::test]
async fn simultaneous_first_logins_share_one_user() {
    let t = spawn_app().await;
    let login_once = || {
        let app = t.app.clone();
        async move {
            send(
                &app,
                Method::POST,
                "/api/auth/wechat/login",
                None,
                Some(json!({ "code": "twin" })),
            )
            .await
        }
    };

    let ((status_a, a), (status_b, b)) = tokio::join!(login_once(), login_once());
    assert_eq!(status_a, StatusCode::OK, "{a}");
    assert_eq!(status_b, StatusCode::OK, "{b}");
    assert_eq!(a["data"]["user"]["id"], b["data"]["user"]["id"]);
    let new_users = [&a, &b]
        .iter()
        .filter(|body| body["data"]["isNewUser"] == true)
        .count();
    assert_eq!(new_users, 1);

    let users: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM "users""#)
        .fetch_one(t.db.pool())
        .await
        .unwrap();
    assert_eq!(users, 1);
}

#[tokio::test]
async fn protected_routes_need_a_valid_token() {
    let t = spawn_app().await;

    let (status, body) = send(&t.app, Method::GET, "/api/users/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, _) = get(&t.app, "/api/users/me", "not-a-jwt").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn verify_and_logout_revoke_the_session() {
    let t = spawn_app().await;
    let (token, user_id) = login(&t.app, "parent").await;

    let (status, body) = get(&t.app, "/api/auth/verify", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], user_id);

    let (status, _) = post(&t.app, "/api/auth/logout", &token, json!({})).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = get(&t.app, "/api/auth/verify", &token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn profile_update_validates_nickname() {
    let t = spawn_app().await;
    let (token, _) = login(&t.app, "parent").await;

    let (status, body) = put(&t.app, "/api/users/me", &token, json!({ "nickname": "  " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, body) = put(
        &t.app,
        "/api/users/me",
        &token,
        json!({ "nickname": " 爸爸 ", "avatarUrl": "https://img/a.png" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["nickname"], "爸爸");
    assert_eq!(body["data"]["avatarUrl"], "https://img/a.png");

    let (status, body) = get(&t.app, "/api/users/me", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["nickname"], "爸爸");
}

#[tokio::test]
async fn malformed_json_is_a_validation_error() {
    let t = spawn_app().await;
    let (token, _) = login(&t.app, "parent").await;

    let (status, body) = post(&t.app, "/api/children", &token, json!({ "grade": "one" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}
