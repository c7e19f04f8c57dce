use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Router};
use serde::{Deserialize, Serialize};

use crate::auth::{self, AuthError, AuthUser};
use crate::response::{json_error, ok, AppError, JsonBody};
use crate::services::users::{self, normalize_nickname, ProfileUpdate, UserProfile};
use crate::state::AppState;

/// Public login route.
pub fn public_router() -> Router<AppState> {
    Router::new().route("/wechat/login", post(wechat_login))
}

/// Routes that sit behind `require_auth`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/logout", post(logout))
        .route("/verify", get(verify))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WechatLoginRequest {
    code: Option<String>,
    nickname: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    token: String,
    expires_at: String,
    is_new_user: bool,
    user: UserProfile,
}

async fn wechat_login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<WechatLoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let code = payload
        .code
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::missing_param("code"))?;

    let proxy = state.require_db()?;
    if state.config().jwt.secret.is_none() {
        return Err(AppError::service_unavailable("认证服务未配置"));
    }

    let session = state.wechat().code_to_session(code).await.map_err(|err| {
        tracing::warn!(error = %err, "wechat code2session failed");
        json_error(StatusCode::BAD_GATEWAY, "WECHAT_LOGIN_FAILED", "微信登录失败")
    })?;

    let profile = ProfileUpdate {
        nickname: payload.nickname.as_deref().and_then(normalize_nickname),
        avatar_url: payload
            .avatar_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty()),
    };
    let (user, is_new_user) =
        users::upsert_wechat_user(proxy.pool(), &session.openid, session.unionid.as_deref(), &profile)
            .await?;

    let signed = auth::create_session(proxy.pool(), user.id, &state.config().jwt)
        .await
        .map_err(auth_error)?;

    tracing::info!(user_id = user.id, is_new_user, "wechat login");
    Ok(ok(LoginResponse {
        token: signed.token,
        expires_at: auth::iso_ms(signed.expires_at_ms),
        is_new_user,
        user: UserProfile::from(&user),
    }))
}

async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    if let Some(token) = auth::extract_token(&headers) {
        proxy
            .delete_session_by_token_hash(&auth::hash_token(&token))
            .await?;
    }
    tracing::info!(user_id = user.id, "logout");
    Ok(ok(serde_json::json!({ "message": "已退出登录" })))
}

async fn verify(Extension(user): Extension<AuthUser>) -> impl IntoResponse {
    ok(UserProfile::from(&user))
}

fn auth_error(err: AuthError) -> AppError {
    match err {
        AuthError::MissingSecret | AuthError::InvalidExpiresIn => {
            tracing::error!(error = %err, "jwt configuration invalid");
            AppError::service_unavailable("认证服务未配置")
        }
        other => AppError::internal(other.to_string()),
    }
}
