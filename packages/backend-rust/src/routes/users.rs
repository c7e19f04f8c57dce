use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Router};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::response::{ok, AppError, JsonBody};
use crate::services::users::{self, normalize_nickname, ProfileUpdate, UserProfile, NICKNAME_MAX_CHARS};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/me", get(me).put(update_me))
}

async fn me(Extension(user): Extension<AuthUser>) -> impl IntoResponse {
    ok(UserProfile::from(&user))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateProfileRequest {
    nickname: Option<String>,
    avatar_url: Option<String>,
}

async fn update_me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    JsonBody(payload): JsonBody<UpdateProfileRequest>,
) -> Result<impl IntoResponse, AppError> {
    let nickname = match payload.nickname.as_deref() {
        Some(raw) => Some(normalize_nickname(raw).ok_or_else(|| {
            AppError::validation(format!("昵称长度必须在 1-{NICKNAME_MAX_CHARS} 个字符之间"))
        })?),
        None => None,
    };
    let update = ProfileUpdate {
        nickname,
        avatar_url: payload.avatar_url.map(|url| url.trim().to_string()),
    };

    let proxy = state.require_db()?;
    let updated = users::update_profile(proxy.pool(), user.id, &update)
        .await?
        .ok_or_else(|| AppError::not_found("用户不存在"))?;

    Ok(ok(UserProfile::from(&updated)))
}
