use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Extension, Router};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::response::{ok, AppError, JsonBody, PathParam};
use crate::services::families;
use crate::state::AppState;

const FAMILY_NAME_MAX_CHARS: usize = 32;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_families).post(create_family))
        .route("/join", post(join_family))
        .route("/:id", get(get_family))
        .route("/:id/leave", post(leave_family))
        .route("/:id/invite-code", post(regenerate_invite_code))
        .route("/:id/members/:user_id", delete(remove_member))
}

#[derive(Debug, Deserialize)]
struct CreateFamilyRequest {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinFamilyRequest {
    #[serde(alias = "invite_code")]
    invite_code: Option<String>,
}

async fn list_families(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    Ok(ok(families::list_families(proxy.pool(), user.id).await?))
}

async fn create_family(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    JsonBody(payload): JsonBody<CreateFamilyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let name = payload
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| AppError::missing_param("name"))?;
    if name.chars().count() > FAMILY_NAME_MAX_CHARS {
        return Err(AppError::validation(format!(
            "家庭名称不能超过 {FAMILY_NAME_MAX_CHARS} 个字符"
        )));
    }

    let proxy = state.require_db()?;
    let family = families::create_family(proxy.pool(), user.id, name).await?;
    Ok(ok(family))
}

async fn get_family(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    PathParam(id): PathParam<i64>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    Ok(ok(families::get_family(proxy.pool(), user.id, id).await?))
}

async fn join_family(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    JsonBody(payload): JsonBody<JoinFamilyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let code = payload
        .invite_code
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::missing_param("inviteCode"))?;

    let proxy = state.require_db()?;
    Ok(ok(families::join_family(proxy.pool(), user.id, code).await?))
}

async fn leave_family(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    PathParam(id): PathParam<i64>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    families::leave_family(proxy.pool(), user.id, id).await?;
    Ok(ok(serde_json::json!({ "message": "已退出家庭" })))
}

async fn regenerate_invite_code(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    PathParam(id): PathParam<i64>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    Ok(ok(families::regenerate_invite_code(proxy.pool(), user.id, id).await?))
}

async fn remove_member(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    PathParam((id, member_id)): PathParam<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    families::remove_member(proxy.pool(), user.id, id, member_id).await?;
    Ok(ok(serde_json::json!({ "message": "成员已移除" })))
}
