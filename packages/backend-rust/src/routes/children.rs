use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Router};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::response::{nullable, ok, AppError, JsonBody, PathParam};
use crate::services::children::{self, ChildFields};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_children).post(create_child))
        .route("/:id", get(get_child).put(update_child).delete(delete_child))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChildPayload {
    name: Option<String>,
    gender: Option<String>,
    grade: Option<i64>,
    semester: Option<i64>,
    #[serde(alias = "textbook_version")]
    textbook_version: Option<String>,
    #[serde(alias = "avatar_url")]
    avatar_url: Option<String>,
    #[serde(alias = "family_id", default, deserialize_with = "nullable")]
    family_id: Option<Option<i64>>,
}

impl From<ChildPayload> for ChildFields {
    fn from(payload: ChildPayload) -> Self {
        Self {
            name: payload.name,
            gender: payload.gender,
            grade: payload.grade,
            semester: payload.semester,
            textbook_version: payload.textbook_version,
            avatar_url: payload.avatar_url,
            family_id: payload.family_id,
        }
    }
}

async fn list_children(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    Ok(ok(children::list_children(proxy.pool(), user.id).await?))
}

async fn create_child(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    JsonBody(payload): JsonBody<ChildPayload>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let child = children::create_child(proxy.pool(), user.id, payload.into()).await?;
    Ok(ok(child))
}

async fn get_child(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    PathParam(id): PathParam<i64>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    Ok(ok(children::require_child(proxy.pool(), user.id, id).await?))
}

async fn update_child(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    PathParam(id): PathParam<i64>,
    JsonBody(payload): JsonBody<ChildPayload>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let child = children::update_child(proxy.pool(), user.id, id, payload.into()).await?;
    Ok(ok(child))
}

async fn delete_child(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    PathParam(id): PathParam<i64>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    children::delete_child(proxy.pool(), user.id, id).await?;
    Ok(ok(serde_json::json!({ "message": "已删除" })))
}
