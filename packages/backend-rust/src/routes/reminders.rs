use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Extension, Router};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::response::{ok, AppError, PathParam, QueryParams};
use crate::services::reminders;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_reminders))
        .route("/:id/read", put(mark_read))
}

#[derive(Debug, Deserialize)]
struct ReminderQuery {
    #[serde(default)]
    unread_only: bool,
}

async fn list_reminders(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    QueryParams(query): QueryParams<ReminderQuery>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    Ok(ok(reminders::list_reminders(proxy.pool(), user.id, query.unread_only).await?))
}

async fn mark_read(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    PathParam(id): PathParam<i64>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    if !reminders::mark_read(proxy.pool(), user.id, id).await? {
        return Err(AppError::not_found("提醒不存在"));
    }
    Ok(ok(serde_json::json!({ "id": id, "isRead": true })))
}
