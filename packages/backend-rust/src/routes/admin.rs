use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{post, put};
use axum::{Extension, Router};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::response::{ok, AppError, JsonBody, PathParam};
use crate::services::feedback::{self, FeedbackStatus};
use crate::state::AppState;

/// 管理员接口，挂在 `require_admin` 之后
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/feedback/:id/reply", post(reply_feedback))
        .route("/feedback/:id/status", put(update_feedback_status))
}

#[derive(Debug, Deserialize)]
struct ReplyRequest {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusRequest {
    status: Option<String>,
}

async fn reply_feedback(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    PathParam(id): PathParam<i64>,
    JsonBody(payload): JsonBody<ReplyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let content = payload.content.ok_or_else(|| AppError::missing_param("content"))?;
    let proxy = state.require_db()?;

    let detail = feedback::reply(proxy.pool(), admin.id, id, &content).await?;
    tracing::info!(feedback_id = id, admin_id = admin.id, "feedback replied");
    Ok(ok(detail))
}

async fn update_feedback_status(
    State(state): State<AppState>,
    PathParam(id): PathParam<i64>,
    JsonBody(payload): JsonBody<StatusRequest>,
) -> Result<impl IntoResponse, AppError> {
    let status = payload
        .status
        .as_deref()
        .ok_or_else(|| AppError::missing_param("status"))?
        .parse::<FeedbackStatus>()
        .map_err(AppError::validation)?;
    let proxy = state.require_db()?;

    Ok(ok(feedback::set_status(proxy.pool(), id, status).await?))
}
