use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Router};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::response::{ok, paginated, AppError, JsonBody, Pagination, PathParam, QueryParams};
use crate::routes::page_window;
use crate::services::feedback::{self, FeedbackStatus, NewFeedback};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create", post(create_feedback))
        .route("/list", get(list_feedback))
        .route("/:id/detail", get(feedback_detail))
}

#[derive(Debug, Deserialize)]
struct CreateFeedbackRequest {
    title: Option<String>,
    content: Option<String>,
    #[serde(rename = "type")]
    feedback_type: Option<String>,
    contact: Option<String>,
    #[serde(default)]
    images: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    page: Option<i64>,
    per_page: Option<i64>,
    status: Option<String>,
}

async fn create_feedback(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    JsonBody(payload): JsonBody<CreateFeedbackRequest>,
) -> Result<impl IntoResponse, AppError> {
    let input = NewFeedback {
        title: payload.title.ok_or_else(|| AppError::missing_param("title"))?,
        content: payload.content.ok_or_else(|| AppError::missing_param("content"))?,
        feedback_type: payload.feedback_type,
        contact: payload.contact,
        images: payload.images,
    };

    let proxy = state.require_db()?;
    Ok(ok(feedback::create_feedback(proxy.pool(), user.id, &input).await?))
}

async fn list_feedback(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    QueryParams(query): QueryParams<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let (page, per_page) = page_window(query.page, query.per_page)?;
    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(raw.parse::<FeedbackStatus>().map_err(AppError::validation)?),
    };

    let proxy = state.require_db()?;
    let (items, total) =
        feedback::list_feedback(proxy.pool(), user.id, status, per_page, (page - 1) * per_page)
            .await?;
    Ok(paginated(items, Pagination::new(page, per_page, total)))
}

async fn feedback_detail(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    PathParam(id): PathParam<i64>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let detail = feedback::get_detail(proxy.pool(), user.id, user.is_admin(), id).await?;
    Ok(ok(detail))
}
