use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Router};
use serde::Deserialize;

use crate::auth::{now_ms, AuthUser};
use crate::response::{ok, AppError, QueryParams};
use crate::routes::require_child_id;
use crate::services::children;
use crate::services::review::{self, ReviewFilter};
use crate::state::AppState;

const DEFAULT_DUE_LIMIT: usize = 50;
const MAX_DUE_LIMIT: usize = 200;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/due", get(due_words))
        .route("/words", get(list_words))
}

#[derive(Debug, Deserialize)]
struct DueQuery {
    child_id: Option<i64>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct WordsQuery {
    child_id: Option<i64>,
    status: Option<String>,
}

async fn due_words(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    QueryParams(query): QueryParams<DueQuery>,
) -> Result<impl IntoResponse, AppError> {
    let child_id = require_child_id(query.child_id)?;
    let limit = query.limit.unwrap_or(DEFAULT_DUE_LIMIT).clamp(1, MAX_DUE_LIMIT);
    let proxy = state.require_db()?;
    children::require_child(proxy.pool(), user.id, child_id).await?;

    Ok(ok(review::due_words(proxy.pool(), child_id, limit, now_ms()).await?))
}

async fn list_words(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    QueryParams(query): QueryParams<WordsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let child_id = require_child_id(query.child_id)?;
    let filter = match query.status.as_deref() {
        None | Some("") => ReviewFilter::All,
        Some(raw) => raw.parse::<ReviewFilter>().map_err(AppError::validation)?,
    };
    let proxy = state.require_db()?;
    children::require_child(proxy.pool(), user.id, child_id).await?;

    Ok(ok(review::list_words(proxy.pool(), child_id, filter).await?))
}
