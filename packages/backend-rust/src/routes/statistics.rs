use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Router};
use serde::Deserialize;

use crate::auth::{now_ms, AuthUser};
use crate::response::{ok, AppError, QueryParams};
use crate::routes::require_child_id;
use crate::services::{children, statistics};
use crate::state::AppState;

const DEFAULT_DAYS: u32 = 7;
const MAX_DAYS: u32 = 90;
const DEFAULT_WRONG_LIMIT: i64 = 20;
const MAX_WRONG_LIMIT: i64 = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/overview", get(overview))
        .route("/daily", get(daily))
        .route("/wrong-words", get(wrong_words))
}

#[derive(Debug, Deserialize)]
struct StatsQuery {
    child_id: Option<i64>,
    days: Option<u32>,
    limit: Option<i64>,
}

async fn overview(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    QueryParams(query): QueryParams<StatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let child_id = require_child_id(query.child_id)?;
    let proxy = state.require_db()?;
    children::require_child(proxy.pool(), user.id, child_id).await?;

    let overview =
        statistics::overview(proxy.pool(), child_id, now_ms(), state.local_offset()).await?;
    Ok(ok(overview))
}

async fn daily(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    QueryParams(query): QueryParams<StatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let child_id = require_child_id(query.child_id)?;
    let days = query.days.unwrap_or(DEFAULT_DAYS);
    if !(1..=MAX_DAYS).contains(&days) {
        return Err(AppError::validation(format!("days 必须在 1-{MAX_DAYS} 之间")));
    }
    let proxy = state.require_db()?;
    children::require_child(proxy.pool(), user.id, child_id).await?;

    let stats =
        statistics::daily(proxy.pool(), child_id, days, now_ms(), state.local_offset()).await?;
    Ok(ok(stats))
}

async fn wrong_words(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    QueryParams(query): QueryParams<StatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let child_id = require_child_id(query.child_id)?;
    let limit = query.limit.unwrap_or(DEFAULT_WRONG_LIMIT).clamp(1, MAX_WRONG_LIMIT);
    let proxy = state.require_db()?;
    children::require_child(proxy.pool(), user.id, child_id).await?;

    Ok(ok(statistics::wrong_words(proxy.pool(), child_id, limit).await?))
}
