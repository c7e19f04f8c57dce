use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Router};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::response::{ok, AppError, QueryParams};
use crate::routes::require_child_id;
use crate::services::{children, curriculum};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/units", get(list_units))
        .route("/words", get(list_words))
}

#[derive(Debug, Deserialize)]
struct CurriculumQuery {
    child_id: Option<i64>,
    unit: Option<i64>,
}

async fn list_units(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    QueryParams(query): QueryParams<CurriculumQuery>,
) -> Result<impl IntoResponse, AppError> {
    let child_id = require_child_id(query.child_id)?;
    let proxy = state.require_db()?;
    let child = children::require_child(proxy.pool(), user.id, child_id).await?;

    let units = curriculum::list_units(proxy.pool(), &child.textbook()).await?;
    Ok(ok(units))
}

async fn list_words(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    QueryParams(query): QueryParams<CurriculumQuery>,
) -> Result<impl IntoResponse, AppError> {
    let child_id = require_child_id(query.child_id)?;
    let unit = query.unit.ok_or_else(|| AppError::missing_param("unit"))?;
    let proxy = state.require_db()?;
    let child = children::require_child(proxy.pool(), user.id, child_id).await?;

    let items = curriculum::list_unit_items(proxy.pool(), &child.textbook(), unit).await?;
    Ok(ok(items))
}
