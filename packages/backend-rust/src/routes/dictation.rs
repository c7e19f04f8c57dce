use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Router};
use serde::Deserialize;

use crate::auth::{now_ms, AuthUser};
use crate::response::{ok, paginated, AppError, JsonBody, Pagination, PathParam, QueryParams};
use crate::routes::{page_window, require_child_id};
use crate::services::children;
use crate::services::dictation::{self, ConfigPatch, CreateTask, ItemResult, STATUS_COMPLETED, STATUS_PENDING};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/config", get(get_config).put(update_config))
        .route("/tasks", get(list_tasks))
        .route("/task/create", post(create_task))
        .route("/task/:id", get(get_task).delete(delete_task))
        .route("/task/:id/submit", post(submit_task))
}

#[derive(Debug, Deserialize)]
struct ChildQuery {
    child_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct UpdateConfigRequest {
    child_id: Option<i64>,
    words_per_dictation: Option<i64>,
    review_days: Option<i64>,
    dictation_interval: Option<i64>,
    dictation_ratio: Option<i64>,
    wrong_words_only: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct CreateTaskRequest {
    child_id: Option<i64>,
    unit: Option<i64>,
    words: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TaskListQuery {
    child_id: Option<i64>,
    page: Option<i64>,
    per_page: Option<i64>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    #[serde(default)]
    results: Vec<SubmitItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitItem {
    #[serde(alias = "item_id")]
    item_id: i64,
    #[serde(alias = "is_correct")]
    is_correct: bool,
    answer: Option<String>,
}

async fn get_config(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    QueryParams(query): QueryParams<ChildQuery>,
) -> Result<impl IntoResponse, AppError> {
    let child_id = require_child_id(query.child_id)?;
    let proxy = state.require_db()?;
    children::require_child(proxy.pool(), user.id, child_id).await?;

    let config = dictation::get_or_create_config(proxy.pool(), child_id, now_ms()).await?;
    Ok(ok(config))
}

async fn update_config(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    JsonBody(payload): JsonBody<UpdateConfigRequest>,
) -> Result<impl IntoResponse, AppError> {
    let child_id = require_child_id(payload.child_id)?;
    let proxy = state.require_db()?;
    children::require_child(proxy.pool(), user.id, child_id).await?;

    let patch = ConfigPatch {
        words_per_dictation: payload.words_per_dictation,
        review_days: payload.review_days,
        dictation_interval: payload.dictation_interval,
        dictation_ratio: payload.dictation_ratio,
        wrong_words_only: payload.wrong_words_only,
    };
    let config = dictation::update_config(proxy.pool(), child_id, &patch, now_ms()).await?;
    Ok(ok(config))
}

async fn create_task(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    JsonBody(payload): JsonBody<CreateTaskRequest>,
) -> Result<impl IntoResponse, AppError> {
    let child_id = require_child_id(payload.child_id)?;
    let proxy = state.require_db()?;
    let child = children::require_child(proxy.pool(), user.id, child_id).await?;

    let input = CreateTask {
        unit: payload.unit,
        words: payload.words,
    };
    let task = dictation::create_task(proxy.pool(), user.id, &child, &input, now_ms()).await?;
    Ok(ok(task))
}

async fn list_tasks(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    QueryParams(query): QueryParams<TaskListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let child_id = require_child_id(query.child_id)?;
    let (page, per_page) = page_window(query.page, query.per_page)?;
    let status = query.status.as_deref().map(str::trim).filter(|s| !s.is_empty());
    if let Some(status) = status {
        if status != STATUS_PENDING && status != STATUS_COMPLETED {
            return Err(AppError::validation("status 必须是 pending 或 completed"));
        }
    }

    let proxy = state.require_db()?;
    children::require_child(proxy.pool(), user.id, child_id).await?;

    let (tasks, total) =
        dictation::list_tasks(proxy.pool(), child_id, status, per_page, (page - 1) * per_page).await?;
    Ok(paginated(tasks, Pagination::new(page, per_page, total)))
}

async fn get_task(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    PathParam(id): PathParam<i64>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    Ok(ok(dictation::get_task(proxy.pool(), user.id, id).await?))
}

async fn submit_task(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    PathParam(id): PathParam<i64>,
    JsonBody(payload): JsonBody<SubmitRequest>,
) -> Result<impl IntoResponse, AppError> {
    let results: Vec<ItemResult> = payload
        .results
        .into_iter()
        .map(|item| ItemResult {
            item_id: item.item_id,
            is_correct: item.is_correct,
            answer: item.answer,
        })
        .collect();

    let proxy = state.require_db()?;
    let task = dictation::submit_task(proxy.pool(), user.id, id, &results, now_ms()).await?;
    tracing::info!(
        task_id = id,
        correct = task.task.correct_count,
        wrong = task.task.wrong_count,
        "dictation submitted"
    );
    Ok(ok(task))
}

async fn delete_task(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    PathParam(id): PathParam<i64>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    dictation::delete_task(proxy.pool(), user.id, id).await?;
    Ok(ok(serde_json::json!({ "message": "已删除" })))
}
