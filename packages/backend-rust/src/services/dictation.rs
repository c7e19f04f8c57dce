use std::collections::{HashMap, HashSet};

use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tingxie_algo::{sample_words, select_words, SelectionConfig};

use crate::auth::{iso_ms, iso_ms_opt};
use crate::response::{json_error, AppError};
use crate::services::children::{find_accessible_child, Child};
use crate::services::{curriculum, review};

/// 手动指定词语的上限
pub const MAX_MANUAL_WORDS: usize = 100;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_COMPLETED: &str = "completed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSource {
    Manual,
    Unit,
    Smart,
}

impl TaskSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Unit => "unit",
            Self::Smart => "smart",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DictationConfig {
    pub child_id: i64,
    pub words_per_dictation: i64,
    pub review_days: i64,
    pub dictation_interval: i64,
    pub dictation_ratio: i64,
    pub wrong_words_only: bool,
    pub updated_at: String,
}

impl DictationConfig {
    pub fn selection(&self) -> SelectionConfig {
        SelectionConfig {
            words_per_dictation: self.words_per_dictation.clamp(0, 100) as u32,
            review_days: self.review_days.clamp(0, 365) as u32,
            dictation_ratio: self.dictation_ratio.clamp(0, 100) as u32,
            wrong_words_only: self.wrong_words_only,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigPatch {
    pub words_per_dictation: Option<i64>,
    pub review_days: Option<i64>,
    pub dictation_interval: Option<i64>,
    pub dictation_ratio: Option<i64>,
    pub wrong_words_only: Option<bool>,
}

impl ConfigPatch {
    pub fn validate(&self) -> Result<(), String> {
        check_range("words_per_dictation", self.words_per_dictation, 1, 100)?;
        check_range("review_days", self.review_days, 1, 30)?;
        check_range("dictation_interval", self.dictation_interval, 1, 60)?;
        check_range("dictation_ratio", self.dictation_ratio, 0, 100)?;
        Ok(())
    }
}

fn check_range(name: &str, value: Option<i64>, min: i64, max: i64) -> Result<(), String> {
    match value {
        Some(v) if !(min..=max).contains(&v) => Err(format!("{name} 必须在 {min}-{max} 之间")),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DictationTask {
    pub id: i64,
    pub child_id: i64,
    pub status: String,
    pub source: String,
    pub unit: Option<i64>,
    pub word_count: i64,
    pub correct_count: i64,
    pub wrong_count: i64,
    pub accuracy: Option<f64>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskItem {
    pub id: i64,
    pub position: i64,
    pub word: String,
    pub yuwen_item_id: Option<i64>,
    pub pinyin: Option<String>,
    pub audio_url: Option<String>,
    pub is_correct: Option<bool>,
    pub answer: Option<String>,
    pub answered_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDetail {
    #[serde(flatten)]
    pub task: DictationTask,
    pub items: Vec<TaskItem>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateTask {
    pub unit: Option<i64>,
    pub words: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct ItemResult {
    pub item_id: i64,
    pub is_correct: bool,
    pub answer: Option<String>,
}

#[derive(Debug, Error)]
pub enum DictationError {
    #[error("no words available")]
    NoWords,
    #[error("task not found")]
    TaskNotFound,
    #[error("task is not pending")]
    NotPending,
    #[error("item {0} does not belong to the task")]
    UnknownItem(i64),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

impl From<DictationError> for AppError {
    fn from(err: DictationError) -> Self {
        match err {
            DictationError::NoWords => json_error(
                axum::http::StatusCode::BAD_REQUEST,
                "NO_WORDS",
                "没有可听写的词语",
            ),
            DictationError::TaskNotFound => AppError::task_not_found(),
            DictationError::NotPending => AppError::conflict("听写任务已完成"),
            DictationError::UnknownItem(id) => {
                AppError::validation(format!("词语 {id} 不属于该听写任务"))
            }
            DictationError::Validation(message) => AppError::validation(message),
            DictationError::Sql(err) => err.into(),
        }
    }
}

/// Trims, drops blanks and repeats, keeping the first `MAX_MANUAL_WORDS`.
pub fn normalize_words(words: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    words
        .iter()
        .map(|w| w.trim())
        .filter(|w| !w.is_empty())
        .filter(|w| seen.insert(w.to_string()))
        .take(MAX_MANUAL_WORDS)
        .map(str::to_string)
        .collect()
}

fn map_config(row: &SqliteRow) -> Result<DictationConfig, sqlx::Error> {
    Ok(DictationConfig {
        child_id: row.try_get("child_id")?,
        words_per_dictation: row.try_get("words_per_dictation")?,
        review_days: row.try_get("review_days")?,
        dictation_interval: row.try_get("dictation_interval")?,
        dictation_ratio: row.try_get("dictation_ratio")?,
        wrong_words_only: row.try_get("wrong_words_only")?,
        updated_at: iso_ms(row.try_get("updated_at")?),
    })
}

/// 首次访问时按默认值创建
pub async fn get_or_create_config(pool: &SqlitePool, child_id: i64, now_ms: i64) -> Result<DictationConfig, sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO "dictation_configs" ("child_id", "created_at", "updated_at")
        VALUES (?, ?, ?)
        ON CONFLICT ("child_id") DO NOTHING
        "#,
    )
    .bind(child_id)
    .bind(now_ms)
    .bind(now_ms)
    .execute(pool)
    .await?;

    let row = sqlx::query(r#"SELECT * FROM "dictation_configs" WHERE "child_id" = ?"#)
        .bind(child_id)
        .fetch_one(pool)
        .await?;
    map_config(&row)
}

pub async fn update_config(
    pool: &SqlitePool,
    child_id: i64,
    patch: &ConfigPatch,
    now_ms: i64,
) -> Result<DictationConfig, DictationError> {
    patch.validate().map_err(DictationError::Validation)?;
    get_or_create_config(pool, child_id, now_ms).await?;

    sqlx::query(
        r#"
        UPDATE "dictation_configs" SET
          "words_per_dictation" = COALESCE(?, "words_per_dictation"),
          "review_days" = COALESCE(?, "review_days"),
          "dictation_interval" = COALESCE(?, "dictation_interval"),
          "dictation_ratio" = COALESCE(?, "dictation_ratio"),
          "wrong_words_only" = COALESCE(?, "wrong_words_only"),
          "updated_at" = ?
        WHERE "child_id" = ?
        "#,
    )
    .bind(patch.words_per_dictation)
    .bind(patch.review_days)
    .bind(patch.dictation_interval)
    .bind(patch.dictation_ratio)
    .bind(patch.wrong_words_only)
    .bind(now_ms)
    .bind(child_id)
    .execute(pool)
    .await?;

    Ok(get_or_create_config(pool, child_id, now_ms).await?)
}

async fn pick_words(
    pool: &SqlitePool,
    child: &Child,
    input: &CreateTask,
    now_ms: i64,
) -> Result<(TaskSource, Vec<String>), DictationError> {
    if let Some(words) = input.words.as_deref() {
        return Ok((TaskSource::Manual, normalize_words(words)));
    }

    let config = get_or_create_config(pool, child.id, now_ms).await?;
    let book = child.textbook();

    if let Some(unit) = input.unit {
        if unit < 1 {
            return Err(DictationError::Validation("unit 必须大于 0".to_string()));
        }
        let items = curriculum::list_unit_items(pool, &book, unit).await?;
        let mut unit_words: Vec<String> = Vec::with_capacity(items.len());
        for item in items {
            if !unit_words.contains(&item.word) {
                unit_words.push(item.word);
            }
        }
        let n = config.words_per_dictation.max(1) as usize;
        let sampled = sample_words(&unit_words, n, &mut rand::rng());
        return Ok((TaskSource::Unit, sampled));
    }

    let candidates = review::load_candidates(pool, child.id).await?;
    let reviewed: HashSet<&str> = candidates.iter().map(|c| c.word.as_str()).collect();
    let new_words: Vec<String> = curriculum::list_book_words(pool, &book)
        .await?
        .into_iter()
        .filter(|w| !reviewed.contains(w.as_str()))
        .collect();

    let picked = select_words(&config.selection(), &candidates, &new_words, now_ms);
    Ok((TaskSource::Smart, picked))
}

pub async fn create_task(
    pool: &SqlitePool,
    user_id: i64,
    child: &Child,
    input: &CreateTask,
    now_ms: i64,
) -> Result<TaskDetail, DictationError> {
    let (source, words) = pick_words(pool, child, input, now_ms).await?;
    if words.is_empty() {
        return Err(DictationError::NoWords);
    }

    let item_ids = curriculum::item_ids_for_words(pool, &child.textbook(), &words).await?;
    let unit = match source {
        TaskSource::Unit => input.unit,
        _ => None,
    };

    let mut tx = pool.begin().await?;
    let task_id = sqlx::query(
        r#"
        INSERT INTO "dictation_tasks"
          ("child_id", "user_id", "status", "source", "unit", "word_count", "created_at")
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(child.id)
    .bind(user_id)
    .bind(STATUS_PENDING)
    .bind(source.as_str())
    .bind(unit)
    .bind(words.len() as i64)
    .bind(now_ms)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    for (position, word) in words.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO "dictation_task_items" ("task_id", "position", "word", "yuwen_item_id")
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(task_id)
        .bind(position as i64 + 1)
        .bind(word)
        .bind(item_ids.get(word).copied())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    tracing::info!(task_id, child_id = child.id, source = source.as_str(), words = words.len(), "dictation task created");
    load_detail(pool, task_id).await
}

fn map_task(row: &SqliteRow) -> Result<DictationTask, sqlx::Error> {
    let word_count: i64 = row.try_get("word_count")?;
    let correct_count: i64 = row.try_get("correct_count")?;
    let status: String = row.try_get("status")?;
    let accuracy = (status == STATUS_COMPLETED && word_count > 0)
        .then(|| (correct_count as f64 * 1000.0 / word_count as f64).round() / 10.0);

    Ok(DictationTask {
        id: row.try_get("id")?,
        child_id: row.try_get("child_id")?,
        status,
        source: row.try_get("source")?,
        unit: row.try_get("unit")?,
        word_count,
        correct_count,
        wrong_count: row.try_get("wrong_count")?,
        accuracy,
        created_at: iso_ms(row.try_get("created_at")?),
        completed_at: iso_ms_opt(row.try_get("completed_at")?),
    })
}

fn map_item(row: &SqliteRow) -> Result<TaskItem, sqlx::Error> {
    Ok(TaskItem {
        id: row.try_get("id")?,
        position: row.try_get("position")?,
        word: row.try_get("word")?,
        yuwen_item_id: row.try_get("yuwen_item_id")?,
        pinyin: row.try_get("pinyin")?,
        audio_url: row.try_get("audio_url")?,
        is_correct: row.try_get("is_correct")?,
        answer: row.try_get("answer")?,
        answered_at: iso_ms_opt(row.try_get("answered_at")?),
    })
}

async fn load_items(pool: &SqlitePool, task_id: i64) -> Result<Vec<TaskItem>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT i."id", i."position", i."word", i."yuwen_item_id", i."is_correct", i."answer", i."answered_at",
               y."pinyin", y."audio_url"
        FROM "dictation_task_items" i
        LEFT JOIN "yuwen_items" y ON y."id" = i."yuwen_item_id"
        WHERE i."task_id" = ?
        ORDER BY i."position"
        "#,
    )
    .bind(task_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(map_item).collect()
}

async fn load_detail(pool: &SqlitePool, task_id: i64) -> Result<TaskDetail, DictationError> {
    let row = sqlx::query(r#"SELECT * FROM "dictation_tasks" WHERE "id" = ?"#)
        .bind(task_id)
        .fetch_optional(pool)
        .await?
        .ok_or(DictationError::TaskNotFound)?;
    let task = map_task(&row)?;
    let items = load_items(pool, task_id).await?;
    Ok(TaskDetail { task, items })
}

/// Loads a task whose child the user can access.
pub async fn get_task(pool: &SqlitePool, user_id: i64, task_id: i64) -> Result<TaskDetail, DictationError> {
    let detail = load_detail(pool, task_id).await?;
    if find_accessible_child(pool, user_id, detail.task.child_id)
        .await?
        .is_none()
    {
        return Err(DictationError::TaskNotFound);
    }
    Ok(detail)
}

pub async fn list_tasks(
    pool: &SqlitePool,
    child_id: i64,
    status: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<DictationTask>, i64), sqlx::Error> {
    let total: i64 = sqlx::query(
        r#"SELECT COUNT(*) AS "total" FROM "dictation_tasks" WHERE "child_id" = ? AND (? IS NULL OR "status" = ?)"#,
    )
    .bind(child_id)
    .bind(status)
    .bind(status)
    .fetch_one(pool)
    .await?
    .try_get("total")?;

    let rows = sqlx::query(
        r#"
        SELECT * FROM "dictation_tasks"
        WHERE "child_id" = ? AND (? IS NULL OR "status" = ?)
        ORDER BY "created_at" DESC, "id" DESC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(child_id)
    .bind(status)
    .bind(status)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let tasks = rows.iter().map(map_task).collect::<Result<Vec<_>, _>>()?;
    Ok((tasks, total))
}

/// Grades a pending task. Items without a result count as wrong; every item
/// moves the child's review schedule for its word.
pub async fn submit_task(
    pool: &SqlitePool,
    user_id: i64,
    task_id: i64,
    results: &[ItemResult],
    now_ms: i64,
) -> Result<TaskDetail, DictationError> {
    let detail = get_task(pool, user_id, task_id).await?;
    if detail.task.status != STATUS_PENDING {
        return Err(DictationError::NotPending);
    }

    let item_ids: HashSet<i64> = detail.items.iter().map(|item| item.id).collect();
    let mut by_item: HashMap<i64, &ItemResult> = HashMap::with_capacity(results.len());
    for result in results {
        if !item_ids.contains(&result.item_id) {
            return Err(DictationError::UnknownItem(result.item_id));
        }
        by_item.insert(result.item_id, result);
    }

    let mut tx = pool.begin().await?;

    // 并发提交时只有一个请求能把状态从 pending 改掉
    let claimed = sqlx::query(
        r#"UPDATE "dictation_tasks" SET "status" = ?, "completed_at" = ? WHERE "id" = ? AND "status" = ?"#,
    )
    .bind(STATUS_COMPLETED)
    .bind(now_ms)
    .bind(task_id)
    .bind(STATUS_PENDING)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    if claimed == 0 {
        return Err(DictationError::NotPending);
    }

    let mut correct_count = 0i64;
    for item in &detail.items {
        let result = by_item.get(&item.id);
        let correct = result.is_some_and(|r| r.is_correct);
        if correct {
            correct_count += 1;
        }

        sqlx::query(
            r#"UPDATE "dictation_task_items" SET "is_correct" = ?, "answer" = ?, "answered_at" = ? WHERE "id" = ?"#,
        )
        .bind(correct)
        .bind(result.and_then(|r| r.answer.as_deref()))
        .bind(now_ms)
        .bind(item.id)
        .execute(&mut *tx)
        .await?;

        review::record_result(&mut *tx, detail.task.child_id, &item.word, correct, now_ms).await?;
    }

    let word_count = detail.items.len() as i64;
    sqlx::query(r#"UPDATE "dictation_tasks" SET "correct_count" = ?, "wrong_count" = ? WHERE "id" = ?"#)
        .bind(correct_count)
        .bind(word_count - correct_count)
        .bind(task_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(task_id, correct = correct_count, total = word_count, "dictation task submitted");
    load_detail(pool, task_id).await
}

pub async fn delete_task(pool: &SqlitePool, user_id: i64, task_id: i64) -> Result<(), DictationError> {
    get_task(pool, user_id, task_id).await?;
    sqlx::query(r#"DELETE FROM "dictation_tasks" WHERE "id" = ?"#)
        .bind(task_id)
        .execute(pool)
        .await?;
    Ok(())
}
