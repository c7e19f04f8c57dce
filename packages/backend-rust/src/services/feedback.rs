use std::str::FromStr;

use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use crate::auth::{iso_ms, now_ms};
use crate::response::AppError;

const TITLE_MAX_CHARS: usize = 100;
const CONTENT_MAX_CHARS: usize = 2000;
const REPLY_MAX_CHARS: usize = 2000;
pub const MAX_IMAGES: usize = 9;

const FEEDBACK_TYPES: [&str; 4] = ["bug", "suggestion", "other", "general"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackStatus {
    Pending,
    Processing,
    Resolved,
}

impl FeedbackStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Resolved => "resolved",
        }
    }
}

impl FromStr for FeedbackStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "resolved" => Ok(Self::Resolved),
            _ => Err("status 必须是 pending、processing 或 resolved".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub content: String,
    #[serde(rename = "type")]
    pub feedback_type: String,
    pub contact: Option<String>,
    pub images: Vec<String>,
    pub status: String,
    pub reply_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackReply {
    pub id: i64,
    pub user_id: i64,
    pub content: String,
    pub is_admin: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackDetail {
    #[serde(flatten)]
    pub feedback: Feedback,
    pub replies: Vec<FeedbackReply>,
}

#[derive(Debug, Clone, Default)]
pub struct NewFeedback {
    pub title: String,
    pub content: String,
    pub feedback_type: Option<String>,
    pub contact: Option<String>,
    pub images: Vec<String>,
}

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("{0}")]
    Validation(String),
    #[error("feedback not found")]
    NotFound,
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

impl From<FeedbackError> for AppError {
    fn from(err: FeedbackError) -> Self {
        match err {
            FeedbackError::Validation(message) => AppError::validation(message),
            FeedbackError::NotFound => AppError::not_found("反馈不存在"),
            FeedbackError::Sql(err) => err.into(),
        }
    }
}

fn bounded_text(value: &str, field: &str, max: usize) -> Result<String, FeedbackError> {
    let trimmed = value.trim();
    let chars = trimmed.chars().count();
    if chars == 0 || chars > max {
        return Err(FeedbackError::Validation(format!("{field} 长度必须在 1-{max} 个字符之间")));
    }
    Ok(trimmed.to_string())
}

impl NewFeedback {
    /// Returns the normalized copy that gets stored.
    pub fn validate(&self) -> Result<Self, FeedbackError> {
        let title = bounded_text(&self.title, "标题", TITLE_MAX_CHARS)?;
        let content = bounded_text(&self.content, "内容", CONTENT_MAX_CHARS)?;

        let feedback_type = self
            .feedback_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or("general");
        if !FEEDBACK_TYPES.contains(&feedback_type) {
            return Err(FeedbackError::Validation(format!(
                "type 必须是以下值之一: {}",
                FEEDBACK_TYPES.join(", ")
            )));
        }

        let images: Vec<String> = self
            .images
            .iter()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();
        if images.len() > MAX_IMAGES {
            return Err(FeedbackError::Validation(format!("最多上传 {MAX_IMAGES} 张图片")));
        }

        Ok(Self {
            title,
            content,
            feedback_type: Some(feedback_type.to_string()),
            contact: self
                .contact
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            images,
        })
    }
}

const FEEDBACK_SELECT: &str = r#"
    SELECT f.*, (SELECT COUNT(*) FROM "feedback_replies" r WHERE r."feedback_id" = f."id") AS "reply_count"
    FROM "feedbacks" f
"#;

/// A damaged `images` column degrades to no images instead of hiding the feedback.
fn decode_images(feedback_id: i64, raw: &str) -> Vec<String> {
    match serde_json::from_str(raw) {
        Ok(images) => images,
        Err(err) => {
            tracing::warn!(feedback_id, error = %err, "stored feedback images are not a JSON string array");
            Vec::new()
        }
    }
}

fn map_feedback(row: &SqliteRow) -> Result<Feedback, sqlx::Error> {
    let id: i64 = row.try_get("id")?;
    let images_raw: String = row.try_get("images")?;
    let images = decode_images(id, &images_raw);

    Ok(Feedback {
        id,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        feedback_type: row.try_get("type")?,
        contact: row.try_get("contact")?,
        images,
        status: row.try_get("status")?,
        reply_count: row.try_get("reply_count")?,
        created_at: iso_ms(row.try_get("created_at")?),
        updated_at: iso_ms(row.try_get("updated_at")?),
    })
}

pub async fn create_feedback(
    pool: &SqlitePool,
    user_id: i64,
    input: &NewFeedback,
) -> Result<Feedback, FeedbackError> {
    let input = input.validate()?;
    let images = serde_json::to_string(&input.images)
        .map_err(|err| FeedbackError::Validation(err.to_string()))?;
    let now = now_ms();

    let id = sqlx::query(
        r#"
        INSERT INTO "feedbacks"
          ("user_id", "title", "content", "type", "contact", "images", "status", "created_at", "updated_at")
        VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(&input.title)
    .bind(&input.content)
    .bind(input.feedback_type.as_deref())
    .bind(input.contact.as_deref())
    .bind(images)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    tracing::info!(feedback_id = id, user_id, "feedback created");
    Ok(find_feedback(pool, id).await?.ok_or(FeedbackError::NotFound)?)
}

async fn find_feedback(pool: &SqlitePool, id: i64) -> Result<Option<Feedback>, sqlx::Error> {
    let sql = format!(r#"{FEEDBACK_SELECT} WHERE f."id" = ?"#);
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    row.as_ref().map(map_feedback).transpose()
}

pub async fn list_feedback(
    pool: &SqlitePool,
    user_id: i64,
    status: Option<FeedbackStatus>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Feedback>, i64), sqlx::Error> {
    let status = status.map(FeedbackStatus::as_str);

    let total: i64 = sqlx::query(
        r#"SELECT COUNT(*) AS "total" FROM "feedbacks" WHERE "user_id" = ? AND (? IS NULL OR "status" = ?)"#,
    )
    .bind(user_id)
    .bind(status)
    .bind(status)
    .fetch_one(pool)
    .await?
    .try_get("total")?;

    let sql = format!(
        r#"{FEEDBACK_SELECT} WHERE f."user_id" = ? AND (? IS NULL OR f."status" = ?)
           ORDER BY f."created_at" DESC, f."id" DESC LIMIT ? OFFSET ?"#
    );
    let rows = sqlx::query(&sql)
        .bind(user_id)
        .bind(status)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

    let items = rows.iter().map(map_feedback).collect::<Result<Vec<_>, _>>()?;
    Ok((items, total))
}

/// 普通用户只能查看自己的反馈，管理员可以查看全部
pub async fn get_detail(
    pool: &SqlitePool,
    user_id: i64,
    is_admin: bool,
    id: i64,
) -> Result<FeedbackDetail, FeedbackError> {
    let feedback = find_feedback(pool, id)
        .await?
        .filter(|f| is_admin || f.user_id == user_id)
        .ok_or(FeedbackError::NotFound)?;

    let rows = sqlx::query(
        r#"SELECT * FROM "feedback_replies" WHERE "feedback_id" = ? ORDER BY "created_at", "id""#,
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let replies = rows
        .iter()
        .map(|row| -> Result<FeedbackReply, sqlx::Error> {
            Ok(FeedbackReply {
                id: row.try_get("id")?,
                user_id: row.try_get("user_id")?,
                content: row.try_get("content")?,
                is_admin: row.try_get("is_admin")?,
                created_at: iso_ms(row.try_get("created_at")?),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(FeedbackDetail { feedback, replies })
}

/// Adds an admin reply; pending feedback moves to processing.
pub async fn reply(
    pool: &SqlitePool,
    admin_id: i64,
    id: i64,
    content: &str,
) -> Result<FeedbackDetail, FeedbackError> {
    let content = bounded_text(content, "回复内容", REPLY_MAX_CHARS)?;
    if find_feedback(pool, id).await?.is_none() {
        return Err(FeedbackError::NotFound);
    }

    let now = now_ms();
    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO "feedback_replies" ("feedback_id", "user_id", "content", "is_admin", "created_at")
        VALUES (?, ?, ?, 1, ?)
        "#,
    )
    .bind(id)
    .bind(admin_id)
    .bind(&content)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        UPDATE "feedbacks" SET
          "status" = CASE WHEN "status" = 'pending' THEN 'processing' ELSE "status" END,
          "updated_at" = ?
        WHERE "id" = ?
        "#,
    )
    .bind(now)
    .bind(id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    get_detail(pool, admin_id, true, id).await
}

pub async fn set_status(
    pool: &SqlitePool,
    id: i64,
    status: FeedbackStatus,
) -> Result<Feedback, FeedbackError> {
    let updated = sqlx::query(r#"UPDATE "feedbacks" SET "status" = ?, "updated_at" = ? WHERE "id" = ?"#)
        .bind(status.as_str())
        .bind(now_ms())
        .bind(id)
        .execute(pool)
        .await?
        .rows_affected();
    if updated == 0 {
        return Err(FeedbackError::NotFound);
    }
    Ok(find_feedback(pool, id).await?.ok_or(FeedbackError::NotFound)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> NewFeedback {
        NewFeedback {
            title: " 声音太小 ".to_string(),
            content: "播放声音听不清".to_string(),
            ..NewFeedback::default()
        }
    }

    #[test]
    fn defaults_type_to_general() {
        let normalized = input().validate().unwrap();
        assert_eq!(normalized.title, "声音太小");
        assert_eq!(normalized.feedback_type.as_deref(), Some("general"));
        assert!(normalized.contact.is_none());
    }

    #[test]
    fn rejects_unknown_type_and_long_title() {
        let bad_type = NewFeedback {
            feedback_type: Some("praise".to_string()),
            ..input()
        };
        assert!(bad_type.validate().is_err());

        let long_title = NewFeedback {
            title: "长".repeat(101),
            ..input()
        };
        assert!(long_title.validate().is_err());
    }

    #[test]
    fn damaged_images_decode_to_empty() {
        assert_eq!(decode_images(1, r#"["https://img/1.png"]"#), vec!["https://img/1.png"]);
        assert!(decode_images(1, "oops").is_empty());
        assert!(decode_images(1, r#"[1, 2]"#).is_empty());
    }

    #[test]
    fn limits_images() {
        let too_many = NewFeedback {
            images: (0..10).map(|i| format!("https://img/{i}.png")).collect(),
            ..input()
        };
        assert!(too_many.validate().is_err());

        let blanks_dropped = NewFeedback {
            images: vec![" ".to_string(), "https://img/1.png".to_string()],
            ..input()
        };
        assert_eq!(blanks_dropped.validate().unwrap().images.len(), 1);
    }

    #[test]
    fn parses_status() {
        assert_eq!("resolved".parse::<FeedbackStatus>().unwrap(), FeedbackStatus::Resolved);
        assert!("closed".parse::<FeedbackStatus>().is_err());
    }
}
