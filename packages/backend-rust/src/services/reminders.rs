use chrono::FixedOffset;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tingxie_algo::is_due;

use crate::auth::iso_ms;
use crate::services::review::load_candidates;
use crate::services::statistics::local_date;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    pub id: i64,
    pub child_id: i64,
    pub child_name: String,
    pub reminder_date: String,
    pub due_count: i64,
    pub is_read: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReminderStats {
    pub children_scanned: usize,
    pub reminders_written: usize,
}

fn map_reminder(row: &SqliteRow) -> Result<Reminder, sqlx::Error> {
    Ok(Reminder {
        id: row.try_get("id")?,
        child_id: row.try_get("child_id")?,
        child_name: row.try_get("child_name")?,
        reminder_date: row.try_get("reminder_date")?,
        due_count: row.try_get("due_count")?,
        is_read: row.try_get("is_read")?,
        created_at: iso_ms(row.try_get("created_at")?),
    })
}

/// 为每个有待复习词语的孩子写入当天的提醒；同一天重复运行只刷新数量
pub async fn generate_reminders(
    pool: &SqlitePool,
    now_ms: i64,
    offset: FixedOffset,
) -> Result<ReminderStats, sqlx::Error> {
    let mut stats = ReminderStats::default();
    let Some(today) = local_date(now_ms, offset) else {
        return Ok(stats);
    };
    let reminder_date = today.format("%Y-%m-%d").to_string();

    let children = sqlx::query(
        r#"SELECT DISTINCT c."id", c."user_id" FROM "children" c JOIN "word_reviews" w ON w."child_id" = c."id""#,
    )
    .fetch_all(pool)
    .await?;

    for row in &children {
        let child_id: i64 = row.try_get("id")?;
        let user_id: i64 = row.try_get("user_id")?;
        stats.children_scanned += 1;

        let due_count = load_candidates(pool, child_id)
            .await?
            .iter()
            .filter(|c| is_due(&c.state, now_ms))
            .count() as i64;
        if due_count == 0 {
            continue;
        }

        sqlx::query(
            r#"
            INSERT INTO "review_reminders" ("child_id", "user_id", "reminder_date", "due_count", "is_read", "created_at")
            VALUES (?, ?, ?, ?, 0, ?)
            ON CONFLICT ("child_id", "reminder_date") DO UPDATE SET
              "due_count" = excluded."due_count"
            "#,
        )
        .bind(child_id)
        .bind(user_id)
        .bind(&reminder_date)
        .bind(due_count)
        .bind(now_ms)
        .execute(pool)
        .await?;
        stats.reminders_written += 1;
    }

    Ok(stats)
}

pub async fn list_reminders(
    pool: &SqlitePool,
    user_id: i64,
    unread_only: bool,
) -> Result<Vec<Reminder>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT r.*, c."name" AS "child_name"
        FROM "review_reminders" r
        JOIN "children" c ON c."id" = r."child_id"
        WHERE r."user_id" = ? AND (? = 0 OR r."is_read" = 0)
        ORDER BY r."reminder_date" DESC, r."id" DESC
        LIMIT 100
        "#,
    )
    .bind(user_id)
    .bind(unread_only)
    .fetch_all(pool)
    .await?;

    rows.iter().map(map_reminder).collect()
}

/// Returns false when the reminder does not exist or belongs to someone else.
pub async fn mark_read(pool: &SqlitePool, user_id: i64, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(r#"UPDATE "review_reminders" SET "is_read" = 1 WHERE "id" = ? AND "user_id" = ?"#)
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
