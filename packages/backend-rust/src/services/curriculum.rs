use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::auth::now_ms;
use crate::services::children::{Textbook, DEFAULT_TEXTBOOK_VERSION};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YuwenItem {
    pub id: i64,
    pub grade: i64,
    pub semester: i64,
    pub textbook_version: String,
    pub unit: i64,
    pub lesson: Option<i64>,
    pub word: String,
    pub pinyin: Option<String>,
    pub item_type: String,
    pub audio_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitSummary {
    pub unit: i64,
    pub word_count: i64,
}

/// One row of a curriculum import file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportItem {
    pub grade: i64,
    pub semester: i64,
    #[serde(default, alias = "textbook_version")]
    pub textbook_version: Option<String>,
    pub unit: i64,
    #[serde(default)]
    pub lesson: Option<i64>,
    pub word: String,
    #[serde(default)]
    pub pinyin: Option<String>,
    #[serde(default, alias = "item_type", alias = "type")]
    pub item_type: Option<String>,
    #[serde(default, alias = "audio_url")]
    pub audio_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

impl ImportItem {
    fn is_valid(&self) -> bool {
        (1..=6).contains(&self.grade)
            && (1..=2).contains(&self.semester)
            && self.unit >= 1
            && !self.word.trim().is_empty()
            && self
                .item_type
                .as_deref()
                .map_or(true, |t| matches!(t, "word" | "character"))
    }
}

fn map_item(row: &SqliteRow) -> Result<YuwenItem, sqlx::Error> {
    Ok(YuwenItem {
        id: row.try_get("id")?,
        grade: row.try_get("grade")?,
        semester: row.try_get("semester")?,
        textbook_version: row.try_get("textbook_version")?,
        unit: row.try_get("unit")?,
        lesson: row.try_get("lesson")?,
        word: row.try_get("word")?,
        pinyin: row.try_get("pinyin")?,
        item_type: row.try_get("item_type")?,
        audio_url: row.try_get("audio_url")?,
    })
}

pub async fn list_units(pool: &SqlitePool, book: &Textbook) -> Result<Vec<UnitSummary>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT "unit", COUNT(*) AS "word_count"
        FROM "yuwen_items"
        WHERE "grade" = ? AND "semester" = ? AND "textbook_version" = ?
        GROUP BY "unit"
        ORDER BY "unit"
        "#,
    )
    .bind(book.grade)
    .bind(book.semester)
    .bind(&book.version)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<UnitSummary, sqlx::Error> {
            Ok(UnitSummary {
                unit: row.try_get("unit")?,
                word_count: row.try_get("word_count")?,
            })
        })
        .collect()
}

pub async fn list_unit_items(
    pool: &SqlitePool,
    book: &Textbook,
    unit: i64,
) -> Result<Vec<YuwenItem>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM "yuwen_items"
        WHERE "grade" = ? AND "semester" = ? AND "textbook_version" = ? AND "unit" = ?
        ORDER BY COALESCE("lesson", 0), "id"
        "#,
    )
    .bind(book.grade)
    .bind(book.semester)
    .bind(&book.version)
    .bind(unit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(map_item).collect()
}

/// Every word of the textbook in curriculum order.
pub async fn list_book_words(pool: &SqlitePool, book: &Textbook) -> Result<Vec<String>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT "word" FROM "yuwen_items"
        WHERE "grade" = ? AND "semester" = ? AND "textbook_version" = ?
        ORDER BY "unit", COALESCE("lesson", 0), "id"
        "#,
    )
    .bind(book.grade)
    .bind(book.semester)
    .bind(&book.version)
    .fetch_all(pool)
    .await?;

    let mut words: Vec<String> = Vec::with_capacity(rows.len());
    for row in &rows {
        let word: String = row.try_get("word")?;
        if !words.contains(&word) {
            words.push(word);
        }
    }
    Ok(words)
}

/// Maps words to curriculum item ids within the textbook; first unit wins.
pub async fn item_ids_for_words(
    pool: &SqlitePool,
    book: &Textbook,
    words: &[String],
) -> Result<HashMap<String, i64>, sqlx::Error> {
    if words.is_empty() {
        return Ok(HashMap::new());
    }

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        r#"SELECT "id", "word" FROM "yuwen_items" WHERE "grade" = "#,
    );
    qb.push_bind(book.grade)
        .push(r#" AND "semester" = "#)
        .push_bind(book.semester)
        .push(r#" AND "textbook_version" = "#)
        .push_bind(&book.version)
        .push(r#" AND "word" IN ("#);
    let mut separated = qb.separated(", ");
    for word in words {
        separated.push_bind(word);
    }
    separated.push_unseparated(r#") ORDER BY "unit" DESC, "id" DESC"#);

    let rows = qb.build().fetch_all(pool).await?;
    let mut ids = HashMap::with_capacity(rows.len());
    for row in &rows {
        ids.insert(row.try_get::<String, _>("word")?, row.try_get::<i64, _>("id")?);
    }
    Ok(ids)
}

/// Upserts import rows on (grade, semester, textbook_version, unit, word).
pub async fn import_items(pool: &SqlitePool, items: &[ImportItem]) -> Result<ImportReport, sqlx::Error> {
    let mut report = ImportReport::default();
    let now = now_ms();
    let mut tx = pool.begin().await?;

    for item in items {
        if !item.is_valid() {
            tracing::debug!(word = %item.word, grade = item.grade, unit = item.unit, "skipping invalid curriculum row");
            report.skipped += 1;
            continue;
        }

        let version = item
            .textbook_version
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_TEXTBOOK_VERSION);
        let word = item.word.trim();
        let item_type = item.item_type.as_deref().unwrap_or("word");

        let existing = sqlx::query(
            r#"
            SELECT "id" FROM "yuwen_items"
            WHERE "grade" = ? AND "semester" = ? AND "textbook_version" = ? AND "unit" = ? AND "word" = ?
            "#,
        )
        .bind(item.grade)
        .bind(item.semester)
        .bind(version)
        .bind(item.unit)
        .bind(word)
        .fetch_optional(&mut *tx)
        .await?;

        match existing {
            Some(row) => {
                let id: i64 = row.try_get("id")?;
                sqlx::query(
                    r#"
                    UPDATE "yuwen_items" SET
                      "lesson" = ?, "pinyin" = ?, "item_type" = ?, "audio_url" = ?
                    WHERE "id" = ?
                    "#,
                )
                .bind(item.lesson)
                .bind(item.pinyin.as_deref())
                .bind(item_type)
                .bind(item.audio_url.as_deref())
                .bind(id)
                .execute(&mut *tx)
                .await?;
                report.updated += 1;
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO "yuwen_items"
                      ("grade", "semester", "textbook_version", "unit", "lesson", "word", "pinyin", "item_type", "audio_url", "created_at")
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(item.grade)
                .bind(item.semester)
                .bind(version)
                .bind(item.unit)
                .bind(item.lesson)
                .bind(word)
                .bind(item.pinyin.as_deref())
                .bind(item_type)
                .bind(item.audio_url.as_deref())
                .bind(now)
                .execute(&mut *tx)
                .await?;
                report.inserted += 1;
            }
        }
    }

    tx.commit().await?;
    Ok(report)
}
