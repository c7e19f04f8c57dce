use std::str::FromStr;

use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tingxie_algo::{apply_review, is_due, retention, ReviewCandidate, ReviewState};

use crate::auth::{iso_ms_opt, now_ms};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewFilter {
    All,
    Learning,
    Mastered,
    Wrong,
}

impl FromStr for ReviewFilter {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "all" => Ok(Self::All),
            "learning" => Ok(Self::Learning),
            "mastered" => Ok(Self::Mastered),
            "wrong" => Ok(Self::Wrong),
            other => Err(format!("status 必须是 all、learning、mastered 或 wrong，收到 {other}")),
        }
    }
}

impl ReviewFilter {
    fn sql(self) -> &'static str {
        match self {
            Self::All => "",
            Self::Learning => r#" AND "mastered" = 0"#,
            Self::Mastered => r#" AND "mastered" = 1"#,
            Self::Wrong => r#" AND "last_correct" = 0"#,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WordReview {
    pub word: String,
    pub stage: u32,
    pub correct_streak: u32,
    pub total_count: u32,
    pub correct_count: u32,
    pub wrong_count: u32,
    pub accuracy: f64,
    pub last_correct: Option<bool>,
    pub mastered: bool,
    pub retention: f64,
    pub last_reviewed_at: Option<String>,
    pub next_review_at: Option<String>,
}

impl WordReview {
    fn new(word: String, state: &ReviewState, now_ms: i64) -> Self {
        Self {
            word,
            stage: state.stage,
            correct_streak: state.correct_streak,
            total_count: state.total_count,
            correct_count: state.correct_count,
            wrong_count: state.wrong_count,
            accuracy: round2(state.accuracy()),
            last_correct: state.last_correct,
            mastered: state.mastered,
            retention: round2(retention(state, now_ms)),
            last_reviewed_at: iso_ms_opt(state.last_reviewed_at_ms),
            next_review_at: iso_ms_opt(state.next_review_at_ms),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn count(row: &SqliteRow, column: &str) -> Result<u32, sqlx::Error> {
    let value: i64 = row.try_get(column)?;
    Ok(value.clamp(0, u32::MAX as i64) as u32)
}

pub fn review_state_from_row(row: &SqliteRow) -> Result<ReviewState, sqlx::Error> {
    Ok(ReviewState {
        stage: count(row, "stage")?,
        correct_streak: count(row, "correct_streak")?,
        total_count: count(row, "total_count")?,
        correct_count: count(row, "correct_count")?,
        wrong_count: count(row, "wrong_count")?,
        last_correct: row.try_get("last_correct")?,
        last_reviewed_at_ms: row.try_get("last_reviewed_at")?,
        next_review_at_ms: row.try_get("next_review_at")?,
        mastered: row.try_get("mastered")?,
    })
}

/// All review schedules of a child.
pub async fn load_candidates(pool: &SqlitePool, child_id: i64) -> Result<Vec<ReviewCandidate>, sqlx::Error> {
    let rows = sqlx::query(r#"SELECT * FROM "word_reviews" WHERE "child_id" = ? ORDER BY "word""#)
        .bind(child_id)
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| -> Result<ReviewCandidate, sqlx::Error> {
            Ok(ReviewCandidate {
                word: row.try_get("word")?,
                state: review_state_from_row(row)?,
            })
        })
        .collect()
}

/// Applies one dictation result to the child's schedule for `word`.
pub async fn record_result(
    conn: &mut SqliteConnection,
    child_id: i64,
    word: &str,
    correct: bool,
    now_ms: i64,
) -> Result<ReviewState, sqlx::Error> {
    let row = sqlx::query(r#"SELECT * FROM "word_reviews" WHERE "child_id" = ? AND "word" = ?"#)
        .bind(child_id)
        .bind(word)
        .fetch_optional(&mut *conn)
        .await?;

    let current = match row {
        Some(row) => review_state_from_row(&row)?,
        None => ReviewState::new(),
    };
    let next = apply_review(&current, correct, now_ms);

    sqlx::query(
        r#"
        INSERT INTO "word_reviews"
          ("child_id", "word", "stage", "correct_streak", "total_count", "correct_count", "wrong_count",
           "last_correct", "last_reviewed_at", "next_review_at", "mastered", "updated_at")
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT ("child_id", "word") DO UPDATE SET
          "stage" = excluded."stage",
          "correct_streak" = excluded."correct_streak",
          "total_count" = excluded."total_count",
          "correct_count" = excluded."correct_count",
          "wrong_count" = excluded."wrong_count",
          "last_correct" = excluded."last_correct",
          "last_reviewed_at" = excluded."last_reviewed_at",
          "next_review_at" = excluded."next_review_at",
          "mastered" = excluded."mastered",
          "updated_at" = excluded."updated_at"
        "#,
    )
    .bind(child_id)
    .bind(word)
    .bind(next.stage as i64)
    .bind(next.correct_streak as i64)
    .bind(next.total_count as i64)
    .bind(next.correct_count as i64)
    .bind(next.wrong_count as i64)
    .bind(next.last_correct)
    .bind(next.last_reviewed_at_ms)
    .bind(next.next_review_at_ms)
    .bind(next.mastered)
    .bind(now_ms)
    .execute(&mut *conn)
    .await?;

    Ok(next)
}

/// Due words, lowest retention first.
pub async fn due_words(
    pool: &SqlitePool,
    child_id: i64,
    limit: usize,
    now_ms: i64,
) -> Result<Vec<WordReview>, sqlx::Error> {
    let candidates = load_candidates(pool, child_id).await?;
    let mut due: Vec<(f64, ReviewCandidate)> = candidates
        .into_iter()
        .filter(|c| is_due(&c.state, now_ms))
        .map(|c| (retention(&c.state, now_ms), c))
        .collect();
    due.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.word.cmp(&b.1.word)));

    Ok(due
        .into_iter()
        .take(limit)
        .map(|(_, c)| WordReview::new(c.word, &c.state, now_ms))
        .collect())
}

pub async fn list_words(
    pool: &SqlitePool,
    child_id: i64,
    filter: ReviewFilter,
) -> Result<Vec<WordReview>, sqlx::Error> {
    let now = now_ms();
    let sql = format!(
        r#"SELECT * FROM "word_reviews" WHERE "child_id" = ?{} ORDER BY "updated_at" DESC, "word""#,
        filter.sql()
    );
    let rows = sqlx::query(&sql).bind(child_id).fetch_all(pool).await?;

    rows.iter()
        .map(|row| -> Result<WordReview, sqlx::Error> {
            let state = review_state_from_row(row)?;
            Ok(WordReview::new(row.try_get("word")?, &state, now))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_filters() {
        assert_eq!("all".parse::<ReviewFilter>().unwrap(), ReviewFilter::All);
        assert_eq!("wrong".parse::<ReviewFilter>().unwrap(), ReviewFilter::Wrong);
        assert!("due".parse::<ReviewFilter>().is_err());
    }

    #[test]
    fn word_review_reports_rounded_figures() {
        let now = 1_704_067_200_000;
        let state = apply_review(&apply_review(&ReviewState::new(), true, now), false, now);
        let review = WordReview::new("山".to_string(), &state, now);
        assert_eq!(review.accuracy, 0.5);
        assert_eq!(review.retention, 1.0);
        assert_eq!(review.stage, 0);
        assert!(review.next_review_at.is_some());
    }
}
