//! 听写统计：总览、按天汇总、高频错词。日期按 `TZ_OFFSET_HOURS` 划分。

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Days, FixedOffset, NaiveDate, TimeZone};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tingxie_algo::retention;

use crate::auth::iso_ms_opt;
use crate::services::dictation::STATUS_COMPLETED;
use crate::services::review::load_candidates;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub total_words: i64,
    pub mastered_words: i64,
    pub learning_words: i64,
    pub due_today: i64,
    pub completed_tasks: i64,
    pub total_answers: i64,
    pub correct_answers: i64,
    pub accuracy: f64,
    pub average_retention: f64,
    pub streak_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStat {
    pub date: String,
    pub tasks: i64,
    pub answers: i64,
    pub correct: i64,
    pub accuracy: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WrongWord {
    pub word: String,
    pub wrong_count: i64,
    pub total_count: i64,
    pub mastered: bool,
    pub last_reviewed_at: Option<String>,
}

/// Percentage with one decimal; 0 when nothing was answered.
pub fn accuracy_percent(correct: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    (correct as f64 * 1000.0 / total as f64).round() / 10.0
}

pub fn local_date(ms: i64, offset: FixedOffset) -> Option<NaiveDate> {
    offset.timestamp_millis_opt(ms).single().map(|dt| dt.date_naive())
}

pub fn start_of_local_day_ms(date: NaiveDate, offset: FixedOffset) -> Option<i64> {
    let midnight = date.and_hms_opt(0, 0, 0)?;
    offset
        .from_local_datetime(&midnight)
        .single()
        .map(|dt| dt.timestamp_millis())
}

/// 连续打卡天数：以今天或昨天结尾的连续日期数
pub fn streak_days(days: &BTreeSet<NaiveDate>, today: NaiveDate) -> u32 {
    let mut cursor = if days.contains(&today) {
        today
    } else {
        match today.pred_opt() {
            Some(yesterday) if days.contains(&yesterday) => yesterday,
            _ => return 0,
        }
    };

    let mut streak = 0;
    while days.contains(&cursor) {
        streak += 1;
        match cursor.pred_opt() {
            Some(prev) => cursor = prev,
            None => break,
        }
    }
    streak
}

struct CompletedTask {
    completed_at: i64,
    word_count: i64,
    correct_count: i64,
}

async fn completed_tasks(
    pool: &SqlitePool,
    child_id: i64,
    since_ms: i64,
) -> Result<Vec<CompletedTask>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT "completed_at", "word_count", "correct_count"
        FROM "dictation_tasks"
        WHERE "child_id" = ? AND "status" = ? AND "completed_at" >= ?
        ORDER BY "completed_at"
        "#,
    )
    .bind(child_id)
    .bind(STATUS_COMPLETED)
    .bind(since_ms)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<CompletedTask, sqlx::Error> {
            Ok(CompletedTask {
                completed_at: row.try_get("completed_at")?,
                word_count: row.try_get("word_count")?,
                correct_count: row.try_get("correct_count")?,
            })
        })
        .collect()
}

pub async fn overview(
    pool: &SqlitePool,
    child_id: i64,
    now_ms: i64,
    offset: FixedOffset,
) -> Result<Overview, sqlx::Error> {
    let candidates = load_candidates(pool, child_id).await?;
    let today = local_date(now_ms, offset);
    let end_of_today = today
        .and_then(|d| d.checked_add_days(Days::new(1)))
        .and_then(|d| start_of_local_day_ms(d, offset))
        .unwrap_or(now_ms);

    let total_words = candidates.len() as i64;
    let mastered_words = candidates.iter().filter(|c| c.state.mastered).count() as i64;
    let due_today = candidates
        .iter()
        .filter(|c| !c.state.mastered)
        .filter(|c| c.state.next_review_at_ms.map_or(true, |at| at < end_of_today))
        .count() as i64;
    let average_retention = if candidates.is_empty() {
        0.0
    } else {
        let sum: f64 = candidates.iter().map(|c| retention(&c.state, now_ms)).sum();
        (sum / candidates.len() as f64 * 100.0).round() / 100.0
    };

    let tasks = completed_tasks(pool, child_id, 0).await?;
    let total_answers: i64 = tasks.iter().map(|t| t.word_count).sum();
    let correct_answers: i64 = tasks.iter().map(|t| t.correct_count).sum();
    let active_days: BTreeSet<NaiveDate> = tasks
        .iter()
        .filter_map(|t| local_date(t.completed_at, offset))
        .collect();

    Ok(Overview {
        total_words,
        mastered_words,
        learning_words: total_words - mastered_words,
        due_today,
        completed_tasks: tasks.len() as i64,
        total_answers,
        correct_answers,
        accuracy: accuracy_percent(correct_answers, total_answers),
        average_retention,
        streak_days: today.map_or(0, |d| streak_days(&active_days, d)),
    })
}

/// 最近 `days` 天每天一条，最早的在前；没有听写的日子也会返回 0
pub async fn daily(
    pool: &SqlitePool,
    child_id: i64,
    days: u32,
    now_ms: i64,
    offset: FixedOffset,
) -> Result<Vec<DailyStat>, sqlx::Error> {
    let Some(today) = local_date(now_ms, offset) else {
        return Ok(Vec::new());
    };
    let first_day = today
        .checked_sub_days(Days::new(u64::from(days.saturating_sub(1))))
        .unwrap_or(today);
    let since = start_of_local_day_ms(first_day, offset).unwrap_or(0);

    let mut buckets: BTreeMap<NaiveDate, (i64, i64, i64)> = BTreeMap::new();
    let mut day = first_day;
    while day <= today {
        buckets.insert(day, (0, 0, 0));
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }

    for task in completed_tasks(pool, child_id, since).await? {
        let Some(date) = local_date(task.completed_at, offset) else {
            continue;
        };
        if let Some(bucket) = buckets.get_mut(&date) {
            bucket.0 += 1;
            bucket.1 += task.word_count;
            bucket.2 += task.correct_count;
        }
    }

    Ok(buckets
        .into_iter()
        .map(|(date, (tasks, answers, correct))| DailyStat {
            date: date.format("%Y-%m-%d").to_string(),
            tasks,
            answers,
            correct,
            accuracy: accuracy_percent(correct, answers),
        })
        .collect())
}

pub async fn wrong_words(pool: &SqlitePool, child_id: i64, limit: i64) -> Result<Vec<WrongWord>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT "word", "wrong_count", "total_count", "mastered", "last_reviewed_at"
        FROM "word_reviews"
        WHERE "child_id" = ? AND "wrong_count" > 0
        ORDER BY "wrong_count" DESC, "last_reviewed_at" DESC, "word"
        LIMIT ?
        "#,
    )
    .bind(child_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<WrongWord, sqlx::Error> {
            Ok(WrongWord {
                word: row.try_get("word")?,
                wrong_count: row.try_get("wrong_count")?,
                total_count: row.try_get("total_count")?,
                mastered: row.try_get("mastered")?,
                last_reviewed_at: iso_ms_opt(row.try_get("last_reviewed_at")?),
            })
        })
        .collect()
}
