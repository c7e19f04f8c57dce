//! Common Types and Constants
//!
//! Shared data structures used across the scheduling modules.

use serde::{Deserialize, Serialize};

// ==================== Constants ====================

/// 每个复习阶段之后的等待天数 (艾宾浩斯间隔)
pub const REVIEW_INTERVALS_DAYS: [i64; 6] = [1, 2, 4, 7, 15, 30];

/// 最高阶段；在此阶段再答对一次即视为掌握
pub const MAX_STAGE: u32 = REVIEW_INTERVALS_DAYS.len() as u32;

/// Milliseconds in one day
pub const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// 到达计划复习时间点时的目标保持率
pub const RETENTION_AT_INTERVAL: f64 = 0.7;

// ==================== Review State ====================

/// 单个词语的复习状态
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewState {
    /// 连续答对推进的阶段 (0..=MAX_STAGE)
    pub stage: u32,
    pub correct_streak: u32,
    pub total_count: u32,
    pub correct_count: u32,
    pub wrong_count: u32,
    /// 最近一次听写结果
    pub last_correct: Option<bool>,
    pub last_reviewed_at_ms: Option<i64>,
    /// None 表示从未排期或已掌握
    pub next_review_at_ms: Option<i64>,
    pub mastered: bool,
}

impl ReviewState {
    pub fn new() -> Self {
        Self {
            stage: 0,
            correct_streak: 0,
            total_count: 0,
            correct_count: 0,
            wrong_count: 0,
            last_correct: None,
            last_reviewed_at_ms: None,
            next_review_at_ms: None,
            mastered: false,
        }
    }

    pub fn is_new(&self) -> bool {
        self.total_count == 0
    }

    /// 正确率 (0.0 - 1.0)，未听写过返回 0
    pub fn accuracy(&self) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }
        self.correct_count as f64 / self.total_count as f64
    }
}

impl Default for ReviewState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_is_unreviewed() {
        let state = ReviewState::new();
        assert!(state.is_new());
        assert_eq!(state.accuracy(), 0.0);
        assert_eq!(state.next_review_at_ms, None);
        assert!(!state.mastered);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_string(&ReviewState::new()).unwrap();
        assert!(json.contains("\"correctStreak\":0"));
        assert!(json.contains("\"nextReviewAtMs\":null"));
    }

    #[test]
    fn accuracy_uses_totals() {
        let state = ReviewState {
            total_count: 4,
            correct_count: 3,
            wrong_count: 1,
            ..ReviewState::new()
        };
        assert!((state.accuracy() - 0.75).abs() < 1e-9);
    }
}
