//! 听写选词
//!
//! 智能模式按比例混合待复习词 (保持率最低的优先) 与新词；
//! 错词模式只取最近 `review_days` 天内答错的词。

use std::cmp::Ordering;
use std::collections::HashSet;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::retention::retention;
use crate::schedule::is_due;
use crate::types::{ReviewState, MS_PER_DAY};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionConfig {
    pub words_per_dictation: u32,
    /// 错词模式的回看天数
    pub review_days: u32,
    /// 复习词占比 (0-100)
    pub dictation_ratio: u32,
    pub wrong_words_only: bool,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            words_per_dictation: 10,
            review_days: 3,
            dictation_ratio: 100,
            wrong_words_only: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReviewCandidate {
    pub word: String,
    pub state: ReviewState,
}

/// 复习词配额，向上取整
pub fn review_quota(limit: usize, ratio: u32) -> usize {
    let ratio = ratio.min(100) as usize;
    (limit * ratio + 99) / 100
}

pub fn select_words(
    config: &SelectionConfig,
    candidates: &[ReviewCandidate],
    new_words: &[String],
    now_ms: i64,
) -> Vec<String> {
    let limit = config.words_per_dictation as usize;
    let mut picker = Picker::new(limit);
    if limit == 0 {
        return picker.finish();
    }

    if config.wrong_words_only {
        let window_start = now_ms - config.review_days as i64 * MS_PER_DAY;
        let mut wrong: Vec<&ReviewCandidate> = candidates
            .iter()
            .filter(|c| c.state.last_correct == Some(false))
            .filter(|c| c.state.last_reviewed_at_ms.is_some_and(|at| at >= window_start))
            .collect();
        wrong.sort_by(|a, b| {
            b.state
                .wrong_count
                .cmp(&a.state.wrong_count)
                .then(a.state.last_reviewed_at_ms.cmp(&b.state.last_reviewed_at_ms))
                .then_with(|| a.word.cmp(&b.word))
        });
        picker.fill(wrong.iter().map(|&c| c.word.as_str()), limit);
        return picker.finish();
    }

    let mut due: Vec<(f64, &ReviewCandidate)> = candidates
        .iter()
        .filter(|c| is_due(&c.state, now_ms))
        .map(|c| (retention(&c.state, now_ms), c))
        .collect();
    due.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.1.word.cmp(&b.1.word))
    });

    let quota = review_quota(limit, config.dictation_ratio);
    let mut due_words = due.iter().map(|&(_, c)| c.word.as_str());
    picker.fill(due_words.by_ref(), quota);
    picker.fill(new_words.iter().map(String::as_str), limit);
    picker.fill(due_words, limit);

    picker.finish()
}

/// 不放回地随机抽取 `n` 个词，保持原有顺序
pub fn sample_words<R: Rng + ?Sized>(words: &[String], n: usize, rng: &mut R) -> Vec<String> {
    if words.len() <= n {
        return words.to_vec();
    }

    let mut indices = rand::seq::index::sample(rng, words.len(), n).into_vec();
    indices.sort_unstable();
    indices.into_iter().map(|idx| words[idx].clone()).collect()
}

struct Picker<'a> {
    picked: Vec<String>,
    seen: HashSet<&'a str>,
}

impl<'a> Picker<'a> {
    fn new(limit: usize) -> Self {
        Self {
            picked: Vec::with_capacity(limit),
            seen: HashSet::with_capacity(limit),
        }
    }

    /// 从 `words` 中取词，直到总数达到 `cap`
    fn fill<I>(&mut self, mut words: I, cap: usize)
    where
        I: Iterator<Item = &'a str>,
    {
        while self.picked.len() < cap {
            let Some(word) = words.next() else {
                break;
            };
            if word.trim().is_empty() || !self.seen.insert(word) {
                continue;
            }
            self.picked.push(word.to_string());
        }
    }

    fn finish(self) -> Vec<String> {
        self.picked
    }
}
