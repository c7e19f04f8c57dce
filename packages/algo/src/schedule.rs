//! 复习阶段状态机
//!
//! 每答对一次推进一个阶段并按 [`REVIEW_INTERVALS_DAYS`] 排下一次复习；
//! 答错回到阶段 0，第二天复习；在最高阶段再次答对即为掌握。

use crate::types::{ReviewState, MAX_STAGE, MS_PER_DAY, REVIEW_INTERVALS_DAYS};

/// 阶段 `stage` 答对后需要等待的天数
pub fn interval_days(stage: u32) -> i64 {
    let idx = (stage as usize).min(REVIEW_INTERVALS_DAYS.len() - 1);
    REVIEW_INTERVALS_DAYS[idx]
}

pub fn apply_review(state: &ReviewState, correct: bool, now_ms: i64) -> ReviewState {
    let mut next = state.clone();
    next.total_count = next.total_count.saturating_add(1);
    next.last_correct = Some(correct);
    next.last_reviewed_at_ms = Some(now_ms);

    if !correct {
        next.wrong_count = next.wrong_count.saturating_add(1);
        next.correct_streak = 0;
        next.stage = 0;
        next.mastered = false;
        next.next_review_at_ms = Some(now_ms + interval_days(0) * MS_PER_DAY);
        return next;
    }

    next.correct_count = next.correct_count.saturating_add(1);
    next.correct_streak = next.correct_streak.saturating_add(1);

    if state.mastered || state.stage >= MAX_STAGE {
        next.stage = MAX_STAGE;
        next.mastered = true;
        next.next_review_at_ms = None;
    } else {
        next.next_review_at_ms = Some(now_ms + interval_days(state.stage) * MS_PER_DAY);
        next.stage = state.stage + 1;
    }

    next
}

pub fn is_due(state: &ReviewState, now_ms: i64) -> bool {
    if state.mastered {
        return false;
    }
    match state.next_review_at_ms {
        Some(at) => at <= now_ms,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const NOW: i64 = 1_704_067_200_000;

    #[test]
    fn first_correct_schedules_next_day() {
        let state = apply_review(&ReviewState::new(), true, NOW);
        assert_eq!(state.stage, 1);
        assert_eq!(state.correct_streak, 1);
        assert_eq!(state.next_review_at_ms, Some(NOW + MS_PER_DAY));
        assert_eq!(state.last_correct, Some(true));
        assert!(!state.mastered);
    }

    #[test]
    fn intervals_follow_stage_table() {
        let mut state = ReviewState::new();
        let mut now = NOW;
        for (stage, days) in REVIEW_INTERVALS_DAYS.iter().enumerate() {
            state = apply_review(&state, true, now);
            assert_eq!(state.stage as usize, stage + 1);
            assert_eq!(state.next_review_at_ms, Some(now + days * MS_PER_DAY));
            now += days * MS_PER_DAY;
        }
        assert_eq!(state.stage, MAX_STAGE);
        assert!(!state.mastered);

        let state = apply_review(&state, true, now);
        assert!(state.mastered);
        assert_eq!(state.next_review_at_ms, None);
        assert!(!is_due(&state, now + 365 * MS_PER_DAY));
    }

    #[test]
    fn wrong_answer_resets_stage() {
        let mut state = ReviewState::new();
        for _ in 0..3 {
            state = apply_review(&state, true, NOW);
        }
        let state = apply_review(&state, false, NOW);
        assert_eq!(state.stage, 0);
        assert_eq!(state.correct_streak, 0);
        assert_eq!(state.wrong_count, 1);
        assert_eq!(state.next_review_at_ms, Some(NOW + MS_PER_DAY));
    }

    #[test]
    fn wrong_answer_unmasters_word() {
        let mut state = ReviewState::new();
        for _ in 0..=MAX_STAGE {
            state = apply_review(&state, true, NOW);
        }
        assert!(state.mastered);
        let state = apply_review(&state, false, NOW);
        assert!(!state.mastered);
        assert!(is_due(&state, NOW + MS_PER_DAY));
    }

    #[test]
    fn never_scheduled_is_due() {
        assert!(is_due(&ReviewState::new(), NOW));
    }

    #[test]
    fn due_exactly_at_next_review() {
        let state = apply_review(&ReviewState::new(), false, NOW);
        assert!(!is_due(&state, NOW + MS_PER_DAY - 1));
        assert!(is_due(&state, NOW + MS_PER_DAY));
    }

    proptest! {
        #[test]
        fn counters_stay_consistent(results in proptest::collection::vec(any::<bool>(), 0..40)) {
            let mut state = ReviewState::new();
            let mut now = NOW;
            for correct in &results {
                state = apply_review(&state, *correct, now);
                now += MS_PER_DAY;

                prop_assert_eq!(state.correct_count + state.wrong_count, state.total_count);
                prop_assert!(state.stage <= MAX_STAGE);
                if state.mastered {
                    prop_assert_eq!(state.stage, MAX_STAGE);
                    prop_assert!(state.next_review_at_ms.is_none());
                } else {
                    prop_assert!(state.next_review_at_ms.is_some());
                }
            }
            prop_assert_eq!(state.total_count as usize, results.len());
        }

        #[test]
        fn streak_counts_trailing_correct(results in proptest::collection::vec(any::<bool>(), 1..40)) {
            let mut state = ReviewState::new();
            for correct in &results {
                state = apply_review(&state, *correct, NOW);
            }
            let trailing = results.iter().rev().take_while(|c| **c).count();
            prop_assert_eq!(state.correct_streak as usize, trailing);
        }
    }
}
