//! 遗忘曲线
//!
//! R(t) = exp(-t / S)。稳定度 S 取值使得在计划复习时间点 R 恰为
//! [`RETENTION_AT_INTERVAL`]，因此阶段越高遗忘越慢。

use crate::schedule::interval_days;
use crate::types::{ReviewState, MAX_STAGE, MS_PER_DAY, RETENTION_AT_INTERVAL};

/// 阶段对应的记忆稳定度 (天)
pub fn stability_days(stage: u32) -> f64 {
    let scheduled = interval_days(stage.clamp(1, MAX_STAGE) - 1) as f64;
    scheduled / -RETENTION_AT_INTERVAL.ln()
}

/// 估计当前记忆保持率，范围 [0, 1]；未听写过的词返回 0
pub fn retention(state: &ReviewState, now_ms: i64) -> f64 {
    let Some(last) = state.last_reviewed_at_ms else {
        return 0.0;
    };

    let elapsed_days = (now_ms - last).max(0) as f64 / MS_PER_DAY as f64;
    let stage = if state.mastered { MAX_STAGE } else { state.stage };
    let value = (-elapsed_days / stability_days(stage)).exp();

    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
