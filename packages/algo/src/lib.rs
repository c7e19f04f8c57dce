//! # tingxie-algo - 听写复习调度算法库
//!
//! 本 crate 提供纯 Rust 实现的听写复习算法，不做任何 I/O:
//!
//! - **Review Schedule** - 基于遗忘曲线的复习阶段状态机
//! - **Retention** - 指数遗忘曲线的记忆保持率估计
//! - **Selection** - 智能听写选词 (待复习词、错词、新词)
//!
//! ## 模块结构
//!
//! - [`schedule`] - 复习状态迁移 (`apply_review`, `is_due`)
//! - [`retention`] - 记忆稳定度与保持率
//! - [`selection`] - 听写选词与单元随机抽样
//! - [`types`] - 公共类型和常量
//!
//! ## 使用示例
//!
//! ```rust
//! use tingxie_algo::{apply_review, is_due, ReviewState, MS_PER_DAY};
//!
//! let now = 1_700_000_000_000;
//! let state = apply_review(&ReviewState::new(), true, now);
//! assert_eq!(state.stage, 1);
//! assert!(!is_due(&state, now));
//! assert!(is_due(&state, now + MS_PER_DAY));
//! ```

pub mod retention;
pub mod schedule;
pub mod selection;
pub mod types;

pub use types::*;

pub use retention::{retention, stability_days};
pub use schedule::{apply_review, interval_days, is_due};
pub use selection::{review_quota, sample_words, select_words, ReviewCandidate, SelectionConfig};
