//! Activity analytics
//!
//! - [`classifier`]: per-day threshold ladder, levels 1..=10, bands and bars
//! - [`report`]: per-guild ranking, shares and bounded text summaries

pub mod classifier;
pub mod report;

pub use classifier::{
    activity_score, color_for, description_for, label_for, level_badge, render_bar, Band,
    ThresholdLadder, DEFAULT_THRESHOLDS_PER_DAY, LADDER_LEN, QUIETEST_LEVEL,
};
pub use report::{join_lines_with_limit, Report, ReportAggregator, ScopeEntry};
