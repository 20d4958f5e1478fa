//! Activity level classification.
//!
//! A message count over a window is normalized to a per-day average and
//! placed on a ladder of nine descending thresholds. Level 1 is the busiest,
//! level 10 is anything below the last threshold.

use crate::error::{Error, Result};
use crate::format::format_number;
use serde::Serialize;

/// Number of thresholds on the ladder (levels 1..=9).
pub const LADDER_LEN: usize = 9;

/// Level assigned when no threshold is reached.
pub const QUIETEST_LEVEL: u8 = 10;

/// Default per-day thresholds for levels 1..9.
pub const DEFAULT_THRESHOLDS_PER_DAY: [u64; LADDER_LEN] =
    [4000, 2000, 1000, 714, 500, 300, 200, 100, 50];

/// Validated, strictly descending per-day thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThresholdLadder {
    thresholds: [u64; LADDER_LEN],
}

impl Default for ThresholdLadder {
    fn default() -> Self {
        Self {
            thresholds: DEFAULT_THRESHOLDS_PER_DAY,
        }
    }
}

impl ThresholdLadder {
    /// Build a ladder, rejecting anything that would break monotonicity.
    pub fn new(thresholds: &[u64]) -> Result<Self> {
        let thresholds: [u64; LADDER_LEN] = thresholds.try_into().map_err(|_| {
            Error::Config(format!(
                "threshold ladder needs exactly {} entries, got {}",
                LADDER_LEN,
                thresholds.len()
            ))
        })?;

        if thresholds[LADDER_LEN - 1] == 0 {
            return Err(Error::Config(
                "threshold ladder entries must be positive".to_string(),
            ));
        }
        if let Some(pair) = thresholds.windows(2).find(|w| w[0] <= w[1]) {
            return Err(Error::Config(format!(
                "threshold ladder must be strictly descending ({} is followed by {})",
                pair[0], pair[1]
            )));
        }

        Ok(Self { thresholds })
    }

    pub fn thresholds(&self) -> &[u64; LADDER_LEN] {
        &self.thresholds
    }

    /// Level 1..=10 for `count` messages over `window_days` days.
    ///
    /// A zero-day window falls back to the raw count.
    pub fn level_for(&self, count: u64, window_days: u32) -> u8 {
        let daily_avg = if window_days > 0 {
            count as f64 / f64::from(window_days)
        } else {
            count as f64
        };

        self.thresholds
            .iter()
            .position(|&t| daily_avg >= t as f64)
            .map(|idx| idx as u8 + 1)
            .unwrap_or(QUIETEST_LEVEL)
    }

    /// One line per level with per-day and per-week thresholds.
    pub fn describe(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .thresholds
            .iter()
            .enumerate()
            .map(|(i, &t)| {
                format!(
                    "Level {}: >= {}/day (week: {})",
                    i + 1,
                    format_number(t),
                    format_number(t.saturating_mul(7))
                )
            })
            .collect();
        let last = self.thresholds[LADDER_LEN - 1];
        lines.push(format!(
            "Level {}: < {}/day (week: < {})",
            QUIETEST_LEVEL,
            format_number(last),
            format_number(last.saturating_mul(7))
        ));
        lines
    }
}

/// Three-way color band used for levels and share bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Thriving,
    Caution,
    Critical,
}

impl Band {
    /// Band for an activity level (lower is busier).
    pub fn for_level(level: u8) -> Self {
        match level {
            0..=3 => Band::Thriving,
            4..=6 => Band::Caution,
            _ => Band::Critical,
        }
    }

    /// Band for a share of total traffic (higher is busier).
    pub fn for_percent(percent: f64) -> Self {
        if percent >= 75.0 {
            Band::Thriving
        } else if percent >= 40.0 {
            Band::Caution
        } else {
            Band::Critical
        }
    }

    /// RGB color used for embeds and terminal output.
    pub fn color(self) -> u32 {
        match self {
            Band::Thriving => 0x1DB954,
            Band::Caution => 0xF1C40F,
            Band::Critical => 0xE74C3C,
        }
    }

    /// Filled square glyph for this band.
    pub fn square(self) -> &'static str {
        match self {
            Band::Thriving => "🟩",
            Band::Caution => "🟨",
            Band::Critical => "🟥",
        }
    }
}

const EMPTY_SQUARE: &str = "⬜";

/// RGB color for a level.
pub fn color_for(level: u8) -> u32 {
    Band::for_level(level).color()
}

/// Short status phrase for a level.
pub fn label_for(level: u8) -> &'static str {
    match level {
        0..=2 => "Very active community!",
        3..=4 => "Active community!",
        5..=6 => "Fairly active community",
        7..=8 => "Quiet community",
        _ => "Sparse community",
    }
}

/// One-sentence description for a level.
pub fn description_for(level: u8) -> &'static str {
    match level {
        0..=2 => "Lots of people are talking right now.",
        3..=4 => "Conversation is lively!",
        5..=6 => "Activity has settled down a little.",
        7..=8 => "Things have been quiet lately.",
        _ => "The community is going quiet.",
    }
}

/// Colored square followed by the level, e.g. `🟩 Level 3`.
pub fn level_badge(level: u8) -> String {
    format!("{} Level {}", Band::for_level(level).square(), level)
}

/// Inverse of the level on a 1..=10 scale, 10 being the busiest.
pub fn activity_score(level: u8) -> u8 {
    (QUIETEST_LEVEL + 1).saturating_sub(level)
}

/// Fixed-length share bar. Filled units are colored by `percent`.
pub fn render_bar(percent: f64, length: usize) -> String {
    let p = if percent.is_nan() {
        0.0
    } else {
        percent.clamp(0.0, 100.0)
    };
    let filled = ((p / 100.0) * length as f64).round() as usize;
    let square = Band::for_percent(p).square();

    let mut bar = String::with_capacity(length * 4);
    for i in 0..length {
        bar.push_str(if i < filled { square } else { EMPTY_SQUARE });
    }
    bar
}
