//! Guild activity reports.
//!
//! A report ranks every tracked channel of a guild by message count over a
//! lookback window, classifies the guild as a whole and renders size-bounded
//! text sections suitable for chat embeds (1024 characters per field).

use super::classifier::{
    activity_score, color_for, description_for, label_for, level_badge, render_bar,
    ThresholdLadder,
};
use crate::config::ReportConfig;
use crate::error::Result;
use crate::format::{days_before, format_number, now_utc};
use crate::store::EventStore;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt::Write;
use std::sync::Arc;

/// One ranked channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeEntry {
    pub scope_id: String,
    pub count: u64,
    /// Share of the guild total, 0..=100
    pub percent: f64,
    /// Level of this channel on its own
    pub level: u8,
    /// Share bar
    pub bar: String,
}

/// Request-scoped activity summary for one guild.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub scope_group_id: String,
    pub window_days: u32,
    pub generated_at: NaiveDateTime,
    /// Level of the guild total
    pub group_level: u8,
    /// Level of the average channel
    pub per_channel_avg_level: u8,
    /// `11 - group_level`
    pub activity_score: u8,
    pub total_count: u64,
    pub scope_count: usize,
    /// Every channel, busiest first
    pub entries: Vec<ScopeEntry>,
    /// First `top_n` entries
    pub top: Vec<ScopeEntry>,
    /// Rendered top list, within the field limit
    pub top_list: String,
    /// Rendered full channel list, within the field limit
    pub channel_list: String,
}

impl Report {
    /// Title line, e.g. `Active community! (Level 3)`
    pub fn title(&self) -> String {
        format!("{} (Level {})", label_for(self.group_level), self.group_level)
    }

    /// RGB color of the headline level
    pub fn color(&self) -> u32 {
        color_for(self.group_level)
    }

    /// Statistics block lines
    pub fn stats_lines(&self) -> Vec<String> {
        vec![
            format!("Activity level (server): {}", level_badge(self.group_level)),
            format!(
                "Activity level (channel average): {}",
                level_badge(self.per_channel_avg_level)
            ),
            format!("Activity: {} / 10", self.activity_score),
            format!("Total messages: {}", format_number(self.total_count)),
            format!("Channels tracked: {}", self.scope_count),
            format!("Window: last {} days", self.window_days),
        ]
    }

    /// Full plain-text rendering of the report.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.title());
        let _ = writeln!(out, "{}", description_for(self.group_level));
        let _ = writeln!(out);
        let _ = writeln!(out, "Statistics");
        for line in self.stats_lines() {
            let _ = writeln!(out, "  {}", line);
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "Top channels");
        let _ = writeln!(out, "{}", non_empty(&self.top_list));
        let _ = writeln!(out);
        let _ = writeln!(out, "Channels");
        let _ = writeln!(out, "{}", non_empty(&self.channel_list));
        let _ = writeln!(out);
        let _ = write!(out, "Total: {} messages", format_number(self.total_count));
        out
    }
}

fn non_empty(section: &str) -> &str {
    if section.is_empty() {
        "No data"
    } else {
        section
    }
}

/// Builds [`Report`]s from an event store.
pub struct ReportAggregator {
    store: Arc<dyn EventStore>,
    ladder: ThresholdLadder,
    bar_length: usize,
    field_limit: usize,
}

impl ReportAggregator {
    pub fn new(store: Arc<dyn EventStore>, ladder: ThresholdLadder) -> Self {
        Self::with_config(store, ladder, &ReportConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn EventStore>,
        ladder: ThresholdLadder,
        config: &ReportConfig,
    ) -> Self {
        Self {
            store,
            ladder,
            bar_length: config.bar_length,
            field_limit: config.field_limit,
        }
    }

    /// Summarize a guild over the last `window_days` days.
    pub fn summarize(&self, scope_group_id: &str, window_days: u32, top_n: usize) -> Result<Report> {
        self.summarize_at(scope_group_id, window_days, top_n, now_utc())
    }

    /// Summarize with an explicit "now".
    pub fn summarize_at(
        &self,
        scope_group_id: &str,
        window_days: u32,
        top_n: usize,
        now: NaiveDateTime,
    ) -> Result<Report> {
        let start = days_before(now, window_days);
        let mut counts = self.store.scope_counts(scope_group_id, start, now)?;

        // Stable sort over id-ordered input: ties stay ordered by channel id.
        counts.sort_by(|a, b| b.count.cmp(&a.count));

        let total: u64 = counts.iter().map(|c| c.count).sum();
        let scope_count = counts.len();

        let entries: Vec<ScopeEntry> = counts
            .into_iter()
            .map(|c| {
                let percent = if total > 0 {
                    c.count as f64 / total as f64 * 100.0
                } else {
                    0.0
                };
                ScopeEntry {
                    level: self.ladder.level_for(c.count, window_days),
                    bar: render_bar(percent, self.bar_length),
                    scope_id: c.scope_id,
                    count: c.count,
                    percent,
                }
            })
            .collect();

        let per_channel_avg = if scope_count > 0 {
            total / scope_count as u64
        } else {
            0
        };
        let group_level = self.ladder.level_for(total, window_days);
        let per_channel_avg_level = self.ladder.level_for(per_channel_avg, window_days);

        let top: Vec<ScopeEntry> = entries.iter().take(top_n).cloned().collect();
        let top_lines: Vec<String> = top
            .iter()
            .enumerate()
            .map(|(i, e)| {
                format!(
                    "#{} #{} {} {} ({:.1}%) - Level {}",
                    i + 1,
                    e.scope_id,
                    e.bar,
                    format_number(e.count),
                    e.percent,
                    e.level
                )
            })
            .collect();
        let channel_lines: Vec<String> = entries
            .iter()
            .map(|e| format!("#{} - {} messages", e.scope_id, format_number(e.count)))
            .collect();

        tracing::debug!(
            scope_group_id,
            window_days,
            total,
            scope_count,
            group_level,
            "Built activity report"
        );

        Ok(Report {
            scope_group_id: scope_group_id.to_string(),
            window_days,
            generated_at: now,
            group_level,
            per_channel_avg_level,
            activity_score: activity_score(group_level),
            total_count: total,
            scope_count,
            top_list: join_lines_with_limit(&top_lines, self.field_limit),
            channel_list: join_lines_with_limit(&channel_lines, self.field_limit),
            entries,
            top,
        })
    }
}

/// Join lines with `\n` so the result is at most `limit` characters.
///
/// When lines do not fit, a `...and N more` marker is appended; earlier lines
/// are dropped if needed to make room for it, so truncation is always visible.
pub fn join_lines_with_limit(lines: &[String], limit: usize) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut len = 0;
    for line in lines {
        let add = line.chars().count() + usize::from(!kept.is_empty());
        if len + add > limit {
            break;
        }
        len += add;
        kept.push(line);
    }

    if kept.len() == lines.len() {
        return kept.join("\n");
    }

    loop {
        let remaining = lines.len() - kept.len();
        let marker = if kept.is_empty() {
            format!("...and {} more", remaining)
        } else {
            format!("\n...and {} more", remaining)
        };
        let body = kept.join("\n");
        if body.chars().count() + marker.chars().count() <= limit || kept.is_empty() {
            return body + &marker;
        }
        kept.pop();
    }
}
