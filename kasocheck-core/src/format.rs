//! Formatting helpers shared by the core and the CLI.
//!
//! Timestamps are stored as fixed-width ISO-8601 strings
//! (`YYYY-MM-DDTHH:MM:SS.ffffff`, naive UTC) so that string order equals
//! chronological order.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};

use crate::error::{Error, Result};

/// Canonical on-disk timestamp format.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Current instant as naive UTC.
pub fn now_utc() -> NaiveDateTime {
    Utc::now().naive_utc()
}

/// Start of a lookback of `days` days ending at `now`.
///
/// Saturates at [`NaiveDateTime::MIN`] when the lookback reaches past the
/// representable range, which selects every stored event.
pub fn days_before(now: NaiveDateTime, days: u32) -> NaiveDateTime {
    now.checked_sub_signed(Duration::days(i64::from(days)))
        .unwrap_or(NaiveDateTime::MIN)
}

/// Format a timestamp in the canonical fixed-width form.
pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a timestamp written by this crate or by the legacy bot.
///
/// Accepts naive ISO-8601 with or without fractional seconds, a space instead
/// of `T`, and RFC 3339 strings with an offset (converted to UTC).
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(ts);
        }
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc).naive_utc())
        .map_err(|_| Error::Timestamp(raw.to_string()))
}

/// Format an integer with thousands separators (e.g., `12,345`).
pub fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Format a timestamp as relative time (e.g., "2m ago").
pub fn format_relative_time(ts: NaiveDateTime) -> String {
    let duration = now_utc().signed_duration_since(ts);

    if duration.num_seconds() < 0 {
        "just now".to_string()
    } else if duration.num_seconds() < 60 {
        format!("{}s ago", duration.num_seconds())
    } else if duration.num_minutes() < 60 {
        format!("{}m ago", duration.num_minutes())
    } else if duration.num_hours() < 24 {
        format!("{}h ago", duration.num_hours())
    } else if duration.num_days() < 7 {
        format!("{}d ago", duration.num_days())
    } else {
        ts.format("%b %d").to_string()
    }
}

/// Format an optional timestamp as relative time, or a dash if missing.
pub fn format_relative_time_opt(ts: Option<NaiveDateTime>) -> String {
    match ts {
        Some(ts) => format_relative_time(ts),
        None => "-".to_string(),
    }
}
