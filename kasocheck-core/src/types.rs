//! Core domain types for kasocheck
//!
//! A guild (scope group) contains channels (scopes). Every tracked message is
//! reduced to an [`Event`]: the pair of ids plus the instant it occurred.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A single tracked message.
///
/// Events have no identity beyond their fields; two identical events are
/// stored as two rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Guild the message was posted in
    pub scope_group_id: String,
    /// Channel the message was posted in
    pub scope_id: String,
    /// When the message occurred (naive UTC)
    pub occurred_at: NaiveDateTime,
}

impl Event {
    pub fn new(
        scope_group_id: impl Into<String>,
        scope_id: impl Into<String>,
        occurred_at: NaiveDateTime,
    ) -> Self {
        Self {
            scope_group_id: scope_group_id.into(),
            scope_id: scope_id.into(),
            occurred_at,
        }
    }
}

/// Event count for one channel over a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeCount {
    pub scope_id: String,
    pub count: u64,
}

/// A message as delivered by the chat client in real time.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    /// Guild id, `None` for direct messages
    pub scope_group_id: Option<String>,
    /// Channel id
    pub scope_id: String,
    /// Whether the author is a bot account
    pub author_is_bot: bool,
    /// Arrival time (naive UTC)
    pub received_at: NaiveDateTime,
}

/// A message returned by a history fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalMessage {
    /// Platform message id; increases with creation time
    pub id: u64,
    /// Creation time (naive UTC)
    pub created_at: NaiveDateTime,
    /// Whether the author is a bot account
    pub author_is_bot: bool,
}

/// Overall store statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    /// Total stored events
    pub event_count: u64,
    /// Distinct guilds with at least one event
    pub group_count: u64,
    /// Distinct (guild, channel) pairs with at least one event
    pub scope_count: u64,
    /// Oldest stored event
    pub oldest: Option<NaiveDateTime>,
    /// Newest stored event
    pub newest: Option<NaiveDateTime>,
}
