//! Event store abstraction
//!
//! Every component receives an explicit store handle. Two backends ship with
//! the crate:
//! - [`crate::db::Database`]: SQLite, one row per event (default)
//! - [`JsonFileStore`]: a single JSON document `guild -> channel -> [timestamps]`
//!
//! Classification and reporting only ever talk to [`EventStore`], so the
//! backend can change without touching them.

pub mod json;

pub use json::{Document, JsonFileStore, SaveMode};

use crate::error::{Error, Result};
use crate::format::{days_before, now_utc};
use crate::types::ScopeCount;
use chrono::NaiveDateTime;
use std::collections::BTreeSet;

/// Append-only log of message timestamps, partitioned by guild and channel.
///
/// Each method is atomic with respect to the others. Implementations must
/// hold any exclusive lock only for the duration of one operation so that
/// real-time appends are never stuck behind a long sweep.
pub trait EventStore: Send + Sync {
    /// Record one event. Duplicates are stored, never rejected.
    fn append(&self, scope_group_id: &str, scope_id: &str, occurred_at: NaiveDateTime)
        -> Result<()>;

    /// Count events with `start <= occurred_at <= end`. Unknown channels count 0.
    fn count_in_window(
        &self,
        scope_group_id: &str,
        scope_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<u64>;

    /// Channels of a guild that still hold at least one event.
    fn list_scopes(&self, scope_group_id: &str) -> Result<BTreeSet<String>>;

    /// Delete events with `occurred_at < cutoff`, globally or for one guild.
    ///
    /// Returns the number of events removed.
    fn prune_before(&self, cutoff: NaiveDateTime, scope_group_id: Option<&str>) -> Result<usize>;

    /// Oldest stored event for a channel.
    fn earliest(&self, scope_group_id: &str, scope_id: &str) -> Result<Option<NaiveDateTime>>;

    /// Force buffered state to durable storage.
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Real-time boundary recorded when the channel's first backfill started.
    ///
    /// Backfill never imports history at or after this instant.
    fn backfill_boundary(
        &self,
        _scope_group_id: &str,
        _scope_id: &str,
    ) -> Result<Option<NaiveDateTime>> {
        Err(Error::Storage("backfill ledger not supported".to_string()))
    }

    /// Record the channel's real-time boundary.
    fn set_backfill_boundary(
        &self,
        _scope_group_id: &str,
        _scope_id: &str,
        _boundary: NaiveDateTime,
    ) -> Result<()> {
        Err(Error::Storage("backfill ledger not supported".to_string()))
    }

    /// Append a backfilled message unless its id was imported before.
    ///
    /// The event and the ledger entry are recorded together. Returns `false`
    /// when the message was already imported.
    fn append_backfilled(
        &self,
        _scope_group_id: &str,
        _scope_id: &str,
        _message_id: u64,
        _occurred_at: NaiveDateTime,
    ) -> Result<bool> {
        Err(Error::Storage("backfill ledger not supported".to_string()))
    }

    /// Count events over the last `days` days, ending now.
    fn count_since(&self, scope_group_id: &str, scope_id: &str, days: u32) -> Result<u64> {
        let now = now_utc();
        self.count_in_window(
            scope_group_id,
            scope_id,
            days_before(now, days),
            now,
        )
    }

    /// Window counts for every channel of a guild, zero counts included,
    /// ordered by channel id.
    fn scope_counts(
        &self,
        scope_group_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<ScopeCount>> {
        self.list_scopes(scope_group_id)?
            .into_iter()
            .map(|scope_id| {
                let count = self.count_in_window(scope_group_id, &scope_id, start, end)?;
                Ok(ScopeCount { scope_id, count })
            })
            .collect()
    }
}
