//! History backfill
//!
//! Walks a channel's history oldest first and appends every human message to
//! the store. Every `progress_every` imported messages the store is flushed and
//! the walk pauses briefly so the chat platform's rate limit is respected.
//!
//! ## Overlap
//!
//! With [`OverlapPolicy::BeforeEarliest`] the first backfill of a channel
//! fixes a real-time boundary: the earliest stored event, or the start of that
//! walk when nothing is stored yet. History at or after the boundary is left
//! to real-time tracking. Every imported message id goes into the store's
//! backfill ledger, so an interrupted walk can be re-run and picks up exactly
//! the messages it has not imported yet.
//! [`OverlapPolicy::KeepAll`] imports everything and tolerates duplicates.

use crate::config::{BackfillConfig, OverlapPolicy};
use crate::error::Result;
use crate::format::{days_before, now_utc};
use crate::store::EventStore;
use crate::types::HistoricalMessage;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One page request against the message source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub scope_group_id: String,
    pub scope_id: String,
    /// Only messages created at or after this instant
    pub after: Option<NaiveDateTime>,
    /// Only messages with an id greater than this one
    pub cursor: Option<u64>,
    /// Maximum messages in the page
    pub limit: usize,
}

/// External message history, e.g. the chat platform's REST API.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Channels of a guild whose history can be read.
    async fn readable_scopes(&self, scope_group_id: &str) -> Result<Vec<String>>;

    /// One page of history, oldest first. An empty page ends the walk.
    async fn fetch_page(&self, request: &HistoryRequest) -> Result<Vec<HistoricalMessage>>;
}

/// Per-run limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackfillOptions {
    /// Stop after examining this many source messages
    pub max_items: Option<usize>,
    /// Only walk the last N days
    pub since_days: Option<u32>,
}

/// Result of walking one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillOutcome {
    pub imported: usize,
    pub skipped_bots: usize,
    /// Messages at or after the real-time boundary (the walk stops at the first)
    pub skipped_overlap: usize,
    /// Messages found in the backfill ledger
    pub already_imported: usize,
    pub cancelled: bool,
}

/// Result of walking every readable channel of a guild.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackfillSummary {
    pub imported: usize,
    pub already_imported: usize,
    pub scopes_done: usize,
    /// (channel id, error message)
    pub failed_scopes: Vec<(String, String)>,
    pub cancelled: bool,
}

impl BackfillSummary {
    pub fn failed(&self) -> usize {
        self.failed_scopes.len()
    }
}

/// Imports history into an event store.
pub struct BackfillImporter {
    store: Arc<dyn EventStore>,
    config: BackfillConfig,
}

impl BackfillImporter {
    pub fn new(store: Arc<dyn EventStore>, config: BackfillConfig) -> Self {
        Self { store, config }
    }

    /// Walk one channel's history.
    ///
    /// Cancellation is checked between messages; a cancelled walk flushes what
    /// it imported and reports `cancelled = true`.
    pub async fn import_history(
        &self,
        source: &dyn MessageSource,
        scope_group_id: &str,
        scope_id: &str,
        options: BackfillOptions,
        cancel: &CancellationToken,
    ) -> Result<BackfillOutcome> {
        let started = now_utc();
        let after = options.since_days.map(|days| days_before(started, days));
        let boundary = match self.config.overlap {
            OverlapPolicy::BeforeEarliest => {
                Some(self.realtime_boundary(scope_group_id, scope_id, started)?)
            }
            OverlapPolicy::KeepAll => None,
        };
        let progress_every = self.config.progress_every.max(1);
        let page_size = self.config.page_size.max(1);

        tracing::info!(
            scope_group_id,
            scope_id,
            ?after,
            ?boundary,
            "Starting history backfill"
        );

        let mut outcome = BackfillOutcome::default();
        let mut cursor = None;
        let mut examined = 0usize;

        'walk: loop {
            let limit = match options.max_items {
                Some(max) => page_size.min(max.saturating_sub(examined)),
                None => page_size,
            };
            if limit == 0 {
                break;
            }
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }

            let request = HistoryRequest {
                scope_group_id: scope_group_id.to_string(),
                scope_id: scope_id.to_string(),
                after,
                cursor,
                limit,
            };
            let page = source.fetch_page(&request).await?;
            if page.is_empty() {
                break;
            }

            for message in page {
                if cancel.is_cancelled() {
                    outcome.cancelled = true;
                    break 'walk;
                }
                examined += 1;
                cursor = Some(message.id);

                if message.author_is_bot {
                    outcome.skipped_bots += 1;
                } else if boundary.is_some_and(|b| message.created_at >= b) {
                    // Oldest first: everything from here on is already tracked.
                    outcome.skipped_overlap += 1;
                    break 'walk;
                } else if !self.store_message(scope_group_id, scope_id, &message)? {
                    outcome.already_imported += 1;
                } else {
                    outcome.imported += 1;

                    if outcome.imported % progress_every == 0 {
                        self.store.flush()?;
                        tracing::debug!(
                            scope_id,
                            imported = outcome.imported,
                            "Backfill checkpoint"
                        );
                        tokio::time::sleep(self.config.pause()).await;
                    }
                }

                if options.max_items.is_some_and(|max| examined >= max) {
                    break 'walk;
                }
            }
        }

        self.store.flush()?;
        tracing::info!(
            scope_group_id,
            scope_id,
            imported = outcome.imported,
            skipped_bots = outcome.skipped_bots,
            skipped_overlap = outcome.skipped_overlap,
            already_imported = outcome.already_imported,
            cancelled = outcome.cancelled,
            "History backfill finished"
        );
        Ok(outcome)
    }

    /// Boundary fixed by the channel's first backfill, recorded on first use.
    fn realtime_boundary(
        &self,
        scope_group_id: &str,
        scope_id: &str,
        started: NaiveDateTime,
    ) -> Result<NaiveDateTime> {
        if let Some(boundary) = self.store.backfill_boundary(scope_group_id, scope_id)? {
            return Ok(boundary);
        }
        let boundary = self
            .store
            .earliest(scope_group_id, scope_id)?
            .unwrap_or(started);
        self.store
            .set_backfill_boundary(scope_group_id, scope_id, boundary)?;
        Ok(boundary)
    }

    /// Append one history message; `false` when the ledger already holds it.
    fn store_message(
        &self,
        scope_group_id: &str,
        scope_id: &str,
        message: &HistoricalMessage,
    ) -> Result<bool> {
        match self.config.overlap {
            OverlapPolicy::BeforeEarliest => self.store.append_backfilled(
                scope_group_id,
                scope_id,
                message.id,
                message.created_at,
            ),
            OverlapPolicy::KeepAll => {
                self.store
                    .append(scope_group_id, scope_id, message.created_at)?;
                Ok(true)
            }
        }
    }

    /// Walk every readable channel of a guild.
    ///
    /// A failing channel is logged and tallied; the remaining channels are
    /// still walked. `on_scope` is called after each channel.
    pub async fn backfill_group<F>(
        &self,
        source: &dyn MessageSource,
        scope_group_id: &str,
        options: BackfillOptions,
        cancel: &CancellationToken,
        mut on_scope: F,
    ) -> Result<BackfillSummary>
    where
        F: FnMut(&str, &Result<BackfillOutcome>) + Send,
    {
        let scopes = source.readable_scopes(scope_group_id).await?;
        let mut summary = BackfillSummary::default();

        for scope_id in scopes {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let result = self
                .import_history(source, scope_group_id, &scope_id, options, cancel)
                .await;
            on_scope(&scope_id, &result);

            match result {
                Ok(outcome) => {
                    summary.imported += outcome.imported;
                    summary.already_imported += outcome.already_imported;
                    summary.scopes_done += 1;
                    if outcome.cancelled {
                        summary.cancelled = true;
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        scope_group_id,
                        scope_id = %scope_id,
                        error = %e,
                        "Backfill failed for channel"
                    );
                    summary.failed_scopes.push((scope_id, e.to_string()));
                }
            }
        }

        Ok(summary)
    }
}
