//! Ingestion of message events into the store
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐     ┌─────────────────┐
//! │  chat client    │ ──► │ ActivityRecorder │ ──► │                 │
//! │  (real time)    │     └──────────────────┘     │   EventStore    │
//! ├─────────────────┤     ┌──────────────────┐     │                 │
//! │ history fetch   │ ──► │ BackfillImporter │ ──► │                 │
//! └─────────────────┘     └──────────────────┘     └─────────────────┘
//! ```
//!
//! Only human messages posted in a guild are tracked.

pub mod backfill;

pub use backfill::{
    BackfillImporter, BackfillOptions, BackfillOutcome, BackfillSummary, HistoryRequest,
    MessageSource,
};

use crate::error::Result;
use crate::store::EventStore;
use crate::types::MessageEvent;
use std::sync::Arc;

/// Records real-time message arrivals.
#[derive(Clone)]
pub struct ActivityRecorder {
    store: Arc<dyn EventStore>,
}

impl ActivityRecorder {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Store one message arrival.
    ///
    /// Returns `Ok(false)` for direct messages and bot authors, which are not
    /// tracked. Storage failures are returned to the caller.
    pub fn record(&self, message: &MessageEvent) -> Result<bool> {
        let Some(group_id) = message.scope_group_id.as_deref() else {
            return Ok(false);
        };
        if message.author_is_bot {
            return Ok(false);
        }

        self.store
            .append(group_id, &message.scope_id, message.received_at)?;
        tracing::trace!(
            scope_group_id = group_id,
            scope_id = %message.scope_id,
            "Recorded message"
        );
        Ok(true)
    }
}
