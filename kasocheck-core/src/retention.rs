//! Retention sweeps
//!
//! Events older than `retention_days` are deleted on a fixed interval. The
//! sweep runs on the blocking pool so real-time appends keep flowing, and a
//! failed sweep is logged and retried on the next tick.

use crate::config::ActivityConfig;
use crate::error::Result;
use crate::format::{days_before, now_utc};
use crate::store::EventStore;
use chrono::NaiveDateTime;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub cutoff: NaiveDateTime,
    pub removed: usize,
}

/// Enforces the retention horizon across every guild.
#[derive(Clone)]
pub struct RetentionManager {
    store: Arc<dyn EventStore>,
    retention_days: u32,
    interval: std::time::Duration,
}

impl RetentionManager {
    pub fn new(store: Arc<dyn EventStore>, config: &ActivityConfig) -> Self {
        Self {
            store,
            retention_days: config.retention_days,
            interval: config.prune_interval(),
        }
    }

    /// Override the sweep interval.
    pub fn with_interval(mut self, interval: std::time::Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    /// Cutoff for a given "now": anything strictly older is removed.
    pub fn cutoff_at(&self, now: NaiveDateTime) -> NaiveDateTime {
        days_before(now, self.retention_days)
    }

    /// Run one sweep now.
    pub fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(now_utc())
    }

    /// Run one sweep relative to `now`, then flush the store.
    pub fn sweep_at(&self, now: NaiveDateTime) -> Result<SweepReport> {
        let cutoff = self.cutoff_at(now);
        let removed = self.store.prune_before(cutoff, None)?;
        self.store.flush()?;
        Ok(SweepReport { cutoff, removed })
    }

    /// Start the periodic sweep. The first sweep runs immediately.
    pub fn spawn(self, token: CancellationToken) -> RetentionHandle {
        let task_token = token.clone();
        let task = tokio::spawn(async move { self.run(task_token).await });
        RetentionHandle { token, task }
    }

    async fn run(self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            retention_days = self.retention_days,
            interval_secs = self.interval.as_secs(),
            "Retention sweeps started"
        );

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let manager = self.clone();
                    // A sweep that has started always runs to completion.
                    match tokio::task::spawn_blocking(move || manager.sweep()).await {
                        Ok(Ok(report)) => {
                            if report.removed > 0 {
                                tracing::info!(
                                    removed = report.removed,
                                    cutoff = %report.cutoff,
                                    "Pruned expired events"
                                );
                            } else {
                                tracing::debug!(cutoff = %report.cutoff, "Nothing to prune");
                            }
                        }
                        Ok(Err(e)) => {
                            tracing::warn!(error = %e, "Retention sweep failed");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Retention sweep task panicked");
                        }
                    }
                }
            }
        }

        tracing::info!("Retention sweeps stopped");
    }
}

/// Handle to a running retention task.
pub struct RetentionHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl RetentionHandle {
    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the task to stop and wait for it, including any sweep in flight.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Retention task join failed");
        }
    }
}
