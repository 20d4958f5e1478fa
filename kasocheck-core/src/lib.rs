//! # kasocheck-core
//!
//! Core library for kasocheck - a chat-server activity tracker.
//!
//! This library provides:
//! - An append-only event store with SQLite and JSON-document backends
//! - Retention sweeps that bound the stored history
//! - History backfill from an external message source
//! - A ten-level activity classifier and per-guild reports
//! - Configuration management and logging infrastructure
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use kasocheck_core::{Config, Database, EventStore, ReportAggregator};
//!
//! let config = Config::load().expect("failed to load config");
//!
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//! let store: Arc<dyn EventStore> = Arc::new(db);
//!
//! let ladder = config.activity.ladder().expect("invalid thresholds");
//! let report = ReportAggregator::with_config(store, ladder, &config.report)
//!     .summarize("1234", config.report.window_days, config.report.top_n)
//!     .expect("failed to build report");
//! println!("{}", report.render());
//! ```

// Re-export commonly used items at the crate root
pub use activity::{Report, ReportAggregator, ThresholdLadder};
pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
pub use ingest::{ActivityRecorder, BackfillImporter, MessageSource};
pub use retention::RetentionManager;
pub use store::{EventStore, JsonFileStore};
pub use types::*;

// Public modules
pub mod activity;
pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod ingest;
pub mod logging;
pub mod retention;
pub mod store;
pub mod types;
