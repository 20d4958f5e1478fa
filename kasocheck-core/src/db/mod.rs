//! Database layer for kasocheck
//!
//! This module provides the SQLite event store with:
//! - Schema migrations
//! - Repository queries implementing [`crate::store::EventStore`]

pub mod repo;
pub mod schema;

pub use repo::Database;
