//! Database repository layer
//!
//! SQLite implementation of [`EventStore`] plus maintenance queries used by
//! the CLI (stats, JSON import/export).

use crate::error::{Error, Result};
use crate::format::{format_timestamp, parse_timestamp};
use crate::store::{Document, EventStore};
use crate::types::{ScopeCount, StoreStats};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Database handle (single connection, single writer)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -16000;  -- 16MB cache
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        super::schema::run_migrations(&conn)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("database lock poisoned".to_string()))
    }

    // ============================================
    // Maintenance queries
    // ============================================

    /// Guild ids with at least one stored event
    pub fn list_groups(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT guild_id FROM message_events ORDER BY guild_id")?;
        let groups = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(groups)
    }

    /// Overall counts and time range
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn()?;
        let (event_count, group_count, oldest, newest): (
            i64,
            i64,
            Option<String>,
            Option<String>,
        ) = conn.query_row(
            r#"
            SELECT COUNT(*), COUNT(DISTINCT guild_id), MIN(occurred_at), MAX(occurred_at)
            FROM message_events
            "#,
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;
        let scope_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM (SELECT DISTINCT guild_id, channel_id FROM message_events)",
            [],
            |row| row.get(0),
        )?;

        Ok(StoreStats {
            event_count: event_count as u64,
            group_count: group_count as u64,
            scope_count: scope_count as u64,
            oldest: oldest.as_deref().map(parse_timestamp).transpose()?,
            newest: newest.as_deref().map(parse_timestamp).transpose()?,
        })
    }

    /// Insert every event of a JSON document in one transaction.
    ///
    /// Returns the number of events inserted.
    pub fn import_document(&self, doc: &Document) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO message_events (guild_id, channel_id, occurred_at) VALUES (?1, ?2, ?3)",
            )?;
            for event in doc.events() {
                stmt.execute(params![
                    event.scope_group_id,
                    event.scope_id,
                    format_timestamp(event.occurred_at),
                ])?;
                inserted += 1;
            }
        }
        tx.commit()?;
        tracing::info!(inserted, "Imported JSON document");
        Ok(inserted)
    }

    /// Build the JSON document view of every stored event.
    pub fn export_document(&self) -> Result<Document> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT guild_id, channel_id, occurred_at FROM message_events ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut doc = Document::default();
        for (guild_id, channel_id, occurred_at) in rows {
            doc.push(&guild_id, &channel_id, parse_timestamp(&occurred_at)?);
        }
        Ok(doc)
    }
}

impl EventStore for Database {
    fn append(
        &self,
        scope_group_id: &str,
        scope_id: &str,
        occurred_at: NaiveDateTime,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO message_events (guild_id, channel_id, occurred_at) VALUES (?1, ?2, ?3)",
            params![scope_group_id, scope_id, format_timestamp(occurred_at)],
        )?;
        Ok(())
    }

    fn count_in_window(
        &self,
        scope_group_id: &str,
        scope_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            r#"
            SELECT COUNT(*) FROM message_events
            WHERE guild_id = ?1 AND channel_id = ?2
              AND occurred_at >= ?3 AND occurred_at <= ?4
            "#,
            params![
                scope_group_id,
                scope_id,
                format_timestamp(start),
                format_timestamp(end)
            ],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn list_scopes(&self, scope_group_id: &str) -> Result<BTreeSet<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT channel_id FROM message_events WHERE guild_id = ?1")?;
        let scopes = stmt
            .query_map([scope_group_id], |row| row.get(0))?
            .collect::<rusqlite::Result<BTreeSet<String>>>()?;
        Ok(scopes)
    }

    fn prune_before(&self, cutoff: NaiveDateTime, scope_group_id: Option<&str>) -> Result<usize> {
        let conn = self.conn()?;
        let cutoff = format_timestamp(cutoff);
        let removed = match scope_group_id {
            Some(group) => conn.execute(
                "DELETE FROM message_events WHERE guild_id = ?1 AND occurred_at < ?2",
                params![group, cutoff],
            )?,
            None => conn.execute(
                "DELETE FROM message_events WHERE occurred_at < ?1",
                params![cutoff],
            )?,
        };
        Ok(removed)
    }

    fn earliest(&self, scope_group_id: &str, scope_id: &str) -> Result<Option<NaiveDateTime>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                r#"
                SELECT occurred_at FROM message_events
                WHERE guild_id = ?1 AND channel_id = ?2
                ORDER BY occurred_at ASC LIMIT 1
                "#,
                params![scope_group_id, scope_id],
                |row| row.get(0),
            )
            .optional()?;
        raw.as_deref().map(parse_timestamp).transpose()
    }

    fn backfill_boundary(
        &self,
        scope_group_id: &str,
        scope_id: &str,
    ) -> Result<Option<NaiveDateTime>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT boundary FROM backfill_scopes WHERE guild_id = ?1 AND channel_id = ?2",
                params![scope_group_id, scope_id],
                |row| row.get(0),
            )
            .optional()?;
        raw.as_deref().map(parse_timestamp).transpose()
    }

    fn set_backfill_boundary(
        &self,
        scope_group_id: &str,
        scope_id: &str,
        boundary: NaiveDateTime,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO backfill_scopes (guild_id, channel_id, boundary) VALUES (?1, ?2, ?3)
            ON CONFLICT (guild_id, channel_id) DO UPDATE SET boundary = excluded.boundary
            "#,
            params![scope_group_id, scope_id, format_timestamp(boundary)],
        )?;
        Ok(())
    }

    fn append_backfilled(
        &self,
        scope_group_id: &str,
        scope_id: &str,
        message_id: u64,
        occurred_at: NaiveDateTime,
    ) -> Result<bool> {
        let message_id = i64::try_from(message_id)
            .map_err(|_| Error::Storage(format!("message id {} out of range", message_id)))?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let fresh = tx.execute(
            r#"
            INSERT OR IGNORE INTO backfill_messages (guild_id, channel_id, message_id)
            VALUES (?1, ?2, ?3)
            "#,
            params![scope_group_id, scope_id, message_id],
        )? == 1;
        if fresh {
            tx.execute(
                "INSERT INTO message_events (guild_id, channel_id, occurred_at) VALUES (?1, ?2, ?3)",
                params![scope_group_id, scope_id, format_timestamp(occurred_at)],
            )?;
        }
        tx.commit()?;
        Ok(fresh)
    }

    fn flush(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |_| Ok(()))?;
        Ok(())
    }

    fn scope_counts(
        &self,
        scope_group_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<ScopeCount>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT channel_id,
                   SUM(CASE WHEN occurred_at >= ?2 AND occurred_at <= ?3 THEN 1 ELSE 0 END)
            FROM message_events
            WHERE guild_id = ?1
            GROUP BY channel_id
            ORDER BY channel_id
            "#,
        )?;
        let counts = stmt
            .query_map(
                params![scope_group_id, format_timestamp(start), format_timestamp(end)],
                |row| {
                    Ok(ScopeCount {
                        scope_id: row.get(0)?,
                        count: row.get::<_, i64>(1)? as u64,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(counts)
    }
}
