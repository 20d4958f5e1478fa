//! Event table schema
//!
//! Versioned with `PRAGMA user_version`; each step runs in its own
//! transaction together with the version bump.

use crate::error::{Error, Result};
use rusqlite::Connection;

/// Schema version this build writes
pub const SCHEMA_VERSION: i32 = 2;

/// Schema steps; step `i` upgrades to version `i + 1`
const STEPS: &[&str] = &[
    // 1: message event log
    r#"
    -- One row per tracked message. No natural primary key: identical
    -- (guild, channel, instant) rows are legitimate duplicates.
    -- occurred_at is fixed-width ISO-8601 (naive UTC, microseconds) so that
    -- string comparison is chronological.
    CREATE TABLE IF NOT EXISTS message_events (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        guild_id     TEXT NOT NULL,
        channel_id   TEXT NOT NULL,
        occurred_at  TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_message_events_scope
        ON message_events(guild_id, channel_id, occurred_at);
    CREATE INDEX IF NOT EXISTS idx_message_events_ts
        ON message_events(occurred_at);
    "#,
    // 2: backfill ledger
    r#"
    -- Real-time boundary per channel, fixed by the first backfill.
    CREATE TABLE IF NOT EXISTS backfill_scopes (
        guild_id     TEXT NOT NULL,
        channel_id   TEXT NOT NULL,
        boundary     TEXT NOT NULL,
        PRIMARY KEY (guild_id, channel_id)
    );

    -- Ids of imported history messages. Rows outlive pruned events so old
    -- history is never imported twice.
    CREATE TABLE IF NOT EXISTS backfill_messages (
        guild_id     TEXT NOT NULL,
        channel_id   TEXT NOT NULL,
        message_id   INTEGER NOT NULL,
        PRIMARY KEY (guild_id, channel_id, message_id)
    ) WITHOUT ROWID;
    "#,
];

/// Bring the schema up to [`SCHEMA_VERSION`].
///
/// Fails on a database written by a newer build.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let found = get_schema_version(conn)?;
    if found > SCHEMA_VERSION {
        return Err(Error::Storage(format!(
            "database schema v{} is newer than supported v{}",
            found, SCHEMA_VERSION
        )));
    }

    for (version, step) in (1..).zip(STEPS.iter()).skip(found as usize) {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(step)?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
        tracing::info!(version, "Applied schema step");
    }

    Ok(())
}

/// Schema version recorded in the database (0 for a fresh file)
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(conn: &Connection, kind: &str) -> i32 {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = ?1 AND tbl_name = 'message_events'",
            [kind],
            |r| r.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_fresh_database_reaches_current_version() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 0);

        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
        assert_eq!(count(&conn, "table"), 1);
        assert_eq!(count(&conn, "index"), 2);

        let ledger_tables: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name LIKE 'backfill_%'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(ledger_tables, 2);
    }

    #[test]
    fn test_version_one_database_is_upgraded() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(STEPS[0]).unwrap();
        conn.pragma_update(None, "user_version", 1).unwrap();
        conn.execute(
            "INSERT INTO message_events (guild_id, channel_id, occurred_at) VALUES ('g', 'c', '2025-11-27T12:00:00.000000')",
            [],
        )
        .unwrap();

        run_migrations(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
        let kept: i32 = conn
            .query_row("SELECT COUNT(*) FROM message_events", [], |r| r.get(0))
            .unwrap();
        assert_eq!(kept, 1);
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .unwrap();

        assert!(matches!(run_migrations(&conn), Err(Error::Storage(_))));
    }
}
