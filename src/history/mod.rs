//! The reconciling local store.
//!
//! Every mutation goes through [`retry::retrying_mutate`], so a background
//! sync on another connection and foreground writes can interleave without
//! external locking: lock contention is retried and duplicate deliveries are
//! absorbed by the unique identity index.

pub mod queries;
pub mod retry;
pub mod types;

use std::path::Path;

use anyhow::Context as _;
use rusqlite::Connection;

pub use retry::{FailureKind, RetriesExhaustedError, RetryDecision, decide, retrying_mutate};
pub use types::{
    CustomColumn, HistoryEntry, SearchOrder, canonical_timestamp, parse_canonical_timestamp,
};

/// Handle to the local history database.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create the database at `path`, switching it to WAL mode and
    /// ensuring the schema exists.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created or the DB cannot be
    /// opened or initialized.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create db dir {}", parent.display()))?;
        }
        let conn =
            Connection::open(path).with_context(|| format!("open db at {}", path.display()))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .context("enable WAL journal")?;
        Self::with_connection(conn)
    }

    /// An in-memory store, used by tests and offline dry runs.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::with_connection(Connection::open_in_memory().context("open in-memory db")?)
    }

    fn with_connection(conn: Connection) -> anyhow::Result<Self> {
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Create the `history_entries` table and its indexes if missing.
///
/// # Errors
/// Returns an error if the DDL fails.
pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS history_entries (
            id                        INTEGER PRIMARY KEY AUTOINCREMENT,
            local_username            TEXT    NOT NULL,
            hostname                  TEXT    NOT NULL,
            command                   TEXT    NOT NULL,
            current_working_directory TEXT    NOT NULL,
            home_directory            TEXT    NOT NULL,
            exit_code                 INTEGER NOT NULL,
            start_time                TEXT    NOT NULL,
            end_time                  TEXT    NOT NULL,
            device_id                 TEXT    NOT NULL,
            custom_columns            TEXT    NOT NULL DEFAULT '[]'
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_history_identity ON history_entries (
            local_username, hostname, command, current_working_directory,
            home_directory, exit_code, start_time, end_time
        );
        CREATE INDEX IF NOT EXISTS idx_history_end_time ON history_entries(end_time);
        CREATE INDEX IF NOT EXISTS idx_history_start_time ON history_entries(start_time);
        CREATE INDEX IF NOT EXISTS idx_history_device_end
            ON history_entries(device_id, end_time);",
    )
    .context("create history_entries table")?;
    Ok(())
}
