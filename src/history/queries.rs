use anyhow::Context as _;
use rusqlite::types::Type;
use rusqlite::{OptionalExtension as _, params, params_from_iter};

use super::retry::retrying_mutate;
use super::types::{
    CustomColumn, HistoryEntry, SearchOrder, canonical_timestamp, parse_canonical_timestamp,
};
use super::Store;
use crate::query::Predicate;

const COLUMNS: &str = "local_username, hostname, command, current_working_directory,
    home_directory, exit_code, start_time, end_time, device_id, custom_columns";

fn conversion_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

pub(super) fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryEntry> {
    let start: String = row.get(6)?;
    let end: String = row.get(7)?;
    let custom: String = row.get(9)?;
    Ok(HistoryEntry {
        local_username: row.get(0)?,
        hostname: row.get(1)?,
        command: row.get(2)?,
        current_working_directory: row.get(3)?,
        home_directory: row.get(4)?,
        exit_code: row.get(5)?,
        start_time: parse_canonical_timestamp(&start).map_err(|e| conversion_error(6, e))?,
        end_time: parse_canonical_timestamp(&end).map_err(|e| conversion_error(7, e))?,
        device_id: row.get(8)?,
        custom_columns: serde_json::from_str::<Vec<CustomColumn>>(&custom)
            .map_err(|e| conversion_error(9, e))?,
    })
}

impl Store {
    /// Write `entry` unconditionally (through the retry policy). A row with the
    /// same identity already present is absorbed by the unique index. Returns
    /// whether a row was actually written.
    ///
    /// # Errors
    /// Returns an error if the custom columns cannot be encoded or the write
    /// fails for a reason other than a duplicate.
    pub fn insert(&self, entry: &HistoryEntry) -> anyhow::Result<bool> {
        let custom =
            serde_json::to_string(&entry.custom_columns).context("encode custom columns")?;
        let start = canonical_timestamp(&entry.start_time);
        let end = canonical_timestamp(&entry.end_time);
        let affected = retrying_mutate(|| {
            self.conn.execute(
                "INSERT INTO history_entries
                    (local_username, hostname, command, current_working_directory,
                     home_directory, exit_code, start_time, end_time, device_id,
                     custom_columns)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    entry.local_username,
                    entry.hostname,
                    entry.command,
                    entry.current_working_directory,
                    entry.home_directory,
                    entry.exit_code,
                    start,
                    end,
                    entry.device_id,
                    custom,
                ],
            )
        })
        .context("insert history entry")?;
        Ok(affected > 0)
    }

    /// Whether a row with `entry`'s identity tuple is already stored.
    ///
    /// # Errors
    /// Returns an error if the lookup fails.
    pub fn contains(&self, entry: &HistoryEntry) -> anyhow::Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM history_entries
                 WHERE local_username = ?1
                   AND hostname = ?2
                   AND command = ?3
                   AND current_working_directory = ?4
                   AND home_directory = ?5
                   AND exit_code = ?6
                   AND start_time = ?7
                   AND end_time = ?8
                 LIMIT 1",
                params![
                    entry.local_username,
                    entry.hostname,
                    entry.command,
                    entry.current_working_directory,
                    entry.home_directory,
                    entry.exit_code,
                    canonical_timestamp(&entry.start_time),
                    canonical_timestamp(&entry.end_time),
                ],
                |_| Ok(()),
            )
            .optional()
            .context("look up history entry identity")?;
        Ok(found.is_some())
    }

    /// Insert `entry` unless a row with the same identity tuple exists.
    ///
    /// Redelivery of an entry the store already holds is a silent no-op, which
    /// is what lets the sync engine tolerate at-least-once delivery. Returns
    /// whether a row was written; a concurrent writer landing the same row
    /// between the lookup and the insert also yields `false`.
    ///
    /// # Errors
    /// Returns an error if the lookup or the insert fails.
    pub fn insert_if_new(&self, entry: &HistoryEntry) -> anyhow::Result<bool> {
        if self.contains(entry)? {
            tracing::debug!(command = %entry.command, "entry already present, skipping");
            return Ok(false);
        }
        self.insert(entry)
    }

    /// Rows matching `predicate`, newest first by `order`. `limit <= 0` means
    /// unbounded.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub fn search(
        &self,
        predicate: &Predicate,
        order: SearchOrder,
        limit: i64,
    ) -> anyhow::Result<Vec<HistoryEntry>> {
        let (clause, mut values) = predicate.to_sql();
        let column = order.column();
        let sql = format!(
            "SELECT {COLUMNS} FROM history_entries
             WHERE {clause}
             ORDER BY {column} DESC, id DESC
             LIMIT ?"
        );
        values.push(rusqlite::types::Value::Integer(if limit > 0 { limit } else { -1 }));
        let mut stmt = self.conn.prepare(&sql).context("prepare search")?;
        let rows = stmt.query_map(params_from_iter(values.iter()), map_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row.context("read history row")?);
        }
        Ok(result)
    }

    /// Delete the entry recorded by `device_id` that ended at `end_time`.
    /// Returns the number of rows removed.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub fn delete_by_identifier(
        &self,
        device_id: &str,
        end_time: &chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<usize> {
        let end = canonical_timestamp(end_time);
        retrying_mutate(|| {
            self.conn.execute(
                "DELETE FROM history_entries WHERE device_id = ?1 AND end_time = ?2",
                params![device_id, end],
            )
        })
        .with_context(|| format!("delete entry {device_id}@{end}"))
    }

    /// Delete every row matching `predicate`. Returns the number removed.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub fn delete_matching(&self, predicate: &Predicate) -> anyhow::Result<usize> {
        let (clause, values) = predicate.to_sql();
        let sql = format!("DELETE FROM history_entries WHERE {clause}");
        retrying_mutate(|| self.conn.execute(&sql, params_from_iter(values.iter())))
            .context("delete matching history entries")
    }

    /// Remove every entry.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub fn clear(&self) -> anyhow::Result<usize> {
        retrying_mutate(|| self.conn.execute("DELETE FROM history_entries", []))
            .context("clear history")
    }

    /// Distinct custom column names present on any stored entry.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub fn custom_column_names(&self) -> anyhow::Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT json_extract(cc.value, '$.name')
             FROM history_entries, json_each(history_entries.custom_columns) AS cc
             WHERE json_extract(cc.value, '$.name') IS NOT NULL",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row.context("read custom column name")?);
        }
        Ok(names)
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub fn count(&self) -> anyhow::Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM history_entries", [], |r| r.get(0))
            .context("count history entries")
    }

    /// Fold the WAL back into the main database file after a bulk write.
    ///
    /// # Errors
    /// Returns an error if the checkpoint fails.
    pub fn checkpoint(&self) -> anyhow::Result<()> {
        self.conn
            .query_row("PRAGMA wal_checkpoint", [], |_| Ok(()))
            .context("checkpoint WAL")
    }
}
