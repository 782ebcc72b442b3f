// Copyright 2026 Casewatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Durable snapshot store backed by SQLite.
//!
//! Three tables: the latest slot per country, the append-only history, and
//! the consecutive-failure counter. `commit` checks and writes all three in
//! one IMMEDIATE transaction, so a competing writer either sees the whole
//! commit or none of it.

use anyhow::{Context, Result};
use casewatch::{
    Commit, Expected, HistoryEntry, Snapshot, SnapshotStore, StoreError, StoreResult,
};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS latest (
        country TEXT PRIMARY KEY,
        snapshot_json TEXT NOT NULL,
        observed_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS history (
        country TEXT NOT NULL,
        seq INTEGER NOT NULL,
        entry_json TEXT NOT NULL,
        recorded_at TEXT NOT NULL,
        PRIMARY KEY (country, seq)
    );
    CREATE TABLE IF NOT EXISTS failures (
        country TEXT PRIMARY KEY,
        count INTEGER NOT NULL
    );
";

/// SQLite-backed [`SnapshotStore`].
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store file, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let db = Connection::open(path)
            .with_context(|| format!("failed to open store: {}", path.display()))?;
        Self::init(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(db: Connection) -> Result<Self> {
        db.busy_timeout(std::time::Duration::from_secs(5))
            .context("failed to set busy timeout")?;
        db.execute_batch(SCHEMA)
            .context("failed to create store tables")?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn read_latest(db: &Connection, country: &str) -> StoreResult<Option<Snapshot>> {
    let json: Option<String> = db
        .query_row(
            "SELECT snapshot_json FROM latest WHERE country = ?1",
            [country],
            |row| row.get(0),
        )
        .optional()
        .map_err(backend)?;
    json.map(|j| serde_json::from_str(&j).map_err(StoreError::from))
        .transpose()
}

fn write_latest(db: &Connection, country: &str, snapshot: &Snapshot) -> StoreResult<()> {
    let json = serde_json::to_string(snapshot)?;
    db.execute(
        "INSERT INTO latest (country, snapshot_json, observed_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(country) DO UPDATE SET
             snapshot_json = excluded.snapshot_json,
             observed_at = excluded.observed_at",
        rusqlite::params![country, json, snapshot.observed_at.to_rfc3339()],
    )
    .map_err(backend)?;
    Ok(())
}

fn push_history(db: &Connection, country: &str, entry: &HistoryEntry) -> StoreResult<()> {
    let json = serde_json::to_string(entry)?;
    db.execute(
        "INSERT INTO history (country, seq, entry_json, recorded_at)
         VALUES (?1, (SELECT COALESCE(MAX(seq), 0) + 1 FROM history WHERE country = ?1), ?2, ?3)",
        rusqlite::params![country, json, Utc::now().to_rfc3339()],
    )
    .map_err(backend)?;
    Ok(())
}

fn read_failures(db: &Connection, country: &str) -> StoreResult<u32> {
    let count: Option<u32> = db
        .query_row(
            "SELECT count FROM failures WHERE country = ?1",
            [country],
            |row| row.get(0),
        )
        .optional()
        .map_err(backend)?;
    Ok(count.unwrap_or(0))
}

fn write_failures(db: &Connection, country: &str, count: u32) -> StoreResult<()> {
    db.execute(
        "INSERT INTO failures (country, count) VALUES (?1, ?2)
         ON CONFLICT(country) DO UPDATE SET count = excluded.count",
        rusqlite::params![country, count],
    )
    .map_err(backend)?;
    Ok(())
}

impl SnapshotStore for SqliteStore {
    fn get_latest(&self, country: &str) -> StoreResult<Option<Snapshot>> {
        read_latest(&self.conn(), country)
    }

    fn set_latest(&self, country: &str, snapshot: &Snapshot) -> StoreResult<()> {
        write_latest(&self.conn(), country, snapshot)
    }

    fn append_history(&self, country: &str, entry: &HistoryEntry) -> StoreResult<()> {
        push_history(&self.conn(), country, entry)
    }

    fn history(&self, country: &str) -> StoreResult<Vec<HistoryEntry>> {
        let db = self.conn();
        let mut stmt = db
            .prepare("SELECT entry_json FROM history WHERE country = ?1 ORDER BY seq")
            .map_err(backend)?;
        let rows = stmt
            .query_map([country], |row| row.get::<_, String>(0))
            .map_err(backend)?;

        let mut entries = Vec::new();
        for json in rows {
            let json = json.map_err(backend)?;
            entries.push(serde_json::from_str(&json)?);
        }
        Ok(entries)
    }

    fn history_len(&self, country: &str) -> StoreResult<usize> {
        let count: i64 = self
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM history WHERE country = ?1",
                [country],
                |row| row.get(0),
            )
            .map_err(backend)?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn get_failure_count(&self, country: &str) -> StoreResult<u32> {
        read_failures(&self.conn(), country)
    }

    fn set_failure_count(&self, country: &str, count: u32) -> StoreResult<()> {
        write_failures(&self.conn(), country, count)
    }

    fn countries(&self) -> StoreResult<Vec<String>> {
        let db = self.conn();
        let mut stmt = db
            .prepare(
                "SELECT country FROM latest
                 UNION SELECT country FROM history
                 UNION SELECT country FROM failures
                 ORDER BY country",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(backend)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(backend)
    }

    fn commit(&self, country: &str, expected: &Expected, commit: &Commit) -> StoreResult<()> {
        let mut db = self.conn();
        let tx = db
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(backend)?;

        let current = read_latest(&tx, country)?;
        let failures = read_failures(&tx, country)?;
        if current != expected.latest || failures != expected.failure_count {
            // Dropping the transaction rolls it back.
            return Err(StoreError::Conflict {
                country: country.to_string(),
            });
        }

        if let Some(latest) = &commit.latest {
            write_latest(&tx, country, latest)?;
        }
        if let Some(entry) = &commit.history {
            push_history(&tx, country, entry)?;
        }
        write_failures(&tx, country, commit.failure_count)?;

        tx.commit().map_err(backend)
    }
}
