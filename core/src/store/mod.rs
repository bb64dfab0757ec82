//! SQLite persistence layer.
//!
//! RULE: Only the store module talks to the database.
//! The importer, cloner, engine service and audit recorder call store
//! methods; they never execute SQL directly.
//!
//! Concurrency: one `RateStore` per worker (see `reopen`). The database
//! runs in WAL mode so readers never block each other. Every write goes
//! through an IMMEDIATE transaction, which serializes writers.

mod rules;
mod runs;
mod tables;

pub use tables::TableQuery;

use crate::{
    error::{RatingError, RatingResult},
    types::TableId,
};
use rusqlite::{
    params, types::Type, Connection, OptionalExtension, Row, Transaction, TransactionBehavior,
};
use rust_decimal::Decimal;

pub struct RateStore {
    conn: Connection,
    path: Option<String>, // None for private :memory:, Some(path) for file or shared URI
}

impl RateStore {
    pub fn open(path: &str) -> RatingResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open a private in-memory database (used in unit tests).
    pub fn in_memory() -> RatingResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Open a named in-memory database that other connections in this
    /// process can join through `reopen`. It lives as long as one
    /// connection to it stays open.
    pub fn shared_memory(name: &str) -> RatingResult<Self> {
        Self::open(&format!("file:{name}?mode=memory&cache=shared"))
    }

    /// Open a new connection to the same database.
    /// For private in-memory databases, this returns a new isolated database.
    pub fn reopen(&self) -> RatingResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> RatingResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_rate_tables.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_rating_runs.sql"))?;
        Ok(())
    }

    /// Begin an IMMEDIATE transaction: takes the write lock up front so
    /// two writers can never interleave on the same table.
    pub(crate) fn write_txn(&mut self) -> RatingResult<Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    /// Run `f` inside a write transaction on an existing, unfrozen table
    /// and bump the table's revision before committing.
    pub(crate) fn with_table_write<T>(
        &mut self,
        table_id: TableId,
        f: impl FnOnce(&Transaction<'_>) -> RatingResult<T>,
    ) -> RatingResult<T> {
        let tx = self.write_txn()?;
        let revision = current_revision(&tx, table_id)?;
        if is_referenced(&tx, table_id)? {
            return Err(RatingError::TableFrozen { table_id });
        }
        let out = f(&tx)?;
        bump_revision(&tx, table_id, revision)?;
        tx.commit()?;
        Ok(out)
    }
}

// ── Shared helpers ─────────────────────────────────────────────────

pub(crate) fn current_revision(conn: &Connection, table_id: TableId) -> RatingResult<i64> {
    conn.query_row(
        "SELECT revision FROM rate_table WHERE id = ?1",
        params![table_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or(RatingError::TableNotFound { table_id })
}

/// Compare-and-swap on the revision counter. Fails if another writer
/// moved the table on since `expected` was read.
pub(crate) fn bump_revision(conn: &Connection, table_id: TableId, expected: i64) -> RatingResult<()> {
    let changed = conn.execute(
        "UPDATE rate_table SET revision = revision + 1 WHERE id = ?1 AND revision = ?2",
        params![table_id, expected],
    )?;
    if changed == 0 {
        return Err(RatingError::ConcurrentModification { table_id, expected });
    }
    Ok(())
}

/// A table is frozen once any rating run has been computed against it.
pub(crate) fn is_referenced(conn: &Connection, table_id: TableId) -> RatingResult<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM rating_run WHERE rate_table_id = ?1",
        params![table_id],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

pub(crate) fn decimal_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    raw.parse::<Decimal>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn opt_decimal_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        s.parse::<Decimal>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

pub(crate) fn json_column<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn enum_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = RatingError>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
