// src/db/mod.rs

//! Local bookkeeping database
//!
//! Releases and their build-ownership markers live in SQLite. The
//! commit/revert/update operations each run inside one exclusive
//! transaction keyed by the release row, which is the engine's whole
//! locking discipline; no distributed locking beyond that boundary.

pub mod models;
pub mod schema;

use crate::error::Result;
use rusqlite::{Connection, TransactionBehavior};
use tracing::debug;

/// Initialize the database at the given path, creating the schema
pub fn init(path: &str) -> Result<()> {
    let conn = open(path)?;
    schema::migrate(&conn)?;
    Ok(())
}

/// Open a database connection with the engine's pragmas
pub fn open(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    debug!("Opened database at {}", path);
    Ok(conn)
}

/// Run a closure inside one exclusive write transaction
///
/// The transaction takes the write lock immediately so two concurrent
/// commit attempts on the same release serialize here.
pub fn transaction<T, F>(conn: &mut Connection, f: F) -> Result<T>
where
    F: FnOnce(&rusqlite::Transaction) -> Result<T>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let result = f(&tx)?;
    tx.commit()?;
    Ok(result)
}
