// src/db/mod.rs

//! Local package database
//!
//! SQLite store of installed packages, their files and relations. The schema
//! is versioned; opening a database written by a newer release is refused so
//! nothing this engine does can damage data it does not understand.

pub mod models;
pub mod schema;

use crate::error::{Error, Result};
use rusqlite::Connection;
use std::path::Path;
use tracing::{debug, info};

/// Create (if needed) and migrate the database at `db_path`
///
/// Idempotent: running it against an up to date database does nothing.
pub fn init(db_path: impl AsRef<Path>) -> Result<()> {
    let db_path = db_path.as_ref();
    debug!("Initializing database at: {}", db_path.display());

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::InitError(format!("Failed to create database directory: {}", e)))?;
    }

    let conn = Connection::open(db_path)?;
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;

    schema::ensure_supported(&conn)?;
    schema::migrate(&conn)?;

    info!("Database initialized at {}", db_path.display());
    Ok(())
}

/// Open an existing database, applying any pending forward migrations
pub fn open(db_path: impl AsRef<Path>) -> Result<Connection> {
    let db_path = db_path.as_ref();
    if !db_path.exists() {
        return Err(Error::DatabaseNotFound(db_path.display().to_string()));
    }

    let conn = Connection::open(db_path)?;
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;

    schema::ensure_supported(&conn)?;
    schema::migrate(&conn)?;

    Ok(conn)
}
