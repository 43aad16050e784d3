// src/db/schema.rs

//! Database schema definitions and migrations
//!
//! Each schema version has one migration function. Versions are applied in
//! order and recorded in `schema_version`; a database whose recorded version
//! is newer than `SCHEMA_VERSION` is never touched.

use crate::error::{Error, Result};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Highest schema version recorded in the database, 0 for a fresh one
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version: Option<i32> = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
        .optional()?
        .flatten();

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Refuse databases written by a newer release
pub fn ensure_supported(conn: &Connection) -> Result<()> {
    let found = get_schema_version(conn)?;
    if found > SCHEMA_VERSION {
        return Err(Error::SchemaTooNew {
            found,
            supported: SCHEMA_VERSION,
        });
    }
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    ensure_supported(conn)?;
    let current_version = get_schema_version(conn)?;
    debug!("Current schema version: {}", current_version);

    if current_version == SCHEMA_VERSION {
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration to version {}", version);
        let tx = conn.unchecked_transaction()?;
        apply_migration(&tx, version)?;
        set_schema_version(&tx, version)?;
        tx.commit()?;
    }

    info!("Schema migration complete. Now at version {}", SCHEMA_VERSION);
    Ok(())
}

fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        _ => Err(Error::InitError(format!(
            "No migration defined for schema version {}",
            version
        ))),
    }
}

/// Version 1: installed packages and the files they own
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 1");

    conn.execute_batch(
        "
        CREATE TABLE packages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            epoch INTEGER NOT NULL DEFAULT 0,
            version TEXT NOT NULL,
            release TEXT NOT NULL DEFAULT '',
            architecture TEXT NOT NULL,
            uuid TEXT NOT NULL,
            download_size INTEGER NOT NULL DEFAULT 0,
            installed_size INTEGER NOT NULL DEFAULT 0,
            content_hash TEXT NOT NULL DEFAULT '',
            build_host TEXT,
            build_time TEXT,
            build_id TEXT,
            installed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(name, epoch, version, release, architecture)
        );

        CREATE INDEX idx_packages_name ON packages(name);

        CREATE TABLE files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE,
            size INTEGER NOT NULL,
            mode INTEGER NOT NULL,
            owner TEXT NOT NULL DEFAULT 'root',
            group_name TEXT NOT NULL DEFAULT 'root',
            sha256_hash TEXT NOT NULL DEFAULT '',
            is_config INTEGER NOT NULL DEFAULT 0,
            is_datafile INTEGER NOT NULL DEFAULT 0,
            package_id INTEGER NOT NULL,
            FOREIGN KEY (package_id) REFERENCES packages(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_files_package ON files(package_id);
        ",
    )?;

    Ok(())
}

/// Version 2: relation sets, stored scriptlets and file capabilities
fn migrate_v2(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 2");

    conn.execute_batch(
        "
        CREATE TABLE relations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            package_id INTEGER NOT NULL,
            kind TEXT NOT NULL CHECK(kind IN
                ('requires', 'provides', 'conflicts', 'obsoletes', 'recommends', 'suggests')),
            relation TEXT NOT NULL,
            UNIQUE(package_id, kind, relation),
            FOREIGN KEY (package_id) REFERENCES packages(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_relations_kind ON relations(kind, relation);

        CREATE TABLE scriptlets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            package_id INTEGER NOT NULL,
            slot TEXT NOT NULL,
            mode TEXT NOT NULL DEFAULT 'interpreter' CHECK(mode IN ('interpreter', 'embedded')),
            body TEXT NOT NULL,
            UNIQUE(package_id, slot),
            FOREIGN KEY (package_id) REFERENCES packages(id) ON DELETE CASCADE
        );

        ALTER TABLE files ADD COLUMN capabilities TEXT;
        ",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn
    }

    #[test]
    fn test_migrate_fresh_database() {
        let conn = memory_db();
        assert_eq!(get_schema_version(&conn).unwrap(), 0);
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        for table in ["files", "packages", "relations", "schema_version", "scriptlets"] {
            assert!(tables.iter().any(|t| t == table), "missing table {table}");
        }
    }

    #[test]
    fn test_migrate_from_v1() {
        let conn = memory_db();
        init_schema_version(&conn).unwrap();
        migrate_v1(&conn).unwrap();
        set_schema_version(&conn, 1).unwrap();

        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 2);
        assert!(conn.prepare("SELECT capabilities FROM files").is_ok());
    }

    #[test]
    fn test_newer_schema_refused() {
        let conn = memory_db();
        migrate(&conn).unwrap();
        set_schema_version(&conn, SCHEMA_VERSION + 1).unwrap();

        match migrate(&conn) {
            Err(Error::SchemaTooNew { found, supported }) => {
                assert_eq!(found, SCHEMA_VERSION + 1);
                assert_eq!(supported, SCHEMA_VERSION);
            }
            other => panic!("expected SchemaTooNew, got {other:?}"),
        }
    }
}
