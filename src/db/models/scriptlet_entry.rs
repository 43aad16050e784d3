// src/db/models/scriptlet_entry.rs

//! ScriptletEntry model - lifecycle scripts of installed packages
//!
//! Erase-class scripts run long after the artifact is gone, so the bodies are
//! kept alongside the package row.

use crate::error::{Error, Result};
use crate::package::{ScriptMode, Scriptlet};
use rusqlite::{Connection, Row, params};

#[derive(Debug, Clone)]
pub struct ScriptletEntry {
    pub id: Option<i64>,
    pub package_id: i64,
    /// Slot name: prein, postun, pretransin, ...
    pub slot: String,
    /// "interpreter" or "embedded"
    pub mode: String,
    pub body: String,
}

impl ScriptletEntry {
    pub fn from_scriptlet(scriptlet: &Scriptlet, package_id: i64) -> Self {
        let mode = match scriptlet.mode {
            ScriptMode::Interpreter => "interpreter",
            ScriptMode::Embedded => "embedded",
        };
        Self {
            id: None,
            package_id,
            slot: scriptlet.slot.as_str().to_string(),
            mode: mode.to_string(),
            body: scriptlet.body.clone(),
        }
    }

    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO scriptlets (package_id, slot, mode, body) VALUES (?1, ?2, ?3, ?4)",
            params![&self.package_id, &self.slot, &self.mode, &self.body],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    pub fn find_by_package(conn: &Connection, package_id: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, package_id, slot, mode, body FROM scriptlets
             WHERE package_id = ?1 ORDER BY slot",
        )?;
        let rows = stmt
            .query_map([package_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn to_scriptlet(&self) -> Result<Scriptlet> {
        let slot = self.slot.parse().map_err(Error::ParseError)?;
        match self.mode.as_str() {
            "interpreter" => Ok(Scriptlet::new(slot, self.body.clone())),
            "embedded" => Ok(Scriptlet::embedded(slot, self.body.clone())),
            other => Err(Error::ParseError(format!("Invalid scriptlet mode: {}", other))),
        }
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            package_id: row.get(1)?,
            slot: row.get(2)?,
            mode: row.get(3)?,
            body: row.get(4)?,
        })
    }
}
