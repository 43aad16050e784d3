// src/db/models/relation.rs

//! RelationEntry model - requires/provides/... rows of installed packages

use crate::error::{Error, Result};
use crate::package::{Relation, RelationKind};
use rusqlite::{Connection, Row, params};

#[derive(Debug, Clone)]
pub struct RelationEntry {
    pub id: Option<i64>,
    pub package_id: i64,
    pub kind: String,
    pub relation: String,
}

impl RelationEntry {
    pub fn new(package_id: i64, kind: RelationKind, relation: &Relation) -> Self {
        Self {
            id: None,
            package_id,
            kind: kind.as_str().to_string(),
            relation: relation.to_string(),
        }
    }

    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT OR IGNORE INTO relations (package_id, kind, relation) VALUES (?1, ?2, ?3)",
            params![&self.package_id, &self.kind, &self.relation],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    pub fn find_by_package(conn: &Connection, package_id: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, package_id, kind, relation FROM relations
             WHERE package_id = ?1 ORDER BY kind, relation",
        )?;
        let rows = stmt
            .query_map([package_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn kind(&self) -> Result<RelationKind> {
        self.kind.parse().map_err(Error::ParseError)
    }

    pub fn relation(&self) -> Result<Relation> {
        Relation::parse(&self.relation)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            package_id: row.get(1)?,
            kind: row.get(2)?,
            relation: row.get(3)?,
        })
    }
}
