// src/db/models/package.rs

//! InstalledPackage model - one row per installed NEVRA

use super::{FileEntry, RelationEntry, ScriptletEntry};
use crate::error::{Error, Result};
use crate::package::{BuildInfo, Package};
use crate::version::Evr;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

const COLUMNS: &str = "id, name, epoch, version, release, architecture, uuid, download_size,
     installed_size, content_hash, build_host, build_time, build_id, installed_at";

#[derive(Debug, Clone)]
pub struct InstalledPackage {
    pub id: Option<i64>,
    pub name: String,
    pub epoch: i64,
    pub version: String,
    pub release: String,
    pub architecture: String,
    pub uuid: String,
    pub download_size: i64,
    pub installed_size: i64,
    pub content_hash: String,
    pub build_host: Option<String>,
    pub build_time: Option<String>,
    pub build_id: Option<String>,
    pub installed_at: Option<String>,
}

impl InstalledPackage {
    /// Row for `package`, not yet inserted
    pub fn from_package(package: &Package) -> Self {
        Self {
            id: None,
            name: package.name.clone(),
            epoch: package.evr.epoch as i64,
            version: package.evr.version.clone(),
            release: package.evr.release.clone(),
            architecture: package.arch.clone(),
            uuid: package.uuid.to_string(),
            download_size: package.download_size as i64,
            installed_size: package.installed_size as i64,
            content_hash: package.hash.clone(),
            build_host: package.build.as_ref().map(|b| b.host.clone()),
            build_time: package.build.as_ref().map(|b| b.time.to_rfc3339()),
            build_id: package.build.as_ref().map(|b| b.id.clone()),
            installed_at: None,
        }
    }

    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO packages (name, epoch, version, release, architecture, uuid,
                download_size, installed_size, content_hash, build_host, build_time, build_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                &self.name,
                &self.epoch,
                &self.version,
                &self.release,
                &self.architecture,
                &self.uuid,
                &self.download_size,
                &self.installed_size,
                &self.content_hash,
                &self.build_host,
                &self.build_time,
                &self.build_id,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    pub fn find_by_nevra(conn: &Connection, package: &Package) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM packages
             WHERE name = ?1 AND epoch = ?2 AND version = ?3 AND release = ?4 AND architecture = ?5"
        ))?;

        let row = stmt
            .query_row(
                params![
                    &package.name,
                    package.evr.epoch as i64,
                    &package.evr.version,
                    &package.evr.release,
                    &package.arch,
                ],
                Self::from_row,
            )
            .optional()?;

        Ok(row)
    }

    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Vec<Self>> {
        let mut stmt =
            conn.prepare(&format!("SELECT {COLUMNS} FROM packages WHERE name = ?1 ORDER BY id"))?;
        let rows = stmt
            .query_map([name], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM packages ORDER BY name, id"))?;
        let rows = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete a package row; files and relations cascade
    pub fn delete(conn: &Connection, id: i64) -> Result<()> {
        conn.execute("DELETE FROM packages WHERE id = ?1", [id])?;
        Ok(())
    }

    pub fn evr(&self) -> Evr {
        Evr::new(self.epoch.max(0) as u64, self.version.clone(), self.release.clone())
    }

    /// Rebuild full package metadata from this row, its files and relations
    pub fn to_package(&self, conn: &Connection) -> Result<Package> {
        let id = self
            .id
            .ok_or_else(|| Error::InitError(format!("package {} has no row id", self.name)))?;

        let uuid = Uuid::parse_str(&self.uuid)
            .map_err(|e| Error::ParseError(format!("Invalid uuid '{}': {}", self.uuid, e)))?;

        let mut package = Package::new(self.name.clone(), self.evr(), self.architecture.clone())
            .with_uuid(uuid)
            .with_hash(self.content_hash.clone(), self.download_size.max(0) as u64);

        if let (Some(host), Some(time), Some(build_id)) =
            (&self.build_host, &self.build_time, &self.build_id)
        {
            let time = DateTime::parse_from_rfc3339(time)
                .map_err(|e| Error::ParseError(format!("Invalid build time '{}': {}", time, e)))?
                .with_timezone(&Utc);
            package = package.with_build(BuildInfo {
                host: host.clone(),
                time,
                id: build_id.clone(),
            });
        }

        for entry in FileEntry::find_by_package(conn, id)? {
            package = package.with_file(entry.to_package_file());
        }
        for entry in RelationEntry::find_by_package(conn, id)? {
            package = package.with_relation(entry.kind()?, entry.relation()?);
        }
        for entry in ScriptletEntry::find_by_package(conn, id)? {
            package = package.with_scriptlet(entry.to_scriptlet()?);
        }
        package.installed_size = self.installed_size.max(0) as u64;

        Ok(package)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            name: row.get(1)?,
            epoch: row.get(2)?,
            version: row.get(3)?,
            release: row.get(4)?,
            architecture: row.get(5)?,
            uuid: row.get(6)?,
            download_size: row.get(7)?,
            installed_size: row.get(8)?,
            content_hash: row.get(9)?,
            build_host: row.get(10)?,
            build_time: row.get(11)?,
            build_id: row.get(12)?,
            installed_at: row.get(13)?,
        })
    }
}
