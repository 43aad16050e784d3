// src/db/models/file_entry.rs

//! FileEntry model - files owned by installed packages

use crate::error::Result;
use crate::package::{FileFlags, PackageFile};
use crate::version::Evr;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::PathBuf;

const COLUMNS: &str = "id, path, size, mode, owner, group_name, sha256_hash, is_config,
     is_datafile, capabilities, package_id";

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub id: Option<i64>,
    pub path: String,
    pub size: i64,
    pub mode: i64,
    pub owner: String,
    pub group_name: String,
    pub sha256_hash: String,
    pub is_config: bool,
    pub is_datafile: bool,
    pub capabilities: Option<String>,
    pub package_id: i64,
}

impl FileEntry {
    pub fn from_package_file(file: &PackageFile, package_id: i64) -> Self {
        Self {
            id: None,
            path: file.path.display().to_string(),
            size: file.size as i64,
            mode: file.mode as i64,
            owner: file.user.clone(),
            group_name: file.group.clone(),
            sha256_hash: file.hash.clone(),
            is_config: file.flags.is_config,
            is_datafile: file.flags.is_datafile,
            capabilities: file.capabilities.clone(),
            package_id,
        }
    }

    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO files (path, size, mode, owner, group_name, sha256_hash, is_config,
                is_datafile, capabilities, package_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                &self.path,
                &self.size,
                &self.mode,
                &self.owner,
                &self.group_name,
                &self.sha256_hash,
                &self.is_config,
                &self.is_datafile,
                &self.capabilities,
                &self.package_id,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    pub fn find_by_path(conn: &Connection, path: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM files WHERE path = ?1"))?;
        let file = stmt.query_row([path], Self::from_row).optional()?;
        Ok(file)
    }

    pub fn find_by_package(conn: &Connection, package_id: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM files WHERE package_id = ?1 ORDER BY path"
        ))?;
        let files = stmt
            .query_map([package_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(files)
    }

    /// Every tracked file with the NEVRA-ish label of its owner
    pub fn list_with_owners(conn: &Connection) -> Result<Vec<(Self, String)>> {
        let mut stmt = conn.prepare(
            "SELECT f.id, f.path, f.size, f.mode, f.owner, f.group_name, f.sha256_hash,
                    f.is_config, f.is_datafile, f.capabilities, f.package_id,
                    p.name, p.epoch, p.version, p.release, p.architecture
             FROM files f JOIN packages p ON p.id = f.package_id
             ORDER BY f.path",
        )?;

        let rows = stmt
            .query_map([], |row| {
                let entry = Self::from_row(row)?;
                let name: String = row.get(11)?;
                let epoch: i64 = row.get(12)?;
                let version: String = row.get(13)?;
                let release: String = row.get(14)?;
                let arch: String = row.get(15)?;
                let evr = Evr::new(epoch.max(0) as u64, version, release);
                let owner = format!("{}-{}.{}", name, evr, arch);
                Ok((entry, owner))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    pub fn delete(conn: &Connection, path: &str) -> Result<()> {
        conn.execute("DELETE FROM files WHERE path = ?1", [path])?;
        Ok(())
    }

    pub fn is_dir(&self) -> bool {
        self.mode & 0o170000 == 0o040000
    }

    pub fn to_package_file(&self) -> PackageFile {
        PackageFile {
            path: PathBuf::from(&self.path),
            size: self.size.max(0) as u64,
            mode: self.mode as u32,
            user: self.owner.clone(),
            group: self.group_name.clone(),
            hash: self.sha256_hash.clone(),
            flags: FileFlags {
                is_config: self.is_config,
                is_datafile: self.is_datafile,
            },
            capabilities: self.capabilities.clone(),
        }
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            path: row.get(1)?,
            size: row.get(2)?,
            mode: row.get(3)?,
            owner: row.get(4)?,
            group_name: row.get(5)?,
            sha256_hash: row.get(6)?,
            is_config: row.get(7)?,
            is_datafile: row.get(8)?,
            capabilities: row.get(9)?,
            package_id: row.get(10)?,
        })
    }
}
