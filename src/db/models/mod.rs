// src/db/models/mod.rs

//! Row types for the local package database
//!
//! Each model maps one table and offers insert/find/delete helpers that take
//! a plain `&Connection`, so they work equally inside a `rusqlite::Transaction`.

mod file_entry;
mod package;
mod relation;
mod scriptlet_entry;

pub use file_entry::FileEntry;
pub use package::InstalledPackage;
pub use relation::RelationEntry;
pub use scriptlet_entry::ScriptletEntry;

use crate::error::Result;
use crate::package::{Package, RelationKind};
use tracing::debug;

/// Record `package` with its files, relations and scriptlets, returning the new row id
///
/// A directory already tracked by another package keeps its first owner. Any
/// other path still tracked by another package moves to `package`, so that
/// erasing the previous owner later leaves the new content in place.
pub fn record_package(conn: &rusqlite::Connection, package: &Package) -> Result<i64> {
    let mut row = InstalledPackage::from_package(package);
    let package_id = row.insert(conn)?;

    for file in &package.files {
        let mut entry = FileEntry::from_package_file(file, package_id);
        if let Some(previous) = FileEntry::find_by_path(conn, &entry.path)? {
            if file.is_dir() {
                continue;
            }
            debug!(
                "{} moves from package {} to {}",
                entry.path,
                previous.package_id,
                package.nevra()
            );
            FileEntry::delete(conn, &entry.path)?;
        }
        entry.insert(conn)?;
    }

    for kind in RelationKind::ALL {
        for relation in package.relations(kind) {
            RelationEntry::new(package_id, kind, relation).insert(conn)?;
        }
    }

    for scriptlet in package.scriptlets.values() {
        ScriptletEntry::from_scriptlet(scriptlet, package_id).insert(conn)?;
    }

    Ok(package_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use crate::package::{PackageFile, Relation, ScriptSlot, Scriptlet};
    use crate::version::Evr;
    use rusqlite::Connection;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        schema::migrate(&conn).unwrap();
        conn
    }

    fn sample() -> Package {
        Package::new("nginx", Evr::parse("1.24.0-2").unwrap(), "x86_64")
            .with_hash("abc", 100)
            .with_relation(RelationKind::Requires, Relation::parse("openssl >= 3.0").unwrap())
            .with_relation(RelationKind::Provides, Relation::parse("webserver").unwrap())
            .with_file(PackageFile::directory("/etc/nginx"))
            .with_file(PackageFile::new("/etc/nginx/nginx.conf", 120, "h1").config())
            .with_file(PackageFile::new("/usr/sbin/nginx", 4096, "h2").with_mode(0o100755))
            .with_scriptlet(Scriptlet::new(ScriptSlot::PostUn, "#!/bin/sh\necho bye\n"))
            .with_scriptlet(Scriptlet::embedded(ScriptSlot::PostIn, "mkdir /var/log/nginx\n"))
    }

    #[test]
    fn test_record_and_reload_package() {
        let conn = test_db();
        let package = sample();
        record_package(&conn, &package).unwrap();

        let row = InstalledPackage::find_by_nevra(&conn, &package).unwrap().unwrap();
        let reloaded = row.to_package(&conn).unwrap();

        assert_eq!(reloaded.nevra(), package.nevra());
        assert_eq!(reloaded.uuid, package.uuid);
        assert_eq!(reloaded.requires, package.requires);
        assert_eq!(reloaded.provides, package.provides);
        assert_eq!(reloaded.files.len(), 3);
        assert_eq!(reloaded.scriptlets, package.scriptlets);
        assert!(
            reloaded
                .files
                .iter()
                .any(|f| f.path.ends_with("nginx.conf") && f.flags.is_config)
        );
    }

    #[test]
    fn test_delete_cascades() {
        let conn = test_db();
        let package = sample();
        let id = record_package(&conn, &package).unwrap();

        InstalledPackage::delete(&conn, id).unwrap();
        assert!(FileEntry::find_by_path(&conn, "/usr/sbin/nginx").unwrap().is_none());
        assert!(RelationEntry::find_by_package(&conn, id).unwrap().is_empty());
        assert!(ScriptletEntry::find_by_package(&conn, id).unwrap().is_empty());
        assert!(InstalledPackage::find_by_nevra(&conn, &package).unwrap().is_none());
    }

    #[test]
    fn test_file_moves_to_new_owner() {
        let conn = test_db();
        let first = record_package(&conn, &sample()).unwrap();
        let other = Package::new("nginx-mainline", Evr::parse("1.25.0").unwrap(), "x86_64")
            .with_file(PackageFile::new("/usr/sbin/nginx", 5000, "h9"));
        let second = record_package(&conn, &other).unwrap();

        let moved = FileEntry::find_by_path(&conn, "/usr/sbin/nginx").unwrap().unwrap();
        assert_eq!(moved.package_id, second);
        assert_eq!(moved.sha256_hash, "h9");
        let kept: Vec<String> = FileEntry::find_by_package(&conn, first)
            .unwrap()
            .into_iter()
            .map(|f| f.path)
            .collect();
        assert_eq!(kept, vec!["/etc/nginx", "/etc/nginx/nginx.conf"]);
    }

    #[test]
    fn test_shared_directory_keeps_first_owner() {
        let conn = test_db();
        record_package(&conn, &sample()).unwrap();
        let other = Package::new("nginx-extras", Evr::parse("1.0").unwrap(), "x86_64")
            .with_file(PackageFile::directory("/etc/nginx"))
            .with_file(PackageFile::new("/etc/nginx/extra.conf", 1, "h3"));
        record_package(&conn, &other).unwrap();

        let owners = FileEntry::list_with_owners(&conn).unwrap();
        let dir_owner = owners
            .iter()
            .find(|(f, _)| f.path == "/etc/nginx")
            .map(|(_, owner)| owner.as_str());
        assert_eq!(dir_owner, Some("nginx-1.24.0-2.x86_64"));
        assert_eq!(owners.len(), 4);
    }
}
