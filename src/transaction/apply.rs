// src/transaction/apply.rs

//! Applying actions to a real root and its database

use super::{Action, ActionHandler, ActionKind};
use crate::archive::Extractor;
use crate::db::models::{FileEntry, InstalledPackage, record_package};
use crate::error::{Error, Result};
use crate::filesystem::{safe_join, sanitize_path};
use crate::hash;
use crate::package::{Package, ScriptSlot};
use crate::scriptlet::{Invocation, OutputSink, ScriptletRunner};
use rusqlite::Connection;
use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Action handler backed by the target filesystem and one database transaction
///
/// Every database write of the run goes through the same
/// `rusqlite::Transaction`; it is committed by `finish` and rolled back if
/// the handler is dropped without finishing.
pub struct RootHandler<'a> {
    root: PathBuf,
    tx: Option<rusqlite::Transaction<'a>>,
    extractor: &'a dyn Extractor,
    scripts: Option<ScriptletRunner>,
    sink: &'a mut dyn OutputSink,
}

impl<'a> RootHandler<'a> {
    pub fn new(
        root: impl Into<PathBuf>,
        tx: rusqlite::Transaction<'a>,
        extractor: &'a dyn Extractor,
        sink: &'a mut dyn OutputSink,
    ) -> Self {
        let root = root.into();
        Self {
            scripts: Some(ScriptletRunner::new(root.clone())),
            root,
            tx: Some(tx),
            extractor,
            sink,
        }
    }

    /// Runner used for scriptlets; `None` skips every script
    pub fn with_runner(mut self, runner: Option<ScriptletRunner>) -> Self {
        self.scripts = runner;
        self
    }

    fn conn(&self) -> Result<&Connection> {
        self.tx.as_deref().ok_or_else(|| Error::ActionError {
            action: "database".to_string(),
            reason: "transaction already committed".to_string(),
        })
    }

    /// Delete the files of an installed package, keeping `keep` in place
    ///
    /// Locally modified config files are renamed to `PATH.save`. Directories
    /// the package owns are removed once empty, deepest first.
    fn remove_installed(
        &self,
        label: &str,
        files: &[FileEntry],
        keep: &HashSet<&Path>,
    ) -> Result<()> {
        let mut dirs = Vec::new();
        let mut failures = Vec::new();

        for entry in files {
            if keep.contains(Path::new(&entry.path)) {
                continue;
            }
            let host = host_path(&self.root, &entry.path)?;
            if entry.is_dir() {
                dirs.push(host);
                continue;
            }
            if let Err(e) = remove_file(entry, &host) {
                warn!("Failed to remove {}: {}", entry.path, e);
                failures.push(format!("{}: {}", entry.path, e));
            }
        }

        dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
        for dir in dirs {
            match fs::remove_dir(&dir) {
                Ok(()) => debug!("Removed directory {}", dir.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => debug!("Keeping directory {}: {}", dir.display(), e),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::ActionError {
                action: label.to_string(),
                reason: failures.join("; "),
            })
        }
    }

    /// Save modified config files of `old` that `new` is about to overwrite
    fn preserve_configs(&self, files: &[FileEntry], new: &Package) -> Result<()> {
        let shipped: HashSet<&Path> = new.files.iter().map(|f| f.path.as_path()).collect();
        for entry in files.iter().filter(|e| e.is_config) {
            if !shipped.contains(Path::new(&entry.path)) {
                continue;
            }
            let host = host_path(&self.root, &entry.path)?;
            if is_modified(entry, &host)? {
                let saved = save_path(&host);
                fs::copy(&host, &saved)?;
                warn!("{} was modified, saved as {}", entry.path, saved.display());
            }
        }
        Ok(())
    }

    /// Remove what `old` leaves behind for `new` and forget its row
    fn retire(&self, label: &str, old: &Package, new: &Package) -> Result<()> {
        let conn = self.conn()?;
        let Some(InstalledPackage { id: Some(id), .. }) =
            InstalledPackage::find_by_nevra(conn, old)?
        else {
            warn!("{} is not recorded as installed, nothing to retire", old.nevra());
            return Ok(());
        };

        let files = FileEntry::find_by_package(conn, id)?;
        self.preserve_configs(&files, new)?;
        let keep: HashSet<&Path> = new.files.iter().map(|f| f.path.as_path()).collect();
        self.remove_installed(label, &files, &keep)?;
        InstalledPackage::delete(conn, id)?;
        debug!("Retired {}", old.nevra());
        Ok(())
    }
}

impl ActionHandler for RootHandler<'_> {
    fn script(&mut self, action: &Action, slot: ScriptSlot) -> Result<()> {
        let Some(runner) = &self.scripts else {
            debug!("Scriptlets disabled, skipping {}", action);
            return Ok(());
        };
        let package = action.package();
        let Some(scriptlet) = package.scriptlet(slot) else {
            return Ok(());
        };

        let invocation = Invocation::new(package, slot);
        let timeout = runner.timeout();
        runner
            .run_scriptlet(&invocation, &scriptlet.body, scriptlet.mode, timeout, &mut *self.sink)?
            .into_result(&invocation.label, timeout)
    }

    fn install(&mut self, action: &Action) -> Result<()> {
        let label = action.to_string();
        let step = action.step();
        let package = step.package();
        let artifact = step.artifact().ok_or_else(|| Error::ActionError {
            action: label.clone(),
            reason: "artifact is not available".to_string(),
        })?;

        if action.kind() == ActionKind::Install
            && InstalledPackage::find_by_nevra(self.conn()?, package)?.is_some()
        {
            return Err(Error::ActionError {
                action: label,
                reason: "already installed".to_string(),
            });
        }

        if let Some(old) = step.retired() {
            self.retire(&label, old, package)?;
        }

        let written = self.extractor.extract(artifact, package, &self.root)?;
        record_package(self.conn()?, package)?;
        info!("{}: wrote {} path(s)", label, written.len());
        Ok(())
    }

    fn erase(&mut self, action: &Action) -> Result<()> {
        let label = action.to_string();
        let conn = self.conn()?;
        let Some(InstalledPackage { id: Some(id), .. }) =
            InstalledPackage::find_by_nevra(conn, action.package())?
        else {
            return Err(Error::ActionError {
                action: label,
                reason: "not installed".to_string(),
            });
        };

        let files = FileEntry::find_by_package(conn, id)?;
        self.remove_installed(&label, &files, &HashSet::new())?;
        InstalledPackage::delete(conn, id)?;
        info!("{}: removed {} path(s)", label, files.len());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let tx = self.tx.take().ok_or_else(|| Error::ActionError {
            action: "commit".to_string(),
            reason: "transaction already committed".to_string(),
        })?;
        tx.commit()?;
        nix::unistd::sync();
        info!("Committed database changes and synced {}", self.root.display());
        Ok(())
    }
}

/// Host location of a recorded path; only the parent must stay inside the root
/// so that a packaged symlink can still be removed
fn host_path(root: &Path, path: &str) -> Result<PathBuf> {
    let relative = sanitize_path(path)?;
    let name = relative
        .file_name()
        .ok_or_else(|| Error::InvalidPath(path.to_string()))?;
    match relative.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => Ok(safe_join(root, parent)?.join(name)),
        None => Ok(root.join(name)),
    }
}

fn is_modified(entry: &FileEntry, host: &Path) -> io::Result<bool> {
    if entry.sha256_hash.is_empty() {
        return Ok(false);
    }
    match fs::symlink_metadata(host) {
        Ok(meta) if meta.is_file() => Ok(hash::hash_file(host)? != entry.sha256_hash),
        Ok(_) => Ok(false),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn save_path(host: &Path) -> PathBuf {
    let mut name = OsString::from(host.as_os_str());
    name.push(".save");
    PathBuf::from(name)
}

fn remove_file(entry: &FileEntry, host: &Path) -> io::Result<()> {
    let meta = match fs::symlink_metadata(host) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("{} already gone", entry.path);
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    if meta.is_dir() {
        debug!("{} is now a directory, leaving it", entry.path);
        return Ok(());
    }

    if entry.is_config && is_modified(entry, host)? {
        let saved = save_path(host);
        fs::rename(host, &saved)?;
        warn!("{} was modified, saved as {}", entry.path, saved.display());
        return Ok(());
    }

    fs::remove_file(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_path_appends_suffix() {
        assert_eq!(
            save_path(Path::new("/r/etc/foo.conf")),
            PathBuf::from("/r/etc/foo.conf.save")
        );
    }

    #[test]
    fn test_host_path_stays_in_root() {
        let root = tempfile::tempdir().unwrap();
        assert_eq!(
            host_path(root.path(), "/etc/foo").unwrap(),
            root.path().join("etc/foo")
        );
        assert_eq!(host_path(root.path(), "/top").unwrap(), root.path().join("top"));
        assert!(host_path(root.path(), "/etc/../../x").is_err());
    }

    #[test]
    fn test_host_path_allows_packaged_symlink() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("usr/lib")).unwrap();
        std::os::unix::fs::symlink("/opt", root.path().join("usr/lib/link")).unwrap();
        assert_eq!(
            host_path(root.path(), "/usr/lib/link").unwrap(),
            root.path().join("usr/lib/link")
        );
    }
}
