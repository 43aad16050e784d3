// src/transaction/check.rs

//! Pre-flight simulation of a transaction
//!
//! Replays the core actions against per-path reference counts and per-mount
//! free space without touching the target. Anything that would leave a path
//! owned twice, or a mountpoint below zero, fails the verdict.

use super::{ActionKind, Transaction};
use crate::db::models::FileEntry;
use crate::error::{Error, Result};
use crate::package::Package;
use rusqlite::Connection;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Free space on one filesystem, tracked in bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mountpoint {
    /// Mount location inside the target root
    pub path: PathBuf,
    pub block_size: u64,
    /// Goes negative when the transaction would not fit
    pub space_left: i64,
}

impl Mountpoint {
    pub fn new(path: impl Into<PathBuf>, block_size: u64, space_left: i64) -> Self {
        Self {
            path: path.into(),
            block_size: block_size.max(1),
            space_left,
        }
    }

    fn blocks_for(&self, size: u64) -> i64 {
        size.div_ceil(self.block_size).saturating_mul(self.block_size) as i64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deficit {
    pub mountpoint: PathBuf,
    /// Bytes missing (positive)
    pub missing: u64,
}

/// Outcome of a simulation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verdict {
    /// Paths that would end with more than one owner, sorted
    pub error_files: Vec<PathBuf>,
    /// Owners of each colliding path, sorted
    pub collisions: BTreeMap<PathBuf, Vec<String>>,
    pub deficits: Vec<Deficit>,
}

impl Verdict {
    pub fn is_ok(&self) -> bool {
        self.error_files.is_empty() && self.deficits.is_empty()
    }

    pub fn ensure_ok(&self) -> Result<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(Error::TransactionCheckFailed(self.to_string()))
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return f.write_str("ok");
        }
        let mut parts = Vec::new();
        for (path, owners) in &self.collisions {
            parts.push(format!(
                "{} is provided by {}",
                path.display(),
                owners.join(" and ")
            ));
        }
        for deficit in &self.deficits {
            parts.push(format!(
                "{} needs {} more bytes",
                deficit.mountpoint.display(),
                deficit.missing
            ));
        }
        f.write_str(&parts.join("; "))
    }
}

/// Reference counts and free space of the target, as the simulation sees them
#[derive(Debug, Clone, Default)]
pub struct TransactionCheck {
    refcounts: HashMap<PathBuf, i64>,
    owners: HashMap<PathBuf, Vec<String>>,
    mountpoints: Vec<Mountpoint>,
}

impl TransactionCheck {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mountpoint(&mut self, mountpoint: Mountpoint) {
        self.mountpoints.retain(|m| m.path != mountpoint.path);
        self.mountpoints.push(mountpoint);
    }

    /// Count an already-installed file toward its path
    pub fn add_installed(&mut self, path: impl Into<PathBuf>, owner: impl Into<String>) {
        let path = path.into();
        *self.refcounts.entry(path.clone()).or_insert(0) += 1;
        self.owners.entry(path).or_default().push(owner.into());
    }

    /// Seed from the database and the mount table of `root`
    pub fn from_live(conn: &Connection, root: &Path) -> Result<Self> {
        let mut check = Self::new();
        for (entry, owner) in FileEntry::list_with_owners(conn)? {
            if !entry.is_dir() {
                check.add_installed(entry.path, owner);
            }
        }
        for mountpoint in live_mountpoints(root) {
            check.add_mountpoint(mountpoint);
        }
        debug!(
            "Transaction check seeded with {} path(s) and {} mountpoint(s)",
            check.refcounts.len(),
            check.mountpoints.len()
        );
        Ok(check)
    }

    pub fn refcount(&self, path: impl AsRef<Path>) -> i64 {
        self.refcounts.get(path.as_ref()).copied().unwrap_or(0)
    }

    /// Non-zero reference counts
    pub fn refcounts(&self) -> &HashMap<PathBuf, i64> {
        &self.refcounts
    }

    pub fn mountpoint(&self, path: impl AsRef<Path>) -> Option<&Mountpoint> {
        let path = path.as_ref();
        self.mountpoints.iter().find(|m| m.path == path)
    }

    /// Simulate adding every non-directory file of `package`
    pub fn install(&mut self, package: &Package) {
        let owner = package.nevra();
        for file in package.files.iter().filter(|f| !f.is_dir()) {
            *self.refcounts.entry(file.path.clone()).or_insert(0) += 1;
            self.owners.entry(file.path.clone()).or_default().push(owner.clone());
            if let Some(mount) = self.mount_for(&file.path) {
                mount.space_left -= mount.blocks_for(file.size);
            }
        }
    }

    /// Simulate removing every non-directory file of `package`
    pub fn remove(&mut self, package: &Package) {
        let owner = package.nevra();
        for file in package.files.iter().filter(|f| !f.is_dir()) {
            let gone = match self.refcounts.get_mut(&file.path) {
                Some(count) => {
                    *count -= 1;
                    *count == 0
                }
                None => {
                    self.refcounts.insert(file.path.clone(), -1);
                    false
                }
            };
            if gone {
                self.refcounts.remove(&file.path);
            }

            if let Some(owners) = self.owners.get_mut(&file.path) {
                if let Some(pos) = owners.iter().position(|o| *o == owner) {
                    owners.remove(pos);
                }
                if owners.is_empty() {
                    self.owners.remove(&file.path);
                }
            }

            if let Some(mount) = self.mount_for(&file.path) {
                mount.space_left += mount.blocks_for(file.size);
            }
        }
    }

    /// Replay the core actions of `transaction` in execution order
    pub fn simulate(&mut self, transaction: &Transaction) -> Verdict {
        for action in transaction.core_actions() {
            let step = action.step();
            match action.kind() {
                ActionKind::Erase => self.remove(step.package()),
                ActionKind::Install
                | ActionKind::Reinstall
                | ActionKind::Upgrade
                | ActionKind::Downgrade => {
                    if let Some(old) = step.retired() {
                        self.remove(old);
                    }
                    self.install(step.package());
                }
                ActionKind::Script(_) => {}
            }
        }

        let verdict = self.verdict();
        if !verdict.is_ok() {
            warn!("Transaction check failed: {}", verdict);
        }
        verdict
    }

    fn verdict(&self) -> Verdict {
        let mut error_files: Vec<PathBuf> = self
            .refcounts
            .iter()
            .filter(|(_, count)| **count > 1)
            .map(|(path, _)| path.clone())
            .collect();
        error_files.sort();

        let collisions = error_files
            .iter()
            .map(|path| {
                let mut owners = self.owners.get(path).cloned().unwrap_or_default();
                owners.sort();
                owners.dedup();
                (path.clone(), owners)
            })
            .collect();

        let deficits = self
            .mountpoints
            .iter()
            .filter(|m| m.space_left < 0)
            .map(|m| Deficit {
                mountpoint: m.path.clone(),
                missing: m.space_left.unsigned_abs(),
            })
            .collect();

        Verdict {
            error_files,
            collisions,
            deficits,
        }
    }

    /// Deepest mountpoint containing `path`
    fn mount_for(&mut self, path: &Path) -> Option<&mut Mountpoint> {
        self.mountpoints
            .iter_mut()
            .filter(|m| path.starts_with(&m.path))
            .max_by_key(|m| m.path.components().count())
    }
}

/// Filesystems at or below `root`, with paths relative to it
fn live_mountpoints(root: &Path) -> Vec<Mountpoint> {
    let mut mounts = Vec::new();
    if let Some(mount) = stat_mount(root, Path::new("/")) {
        mounts.push(mount);
    }

    let table = match std::fs::read_to_string("/proc/self/mounts") {
        Ok(table) => table,
        Err(e) => {
            debug!("Mount table unavailable, checking {} only: {}", root.display(), e);
            return mounts;
        }
    };

    for line in table.lines() {
        let Some(target) = line.split_whitespace().nth(1) else {
            continue;
        };
        let target = PathBuf::from(unescape_mount_path(target));
        let Ok(inside) = target.strip_prefix(root) else {
            continue;
        };
        if inside.as_os_str().is_empty() {
            continue;
        }
        if let Some(mount) = stat_mount(&target, &Path::new("/").join(inside)) {
            mounts.retain(|m: &Mountpoint| m.path != mount.path);
            mounts.push(mount);
        }
    }
    mounts
}

fn stat_mount(host_path: &Path, path_in_root: &Path) -> Option<Mountpoint> {
    match nix::sys::statvfs::statvfs(host_path) {
        Ok(stat) => {
            let block_size = (stat.fragment_size() as u64).max(1);
            let available = (stat.blocks_available() as u64).saturating_mul(block_size);
            Some(Mountpoint::new(
                path_in_root,
                block_size,
                i64::try_from(available).unwrap_or(i64::MAX),
            ))
        }
        Err(e) => {
            debug!("statvfs {} failed: {}", host_path.display(), e);
            None
        }
    }
}

/// Undo the octal escapes used in /proc/self/mounts (`\040` for space)
fn unescape_mount_path(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && let Some(value) = bytes
                .get(i + 1..i + 4)
                .and_then(|digits| std::str::from_utf8(digits).ok())
                .and_then(|digits| u8::from_str_radix(digits, 8).ok())
        {
            out.push(value);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::PackageFile;
    use crate::transaction::{Step, StepKind};
    use crate::version::Evr;
    use std::sync::Arc;

    fn package(name: &str, files: &[(&str, u64)]) -> Package {
        files.iter().fold(
            Package::new(name, Evr::parse("1.0").unwrap(), "noarch"),
            |p, (path, size)| p.with_file(PackageFile::new(*path, *size, "h")),
        )
    }

    #[test]
    fn test_install_remove_restores_refcounts() {
        let mut check = TransactionCheck::new();
        check.add_installed("/usr/bin/a", "a-0.9.noarch");
        let before = check.refcounts().clone();

        let p = package("p", &[("/usr/bin/p", 10), ("/usr/share/p/data", 20)]);
        check.install(&p);
        assert_eq!(check.refcount("/usr/bin/p"), 1);
        check.remove(&p);

        assert_eq!(check.refcounts(), &before);
    }

    #[test]
    fn test_collision_names_both_owners() {
        let tx = Transaction::from_steps(vec![
            Step::new(
                StepKind::Install,
                Arc::new(package("bar", &[("/usr/bin/tool", 1)])),
            ),
            Step::new(
                StepKind::Install,
                Arc::new(package("foo", &[("/usr/bin/tool", 1)])),
            ),
        ]);

        let verdict = TransactionCheck::new().simulate(&tx);
        assert!(!verdict.is_ok());
        assert_eq!(verdict.error_files, vec![PathBuf::from("/usr/bin/tool")]);
        assert_eq!(
            verdict.collisions[Path::new("/usr/bin/tool")],
            vec!["bar-1.0.noarch", "foo-1.0.noarch"]
        );
        let message = verdict.ensure_ok().unwrap_err().to_string();
        assert!(message.contains("bar-1.0.noarch and foo-1.0.noarch"));
    }

    #[test]
    fn test_upgrade_retires_old_files() {
        let old = Arc::new(package("a", &[("/usr/bin/a", 100)]));
        let mut new = package("a", &[("/usr/bin/a", 100)]);
        new.evr = Evr::parse("2.0").unwrap();

        let mut check = TransactionCheck::new();
        check.add_installed("/usr/bin/a", old.nevra());
        let tx = Transaction::from_steps(vec![
            Step::new(StepKind::Upgrade, Arc::new(new)).replacing(old),
        ]);

        let verdict = check.simulate(&tx);
        assert!(verdict.is_ok(), "{verdict}");
        assert_eq!(check.refcount("/usr/bin/a"), 1);
    }

    #[test]
    fn test_reinstall_does_not_collide_with_itself() {
        let p = Arc::new(package("a", &[("/usr/bin/a", 1)]));
        let mut check = TransactionCheck::new();
        check.add_installed("/usr/bin/a", p.nevra());

        let tx = Transaction::from_steps(vec![Step::new(StepKind::Reinstall, p)]);
        assert!(check.simulate(&tx).is_ok());
    }

    #[test]
    fn test_directories_are_not_counted() {
        let p = package("a", &[]).with_file(PackageFile::directory("/etc"));
        let q = package("b", &[]).with_file(PackageFile::directory("/etc"));
        let tx = Transaction::from_steps(vec![
            Step::new(StepKind::Install, Arc::new(p)),
            Step::new(StepKind::Install, Arc::new(q)),
        ]);
        let mut check = TransactionCheck::new();
        assert!(check.simulate(&tx).is_ok());
        assert_eq!(check.refcount("/etc"), 0);
    }

    #[test]
    fn test_space_is_charged_in_blocks_to_deepest_mount() {
        let mut check = TransactionCheck::new();
        check.add_mountpoint(Mountpoint::new("/", 4096, 1 << 20));
        check.add_mountpoint(Mountpoint::new("/boot", 4096, 8192));

        let kernel = package("kernel", &[("/boot/vmlinuz", 8193), ("/usr/lib/k", 1)]);
        let tx = Transaction::from_steps(vec![Step::new(StepKind::Install, Arc::new(kernel))]);

        let verdict = check.simulate(&tx);
        assert_eq!(
            verdict.deficits,
            vec![Deficit {
                mountpoint: PathBuf::from("/boot"),
                missing: 4096
            }]
        );
        assert_eq!(check.mountpoint("/").unwrap().space_left, (1 << 20) - 4096);
    }

    #[test]
    fn test_erase_credits_space() {
        let p = package("a", &[("/data/blob", 5000)]);
        let mut check = TransactionCheck::new();
        check.add_mountpoint(Mountpoint::new("/", 1024, 0));
        check.add_installed("/data/blob", p.nevra());

        let tx = Transaction::from_steps(vec![Step::new(StepKind::Erase, Arc::new(p))]);
        assert!(check.simulate(&tx).is_ok());
        assert_eq!(check.mountpoint("/").unwrap().space_left, 5120);
        assert_eq!(check.refcount("/data/blob"), 0);
    }

    #[test]
    fn test_verdict_does_not_depend_on_step_order() {
        let packages = [
            Arc::new(package("a", &[("/usr/bin/a", 10), ("/usr/bin/shared", 1)])),
            Arc::new(package("b", &[("/usr/bin/b", 10)])),
            Arc::new(package("c", &[("/usr/bin/shared", 1), ("/usr/lib/c", 3000)])),
        ];
        let orders: [[usize; 3]; 3] = [[0, 1, 2], [2, 1, 0], [1, 2, 0]];

        let mut results = Vec::new();
        for order in orders {
            let tx = Transaction::from_steps(
                order
                    .iter()
                    .map(|i| Step::new(StepKind::Install, Arc::clone(&packages[*i])))
                    .collect(),
            );
            let mut check = TransactionCheck::new();
            check.add_mountpoint(Mountpoint::new("/", 1024, 4096));
            let verdict = check.simulate(&tx);
            results.push((check.refcounts().clone(), verdict));
        }

        assert!(!results[0].1.is_ok());
        assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[test]
    fn test_fits_then_collides_on_one_mount() {
        let a = Arc::new(package("a", &[("/usr/bin/a", 1000)]));
        let b = Arc::new(package("b", &[("/usr/bin/a", 1000)]));

        let mut alone = TransactionCheck::new();
        alone.add_mountpoint(Mountpoint::new("/", 1, 2000));
        let tx = Transaction::from_steps(vec![Step::new(StepKind::Install, Arc::clone(&a))]);
        assert!(alone.simulate(&tx).is_ok());

        let mut both = TransactionCheck::new();
        both.add_mountpoint(Mountpoint::new("/", 1, 2000));
        let tx = Transaction::from_steps(vec![
            Step::new(StepKind::Install, a),
            Step::new(StepKind::Install, b),
        ]);
        let verdict = both.simulate(&tx);
        assert_eq!(verdict.error_files, vec![PathBuf::from("/usr/bin/a")]);
        assert!(verdict.deficits.is_empty());

        let mut tight = TransactionCheck::new();
        tight.add_mountpoint(Mountpoint::new("/", 1, 999));
        let tx = Transaction::from_steps(vec![Step::new(
            StepKind::Install,
            Arc::new(package("big", &[("/big", 1000)])),
        )]);
        let verdict = tight.simulate(&tx);
        assert_eq!(tight.mountpoint("/").unwrap().space_left, -1);
        assert!(!verdict.is_ok());
    }

    #[test]
    fn test_unescape_mount_path() {
        assert_eq!(unescape_mount_path("/mnt/my\\040disk"), "/mnt/my disk");
        assert_eq!(unescape_mount_path("/plain"), "/plain");
        assert_eq!(unescape_mount_path("/trailing\\"), "/trailing\\");
    }
}
