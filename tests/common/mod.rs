// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use strata::hash;
use strata::{Engine, EngineConfig, Evr, Package, PackageFile};
use tempfile::TempDir;

/// A scratch target root plus a local repository to serve artifacts from.
///
/// Keep the fixture alive for the duration of the test to prevent cleanup.
pub struct Fixture {
    pub root: TempDir,
    pub repo: TempDir,
    pub config: EngineConfig,
}

impl Fixture {
    /// Scriptlets are disabled: running them in a scratch root needs chroot.
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let repo = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::for_root(root.path());
        config.local_repos = vec![repo.path().to_path_buf()];
        config.run_scriptlets = false;
        config.download_workers = 2;
        Self { root, repo, config }
    }

    /// A fixture whose scriptlets run, chrooted into a root that holds a
    /// working `/bin/sh`; `None` when this host cannot provide one.
    pub fn with_scriptlets() -> Option<Self> {
        let mut fx = Self::new();
        if !shell_root(fx.root.path()) {
            return None;
        }
        fx.config.run_scriptlets = true;
        fx.config.scriptlet_timeout_secs = 10;
        fx.config.kill_grace_millis = 300;
        fx.config.poll_interval_millis = 20;
        Some(fx)
    }

    pub fn engine(&self) -> Engine {
        Engine::new(self.config.clone())
    }

    /// Host path of a path inside the target root
    pub fn path(&self, path: &str) -> PathBuf {
        self.root.path().join(path.trim_start_matches('/'))
    }

    /// Build a package shipping `files` and publish its artifact in the repository
    pub fn publish(&self, name: &str, version: &str, files: &[(&str, &str)]) -> Package {
        self.publish_with(name, version, files, |p| p)
    }

    /// Like `publish`, with a hook to adjust metadata (config flags, relations)
    /// before the artifact hash is fixed
    pub fn publish_with(
        &self,
        name: &str,
        version: &str,
        files: &[(&str, &str)],
        adjust: impl FnOnce(Package) -> Package,
    ) -> Package {
        let package = adjust(metadata(name, version, files));
        self.publish_artifact(package, &build_artifact(files))
    }

    /// Publish arbitrary artifact bytes for `package`, fixing its hash to match
    pub fn publish_artifact(&self, package: Package, artifact: &[u8]) -> Package {
        fs::write(self.repo.path().join(package.artifact_name()), artifact).unwrap();
        package.with_hash(hash::sha256(artifact), artifact.len() as u64)
    }
}

/// Package metadata listing `files` with their content hashes
pub fn metadata(name: &str, version: &str, files: &[(&str, &str)]) -> Package {
    files.iter().fold(
        Package::new(name, Evr::parse(version).unwrap(), "noarch"),
        |package, (path, data)| {
            package.with_file(PackageFile::new(
                *path,
                data.len() as u64,
                hash::sha256(data.as_bytes()),
            ))
        },
    )
}

/// tar.zst bytes holding `files` at their paths relative to the root
pub fn build_artifact(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path.trim_start_matches('/'), data.as_bytes())
            .unwrap();
    }
    let tar = builder.into_inner().unwrap();
    zstd::encode_all(&tar[..], 3).unwrap()
}

pub fn arc(package: &Package) -> Arc<Package> {
    Arc::new(package.clone())
}

pub fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

/// Route engine logs to the test harness when RUST_LOG is set
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Copy the host shell and the libraries it loads into `root`, reachable as
/// `/bin/sh -> /usr/bin/sh-host` through an absolute symlink.
///
/// Returns false unless running as root and `chroot <root> /bin/sh` works, so
/// callers can skip instead of failing on hosts that cannot chroot.
pub fn shell_root(root: &Path) -> bool {
    if !nix::unistd::geteuid().is_root() {
        eprintln!("skipping: chroot needs root");
        return false;
    }
    let Ok(shell) = fs::canonicalize("/bin/sh") else {
        return false;
    };
    let Ok(ldd) = Command::new("ldd").arg(&shell).output() else {
        return false;
    };

    let libraries = String::from_utf8_lossy(&ldd.stdout)
        .split_whitespace()
        .filter(|word| word.starts_with('/'))
        .map(PathBuf::from)
        .collect::<Vec<_>>();
    let mut copies = vec![(shell, PathBuf::from("usr/bin/sh-host"))];
    copies.extend(libraries.into_iter().map(|lib| {
        let inside = lib.strip_prefix("/").unwrap().to_path_buf();
        (lib, inside)
    }));
    for (from, inside) in copies {
        let to = root.join(inside);
        fs::create_dir_all(to.parent().unwrap()).unwrap();
        fs::copy(&from, &to).unwrap();
    }
    fs::create_dir_all(root.join("bin")).unwrap();
    std::os::unix::fs::symlink("/usr/bin/sh-host", root.join("bin/sh")).unwrap();

    let works = Command::new("chroot")
        .arg(root)
        .args(["/bin/sh", "-c", "exit 0"])
        .status()
        .is_ok_and(|status| status.success());
    if !works {
        eprintln!("skipping: could not run a shell chrooted into {}", root.display());
    }
    works
}

/// Leftover private script files under `<root>/tmp`
pub fn leftover_scripts(root: &Path) -> Vec<String> {
    match fs::read_dir(root.join("tmp")) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(".scriptlet-"))
            .collect(),
        Err(_) => Vec::new(),
    }
}
