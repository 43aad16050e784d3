// src/package/file.rs

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;

/// Per-file flags carried in package metadata
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileFlags {
    /// Locally modified copies are preserved as `.save` on erase
    pub is_config: bool,
    pub is_datafile: bool,
}

/// A file shipped by a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageFile {
    /// Absolute path inside the target root
    pub path: PathBuf,
    pub size: u64,
    /// Full POSIX mode including the file type bits
    pub mode: u32,
    pub user: String,
    pub group: String,
    /// SHA-256 of the content, empty for directories
    pub hash: String,
    #[serde(default)]
    pub flags: FileFlags,
    /// Optional file capability set, e.g. `cap_net_raw=ep`
    #[serde(default)]
    pub capabilities: Option<String>,
}

impl PackageFile {
    /// A regular root-owned file with mode 0644
    pub fn new(path: impl Into<PathBuf>, size: u64, hash: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size,
            mode: 0o100644,
            user: "root".to_string(),
            group: "root".to_string(),
            hash: hash.into(),
            flags: FileFlags::default(),
            capabilities: None,
        }
    }

    /// A root-owned directory entry
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self {
            mode: S_IFDIR | 0o755,
            ..Self::new(path, 0, "")
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn config(mut self) -> Self {
        self.flags.is_config = true;
        self
    }

    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    /// Permission bits only
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}
