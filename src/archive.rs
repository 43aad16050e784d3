// src/archive.rs

//! Unpacking package artifacts into the target root
//!
//! The archive format itself is a collaborator behind `Extractor`; the
//! default reads zstd-compressed tarballs whose member paths are relative to
//! the root. Top-level dot entries (`.PKGINFO` and friends) are metadata and
//! are never written to the root.

use crate::error::{Error, Result};
use crate::filesystem::{absolute_package_path, safe_join};
use crate::package::Package;
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::{debug, warn};
use zstd::Decoder;

pub trait Extractor: Send + Sync {
    /// Write the content of `artifact` under `root`, returning the absolute
    /// package paths that were created
    fn extract(&self, artifact: &Path, package: &Package, root: &Path) -> Result<Vec<PathBuf>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TarZstExtractor;

impl TarZstExtractor {
    fn open(artifact: &Path) -> Result<Archive<Decoder<'static, BufReader<File>>>> {
        let file = File::open(artifact)?;
        let decoder = Decoder::new(file).map_err(|e| {
            Error::ArchiveError(format!(
                "Failed to create zstd decoder for {}: {}",
                artifact.display(),
                e
            ))
        })?;
        let mut archive = Archive::new(decoder);
        archive.set_preserve_permissions(true);
        archive.set_overwrite(true);
        Ok(archive)
    }
}

fn is_metadata_entry(path: &Path) -> bool {
    let mut components = path
        .components()
        .filter(|c| !matches!(c, std::path::Component::CurDir));
    match (components.next(), components.next()) {
        (Some(first), None) => first.as_os_str().to_string_lossy().starts_with('.'),
        _ => false,
    }
}

impl Extractor for TarZstExtractor {
    fn extract(&self, artifact: &Path, package: &Package, root: &Path) -> Result<Vec<PathBuf>> {
        let mut archive = Self::open(artifact)?;
        let listed: HashSet<PathBuf> = package
            .files
            .iter()
            .filter_map(|f| absolute_package_path(&f.path).ok())
            .collect();
        let mut written = Vec::new();

        let entries = archive.entries().map_err(|e| {
            Error::ArchiveError(format!("Failed to read {}: {}", artifact.display(), e))
        })?;

        for entry in entries {
            let mut entry = entry.map_err(|e| {
                Error::ArchiveError(format!("Corrupt entry in {}: {}", artifact.display(), e))
            })?;
            let member = entry
                .path()
                .map_err(|e| Error::ArchiveError(format!("Bad entry path: {}", e)))?
                .into_owned();

            if is_metadata_entry(&member) {
                continue;
            }

            let path = absolute_package_path(&member)?;
            if !listed.contains(&path) {
                if entry.header().entry_type().is_dir() {
                    debug!("Skipping unlisted directory {}", path.display());
                } else {
                    warn!(
                        "{} ships {} without listing it, skipping",
                        package.nevra(),
                        path.display()
                    );
                }
                continue;
            }

            // No member may land outside the root, not even through a symlinked parent
            safe_join(root, &member)?;
            let unpacked = entry.unpack_in(root).map_err(|e| {
                Error::ArchiveError(format!("Failed to unpack {}: {}", member.display(), e))
            })?;
            if !unpacked {
                return Err(Error::PathTraversal(format!(
                    "{} escapes root {}",
                    member.display(),
                    root.display()
                )));
            }
            written.push(path);
        }

        debug!("Extracted {} entries of {}", written.len(), package.nevra());
        Ok(written)
    }
}
