// src/repository/mod.rs

//! Artifact lookup and retrieval
//!
//! A package's binary artifact is found in the download cache or a local
//! repository directory, or fetched from the configured mirror. Whatever the
//! origin, an artifact is only handed out after its SHA-256 matches the
//! package metadata.

mod client;

pub use client::HttpClient;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::filesystem::sanitize_filename;
use crate::hash;
use crate::package::Package;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Result of looking for an artifact without touching the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactLookup {
    /// Verified artifact already on disk
    Local(PathBuf),
    NeedsDownload,
}

/// Where step artifacts come from
pub trait ArtifactSource: Send + Sync {
    fn resolve_artifact(&self, package: &Package) -> Result<ArtifactLookup>;

    /// Retrieve the artifact; the returned path holds complete, verified content
    fn fetch(&self, package: &Package) -> Result<PathBuf>;

    fn verify(&self, path: &Path, expected_hash: &str) -> bool {
        hash::verify_file_sha256(path, expected_hash).is_ok()
    }
}

/// Download cache backed by local repositories and an HTTP mirror
#[derive(Debug)]
pub struct RepositoryCache {
    cache_dir: PathBuf,
    local_repos: Vec<PathBuf>,
    mirror: Option<String>,
    client: HttpClient,
}

impl RepositoryCache {
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        local_repos: Vec<PathBuf>,
        mirror: Option<String>,
    ) -> Result<Self> {
        Ok(Self {
            cache_dir: cache_dir.into(),
            local_repos,
            mirror,
            client: HttpClient::new()?,
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Self::new(
            config.cache_dir.clone(),
            config.local_repos.clone(),
            config.mirror.clone(),
        )
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn artifact_url(&self, mirror: &str, name: &str) -> String {
        format!("{}/{}", mirror.trim_end_matches('/'), name)
    }
}

impl ArtifactSource for RepositoryCache {
    fn resolve_artifact(&self, package: &Package) -> Result<ArtifactLookup> {
        let name = package.artifact_name();
        let name = sanitize_filename(&name)?;

        let cached = self.cache_dir.join(name);
        if cached.is_file() {
            if self.verify(&cached, &package.hash) {
                debug!("Using cached artifact {}", cached.display());
                return Ok(ArtifactLookup::Local(cached));
            }
            warn!("Discarding cached artifact {} with bad checksum", cached.display());
            fs::remove_file(&cached)?;
        }

        for repo in &self.local_repos {
            let candidate = repo.join(name);
            if !candidate.is_file() {
                continue;
            }
            if self.verify(&candidate, &package.hash) {
                debug!("Using local repository artifact {}", candidate.display());
                return Ok(ArtifactLookup::Local(candidate));
            }
            warn!("Ignoring {} with bad checksum", candidate.display());
        }

        Ok(ArtifactLookup::NeedsDownload)
    }

    fn fetch(&self, package: &Package) -> Result<PathBuf> {
        let name = package.artifact_name();
        let name = sanitize_filename(&name)?;
        let mirror = self.mirror.as_deref().ok_or_else(|| {
            Error::DownloadError(format!(
                "{} is not available locally and no mirror is configured",
                name
            ))
        })?;

        fs::create_dir_all(&self.cache_dir)?;
        let dest = self.cache_dir.join(name);
        let url = self.artifact_url(mirror, name);
        info!("Downloading {}", url);

        // The temp file is removed on drop, so nothing partial survives a failure
        let mut partial = tempfile::Builder::new()
            .prefix(".download-")
            .tempfile_in(&self.cache_dir)?;
        let bytes = self.client.download_to(&url, partial.as_file_mut())?;
        partial.as_file_mut().flush()?;

        if let Err(e) = hash::verify_file_sha256(partial.path(), &package.hash) {
            return Err(Error::ChecksumMismatch {
                path: url,
                expected: e.expected,
                actual: e.actual,
            });
        }

        partial
            .persist(&dest)
            .map_err(|e| Error::Io(e.error))?;
        debug!("Stored {} bytes at {}", bytes, dest.display());
        Ok(dest)
    }
}
