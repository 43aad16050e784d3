// src/transaction/download.rs

//! Concurrent artifact prefetch
//!
//! Every artifact a transaction needs is on disk and verified before the
//! first action runs. Fetches run on a bounded rayon pool; a failed or
//! tampered download stops the transaction before anything is touched.

use super::{Step, Transaction};
use crate::error::{Error, Result};
use crate::hash;
use crate::repository::{ArtifactLookup, ArtifactSource};
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

pub struct DownloadCoordinator<'a> {
    source: &'a dyn ArtifactSource,
    workers: usize,
}

impl<'a> DownloadCoordinator<'a> {
    pub fn new(source: &'a dyn ArtifactSource, workers: usize) -> Self {
        Self {
            source,
            workers: workers.max(1),
        }
    }

    /// Steps whose artifact is not available locally
    pub fn pending(&self, transaction: &Transaction) -> Result<Vec<Arc<Step>>> {
        let mut pending = Vec::new();
        for step in transaction.steps() {
            if !step.kind().needs_artifact() {
                continue;
            }
            if step.resolve_artifact(self.source)? == ArtifactLookup::NeedsDownload {
                pending.push(Arc::clone(step));
            }
        }
        Ok(pending)
    }

    /// Fetch and verify every missing artifact; returns how many were downloaded
    pub fn prefetch(&self, transaction: &Transaction) -> Result<usize> {
        let pending = self.pending(transaction)?;
        if pending.is_empty() {
            debug!("All artifacts available locally");
            return Ok(0);
        }

        let start = Instant::now();
        let total_bytes: u64 = pending.iter().map(|s| s.package().download_size).sum();
        info!(
            "Downloading {} artifact(s), {} bytes, with {} worker(s)",
            pending.len(),
            total_bytes,
            self.workers
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("strata-download-{}", i))
            .build()
            .map_err(|e| Error::DownloadError(format!("Failed to start download pool: {}", e)))?;

        let results: Vec<(Arc<Step>, Result<PathBuf>)> = pool.install(|| {
            pending
                .par_iter()
                .map(|step| (Arc::clone(step), self.fetch_one(step)))
                .collect()
        });

        let mut fetched = 0;
        let mut failures = Vec::new();
        for (step, result) in results {
            match result {
                Ok(path) => {
                    step.set_artifact(path);
                    fetched += 1;
                }
                Err(e) => {
                    error!("Failed to fetch {}: {}", step.package().nevra(), e);
                    failures.push(e);
                }
            }
        }

        if failures.is_empty() {
            info!(
                "Downloaded {} artifact(s) in {:.1}s",
                fetched,
                start.elapsed().as_secs_f64()
            );
            return Ok(fetched);
        }

        let failed = failures.len();
        let mut failures = failures.into_iter();
        match (failed, failures.next()) {
            (1, Some(only)) => Err(only),
            (_, first) => Err(Error::DownloadError(format!(
                "{} of {} downloads failed, first: {}",
                failed,
                fetched + failed,
                first.map(|e| e.to_string()).unwrap_or_default()
            ))),
        }
    }

    fn fetch_one(&self, step: &Step) -> Result<PathBuf> {
        let package = step.package();
        let path = self.source.fetch(package)?;

        if let Err(e) = hash::verify_file_sha256(&path, &package.hash) {
            // Never leave unverified content where a later run would find it
            let _ = std::fs::remove_file(&path);
            return Err(Error::ChecksumMismatch {
                path: path.display().to_string(),
                expected: e.expected,
                actual: e.actual,
            });
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::Package;
    use crate::transaction::StepKind;
    use crate::version::Evr;
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;

    /// Serves artifacts from memory into a temp directory
    struct MemorySource {
        dir: tempfile::TempDir,
        remote: HashMap<String, Vec<u8>>,
        fetches: Mutex<Vec<String>>,
    }

    impl MemorySource {
        fn new(remote: &[(&Package, &[u8])]) -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                remote: remote
                    .iter()
                    .map(|(p, bytes)| (p.artifact_name(), bytes.to_vec()))
                    .collect(),
                fetches: Mutex::new(Vec::new()),
            }
        }

        fn path(&self) -> &Path {
            self.dir.path()
        }
    }

    impl ArtifactSource for MemorySource {
        fn resolve_artifact(&self, package: &Package) -> Result<ArtifactLookup> {
            let path = self.path().join(package.artifact_name());
            if path.is_file() {
                Ok(ArtifactLookup::Local(path))
            } else {
                Ok(ArtifactLookup::NeedsDownload)
            }
        }

        fn fetch(&self, package: &Package) -> Result<PathBuf> {
            let name = package.artifact_name();
            self.fetches.lock().unwrap().push(name.clone());
            let bytes = self
                .remote
                .get(&name)
                .ok_or_else(|| Error::DownloadError(format!("404 {}", name)))?;
            let path = self.path().join(&name);
            fs::write(&path, bytes)?;
            Ok(path)
        }
    }

    fn package(name: &str, content: &[u8]) -> Package {
        Package::new(name, Evr::parse("1.0").unwrap(), "noarch")
            .with_hash(hash::sha256(content), content.len() as u64)
    }

    #[test]
    fn test_prefetch_downloads_only_missing() {
        let a = package("a", b"aaa");
        let b = package("b", b"bbb");
        let source = MemorySource::new(&[(&a, b"aaa"), (&b, b"bbb")]);
        fs::write(source.path().join(a.artifact_name()), b"aaa").unwrap();

        let tx = Transaction::from_steps(vec![
            Step::new(StepKind::Install, Arc::new(a)),
            Step::new(StepKind::Install, Arc::new(b.clone())),
        ]);

        let fetched = DownloadCoordinator::new(&source, 2).prefetch(&tx).unwrap();
        assert_eq!(fetched, 1);
        assert_eq!(*source.fetches.lock().unwrap(), vec![b.artifact_name()]);
        assert!(tx.steps().iter().all(|s| s.artifact().is_some()));
    }

    #[test]
    fn test_erase_steps_need_no_artifact() {
        let source = MemorySource::new(&[]);
        let tx = Transaction::from_steps(vec![Step::new(
            StepKind::Erase,
            Arc::new(package("gone", b"")),
        )]);
        assert_eq!(DownloadCoordinator::new(&source, 1).prefetch(&tx).unwrap(), 0);
        assert!(source.fetches.lock().unwrap().is_empty());
    }

    #[test]
    fn test_tampered_download_is_checksum_mismatch() {
        let a = package("a", b"expected");
        let source = MemorySource::new(&[(&a, b"tampered")]);
        let tx = Transaction::from_steps(vec![Step::new(StepKind::Install, Arc::new(a.clone()))]);

        let err = DownloadCoordinator::new(&source, 4).prefetch(&tx).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
        assert!(!source.path().join(a.artifact_name()).exists());
        assert!(tx.steps()[0].artifact().is_none());
    }

    #[test]
    fn test_multiple_failures_are_summarized() {
        let source = MemorySource::new(&[]);
        let tx = Transaction::from_steps(vec![
            Step::new(StepKind::Install, Arc::new(package("x", b"1"))),
            Step::new(StepKind::Install, Arc::new(package("y", b"2"))),
        ]);

        let err = DownloadCoordinator::new(&source, 2).prefetch(&tx).unwrap_err();
        match err {
            Error::DownloadError(msg) => assert!(msg.starts_with("2 of 2 downloads failed")),
            other => panic!("unexpected error {other}"),
        }
    }
}
