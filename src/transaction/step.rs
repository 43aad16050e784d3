// src/transaction/step.rs

use crate::error::Result;
use crate::package::Package;
use crate::repository::{ArtifactLookup, ArtifactSource};
use crate::solver::SolvedStep;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    Install,
    Reinstall,
    Upgrade,
    Downgrade,
    Erase,
    /// Removal of an orphaned package's files; no scripts run
    Cleanup,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Install => "install",
            StepKind::Reinstall => "reinstall",
            StepKind::Upgrade => "upgrade",
            StepKind::Downgrade => "downgrade",
            StepKind::Erase => "erase",
            StepKind::Cleanup => "cleanup",
        }
    }

    /// Whether the step writes package content and so needs an artifact
    pub fn needs_artifact(&self) -> bool {
        matches!(
            self,
            StepKind::Install | StepKind::Reinstall | StepKind::Upgrade | StepKind::Downgrade
        )
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One solver-assigned unit of work
///
/// Never changes after construction except for the memoized artifact path,
/// which is set at most once.
#[derive(Debug)]
pub struct Step {
    kind: StepKind,
    package: Arc<Package>,
    replaces: Option<Arc<Package>>,
    artifact: OnceLock<PathBuf>,
}

impl Step {
    pub fn new(kind: StepKind, package: Arc<Package>) -> Self {
        Self {
            kind,
            package,
            replaces: None,
            artifact: OnceLock::new(),
        }
    }

    pub fn replacing(mut self, old: Arc<Package>) -> Self {
        self.replaces = Some(old);
        self
    }

    pub fn from_solved(solved: &dyn SolvedStep) -> Self {
        Self {
            kind: solved.kind(),
            package: solved.resolve_package(),
            replaces: solved.replaces(),
            artifact: OnceLock::new(),
        }
    }

    pub fn kind(&self) -> StepKind {
        self.kind
    }

    pub fn package(&self) -> &Arc<Package> {
        &self.package
    }

    pub fn replaces(&self) -> Option<&Arc<Package>> {
        self.replaces.as_ref()
    }

    /// Installed package whose files this step retires before adding its own
    ///
    /// A reinstall retires its own NEVRA when the solver named no other.
    pub fn retired(&self) -> Option<&Arc<Package>> {
        match self.kind {
            StepKind::Reinstall => Some(self.replaces.as_ref().unwrap_or(&self.package)),
            StepKind::Upgrade | StepKind::Downgrade => self.replaces.as_ref(),
            _ => None,
        }
    }

    pub fn artifact(&self) -> Option<&Path> {
        self.artifact.get().map(PathBuf::as_path)
    }

    /// Record the verified artifact; false if one was already recorded
    pub fn set_artifact(&self, path: PathBuf) -> bool {
        self.artifact.set(path).is_ok()
    }

    /// Look the artifact up once, remembering a local hit
    pub fn resolve_artifact(&self, source: &dyn ArtifactSource) -> Result<ArtifactLookup> {
        if let Some(path) = self.artifact.get() {
            return Ok(ArtifactLookup::Local(path.clone()));
        }
        let lookup = source.resolve_artifact(&self.package)?;
        if let ArtifactLookup::Local(path) = &lookup {
            let _ = self.artifact.set(path.clone());
        }
        Ok(lookup)
    }
}
