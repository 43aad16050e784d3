// src/solver.rs

//! Boundary to the dependency solver
//!
//! The engine never solves constraints itself. A `Solver` turns a `Request`
//! into an ordered list of opaque steps; the engine only asks each step for
//! its kind and package. Step order is trusted as given.

use crate::error::{Error, Result};
use crate::package::{Package, Relation};
use crate::transaction::StepKind;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Install,
    Update,
    Remove,
    Downgrade,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Install => "install",
            Operation::Update => "update",
            Operation::Remove => "remove",
            Operation::Downgrade => "downgrade",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller asked for
#[derive(Debug, Clone)]
pub struct Request {
    pub operation: Operation,
    /// Package names or capability expressions
    pub targets: Vec<String>,
}

impl Request {
    pub fn new(operation: Operation, targets: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            operation,
            targets: targets.into_iter().map(Into::into).collect(),
        }
    }
}

/// One solver-produced unit of work, opaque apart from these accessors
pub trait SolvedStep: Send + Sync {
    fn kind(&self) -> StepKind;

    fn resolve_package(&self) -> Arc<Package>;

    /// Installed package this step supersedes (upgrade, downgrade, reinstall)
    fn replaces(&self) -> Option<Arc<Package>> {
        None
    }
}

pub trait Solver {
    /// Ordered steps, or `UnsatisfiedDependency` explaining what could not be met
    fn solve(&self, request: &Request) -> Result<Vec<Box<dyn SolvedStep>>>;
}

/// Plain step value for solvers that already hold packages
#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub kind: StepKind,
    pub package: Arc<Package>,
    pub replaces: Option<Arc<Package>>,
}

impl PlannedStep {
    pub fn new(kind: StepKind, package: Arc<Package>) -> Self {
        Self {
            kind,
            package,
            replaces: None,
        }
    }

    pub fn replacing(mut self, old: Arc<Package>) -> Self {
        self.replaces = Some(old);
        self
    }
}

impl SolvedStep for PlannedStep {
    fn kind(&self) -> StepKind {
        self.kind
    }

    fn resolve_package(&self) -> Arc<Package> {
        Arc::clone(&self.package)
    }

    fn replaces(&self) -> Option<Arc<Package>> {
        self.replaces.clone()
    }
}

/// Solver over a precomputed plan
///
/// Hands back its steps unchanged after checking that every request target is
/// covered and that every requirement of an incoming package is provided by
/// the resulting package set.
#[derive(Debug, Default, Clone)]
pub struct FixedSolver {
    installed: Vec<Arc<Package>>,
    steps: Vec<PlannedStep>,
}

impl FixedSolver {
    pub fn new(steps: Vec<PlannedStep>) -> Self {
        Self {
            installed: Vec::new(),
            steps,
        }
    }

    /// Packages already on the target, consulted when checking requirements
    pub fn with_installed(mut self, installed: Vec<Arc<Package>>) -> Self {
        self.installed = installed;
        self
    }

    fn covers(&self, target: &str) -> bool {
        match Relation::parse(target) {
            Ok(relation) => self
                .steps
                .iter()
                .any(|s| s.package.provides_relation(&relation)),
            Err(_) => self.steps.iter().any(|s| s.package.name == target),
        }
    }

    /// Package set after the plan is applied
    fn resulting_set(&self) -> Vec<&Package> {
        let leaving: Vec<&Package> = self
            .steps
            .iter()
            .flat_map(|s| match s.kind {
                StepKind::Erase | StepKind::Cleanup => vec![s.package.as_ref()],
                _ => s.replaces.as_deref().into_iter().collect(),
            })
            .collect();

        let mut set: Vec<&Package> = self
            .installed
            .iter()
            .map(|p| p.as_ref())
            .filter(|p| !leaving.iter().any(|l| l.same_nevra(p)))
            .collect();
        set.extend(
            self.steps
                .iter()
                .filter(|s| s.kind.needs_artifact())
                .map(|s| s.package.as_ref()),
        );
        set
    }
}

impl Solver for FixedSolver {
    fn solve(&self, request: &Request) -> Result<Vec<Box<dyn SolvedStep>>> {
        let missing: Vec<&str> = request
            .targets
            .iter()
            .filter(|t| !self.covers(t))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(Error::UnsatisfiedDependency(format!(
                "nothing in the plan provides {}",
                missing.join(", ")
            )));
        }

        let resulting = self.resulting_set();
        let mut problems = Vec::new();
        for step in self.steps.iter().filter(|s| s.kind.needs_artifact()) {
            for required in &step.package.requires {
                if !resulting.iter().any(|p| p.provides_relation(required)) {
                    problems.push(format!("{} requires {}", step.package.nevra(), required));
                }
            }
        }
        if !problems.is_empty() {
            return Err(Error::UnsatisfiedDependency(problems.join("; ")));
        }

        debug!(
            "{} request solved into {} steps",
            request.operation,
            self.steps.len()
        );
        Ok(self
            .steps
            .iter()
            .cloned()
            .map(|s| Box::new(s) as Box<dyn SolvedStep>)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::RelationKind;
    use crate::version::Evr;

    fn pkg(name: &str, version: &str) -> Arc<Package> {
        Arc::new(Package::new(name, Evr::parse(version).unwrap(), "noarch"))
    }

    #[test]
    fn test_unknown_target_is_unsatisfied() {
        let solver = FixedSolver::new(vec![PlannedStep::new(StepKind::Install, pkg("a", "1.0"))]);
        let err = solver
            .solve(&Request::new(Operation::Install, ["b"]))
            .err()
            .unwrap();
        assert!(matches!(err, Error::UnsatisfiedDependency(ref msg) if msg.contains('b')));
        assert!(err.is_pre_mutation());
    }

    #[test]
    fn test_missing_requirement_reported() {
        let a = Arc::new(
            Package::new("a", Evr::parse("1.0").unwrap(), "noarch")
                .with_relation(RelationKind::Requires, Relation::parse("libb >= 2").unwrap()),
        );
        let solver = FixedSolver::new(vec![PlannedStep::new(StepKind::Install, a)]);
        match solver.solve(&Request::new(Operation::Install, ["a"])) {
            Err(Error::UnsatisfiedDependency(msg)) => {
                assert_eq!(msg, "a-1.0.noarch requires libb >= 2");
            }
            other => panic!("unexpected {:?}", other.map(|s| s.len())),
        }
    }

    #[test]
    fn test_requirement_met_by_installed_or_planned() {
        let a = Arc::new(
            Package::new("a", Evr::parse("1.0").unwrap(), "noarch")
                .with_relation(RelationKind::Requires, Relation::parse("b >= 2").unwrap())
                .with_relation(RelationKind::Requires, Relation::parse("c").unwrap()),
        );
        let solver = FixedSolver::new(vec![
            PlannedStep::new(StepKind::Install, pkg("c", "0.1")),
            PlannedStep::new(StepKind::Install, a),
        ])
        .with_installed(vec![pkg("b", "2.5")]);

        let steps = solver
            .solve(&Request::new(Operation::Install, ["a"]))
            .unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].resolve_package().name, "a");
        assert_eq!(steps[1].kind(), StepKind::Install);
    }

    #[test]
    fn test_erased_package_no_longer_satisfies() {
        let b = pkg("b", "2.0");
        let a = Arc::new(
            Package::new("a", Evr::parse("1.0").unwrap(), "noarch")
                .with_relation(RelationKind::Requires, Relation::parse("b").unwrap()),
        );
        let solver = FixedSolver::new(vec![
            PlannedStep::new(StepKind::Erase, Arc::clone(&b)),
            PlannedStep::new(StepKind::Install, a),
        ])
        .with_installed(vec![b]);

        assert!(solver.solve(&Request::new(Operation::Install, ["a"])).is_err());
    }
}
