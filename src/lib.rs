// src/lib.rs

//! Strata package transaction engine
//!
//! Takes a solved request (install, upgrade, downgrade, erase) and applies it
//! to a target root as one transaction:
//!
//! - Planning: solver steps are expanded into lifecycle actions, with every
//!   pre-transaction script ahead of and every post-transaction script after
//!   all package content changes.
//! - Pre-flight: artifacts are downloaded concurrently and verified, then a
//!   simulation rejects file collisions and disk space deficits before
//!   anything on the target is touched.
//! - Execution: actions run in order; a failing action is logged and the run
//!   continues, while a database error aborts without committing.
//! - Scriptlets: run inside the root under a timeout, with the whole process
//!   group terminated when they overrun.
//!
//! State lives in a versioned SQLite database under the root, guarded by an
//! exclusive lock for the lifetime of a run.

pub mod archive;
pub mod config;
pub mod db;
pub mod engine;
mod error;
pub mod filesystem;
pub mod hash;
pub mod lock;
pub mod package;
pub mod repository;
pub mod scriptlet;
pub mod solver;
pub mod transaction;
pub mod version;

pub use config::EngineConfig;
pub use engine::{ApplySummary, Context, Engine};
pub use error::{Error, Result};
pub use package::{Package, PackageFile, Relation, RelationKind, ScriptMode, ScriptSlot, Scriptlet};
pub use solver::{FixedSolver, Operation, PlannedStep, Request, SolvedStep, Solver};
pub use transaction::{
    ExecutionReport, ReportStatus, Step, StepKind, Transaction, TransactionCheck, Verdict,
};
pub use version::Evr;
