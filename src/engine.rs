// src/engine.rs

//! Top-level entry point tying the stages together
//!
//! ```text
//! lock -> solve -> expand/order -> prefetch -> check -> execute -> commit + sync
//! ```
//!
//! Everything up to and including the check leaves the target untouched; an
//! error there is reported as an abort before mutation.

use crate::archive::{Extractor, TarZstExtractor};
use crate::config::EngineConfig;
use crate::db;
use crate::db::models::InstalledPackage;
use crate::error::Result;
use crate::lock::RootLock;
use crate::package::Package;
use crate::repository::{ArtifactSource, RepositoryCache};
use crate::scriptlet::{OutputSink, ScriptletRunner, TracingSink};
use crate::solver::{Request, Solver};
use crate::transaction::{
    DownloadCoordinator, ExecutionReport, Executor, ReportStatus, RootHandler, Transaction,
    TransactionCheck,
};
use rusqlite::Connection;
use std::fmt;
use std::sync::Arc;
use tracing::{Span, error, info, info_span, warn};

/// Resources a run holds for its whole duration
///
/// The root lock lives as long as the context, so the database and the target
/// are owned exclusively until it is dropped.
pub struct Context {
    pub conn: Connection,
    lock: RootLock,
    pub source: Box<dyn ArtifactSource>,
    pub extractor: Box<dyn Extractor>,
    pub sink: Box<dyn OutputSink>,
    pub span: Span,
}

impl Context {
    pub fn new(conn: Connection, lock: RootLock, source: Box<dyn ArtifactSource>) -> Self {
        Self {
            conn,
            lock,
            source,
            extractor: Box::new(TarZstExtractor),
            sink: Box::new(TracingSink),
            span: Span::none(),
        }
    }

    pub fn with_extractor(mut self, extractor: Box<dyn Extractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn lock(&self) -> &RootLock {
        &self.lock
    }
}

/// How an `apply` call ended, for callers that only need the headline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplySummary {
    FullySucceeded,
    /// Every action ran and the result was committed, but some failed
    SucceededWithErrors(usize),
    /// Nothing on the target changed
    AbortedBeforeMutation(String),
    /// Stopped part way; the database transaction was not committed
    AbortedDuringExecution(String),
}

impl ApplySummary {
    pub fn of(result: &Result<ExecutionReport>) -> Self {
        match result {
            Err(e) => ApplySummary::AbortedBeforeMutation(e.to_string()),
            Ok(report) => match report.status() {
                ReportStatus::Succeeded => ApplySummary::FullySucceeded,
                ReportStatus::CompletedWithErrors(n) => ApplySummary::SucceededWithErrors(n),
                ReportStatus::Aborted => ApplySummary::AbortedDuringExecution(
                    report.aborted.clone().unwrap_or_default(),
                ),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ApplySummary::FullySucceeded)
    }
}

impl fmt::Display for ApplySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplySummary::FullySucceeded => write!(f, "transaction succeeded"),
            ApplySummary::SucceededWithErrors(n) => {
                write!(f, "transaction completed with {} failed action(s)", n)
            }
            ApplySummary::AbortedBeforeMutation(reason) => {
                write!(f, "transaction aborted, nothing changed: {}", reason)
            }
            ApplySummary::AbortedDuringExecution(reason) => {
                write!(f, "transaction aborted during execution: {}", reason)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Lock the root, then open (creating if needed) its database
    pub fn open(&self) -> Result<Context> {
        let lock = RootLock::acquire(self.config.lock_path())?;
        db::init(&self.config.db_path)?;
        let conn = db::open(&self.config.db_path)?;
        let source = RepositoryCache::from_config(&self.config)?;
        let span = info_span!("transaction", root = %self.config.root.display());
        Ok(Context::new(conn, lock, Box::new(source)).with_span(span))
    }

    /// Every package recorded in the database, with files, relations and scriptlets
    pub fn installed(conn: &Connection) -> Result<Vec<Arc<Package>>> {
        InstalledPackage::list_all(conn)?
            .iter()
            .map(|row| row.to_package(conn).map(Arc::new))
            .collect()
    }

    /// Solve `request` and order the resulting actions without running anything
    pub fn plan(&self, solver: &dyn Solver, request: &Request) -> Result<Transaction> {
        let solved = solver.solve(request)?;
        info!(
            "Solved {} {} into {} step(s)",
            request.operation,
            request.targets.join(" "),
            solved.len()
        );
        Ok(Transaction::from_solution(solved))
    }

    /// Run `request` against the root owned by `ctx`
    ///
    /// Errors are returned only for stages that run before the target is
    /// touched. Once execution starts the outcome is in the report.
    pub fn apply(
        &self,
        ctx: &mut Context,
        solver: &dyn Solver,
        request: &Request,
    ) -> Result<ExecutionReport> {
        let span = ctx.span.clone();
        let _entered = span.enter();

        let result = self.apply_inner(ctx, solver, request);
        match &result {
            Err(e) if e.is_pre_mutation() => warn!("Aborted before any change: {}", e),
            Err(e) => error!("Transaction failed to start: {}", e),
            Ok(_) => {}
        }
        result
    }

    fn apply_inner(
        &self,
        ctx: &mut Context,
        solver: &dyn Solver,
        request: &Request,
    ) -> Result<ExecutionReport> {
        let transaction = self.plan(solver, request)?;
        if transaction.is_empty() {
            info!("Nothing to do");
            return Ok(ExecutionReport::default());
        }

        DownloadCoordinator::new(ctx.source.as_ref(), self.config.download_workers)
            .prefetch(&transaction)?;

        let mut check = TransactionCheck::from_live(&ctx.conn, &self.config.root)?;
        let verdict = check.simulate(&transaction);
        verdict.ensure_ok()?;

        let runner = self
            .config
            .run_scriptlets
            .then(|| ScriptletRunner::from_config(&self.config));
        let db_tx = ctx.conn.transaction()?;
        let mut handler = RootHandler::new(
            self.config.root.clone(),
            db_tx,
            ctx.extractor.as_ref(),
            ctx.sink.as_mut(),
        )
        .with_runner(runner);

        Executor::run(&transaction, &verdict, &mut handler)
    }
}
