// src/transaction/executor.rs

//! Sequential execution of a checked transaction

use super::{ActionHandler, ActionKind, Transaction, Verdict};
use crate::error::Result;
use serde::Serialize;
use std::time::Instant;
use tracing::{error, info, warn};

/// What happened to one action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    /// Display form, e.g. `postin(foo-1.0-1.x86_64)`
    pub action: String,
    #[serde(skip)]
    pub kind: ActionKind,
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStatus {
    Succeeded,
    CompletedWithErrors(usize),
    /// Stopped early on an error that leaves the database untrustworthy
    Aborted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    pub outcomes: Vec<ActionOutcome>,
    /// Reason the loop stopped before attempting every action
    pub aborted: Option<String>,
    /// Database changes were committed and the filesystem synced
    pub committed: bool,
    pub duration_ms: u64,
}

impl ExecutionReport {
    pub fn successes(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    pub fn errors(&self) -> usize {
        self.outcomes.len() - self.successes()
    }

    pub fn failed_actions(&self) -> impl Iterator<Item = &ActionOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }

    pub fn status(&self) -> ReportStatus {
        match (&self.aborted, self.errors()) {
            (Some(_), _) => ReportStatus::Aborted,
            (None, 0) => ReportStatus::Succeeded,
            (None, n) => ReportStatus::CompletedWithErrors(n),
        }
    }
}

pub struct Executor;

impl Executor {
    /// Run every action in order against `handler`
    ///
    /// A failing action is logged and recorded and the loop moves on. Only a
    /// fatal error (database integrity) stops it, in which case nothing is
    /// committed. Refuses to start on a failed verdict.
    pub fn run(
        transaction: &Transaction,
        verdict: &Verdict,
        handler: &mut dyn ActionHandler,
    ) -> Result<ExecutionReport> {
        verdict.ensure_ok()?;

        let start = Instant::now();
        let mut report = ExecutionReport::default();
        let total = transaction.actions().len();

        for (idx, action) in transaction.actions().iter().enumerate() {
            info!("[{}/{}] {}", idx + 1, total, action);
            let result = action.run(handler);
            let error = result.as_ref().err().map(|e| e.to_string());
            report.outcomes.push(ActionOutcome {
                action: action.to_string(),
                kind: action.kind(),
                error,
            });

            if let Err(e) = result {
                if e.is_fatal() {
                    error!("{} failed, aborting transaction: {}", action, e);
                    report.aborted = Some(format!("{}: {}", action, e));
                    break;
                }
                error!("{} failed: {}", action, e);
            }
        }

        if report.aborted.is_none() {
            match handler.finish() {
                Ok(()) => report.committed = true,
                Err(e) => {
                    error!("Failed to commit transaction: {}", e);
                    report.aborted = Some(format!("commit: {}", e));
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        match report.status() {
            ReportStatus::Succeeded => info!(
                "Transaction complete: {} action(s) in {}ms",
                report.successes(),
                report.duration_ms
            ),
            ReportStatus::CompletedWithErrors(n) => warn!(
                "Transaction complete with {} error(s), {} action(s) succeeded",
                n,
                report.successes()
            ),
            ReportStatus::Aborted => error!(
                "Transaction aborted after {} action(s)",
                report.outcomes.len()
            ),
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::package::{Package, ScriptSlot};
    use crate::transaction::{Action, Step, StepKind};
    use crate::version::Evr;
    use std::path::PathBuf;
    use std::sync::Arc;

    /// Records calls and fails on request
    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
        fail_script: Option<ScriptSlot>,
        fatal_install: bool,
        finished: bool,
    }

    impl ActionHandler for Recorder {
        fn script(&mut self, action: &Action, slot: ScriptSlot) -> Result<()> {
            self.calls.push(action.to_string());
            if self.fail_script == Some(slot) {
                return Err(Error::ScriptletError(format!("{} exited with 1", slot)));
            }
            Ok(())
        }

        fn install(&mut self, action: &Action) -> Result<()> {
            self.calls.push(action.to_string());
            if self.fatal_install {
                return Err(Error::Database(rusqlite::Error::InvalidQuery));
            }
            Ok(())
        }

        fn erase(&mut self, action: &Action) -> Result<()> {
            self.calls.push(action.to_string());
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.finished = true;
            Ok(())
        }
    }

    fn tx(names: &[&str]) -> Transaction {
        Transaction::from_steps(
            names
                .iter()
                .map(|n| {
                    Step::new(
                        StepKind::Install,
                        Arc::new(Package::new(*n, Evr::parse("1").unwrap(), "noarch")),
                    )
                })
                .collect(),
        )
    }

    #[test]
    fn test_all_actions_succeed() {
        let tx = tx(&["a"]);
        let mut handler = Recorder::default();
        let report = Executor::run(&tx, &Verdict::default(), &mut handler).unwrap();

        assert_eq!(report.status(), ReportStatus::Succeeded);
        assert_eq!(report.successes(), 5);
        assert!(report.committed);
        assert!(handler.finished);
    }

    #[test]
    fn test_failed_script_does_not_stop_the_loop() {
        let tx = tx(&["a", "b"]);
        let mut handler = Recorder {
            fail_script: Some(ScriptSlot::PostIn),
            ..Default::default()
        };
        let report = Executor::run(&tx, &Verdict::default(), &mut handler).unwrap();

        assert_eq!(handler.calls.len(), 10);
        assert_eq!(report.status(), ReportStatus::CompletedWithErrors(2));
        let failed: Vec<&str> = report.failed_actions().map(|o| o.action.as_str()).collect();
        assert_eq!(failed, vec!["postin(a-1.noarch)", "postin(b-1.noarch)"]);
        assert!(report.committed);
    }

    #[test]
    fn test_fatal_error_aborts_without_commit() {
        let tx = tx(&["a", "b"]);
        let mut handler = Recorder {
            fatal_install: true,
            ..Default::default()
        };
        let report = Executor::run(&tx, &Verdict::default(), &mut handler).unwrap();

        assert_eq!(report.status(), ReportStatus::Aborted);
        assert_eq!(handler.calls.last().unwrap(), "install(a-1.noarch)");
        assert!(!handler.finished);
        assert!(!report.committed);
    }

    #[test]
    fn test_failed_verdict_refuses_to_start() {
        let tx = tx(&["a"]);
        let verdict = Verdict {
            error_files: vec![PathBuf::from("/x")],
            ..Default::default()
        };
        let mut handler = Recorder::default();
        let err = Executor::run(&tx, &verdict, &mut handler).unwrap_err();

        assert!(matches!(err, Error::TransactionCheckFailed(_)));
        assert!(handler.calls.is_empty());
    }
}
