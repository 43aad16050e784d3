// src/transaction/mod.rs

//! Transaction engine
//!
//! A solved request becomes a [`Transaction`]: steps expanded into lifecycle
//! actions, then reordered so every pre-transaction script runs before any
//! package content changes and every post-transaction script runs after.
//!
//! ```text
//! solve -> Transaction -> prefetch -> TransactionCheck -> Executor
//! ```

mod action;
mod apply;
mod check;
mod download;
mod executor;
mod step;

pub use action::{Action, ActionHandler, ActionKind, expand};
pub use apply::RootHandler;
pub use check::{Deficit, Mountpoint, TransactionCheck, Verdict};
pub use download::DownloadCoordinator;
pub use executor::{ActionOutcome, ExecutionReport, Executor, ReportStatus};
pub use step::{Step, StepKind};

use crate::package::Bracket;
use crate::solver::SolvedStep;
use std::sync::Arc;
use tracing::debug;

/// Ordered steps and the actions derived from them
#[derive(Debug, Default)]
pub struct Transaction {
    steps: Vec<Arc<Step>>,
    actions: Vec<Action>,
}

impl Transaction {
    pub fn from_steps(steps: Vec<Step>) -> Self {
        let steps: Vec<Arc<Step>> = steps.into_iter().map(Arc::new).collect();
        let actions = order_actions(&steps);
        debug!(
            "Transaction has {} step(s) and {} action(s)",
            steps.len(),
            actions.len()
        );
        Self { steps, actions }
    }

    pub fn from_solution(solved: Vec<Box<dyn SolvedStep>>) -> Self {
        Self::from_steps(solved.iter().map(|s| Step::from_solved(s.as_ref())).collect())
    }

    pub fn steps(&self) -> &[Arc<Step>] {
        &self.steps
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Install-class and erase actions in execution order
    pub fn core_actions(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter().filter(|a| !a.kind().is_script())
    }
}

/// Expand each step, then stable-partition by bracket
///
/// Relative order within each bracket is the solver's step order.
fn order_actions(steps: &[Arc<Step>]) -> Vec<Action> {
    let mut pre = Vec::new();
    let mut per_package = Vec::new();
    let mut post = Vec::new();

    for step in steps {
        for kind in expand(step.kind()) {
            let action = Action::new(*kind, Arc::clone(step));
            match kind.bracket() {
                Bracket::PreTransaction => pre.push(action),
                Bracket::PerPackage => per_package.push(action),
                Bracket::PostTransaction => post.push(action),
            }
        }
    }

    pre.extend(per_package);
    pre.extend(post);
    pre
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::Package;
    use crate::version::Evr;

    fn step(kind: StepKind, name: &str) -> Step {
        Step::new(
            kind,
            Arc::new(Package::new(name, Evr::parse("1.0").unwrap(), "noarch")),
        )
    }

    fn labels(tx: &Transaction) -> Vec<String> {
        tx.actions().iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn test_pretrans_and_posttrans_bracket_everything() {
        let tx = Transaction::from_steps(vec![
            step(StepKind::Install, "a"),
            step(StepKind::Erase, "b"),
        ]);

        assert_eq!(
            labels(&tx),
            vec![
                "pretransin(a-1.0.noarch)",
                "pretransun(b-1.0.noarch)",
                "prein(a-1.0.noarch)",
                "install(a-1.0.noarch)",
                "postin(a-1.0.noarch)",
                "preun(b-1.0.noarch)",
                "erase(b-1.0.noarch)",
                "postun(b-1.0.noarch)",
                "posttransin(a-1.0.noarch)",
                "posttransun(b-1.0.noarch)",
            ]
        );
    }

    #[test]
    fn test_core_actions_follow_step_order() {
        let tx = Transaction::from_steps(vec![
            step(StepKind::Install, "c"),
            step(StepKind::Cleanup, "a"),
            step(StepKind::Install, "b"),
        ]);
        let core: Vec<String> = tx.core_actions().map(|a| a.package().name.clone()).collect();
        assert_eq!(core, vec!["c", "a", "b"]);
        assert_eq!(tx.actions().len(), 11);
    }

    #[test]
    fn test_empty_transaction() {
        let tx = Transaction::from_steps(Vec::new());
        assert!(tx.is_empty());
        assert!(tx.actions().is_empty());
    }
}
