// src/transaction/action.rs

//! Lifecycle expansion of steps into runnable actions

use super::step::{Step, StepKind};
use crate::error::Result;
use crate::package::{Bracket, Package, ScriptSlot};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Install,
    Reinstall,
    Upgrade,
    Downgrade,
    Erase,
    Script(ScriptSlot),
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Install => "install",
            ActionKind::Reinstall => "reinstall",
            ActionKind::Upgrade => "upgrade",
            ActionKind::Downgrade => "downgrade",
            ActionKind::Erase => "erase",
            ActionKind::Script(slot) => slot.as_str(),
        }
    }

    pub fn is_script(&self) -> bool {
        matches!(self, ActionKind::Script(_))
    }

    /// Writes package content (as opposed to removing it or running a script)
    pub fn touches_content(&self) -> bool {
        matches!(
            self,
            ActionKind::Install
                | ActionKind::Reinstall
                | ActionKind::Upgrade
                | ActionKind::Downgrade
        )
    }

    pub fn bracket(&self) -> Bracket {
        match self {
            ActionKind::Script(slot) => slot.bracket(),
            _ => Bracket::PerPackage,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const INSTALL: &[ActionKind] = &[
    ActionKind::Script(ScriptSlot::PreTransIn),
    ActionKind::Script(ScriptSlot::PreIn),
    ActionKind::Install,
    ActionKind::Script(ScriptSlot::PostIn),
    ActionKind::Script(ScriptSlot::PostTransIn),
];
const REINSTALL: &[ActionKind] = &[
    ActionKind::Script(ScriptSlot::PreTransIn),
    ActionKind::Script(ScriptSlot::PreIn),
    ActionKind::Reinstall,
    ActionKind::Script(ScriptSlot::PostIn),
    ActionKind::Script(ScriptSlot::PostTransIn),
];
const UPGRADE: &[ActionKind] = &[
    ActionKind::Script(ScriptSlot::PreTransIn),
    ActionKind::Script(ScriptSlot::PreUp),
    ActionKind::Upgrade,
    ActionKind::Script(ScriptSlot::PostUp),
    ActionKind::Script(ScriptSlot::PostTransIn),
];
const DOWNGRADE: &[ActionKind] = &[
    ActionKind::Script(ScriptSlot::PreTransIn),
    ActionKind::Script(ScriptSlot::PreUp),
    ActionKind::Downgrade,
    ActionKind::Script(ScriptSlot::PostUp),
    ActionKind::Script(ScriptSlot::PostTransIn),
];
const ERASE: &[ActionKind] = &[
    ActionKind::Script(ScriptSlot::PreTransUn),
    ActionKind::Script(ScriptSlot::PreUn),
    ActionKind::Erase,
    ActionKind::Script(ScriptSlot::PostUn),
    ActionKind::Script(ScriptSlot::PostTransUn),
];
const CLEANUP: &[ActionKind] = &[ActionKind::Erase];

/// Fixed action sequence for a step kind
pub fn expand(kind: StepKind) -> &'static [ActionKind] {
    match kind {
        StepKind::Install => INSTALL,
        StepKind::Reinstall => REINSTALL,
        StepKind::Upgrade => UPGRADE,
        StepKind::Downgrade => DOWNGRADE,
        StepKind::Erase => ERASE,
        StepKind::Cleanup => CLEANUP,
    }
}

/// Performs the effect of each action kind
///
/// The execution loop only sequences actions; everything that touches the
/// root or the database lives behind this trait.
pub trait ActionHandler {
    fn script(&mut self, action: &Action, slot: ScriptSlot) -> Result<()>;

    /// Install-class core action (install, reinstall, upgrade, downgrade)
    fn install(&mut self, action: &Action) -> Result<()>;

    fn erase(&mut self, action: &Action) -> Result<()>;

    /// Called once after every action was attempted: commit and sync
    fn finish(&mut self) -> Result<()>;
}

/// A runnable unit derived from a step
#[derive(Debug, Clone)]
pub struct Action {
    kind: ActionKind,
    step: Arc<Step>,
}

impl Action {
    pub fn new(kind: ActionKind, step: Arc<Step>) -> Self {
        Self { kind, step }
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn step(&self) -> &Step {
        &self.step
    }

    pub fn package(&self) -> &Arc<Package> {
        self.step.package()
    }

    pub fn run(&self, handler: &mut dyn ActionHandler) -> Result<()> {
        match self.kind {
            ActionKind::Script(slot) => handler.script(self, slot),
            ActionKind::Erase => handler.erase(self),
            ActionKind::Install
            | ActionKind::Reinstall
            | ActionKind::Upgrade
            | ActionKind::Downgrade => handler.install(self),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.package().nevra())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_expansion() {
        assert_eq!(
            expand(StepKind::Install)
                .iter()
                .map(|k| k.as_str())
                .collect::<Vec<_>>(),
            vec!["pretransin", "prein", "install", "postin", "posttransin"]
        );
    }

    #[test]
    fn test_erase_expansion() {
        assert_eq!(
            expand(StepKind::Erase)
                .iter()
                .map(|k| k.as_str())
                .collect::<Vec<_>>(),
            vec!["pretransun", "preun", "erase", "postun", "posttransun"]
        );
    }

    #[test]
    fn test_cleanup_runs_no_scripts() {
        assert_eq!(expand(StepKind::Cleanup), &[ActionKind::Erase]);
    }

    #[test]
    fn test_every_expansion_has_one_core_action() {
        for kind in [
            StepKind::Install,
            StepKind::Reinstall,
            StepKind::Upgrade,
            StepKind::Downgrade,
            StepKind::Erase,
            StepKind::Cleanup,
        ] {
            let core = expand(kind).iter().filter(|k| !k.is_script()).count();
            assert_eq!(core, 1, "{kind}");
        }
    }
}
