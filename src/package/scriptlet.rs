// src/package/scriptlet.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle point at which a package script runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptSlot {
    PreTransIn,
    PreTransUn,
    PreIn,
    PreUn,
    PreUp,
    PostIn,
    PostUn,
    PostUp,
    PostTransIn,
    PostTransUn,
}

/// Where a script slot sits relative to the whole transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bracket {
    PreTransaction,
    PerPackage,
    PostTransaction,
}

impl ScriptSlot {
    pub const ALL: [ScriptSlot; 10] = [
        ScriptSlot::PreTransIn,
        ScriptSlot::PreTransUn,
        ScriptSlot::PreIn,
        ScriptSlot::PreUn,
        ScriptSlot::PreUp,
        ScriptSlot::PostIn,
        ScriptSlot::PostUn,
        ScriptSlot::PostUp,
        ScriptSlot::PostTransIn,
        ScriptSlot::PostTransUn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptSlot::PreTransIn => "pretransin",
            ScriptSlot::PreTransUn => "pretransun",
            ScriptSlot::PreIn => "prein",
            ScriptSlot::PreUn => "preun",
            ScriptSlot::PreUp => "preup",
            ScriptSlot::PostIn => "postin",
            ScriptSlot::PostUn => "postun",
            ScriptSlot::PostUp => "postup",
            ScriptSlot::PostTransIn => "posttransin",
            ScriptSlot::PostTransUn => "posttransun",
        }
    }

    pub fn bracket(&self) -> Bracket {
        match self {
            ScriptSlot::PreTransIn | ScriptSlot::PreTransUn => Bracket::PreTransaction,
            ScriptSlot::PostTransIn | ScriptSlot::PostTransUn => Bracket::PostTransaction,
            _ => Bracket::PerPackage,
        }
    }
}

impl fmt::Display for ScriptSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScriptSlot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScriptSlot::ALL
            .into_iter()
            .find(|slot| slot.as_str() == s)
            .ok_or_else(|| format!("Invalid script slot: {s}"))
    }
}

/// How a script body is executed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptMode {
    /// Written to a file and run by the interpreter named in its `#!` line
    #[default]
    Interpreter,
    /// Builtin command language run by a forked worker inside the root
    Embedded,
}

/// A lifecycle script shipped by a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scriptlet {
    pub slot: ScriptSlot,
    pub body: String,
    #[serde(default)]
    pub mode: ScriptMode,
}

impl Scriptlet {
    pub fn new(slot: ScriptSlot, body: impl Into<String>) -> Self {
        Self {
            slot,
            body: body.into(),
            mode: ScriptMode::Interpreter,
        }
    }

    pub fn embedded(slot: ScriptSlot, body: impl Into<String>) -> Self {
        Self {
            mode: ScriptMode::Embedded,
            ..Self::new(slot, body)
        }
    }
}
