// src/package/relation.rs

//! Dependency relations: capabilities, versioned constraints and file paths

use crate::error::{Error, Result};
use crate::version::Evr;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Comparison operator of a versioned relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationOp {
    Eq,
    Lt,
    Gt,
    Le,
    Ge,
}

impl RelationOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationOp::Eq => "=",
            RelationOp::Lt => "<",
            RelationOp::Gt => ">",
            RelationOp::Le => "<=",
            RelationOp::Ge => ">=",
        }
    }

    /// Whether `ordering` (candidate compared to the constraint) satisfies this operator
    pub fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            RelationOp::Eq => ordering == Ordering::Equal,
            RelationOp::Lt => ordering == Ordering::Less,
            RelationOp::Gt => ordering == Ordering::Greater,
            RelationOp::Le => ordering != Ordering::Greater,
            RelationOp::Ge => ordering != Ordering::Less,
        }
    }
}

impl FromStr for RelationOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "=" | "==" => Ok(RelationOp::Eq),
            "<" => Ok(RelationOp::Lt),
            ">" => Ok(RelationOp::Gt),
            "<=" => Ok(RelationOp::Le),
            ">=" => Ok(RelationOp::Ge),
            _ => Err(Error::ParseError(format!("Invalid relation operator: {s}"))),
        }
    }
}

/// Which relation set of a package a relation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RelationKind {
    Requires,
    Provides,
    Conflicts,
    Obsoletes,
    Recommends,
    Suggests,
}

impl RelationKind {
    pub const ALL: [RelationKind; 6] = [
        RelationKind::Requires,
        RelationKind::Provides,
        RelationKind::Conflicts,
        RelationKind::Obsoletes,
        RelationKind::Recommends,
        RelationKind::Suggests,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Requires => "requires",
            RelationKind::Provides => "provides",
            RelationKind::Conflicts => "conflicts",
            RelationKind::Obsoletes => "obsoletes",
            RelationKind::Recommends => "recommends",
            RelationKind::Suggests => "suggests",
        }
    }
}

impl FromStr for RelationKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "requires" => Ok(RelationKind::Requires),
            "provides" => Ok(RelationKind::Provides),
            "conflicts" => Ok(RelationKind::Conflicts),
            "obsoletes" => Ok(RelationKind::Obsoletes),
            "recommends" => Ok(RelationKind::Recommends),
            "suggests" => Ok(RelationKind::Suggests),
            _ => Err(format!("Invalid relation kind: {s}")),
        }
    }
}

/// A dependency expression
///
/// Equality, ordering and hashing all go through the canonical string form,
/// so `foo >= 1.0` parsed twice is one set member.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Relation {
    /// Bare capability name
    Capability(String),
    /// Name constrained by an operator over epoch/version/release
    Versioned {
        name: String,
        op: RelationOp,
        evr: Evr,
    },
    /// Absolute file path
    File(PathBuf),
}

impl Relation {
    /// Parse a relation from its canonical string form
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.starts_with('/') {
            return Ok(Relation::File(PathBuf::from(s)));
        }

        let invalid = || Error::ParseError(format!("Invalid relation: '{}'", s));
        let is_op = |c: char| matches!(c, '<' | '>' | '=');

        let Some(op_start) = s.find(is_op) else {
            return match s.split_whitespace().collect::<Vec<_>>().as_slice() {
                [name] => Ok(Relation::Capability((*name).to_string())),
                _ => Err(invalid()),
            };
        };

        // Operators may be written with or without surrounding spaces: `foo>=1.0`
        let name = s[..op_start].trim();
        let rest = &s[op_start..];
        let op_end = rest.find(|c: char| !is_op(c)).unwrap_or(rest.len());
        let evr = rest[op_end..].trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(invalid());
        }
        if evr.is_empty() || evr.contains(char::is_whitespace) {
            return Err(invalid());
        }

        Ok(Relation::Versioned {
            name: name.to_string(),
            op: rest[..op_end].parse()?,
            evr: Evr::parse(evr)?,
        })
    }

    /// Capability name, or the path for file relations
    pub fn name(&self) -> String {
        match self {
            Relation::Capability(name) | Relation::Versioned { name, .. } => name.clone(),
            Relation::File(path) => path.display().to_string(),
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Relation::File(_))
    }

    /// Whether a provider of `name` at `evr` satisfies this relation
    ///
    /// An unversioned provider satisfies any constraint on its name.
    pub fn matches(&self, name: &str, evr: Option<&Evr>) -> bool {
        match self {
            Relation::Capability(wanted) => wanted == name,
            Relation::Versioned {
                name: wanted,
                op,
                evr: constraint,
            } => {
                wanted == name
                    && evr.is_none_or(|have| op.accepts(have.compare_loose(constraint)))
            }
            Relation::File(path) => Path::new(name) == path,
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relation::Capability(name) => write!(f, "{}", name),
            Relation::Versioned { name, op, evr } => {
                write!(f, "{} {} {}", name, op.as_str(), evr)
            }
            Relation::File(path) => write!(f, "{}", path.display()),
        }
    }
}

impl PartialEq for Relation {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl Eq for Relation {}

impl Hash for Relation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_string().hash(state);
    }
}

impl Ord for Relation {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

impl PartialOrd for Relation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl TryFrom<String> for Relation {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Relation::parse(&value)
    }
}

impl From<Relation> for String {
    fn from(value: Relation) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            Relation::parse("libfoo").unwrap(),
            Relation::Capability("libfoo".to_string())
        );
        assert!(Relation::parse("/usr/bin/sh").unwrap().is_file());
        match Relation::parse("openssl >= 1:3.0-2").unwrap() {
            Relation::Versioned { name, op, evr } => {
                assert_eq!(name, "openssl");
                assert_eq!(op, RelationOp::Ge);
                assert_eq!(evr, Evr::new(1, "3.0", "2"));
            }
            other => panic!("unexpected relation {other:?}"),
        }
        assert!(Relation::parse("foo >=").is_err());
        assert!(Relation::parse("foo ~ 1.0").is_err());
    }

    #[test]
    fn test_operator_without_spaces() {
        assert_eq!(
            Relation::parse("foo>=1.0").unwrap(),
            Relation::parse("foo >= 1.0").unwrap()
        );
        assert_eq!(Relation::parse("libbar<2:3.1").unwrap().to_string(), "libbar < 2:3.1");
        assert_eq!(Relation::parse("baz =1.0-1").unwrap().to_string(), "baz = 1.0-1");
        assert!(Relation::parse(">=1.0").is_err());
        assert!(Relation::parse("foo =< 1.0").is_err());
        assert!(Relation::parse("foo >= 1.0 extra").is_err());
        assert!(Relation::parse("foo bar").is_err());
    }

    #[test]
    fn test_canonical_equality_dedups() {
        let mut set = BTreeSet::new();
        set.insert(Relation::parse("foo  >=   1.0").unwrap());
        set.insert(Relation::parse("foo >= 1.0").unwrap());
        set.insert(Relation::parse("foo").unwrap());
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_matches_versions() {
        let rel = Relation::parse("foo >= 1.2").unwrap();
        assert!(rel.matches("foo", Some(&Evr::parse("1.2-3").unwrap())));
        assert!(rel.matches("foo", Some(&Evr::parse("2.0").unwrap())));
        assert!(!rel.matches("foo", Some(&Evr::parse("1.1").unwrap())));
        assert!(!rel.matches("bar", Some(&Evr::parse("2.0").unwrap())));
        assert!(rel.matches("foo", None));

        let exact = Relation::parse("foo = 1.0-1").unwrap();
        assert!(!exact.matches("foo", Some(&Evr::parse("1.0-2").unwrap())));
    }

    #[test]
    fn test_serde_uses_canonical_string() {
        let rel = Relation::parse("bar < 2.0").unwrap();
        let json = serde_json::to_string(&rel).unwrap();
        assert_eq!(json, "\"bar < 2.0\"");
        let back: Relation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rel);
    }
}
