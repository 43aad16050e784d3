// src/package/mod.rs

//! Immutable package metadata
//!
//! A `Package` is produced once from a repository or solver snapshot and is
//! then shared by `Arc` among every step and action that refers to it. Nothing
//! in the engine mutates a package after construction; the `with_*` builders
//! are for the code that assembles metadata.

mod file;
mod relation;
mod scriptlet;

pub use file::{FileFlags, PackageFile};
pub use relation::{Relation, RelationKind, RelationOp};
pub use scriptlet::{Bracket, ScriptMode, ScriptSlot, Scriptlet};

use crate::version::Evr;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// Where and when a package was built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub host: String,
    pub time: DateTime<Utc>,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    pub evr: Evr,
    pub arch: String,
    #[serde(default)]
    pub requires: BTreeSet<Relation>,
    #[serde(default)]
    pub provides: BTreeSet<Relation>,
    #[serde(default)]
    pub conflicts: BTreeSet<Relation>,
    #[serde(default)]
    pub obsoletes: BTreeSet<Relation>,
    #[serde(default)]
    pub recommends: BTreeSet<Relation>,
    #[serde(default)]
    pub suggests: BTreeSet<Relation>,
    pub download_size: u64,
    pub installed_size: u64,
    /// SHA-256 of the binary artifact
    pub hash: String,
    pub build: Option<BuildInfo>,
    /// Identity that survives version changes
    pub uuid: Uuid,
    #[serde(default)]
    pub files: Vec<PackageFile>,
    #[serde(default)]
    pub scriptlets: BTreeMap<ScriptSlot, Scriptlet>,
}

impl Package {
    pub fn new(name: impl Into<String>, evr: Evr, arch: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            evr,
            arch: arch.into(),
            requires: BTreeSet::new(),
            provides: BTreeSet::new(),
            conflicts: BTreeSet::new(),
            obsoletes: BTreeSet::new(),
            recommends: BTreeSet::new(),
            suggests: BTreeSet::new(),
            download_size: 0,
            installed_size: 0,
            hash: String::new(),
            build: None,
            uuid: Uuid::new_v4(),
            files: Vec::new(),
            scriptlets: BTreeMap::new(),
        }
    }

    /// Add a relation to one of the six relation sets
    pub fn with_relation(mut self, kind: RelationKind, relation: Relation) -> Self {
        self.relations_mut(kind).insert(relation);
        self
    }

    /// Add a file; the installed size grows with it
    pub fn with_file(mut self, file: PackageFile) -> Self {
        self.installed_size += file.size;
        self.files.push(file);
        self
    }

    pub fn with_scriptlet(mut self, scriptlet: Scriptlet) -> Self {
        self.scriptlets.insert(scriptlet.slot, scriptlet);
        self
    }

    pub fn with_hash(mut self, hash: impl Into<String>, download_size: u64) -> Self {
        self.hash = hash.into();
        self.download_size = download_size;
        self
    }

    pub fn with_build(mut self, build: BuildInfo) -> Self {
        self.build = Some(build);
        self
    }

    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = uuid;
        self
    }

    pub fn relations(&self, kind: RelationKind) -> &BTreeSet<Relation> {
        match kind {
            RelationKind::Requires => &self.requires,
            RelationKind::Provides => &self.provides,
            RelationKind::Conflicts => &self.conflicts,
            RelationKind::Obsoletes => &self.obsoletes,
            RelationKind::Recommends => &self.recommends,
            RelationKind::Suggests => &self.suggests,
        }
    }

    fn relations_mut(&mut self, kind: RelationKind) -> &mut BTreeSet<Relation> {
        match kind {
            RelationKind::Requires => &mut self.requires,
            RelationKind::Provides => &mut self.provides,
            RelationKind::Conflicts => &mut self.conflicts,
            RelationKind::Obsoletes => &mut self.obsoletes,
            RelationKind::Recommends => &mut self.recommends,
            RelationKind::Suggests => &mut self.suggests,
        }
    }

    /// name-[epoch:]version[-release].arch
    pub fn nevra(&self) -> String {
        format!("{}-{}.{}", self.name, self.evr, self.arch)
    }

    /// File name of the binary artifact in caches and repositories
    pub fn artifact_name(&self) -> String {
        format!("{}.pkg.tar.zst", self.nevra())
    }

    pub fn scriptlet(&self, slot: ScriptSlot) -> Option<&Scriptlet> {
        self.scriptlets.get(&slot)
    }

    /// Same name, EVR and architecture
    pub fn same_nevra(&self, other: &Package) -> bool {
        self.name == other.name && self.evr == other.evr && self.arch == other.arch
    }

    /// Whether this package satisfies `relation`
    ///
    /// Checked against the package's own name and EVR, its provides set and,
    /// for file relations, the files it ships.
    pub fn provides_relation(&self, relation: &Relation) -> bool {
        if let Relation::File(path) = relation {
            return self.files.iter().any(|f| &f.path == path)
                || self.provides.contains(relation);
        }

        if relation.matches(&self.name, Some(&self.evr)) {
            return true;
        }

        self.provides.iter().any(|provided| match provided {
            Relation::Capability(name) => relation.matches(name, None),
            Relation::Versioned { name, evr, .. } => relation.matches(name, Some(evr)),
            Relation::File(_) => false,
        })
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.nevra())
    }
}
