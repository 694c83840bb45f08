//! Dependency bookkeeping for one staging run.
//!
//! Tracks which required library names are still unsatisfied and which
//! artifacts asked for them. A name leaves `outstanding` exactly once: when
//! a search directory produces it, or when a registered artifact already
//! provides it under that name.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Required names with no provider yet.
    outstanding: BTreeSet<String>,
    /// Required name -> artifacts that declared the need, in registration
    /// order. Diagnostics only; resolution order never consults this.
    owners: BTreeMap<String, Vec<PathBuf>>,
    /// Names some registered artifact provides (file names and sonames).
    provided: BTreeSet<String>,
    /// Names already resolved via search. Kept so a later declaration of the
    /// same need does not re-open it.
    resolved: BTreeSet<String>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// An artifact landing in the tree provides `name`. Satisfies any
    /// outstanding need for it.
    pub fn record_provided(&mut self, name: &str) {
        self.provided.insert(name.to_string());
        if self.outstanding.remove(name) {
            self.resolved.insert(name.to_string());
        }
    }

    /// An artifact at `owner` declared a need for `name`. No-op when the
    /// name is already provided or already resolved.
    pub fn record_needed(&mut self, name: &str, owner: &Path) {
        if self.provided.contains(name) || self.resolved.contains(name) {
            return;
        }
        self.owners
            .entry(name.to_string())
            .or_default()
            .push(owner.to_path_buf());
        self.outstanding.insert(name.to_string());
    }

    /// Mark a name satisfied by search (whether or not it was copied).
    /// Returns false if the name was not outstanding.
    pub fn mark_resolved(&mut self, name: &str) -> bool {
        if self.outstanding.remove(name) {
            self.resolved.insert(name.to_string());
            true
        } else {
            false
        }
    }

    pub fn is_outstanding(&self, name: &str) -> bool {
        self.outstanding.contains(name)
    }

    pub fn is_provided(&self, name: &str) -> bool {
        self.provided.contains(name)
    }

    /// Names still unsatisfied, in sorted order.
    pub fn outstanding(&self) -> impl Iterator<Item = &String> {
        self.outstanding.iter()
    }

    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }

    /// Artifacts that declared a need for `name`.
    pub fn owners_of(&self, name: &str) -> &[PathBuf] {
        self.owners.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The first artifact that asked for `name`, for error reporting.
    pub fn first_owner(&self, name: &str) -> Option<&Path> {
        self.owners_of(name).first().map(PathBuf::as_path)
    }
}
