//! Search-path resolution of outstanding library names.
//!
//! One linear pass per call: each newly copied library already had its own
//! needs captured at copy time by the registry's scan side effect, so no
//! fixed-point loop runs here. A second call only matters when earlier
//! resolution pulled in libraries whose needs another location satisfies.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::error::UnresolvedDep;
use crate::registry::Registry;

/// Whether a search directory may contribute copies or only answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyPolicy {
    /// Libraries found here are copied into the tree.
    CopyIntoTree,
    /// Consulted, but never copied from (directories already inside the
    /// tree, or pinned system locations).
    ReferenceOnly,
}

/// One prioritized search directory.
#[derive(Debug, Clone)]
pub struct SearchLocation {
    pub dir: PathBuf,
    pub policy: CopyPolicy,
}

/// Ordered search locations; the first directory containing a given library
/// wins.
#[derive(Debug, Clone, Default)]
pub struct SearchPath {
    locations: Vec<SearchLocation>,
}

impl SearchPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, dir: impl AsRef<Path>, policy: CopyPolicy) -> &mut Self {
        self.locations.push(SearchLocation {
            dir: dir.as_ref().to_path_buf(),
            policy,
        });
        self
    }

    pub fn locations(&self) -> &[SearchLocation] {
        &self.locations
    }
}

/// Drain the registry's outstanding names against `search`.
///
/// For each name still outstanding, the first directory containing it wins.
/// A `CopyIntoTree` hit stages the library with dependency scanning
/// disabled: its transitive needs were captured when it was first linked
/// against, and it ships as-is. Names the target OS is assumed to provide
/// resolve without a copy. Whatever remains is returned; the caller decides
/// whether that is fatal.
pub fn resolve(registry: &mut Registry, search: &SearchPath) -> Result<Vec<UnresolvedDep>> {
    let pending: Vec<String> = registry.graph().outstanding().cloned().collect();

    for name in pending {
        // A sibling copied earlier in this pass may have satisfied it.
        if !registry.graph().is_outstanding(&name) {
            continue;
        }
        if registry.config().assumed_on_target(&name) {
            registry.graph_mut().mark_resolved(&name);
            continue;
        }

        for location in search.locations() {
            let candidate = location.dir.join(&name);
            if !candidate.exists() && !candidate.is_symlink() {
                continue;
            }
            if location.policy == CopyPolicy::CopyIntoTree {
                registry.add_library(&candidate, true, false, false)?;
                println!("  Resolved {} from {}", name, location.dir.display());
            }
            registry.graph_mut().mark_resolved(&name);
            break;
        }
    }

    Ok(registry.unresolved())
}
