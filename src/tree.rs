//! The distribution tree: output root plus its well-known subdirectories.
//!
//! Every registered destination must stay inside the root; the check runs on
//! each insertion, before anything touches the filesystem.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::StageError;

/// The root of one staged distribution.
///
/// A value type: the root path plus explicit accessors for the fixed layout
/// (`bin/`, `libexec/`, `lib/`, `plugins/<family>/`). Arbitrary staged data
/// goes through [`DistributionTree::join`].
#[derive(Debug, Clone)]
pub struct DistributionTree {
    root: PathBuf,
}

impl DistributionTree {
    /// Create the tree at `<dist_root>/<name>/` with the fixed layout
    /// directories in place.
    pub fn create(dist_root: &Path, name: &str) -> Result<Self> {
        let root = dist_root.join(name);
        let tree = Self { root };
        for dir in [tree.bin(), tree.libexec(), tree.lib(), tree.root.join("plugins")] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create tree dir: {}", dir.display()))?;
        }
        Ok(tree)
    }

    /// The tree root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Launcher scripts and script-language executables.
    pub fn bin(&self) -> PathBuf {
        self.root.join("bin")
    }

    /// Real executable binaries.
    pub fn libexec(&self) -> PathBuf {
        self.root.join("libexec")
    }

    /// Shared libraries.
    pub fn lib(&self) -> PathBuf {
        self.root.join("lib")
    }

    /// Plugin binaries, grouped by family name.
    pub fn plugins(&self, family: &str) -> PathBuf {
        self.root.join("plugins").join(family)
    }

    /// An arbitrary path under the root. Containment is still checked at
    /// registration time; this only builds the path.
    pub fn join(&self, sub: impl AsRef<Path>) -> PathBuf {
        self.root.join(sub)
    }

    /// True when `path` lexically stays under the root.
    pub fn contains(&self, path: &Path) -> bool {
        normalize(path).starts_with(normalize(&self.root))
    }

    /// Error unless `dest` stays under the root. Runs before any copy.
    pub fn ensure_contained(&self, dest: &Path) -> Result<()> {
        if self.contains(dest) {
            Ok(())
        } else {
            Err(StageError::TreeEscape {
                root: self.root.clone(),
                dest: dest.to_path_buf(),
            }
            .into())
        }
    }

    /// `dest` relative to the root, when contained.
    pub fn relative<'a>(&self, dest: &'a Path) -> Option<&'a Path> {
        dest.strip_prefix(&self.root).ok()
    }
}

/// Resolve `.` and `..` components lexically. The destination usually does
/// not exist yet, so `canonicalize` is not an option here.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}
