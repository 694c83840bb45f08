//! Typed failures callers must be able to tell apart.
//!
//! Most fallible paths return `anyhow::Result` with context strings, but the
//! failures that abort a staging run (or that callers match on to decide
//! whether to abort) are concrete variants carried inside the `anyhow` chain
//! and recoverable via `downcast_ref`.

use std::fmt;
use std::path::PathBuf;

/// A required library name nobody could satisfy, with one artifact that
/// declared the need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedDep {
    pub name: String,
    pub requested_by: PathBuf,
}

impl fmt::Display for UnresolvedDep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (required by {})",
            self.name,
            self.requested_by.display()
        )
    }
}

fn join_deps(deps: &[UnresolvedDep]) -> String {
    deps.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn join_args(args: &[String]) -> String {
    args.join(" ")
}

/// Structural staging failures.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// A registration would land outside the distribution root. Nothing is
    /// copied when this fires.
    #[error("destination escapes the distribution tree: {} is not under {}", .dest.display(), .root.display())]
    TreeEscape { root: PathBuf, dest: PathBuf },

    /// Required libraries absent from every search directory and not assumed
    /// present on the target operating system. The produced tree would not
    /// run, so this is fatal.
    #[error("unresolved dependencies: {}", join_deps(.0))]
    UnresolvedDependencies(Vec<UnresolvedDep>),

    /// An external tool could not be spawned because it is not installed.
    #[error("'{tool}' not found in PATH. Is it installed?")]
    ToolNotFound { tool: String },

    /// An external tool ran and exited non-zero.
    #[error("'{tool} {}' failed (exit code {code}): {stderr}", join_args(.args))]
    ToolFailed {
        tool: String,
        args: Vec<String>,
        code: i32,
        stderr: String,
    },

    /// An absolute symlink points outside both the staging sources and the
    /// recognized system prefixes. A relocatable tree cannot carry a dangling
    /// or escaping reference.
    #[error("absolute symlink {} -> {} escapes the staged sources", .link.display(), .target.display())]
    SymlinkEscape { link: PathBuf, target: PathBuf },

    /// The hardlink fast path already fell back to a full copy, and the copy
    /// itself failed.
    #[error("failed to copy {} -> {}", .src.display(), .dest.display())]
    CopyFailed {
        src: PathBuf,
        dest: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
