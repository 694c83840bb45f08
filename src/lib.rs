//! stagehand - relocatable distribution staging.
//!
//! Copies already-built executables and shared libraries into a fixed tree
//! layout, discovers each binary's runtime dependencies, resolves them
//! against prioritized search locations, and rewrites the embedded
//! library-search metadata so the tree runs on machines that never saw the
//! build directories.
//!
//! A staging run is a sequential pipeline:
//! 1. register artifacts with the [`registry::Registry`]
//! 2. close the dependency graph with [`resolver::resolve`]
//! 3. rewrite every binary with [`bake::bake_tree`]
//! 4. [`registry::Registry::finalize`] the tree
//!
//! # Example
//!
//! ```no_run
//! use stagehand::{bake, resolver, Registry, SearchPath, StageConfig};
//! use stagehand::resolver::CopyPolicy;
//! use stagehand::tree::DistributionTree;
//! use std::path::Path;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = StageConfig::new("/build/install")
//!     .with_depends_root("/build/depends")
//!     .apply_env();
//! let tree = DistributionTree::create(Path::new("/build/dist"), "myapp")?;
//! let mut registry = Registry::new(tree, config);
//!
//! registry.add_executable(Path::new("/build/install/bin/myapp"))?;
//!
//! let mut search = SearchPath::new();
//! search.push("/build/install/lib", CopyPolicy::CopyIntoTree);
//! search.push("/build/depends/lib", CopyPolicy::CopyIntoTree);
//! resolver::resolve(&mut registry, &search)?;
//! registry.ensure_closed()?;
//!
//! bake::bake_tree(&registry)?;
//! registry.finalize()?;
//! # Ok(())
//! # }
//! ```

pub mod bake;
pub mod config;
pub mod copy;
pub mod error;
pub mod graph;
pub mod manifest;
pub mod metadata;
pub mod preflight;
pub mod process;
pub mod registry;
pub mod resolver;
pub mod tree;

pub use config::{Platform, StageConfig};
pub use error::{StageError, UnresolvedDep};
pub use registry::{Artifact, ArtifactKind, Registry};
pub use resolver::{CopyPolicy, SearchLocation, SearchPath};
pub use tree::DistributionTree;
