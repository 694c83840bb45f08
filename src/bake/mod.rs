//! Baking: rewriting staged files so nothing references the build machine.
//!
//! Every registered artifact is classified once by content (binary object,
//! plain text, or opaque) and exactly one rewriter may touch it. Binaries
//! get their embedded search metadata relocated; text files get leaked
//! build paths rewritten; opaque data is left alone. Individual rewrite
//! failures degrade to warnings: a binary with a stale extra search path
//! beats aborting a multi-hour staging run.

mod linux;
mod macos;
pub mod text;

use anyhow::Result;
use std::path::Path;

use crate::config::{Platform, StageConfig};
use crate::metadata::{self, FileClass};
use crate::registry::Registry;
use crate::tree::DistributionTree;

pub use linux::ElfRelocator;
pub use macos::MachORelocator;

/// Platform-specific binary rewriting. One implementation is selected at
/// startup and used for the whole run.
pub trait Relocator {
    /// Rewrite one binary's embedded search metadata so it resolves
    /// dependencies relative to its own location. Returns true when the
    /// file changed.
    fn bake(&self, path: &Path, tree: &DistributionTree, config: &StageConfig) -> Result<bool>;
}

/// The relocator for the configured target platform.
pub fn relocator_for(platform: Platform) -> Box<dyn Relocator> {
    match platform {
        Platform::Linux => Box::new(ElfRelocator),
        Platform::MacOs => Box::new(MachORelocator),
    }
}

/// Outcome of a bake pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct BakeReport {
    pub binaries_baked: usize,
    pub texts_rewritten: usize,
    pub warnings: usize,
}

/// Walk every registered artifact and rewrite it in place. Artifacts are
/// independent; no ordering is required.
pub fn bake_tree(registry: &Registry) -> Result<BakeReport> {
    let config = registry.config();
    let relocator = relocator_for(config.platform);
    let pattern = text::build_path_regex(&config.build_root_marker);
    let mut report = BakeReport::default();

    for artifact in registry.artifacts() {
        let path = &artifact.dest_path;
        if path.is_symlink() || !path.exists() {
            continue;
        }
        match metadata::classify(path) {
            FileClass::Object(_) => match relocator.bake(path, registry.tree(), config) {
                Ok(true) => report.binaries_baked += 1,
                Ok(false) => {}
                Err(err) => {
                    println!("  Warning: failed to bake {}: {:#}", path.display(), err);
                    report.warnings += 1;
                }
            },
            FileClass::Text => match text::rewrite_build_paths(path, &pattern) {
                Ok(true) => report.texts_rewritten += 1,
                Ok(false) => {}
                Err(err) => {
                    println!("  Warning: failed to rewrite {}: {:#}", path.display(), err);
                    report.warnings += 1;
                }
            },
            FileClass::Opaque => {}
        }
    }

    Ok(report)
}
