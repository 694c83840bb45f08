//! ELF relocation via `patchelf`, with optional debug split and strip.

use anyhow::{Context, Result};
use std::path::Path;

use super::Relocator;
use crate::config::StageConfig;
use crate::process::Cmd;
use crate::tree::DistributionTree;

pub struct ElfRelocator;

impl Relocator for ElfRelocator {
    fn bake(&self, path: &Path, tree: &DistributionTree, config: &StageConfig) -> Result<bool> {
        // A single $ORIGIN directive replaces every previous RPATH/RUNPATH,
        // so build-machine absolute paths disappear in the same stroke and
        // the loader finds co-located libraries wherever the tree lands.
        let directive = origin_directive(path, tree);
        Cmd::new("patchelf")
            .args(["--set-rpath", &directive])
            .arg_path(path)
            .run()
            .with_context(|| format!("Failed to set rpath on {}", path.display()))?;

        // Stripping stays off when the tree targets Linux: it has corrupted
        // dependent libraries with this toolchain.
        if config.split_debug_info {
            split_debug_and_strip(path)?;
        }

        Ok(true)
    }
}

/// The `$ORIGIN`-relative directive that reaches the tree's `lib/` from
/// `path`'s directory: `$ORIGIN/../lib` for `libexec/` and `lib/`,
/// `$ORIGIN/../../lib` for `plugins/<family>/`.
fn origin_directive(path: &Path, tree: &DistributionTree) -> String {
    let depth = path
        .parent()
        .and_then(|dir| dir.strip_prefix(tree.root()).ok())
        .map(|rel| rel.components().count())
        .unwrap_or(1);
    if depth == 0 {
        "$ORIGIN/lib".to_string()
    } else {
        format!("$ORIGIN/{}lib", "../".repeat(depth))
    }
}

/// Split debug info into a sibling `.debug` file, strip the binary, and
/// link the two back together with a debug-link record.
fn split_debug_and_strip(path: &Path) -> Result<()> {
    let debug_file = {
        let mut name = path.as_os_str().to_owned();
        name.push(".debug");
        std::path::PathBuf::from(name)
    };

    Cmd::new("objcopy")
        .arg("--only-keep-debug")
        .arg_path(path)
        .arg_path(&debug_file)
        .run()
        .with_context(|| format!("Failed to extract debug info from {}", path.display()))?;
    Cmd::new("strip")
        .arg("--strip-unneeded")
        .arg_path(path)
        .run()
        .with_context(|| format!("Failed to strip {}", path.display()))?;
    let link_arg = format!("--add-gnu-debuglink={}", debug_file.display());
    Cmd::new("objcopy")
        .arg(&link_arg)
        .arg_path(path)
        .run()
        .with_context(|| format!("Failed to add debug link to {}", path.display()))?;
    Ok(())
}
