//! Mach-O relocation via `install_name_tool`.
//!
//! Recorded dependency paths whose targets live in the tree become
//! `@rpath/<name>`; the binary's own install name goes through `-id`
//! instead of `-change`. Relative rpath directives are added for every
//! configured search directory, anchored both at `@executable_path` and
//! `@loader_path`, and build-time absolute rpaths are deleted.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::Path;

use super::Relocator;
use crate::config::StageConfig;
use crate::metadata::macho::{lib_name, parse_load_commands};
use crate::process::Cmd;
use crate::tree::DistributionTree;

pub struct MachORelocator;

impl Relocator for MachORelocator {
    fn bake(&self, path: &Path, tree: &DistributionTree, config: &StageConfig) -> Result<bool> {
        let output = Cmd::new("otool").arg("-l").arg_path(path).allow_fail().run()?;
        if !output.success() {
            return Ok(false);
        }
        let commands = parse_load_commands(&output.stdout);
        let mut changed = false;

        // Own identity rewrites through the install-name mechanism.
        if let Some(id) = &commands.id {
            let name = lib_name(id);
            if !id.starts_with("@rpath/") && target_in_tree(path, tree, config, &name) {
                change_command(path, &["-id", &format!("@rpath/{name}")])?;
                changed = true;
            }
        }

        for recorded in &commands.loads {
            if recorded.starts_with('@') {
                continue;
            }
            let name = lib_name(recorded);
            if !target_in_tree(path, tree, config, &name) {
                continue;
            }
            change_command(path, &["-change", recorded, &format!("@rpath/{name}")])?;
            changed = true;
        }

        let existing: BTreeSet<&str> = commands.rpaths.iter().map(String::as_str).collect();
        for rel in &config.relative_search_dirs {
            for anchor in ["@executable_path", "@loader_path"] {
                let rpath = format!("{anchor}/{rel}");
                if existing.contains(rpath.as_str()) {
                    continue;
                }
                change_command(path, &["-add_rpath", &rpath])?;
                changed = true;
            }
        }

        for rpath in &commands.rpaths {
            let within_tree = config
                .build_roots()
                .iter()
                .any(|root| Path::new(rpath).starts_with(root));
            if !within_tree {
                continue;
            }
            match change_command(path, &["-delete_rpath", rpath]) {
                Ok(()) => changed = true,
                // A stale extra rpath is harmless; a missing one is not.
                Err(err) => println!(
                    "  Warning: could not delete rpath {} from {}: {:#}",
                    rpath,
                    path.display(),
                    err
                ),
            }
        }

        if changed {
            resign(path);
        }
        Ok(changed)
    }
}

/// True when `name` is reachable from the binary through one of the
/// configured relative search directories, or sits in the tree's `lib/`.
fn target_in_tree(path: &Path, tree: &DistributionTree, config: &StageConfig, name: &str) -> bool {
    let from_binary = config.relative_search_dirs.iter().any(|rel| {
        path.parent()
            .map(|dir| dir.join(rel).join(name))
            .is_some_and(|candidate| candidate.exists())
    });
    from_binary || tree.lib().join(name).exists()
}

fn change_command(path: &Path, args: &[&str]) -> Result<()> {
    Cmd::new("install_name_tool")
        .args(args.iter().copied())
        .arg_path(path)
        .run()
        .with_context(|| format!("install_name_tool on {}", path.display()))?;
    Ok(())
}

/// Ad-hoc re-sign after edits; required on arm64 Macs. Best effort.
fn resign(path: &Path) {
    let _ = Cmd::new("codesign")
        .args([
            "-s",
            "-",
            "--force",
            "--preserve-metadata=entitlements,requirements,flags,runtime",
        ])
        .arg_path(path)
        .allow_fail()
        .run();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_target_in_tree_checks_relative_dirs() {
        let temp = TempDir::new().unwrap();
        let tree = DistributionTree::create(temp.path(), "app").unwrap();
        let config = StageConfig::for_platform(
            temp.path().join("install"),
            crate::config::Platform::MacOs,
        );
        fs::write(tree.lib().join("libbar.2.dylib"), b"lib").unwrap();

        let binary = tree.libexec().join("server");
        assert!(target_in_tree(&binary, &tree, &config, "libbar.2.dylib"));
        assert!(!target_in_tree(&binary, &tree, &config, "libmissing.dylib"));
    }
}
