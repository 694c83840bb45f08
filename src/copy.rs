//! Symlink-aware copy policy.
//!
//! Libraries usually arrive as chains (`libfoo.so -> libfoo.so.1 ->
//! libfoo.so.1.2.3`); staging has to land the concrete file plus every link
//! that names it, or dependents looking for the short name break. Copies go
//! hardlink-first with a transparent fallback to a full copy.

use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::StageConfig;
use crate::error::StageError;

/// Symlink-chain hops are capped; a longer chain is a cycle.
const MAX_CHAIN_HOPS: usize = 40;

/// A fully chased symlink chain.
#[derive(Debug, Clone)]
pub struct ResolvedChain {
    /// Every symlink hop in traversal order, with its literal target.
    pub links: Vec<(PathBuf, PathBuf)>,
    /// The concrete file at the end of the chain.
    pub file: PathBuf,
}

impl ResolvedChain {
    /// All member paths: links first, concrete file last.
    pub fn members(&self) -> Vec<&Path> {
        let mut out: Vec<&Path> = self.links.iter().map(|(link, _)| link.as_path()).collect();
        out.push(&self.file);
        out
    }
}

/// Chase `path` through its symlink chain to a concrete file.
///
/// Absolute link targets are tolerated only when they land under one of the
/// configured system prefixes or under a staging source root; anything else
/// would leave the staged tree with an escaping reference, which is fatal.
pub fn resolve_chain(path: &Path, config: &StageConfig) -> Result<ResolvedChain> {
    let mut links = Vec::new();
    let mut current = path.to_path_buf();

    for _ in 0..MAX_CHAIN_HOPS {
        let meta = fs::symlink_metadata(&current)
            .with_context(|| format!("Failed to stat {}", current.display()))?;
        if !meta.file_type().is_symlink() {
            return Ok(ResolvedChain {
                links,
                file: current,
            });
        }

        let target = fs::read_link(&current)
            .with_context(|| format!("Failed to read symlink {}", current.display()))?;
        let next = if target.is_absolute() {
            let tolerated = config
                .system_link_prefixes
                .iter()
                .chain(config.build_roots().iter())
                .any(|prefix| target.starts_with(prefix));
            if !tolerated {
                return Err(StageError::SymlinkEscape {
                    link: current,
                    target,
                }
                .into());
            }
            target.clone()
        } else {
            current
                .parent()
                .with_context(|| format!("Symlink has no parent: {}", current.display()))?
                .join(&target)
        };

        if !next.exists() && !next.is_symlink() {
            bail!(
                "Dangling symlink: {} -> {}",
                current.display(),
                target.display()
            );
        }

        links.push((current, target));
        current = next;
    }

    bail!("Symlink cycle while resolving {}", path.display())
}

/// Sibling files sharing a versioned basename prefix with the chain.
///
/// The prefix is the shortest basename among the chain members, so
/// `libfoo.so.1.2.3` reached via `libfoo.so` picks up `libfoo.so.1` even
/// when that link was never a hop in the chain. A sibling only matches when
/// the prefix is followed by `.` or nothing, so `libfoo.so` never pulls in
/// `libfoobar.so`.
pub fn versioned_siblings(chain: &ResolvedChain) -> Result<Vec<PathBuf>> {
    let members: Vec<&Path> = chain.members();
    let prefix = members
        .iter()
        .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
        .min_by_key(|name| name.len())
        .map(str::to_string);
    let Some(prefix) = prefix else {
        return Ok(Vec::new());
    };

    let dir = match chain.file.parent() {
        Some(dir) => dir,
        None => return Ok(Vec::new()),
    };

    let known: BTreeSet<&Path> = members.iter().copied().collect();
    let mut siblings = Vec::new();
    for entry in fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?
    {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let versioned = name
            .strip_prefix(&prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'));
        if versioned && !known.contains(entry.path().as_path()) {
            siblings.push(entry.path());
        }
    }
    siblings.sort();
    Ok(siblings)
}

/// Copy `src` to `dest`, replacing any existing file.
///
/// A symlink source is dereferenced first so the destination always holds
/// content. Tries a hardlink (free when source and destination share a
/// filesystem) and falls back to a full copy. Only a failed fallback copy is
/// an error.
pub fn stage_file(src: &Path, dest: &Path) -> Result<()> {
    let concrete;
    let src = if src.is_symlink() {
        concrete = fs::canonicalize(src)
            .with_context(|| format!("Failed to resolve {}", src.display()))?;
        concrete.as_path()
    } else {
        src
    };

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    if dest.exists() || dest.is_symlink() {
        fs::remove_file(dest)
            .with_context(|| format!("Failed to replace {}", dest.display()))?;
    }

    if fs::hard_link(src, dest).is_ok() {
        return Ok(());
    }
    fs::copy(src, dest).map_err(|source| StageError::CopyFailed {
        src: src.to_path_buf(),
        dest: dest.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Recreate a symlink at `dest` pointing at `target` (usually a sibling
/// basename, keeping the tree relative).
pub fn recreate_symlink(target: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    if dest.exists() || dest.is_symlink() {
        fs::remove_file(dest)
            .with_context(|| format!("Failed to replace {}", dest.display()))?;
    }
    std::os::unix::fs::symlink(target, dest).with_context(|| {
        format!(
            "Failed to create symlink {} -> {}",
            dest.display(),
            target.display()
        )
    })
}

/// Make a file executable (chmod 755).
pub fn make_executable(path: &Path) -> Result<()> {
    let mut perms = fs::metadata(path)
        .with_context(|| format!("Failed to read metadata: {}", path.display()))?
        .permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)
        .with_context(|| format!("Failed to set permissions: {}", path.display()))?;
    Ok(())
}

/// Write a file with specific Unix permissions, creating parent directories
/// as needed.
pub fn write_file_mode<P: AsRef<Path>, C: AsRef<[u8]>>(
    path: P,
    content: C,
    mode: u32,
) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// Remove dot-prefixed files and directories under `root`. Returns how many
/// entries went away.
pub fn purge_hidden(root: &Path) -> Result<usize> {
    let mut purged = 0;
    let mut victims: Vec<(PathBuf, bool)> = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).into_iter().filter_map(|e| e.ok()) {
        let hidden = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'));
        if hidden {
            victims.push((entry.path().to_path_buf(), entry.file_type().is_dir()));
        }
    }
    // Depth-first removal: a hidden dir may contain hidden entries already
    // listed; removing the dir first would make those removals fail.
    victims.sort_by(|a, b| b.0.components().count().cmp(&a.0.components().count()));
    for (path, is_dir) in victims {
        if !path.exists() && !path.is_symlink() {
            continue;
        }
        if is_dir {
            fs::remove_dir_all(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        } else {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
        purged += 1;
    }
    Ok(purged)
}

/// Normalize permissions across the finished tree: directories and anything
/// already executable get 0755, every other regular file 0644.
pub fn apply_tree_permissions(root: &Path) -> Result<()> {
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_symlink() {
            continue;
        }
        let path = entry.path();
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(_) => continue,
        };
        let mode = if meta.is_dir() || meta.permissions().mode() & 0o111 != 0 {
            0o755
        } else {
            0o644
        };
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .with_context(|| format!("Failed to set permissions: {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Platform, StageConfig};
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn test_config(root: &Path) -> StageConfig {
        StageConfig::for_platform(root, Platform::Linux)
    }

    #[test]
    fn test_resolve_chain_plain_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("libfoo.so.1.2.3");
        fs::write(&file, b"lib").unwrap();

        let chain = resolve_chain(&file, &test_config(temp.path())).unwrap();
        assert!(chain.links.is_empty());
        assert_eq!(chain.file, file);
    }

    #[test]
    fn test_resolve_chain_follows_links() {
        let temp = TempDir::new().unwrap();
        let real = temp.path().join("libfoo.so.1.2.3");
        fs::write(&real, b"lib").unwrap();
        symlink("libfoo.so.1.2.3", temp.path().join("libfoo.so.1")).unwrap();
        symlink("libfoo.so.1", temp.path().join("libfoo.so")).unwrap();

        let chain =
            resolve_chain(&temp.path().join("libfoo.so"), &test_config(temp.path())).unwrap();
        assert_eq!(chain.links.len(), 2);
        assert_eq!(chain.file, real);
    }

    #[test]
    fn test_resolve_chain_rejects_escaping_absolute_link() {
        let temp = TempDir::new().unwrap();
        let outside = temp.path().join("outside");
        fs::write(&outside, b"x").unwrap();
        let link = temp.path().join("libesc.so");
        symlink(&outside, &link).unwrap();

        // The link target is absolute and under neither a system prefix nor
        // a staging root (the config's install root is a subdir).
        let config = test_config(&temp.path().join("install"));
        let err = resolve_chain(&link, &config).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StageError>(),
            Some(StageError::SymlinkEscape { .. })
        ));
    }

    #[test]
    fn test_resolve_chain_dangling_is_fatal() {
        let temp = TempDir::new().unwrap();
        let link = temp.path().join("libgone.so");
        symlink("libgone.so.1", &link).unwrap();

        let err = resolve_chain(&link, &test_config(temp.path())).unwrap_err();
        assert!(err.to_string().contains("Dangling symlink"));
    }

    #[test]
    fn test_versioned_siblings_picks_up_skipped_links() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("libfoo.so.1.2.3"), b"lib").unwrap();
        // libfoo.so points straight at the fully versioned file; libfoo.so.1
        // exists but is not a hop in the chain.
        symlink("libfoo.so.1.2.3", temp.path().join("libfoo.so")).unwrap();
        symlink("libfoo.so.1.2.3", temp.path().join("libfoo.so.1")).unwrap();
        // Different library, shared spelling prefix: must not match.
        fs::write(temp.path().join("libfoobar.so"), b"other").unwrap();

        let chain =
            resolve_chain(&temp.path().join("libfoo.so"), &test_config(temp.path())).unwrap();
        let siblings = versioned_siblings(&chain).unwrap();

        assert_eq!(siblings, vec![temp.path().join("libfoo.so.1")]);
    }

    #[test]
    fn test_stage_file_overwrites() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("new");
        let dest = temp.path().join("dest");
        fs::write(&src, b"new content").unwrap();
        fs::write(&dest, b"old content").unwrap();

        stage_file(&src, &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"new content");
    }

    #[test]
    fn test_purge_hidden() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(".DS_Store"), b"junk").unwrap();
        fs::create_dir_all(temp.path().join(".git/objects")).unwrap();
        fs::write(temp.path().join("keep.txt"), b"keep").unwrap();

        let purged = purge_hidden(temp.path()).unwrap();
        assert!(purged >= 2);
        assert!(!temp.path().join(".DS_Store").exists());
        assert!(!temp.path().join(".git").exists());
        assert!(temp.path().join("keep.txt").exists());
    }

    #[test]
    fn test_apply_tree_permissions() {
        let temp = TempDir::new().unwrap();
        let exe = temp.path().join("tool");
        let data = temp.path().join("readme");
        fs::write(&exe, b"#!/bin/sh\n").unwrap();
        fs::write(&data, b"text").unwrap();
        make_executable(&exe).unwrap();

        apply_tree_permissions(temp.path()).unwrap();
        assert_eq!(fs::metadata(&exe).unwrap().permissions().mode() & 0o777, 0o755);
        assert_eq!(fs::metadata(&data).unwrap().permissions().mode() & 0o777, 0o644);
    }
}
