//! The artifact registry: every file copied into the distribution tree,
//! with source-precedence rules and the dependency-scan side effect.
//!
//! Registration is the only way content enters the tree. Each successful
//! copy of a recognized binary object immediately re-reads the file's
//! metadata and merges its needs into the dependency graph, so the resolver
//! never has to rediscover demand.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::StageConfig;
use crate::copy;
use crate::error::{StageError, UnresolvedDep};
use crate::graph::DependencyGraph;
use crate::manifest::StageManifest;
use crate::metadata::{self, MetadataReader, ScanContext};
use crate::tree::DistributionTree;

/// What a staged file is, for layout and baking decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Executable,
    Library,
    Plugin,
    Data,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Executable => "executable",
            ArtifactKind::Library => "library",
            ArtifactKind::Plugin => "plugin",
            ArtifactKind::Data => "data",
        }
    }
}

/// One file physically present in the tree.
#[derive(Debug, Clone)]
pub struct Artifact {
    /// Absolute pre-copy location.
    pub source_path: PathBuf,
    /// Absolute location inside the tree. Canonical key; unique.
    pub dest_path: PathBuf,
    pub kind: ArtifactKind,
    /// Launcher script in `bin/` for executables whose real binary lives in
    /// `libexec/`.
    pub wrapper_path: Option<PathBuf>,
}

/// How much a source location is trusted when two registrations collide on
/// one destination. Lower is more trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum TrustTier {
    /// The project's own install root.
    Install,
    /// The shared third-party dependency root.
    Depends,
    /// Anywhere else.
    Other,
}

/// The distribution tree plus a record of everything copied into it.
pub struct Registry {
    tree: DistributionTree,
    config: StageConfig,
    reader: Box<dyn MetadataReader>,
    artifacts: BTreeMap<PathBuf, Artifact>,
    graph: DependencyGraph,
    conflicts: usize,
}

impl Registry {
    /// Registry over `tree` with the metadata reader for the configured
    /// target platform.
    pub fn new(tree: DistributionTree, config: StageConfig) -> Self {
        let reader = metadata::reader_for(config.platform);
        Self::with_reader(tree, config, reader)
    }

    /// Registry with an explicit reader backend. The platform backends are
    /// the normal choice; tests inject stub readers here.
    pub fn with_reader(
        tree: DistributionTree,
        config: StageConfig,
        reader: Box<dyn MetadataReader>,
    ) -> Self {
        Self {
            tree,
            config,
            reader,
            artifacts: BTreeMap::new(),
            graph: DependencyGraph::new(),
            conflicts: 0,
        }
    }

    pub fn tree(&self) -> &DistributionTree {
        &self.tree
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub(crate) fn graph_mut(&mut self) -> &mut DependencyGraph {
        &mut self.graph
    }

    /// Registered artifacts in destination order.
    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.values()
    }

    pub fn artifact_count(&self) -> usize {
        self.artifacts.len()
    }

    /// Destination conflicts logged so far (equal trust, different bytes).
    pub fn conflict_count(&self) -> usize {
        self.conflicts
    }

    /// Register an executable.
    ///
    /// The symlink chain is resolved to the concrete binary, which lands in
    /// `libexec/<basename>` with a launcher script in `bin/<basename>`.
    /// Script-language executables (by configured extension) go straight to
    /// `bin/<basename>` with no launcher.
    pub fn add_executable(&mut self, path: &Path) -> Result<()> {
        let name = file_name_string(path)?;
        let chain = copy::resolve_chain(path, &self.config)?;

        if self.config.is_script_name(&name) {
            let dest = self.tree.bin().join(&name);
            if self.stage_file(&chain.file, &dest, ArtifactKind::Executable, true)? {
                copy::make_executable(&dest)?;
                println!("  Staged script: bin/{}", name);
            }
            return Ok(());
        }

        let dest = self.tree.libexec().join(&name);
        if !self.stage_file(&chain.file, &dest, ArtifactKind::Executable, true)? {
            return Ok(());
        }
        copy::make_executable(&dest)?;

        let wrapper = self.tree.bin().join(&name);
        self.tree.ensure_contained(&wrapper)?;
        copy::write_file_mode(&wrapper, launcher_script(&name), 0o755)?;
        if let Some(artifact) = self.artifacts.get_mut(&dest) {
            artifact.wrapper_path = Some(wrapper);
        }
        println!("  Staged executable: libexec/{} (launcher in bin/)", name);
        Ok(())
    }

    /// Register a shared library.
    ///
    /// With `follow_symlinks`, the whole chain is staged along with every
    /// sibling sharing the chain's versioned basename prefix, links
    /// recreated as relative links. `scan_dependencies` controls whether
    /// the file's own needs enter the graph; libraries picked up from
    /// search directories ship as-is with scanning disabled.
    pub fn add_library(
        &mut self,
        path: &Path,
        follow_symlinks: bool,
        scan_dependencies: bool,
        is_plugin: bool,
    ) -> Result<()> {
        let kind = if is_plugin {
            ArtifactKind::Plugin
        } else {
            ArtifactKind::Library
        };
        let dest_dir = if is_plugin {
            self.tree.plugins(&plugin_family(path))
        } else {
            self.tree.lib()
        };

        if !follow_symlinks {
            let name = file_name_string(path)?;
            let dest = dest_dir.join(&name);
            if self.stage_file(path, &dest, kind, scan_dependencies)? {
                copy::make_executable(&dest)?;
            }
            return Ok(());
        }

        let chain = copy::resolve_chain(path, &self.config)?;
        let mut members: Vec<PathBuf> =
            chain.links.iter().map(|(link, _)| link.clone()).collect();
        members.push(chain.file.clone());
        members.extend(copy::versioned_siblings(&chain)?);
        members.sort();
        members.dedup();

        for member in &members {
            let name = file_name_string(member)?;
            let dest = dest_dir.join(&name);
            if member.is_symlink() {
                self.stage_symlink(member, &dest, kind)?;
            } else if self.stage_file(member, &dest, kind, scan_dependencies)? {
                copy::make_executable(&dest)?;
            }
        }
        Ok(())
    }

    /// Copy a single file into the tree. No dependency scanning.
    pub fn add_file(&mut self, src: &Path, dest_subpath: impl AsRef<Path>) -> Result<()> {
        let dest = self.tree.join(dest_subpath);
        self.stage_file(src, &dest, ArtifactKind::Data, false)?;
        Ok(())
    }

    /// Copy a directory into the tree, path-preserving. No dependency
    /// scanning.
    pub fn add_directory(&mut self, src: &Path, dest_subpath: impl AsRef<Path>) -> Result<()> {
        let dest_root = self.tree.join(dest_subpath);
        for entry in WalkDir::new(src).into_iter().filter_map(|e| e.ok()) {
            let rel = entry
                .path()
                .strip_prefix(src)
                .with_context(|| format!("Failed to relativize {}", entry.path().display()))?;
            if rel.as_os_str().is_empty() {
                continue;
            }
            let dest = dest_root.join(rel);
            if entry.file_type().is_dir() {
                self.tree.ensure_contained(&dest)?;
                fs::create_dir_all(&dest)?;
            } else if entry.file_type().is_symlink() {
                self.stage_symlink(entry.path(), &dest, ArtifactKind::Data)?;
            } else {
                self.stage_file(entry.path(), &dest, ArtifactKind::Data, false)?;
            }
        }
        Ok(())
    }

    /// Unsatisfied library names after discounting what the target OS is
    /// assumed to provide, each with the first artifact that asked for it.
    pub fn unresolved(&self) -> Vec<UnresolvedDep> {
        self.graph
            .outstanding()
            .filter(|name| !self.config.assumed_on_target(name))
            .map(|name| UnresolvedDep {
                name: name.clone(),
                requested_by: self
                    .graph
                    .first_owner(name)
                    .unwrap_or(Path::new("<unknown>"))
                    .to_path_buf(),
            })
            .collect()
    }

    /// Error with every unresolved dependency unless closure is complete.
    pub fn ensure_closed(&self) -> Result<()> {
        let unresolved = self.unresolved();
        if unresolved.is_empty() {
            Ok(())
        } else {
            Err(StageError::UnresolvedDependencies(unresolved).into())
        }
    }

    /// Finish the tree: purge hidden files, write the staging manifest,
    /// normalize permissions.
    pub fn finalize(&self) -> Result<()> {
        let purged = copy::purge_hidden(self.tree.root())?;
        if purged > 0 {
            println!("  Purged {} hidden entries", purged);
        }
        StageManifest::from_registry(self).save(&self.tree.root().join("stage-manifest.json"))?;
        copy::apply_tree_permissions(self.tree.root())?;
        Ok(())
    }

    /// Copy one file into the tree, applying the precedence rule and the
    /// dependency-scan side effect. Returns false when an existing, more
    /// trusted artifact kept the destination.
    fn stage_file(
        &mut self,
        src: &Path,
        dest: &Path,
        kind: ArtifactKind,
        scan_dependencies: bool,
    ) -> Result<bool> {
        self.tree.ensure_contained(dest)?;

        if let Some(existing) = self.artifacts.get(dest) {
            let held = self.trust_tier(&existing.source_path);
            let offered = self.trust_tier(src);
            if offered > held {
                println!(
                    "  Keeping {} from {} (more trusted than {})",
                    dest.display(),
                    existing.source_path.display(),
                    src.display()
                );
                return Ok(false);
            }
            if offered == held {
                if !entries_differ(src, dest)? {
                    return Ok(true);
                }
                // Equal trust, different bytes: deterministic it is not,
                // so log it. Last writer wins.
                println!(
                    "  Warning: conflicting sources for {}: {} replaces {}",
                    dest.display(),
                    src.display(),
                    existing.source_path.display()
                );
                self.conflicts += 1;
            }
        }

        copy::stage_file(src, dest)?;
        self.artifacts.insert(
            dest.to_path_buf(),
            Artifact {
                source_path: src.to_path_buf(),
                dest_path: dest.to_path_buf(),
                kind,
                wrapper_path: None,
            },
        );

        if matches!(kind, ArtifactKind::Library | ArtifactKind::Plugin) {
            let name = file_name_string(dest)?;
            self.graph.record_provided(&name);
        }
        if !matches!(kind, ArtifactKind::Data) {
            self.scan_binary(dest, scan_dependencies)?;
        }
        Ok(true)
    }

    /// Recreate a symlink inside the tree, pointing at its target's
    /// basename so the link stays relative.
    fn stage_symlink(&mut self, src: &Path, dest: &Path, kind: ArtifactKind) -> Result<()> {
        self.tree.ensure_contained(dest)?;

        if let Some(existing) = self.artifacts.get(dest) {
            let held = self.trust_tier(&existing.source_path);
            if self.trust_tier(src) > held {
                return Ok(());
            }
        }

        let target = fs::read_link(src)
            .with_context(|| format!("Failed to read symlink {}", src.display()))?;
        let target_name = target
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| target.clone());
        copy::recreate_symlink(&target_name, dest)?;

        self.artifacts.insert(
            dest.to_path_buf(),
            Artifact {
                source_path: src.to_path_buf(),
                dest_path: dest.to_path_buf(),
                kind,
                wrapper_path: None,
            },
        );
        if matches!(kind, ArtifactKind::Library | ArtifactKind::Plugin) {
            let name = file_name_string(dest)?;
            self.graph.record_provided(&name);
        }
        Ok(())
    }

    /// Re-read a freshly copied file and merge its linkage into the graph.
    /// Unrecognized files are silently skipped.
    fn scan_binary(&mut self, dest: &Path, record_needs: bool) -> Result<()> {
        let search_dirs = self.scan_dirs();
        let build_roots = self.config.build_roots();
        let ctx = ScanContext {
            search_dirs: &search_dirs,
            build_roots: &build_roots,
        };
        let Some(meta) = self.reader.read(dest, &ctx)? else {
            return Ok(());
        };

        let mut own_names = BTreeSet::new();
        own_names.insert(file_name_string(dest)?);
        if let Some(identity) = meta.identity_name() {
            self.graph.record_provided(&identity);
            own_names.insert(identity);
        }
        if record_needs {
            for name in meta.required_names() {
                if own_names.contains(&name) {
                    continue;
                }
                self.graph.record_needed(&name, dest);
            }
        }
        Ok(())
    }

    /// Library directories under the configured roots, for resolving
    /// recorded names while scanning.
    fn scan_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        for root in self.config.build_roots() {
            for sub in ["lib", "lib64"] {
                let dir = root.join(sub);
                if dir.is_dir() {
                    dirs.push(dir);
                }
            }
        }
        dirs.push(self.tree.lib());
        dirs
    }

    fn trust_tier(&self, src: &Path) -> TrustTier {
        if src.starts_with(&self.config.install_root) {
            TrustTier::Install
        } else if self
            .config
            .depends_root
            .as_ref()
            .is_some_and(|root| src.starts_with(root))
        {
            TrustTier::Depends
        } else {
            TrustTier::Other
        }
    }
}

/// Plugin family: the source's parent directory name (Qt-style
/// `plugins/platforms/libqxcb.so` keeps its grouping).
fn plugin_family(path: &Path) -> String {
    path.parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("misc")
        .to_string()
}

fn file_name_string(path: &Path) -> Result<String> {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => Ok(name.to_string()),
        None => bail!("Path has no usable file name: {}", path.display()),
    }
}

/// Byte-compare two entries via content digests. Symlinks compare by their
/// literal targets.
fn entries_differ(src: &Path, dest: &Path) -> Result<bool> {
    if src.is_symlink() || dest.is_symlink() {
        let src_target = fs::read_link(src).ok();
        let dest_target = fs::read_link(dest).ok();
        return Ok(src_target != dest_target);
    }
    Ok(file_digest(src)? != file_digest(dest)?)
}

fn file_digest(path: &Path) -> Result<[u8; 32]> {
    let mut hasher = Sha256::new();
    let mut file = fs::File::open(path)
        .with_context(|| format!("Failed to open {} for hashing", path.display()))?;
    io::copy(&mut file, &mut hasher)
        .with_context(|| format!("Failed to hash {}", path.display()))?;
    Ok(hasher.finalize().into())
}

/// The launcher staged into `bin/` for a wrapped executable.
fn launcher_script(name: &str) -> String {
    format!(
        "#!/bin/sh\nhere=$(CDPATH= cd -- \"$(dirname -- \"$0\")\" && pwd)\nexec \"$here/../libexec/{name}\" \"$@\"\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_family_from_parent_dir() {
        assert_eq!(
            plugin_family(Path::new("/build/plugins/platforms/libqxcb.so")),
            "platforms"
        );
        assert_eq!(plugin_family(Path::new("liblonely.so")), "misc");
    }

    #[test]
    fn test_launcher_script_targets_libexec() {
        let script = launcher_script("server");
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("../libexec/server"));
        assert!(script.contains("\"$@\""));
    }
}
