//! Shared test utilities for stagehand tests.

#![allow(dead_code)]

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use stagehand::metadata::{BinaryMetadata, MetadataReader, ScanContext};
use stagehand::{DistributionTree, Platform, Registry, StageConfig};

/// Marker the stub reader recognizes in place of real object magic.
pub const STUB_MAGIC: &str = "!stub-bin";

/// Test environment: an install root, a depends root and a distribution
/// tree, all inside one temp dir.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    pub install_root: PathBuf,
    pub depends_root: PathBuf,
    pub dist_root: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path();
        let install_root = base.join("install");
        let depends_root = base.join("depends");
        let dist_root = base.join("dist");

        for dir in [
            install_root.join("bin"),
            install_root.join("lib"),
            depends_root.join("lib"),
            dist_root.clone(),
        ] {
            fs::create_dir_all(&dir).expect("Failed to create test dir");
        }

        Self {
            _temp_dir: temp_dir,
            install_root,
            depends_root,
            dist_root,
        }
    }

    pub fn config(&self) -> StageConfig {
        StageConfig::for_platform(&self.install_root, Platform::Linux)
            .with_depends_root(&self.depends_root)
    }

    /// Registry over a fresh tree, scanning through the stub reader.
    pub fn registry(&self, name: &str) -> Registry {
        let tree = DistributionTree::create(&self.dist_root, name).unwrap();
        Registry::with_reader(tree, self.config(), Box::new(StubReader))
    }
}

/// Write a stub "binary" whose declared linkage the [`StubReader`] parses
/// from the file body.
pub fn write_stub_binary(path: &Path, soname: Option<&str>, needs: &[&str]) {
    let mut content = format!("{STUB_MAGIC}\n");
    if let Some(soname) = soname {
        content.push_str(&format!("soname={soname}\n"));
    }
    for need in needs {
        content.push_str(&format!("needs={need}\n"));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

/// Metadata reader for stub binaries, so registry and resolver behavior is
/// exercised without binutils or real ELF fixtures on the test host.
pub struct StubReader;

impl MetadataReader for StubReader {
    fn read(&self, path: &Path, _ctx: &ScanContext<'_>) -> Result<Option<BinaryMetadata>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return Ok(None),
        };
        if !content.starts_with(STUB_MAGIC) {
            return Ok(None);
        }

        let mut meta = BinaryMetadata::default();
        for line in content.lines().skip(1) {
            if let Some(value) = line.strip_prefix("soname=") {
                meta.soname = Some(value.to_string());
            } else if let Some(value) = line.strip_prefix("needs=") {
                meta.needed.push(value.to_string());
            }
        }
        Ok(Some(meta))
    }
}
