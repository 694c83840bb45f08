//! JSON manifest of everything staged into the tree.
//!
//! Written at the tree root during finalization so downstream tooling (and
//! humans) can see what landed where without re-walking the tree.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::registry::Registry;

/// One staged file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Destination, relative to the tree root.
    pub dest: String,
    /// Absolute pre-copy source.
    pub source: String,
    /// executable | library | plugin | data
    pub kind: String,
    /// Launcher script path, relative to the tree root, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrapper: Option<String>,
}

/// The full staging record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageManifest {
    pub artifact_count: usize,
    pub artifacts: Vec<ManifestEntry>,
}

impl StageManifest {
    /// Snapshot the registry's artifact records.
    pub fn from_registry(registry: &Registry) -> Self {
        let tree = registry.tree();
        let artifacts: Vec<ManifestEntry> = registry
            .artifacts()
            .map(|artifact| ManifestEntry {
                dest: tree
                    .relative(&artifact.dest_path)
                    .unwrap_or(&artifact.dest_path)
                    .to_string_lossy()
                    .into_owned(),
                source: artifact.source_path.to_string_lossy().into_owned(),
                kind: artifact.kind.as_str().to_string(),
                wrapper: artifact.wrapper_path.as_ref().map(|wrapper| {
                    tree.relative(wrapper)
                        .unwrap_or(wrapper)
                        .to_string_lossy()
                        .into_owned()
                }),
            })
            .collect();

        Self {
            artifact_count: artifacts.len(),
            artifacts,
        }
    }

    /// Write as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write manifest: {}", path.display()))?;
        Ok(())
    }

    /// Load a previously written manifest.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse manifest: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_roundtrip() {
        let manifest = StageManifest {
            artifact_count: 1,
            artifacts: vec![ManifestEntry {
                dest: "lib/libfoo.so.1".to_string(),
                source: "/build/install/lib/libfoo.so.1".to_string(),
                kind: "library".to_string(),
                wrapper: None,
            }],
        };

        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("stage-manifest.json");
        manifest.save(&path).unwrap();

        let loaded = StageManifest::load(&path).unwrap();
        assert_eq!(loaded.artifact_count, 1);
        assert_eq!(loaded.artifacts[0].dest, "lib/libfoo.so.1");
        assert_eq!(loaded.artifacts[0].kind, "library");
    }
}
