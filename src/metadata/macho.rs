//! Mach-O load-command reading via `otool`.
//!
//! `otool -l` dumps every load command; staging cares about three:
//! `LC_ID_DYLIB` (this file's own install name), `LC_LOAD_DYLIB` /
//! `LC_LOAD_WEAK_DYLIB` (recorded dependency paths) and `LC_RPATH`
//! (embedded search directives).

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{BinaryMetadata, MetadataReader, ObjectKind, ScanContext};
use crate::process::Cmd;

pub struct MachOReader;

impl MetadataReader for MachOReader {
    fn read(&self, path: &Path, ctx: &ScanContext<'_>) -> Result<Option<BinaryMetadata>> {
        if super::object_kind(path) != Some(ObjectKind::MachO) {
            return Ok(None);
        }

        let output = Cmd::new("otool").arg("-l").arg_path(path).allow_fail().run()?;
        if !output.success() {
            return Ok(None);
        }

        let commands = parse_load_commands(&output.stdout);

        let mut libs = BTreeMap::new();
        for recorded in &commands.loads {
            libs.insert(lib_name(recorded), PathBuf::from(recorded));
        }

        let mut rpaths_within_tree = Vec::new();
        let mut rpaths_portable = Vec::new();
        for rpath in &commands.rpaths {
            if ctx
                .build_roots
                .iter()
                .any(|root| Path::new(rpath).starts_with(root))
            {
                rpaths_within_tree.push(rpath.clone());
            } else {
                rpaths_portable.push(rpath.clone());
            }
        }

        Ok(Some(BinaryMetadata {
            soname: commands.id,
            needed: Vec::new(),
            libs,
            rpaths_within_tree,
            rpaths_portable,
        }))
    }
}

/// Load commands staging cares about, as recorded in the file.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LoadCommands {
    /// LC_ID_DYLIB install name. None for executables and bundles.
    pub id: Option<String>,
    /// LC_LOAD_DYLIB / LC_LOAD_WEAK_DYLIB paths in declaration order.
    pub loads: Vec<String>,
    /// LC_RPATH directives in declaration order.
    pub rpaths: Vec<String>,
}

/// Parse `otool -l` output.
///
/// Example:
/// ```text
/// Load command 3
///           cmd LC_ID_DYLIB
///       cmdsize 56
///          name /opt/build/install/lib/libfoo.1.dylib (offset 24)
/// Load command 12
///           cmd LC_LOAD_DYLIB
///       cmdsize 56
///          name /usr/lib/libSystem.B.dylib (offset 24)
/// Load command 14
///           cmd LC_RPATH
///       cmdsize 32
///          path @loader_path/../lib (offset 12)
/// ```
pub fn parse_load_commands(output: &str) -> LoadCommands {
    let mut commands = LoadCommands::default();
    let mut current_cmd = "";

    for line in output.lines() {
        let line = line.trim();
        if let Some(cmd) = line.strip_prefix("cmd ") {
            current_cmd = cmd.trim();
            continue;
        }
        if let Some(value) = line.strip_prefix("name ") {
            let value = strip_offset(value);
            match current_cmd {
                "LC_ID_DYLIB" => commands.id = Some(value.to_string()),
                "LC_LOAD_DYLIB" | "LC_LOAD_WEAK_DYLIB" => {
                    commands.loads.push(value.to_string());
                }
                _ => {}
            }
        } else if let Some(value) = line.strip_prefix("path ") {
            if current_cmd == "LC_RPATH" {
                commands.rpaths.push(strip_offset(value).to_string());
            }
        }
    }

    commands
}

/// Drop otool's trailing ` (offset N)` annotation.
fn strip_offset(value: &str) -> &str {
    match value.rfind(" (offset ") {
        Some(pos) => value[..pos].trim(),
        None => value.trim(),
    }
}

/// The name dependents use for a recorded dylib path.
///
/// Normally the trailing file name; for frameworks the identifying segment
/// is the component ending in `.framework`, not the plain basename
/// (`/x/QtCore.framework/Versions/5/QtCore` -> `QtCore.framework`).
pub fn lib_name(recorded: &str) -> String {
    let path = Path::new(recorded);
    for component in path.components() {
        let part = component.as_os_str().to_string_lossy();
        if part.ends_with(".framework") {
            return part.into_owned();
        }
    }
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| recorded.to_string())
}
