//! ELF dynamic-section reading via `readelf`, with `ldd`-assisted
//! resolution.
//!
//! `readelf -d` reads the headers directly without executing the binary, so
//! it stays correct for artifacts built for another architecture (unlike
//! `ldd`, which runs the host dynamic linker). `ldd` is still consulted for
//! name-to-path resolution where its answers fall inside the caller's
//! search path; everything else goes through a directory probe that mirrors
//! the loader's order, restricted to the supplied directories.

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{BinaryMetadata, MetadataReader, ObjectKind, ScanContext};
use crate::process::Cmd;

pub struct ElfReader;

impl MetadataReader for ElfReader {
    fn read(&self, path: &Path, ctx: &ScanContext<'_>) -> Result<Option<BinaryMetadata>> {
        if super::object_kind(path) != Some(ObjectKind::Elf) {
            return Ok(None);
        }

        let output = Cmd::new("readelf").arg("-d").arg_path(path).allow_fail().run()?;
        if !output.success() {
            // ELF magic but no readable dynamic section: statically linked
            // or truncated. Nothing to scan either way.
            return Ok(None);
        }

        let dynamic = parse_dynamic_section(&output.stdout);

        let origin = path.parent().unwrap_or(Path::new("."));
        let mut embedded_dirs = Vec::new();
        let mut rpaths_within_tree = Vec::new();
        let mut rpaths_portable = Vec::new();
        for rpath in &dynamic.rpaths {
            if ctx
                .build_roots
                .iter()
                .any(|root| Path::new(rpath).starts_with(root))
            {
                rpaths_within_tree.push(rpath.clone());
            } else {
                rpaths_portable.push(rpath.clone());
            }
            // $ORIGIN directives still participate in resolution, anchored
            // at the file's own directory.
            let expanded = rpath.replace("$ORIGIN", &origin.to_string_lossy());
            embedded_dirs.push(PathBuf::from(expanded));
        }

        let libs = resolve_libs(path, &dynamic.needed, &embedded_dirs, ctx);

        Ok(Some(BinaryMetadata {
            soname: dynamic.soname,
            needed: dynamic.needed,
            libs,
            rpaths_within_tree,
            rpaths_portable,
        }))
    }
}

/// The dynamic-section entries staging cares about.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DynamicSection {
    /// NEEDED entries in declaration order, duplicates preserved.
    pub needed: Vec<String>,
    /// The single optional SONAME.
    pub soname: Option<String>,
    /// RPATH/RUNPATH directives, colon-split, in declaration order.
    pub rpaths: Vec<String>,
}

/// Parse `readelf -d` output.
///
/// Example:
/// ```text
/// Dynamic section at offset 0x2d0e0 contains 28 entries:
///   Tag        Type                         Name/Value
///  0x0000000000000001 (NEEDED)             Shared library: [libtinfo.so.6]
///  0x000000000000000e (SONAME)             Library soname: [libfoo.so.1]
///  0x000000000000001d (RUNPATH)            Library runpath: [/opt/build/lib:$ORIGIN/../lib]
/// ```
pub fn parse_dynamic_section(output: &str) -> DynamicSection {
    let mut section = DynamicSection::default();

    for line in output.lines() {
        if let Some(name) = bracketed(line) {
            if line.contains("(NEEDED)") {
                section.needed.push(name.to_string());
            } else if line.contains("(SONAME)") {
                section.soname = Some(name.to_string());
            } else if line.contains("(RPATH)") || line.contains("(RUNPATH)") {
                section
                    .rpaths
                    .extend(name.split(':').filter(|s| !s.is_empty()).map(String::from));
            }
        }
    }

    section
}

/// Extract the `[...]` payload readelf puts around names.
fn bracketed(line: &str) -> Option<&str> {
    let start = line.find('[')?;
    let end = line.rfind(']')?;
    (end > start).then(|| &line[start + 1..end])
}

/// Parse `ldd` output into name -> resolved path.
///
/// Lines look like `libc.so.6 => /lib64/libc.so.6 (0x...)`; the bare
/// interpreter line `/lib64/ld-linux-x86-64.so.2 (0x...)` maps under its
/// file name. Virtual entries (vdso) and `not found` markers are skipped;
/// a missing answer here just falls back to the directory probe.
pub fn parse_ldd_output(output: &str) -> BTreeMap<String, PathBuf> {
    let mut libs = BTreeMap::new();

    for line in output.lines() {
        let line = line.trim();
        if line.contains("vdso") || line.contains("not found") {
            continue;
        }

        if let Some((name, rest)) = line.split_once("=>") {
            let name = name.trim();
            if let Some(path) = rest.split_whitespace().next() {
                if path.starts_with('/') {
                    libs.insert(name.to_string(), PathBuf::from(path));
                }
            }
        } else if line.starts_with('/') {
            if let Some(path) = line.split_whitespace().next() {
                if let Some(name) = Path::new(path).file_name().and_then(|n| n.to_str()) {
                    libs.insert(name.to_string(), PathBuf::from(path));
                }
            }
        }
    }

    libs
}

/// Resolve each NEEDED name to a concrete path, restricted to the supplied
/// directories. Embedded rpath directories come first, matching the
/// loader's order.
fn resolve_libs(
    path: &Path,
    needed: &[String],
    embedded_dirs: &[PathBuf],
    ctx: &ScanContext<'_>,
) -> BTreeMap<String, PathBuf> {
    let ldd_view = match Cmd::new("ldd").arg_path(path).allow_fail().run() {
        Ok(result) if result.success() => parse_ldd_output(&result.stdout),
        _ => BTreeMap::new(),
    };

    let mut libs = BTreeMap::new();
    for name in needed {
        if libs.contains_key(name) {
            continue;
        }
        // ldd answers count only when they land inside the caller's world.
        if let Some(found) = ldd_view.get(name) {
            let inside = ctx
                .search_dirs
                .iter()
                .chain(ctx.build_roots.iter())
                .any(|dir| found.starts_with(dir));
            if inside {
                libs.insert(name.clone(), found.clone());
                continue;
            }
        }
        for dir in embedded_dirs.iter().chain(ctx.search_dirs.iter()) {
            let candidate = dir.join(name);
            if candidate.exists() || candidate.is_symlink() {
                libs.insert(name.clone(), candidate);
                break;
            }
        }
    }
    libs
}
