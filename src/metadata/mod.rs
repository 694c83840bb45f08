//! Reading a binary's declared dependencies and search directives.
//!
//! Recognition goes by content, never by extension: magic bytes decide
//! whether a file is an ELF or Mach-O object, and the `file` sniffer decides
//! text-ness for the bake pass. Reading is strictly side-effect free.

pub mod elf;
pub mod macho;

use anyhow::Result;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::config::Platform;
use crate::process::Cmd;

pub use elf::ElfReader;
pub use macho::MachOReader;

/// What a binary object declares about its runtime linkage.
///
/// Derived data: recomputed by re-reading the file after every copy, never
/// stored across runs.
#[derive(Debug, Clone, Default)]
pub struct BinaryMetadata {
    /// The identity this file exports: the ELF SONAME, or the Mach-O
    /// install name as recorded (a full path for dylibs). None for
    /// executables.
    pub soname: Option<String>,
    /// Required library names in declaration order, duplicates preserved.
    /// Populated by the ELF backend; the Mach-O backend records name->path
    /// pairs in `libs` instead.
    pub needed: Vec<String>,
    /// Required library name -> the path currently recorded (Mach-O) or
    /// resolved for it (ELF). Names that resolve nowhere are absent.
    pub libs: BTreeMap<String, PathBuf>,
    /// Embedded search directives pointing into the original build/install
    /// directories. Deleted at bake time.
    pub rpaths_within_tree: Vec<String>,
    /// Embedded search directives that are already portable. Left alone.
    pub rpaths_portable: Vec<String>,
}

impl BinaryMetadata {
    /// Names this binary requires. Declaration order on ELF; sorted names
    /// on Mach-O, where only the recorded pairs exist.
    pub fn required_names(&self) -> Vec<String> {
        if !self.needed.is_empty() {
            self.needed.clone()
        } else {
            self.libs.keys().cloned().collect()
        }
    }

    /// The plain library name of this file's identity, if it has one.
    /// On Mach-O the recorded install name is a path; dependents refer to
    /// it by its trailing name (or framework segment).
    pub fn identity_name(&self) -> Option<String> {
        self.soname.as_deref().map(macho::lib_name)
    }
}

/// Everything a reader needs besides the file itself.
pub struct ScanContext<'a> {
    /// Directories used to resolve required names to concrete paths.
    pub search_dirs: &'a [PathBuf],
    /// Original build/install directories; directives pointing here are
    /// classified for deletion.
    pub build_roots: &'a [PathBuf],
}

/// Platform-specific metadata extraction. One implementation is selected at
/// startup and used for the whole run.
pub trait MetadataReader {
    /// Read `path`'s linkage metadata. `Ok(None)` when the file is not a
    /// recognized binary object: the caller treats it as opaque data and
    /// skips dependency scanning.
    fn read(&self, path: &Path, ctx: &ScanContext<'_>) -> Result<Option<BinaryMetadata>>;
}

/// The reader for the configured target platform.
pub fn reader_for(platform: Platform) -> Box<dyn MetadataReader> {
    match platform {
        Platform::Linux => Box::new(ElfReader),
        Platform::MacOs => Box::new(MachOReader),
    }
}

/// Object format detected from magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Elf,
    MachO,
}

/// Sniff the object format from the first four bytes. None for anything
/// that is not an ELF or Mach-O file.
pub fn object_kind(path: &Path) -> Option<ObjectKind> {
    let mut file = File::open(path).ok()?;
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic).ok()?;
    match magic {
        [0x7f, b'E', b'L', b'F'] => Some(ObjectKind::Elf),
        // feedface, feedfacf, cafebabe (universal) and byte-swapped forms
        [0xfe, 0xed, 0xfa, 0xce]
        | [0xfe, 0xed, 0xfa, 0xcf]
        | [0xcf, 0xfa, 0xed, 0xfe]
        | [0xce, 0xfa, 0xed, 0xfe]
        | [0xca, 0xfe, 0xba, 0xbe] => Some(ObjectKind::MachO),
        _ => None,
    }
}

/// Mutually exclusive classification for the bake pass, decided once per
/// file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileClass {
    /// A recognized binary object; only the relocator may touch it.
    Object(ObjectKind),
    /// Plain text; only the path rewriter may touch it.
    Text,
    /// Neither; left alone.
    Opaque,
}

/// Classify a file by content. Magic bytes decide binaries outright; the
/// `file` sniffer decides text-ness, with a null-byte heuristic standing in
/// when the sniffer is not installed.
pub fn classify(path: &Path) -> FileClass {
    if let Some(kind) = object_kind(path) {
        return FileClass::Object(kind);
    }

    let sniffed = Cmd::new("file")
        .args(["--brief", "--mime-type"])
        .arg_path(path)
        .allow_fail()
        .run();
    match sniffed {
        Ok(result) if result.success() => {
            let mime = result.stdout_trimmed();
            if mime.starts_with("text/") || mime.ends_with("/x-empty") {
                FileClass::Text
            } else {
                FileClass::Opaque
            }
        }
        _ => {
            if looks_like_text(path) {
                FileClass::Text
            } else {
                FileClass::Opaque
            }
        }
    }
}

/// Fallback text heuristic: a non-empty leading chunk with no null bytes.
fn looks_like_text(path: &Path) -> bool {
    let Ok(mut file) = File::open(path) else {
        return false;
    };
    let mut buf = [0u8; 1024];
    match file.read(&mut buf) {
        Ok(n) if n > 0 => !buf[..n].contains(&0),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_object_kind_elf_magic() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("fake-elf");
        fs::write(&path, [0x7f, b'E', b'L', b'F', 2, 1, 1, 0]).unwrap();
        assert_eq!(object_kind(&path), Some(ObjectKind::Elf));
    }

    #[test]
    fn test_object_kind_macho_magic() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("fake-dylib");
        fs::write(&path, [0xcf, 0xfa, 0xed, 0xfe, 0, 0, 0, 0]).unwrap();
        assert_eq!(object_kind(&path), Some(ObjectKind::MachO));
    }

    #[test]
    fn test_object_kind_rejects_text_and_short_files() {
        let temp = TempDir::new().unwrap();
        let text = temp.path().join("script.sh");
        fs::write(&text, b"#!/bin/sh\necho hi\n").unwrap();
        assert_eq!(object_kind(&text), None);

        let short = temp.path().join("tiny");
        fs::write(&short, b"ab").unwrap();
        assert_eq!(object_kind(&short), None);
    }

    #[test]
    fn test_classify_is_mutually_exclusive() {
        let temp = TempDir::new().unwrap();
        let elf = temp.path().join("bin");
        fs::write(&elf, [0x7f, b'E', b'L', b'F', 2, 1, 1, 0]).unwrap();
        let text = temp.path().join("notes.la");
        fs::write(&text, b"# libtool library file\nlibdir='/usr/lib'\n").unwrap();

        assert_eq!(classify(&elf), FileClass::Object(ObjectKind::Elf));
        assert_eq!(classify(&text), FileClass::Text);
    }

    #[test]
    fn test_required_names_prefers_needed_order() {
        let mut meta = BinaryMetadata::default();
        meta.needed = vec!["libz.so.1".into(), "liba.so".into(), "libz.so.1".into()];
        meta.libs.insert("liba.so".into(), PathBuf::from("/x/liba.so"));
        assert_eq!(
            meta.required_names(),
            vec!["libz.so.1", "liba.so", "libz.so.1"]
        );
    }

    #[test]
    fn test_identity_name_strips_install_path() {
        let mut meta = BinaryMetadata::default();
        meta.soname = Some("/build/install/lib/libfoo.1.dylib".into());
        assert_eq!(meta.identity_name().as_deref(), Some("libfoo.1.dylib"));

        meta.soname = Some("libbar.so.2".into());
        assert_eq!(meta.identity_name().as_deref(), Some("libbar.so.2"));
    }
}
