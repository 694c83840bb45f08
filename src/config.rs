//! Staging configuration.
//!
//! Built from defaults for the target platform, then adjusted from
//! environment variables. A `.env` file is honored; real environment
//! variables take precedence over `.env` entries.

use std::collections::BTreeSet;
use std::env;
use std::path::{Path, PathBuf};

/// Target platform, chosen once at startup. Decides which metadata reader
/// and which relocator the whole run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
}

impl Platform {
    /// Platform of the machine we are running on.
    pub fn host() -> Self {
        if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }
}

/// Configuration for one staging run.
#[derive(Debug, Clone)]
pub struct StageConfig {
    /// Target platform for metadata reading and baking.
    pub platform: Platform,
    /// Install root holding this project's own build output. Most trusted
    /// source when two registrations collide on a destination.
    pub install_root: PathBuf,
    /// Shared third-party dependency root. Trusted, but below `install_root`.
    pub depends_root: Option<PathBuf>,
    /// Library names assumed present on the target operating system. Never
    /// copied into the tree, never reported as unresolved.
    pub system_allowlist: BTreeSet<String>,
    /// Name prefixes copied into the tree even when the allowlist would skip
    /// them. Compiler runtime libraries travel with the tree.
    pub always_copy_prefixes: Vec<String>,
    /// Executables with one of these extensions are copied to `bin/` as-is,
    /// with no launcher. Empty set disables the exception.
    pub script_extensions: BTreeSet<String>,
    /// Absolute symlink targets under these prefixes are tolerated; anything
    /// else escaping the staging sources is fatal.
    pub system_link_prefixes: Vec<PathBuf>,
    /// Substring identifying build-machine paths inside text files; matched
    /// paths are rewritten to their `/usr` equivalents at bake time.
    pub build_root_marker: String,
    /// Library directories the loader should reach relative to a baked
    /// binary's own location.
    pub relative_search_dirs: Vec<String>,
    /// Split debug info out and strip binaries during bake. Off by default:
    /// stripping has corrupted dependent libraries when the tree targets
    /// Linux, so it is only worth enabling for cross-staged trees.
    pub split_debug_info: bool,
}

impl StageConfig {
    /// Defaults for the given install root, targeting the host platform.
    pub fn new(install_root: impl AsRef<Path>) -> Self {
        Self::for_platform(install_root, Platform::host())
    }

    /// Defaults for an explicit target platform.
    pub fn for_platform(install_root: impl AsRef<Path>, platform: Platform) -> Self {
        let system_allowlist: BTreeSet<String> = match platform {
            Platform::Linux => [
                "libc.so.6",
                "libm.so.6",
                "libdl.so.2",
                "libpthread.so.0",
                "librt.so.1",
                "libresolv.so.2",
                "libutil.so.1",
                "ld-linux-x86-64.so.2",
                "linux-vdso.so.1",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            Platform::MacOs => ["libSystem.B.dylib", "libc++.1.dylib", "libobjc.A.dylib"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };

        Self {
            platform,
            install_root: install_root.as_ref().to_path_buf(),
            depends_root: None,
            system_allowlist,
            always_copy_prefixes: vec![
                "libgcc".to_string(),
                "libstdc++".to_string(),
                "libgfortran".to_string(),
                "libquadmath".to_string(),
                "libgomp".to_string(),
            ],
            script_extensions: ["py", "sh", "pl", "rb", "tcl", "bash"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            system_link_prefixes: vec![
                PathBuf::from("/usr/lib"),
                PathBuf::from("/usr/lib64"),
                PathBuf::from("/lib"),
                PathBuf::from("/lib64"),
                PathBuf::from("/System/Library"),
            ],
            build_root_marker: "BinaryBuilder".to_string(),
            relative_search_dirs: vec!["../lib".to_string()],
            split_debug_info: false,
        }
    }

    /// Apply environment overrides.
    ///
    /// Recognized variables:
    /// - `STAGE_PLATFORM` = `linux` | `macos`
    /// - `STAGE_ALLOWLIST` = colon-separated names appended to the allowlist
    /// - `STAGE_ALWAYS_COPY` = colon-separated prefixes appended
    /// - `STAGE_BUILD_ROOT_MARKER` = marker substring for text rewriting
    /// - `STAGE_SPLIT_DEBUG` = `1`/`true` to split debug info and strip
    pub fn apply_env(mut self) -> Self {
        dotenvy::dotenv().ok();

        if let Ok(value) = env::var("STAGE_PLATFORM") {
            match value.to_lowercase().as_str() {
                "linux" => self.platform = Platform::Linux,
                "macos" | "darwin" => self.platform = Platform::MacOs,
                _ => {}
            }
        }
        if let Ok(value) = env::var("STAGE_ALLOWLIST") {
            for name in value.split(':').filter(|s| !s.is_empty()) {
                self.system_allowlist.insert(name.to_string());
            }
        }
        if let Ok(value) = env::var("STAGE_ALWAYS_COPY") {
            for prefix in value.split(':').filter(|s| !s.is_empty()) {
                self.always_copy_prefixes.push(prefix.to_string());
            }
        }
        if let Ok(value) = env::var("STAGE_BUILD_ROOT_MARKER") {
            if !value.is_empty() {
                self.build_root_marker = value;
            }
        }
        if let Ok(value) = env::var("STAGE_SPLIT_DEBUG") {
            self.split_debug_info = value == "1" || value.to_lowercase() == "true";
        }

        self
    }

    /// Set the shared third-party dependency root.
    pub fn with_depends_root(mut self, root: impl AsRef<Path>) -> Self {
        self.depends_root = Some(root.as_ref().to_path_buf());
        self
    }

    /// True when the target operating system is assumed to provide `name`,
    /// so it is neither copied nor reported missing. Names matching an
    /// always-copy prefix are excluded: those ship with the tree no matter
    /// what the allowlist says.
    pub fn assumed_on_target(&self, name: &str) -> bool {
        if self
            .always_copy_prefixes
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()))
        {
            return false;
        }
        self.system_allowlist.contains(name)
    }

    /// Directories considered part of the original build/install tree.
    /// Embedded search directives pointing here get deleted at bake time.
    pub fn build_roots(&self) -> Vec<PathBuf> {
        let mut roots = vec![self.install_root.clone()];
        if let Some(depends) = &self.depends_root {
            roots.push(depends.clone());
        }
        roots
    }

    /// True when `name` carries one of the scripting-language extensions
    /// exempt from the launcher-wrapper policy.
    pub fn is_script_name(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.script_extensions.contains(ext))
    }
}
