//! Rewrites build-machine paths leaked into text files.
//!
//! Libtool archives, pkg-config files, qmake `.pri` files, headers and
//! shell scripts all embed absolute install paths. Any absolute path that
//! runs through the build-root marker and into an `install/<layout>`
//! segment is rewritten to its `/usr` equivalent so the shipped tree never
//! names the build machine.

use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::path::Path;

/// Pattern matching `/.../<marker>.../install/(bin|lib|libexec|include|share|plugins)`.
pub fn build_path_regex(marker: &str) -> Regex {
    let pattern = format!(
        r#"/[^\s"':;]*{}[^\s"':;]*/install/(bin|lib|libexec|include|share|plugins)"#,
        regex::escape(marker)
    );
    Regex::new(&pattern).expect("build path pattern is valid")
}

/// Rewrite matches in one file. Returns true when the file changed.
/// Non-UTF-8 content is left untouched.
pub fn rewrite_build_paths(path: &Path, pattern: &Regex) -> Result<bool> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return Ok(false),
    };

    let rewritten = match pattern.replace_all(&content, "/usr/$1") {
        std::borrow::Cow::Borrowed(_) => return Ok(false),
        std::borrow::Cow::Owned(rewritten) => rewritten,
    };

    let perms = fs::metadata(path).map(|meta| meta.permissions()).ok();
    fs::write(path, rewritten.as_bytes())
        .with_context(|| format!("Failed to rewrite {}", path.display()))?;
    if let Some(perms) = perms {
        let _ = fs::set_permissions(path, perms);
    }
    Ok(true)
}
