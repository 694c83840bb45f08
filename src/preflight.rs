//! Preflight checks for a staging run.
//!
//! Validates that every external tool the pipeline shells out to is
//! actually installed, before any file is copied. A missing required tool
//! fails the check; tools only needed by optional steps warn.

use std::path::Path;

use crate::config::{Platform, StageConfig};

/// Result of a single preflight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    /// Check passed.
    Pass,
    /// Check failed - staging will fail.
    Fail,
    /// Check passed but with a warning.
    Warn,
}

impl CheckResult {
    fn pass_with(name: &str, details: String) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Pass,
            details: Some(details),
        }
    }

    fn fail(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Fail,
            details: Some(details.to_string()),
        }
    }

    fn warn(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warn,
            details: Some(details.to_string()),
        }
    }
}

/// Results of all preflight checks.
#[derive(Debug)]
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    /// Returns true if all checks passed (no failures).
    pub fn all_passed(&self) -> bool {
        !self.checks.iter().any(|c| c.status == CheckStatus::Fail)
    }

    /// Count of failed checks.
    pub fn fail_count(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail)
            .count()
    }

    /// Print the report to stdout.
    pub fn print(&self) {
        println!("=== Preflight Check Results ===\n");
        for check in &self.checks {
            let status = match check.status {
                CheckStatus::Pass => "PASS",
                CheckStatus::Fail => "FAIL",
                CheckStatus::Warn => "WARN",
            };
            match &check.details {
                Some(details) => println!("  [{}] {}: {}", status, check.name, details),
                None => println!("  [{}] {}", status, check.name),
            }
        }
        println!();
    }
}

/// Tools the pipeline cannot run without, per platform.
fn required_tools(platform: Platform) -> &'static [&'static str] {
    match platform {
        Platform::Linux => &["readelf", "ldd", "patchelf"],
        Platform::MacOs => &["otool", "install_name_tool", "codesign"],
    }
}

/// Check every external tool and the configured roots.
pub fn run_checks(config: &StageConfig) -> PreflightReport {
    let mut checks = Vec::new();

    for tool in required_tools(config.platform) {
        checks.push(check_tool(tool, true));
    }
    if config.platform == Platform::Linux && config.split_debug_info {
        for tool in ["objcopy", "strip"] {
            checks.push(check_tool(tool, true));
        }
    }
    // The sniffer has an in-process fallback, so its absence only degrades.
    checks.push(check_tool("file", false));

    checks.push(check_dir("install root", &config.install_root, true));
    if let Some(depends) = &config.depends_root {
        checks.push(check_dir("depends root", depends, false));
    }

    PreflightReport { checks }
}

fn check_tool(tool: &str, required: bool) -> CheckResult {
    match which::which(tool) {
        Ok(path) => CheckResult::pass_with(tool, path.display().to_string()),
        Err(_) if required => CheckResult::fail(tool, "not found in PATH"),
        Err(_) => CheckResult::warn(tool, "not found in PATH (degraded sniffing)"),
    }
}

fn check_dir(name: &str, path: &Path, required: bool) -> CheckResult {
    if path.is_dir() {
        CheckResult::pass_with(name, path.display().to_string())
    } else if required {
        CheckResult::fail(name, &format!("missing: {}", path.display()))
    } else {
        CheckResult::warn(name, &format!("missing: {}", path.display()))
    }
}
