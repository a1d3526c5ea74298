//! Host facts consumed by the planner
//!
//! The planner never looks at the machine it runs on: it takes an
//! `OsFacts` value. That value is either supplied by the orchestration tool
//! (as JSON) or detected here from the running host.
//!
//! # Design
//!
//! - **No shelling out for OS facts**: `/etc/os-release` is parsed directly
//! - **Safe defaults**: missing optional facts fall back with a warning
//! - **One exception**: the installed-version fact runs `<binary> version`,
//!   since the binary is the only authority on its own version

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::types::{OsFamily, Version};

/// Facts about the target host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OsFacts {
    /// OS family (Debian, RedHat, Archlinux)
    pub family: OsFamily,
    /// Major release number; rolling distributions have none
    #[serde(default)]
    pub major_release: Option<u32>,
    /// Release codename (e.g. `bookworm`), needed for APT sources
    #[serde(default)]
    pub codename: Option<String>,
    /// Machine architecture as reported by the kernel (`x86_64`, `aarch64`)
    #[serde(default = "default_architecture")]
    pub architecture: String,
    /// Kernel name in release-archive form (`linux`)
    #[serde(default = "default_kernel")]
    pub kernel: String,
    /// Number of online processors
    pub cpu_count: u32,
    /// Whether file capabilities can be managed (`setcap` available)
    #[serde(default = "default_true")]
    pub capability_tooling: bool,
    /// Version of an already installed server binary, if any
    #[serde(default)]
    pub installed_version: Option<Version>,
}

fn default_architecture() -> String {
    "x86_64".to_string()
}

fn default_kernel() -> String {
    "linux".to_string()
}

fn default_true() -> bool {
    true
}

impl OsFacts {
    /// Minimal fact set for a family, with every optional fact defaulted.
    pub fn new(family: OsFamily, cpu_count: u32) -> Self {
        Self {
            family,
            major_release: None,
            codename: None,
            architecture: default_architecture(),
            kernel: default_kernel(),
            cpu_count,
            capability_tooling: true,
            installed_version: None,
        }
    }

    /// Load facts from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read facts from {:?}", path.as_ref()))?;

        let facts: Self = serde_json::from_str(&content).context("Failed to parse facts JSON")?;

        Ok(facts)
    }

    /// Detect facts on the running host.
    ///
    /// `binary` is the server binary to query for the installed-version
    /// fact; pass `None` to skip that probe.
    pub fn detect(binary: Option<&Path>) -> Result<Self> {
        let os_release = fs::read_to_string("/etc/os-release")
            .context("Failed to read /etc/os-release")?;
        let release = parse_os_release(&os_release)?;

        let cpu_count = std::thread::available_parallelism()
            .map(|n| u32::try_from(n.get()).unwrap_or(u32::MAX))
            .unwrap_or_else(|e| {
                tracing::warn!("Could not detect CPU count, assuming 1: {}", e);
                1
            });

        let facts = Self {
            family: release.family,
            major_release: release.major_release,
            codename: release.codename,
            architecture: std::env::consts::ARCH.to_string(),
            kernel: std::env::consts::OS.to_string(),
            cpu_count,
            capability_tooling: find_in_path("setcap").is_some(),
            installed_version: binary.and_then(detect_installed_version),
        };

        tracing::info!("Host facts detected: {}", facts);
        Ok(facts)
    }
}

impl fmt::Display for OsFacts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "family={}", self.family)?;
        if let Some(major) = self.major_release {
            write!(f, ", release={}", major)?;
        }
        write!(
            f,
            ", arch={}, cpus={}, setcap={}",
            self.architecture, self.cpu_count, self.capability_tooling
        )?;
        if let Some(v) = &self.installed_version {
            write!(f, ", installed={}", v)?;
        }
        Ok(())
    }
}

/// Release facts extracted from `/etc/os-release`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsRelease {
    pub family: OsFamily,
    pub major_release: Option<u32>,
    pub codename: Option<String>,
}

// ============================================================================
// Detection Functions
// ============================================================================

/// Parse the contents of an os-release file.
///
/// The family is taken from `ID`, falling back to the entries of `ID_LIKE`
/// in order. The major release is the leading number of `VERSION_ID`.
pub fn parse_os_release(content: &str) -> Result<OsRelease> {
    let field = |key: &str| -> Option<String> {
        content.lines().find_map(|line| {
            let (k, v) = line.split_once('=')?;
            (k.trim() == key).then(|| v.trim().trim_matches('"').trim_matches('\'').to_string())
        })
    };

    let id = field("ID").unwrap_or_default();
    let id_like = field("ID_LIKE").unwrap_or_default();

    let family = std::iter::once(id.as_str())
        .chain(id_like.split_whitespace())
        .find_map(family_for_id)
        .with_context(|| format!("Unsupported operating system: ID={:?} ID_LIKE={:?}", id, id_like))?;

    let major_release = field("VERSION_ID").and_then(|v| {
        v.split('.')
            .next()
            .and_then(|major| major.parse::<u32>().ok())
    });

    let codename = field("VERSION_CODENAME").filter(|c| !c.is_empty());

    Ok(OsRelease {
        family,
        major_release,
        codename,
    })
}

fn family_for_id(id: &str) -> Option<OsFamily> {
    match id {
        "debian" | "ubuntu" => Some(OsFamily::Debian),
        "rhel" | "centos" | "fedora" | "rocky" | "almalinux" | "ol" => Some(OsFamily::RedHat),
        "arch" | "archlinux" | "manjaro" => Some(OsFamily::Archlinux),
        _ => None,
    }
}

/// Extract the version from `bao version` output (`OpenBao v2.0.0 (...)`).
pub fn parse_version_output(output: &str) -> Option<Version> {
    let re = Regex::new(r"(?i)openbao v(\d+\.\d+\.\d+(?:-[0-9A-Za-z.]+)?)").ok()?;
    let captures = re.captures(output)?;
    captures.get(1)?.as_str().parse().ok()
}

/// Ask an installed binary for its version.
///
/// Returns `None` when the binary is absent, fails, or prints something
/// unrecognisable; an unknown version never blocks planning.
pub fn detect_installed_version(binary: &Path) -> Option<Version> {
    if !binary.exists() {
        tracing::debug!("No installed binary at {}", binary.display());
        return None;
    }

    match Command::new(binary).arg("version").output() {
        Ok(output) if output.status.success() => {
            let version = parse_version_output(&String::from_utf8_lossy(&output.stdout));
            if version.is_none() {
                tracing::warn!("Unrecognised version output from {}", binary.display());
            }
            version
        }
        Ok(output) => {
            tracing::warn!("{} version exited with {}", binary.display(), output.status);
            None
        }
        Err(e) => {
            tracing::warn!("Failed to run {} version: {}", binary.display(), e);
            None
        }
    }
}

/// Locate an executable in `PATH` or the sbin directories.
fn find_in_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH").unwrap_or_default();
    std::env::split_paths(&path)
        .chain(["/usr/sbin", "/sbin"].iter().map(PathBuf::from))
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

// ============================================================================
// Tests
// ============================================================================
