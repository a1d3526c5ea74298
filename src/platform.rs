//! Per-OS-family defaults.
//!
//! Every place the planner would otherwise branch on the OS family reads a
//! row of this table instead. Adding a family means adding a row.
//!
//! | Family    | Default install | Manage repo | Repository | Package bin dir | Capability tooling |
//! |-----------|-----------------|-------------|------------|-----------------|--------------------|
//! | Debian    | archive         | yes         | APT source | `/usr/bin`      | `libcap2-bin`      |
//! | RedHat    | archive         | yes         | YUM repo   | `/usr/bin`      | `libcap`           |
//! | Archlinux | repo            | no          | none       | `/bin`          | `libcap`           |

use crate::types::{InstallMethod, OsFamily};

/// Kind of package repository definition a family supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryKind {
    /// `/etc/apt/sources.list.d` entry with a signing key
    Apt,
    /// `/etc/yum.repos.d` entry with a GPG key
    Yum,
    /// The family's packaging model has no third-party repository for us
    Unsupported,
}

/// Static defaults for one OS family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformDefaults {
    pub family: OsFamily,
    pub install_method: InstallMethod,
    pub manage_repo: bool,
    pub repository: RepositoryKind,
    /// Where the distribution package places the binary
    pub package_bin_dir: &'static str,
    /// Whether the distribution package ships its own service unit
    pub package_ships_unit: bool,
    /// Directory for locally managed systemd units
    pub unit_dir: &'static str,
    /// Package that provides `setcap`
    pub capability_package: &'static str,
}

/// Bin dir for archive installs, independent of family
pub const ARCHIVE_BIN_DIR: &str = "/usr/local/bin";

const PLATFORMS: &[PlatformDefaults] = &[
    PlatformDefaults {
        family: OsFamily::Debian,
        install_method: InstallMethod::Archive,
        manage_repo: true,
        repository: RepositoryKind::Apt,
        package_bin_dir: "/usr/bin",
        package_ships_unit: true,
        unit_dir: "/etc/systemd/system",
        capability_package: "libcap2-bin",
    },
    PlatformDefaults {
        family: OsFamily::RedHat,
        install_method: InstallMethod::Archive,
        manage_repo: true,
        repository: RepositoryKind::Yum,
        package_bin_dir: "/usr/bin",
        package_ships_unit: true,
        unit_dir: "/etc/systemd/system",
        capability_package: "libcap",
    },
    PlatformDefaults {
        family: OsFamily::Archlinux,
        install_method: InstallMethod::Repo,
        manage_repo: false,
        repository: RepositoryKind::Unsupported,
        package_bin_dir: "/bin",
        package_ships_unit: true,
        unit_dir: "/etc/systemd/system",
        capability_package: "libcap",
    },
];

/// Look up the defaults row for a family.
pub fn defaults(family: OsFamily) -> &'static PlatformDefaults {
    PLATFORMS
        .iter()
        .find(|p| p.family == family)
        // Every OsFamily variant has a row; checked by test_every_family_has_a_row
        .unwrap_or(&PLATFORMS[0])
}

/// Map an architecture fact to the release archive naming.
///
/// Unknown architectures pass through unchanged so a custom mirror can
/// still serve them.
pub fn release_arch(arch: &str) -> &str {
    match arch {
        "x86_64" | "amd64" => "amd64",
        "aarch64" | "arm64" => "arm64",
        "armv7l" | "armhf" | "arm" => "arm",
        "i386" | "i686" | "386" => "386",
        other => other,
    }
}
