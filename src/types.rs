//! Type-safe parameter types for the install planner
//!
//! Stringly-typed module parameters (`"archive"`, `"0640"`, `"running"`) are
//! parsed into these types once, in the normalizer, so the decision
//! functions only ever match on enums.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use strum::{Display, EnumIter, EnumString};

/// Strategy for acquiring the server binary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InstallMethod {
    /// Direct download of a release archive, unpacked into `bin_dir`
    Archive,
    /// OS package manager
    Repo,
}

impl InstallMethod {
    /// Returns true for archive installs
    pub fn is_archive(self) -> bool {
        matches!(self, Self::Archive)
    }
}

/// Operating system family, as reported by the OS-facts provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum OsFamily {
    #[serde(alias = "debian")]
    Debian,
    #[serde(alias = "redhat")]
    RedHat,
    #[serde(alias = "archlinux")]
    Archlinux,
}

/// Desired state of a managed service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ServiceEnsure {
    #[default]
    Running,
    Stopped,
}

/// Desired state of a managed package.
///
/// Anything that is not one of the keywords is taken as a pinned package
/// version (e.g. `"2.0.1-1"`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PackageEnsure {
    #[default]
    Installed,
    Latest,
    Absent,
    Version(String),
}

impl FromStr for PackageEnsure {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err("package ensure must not be empty".to_string()),
            "installed" | "present" => Ok(Self::Installed),
            "latest" => Ok(Self::Latest),
            "absent" | "purged" => Ok(Self::Absent),
            other if other.contains(char::is_whitespace) => {
                Err(format!("'{}' is not a package state or version", other))
            }
            other => Ok(Self::Version(other.to_string())),
        }
    }
}

impl fmt::Display for PackageEnsure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Installed => write!(f, "installed"),
            Self::Latest => write!(f, "latest"),
            Self::Absent => write!(f, "absent"),
            Self::Version(v) => write!(f, "{}", v),
        }
    }
}

impl TryFrom<String> for PackageEnsure {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PackageEnsure> for String {
    fn from(value: PackageEnsure) -> Self {
        value.to_string()
    }
}

/// Unix permission bits of a managed file, written as an octal string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileMode(u32);

impl FileMode {
    pub const BINARY: FileMode = FileMode(0o755);
    pub const CONFIG: FileMode = FileMode(0o640);
    pub const DIRECTORY: FileMode = FileMode(0o750);
    pub const SHARED_DIRECTORY: FileMode = FileMode(0o755);
    pub const UNIT_FILE: FileMode = FileMode(0o444);

    /// Raw permission bits
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl FromStr for FileMode {
    type Err = String;

    /// Accepts three or four octal digits (`"640"`, `"0640"`, `"2750"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = (3..=4).contains(&s.len()) && s.chars().all(|c| ('0'..='7').contains(&c));
        if !valid {
            return Err(format!("'{}' is not a 3 or 4 digit octal file mode", s));
        }
        u32::from_str_radix(s, 8)
            .map(FileMode)
            .map_err(|e| format!("'{}' is not an octal file mode: {}", s, e))
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04o}", self.0)
    }
}

impl TryFrom<String> for FileMode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FileMode> for String {
    fn from(value: FileMode) -> Self {
        value.to_string()
    }
}

/// Dotted numeric release version (`1.12.0`, `2.0.0-beta1`).
///
/// A pre-release sorts before the release it precedes; two pre-releases
/// of the same release compare lexically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Option<String>,
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().trim_start_matches('v');
        let (core, pre) = match s.split_once('-') {
            Some((core, pre)) if !pre.is_empty() => (core, Some(pre.to_string())),
            Some(_) => return Err(format!("'{}' has an empty pre-release suffix", s)),
            None => (s, None),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() != 3 {
            return Err(format!("'{}' is not a MAJOR.MINOR.PATCH version", s));
        }
        let num = |p: &str| {
            p.parse::<u64>()
                .map_err(|_| format!("'{}' is not a MAJOR.MINOR.PATCH version", s))
        };

        Ok(Self {
            major: num(parts[0])?,
            minor: num(parts[1])?,
            patch: num(parts[2])?,
            pre,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl TryFrom<String> for Version {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.to_string()
    }
}
