//! Parameter Normalizer
//!
//! Module parameters arrive as a JSON object in which every key is
//! optional. `normalize` validates them against the host facts, applies
//! the platform defaults, and splits the result into the three parameter
//! sets the decision functions consume.
//!
//! Nothing here touches the host; a rejected parameter aborts planning
//! before any resource exists.

use anyhow::Context;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};

use crate::engine::config::{Listener, Section};
use crate::error::{PlanError, Result};
use crate::facts::OsFacts;
use crate::platform::{self, ARCHIVE_BIN_DIR};
use crate::types::{FileMode, InstallMethod, OsFamily, PackageEnsure, ServiceEnsure, Version};

pub const DEFAULT_USER: &str = "openbao";
pub const DEFAULT_PACKAGE_NAME: &str = "openbao";
pub const DEFAULT_SERVICE_NAME: &str = "openbao";
pub const DEFAULT_BINARY_NAME: &str = "bao";
pub const DEFAULT_VERSION: &str = "1.12.0";
pub const DEFAULT_DOWNLOAD_URL_BASE: &str = "https://releases.hashicorp.com/openbao/";
pub const DEFAULT_DOWNLOAD_EXTENSION: &str = "zip";
pub const DEFAULT_DOWNLOAD_DIR: &str = "/tmp";
pub const DEFAULT_DOWNLOAD_FILENAME: &str = "openbao.zip";
pub const DEFAULT_STORAGE_PATH: &str = "/var/lib/openbao";
pub const DEFAULT_LISTENER_ADDRESS: &str = "127.0.0.1:8200";

const ARCHIVE_CONFIG_DIR: &str = "/etc/openbao";
const REPO_CONFIG_DIR: &str = "/etc/openbao.d";

/// Raw module parameters, exactly as supplied by the orchestration tool.
///
/// Every field is optional; `None` means "not supplied". Enumerated
/// values are kept as strings here so that a bad value surfaces as
/// `InvalidParameter` naming the parameter, not as a JSON error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModuleParams {
    // Users
    pub user: Option<String>,
    pub manage_user: Option<bool>,
    pub group: Option<String>,
    pub manage_group: Option<bool>,

    // Installation
    pub install_method: Option<String>,
    /// Absent means [`DEFAULT_VERSION`]; an explicit `null` means no version.
    #[serde(deserialize_with = "explicit", skip_serializing_if = "Option::is_none")]
    pub version: Option<Option<String>>,
    pub download_url: Option<String>,
    pub download_url_base: Option<String>,
    pub download_extension: Option<String>,
    pub download_dir: Option<PathBuf>,
    pub download_filename: Option<String>,
    pub manage_download_dir: Option<bool>,
    pub package_name: Option<String>,
    pub package_ensure: Option<String>,
    pub manage_repo: Option<bool>,
    pub bin_dir: Option<PathBuf>,
    pub binary_name: Option<String>,

    // Configuration file
    pub config_dir: Option<PathBuf>,
    pub manage_config_file: Option<bool>,
    pub config_mode: Option<String>,
    pub purge_config_dir: Option<bool>,
    pub manage_storage_dir: Option<bool>,

    // Server configuration
    pub storage: Option<Section>,
    pub listener: Option<Listener>,
    pub ha_storage: Option<Section>,
    pub seal: Option<Section>,
    pub disable_cache: Option<bool>,
    pub telemetry: Option<Section>,
    pub default_lease_ttl: Option<String>,
    pub max_lease_ttl: Option<String>,
    pub disable_mlock: Option<bool>,
    pub enable_ui: Option<bool>,
    pub api_addr: Option<String>,
    pub extra_config: Option<Section>,

    // Service
    pub service_name: Option<String>,
    pub service_options: Option<String>,
    pub num_procs: Option<i64>,
    pub manage_service: Option<bool>,
    pub manage_service_file: Option<bool>,
    pub service_enable: Option<bool>,
    pub service_ensure: Option<String>,
    pub manage_file_capabilities: Option<bool>,
}

impl ModuleParams {
    /// Load parameters from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read parameters from {:?}", path.as_ref()))?;

        let params: Self =
            serde_json::from_str(&content).context("Failed to parse parameters JSON")?;

        Ok(params)
    }
}

/// Inputs of the install strategy selector
#[derive(Debug, Clone, PartialEq)]
pub struct InstallParameters {
    pub install_method: InstallMethod,
    pub version: Option<Version>,
    pub download_url: Option<String>,
    /// Always ends with `/`
    pub download_url_base: String,
    pub download_extension: String,
    pub download_dir: PathBuf,
    pub download_filename: String,
    pub manage_download_dir: bool,
    pub package_name: String,
    pub package_ensure: PackageEnsure,
    pub manage_repo: bool,
    pub bin_dir: PathBuf,
    pub binary_name: String,
    pub os_family: OsFamily,
    pub os_major_release: Option<u32>,
    pub os_codename: Option<String>,
    pub architecture: String,
    pub kernel: String,
    pub installed_version: Option<Version>,
}

impl InstallParameters {
    /// Full path of the server binary
    pub fn binary_path(&self) -> PathBuf {
        self.bin_dir.join(&self.binary_name)
    }
}

/// Inputs of the service definition builder
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceParameters {
    pub user: String,
    pub group: String,
    pub manage_user: bool,
    pub manage_group: bool,
    pub num_procs: u32,
    pub config_dir: PathBuf,
    pub bin_dir: PathBuf,
    pub binary_name: String,
    pub service_name: String,
    pub service_options: String,
    pub disable_mlock: bool,
    /// Tri-state: `None` resolves to the platform default
    pub manage_service_file: Option<bool>,
    pub manage_service: bool,
    pub service_enable: bool,
    pub service_ensure: ServiceEnsure,
    /// Tri-state: `None` resolves to "archive installs only"
    pub manage_file_capabilities: Option<bool>,
    pub install_method: InstallMethod,
    pub os_family: OsFamily,
    pub capability_tooling: bool,
}

impl ServiceParameters {
    /// Full path of the server binary
    pub fn binary_path(&self) -> PathBuf {
        self.bin_dir.join(&self.binary_name)
    }
}

/// Inputs of the config renderer
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigParameters {
    pub storage: Option<Section>,
    pub listener: Option<Listener>,
    pub ha_storage: Option<Section>,
    pub seal: Option<Section>,
    pub disable_cache: Option<bool>,
    pub telemetry: Option<Section>,
    pub default_lease_ttl: Option<String>,
    pub max_lease_ttl: Option<String>,
    pub disable_mlock: Option<bool>,
    pub enable_ui: Option<bool>,
    pub api_addr: Option<String>,
    pub extra_config: Section,
    pub config_dir: PathBuf,
    pub config_mode: FileMode,
    pub manage_config_file: bool,
    pub manage_config_dir: bool,
    pub purge_config_dir: bool,
    pub manage_storage_dir: bool,
    pub user: String,
    pub group: String,
}

/// Validated, defaulted parameters
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedParams {
    pub install: InstallParameters,
    pub service: ServiceParameters,
    pub config: ConfigParameters,
}

// ============================================================================
// Normalization
// ============================================================================

/// Validate raw parameters and apply defaults for the given host.
///
/// # Errors
///
/// `InvalidParameter` when:
/// - `num_procs` (or the detected CPU count it defaults to) is below 1
/// - `install_method` is not `archive` or `repo`
/// - `config_mode` is not a 3 or 4 digit octal mode
/// - a name (`user`, `group`, `package_name`, ...) is empty or contains
///   whitespace or `/`
/// - a directory parameter is not absolute
/// - `version`, `package_ensure` or `service_ensure` does not parse
pub fn normalize(raw: &ModuleParams, facts: &OsFacts) -> Result<NormalizedParams> {
    let platform = platform::defaults(facts.family);

    let install_method = match raw.install_method.as_deref() {
        Some(method) => method.parse::<InstallMethod>().map_err(|_| {
            PlanError::invalid(
                "install_method",
                format!("'{}' is not one of: archive, repo", method),
            )
        })?,
        None => platform.install_method,
    };

    let num_procs = match raw.num_procs {
        Some(n) => n,
        None => i64::from(facts.cpu_count),
    };
    if num_procs < 1 {
        return Err(PlanError::invalid(
            "num_procs",
            format!("must be at least 1, got {}", num_procs),
        ));
    }
    let num_procs = u32::try_from(num_procs)
        .map_err(|_| PlanError::invalid("num_procs", format!("{} is too large", num_procs)))?;

    let config_mode = match raw.config_mode.as_deref() {
        Some(mode) => mode
            .parse::<FileMode>()
            .map_err(|reason| PlanError::invalid("config_mode", reason))?,
        None => FileMode::CONFIG,
    };

    let version = match &raw.version {
        None => Some(DEFAULT_VERSION),
        Some(explicit) => explicit.as_deref(),
    }
    .map(str::parse::<Version>)
    .transpose()
    .map_err(|reason| PlanError::invalid("version", reason))?;

    let package_ensure = match raw.package_ensure.as_deref() {
        Some(ensure) => ensure
            .parse::<PackageEnsure>()
            .map_err(|reason| PlanError::invalid("package_ensure", reason))?,
        None => PackageEnsure::default(),
    };

    let service_ensure = match raw.service_ensure.as_deref() {
        Some(ensure) => ensure.parse::<ServiceEnsure>().map_err(|_| {
            PlanError::invalid(
                "service_ensure",
                format!("'{}' is not one of: running, stopped", ensure),
            )
        })?,
        None => ServiceEnsure::default(),
    };

    let user = name_param("user", raw.user.as_deref(), DEFAULT_USER)?;
    let group = name_param("group", raw.group.as_deref(), DEFAULT_USER)?;
    let package_name = name_param("package_name", raw.package_name.as_deref(), DEFAULT_PACKAGE_NAME)?;
    let service_name = name_param("service_name", raw.service_name.as_deref(), DEFAULT_SERVICE_NAME)?;
    let binary_name = name_param("binary_name", raw.binary_name.as_deref(), DEFAULT_BINARY_NAME)?;
    let download_filename = name_param(
        "download_filename",
        raw.download_filename.as_deref(),
        DEFAULT_DOWNLOAD_FILENAME,
    )?;

    let manage_repo = raw.manage_repo.unwrap_or(platform.manage_repo);

    let default_bin_dir = match install_method {
        InstallMethod::Archive => ARCHIVE_BIN_DIR,
        InstallMethod::Repo => platform.package_bin_dir,
    };
    let bin_dir = dir_param("bin_dir", raw.bin_dir.as_deref(), default_bin_dir)?;

    let default_config_dir = if install_method == InstallMethod::Repo && manage_repo {
        REPO_CONFIG_DIR
    } else {
        ARCHIVE_CONFIG_DIR
    };
    let config_dir = dir_param("config_dir", raw.config_dir.as_deref(), default_config_dir)?;
    let download_dir = dir_param("download_dir", raw.download_dir.as_deref(), DEFAULT_DOWNLOAD_DIR)?;

    let download_url = match raw.download_url.as_deref().map(str::trim) {
        Some("") => return Err(PlanError::invalid("download_url", "must not be empty")),
        Some(url) => Some(url.to_string()),
        None => None,
    };

    let mut download_url_base = raw
        .download_url_base
        .as_deref()
        .map(str::trim)
        .unwrap_or(DEFAULT_DOWNLOAD_URL_BASE)
        .to_string();
    if download_url_base.is_empty() {
        return Err(PlanError::invalid("download_url_base", "must not be empty"));
    }
    if !download_url_base.ends_with('/') {
        download_url_base.push('/');
    }

    let download_extension = raw
        .download_extension
        .as_deref()
        .unwrap_or(DEFAULT_DOWNLOAD_EXTENSION)
        .trim_start_matches('.')
        .to_string();
    if download_extension.is_empty() || download_extension.contains(['/', ' ']) {
        return Err(PlanError::invalid(
            "download_extension",
            format!("'{}' is not a file extension", download_extension),
        ));
    }

    let disable_mlock = raw.disable_mlock.unwrap_or(false);

    tracing::debug!(
        "Normalized parameters: method={}, bin_dir={}, config_dir={}, num_procs={}",
        install_method,
        bin_dir.display(),
        config_dir.display(),
        num_procs
    );

    let install = InstallParameters {
        install_method,
        version,
        download_url,
        download_url_base,
        download_extension,
        download_dir,
        download_filename,
        manage_download_dir: raw.manage_download_dir.unwrap_or(false),
        package_name,
        package_ensure,
        manage_repo,
        bin_dir: bin_dir.clone(),
        binary_name: binary_name.clone(),
        os_family: facts.family,
        os_major_release: facts.major_release,
        os_codename: facts.codename.clone(),
        architecture: facts.architecture.clone(),
        kernel: facts.kernel.clone(),
        installed_version: facts.installed_version.clone(),
    };

    let service = ServiceParameters {
        user: user.clone(),
        group: group.clone(),
        manage_user: raw.manage_user.unwrap_or(true),
        manage_group: raw.manage_group.unwrap_or(true),
        num_procs,
        config_dir: config_dir.clone(),
        bin_dir,
        binary_name,
        service_name,
        service_options: raw.service_options.clone().unwrap_or_default(),
        disable_mlock,
        manage_service_file: raw.manage_service_file,
        manage_service: raw.manage_service.unwrap_or(true),
        service_enable: raw.service_enable.unwrap_or(true),
        service_ensure,
        manage_file_capabilities: raw.manage_file_capabilities,
        install_method,
        os_family: facts.family,
        capability_tooling: facts.capability_tooling,
    };

    let config = ConfigParameters {
        storage: Some(raw.storage.clone().unwrap_or_else(default_storage)),
        listener: Some(raw.listener.clone().unwrap_or_else(default_listener)),
        ha_storage: raw.ha_storage.clone(),
        seal: raw.seal.clone(),
        disable_cache: raw.disable_cache,
        telemetry: raw.telemetry.clone(),
        default_lease_ttl: raw.default_lease_ttl.clone(),
        max_lease_ttl: raw.max_lease_ttl.clone(),
        disable_mlock: raw.disable_mlock,
        enable_ui: raw.enable_ui,
        api_addr: raw.api_addr.clone(),
        extra_config: raw.extra_config.clone().unwrap_or_default(),
        config_dir,
        config_mode,
        manage_config_file: raw.manage_config_file.unwrap_or(true),
        manage_config_dir: install_method.is_archive(),
        purge_config_dir: raw.purge_config_dir.unwrap_or(true),
        manage_storage_dir: raw.manage_storage_dir.unwrap_or(false),
        user,
        group,
    };

    Ok(NormalizedParams {
        install,
        service,
        config,
    })
}

// ============================================================================
// Helpers
// ============================================================================

/// Keep an explicit JSON `null` apart from an absent key.
fn explicit<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Validate a user, group, package or file name.
fn name_param(name: &str, value: Option<&str>, default: &str) -> Result<String> {
    let value = value.unwrap_or(default);
    if value.is_empty() {
        return Err(PlanError::invalid(name, "must not be empty"));
    }
    if value.contains(|c: char| c.is_whitespace() || c == '/') {
        return Err(PlanError::invalid(
            name,
            format!("'{}' must not contain whitespace or '/'", value),
        ));
    }
    Ok(value.to_string())
}

/// Validate a directory parameter: must be absolute.
fn dir_param(name: &str, value: Option<&Path>, default: &str) -> Result<PathBuf> {
    let value = value.unwrap_or_else(|| Path::new(default));
    if !value.is_absolute() {
        return Err(PlanError::invalid(
            name,
            format!("'{}' is not an absolute path", value.display()),
        ));
    }
    Ok(value.to_path_buf())
}

fn default_storage() -> Section {
    let mut storage = Section::new();
    storage.insert("file".to_string(), json!({ "path": DEFAULT_STORAGE_PATH }));
    storage
}

fn default_listener() -> Listener {
    let mut tcp = Section::new();
    tcp.insert(
        "tcp".to_string(),
        json!({ "address": DEFAULT_LISTENER_ADDRESS, "tls_disable": 1 }),
    );
    Listener::Single(tcp)
}

// ============================================================================
// Tests
// ============================================================================
