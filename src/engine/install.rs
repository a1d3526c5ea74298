//! Install Strategy Selector
//!
//! Decides where the server binary comes from and plans the resources that
//! put it in place:
//!
//! - `download_url` set on an archive install: fetch exactly that URL
//! - archive install: fetch `<base><version>/<package>_<version>_<kernel>_<arch>.<ext>`
//! - repo install: install the package, optionally from the upstream
//!   repository definition
//!
//! Every path ends in the `openbao_binary` file resource, which later
//! stages order themselves against.

use std::path::PathBuf;

use crate::error::{PlanError, Result};
use crate::params::InstallParameters;
use crate::plan::{Resource, ResourceId, ResourcePlan};
use crate::platform::{self, RepositoryKind};
use crate::types::{FileMode, InstallMethod, PackageEnsure};

/// Title of the binary file resource
pub const BINARY_RESOURCE_TITLE: &str = "openbao_binary";

/// Name of the upstream repository definition
pub const REPOSITORY_NAME: &str = "OriginalDeveloper";

const APT_LOCATION: &str = "https://apt.releases.hashicorp.com";
const APT_KEY_SOURCE: &str = "https://apt.releases.hashicorp.com/gpg";
const APT_REPOS: &str = "main";
const YUM_BASEURL_PREFIX: &str = "https://rpm.releases.hashicorp.com/RHEL/";
const YUM_GPGKEY: &str = "https://rpm.releases.hashicorp.com/gpg";

/// Where the binary comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// Download and unpack a release archive
    Archive { url: String },
    /// Install an OS package
    Package {
        package_name: String,
        package_ensure: PackageEnsure,
    },
}

impl std::fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Archive { url } => write!(f, "archive {}", url),
            Self::Package {
                package_name,
                package_ensure,
            } => write!(f, "package {} ({})", package_name, package_ensure),
        }
    }
}

/// Output of the install strategy selector
#[derive(Debug, Clone)]
pub struct InstallStrategy {
    pub source: SourceSpec,
    /// The `openbao_binary` file
    pub binary: ResourceId,
    pub package: Option<ResourceId>,
    pub archive: Option<ResourceId>,
    /// Managed download directory, archive installs only
    pub download_dir: Option<ResourceId>,
    pub repository: Option<ResourceId>,
    pub plan: ResourcePlan,
}

/// Release archive URL for the requested version.
///
/// # Errors
///
/// `MissingVersion` when no version was requested.
pub fn archive_url(params: &InstallParameters) -> Result<String> {
    let version = params.version.as_ref().ok_or(PlanError::MissingVersion)?;
    Ok(format!(
        "{base}{version}/{package}_{version}_{kernel}_{arch}.{ext}",
        base = params.download_url_base,
        version = version,
        package = params.package_name,
        kernel = params.kernel,
        arch = platform::release_arch(&params.architecture),
        ext = params.download_extension,
    ))
}

/// Decide the binary source.
pub fn select_source(params: &InstallParameters) -> Result<SourceSpec> {
    match params.install_method {
        InstallMethod::Archive => {
            let url = match &params.download_url {
                Some(url) => url.clone(),
                None => archive_url(params)?,
            };
            Ok(SourceSpec::Archive { url })
        }
        InstallMethod::Repo => {
            if let Some(url) = &params.download_url {
                tracing::warn!("download_url {} ignored for a repo install", url);
            }
            Ok(SourceSpec::Package {
                package_name: params.package_name.clone(),
                package_ensure: params.package_ensure.clone(),
            })
        }
    }
}

/// Repository definition for the host's family.
///
/// # Errors
///
/// - `UnsupportedPlatform` when the family has no repository concept
/// - `InvalidParameter` when an APT source is needed but the codename fact is missing
pub fn repository_resource(params: &InstallParameters) -> Result<Resource> {
    match platform::defaults(params.os_family).repository {
        RepositoryKind::Apt => {
            let release = params.os_codename.clone().ok_or_else(|| {
                PlanError::invalid(
                    "codename",
                    "the release codename fact is required to manage an APT source",
                )
            })?;
            Ok(Resource::AptSource {
                name: REPOSITORY_NAME.to_string(),
                location: APT_LOCATION.to_string(),
                release,
                repos: APT_REPOS.to_string(),
                key_source: APT_KEY_SOURCE.to_string(),
            })
        }
        RepositoryKind::Yum => Ok(Resource::YumRepo {
            name: REPOSITORY_NAME.to_string(),
            baseurl: yum_baseurl(params.os_major_release),
            gpgkey: YUM_GPGKEY.to_string(),
            gpgcheck: true,
        }),
        RepositoryKind::Unsupported => Err(PlanError::unsupported_platform(format!(
            "{} has no package repository to manage; set manage_repo to false",
            params.os_family
        ))),
    }
}

/// YUM base URL pinned to the host's major release, or left to `$releasever`.
fn yum_baseurl(major_release: Option<u32>) -> String {
    let release = major_release.map_or_else(|| "$releasever".to_string(), |r| r.to_string());
    format!("{}{}/$basearch/stable", YUM_BASEURL_PREFIX, release)
}

/// Whether an existing install is older than the requested version.
fn needs_upgrade(params: &InstallParameters) -> bool {
    match (&params.installed_version, &params.version) {
        (Some(installed), Some(requested)) => installed < requested,
        _ => false,
    }
}

/// Plan the resources that place the binary.
pub fn plan_install(params: &InstallParameters) -> Result<InstallStrategy> {
    let source = select_source(params)?;
    let binary_path = params.binary_path();
    let mut plan = ResourcePlan::new();

    let mut package = None;
    let mut archive = None;
    let mut download_dir = None;
    let mut repository = None;

    match &source {
        SourceSpec::Archive { url } => {
            download_dir = if params.manage_download_dir {
                Some(plan.insert(Resource::Directory {
                    path: params.download_dir.clone(),
                    owner: "root".to_string(),
                    group: "root".to_string(),
                    mode: FileMode::SHARED_DIRECTORY,
                    purge: false,
                    recurse: false,
                })?)
            } else {
                None
            };

            let creates: Option<PathBuf> = if needs_upgrade(params) {
                tracing::info!(
                    "Installed version is older than {}, re-extracting archive",
                    params.version.as_ref().map(ToString::to_string).unwrap_or_default()
                );
                None
            } else {
                Some(binary_path.clone())
            };

            let id = plan.insert(Resource::ArchiveFetch {
                path: params.download_dir.join(&params.download_filename),
                source: url.clone(),
                extract_path: params.bin_dir.clone(),
                creates,
                cleanup: true,
            })?;
            if let Some(dir) = &download_dir {
                plan.before(dir, &id);
            }
            archive = Some(id);
        }
        SourceSpec::Package {
            package_name,
            package_ensure,
        } => {
            if params.manage_repo {
                repository = Some(plan.insert(repository_resource(params)?)?);
            }
            let id = plan.insert(Resource::Package {
                name: package_name.clone(),
                ensure: package_ensure.clone(),
            })?;
            if let Some(repo) = &repository {
                plan.before(repo, &id);
            }
            package = Some(id);
        }
    }

    let binary = plan.insert(Resource::File {
        title: BINARY_RESOURCE_TITLE.to_string(),
        path: binary_path,
        owner: "root".to_string(),
        group: "root".to_string(),
        mode: FileMode::BINARY,
        content: None,
    })?;
    for placed_by in archive.iter().chain(package.iter()) {
        plan.before(placed_by, &binary);
    }

    tracing::debug!("Install source: {}", source);

    Ok(InstallStrategy {
        source,
        binary,
        package,
        archive,
        download_dir,
        repository,
        plan,
    })
}

// ============================================================================
// Tests
// ============================================================================
