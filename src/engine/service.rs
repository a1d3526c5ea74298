//! Service Definition Builder
//!
//! Renders the systemd unit, decides whether the binary needs a file
//! capability, and plans the account and service resources.
//!
//! # Memory locking
//!
//! The server locks its memory with `mlock(2)`, which needs
//! `CAP_IPC_LOCK`. With `disable_mlock = false` the unit keeps that
//! capability across the user switch and the binary gets a matching file
//! capability. With `disable_mlock = true` both are left out and the
//! bounding set shrinks to `CAP_SYSLOG`.

use std::path::PathBuf;

use crate::engine::config::CONFIG_FILE_NAME;
use crate::error::{PlanError, Result};
use crate::params::ServiceParameters;
use crate::plan::{Resource, ResourceId, ResourcePlan};
use crate::platform;
use crate::types::FileMode;

/// Title of the capability grant resource
pub const CAPABILITY_RESOURCE_TITLE: &str = "openbao_binary_capability";

/// Capability granted to the binary when memory locking is enabled
pub const IPC_LOCK_CAPABILITY: &str = "cap_ipc_lock=ep";

const SERVICE_SHELL: &str = "/bin/false";

/// Built-in superuser account and group, never declared as resources
const SUPERUSER: &str = "root";

/// Output of the service definition builder
#[derive(Debug, Clone)]
pub struct ServiceDefinition {
    /// Exact `ExecStart=` value
    pub exec_start: String,
    /// Full unit file text, rendered whether or not the file is managed
    pub unit_content: String,
    pub unit_path: PathBuf,
    pub unit_file: Option<ResourceId>,
    pub capability: Option<ResourceId>,
    pub service: Option<ResourceId>,
    pub user: Option<ResourceId>,
    pub group: Option<ResourceId>,
    pub plan: ResourcePlan,
}

/// Process start command.
///
/// `service_options` is appended after a single space, so an empty value
/// leaves a trailing space.
pub fn start_command(params: &ServiceParameters) -> String {
    format!(
        "{} server -config={} {}",
        params.binary_path().display(),
        params.config_dir.join(CONFIG_FILE_NAME).display(),
        params.service_options
    )
}

/// Whether the unit file is managed, resolving the unset case.
///
/// Archive installs always ship without a unit. Packages usually bring
/// their own, so repo installs only get one where the platform's package
/// does not.
pub fn resolve_manage_service_file(params: &ServiceParameters) -> bool {
    params.manage_service_file.unwrap_or_else(|| {
        params.install_method.is_archive()
            || !platform::defaults(params.os_family).package_ships_unit
    })
}

/// Whether the capability grant resource is planned.
///
/// # Errors
///
/// `UnsupportedCapabilityTooling` when capabilities were explicitly
/// requested on a host that cannot manage them.
pub fn capability_grant_required(params: &ServiceParameters) -> Result<bool> {
    if params.disable_mlock {
        return Ok(false);
    }

    let requested = params
        .manage_file_capabilities
        .unwrap_or_else(|| params.install_method.is_archive());
    if !requested {
        return Ok(false);
    }

    if !params.capability_tooling {
        let package = platform::defaults(params.os_family).capability_package;
        if params.manage_file_capabilities == Some(true) {
            return Err(PlanError::unsupported_capability_tooling(format!(
                "setcap is not available; install {} or set manage_file_capabilities to false",
                package
            )));
        }
        tracing::warn!(
            "setcap is not available (package {}), skipping the {} grant",
            package,
            IPC_LOCK_CAPABILITY
        );
        return Ok(false);
    }

    Ok(true)
}

/// Render the systemd unit.
pub fn render_unit(params: &ServiceParameters) -> String {
    let config_path = params.config_dir.join(CONFIG_FILE_NAME);

    let mut lines = vec![
        format!("# {} systemd unit file", params.service_name),
        "[Unit]".to_string(),
        "Description=\"OpenBao secret management tool\"".to_string(),
        "Documentation=https://openbao.org/docs/".to_string(),
        "Requires=network-online.target".to_string(),
        "After=network-online.target".to_string(),
        format!("ConditionFileNotEmpty={}", config_path.display()),
        String::new(),
        "[Service]".to_string(),
        format!("User={}", params.user),
        format!("Group={}", params.group),
        "ProtectSystem=full".to_string(),
        "ProtectHome=read-only".to_string(),
        "PrivateTmp=yes".to_string(),
        "PrivateDevices=yes".to_string(),
    ];

    if params.disable_mlock {
        lines.push("CapabilityBoundingSet=CAP_SYSLOG".to_string());
    } else {
        lines.extend(
            [
                "SecureBits=keep-caps",
                "AmbientCapabilities=CAP_IPC_LOCK",
                "Capabilities=CAP_IPC_LOCK+ep",
                "CapabilityBoundingSet=CAP_SYSLOG CAP_IPC_LOCK",
            ]
            .map(String::from),
        );
    }

    lines.extend([
        "NoNewPrivileges=yes".to_string(),
        format!("Environment=GOMAXPROCS={}", params.num_procs),
        format!("ExecStart={}", start_command(params)),
        "ExecReload=/bin/kill --signal HUP $MAINPID".to_string(),
        "KillMode=process".to_string(),
        "KillSignal=SIGINT".to_string(),
        "Restart=on-failure".to_string(),
        "RestartSec=5".to_string(),
        "TimeoutStopSec=30".to_string(),
        "StartLimitInterval=60".to_string(),
        "StartLimitBurst=3".to_string(),
        "LimitNOFILE=65536".to_string(),
    ]);
    if !params.disable_mlock {
        lines.push("LimitMEMLOCK=infinity".to_string());
    }

    lines.extend([
        String::new(),
        "[Install]".to_string(),
        "WantedBy=multi-user.target".to_string(),
    ]);

    let mut unit = lines.join("\n");
    unit.push('\n');
    unit
}

/// Build the service definition and plan its resources.
pub fn build_service(params: &ServiceParameters) -> Result<ServiceDefinition> {
    let exec_start = start_command(params);
    let unit_content = render_unit(params);
    let unit_path = PathBuf::from(platform::defaults(params.os_family).unit_dir)
        .join(format!("{}.service", params.service_name));

    let mut plan = ResourcePlan::new();

    let group = if params.manage_group && params.group != SUPERUSER {
        Some(plan.insert(Resource::Group {
            name: params.group.clone(),
            system: true,
        })?)
    } else {
        None
    };

    let user = if params.manage_user && params.user != SUPERUSER {
        Some(plan.insert(Resource::User {
            name: params.user.clone(),
            group: params.group.clone(),
            system: true,
            shell: PathBuf::from(SERVICE_SHELL),
        })?)
    } else {
        None
    };

    if let (Some(group), Some(user)) = (&group, &user) {
        plan.before(group, user);
    }

    let unit_file = if resolve_manage_service_file(params) {
        Some(plan.insert(Resource::File {
            title: unit_path.display().to_string(),
            path: unit_path.clone(),
            owner: "root".to_string(),
            group: "root".to_string(),
            mode: FileMode::UNIT_FILE,
            content: Some(unit_content.clone()),
        })?)
    } else {
        None
    };

    let capability = if capability_grant_required(params)? {
        Some(plan.insert(Resource::CapabilityGrant {
            title: CAPABILITY_RESOURCE_TITLE.to_string(),
            path: params.binary_path(),
            capability: IPC_LOCK_CAPABILITY.to_string(),
        })?)
    } else {
        None
    };

    let service = if params.manage_service {
        Some(plan.insert(Resource::Service {
            name: params.service_name.clone(),
            enable: params.service_enable,
            ensure: params.service_ensure,
        })?)
    } else {
        None
    };

    if let Some(service) = &service {
        if let Some(unit_file) = &unit_file {
            plan.notify(unit_file, service);
        }
        if let Some(capability) = &capability {
            plan.before(capability, service);
        }
        for account in user.iter().chain(group.iter()) {
            plan.before(account, service);
        }
    }

    tracing::debug!(
        "Service {}: unit managed={}, capability grant={}, ensure={}",
        params.service_name,
        unit_file.is_some(),
        capability.is_some(),
        if params.manage_service {
            params.service_ensure.to_string()
        } else {
            "unmanaged".to_string()
        }
    );

    Ok(ServiceDefinition {
        exec_start,
        unit_content,
        unit_path,
        unit_file,
        capability,
        service,
        user,
        group,
        plan,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::EdgeKind;
    use crate::types::{InstallMethod, OsFamily, ServiceEnsure};

    fn test_params() -> ServiceParameters {
        ServiceParameters {
            user: "openbao".to_string(),
            group: "openbao".to_string(),
            manage_user: true,
            manage_group: true,
            num_procs: 3,
            config_dir: PathBuf::from("/etc/openbao"),
            bin_dir: PathBuf::from("/usr/local/bin"),
            binary_name: "bao".to_string(),
            service_name: "openbao".to_string(),
            service_options: String::new(),
            disable_mlock: false,
            manage_service_file: None,
            manage_service: true,
            service_enable: true,
            service_ensure: ServiceEnsure::Running,
            manage_file_capabilities: None,
            install_method: InstallMethod::Archive,
            os_family: OsFamily::RedHat,
            capability_tooling: true,
        }
    }

    #[test]
    fn test_start_command_keeps_trailing_space() {
        assert_eq!(
            start_command(&test_params()),
            "/usr/local/bin/bao server -config=/etc/openbao/config.json "
        );
    }

    #[test]
    fn test_start_command_with_options() {
        let params = ServiceParameters {
            bin_dir: PathBuf::from("/opt/bin"),
            config_dir: PathBuf::from("/opt/etc/openbao"),
            service_options: "-log-level=info".to_string(),
            ..test_params()
        };
        assert_eq!(
            start_command(&params),
            "/opt/bin/bao server -config=/opt/etc/openbao/config.json -log-level=info"
        );
    }

    #[test]
    fn test_unit_with_mlock() {
        let unit = render_unit(&test_params());
        assert!(unit.starts_with("# openbao systemd unit file\n"));
        assert!(unit.contains("\nUser=openbao\n"));
        assert!(unit.contains("\nGroup=openbao\n"));
        assert!(unit.contains("\nEnvironment=GOMAXPROCS=3\n"));
        assert!(unit.contains(
            "\nExecStart=/usr/local/bin/bao server -config=/etc/openbao/config.json \n"
        ));
        assert!(unit.contains("\nSecureBits=keep-caps\n"));
        assert!(unit.contains("\nCapabilities=CAP_IPC_LOCK+ep\n"));
        assert!(unit.contains("\nCapabilityBoundingSet=CAP_SYSLOG CAP_IPC_LOCK\n"));
        assert!(unit.contains("\nNoNewPrivileges=yes\n"));
        assert!(unit.ends_with("WantedBy=multi-user.target\n"));
    }

    #[test]
    fn test_unit_without_mlock() {
        let params = ServiceParameters {
            disable_mlock: true,
            ..test_params()
        };
        let unit = render_unit(&params);
        assert!(!unit.contains("SecureBits=keep-caps"));
        assert!(!unit.contains("Capabilities=CAP_IPC_LOCK+ep"));
        assert!(!unit.contains("CAP_IPC_LOCK"));
        assert!(!unit.contains("LimitMEMLOCK"));
        assert!(unit.contains("\nCapabilityBoundingSet=CAP_SYSLOG\n"));
        assert!(unit.contains("\nNoNewPrivileges=yes\n"));
    }

    #[test]
    fn test_unit_gomaxprocs() {
        let params = ServiceParameters {
            num_procs: 8,
            ..test_params()
        };
        assert!(render_unit(&params).contains("\nEnvironment=GOMAXPROCS=8\n"));
    }

    #[test]
    fn test_service_file_default_per_install_method() {
        assert!(resolve_manage_service_file(&test_params()));

        let repo = ServiceParameters {
            install_method: InstallMethod::Repo,
            ..test_params()
        };
        assert!(!resolve_manage_service_file(&repo));

        let forced = ServiceParameters {
            manage_service_file: Some(true),
            ..repo.clone()
        };
        assert!(resolve_manage_service_file(&forced));

        let archive_off = ServiceParameters {
            manage_service_file: Some(false),
            ..test_params()
        };
        assert!(!resolve_manage_service_file(&archive_off));
    }

    #[test]
    fn test_capability_grant_decision() {
        assert!(capability_grant_required(&test_params()).expect("decision")); // test: known-good input

        let mlock_off = ServiceParameters {
            disable_mlock: true,
            manage_file_capabilities: Some(true),
            ..test_params()
        };
        assert!(!capability_grant_required(&mlock_off).expect("decision")); // test: known-good input

        let repo = ServiceParameters {
            install_method: InstallMethod::Repo,
            ..test_params()
        };
        assert!(!capability_grant_required(&repo).expect("decision")); // test: known-good input

        let repo_forced = ServiceParameters {
            manage_file_capabilities: Some(true),
            ..repo
        };
        assert!(capability_grant_required(&repo_forced).expect("decision")); // test: known-good input
    }

    #[test]
    fn test_missing_capability_tooling() {
        let defaulted = ServiceParameters {
            capability_tooling: false,
            ..test_params()
        };
        assert!(!capability_grant_required(&defaulted).expect("decision")); // test: known-good input

        let explicit = ServiceParameters {
            manage_file_capabilities: Some(true),
            ..defaulted
        };
        let err = capability_grant_required(&explicit).expect_err("explicit request must fail"); // test: expected error
        assert!(matches!(err, PlanError::UnsupportedCapabilityTooling(_)));
        assert!(err.to_string().contains("libcap"));
    }

    #[test]
    fn test_build_service_resources_and_edges() {
        let definition = build_service(&test_params()).expect("build"); // test: known-good input
        let plan = &definition.plan;

        let group = definition.group.clone().expect("group planned"); // test: known-good input
        let user = definition.user.clone().expect("user planned"); // test: known-good input
        let unit = definition.unit_file.clone().expect("unit planned"); // test: known-good input
        let capability = definition.capability.clone().expect("capability planned"); // test: known-good input
        let service = definition.service.clone().expect("service planned"); // test: known-good input

        assert_eq!(plan.edge(&group, &user), Some(EdgeKind::Before));
        assert_eq!(plan.edge(&unit, &service), Some(EdgeKind::Notify));
        assert_eq!(plan.edge(&capability, &service), Some(EdgeKind::Before));
        assert_eq!(definition.unit_path, PathBuf::from("/etc/systemd/system/openbao.service"));
        assert!(matches!(
            plan.get(&service),
            Some(Resource::Service { ensure: ServiceEnsure::Running, enable: true, .. })
        ));

        match plan.get(&unit) {
            Some(Resource::File { mode, owner, group, content, .. }) => {
                assert_eq!(mode.to_string(), "0444");
                assert_eq!(owner, "root");
                assert_eq!(group, "root");
                assert_eq!(content.as_deref(), Some(definition.unit_content.as_str()));
            }
            other => panic!("unexpected resource {:?}", other),
        }

        match plan.get(&capability) {
            Some(Resource::CapabilityGrant { path, capability, .. }) => {
                assert_eq!(path, &PathBuf::from("/usr/local/bin/bao"));
                assert_eq!(capability, "cap_ipc_lock=ep");
            }
            other => panic!("unexpected resource {:?}", other),
        }

        match plan.get(&user) {
            Some(Resource::User { group, system, shell, .. }) => {
                assert_eq!(group, "openbao");
                assert!(*system);
                assert_eq!(shell, &PathBuf::from("/bin/false"));
            }
            other => panic!("unexpected resource {:?}", other),
        }
    }

    #[test]
    fn test_unmanaged_accounts_and_service() {
        let params = ServiceParameters {
            manage_user: false,
            manage_group: false,
            manage_service: false,
            ..test_params()
        };
        let definition = build_service(&params).expect("build"); // test: known-good input
        assert!(definition.user.is_none());
        assert!(definition.group.is_none());
        assert!(definition.service.is_none());
        assert!(definition
            .plan
            .resources()
            .iter()
            .all(|r| !matches!(r, Resource::User { .. } | Resource::Group { .. } | Resource::Service { .. })));
    }

    #[test]
    fn test_stopped_service() {
        let params = ServiceParameters {
            service_enable: false,
            service_ensure: ServiceEnsure::Stopped,
            ..test_params()
        };
        let definition = build_service(&params).expect("build"); // test: known-good input
        let service = definition.service.clone().expect("service planned"); // test: known-good input
        assert!(matches!(
            definition.plan.get(&service),
            Some(Resource::Service {
                enable: false,
                ensure: ServiceEnsure::Stopped,
                ..
            })
        ));
    }

    #[test]
    fn test_root_account_is_not_declared() {
        let params = ServiceParameters {
            user: "root".to_string(),
            group: "root".to_string(),
            ..test_params()
        };
        let definition = build_service(&params).expect("build"); // test: known-good input
        assert!(definition.user.is_none());
        assert!(definition.group.is_none());
        assert!(definition
            .plan
            .resources()
            .iter()
            .all(|r| !matches!(r, Resource::User { .. } | Resource::Group { .. })));
        assert!(definition.unit_content.contains("\nUser=root\n"));

        // A regular user in the root group still gets its account
        let params = ServiceParameters {
            group: "root".to_string(),
            ..test_params()
        };
        let definition = build_service(&params).expect("build"); // test: known-good input
        assert!(definition.user.is_some());
        assert!(definition.group.is_none());
    }
}
