//! Install Planner
//!
//! Composes the normalizer and the three decision functions into one
//! `ResourcePlan` and adds the edges that cross fragment boundaries:
//!
//! ```text
//! archive/package ──► openbao_binary ──notify──► capability ──► service
//!                          └──────────────────────────────────► service
//! group ──► user ──► config dir ──► config.json ──notify──► service
//!                                    unit file ──notify──► service
//!                   storage dir ──────────────────────────► service
//! ```

use crate::engine::config::{ConfigDocument, RenderedConfig, render_config};
use crate::engine::install::{InstallStrategy, SourceSpec, plan_install};
use crate::engine::service::{ServiceDefinition, build_service};
use crate::error::{PlanError, Result};
use crate::facts::OsFacts;
use crate::params::{ModuleParams, NormalizedParams, normalize};
use crate::plan::{ResourceId, ResourcePlan};

/// Everything a planning run decided
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub params: NormalizedParams,
    pub source: SourceSpec,
    pub document: ConfigDocument,
    /// Exact bytes of `config.json`
    pub config_content: String,
    /// Full unit file text
    pub unit_content: String,
    pub exec_start: String,
    pub plan: ResourcePlan,
}

/// Plan the installation and return only the resource plan.
pub fn plan(params: &ModuleParams, facts: &OsFacts) -> Result<ResourcePlan> {
    Ok(plan_detailed(params, facts)?.plan)
}

/// Plan the installation and keep the intermediate decisions.
///
/// # Errors
///
/// Any normalizer or decision function error; `InvalidPlan` if the merged
/// graph is inconsistent.
pub fn plan_detailed(params: &ModuleParams, facts: &OsFacts) -> Result<PlanOutcome> {
    let normalized = normalize(params, facts)?;

    let install = plan_install(&normalized.install)?;
    let config = render_config(&normalized.config)?;
    let service = build_service(&normalized.service)?;

    check_directory_claims(&install, &config)?;
    let plan = assemble(&install, &config, &service)?;
    plan.topological_order()?;

    tracing::info!(
        "Planned {} resources and {} edges ({})",
        plan.len(),
        plan.edges().len(),
        install.source
    );

    Ok(PlanOutcome {
        source: install.source,
        document: config.document,
        config_content: config.content,
        unit_content: service.unit_content,
        exec_start: service.exec_start,
        params: normalized,
        plan,
    })
}

/// Two parameters must not manage the same directory.
fn check_directory_claims(install: &InstallStrategy, config: &RenderedConfig) -> Result<()> {
    let claims = [
        ("download_dir", &install.download_dir),
        ("config_dir", &config.directory),
        ("storage", &config.storage_dir),
    ];

    for (i, (name, id)) in claims.iter().enumerate() {
        let Some(id) = id else { continue };
        if let Some((other, _)) = claims[i + 1..]
            .iter()
            .find(|(_, other_id)| matches!(other_id, Some(other_id) if other_id == id))
        {
            return Err(PlanError::invalid(
                format!("{}, {}", name, other),
                format!("both manage the directory {}", id),
            ));
        }
    }
    Ok(())
}

/// Merge the fragments and add the cross-fragment edges.
fn assemble(
    install: &InstallStrategy,
    config: &RenderedConfig,
    service: &ServiceDefinition,
) -> Result<ResourcePlan> {
    let mut plan = ResourcePlan::new();
    plan.merge(service.plan.clone())?;
    plan.merge(install.plan.clone())?;
    plan.merge(config.plan.clone())?;

    let accounts: Vec<&ResourceId> = service.group.iter().chain(service.user.iter()).collect();
    let config_files: Vec<&ResourceId> = [&config.directory, &config.file, &config.storage_dir]
        .into_iter()
        .flatten()
        .collect();

    for account in &accounts {
        for file in &config_files {
            plan.before(account, file);
        }
    }

    if let Some(capability) = &service.capability {
        plan.notify(&install.binary, capability);
        if let Some(package) = &install.package {
            plan.notify(package, capability);
        }
    }

    if let Some(svc) = &service.service {
        plan.before(&install.binary, svc);
        if let Some(file) = &config.file {
            plan.notify(file, svc);
        }
        if let Some(storage) = &config.storage_dir {
            plan.before(storage, svc);
        }
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::EdgeKind;
    use crate::types::OsFamily;

    fn redhat() -> OsFacts {
        let mut facts = OsFacts::new(OsFamily::RedHat, 3);
        facts.major_release = Some(9);
        facts
    }

    fn id_of(plan: &ResourcePlan, wanted: &str) -> ResourceId {
        plan.resources()
            .iter()
            .map(|r| r.id())
            .find(|id| id.as_str() == wanted)
            .unwrap_or_else(|| panic!("{} not planned", wanted))
    }

    #[test]
    fn test_archive_plan_cross_edges() {
        let params = ModuleParams {
            install_method: Some("archive".to_string()),
            version: Some(Some("1.12.0".to_string())),
            ..Default::default()
        };
        let plan = plan(&params, &redhat()).expect("plan"); // test: known-good input

        let binary = id_of(&plan, "file:openbao_binary");
        let capability = id_of(&plan, "capability:openbao_binary_capability");
        let service = id_of(&plan, "service:openbao");
        let config = id_of(&plan, "file:/etc/openbao/config.json");
        let config_dir = id_of(&plan, "file:/etc/openbao");
        let user = id_of(&plan, "user:openbao");

        assert_eq!(plan.edge(&binary, &capability), Some(EdgeKind::Notify));
        assert_eq!(plan.edge(&capability, &service), Some(EdgeKind::Before));
        assert_eq!(plan.edge(&binary, &service), Some(EdgeKind::Before));
        assert_eq!(plan.edge(&config, &service), Some(EdgeKind::Notify));
        assert_eq!(plan.edge(&user, &config_dir), Some(EdgeKind::Before));
        assert_eq!(plan.edge(&user, &config), Some(EdgeKind::Before));
    }

    #[test]
    fn test_repo_plan_with_forced_capability() {
        let params = ModuleParams {
            install_method: Some("repo".to_string()),
            manage_file_capabilities: Some(true),
            ..Default::default()
        };
        let plan = plan(&params, &redhat()).expect("plan"); // test: known-good input
        let package = id_of(&plan, "package:openbao");
        let capability = id_of(&plan, "capability:openbao_binary_capability");
        assert_eq!(plan.edge(&package, &capability), Some(EdgeKind::Notify));
    }

    #[test]
    fn test_detailed_outcome() {
        let params = ModuleParams {
            install_method: Some("archive".to_string()),
            version: Some(Some("0.7.0".to_string())),
            ..Default::default()
        };
        let outcome = plan_detailed(&params, &redhat()).expect("plan"); // test: known-good input
        assert_eq!(
            outcome.source,
            SourceSpec::Archive {
                url: "https://releases.hashicorp.com/openbao/0.7.0/openbao_0.7.0_linux_amd64.zip"
                    .to_string()
            }
        );
        assert_eq!(
            outcome.exec_start,
            "/usr/local/bin/bao server -config=/etc/openbao/config.json "
        );
        assert!(outcome.unit_content.contains(&outcome.exec_start));
        assert!(outcome.config_content.ends_with("}\n"));
    }

    #[test]
    fn test_errors_abort_before_any_plan() {
        let params = ModuleParams {
            install_method: Some("archive".to_string()),
            version: Some(None),
            ..Default::default()
        };
        assert!(matches!(plan(&params, &redhat()), Err(PlanError::MissingVersion)));
    }

    #[test]
    fn test_shared_directory_names_both_parameters() {
        let params = ModuleParams {
            manage_download_dir: Some(true),
            manage_storage_dir: Some(true),
            storage: serde_json::from_value(serde_json::json!({"file": {"path": "/tmp"}})).ok(),
            ..Default::default()
        };
        match plan(&params, &redhat()) {
            Err(PlanError::InvalidParameter { name, .. }) => assert_eq!(name, "download_dir, storage"),
            other => panic!("unexpected result {:?}", other),
        }

        let params = ModuleParams {
            manage_storage_dir: Some(true),
            storage: serde_json::from_value(serde_json::json!({"file": {"path": "/etc/openbao"}})).ok(),
            ..Default::default()
        };
        match plan(&params, &redhat()) {
            Err(PlanError::InvalidParameter { name, .. }) => assert_eq!(name, "config_dir, storage"),
            other => panic!("unexpected result {:?}", other),
        }
    }
}
