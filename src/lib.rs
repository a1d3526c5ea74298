//! OpenBao install planner
//!
//! Derives the resources needed to install, configure and run an OpenBao
//! server from declarative parameters and host facts. Planning is pure:
//! the host is never touched, and identical inputs give an identical plan.
//!
//! ```no_run
//! use bao_planner::{ModuleParams, OsFacts, OsFamily};
//!
//! let params: ModuleParams = serde_json::from_str(r#"{"install_method": "archive", "version": "2.0.0"}"#)?;
//! let facts = OsFacts::new(OsFamily::Debian, 4);
//! let plan = bao_planner::plan(&params, &facts)?;
//! println!("{}", plan.summary()?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cli;
pub mod engine;
pub mod error;
pub mod facts;
pub mod params;
pub mod plan;
pub mod planner;
pub mod platform;
pub mod types;

pub use error::{PlanError, Result};
pub use facts::OsFacts;
pub use params::{ModuleParams, NormalizedParams, normalize};
pub use plan::{Edge, EdgeKind, Resource, ResourceId, ResourcePlan};
pub use planner::{PlanOutcome, plan, plan_detailed};
pub use types::{FileMode, InstallMethod, OsFamily, PackageEnsure, ServiceEnsure, Version};

// Decision functions
pub use engine::config::{ConfigDocument, Listener, RenderedConfig, Section, render_config};
pub use engine::install::{InstallStrategy, SourceSpec, plan_install};
pub use engine::service::{ServiceDefinition, build_service, render_unit, start_command};
