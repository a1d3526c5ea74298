//! Resource plan: the planner's output.
//!
//! A plan is a set of desired-state resource declarations plus explicit
//! ordering edges between them. It carries no behaviour of its own; the
//! convergence engine applies it in `topological_order()`.
//!
//! # Edges
//!
//! | Kind     | Meaning |
//! |----------|---------|
//! | `Before` | `from` must be converged before `to` |
//! | `Notify` | as `Before`, and a change to `from` refreshes `to` (restart, re-grant) |

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;

use crate::error::{PlanError, Result};
use crate::types::{FileMode, PackageEnsure, ServiceEnsure};

// ============================================================================
// Resource Types
// ============================================================================

/// Stable identifier of a resource within a plan (`kind:title`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    fn new(kind: &str, title: impl fmt::Display) -> Self {
        Self(format!("{}:{}", kind, title))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single desired-state declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Resource {
    Group {
        name: String,
        system: bool,
    },
    User {
        name: String,
        group: String,
        system: bool,
        shell: PathBuf,
    },
    /// APT source list entry
    AptSource {
        name: String,
        location: String,
        release: String,
        repos: String,
        key_source: String,
    },
    /// YUM/DNF repository definition
    YumRepo {
        name: String,
        baseurl: String,
        gpgkey: String,
        gpgcheck: bool,
    },
    Package {
        name: String,
        ensure: PackageEnsure,
    },
    /// Download an archive and unpack it
    ArchiveFetch {
        path: PathBuf,
        source: String,
        extract_path: PathBuf,
        /// Skip the fetch when this path already exists
        creates: Option<PathBuf>,
        cleanup: bool,
    },
    Directory {
        path: PathBuf,
        owner: String,
        group: String,
        mode: FileMode,
        purge: bool,
        recurse: bool,
    },
    /// Regular file; `content: None` only asserts presence and metadata
    File {
        title: String,
        path: PathBuf,
        owner: String,
        group: String,
        mode: FileMode,
        content: Option<String>,
    },
    /// Linux file capability on an executable
    CapabilityGrant {
        title: String,
        path: PathBuf,
        capability: String,
    },
    Service {
        name: String,
        enable: bool,
        ensure: ServiceEnsure,
    },
}

impl Resource {
    /// Identifier used for edges and lookups
    pub fn id(&self) -> ResourceId {
        match self {
            Self::Group { name, .. } => ResourceId::new("group", name),
            Self::User { name, .. } => ResourceId::new("user", name),
            Self::AptSource { name, .. } | Self::YumRepo { name, .. } => {
                ResourceId::new("repository", name)
            }
            Self::Package { name, .. } => ResourceId::new("package", name),
            Self::ArchiveFetch { path, .. } => ResourceId::new("archive", path.display()),
            Self::Directory { path, .. } => ResourceId::new("file", path.display()),
            Self::File { title, .. } => ResourceId::new("file", title),
            Self::CapabilityGrant { title, .. } => ResourceId::new("capability", title),
            Self::Service { name, .. } => ResourceId::new("service", name),
        }
    }

    /// Path on disk for file-like resources
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::ArchiveFetch { path, .. }
            | Self::Directory { path, .. }
            | Self::File { path, .. }
            | Self::CapabilityGrant { path, .. } => Some(path),
            _ => None,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group { name, .. } => write!(f, "Group({})", name),
            Self::User { name, group, .. } => write!(f, "User({}, group={})", name, group),
            Self::AptSource { name, location, release, .. } => {
                write!(f, "AptSource({}, {} {})", name, location, release)
            }
            Self::YumRepo { name, baseurl, .. } => write!(f, "YumRepo({}, {})", name, baseurl),
            Self::Package { name, ensure } => write!(f, "Package({}, ensure={})", name, ensure),
            Self::ArchiveFetch { path, source, creates, .. } => write!(
                f,
                "ArchiveFetch({} <- {}, creates={:?})",
                path.display(),
                source,
                creates
            ),
            Self::Directory { path, owner, group, mode, .. } => {
                write!(f, "Directory({}, {}:{}, {})", path.display(), owner, group, mode)
            }
            Self::File { path, owner, group, mode, .. } => {
                write!(f, "File({}, {}:{}, {})", path.display(), owner, group, mode)
            }
            Self::CapabilityGrant { path, capability, .. } => {
                write!(f, "CapabilityGrant({} += {})", path.display(), capability)
            }
            Self::Service { name, enable, ensure } => {
                write!(f, "Service({}, ensure={}, enable={})", name, ensure, enable)
            }
        }
    }
}

/// Kind of ordering edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Before,
    Notify,
}

/// Ordering constraint between two resources
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Edge {
    pub from: ResourceId,
    pub to: ResourceId,
    pub kind: EdgeKind,
}

// ============================================================================
// Resource Plan
// ============================================================================

/// Resources plus ordering edges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourcePlan {
    resources: Vec<Resource>,
    edges: Vec<Edge>,
}

impl ResourcePlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource, returning its id.
    ///
    /// Declaring the same resource twice is a no-op; declaring two
    /// different resources under one id is an error.
    pub fn insert(&mut self, resource: Resource) -> Result<ResourceId> {
        let id = resource.id();
        match self.resources.iter().find(|r| r.id() == id) {
            Some(existing) if *existing == resource => Ok(id),
            Some(_) => Err(PlanError::invalid_plan(format!(
                "conflicting declarations for {}",
                id
            ))),
            None => {
                self.resources.push(resource);
                Ok(id)
            }
        }
    }

    /// `from` must be applied before `to`.
    pub fn before(&mut self, from: &ResourceId, to: &ResourceId) -> bool {
        self.link(from, to, EdgeKind::Before)
    }

    /// `from` must be applied before `to`, and changes to `from` refresh `to`.
    pub fn notify(&mut self, from: &ResourceId, to: &ResourceId) -> bool {
        self.link(from, to, EdgeKind::Notify)
    }

    /// Add an edge when both endpoints are part of the plan.
    ///
    /// Returns false (and adds nothing) when either endpoint is absent, so
    /// callers can wire edges unconditionally for optional resources.
    fn link(&mut self, from: &ResourceId, to: &ResourceId, kind: EdgeKind) -> bool {
        if !self.contains(from) || !self.contains(to) {
            tracing::trace!("Skipping edge {} -> {}: endpoint not planned", from, to);
            return false;
        }
        let edge = Edge {
            from: from.clone(),
            to: to.clone(),
            kind,
        };
        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
        true
    }

    /// Absorb another plan's resources and edges.
    pub fn merge(&mut self, other: ResourcePlan) -> Result<()> {
        for resource in other.resources {
            self.insert(resource)?;
        }
        for edge in other.edges {
            self.link(&edge.from, &edge.to, edge.kind);
        }
        Ok(())
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.resources.iter().any(|r| r.id() == *id)
    }

    pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id() == *id)
    }

    /// Find a file-like resource by its path on disk
    pub fn find_path(&self, path: impl AsRef<std::path::Path>) -> Option<&Resource> {
        let path = path.as_ref();
        self.resources
            .iter()
            .filter(|r| matches!(r, Resource::File { .. } | Resource::Directory { .. }))
            .find(|r| r.path().is_some_and(|p| p == path))
    }

    /// Edge between two resources, if any
    pub fn edge(&self, from: &ResourceId, to: &ResourceId) -> Option<EdgeKind> {
        self.edges
            .iter()
            .find(|e| e.from == *from && e.to == *to)
            .map(|e| e.kind)
    }

    /// Resources in an order that honours every edge.
    ///
    /// Kahn's algorithm; among ready resources the earliest declared goes
    /// first, so the order is deterministic for a given plan.
    pub fn topological_order(&self) -> Result<Vec<&Resource>> {
        let index: HashMap<ResourceId, usize> = self
            .resources
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id(), i))
            .collect();

        let mut in_degree = vec![0usize; self.resources.len()];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); self.resources.len()];
        for edge in &self.edges {
            let (Some(&from), Some(&to)) = (index.get(&edge.from), index.get(&edge.to)) else {
                return Err(PlanError::invalid_plan(format!(
                    "edge {} -> {} references an undeclared resource",
                    edge.from, edge.to
                )));
            };
            successors[from].push(to);
            in_degree[to] += 1;
        }

        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(self.resources.len());

        while let Some(next) = ready.pop_first() {
            order.push(&self.resources[next]);
            for &succ in &successors[next] {
                in_degree[succ] -= 1;
                if in_degree[succ] == 0 {
                    ready.insert(succ);
                }
            }
        }

        if order.len() != self.resources.len() {
            let stuck: Vec<String> = in_degree
                .iter()
                .enumerate()
                .filter(|(_, d)| **d > 0)
                .map(|(i, _)| self.resources[i].id().to_string())
                .collect();
            return Err(PlanError::invalid_plan(format!(
                "ordering cycle between {}",
                stuck.join(", ")
            )));
        }

        Ok(order)
    }

    /// Returns a summary of the plan for logging/display.
    pub fn summary(&self) -> Result<String> {
        let order = self.topological_order()?;
        let mut lines = vec![format!("Resource Plan ({} resources):", order.len())];
        for (i, resource) in order.iter().enumerate() {
            lines.push(format!("  {}. {}", i + 1, resource));
            let id = resource.id();
            for edge in self.edges.iter().filter(|e| e.from == id) {
                let arrow = match edge.kind {
                    EdgeKind::Before => "before",
                    EdgeKind::Notify => "notifies",
                };
                lines.push(format!("       {} {}", arrow, edge.to));
            }
        }
        Ok(lines.join("\n"))
    }

    /// JSON export for the convergence engine, resources in apply order.
    pub fn to_json(&self) -> Result<String> {
        #[derive(Serialize)]
        struct Planned<'a> {
            id: ResourceId,
            #[serde(flatten)]
            resource: &'a Resource,
            before: Vec<&'a ResourceId>,
            notify: Vec<&'a ResourceId>,
        }

        #[derive(Serialize)]
        struct Export<'a> {
            resources: Vec<Planned<'a>>,
        }

        let planned: Vec<Planned<'_>> = self
            .topological_order()?
            .into_iter()
            .map(|resource| {
                let id = resource.id();
                let targets = |kind: EdgeKind| -> Vec<&ResourceId> {
                    self.edges
                        .iter()
                        .filter(|e| e.from == id && e.kind == kind)
                        .map(|e| &e.to)
                        .collect()
                };
                Planned {
                    before: targets(EdgeKind::Before),
                    notify: targets(EdgeKind::Notify),
                    id,
                    resource,
                }
            })
            .collect();

        let mut json = serde_json::to_string_pretty(&Export { resources: planned })?;
        json.push('\n');
        Ok(json)
    }
}

// ============================================================================
// Tests
// ============================================================================
