//! Error handling module for the install planner
//!
//! Every failure is raised while planning, before a single resource is
//! handed to the convergence engine. A failed run therefore never leaves
//! partial infrastructure behind that the planner is responsible for.

use thiserror::Error;

/// Main error type for planning
#[derive(Error, Debug)]
pub enum PlanError {
    /// Bad input shape or range (aborts before any resource is declared)
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Archive install requested without a version or explicit download URL
    #[error("Archive install requires 'version' (or an explicit 'download_url')")]
    MissingVersion,

    /// Repository management requested on a family without a repository concept
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// Capability management explicitly requested where no tooling exists
    #[error("Unsupported capability tooling: {0}")]
    UnsupportedCapabilityTooling(String),

    /// The assembled resource graph is inconsistent (dangling edge or cycle)
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    /// IO errors (reading parameter or fact files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for planner operations
pub type Result<T> = std::result::Result<T, PlanError>;

impl PlanError {
    /// Create an invalid parameter error
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an unsupported platform error
    pub fn unsupported_platform(msg: impl Into<String>) -> Self {
        Self::UnsupportedPlatform(msg.into())
    }

    /// Create an unsupported capability tooling error
    pub fn unsupported_capability_tooling(msg: impl Into<String>) -> Self {
        Self::UnsupportedCapabilityTooling(msg.into())
    }

    /// Create an invalid plan error
    pub fn invalid_plan(msg: impl Into<String>) -> Self {
        Self::InvalidPlan(msg.into())
    }
}
