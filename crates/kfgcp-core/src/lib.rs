//! # kfgcp-core
//!
//! Shared types for the kfgcp reconciliation workspace.
//!
//! This crate holds everything the workflow crates agree on without talking to
//! a provider:
//! - the declarative deployment spec (`app.yaml`) and its derived paths
//! - resource groups, operations and the observed deployment state
//! - access-policy documents and binding templates
//! - secret specs and the service identities owned by a deployment
//! - the narrow template loader that turns a template file plus its imports
//!   into a [`TargetConfiguration`]
//!
//! Provider clients, retries and workflows live in the other `kfgcp-*` crates.

pub mod config;
pub mod deployment;
pub mod identity;
pub mod policy;
pub mod secret;
pub mod template;

pub use config::{ConfigError, DeploymentSpec, PolicyRetryConfig, PollerConfig, ResourceGroupConfig};
pub use deployment::{
    Deployment, DeploymentState, DeploymentStatus, ImportFile, Operation, OperationError,
    OperationStatus, ResourceGroup, TargetConfiguration,
};
pub use identity::{IdentityRole, ServiceIdentities, caller_member};
pub use policy::{Binding, BindingTemplate, PolicyDocument};
pub use secret::SecretSpec;

/// Closed classification of every failure a workflow can report.
///
/// Each error type in the workspace maps onto one of these through a `kind()`
/// method, so callers can decide what to do without looking at provider
/// specific codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or unreadable template, import or spec file.
    Config,
    /// Network error, 5xx, or an operation that is not done yet.
    TransientProvider,
    /// An operation finished with a provider error code.
    TerminalProvider,
    /// The requested object does not exist.
    NotFound,
    /// A write was rejected because its concurrency token was stale.
    ConcurrencyConflict,
    /// A required input is missing; raised before any provider call.
    Validation,
    /// The caller's deadline expired while waiting.
    Cancelled,
    /// A collaborator failure that is passed through unchanged.
    External,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Config => "config",
            ErrorKind::TransientProvider => "transient_provider",
            ErrorKind::TerminalProvider => "terminal_provider",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ConcurrencyConflict => "concurrency_conflict",
            ErrorKind::Validation => "validation",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::External => "external",
        };
        f.write_str(s)
    }
}
