//! Resource groups, provider operations and observed deployment state.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One unit submitted as a whole to the deployment API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroup {
    /// Short label such as `storage` or `cluster`.
    pub name: String,
    /// Deployment name used with the provider.
    pub deployment: String,
    /// Template file the target configuration is built from.
    pub template: PathBuf,
    /// Required groups must succeed; optional ones are skipped when their
    /// template is absent.
    pub required: bool,
}

impl ResourceGroup {
    pub fn template_exists(&self) -> bool {
        self.template.is_file()
    }
}

/// An imported template fragment sent alongside the main config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportFile {
    pub name: String,
    pub content: String,
}

/// Everything the provider needs to materialise a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfiguration {
    pub config: String,
    #[serde(default)]
    pub imports: Vec<ImportFile>,
}

/// Provider-side progress of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationStatus {
    Pending,
    Running,
    Done,
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationStatus::Pending => f.write_str("PENDING"),
            OperationStatus::Running => f.write_str("RUNNING"),
            OperationStatus::Done => f.write_str("DONE"),
        }
    }
}

/// Error attached to a finished operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    pub http_code: u16,
    pub message: String,
    #[serde(default)]
    pub details: Vec<String>,
}

/// A provider handle to an asynchronous action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    pub status: OperationStatus,
    #[serde(default)]
    pub error: Option<OperationError>,
}

impl Operation {
    pub fn is_done(&self) -> bool {
        self.status == OperationStatus::Done
    }

    /// The error of a finished operation that carries a non-zero code.
    pub fn failure(&self) -> Option<&OperationError> {
        if !self.is_done() {
            return None;
        }
        self.error.as_ref().filter(|e| e.http_code > 0)
    }
}

/// A deployment as the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub name: String,
    /// Opaque concurrency token; must accompany every update.
    #[serde(default)]
    pub fingerprint: String,
    /// Last operation run against the deployment.
    #[serde(default)]
    pub operation: Option<Operation>,
    /// Current target configuration, when the provider exposes it.
    #[serde(default)]
    pub target: Option<TargetConfiguration>,
}

/// Coarse state of a resource group's deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentStatus {
    Pending,
    Running,
    Done,
    Failed,
}

/// State of one resource group, rebuilt from a provider response on every
/// call and never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentState {
    pub group: String,
    pub fingerprint: String,
    pub operation: Option<String>,
    pub status: DeploymentStatus,
    pub http_error_code: Option<u16>,
}

impl DeploymentState {
    pub fn observe(group: &str, deployment: &Deployment) -> Self {
        let (operation, status, http_error_code) = match &deployment.operation {
            None => (None, DeploymentStatus::Done, None),
            Some(op) => {
                let status = match (op.status, op.failure()) {
                    (OperationStatus::Pending, _) => DeploymentStatus::Pending,
                    (OperationStatus::Running, _) => DeploymentStatus::Running,
                    (OperationStatus::Done, Some(_)) => DeploymentStatus::Failed,
                    (OperationStatus::Done, None) => DeploymentStatus::Done,
                };
                (Some(op.name.clone()), status, op.failure().map(|e| e.http_code))
            }
        };
        Self {
            group: group.to_string(),
            fingerprint: deployment.fingerprint.clone(),
            operation,
            status,
            http_error_code,
        }
    }

    /// Whether an operation is still running against the deployment.
    pub fn in_flight(&self) -> bool {
        matches!(self.status, DeploymentStatus::Pending | DeploymentStatus::Running)
    }
}
