//! Workflow-level error type.

use crate::auth::AuthError;
use crate::deployment::DeploymentError;
use crate::secrets::SecretError;
use kfgcp_core::{ConfigError, ErrorKind};
use kfgcp_policy::PolicyError;
use kfgcp_provider::ProviderError;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of an apply, delete or init workflow.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("template for required resource group '{group}' not found at {}", path.display())]
    MissingTemplate { group: String, path: PathBuf },

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Deployment(#[from] DeploymentError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Secret(#[from] SecretError),

    /// A collaborator call outside the reconcilers failed.
    #[error("{context}: {source}")]
    Provider {
        context: String,
        #[source]
        source: ProviderError,
    },
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::Config(e) => e.kind(),
            ReconcileError::MissingTemplate { .. } => ErrorKind::Validation,
            ReconcileError::Auth(e) => e.kind(),
            ReconcileError::Deployment(e) => e.kind(),
            ReconcileError::Policy(e) => e.kind(),
            ReconcileError::Secret(e) => e.kind(),
            ReconcileError::Provider { source, .. } => source.kind(),
        }
    }

    pub(crate) fn provider(context: impl Into<String>, source: ProviderError) -> Self {
        ReconcileError::Provider {
            context: context.into(),
            source,
        }
    }
}
