//! Error types for policy reconciliation.

use crate::reconciler::PolicyPhase;
use kfgcp_core::ErrorKind;
use kfgcp_provider::ProviderError;
use thiserror::Error;

/// A policy phase that could not be completed.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The policy service failed with something other than a stale etag.
    #[error("policy {phase} for project '{project}' failed: {source}")]
    Provider {
        phase: PolicyPhase,
        project: String,
        #[source]
        source: ProviderError,
    },

    /// Every attempt of a phase was rejected for a stale etag.
    #[error("policy {phase} for project '{project}' still conflicting after {attempts} attempts")]
    ConflictRetriesExhausted {
        phase: PolicyPhase,
        project: String,
        attempts: u32,
    },
}

impl PolicyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PolicyError::Provider { source, .. } => source.kind(),
            PolicyError::ConflictRetriesExhausted { .. } => ErrorKind::ConcurrencyConflict,
        }
    }

    pub fn phase(&self) -> PolicyPhase {
        match self {
            PolicyError::Provider { phase, .. } | PolicyError::ConflictRetriesExhausted { phase, .. } => *phase,
        }
    }
}
