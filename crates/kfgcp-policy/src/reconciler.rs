//! Optimistic-concurrency driver for policy writes.

use crate::error::PolicyError;
use crate::merge::{clear_owned, merge_templates};
use kfgcp_core::{BindingTemplate, PolicyDocument, PolicyRetryConfig, ServiceIdentities};
use kfgcp_provider::PolicyApi;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which write a policy pass is performing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyPhase {
    /// Strip owned members before a rewrite.
    Clear,
    /// Merge the binding templates.
    Rewrite,
    /// Strip owned members on deletion.
    Remove,
}

impl fmt::Display for PolicyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PolicyPhase::Clear => "clear",
            PolicyPhase::Rewrite => "rewrite",
            PolicyPhase::Remove => "remove",
        };
        f.write_str(s)
    }
}

/// Reconciles one project's access policy.
pub struct PolicyReconciler {
    api: Arc<dyn PolicyApi>,
    project: String,
    retry: PolicyRetryConfig,
}

impl PolicyReconciler {
    pub fn new(api: Arc<dyn PolicyApi>, project: impl Into<String>, retry: PolicyRetryConfig) -> Self {
        Self {
            api,
            project: project.into(),
            retry,
        }
    }

    /// Clear this deployment's members, then merge `templates` into a fresh
    /// copy of the policy.
    ///
    /// `caller_email` fills the IAP placeholder.
    pub async fn rewrite(
        &self,
        identities: &ServiceIdentities,
        templates: &[BindingTemplate],
        caller_email: &str,
    ) -> Result<(), PolicyError> {
        self.write_with_retry(PolicyPhase::Clear, |policy| clear_owned(policy, identities))
            .await?;
        self.write_with_retry(PolicyPhase::Rewrite, |policy| {
            merge_templates(policy, templates, identities, caller_email)
        })
        .await?;
        Ok(())
    }

    /// Strip every member owned by `identities` from every binding.
    pub async fn remove_owned(&self, identities: &ServiceIdentities) -> Result<(), PolicyError> {
        self.write_with_retry(PolicyPhase::Remove, |policy| clear_owned(policy, identities))
            .await?;
        Ok(())
    }

    /// Fetch, edit and write back until the write is accepted.
    ///
    /// Every attempt starts from a fresh read so the edit is always computed
    /// against the etag it is written with. Returns whether a write happened.
    async fn write_with_retry<F>(&self, phase: PolicyPhase, mut edit: F) -> Result<bool, PolicyError>
    where
        F: FnMut(&mut PolicyDocument) -> bool,
    {
        let attempts = self.retry.max_attempts.max(1);

        for attempt in 1..=attempts {
            let mut policy = self
                .api
                .get_policy(&self.project)
                .await
                .map_err(|source| self.provider_error(phase, source))?;

            if !edit(&mut policy) {
                debug!(project = %self.project, phase = %phase, "Policy already up to date, skipping write");
                return Ok(false);
            }

            match self.api.set_policy(&self.project, &policy).await {
                Ok(()) => {
                    info!(
                        project = %self.project,
                        phase = %phase,
                        bindings = policy.bindings.len(),
                        attempt,
                        "Policy written"
                    );
                    return Ok(true);
                }
                Err(e) if e.is_conflict() => {
                    warn!(
                        project = %self.project,
                        phase = %phase,
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "Stale policy etag, retrying from a fresh read"
                    );
                }
                Err(source) => return Err(self.provider_error(phase, source)),
            }
        }

        Err(PolicyError::ConflictRetriesExhausted {
            phase,
            project: self.project.clone(),
            attempts,
        })
    }

    fn provider_error(&self, phase: PolicyPhase, source: kfgcp_provider::ProviderError) -> PolicyError {
        PolicyError::Provider {
            phase,
            project: self.project.clone(),
            source,
        }
    }
}
