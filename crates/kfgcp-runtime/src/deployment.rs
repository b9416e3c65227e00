//! Drives one resource group's deployment to its target configuration.

use crate::poller::{PollError, Poller};
use kfgcp_core::{
    ConfigError, Deployment, DeploymentState, ErrorKind, ResourceGroup, TargetConfiguration,
};
use kfgcp_provider::{DeploymentApi, ProviderError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// What a reconcile call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// A new deployment was inserted.
    Inserted,
    /// The deployment was updated with a new target.
    Updated,
    /// Another caller's in-flight operation was waited on instead.
    Attached,
    /// The deployment already had this target.
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteAction {
    Deleted,
    AlreadyAbsent,
}

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("resource group '{group}': {source}")]
    Config {
        group: String,
        #[source]
        source: ConfigError,
    },

    #[error("resource group '{group}': looking up deployment '{deployment}' failed: {source}")]
    Lookup {
        group: String,
        deployment: String,
        #[source]
        source: ProviderError,
    },

    #[error("resource group '{group}': {action} of deployment '{deployment}' rejected: {source}")]
    Submission {
        group: String,
        deployment: String,
        action: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error("resource group '{group}': {source}")]
    Operation {
        group: String,
        #[source]
        source: PollError,
    },
}

impl DeploymentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeploymentError::Config { source, .. } => source.kind(),
            DeploymentError::Lookup { source, .. } | DeploymentError::Submission { source, .. } => {
                source.kind()
            }
            DeploymentError::Operation { source, .. } => source.kind(),
        }
    }
}

/// Inserts, updates and deletes deployments in one project.
///
/// Holds no state between calls: every decision starts from a fresh read of
/// the provider, so concurrent callers converge on the same operation rather
/// than racing with their own submissions.
pub struct DeploymentOrchestrator {
    api: Arc<dyn DeploymentApi>,
    project: String,
    poller: Poller,
}

impl DeploymentOrchestrator {
    pub fn new(api: Arc<dyn DeploymentApi>, project: impl Into<String>, poller: Poller) -> Self {
        Self {
            api,
            project: project.into(),
            poller,
        }
    }

    /// Bring `group`'s deployment to the configuration built from its
    /// template and wait for the provider to finish.
    pub async fn reconcile(&self, group: &ResourceGroup) -> Result<ReconcileAction, DeploymentError> {
        let target = TargetConfiguration::from_template(&group.template).map_err(|source| {
            DeploymentError::Config {
                group: group.name.clone(),
                source,
            }
        })?;

        match self.api.get_deployment(&self.project, &group.deployment).await {
            Ok(existing) => self.converge(group, existing, &target, true).await,
            Err(e) if e.is_not_found() => self.insert(group, &target).await,
            Err(source) => Err(self.lookup_error(group, source)),
        }
    }

    async fn insert(&self, group: &ResourceGroup, target: &TargetConfiguration) -> Result<ReconcileAction, DeploymentError> {
        info!(
            group = %group.name,
            deployment = %group.deployment,
            imports = target.imports.len(),
            "Creating deployment"
        );
        match self
            .api
            .insert_deployment(&self.project, &group.deployment, target)
            .await
        {
            Ok(op) => {
                self.wait(group, &op.name).await?;
                Ok(ReconcileAction::Inserted)
            }
            Err(e) if e.is_conflict() => {
                warn!(
                    group = %group.name,
                    deployment = %group.deployment,
                    "Deployment was created concurrently, re-reading"
                );
                let existing = self.fetch(group).await?;
                self.converge(group, existing, target, false).await
            }
            Err(source) => Err(self.submission_error(group, "insert", source)),
        }
    }

    /// Decide what to do with a deployment that exists.
    ///
    /// An in-flight operation is attached to, never resubmitted over. A
    /// finished deployment is updated unless the provider already reports the
    /// same target.
    async fn converge(
        &self,
        group: &ResourceGroup,
        existing: Deployment,
        target: &TargetConfiguration,
        reread_on_conflict: bool,
    ) -> Result<ReconcileAction, DeploymentError> {
        let state = DeploymentState::observe(&group.name, &existing);

        if state.in_flight() {
            if let Some(operation) = &state.operation {
                info!(
                    group = %group.name,
                    deployment = %group.deployment,
                    operation = %operation,
                    "Deployment has an operation in flight, waiting on it"
                );
                self.wait(group, operation).await?;
                return Ok(ReconcileAction::Attached);
            }
        }

        if state.http_error_code.is_none() && existing.target.as_ref() == Some(target) {
            info!(group = %group.name, deployment = %group.deployment, "Deployment is up to date");
            return Ok(ReconcileAction::Unchanged);
        }

        info!(
            group = %group.name,
            deployment = %group.deployment,
            previous_error = ?state.http_error_code,
            "Updating deployment"
        );
        match self
            .api
            .update_deployment(&self.project, &group.deployment, &state.fingerprint, target)
            .await
        {
            Ok(op) => {
                self.wait(group, &op.name).await?;
                Ok(ReconcileAction::Updated)
            }
            Err(e) if e.is_conflict() && reread_on_conflict => {
                warn!(
                    group = %group.name,
                    deployment = %group.deployment,
                    error = %e,
                    "Deployment changed concurrently, re-reading"
                );
                let fresh = DeploymentState::observe(&group.name, &self.fetch(group).await?);
                let in_flight = fresh.in_flight();
                match fresh.operation {
                    Some(operation) if in_flight => {
                        self.wait(group, &operation).await?;
                        Ok(ReconcileAction::Attached)
                    }
                    _ => Err(self.submission_error(group, "update", e)),
                }
            }
            Err(source) => Err(self.submission_error(group, "update", source)),
        }
    }

    /// Delete `group`'s deployment. A deployment that does not exist counts
    /// as deleted.
    pub async fn delete(&self, group: &ResourceGroup) -> Result<DeleteAction, DeploymentError> {
        info!(group = %group.name, deployment = %group.deployment, "Deleting deployment");
        let op = match self
            .api
            .delete_deployment(&self.project, &group.deployment)
            .await
        {
            Ok(op) => op,
            Err(e) if e.is_not_found() => {
                info!(group = %group.name, deployment = %group.deployment, "Deployment already absent");
                return Ok(DeleteAction::AlreadyAbsent);
            }
            Err(source) => return Err(self.submission_error(group, "delete", source)),
        };

        match self.wait(group, &op.name).await {
            Ok(()) => Ok(DeleteAction::Deleted),
            Err(DeploymentError::Operation { source, .. }) if source.code() == Some(404) => {
                info!(group = %group.name, deployment = %group.deployment, "Deployment already absent");
                Ok(DeleteAction::AlreadyAbsent)
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch(&self, group: &ResourceGroup) -> Result<Deployment, DeploymentError> {
        self.api
            .get_deployment(&self.project, &group.deployment)
            .await
            .map_err(|source| self.lookup_error(group, source))
    }

    async fn wait(&self, group: &ResourceGroup, operation: &str) -> Result<(), DeploymentError> {
        self.poller
            .wait(&group.name, operation, |name| async move {
                self.api.get_operation(&self.project, &name).await
            })
            .await
            .map(|_| ())
            .map_err(|source| DeploymentError::Operation {
                group: group.name.clone(),
                source,
            })
    }

    fn lookup_error(&self, group: &ResourceGroup, source: ProviderError) -> DeploymentError {
        DeploymentError::Lookup {
            group: group.name.clone(),
            deployment: group.deployment.clone(),
            source,
        }
    }

    fn submission_error(&self, group: &ResourceGroup, action: &'static str, source: ProviderError) -> DeploymentError {
        DeploymentError::Submission {
            group: group.name.clone(),
            deployment: group.deployment.clone(),
            action,
            source,
        }
    }
}
