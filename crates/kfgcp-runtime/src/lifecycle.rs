//! Apply, delete and project-initialization workflows.
//!
//! Every step runs sequentially and re-reads provider state before acting, so
//! a workflow can be re-run after a partial failure, or started from two
//! processes at once, without local bookkeeping.

use crate::auth::AuthCredentials;
use crate::deployment::{DeleteAction, DeploymentOrchestrator, ReconcileAction};
use crate::error::ReconcileError;
use crate::poller::Poller;
use crate::secrets::{SecretOutcome, SecretProvisioner};
use kfgcp_core::config::REQUIRED_APIS;
use kfgcp_core::secret::{ADMIN_SECRET_NAME, MESH_NAMESPACE, USER_SECRET_NAME};
use kfgcp_core::{BindingTemplate, ConfigError, DeploymentSpec, IdentityRole, ResourceGroup};
use kfgcp_policy::PolicyReconciler;
use kfgcp_provider::{ClusterClient, ClusterRef, ClusterRoleBinding, CloudClients};
use std::fs;
use tracing::{debug, info};

/// Cluster role binding granting the operator cluster-admin.
pub const ADMIN_BINDING_NAME: &str = "default-admin";
pub const ADMIN_CLUSTER_ROLE: &str = "cluster-admin";

/// A mesh manifest read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub name: String,
    pub content: String,
}

/// Everything an apply will touch, worked out from local files alone.
#[derive(Debug, Clone)]
pub struct ApplyPlan {
    /// Groups to reconcile, in order.
    pub groups: Vec<ResourceGroup>,
    /// Optional groups skipped because their template is absent.
    pub skipped: Vec<ResourceGroup>,
    pub bindings: Vec<BindingTemplate>,
    /// Mesh manifests in install order; empty without the mesh.
    pub manifests: Vec<Manifest>,
    /// `(namespace, name)` of every secret provisioned.
    pub secrets: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretReport {
    pub namespace: String,
    pub name: String,
    pub outcome: SecretOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    pub groups: Vec<(String, ReconcileAction)>,
    pub skipped: Vec<String>,
    pub secrets: Vec<SecretReport>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteReport {
    pub groups: Vec<(String, DeleteAction)>,
    pub skipped: Vec<String>,
}

/// Sequences the reconcilers for one deployment spec.
pub struct Coordinator {
    clients: CloudClients,
    spec: DeploymentSpec,
}

impl Coordinator {
    pub fn new(clients: CloudClients, spec: DeploymentSpec) -> Self {
        Self { clients, spec }
    }

    pub fn spec(&self) -> &DeploymentSpec {
        &self.spec
    }

    /// Work out the apply without calling the provider.
    ///
    /// Fails when a required template, the binding templates or a mesh
    /// manifest cannot be read.
    pub fn plan(spec: &DeploymentSpec) -> Result<ApplyPlan, ReconcileError> {
        let mut groups = Vec::new();
        let mut skipped = Vec::new();
        for group in spec.resource_groups() {
            if group.template_exists() {
                groups.push(group);
            } else if group.required {
                return Err(ReconcileError::MissingTemplate {
                    group: group.name,
                    path: group.template,
                });
            } else {
                skipped.push(group);
            }
        }

        let bindings = BindingTemplate::load(spec.iam_bindings_path())?;

        let manifests = if spec.use_istio {
            let paths = spec.mesh_manifests().ok_or_else(|| {
                ConfigError::Config("`repo` must be set when `use_istio` is enabled".to_string())
            })?;
            paths
                .into_iter()
                .map(|path| -> Result<Manifest, ConfigError> {
                    let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                        path: path.clone(),
                        source,
                    })?;
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| path.display().to_string());
                    Ok(Manifest { name, content })
                })
                .collect::<Result<Vec<_>, _>>()?
        } else {
            Vec::new()
        };

        let mut secrets = Vec::new();
        for namespace in secret_namespaces(spec) {
            for name in [ADMIN_SECRET_NAME, USER_SECRET_NAME] {
                secrets.push((namespace.to_string(), name.to_string()));
            }
        }

        Ok(ApplyPlan {
            groups,
            skipped,
            bindings,
            manifests,
            secrets,
        })
    }

    /// Provision or update every resource for the spec.
    ///
    /// `credentials` must already be resolved; local inputs are checked
    /// before the first provider call.
    pub async fn apply(&self, credentials: &AuthCredentials) -> Result<ApplyReport, ReconcileError> {
        let plan = Self::plan(&self.spec)?;
        let spec = &self.spec;
        let mut report = ApplyReport {
            skipped: plan.skipped.iter().map(|g| g.name.clone()).collect(),
            ..ApplyReport::default()
        };
        for group in &plan.skipped {
            debug!(group = %group.name, template = %group.template.display(), "Optional template absent, skipping");
        }

        info!(name = %spec.name, project = %spec.project, groups = plan.groups.len(), "Applying deployment");
        let orchestrator = self.orchestrator();
        for group in &plan.groups {
            let action = orchestrator.reconcile(group).await?;
            report.groups.push((group.name.clone(), action));
        }

        let identities = spec.identities();
        self.policy()
            .rewrite(&identities, &plan.bindings, &spec.email)
            .await?;

        let cluster = self.connect().await?;
        self.ensure_namespace(cluster.as_ref()).await?;
        self.ensure_admin_binding(cluster.as_ref()).await?;

        for manifest in &plan.manifests {
            info!(manifest = %manifest.name, "Installing mesh manifest");
            cluster
                .apply_manifest(&manifest.name, &manifest.content)
                .await
                .map_err(|e| ReconcileError::provider(format!("installing {}", manifest.name), e))?;
        }

        let provisioner = SecretProvisioner::new(self.clients.keys.clone());
        for namespace in secret_namespaces(spec) {
            for (role, name) in [
                (IdentityRole::Admin, ADMIN_SECRET_NAME),
                (IdentityRole::User, USER_SECRET_NAME),
            ] {
                let outcome = provisioner
                    .ensure_service_account_key(
                        cluster.as_ref(),
                        namespace,
                        name,
                        &identities.resource_name(role),
                    )
                    .await?;
                report.secrets.push(SecretReport {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    outcome,
                });
            }
        }

        let auth_secret = credentials.secret(spec);
        let outcome = match credentials {
            AuthCredentials::BasicAuth { .. } => provisioner.upsert(cluster.as_ref(), &auth_secret).await?,
            AuthCredentials::Iap { .. } => provisioner.ensure(cluster.as_ref(), &auth_secret).await?,
        };
        report.secrets.push(SecretReport {
            namespace: auth_secret.namespace,
            name: auth_secret.name,
            outcome,
        });

        info!(name = %spec.name, "Apply finished");
        Ok(report)
    }

    /// Tear down the spec's deployments and remove its identities from the
    /// project policy. Deployments already gone count as deleted.
    pub async fn delete(&self) -> Result<DeleteReport, ReconcileError> {
        let spec = &self.spec;
        let mut report = DeleteReport::default();
        info!(name = %spec.name, project = %spec.project, delete_storage = spec.delete_storage, "Deleting deployment");

        let orchestrator = self.orchestrator();
        for group in spec.deletion_groups() {
            if !group.required && !group.template_exists() {
                debug!(group = %group.name, "Optional template absent, skipping");
                report.skipped.push(group.name);
                continue;
            }
            let action = orchestrator.delete(&group).await?;
            report.groups.push((group.name.clone(), action));
        }

        self.policy().remove_owned(&spec.identities()).await?;
        info!(name = %spec.name, "Delete finished");
        Ok(report)
    }

    /// Enable the provider APIs the deployment depends on.
    pub async fn init_project(&self) -> Result<(), ReconcileError> {
        for service in REQUIRED_APIS {
            info!(project = %self.spec.project, service, "Enabling service");
            self.clients
                .services
                .enable_service(&self.spec.project, service)
                .await
                .map_err(|e| ReconcileError::provider(format!("enabling {}", service), e))?;
        }
        Ok(())
    }

    fn orchestrator(&self) -> DeploymentOrchestrator {
        DeploymentOrchestrator::new(
            self.clients.deployments.clone(),
            &self.spec.project,
            Poller::new(self.spec.poller.clone()),
        )
    }

    fn policy(&self) -> PolicyReconciler {
        PolicyReconciler::new(
            self.clients.policy.clone(),
            &self.spec.project,
            self.spec.policy.clone(),
        )
    }

    async fn connect(&self) -> Result<std::sync::Arc<dyn ClusterClient>, ReconcileError> {
        let name = self
            .spec
            .resource_groups()
            .into_iter()
            .find(|g| g.name == "cluster")
            .map(|g| g.deployment)
            .unwrap_or_else(|| self.spec.name.clone());
        let cluster = ClusterRef {
            project: self.spec.project.clone(),
            zone: self.spec.zone.clone(),
            name,
        };
        self.clients
            .clusters
            .connect(&cluster)
            .await
            .map_err(|e| ReconcileError::provider(format!("connecting to cluster {}", cluster.name), e))
    }

    async fn ensure_namespace(&self, cluster: &dyn ClusterClient) -> Result<(), ReconcileError> {
        let namespace = &self.spec.namespace;
        match cluster.get_namespace(namespace).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(ReconcileError::provider(format!("reading namespace {}", namespace), e)),
        }
        info!(namespace = %namespace, "Creating namespace");
        match cluster.create_namespace(namespace).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_conflict() => Ok(()),
            Err(e) => Err(ReconcileError::provider(format!("creating namespace {}", namespace), e)),
        }
    }

    async fn ensure_admin_binding(&self, cluster: &dyn ClusterClient) -> Result<(), ReconcileError> {
        let binding = ClusterRoleBinding {
            name: ADMIN_BINDING_NAME.to_string(),
            role: ADMIN_CLUSTER_ROLE.to_string(),
            user: self.spec.email.clone(),
        };
        let context = format!("binding {} to {}", binding.user, ADMIN_CLUSTER_ROLE);
        match cluster.get_cluster_role_binding(&binding.name).await {
            Ok(_) => cluster
                .update_cluster_role_binding(&binding)
                .await
                .map_err(|e| ReconcileError::provider(context, e)),
            Err(e) if e.is_not_found() => cluster
                .create_cluster_role_binding(&binding)
                .await
                .map_err(|e| ReconcileError::provider(context, e)),
            Err(e) => Err(ReconcileError::provider(context, e)),
        }
    }
}

/// Namespaces receiving the service-account key secrets.
fn secret_namespaces(spec: &DeploymentSpec) -> Vec<&str> {
    let mut namespaces = vec![spec.namespace.as_str()];
    if spec.use_istio && spec.namespace != MESH_NAMESPACE {
        namespaces.push(MESH_NAMESPACE);
    }
    namespaces
}
