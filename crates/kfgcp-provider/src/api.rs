//! Collaborator interfaces.
//!
//! Each trait is the boundary to one provider service. Implementations map
//! their transport errors onto [`ProviderError`] and must keep "not found"
//! (404) distinguishable from everything else.

use crate::error::ProviderError;
use async_trait::async_trait;
use kfgcp_core::{Deployment, Operation, PolicyDocument, SecretSpec, TargetConfiguration};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Key algorithm requested when minting service-account keys.
pub const KEY_ALGORITHM: &str = "KEY_ALG_RSA_2048";
/// Private key format requested when minting service-account keys.
pub const PRIVATE_KEY_TYPE: &str = "TYPE_GOOGLE_CREDENTIALS_FILE";

/// Infrastructure deployment service.
#[async_trait]
pub trait DeploymentApi: Send + Sync {
    async fn get_deployment(&self, project: &str, name: &str) -> Result<Deployment, ProviderError>;

    /// Submit a new deployment. Fails with a conflict if the name is taken.
    async fn insert_deployment(
        &self,
        project: &str,
        name: &str,
        target: &TargetConfiguration,
    ) -> Result<Operation, ProviderError>;

    /// Submit a new target for an existing deployment. `fingerprint` must be
    /// the deployment's current token.
    async fn update_deployment(
        &self,
        project: &str,
        name: &str,
        fingerprint: &str,
        target: &TargetConfiguration,
    ) -> Result<Operation, ProviderError>;

    async fn delete_deployment(&self, project: &str, name: &str) -> Result<Operation, ProviderError>;

    async fn get_operation(&self, project: &str, operation: &str) -> Result<Operation, ProviderError>;
}

/// Project access-policy service.
#[async_trait]
pub trait PolicyApi: Send + Sync {
    async fn get_policy(&self, project: &str) -> Result<PolicyDocument, ProviderError>;

    /// Replace the policy. Rejected with a conflict when `policy.etag` is no
    /// longer current.
    async fn set_policy(&self, project: &str, policy: &PolicyDocument) -> Result<(), ProviderError>;
}

/// Parameters of a service-account key mint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRequest {
    /// Fully qualified service-account resource name.
    pub service_account: String,
    pub key_algorithm: String,
    pub private_key_type: String,
}

impl KeyRequest {
    /// An RSA-2048 key delivered as a credentials file.
    pub fn credentials_file(service_account: impl Into<String>) -> Self {
        Self {
            service_account: service_account.into(),
            key_algorithm: KEY_ALGORITHM.to_string(),
            private_key_type: PRIVATE_KEY_TYPE.to_string(),
        }
    }
}

/// Service-account key minting.
#[async_trait]
pub trait KeyMinter: Send + Sync {
    /// Mint a new key and return the base64-encoded private key blob.
    async fn create_key(&self, request: &KeyRequest) -> Result<String, ProviderError>;
}

/// Enabling provider APIs on a project.
#[async_trait]
pub trait ServiceUsageApi: Send + Sync {
    async fn enable_service(&self, project: &str, service: &str) -> Result<(), ProviderError>;
}

/// Namespace-scoped secret storage inside the cluster.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<SecretSpec, ProviderError>;

    /// Fails with a conflict if the secret exists.
    async fn create_secret(&self, secret: &SecretSpec) -> Result<(), ProviderError>;

    /// Fails with not-found if the secret does not exist.
    async fn update_secret(&self, secret: &SecretSpec) -> Result<(), ProviderError>;
}

/// Cluster-wide role binding granting `role` to a single user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRoleBinding {
    pub name: String,
    pub role: String,
    pub user: String,
}

/// A connected cluster.
#[async_trait]
pub trait ClusterClient: SecretStore {
    /// Not-found when the namespace does not exist.
    async fn get_namespace(&self, name: &str) -> Result<(), ProviderError>;

    async fn create_namespace(&self, name: &str) -> Result<(), ProviderError>;

    async fn get_cluster_role_binding(&self, name: &str) -> Result<ClusterRoleBinding, ProviderError>;

    async fn create_cluster_role_binding(&self, binding: &ClusterRoleBinding) -> Result<(), ProviderError>;

    async fn update_cluster_role_binding(&self, binding: &ClusterRoleBinding) -> Result<(), ProviderError>;

    /// Create every object in a multi-document manifest, leaving existing
    /// objects alone. Blocks until the API server accepted all of them.
    async fn apply_manifest(&self, name: &str, content: &str) -> Result<(), ProviderError>;
}

/// Coordinates of a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterRef {
    pub project: String,
    pub zone: String,
    pub name: String,
}

/// Fetches cluster connection info and builds a client for it.
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(&self, cluster: &ClusterRef) -> Result<Arc<dyn ClusterClient>, ProviderError>;
}

/// The full set of collaborators a workflow needs.
#[derive(Clone)]
pub struct CloudClients {
    pub deployments: Arc<dyn DeploymentApi>,
    pub policy: Arc<dyn PolicyApi>,
    pub keys: Arc<dyn KeyMinter>,
    pub services: Arc<dyn ServiceUsageApi>,
    pub clusters: Arc<dyn ClusterConnector>,
}

impl CloudClients {
    /// Use one object for every collaborator.
    pub fn from_shared<T>(cloud: Arc<T>) -> Self
    where
        T: DeploymentApi + PolicyApi + KeyMinter + ServiceUsageApi + ClusterConnector + 'static,
    {
        Self {
            deployments: cloud.clone(),
            policy: cloud.clone(),
            keys: cloud.clone(),
            services: cloud.clone(),
            clusters: cloud,
        }
    }
}
