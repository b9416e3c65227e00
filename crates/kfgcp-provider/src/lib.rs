//! Provider collaborators for kfgcp.
//!
//! Workflows never talk to a cloud SDK directly. They go through the traits in
//! [`api`], which surface every failure as a [`ProviderError`] carrying an
//! HTTP-style code. [`MemoryCloud`] implements all of them in process and
//! backs both the test suites and the CLI sandbox.

pub mod api;
pub mod error;
pub mod memory;

pub use api::{
    ClusterClient, ClusterConnector, ClusterRef, ClusterRoleBinding, CloudClients, DeploymentApi,
    KEY_ALGORITHM, KeyMinter, KeyRequest, PRIVATE_KEY_TYPE, PolicyApi, SecretStore, ServiceUsageApi,
};
pub use error::ProviderError;
pub use memory::{CallCounters, MemoryCloud, SandboxError, SandboxLock};
