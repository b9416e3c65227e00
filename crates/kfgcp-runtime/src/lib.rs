//! kfgcp runtime
//!
//! The reconcilers that turn a [`DeploymentSpec`](kfgcp_core::DeploymentSpec)
//! into provider state, and the workflows sequencing them:
//!
//! - [`poller`] waits for long-running operations with jittered backoff
//! - [`deployment`] inserts, updates, attaches to and deletes deployments
//! - [`secrets`] provisions credential secrets exactly once per namespace
//! - [`auth`] resolves the auth-mode inputs before anything is provisioned
//! - [`lifecycle`] runs apply, delete and project initialization
//!
//! Policy reconciliation lives in `kfgcp-policy`.

pub mod auth;
pub mod deployment;
pub mod error;
pub mod lifecycle;
pub mod poller;
pub mod secrets;

pub use auth::{AuthCredentials, AuthError};
pub use deployment::{DeleteAction, DeploymentError, DeploymentOrchestrator, ReconcileAction};
pub use error::ReconcileError;
pub use lifecycle::{ApplyPlan, ApplyReport, Coordinator, DeleteReport, Manifest, SecretReport};
pub use poller::{Backoff, PollError, Poller};
pub use secrets::{SecretError, SecretOutcome, SecretProvisioner};
