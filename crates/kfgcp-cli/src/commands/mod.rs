//! CLI command implementations for kfgcp.

pub mod apply;
pub mod delete;
pub mod init;
pub mod plan;
pub mod status;

use anyhow::{Context, Result};
use kfgcp_core::DeploymentSpec;
use kfgcp_provider::{CloudClients, MemoryCloud, SandboxLock};
use kfgcp_runtime::{Coordinator, ReconcileError};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default sandbox file name, placed next to the spec.
pub const SANDBOX_FILE: &str = ".kfgcp-sandbox.json";

pub fn load_spec(path: &Path) -> Result<DeploymentSpec> {
    DeploymentSpec::from_file(path)
        .with_context(|| format!("loading deployment spec {}", path.display()))
}

pub fn sandbox_path(spec_path: &Path, state: Option<&Path>) -> PathBuf {
    match state {
        Some(path) => path.to_path_buf(),
        None => spec_path
            .parent()
            .unwrap_or(Path::new("."))
            .join(SANDBOX_FILE),
    }
}

/// Held by commands that write the sandbox, from load until save.
pub fn lock_sandbox(path: &Path) -> Result<SandboxLock> {
    SandboxLock::acquire(path).with_context(|| format!("locking sandbox {}", path.display()))
}

pub fn open_sandbox(path: &Path) -> Result<MemoryCloud> {
    MemoryCloud::load(path).with_context(|| format!("opening sandbox {}", path.display()))
}

pub fn save_sandbox(cloud: &MemoryCloud, path: &Path) -> Result<()> {
    cloud
        .save(path)
        .with_context(|| format!("saving sandbox {}", path.display()))
}

pub fn coordinator(cloud: &MemoryCloud, spec: DeploymentSpec) -> Coordinator {
    Coordinator::new(CloudClients::from_shared(Arc::new(cloud.clone())), spec)
}

/// Attach the error kind so scripts can tell config mistakes from provider
/// failures.
pub fn workflow_error(workflow: &str, error: ReconcileError) -> anyhow::Error {
    let kind = error.kind();
    tracing::error!(workflow, kind = %kind, error = %error, "Workflow failed");
    anyhow::Error::new(error).context(format!("{} failed ({})", workflow, kind))
}
