//! `kfgcp apply` command implementation.

use super::{coordinator, load_spec, lock_sandbox, open_sandbox, sandbox_path, save_sandbox, workflow_error};
use anyhow::{Context, Result, anyhow};
use kfgcp_runtime::AuthCredentials;
use std::path::Path;

pub async fn run(spec_path: &Path, state: Option<&Path>) -> Result<()> {
    let spec = load_spec(spec_path)?;
    let credentials =
        AuthCredentials::from_env(spec.use_basic_auth).context("resolving auth inputs")?;

    let sandbox = sandbox_path(spec_path, state);
    let _lock = lock_sandbox(&sandbox)?;
    let cloud = open_sandbox(&sandbox)?;
    let coordinator = coordinator(&cloud, spec);

    let result = tokio::select! {
        result = coordinator.apply(&credentials) => result.map_err(|e| workflow_error("apply", e)),
        _ = tokio::signal::ctrl_c() => Err(anyhow!(
            "interrupted; provider operations keep running and the next apply waits on them"
        )),
    };
    save_sandbox(&cloud, &sandbox)?;
    let report = result?;

    for (group, action) in &report.groups {
        println!("{:<8} {:?}", group, action);
    }
    for group in &report.skipped {
        println!("{:<8} skipped", group);
    }
    for secret in &report.secrets {
        println!("secret {}/{} {:?}", secret.namespace, secret.name, secret.outcome);
    }
    Ok(())
}
