//! `kfgcp status` command implementation.

use super::{load_spec, open_sandbox, sandbox_path};
use anyhow::Result;
use kfgcp_core::DeploymentState;
use kfgcp_provider::DeploymentApi;
use std::path::Path;

pub async fn run(spec_path: &Path, state: Option<&Path>) -> Result<()> {
    let spec = load_spec(spec_path)?;
    let cloud = open_sandbox(&sandbox_path(spec_path, state))?;

    for group in spec.resource_groups() {
        match cloud.get_deployment(&spec.project, &group.deployment).await {
            Ok(deployment) => {
                let observed = DeploymentState::observe(&group.name, &deployment);
                println!(
                    "{:<8} {:<20} {:?} operation={} error={}",
                    group.name,
                    group.deployment,
                    observed.status,
                    observed.operation.as_deref().unwrap_or("-"),
                    observed
                        .http_error_code
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
            Err(e) if e.is_not_found() => {
                println!("{:<8} {:<20} absent", group.name, group.deployment);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
