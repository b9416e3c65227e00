//! `kfgcp delete` command implementation.

use super::{coordinator, load_spec, lock_sandbox, open_sandbox, sandbox_path, save_sandbox, workflow_error};
use anyhow::{Result, anyhow};
use std::path::Path;

pub async fn run(spec_path: &Path, state: Option<&Path>) -> Result<()> {
    let spec = load_spec(spec_path)?;
    let sandbox = sandbox_path(spec_path, state);
    let _lock = lock_sandbox(&sandbox)?;
    let cloud = open_sandbox(&sandbox)?;
    let coordinator = coordinator(&cloud, spec);

    let result = tokio::select! {
        result = coordinator.delete() => result.map_err(|e| workflow_error("delete", e)),
        _ = tokio::signal::ctrl_c() => Err(anyhow!(
            "interrupted; provider operations keep running, re-run delete to finish"
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
    Ok(())
}
