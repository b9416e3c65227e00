//! `kfgcp init` command implementation.
//!
//! Writes the deployment spec and, unless told to skip it, enables the
//! provider APIs the deployment depends on.

use super::{coordinator, lock_sandbox, open_sandbox, sandbox_path, save_sandbox, workflow_error};
use anyhow::{Result, bail};
use clap::Args;
use kfgcp_core::DeploymentSpec;
use std::path::{Path, PathBuf};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Deployment name.
    #[arg(long)]
    pub name: String,

    /// Provider project.
    #[arg(long)]
    pub project: String,

    #[arg(long, default_value = "us-east1-d")]
    pub zone: String,

    /// Operator email, bound as cluster admin and IAP accessor.
    #[arg(long)]
    pub email: String,

    #[arg(long, default_value = "kubeflow")]
    pub namespace: String,

    /// App directory holding `gcp_config/`. Defaults to the spec's directory.
    #[arg(long)]
    pub app_dir: Option<PathBuf>,

    /// Local manifest repository.
    #[arg(long)]
    pub repo: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub use_basic_auth: bool,

    #[arg(long, default_value_t = false)]
    pub use_istio: bool,

    #[arg(long, default_value_t = false)]
    pub delete_storage: bool,

    #[arg(long, default_value_t = false)]
    pub skip_init_project: bool,

    /// Overwrite an existing spec.
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

impl InitArgs {
    fn into_spec(self, spec_path: &Path) -> DeploymentSpec {
        let mut spec = DeploymentSpec::new(self.name, self.project);
        spec.zone = self.zone;
        spec.email = self.email;
        spec.namespace = self.namespace;
        spec.app_dir = self.app_dir.unwrap_or_else(|| {
            spec_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        });
        spec.repo = self.repo;
        spec.use_basic_auth = self.use_basic_auth;
        spec.use_istio = self.use_istio;
        spec.delete_storage = self.delete_storage;
        spec.skip_init_project = self.skip_init_project;
        spec
    }
}

pub async fn run(spec_path: &Path, state: Option<&Path>, args: InitArgs) -> Result<()> {
    if spec_path.exists() && !args.force {
        bail!(
            "{} already exists (use --force to overwrite)",
            spec_path.display()
        );
    }

    let spec = args.into_spec(spec_path);
    spec.write_to(spec_path)?;
    println!("Wrote {}", spec_path.display());

    if spec.skip_init_project {
        println!("Skipping project initialization");
        return Ok(());
    }

    let sandbox = sandbox_path(spec_path, state);
    let _lock = lock_sandbox(&sandbox)?;
    let cloud = open_sandbox(&sandbox)?;
    let result = coordinator(&cloud, spec.clone()).init_project().await;
    save_sandbox(&cloud, &sandbox)?;
    result.map_err(|e| workflow_error("init", e))?;

    println!(
        "Enabled {} services on project {}",
        kfgcp_core::config::REQUIRED_APIS.len(),
        spec.project
    );
    Ok(())
}
