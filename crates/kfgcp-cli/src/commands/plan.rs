//! `kfgcp plan` command implementation.
//!
//! Checks everything apply needs from local files and the environment, and
//! prints what apply would touch. Never calls the provider.

use super::load_spec;
use anyhow::{Result, bail};
use kfgcp_core::TargetConfiguration;
use kfgcp_runtime::{AuthCredentials, Coordinator};
use std::path::Path;

pub fn run(spec_path: &Path) -> Result<()> {
    let spec = load_spec(spec_path)?;
    let plan = match Coordinator::plan(&spec) {
        Ok(plan) => plan,
        Err(e) => bail!("[{}] {}", e.kind(), e),
    };
    let identities = spec.identities();

    println!("Deployment {} in project {}", spec.name, spec.project);
    println!();
    println!("Resource groups:");
    for group in &plan.groups {
        println!(
            "  reconcile {:<8} -> {} ({})",
            group.name,
            group.deployment,
            group.template.display()
        );
        match TargetConfiguration::from_template(&group.template) {
            Ok(target) => {
                for import in &target.imports {
                    println!("              import {}", import.name);
                }
            }
            Err(e) => bail!("[{}] {}", e.kind(), e),
        }
    }
    for group in &plan.skipped {
        println!("  skip      {:<8}    template {} absent", group.name, group.template.display());
    }

    println!();
    println!("Policy bindings:");
    for template in &plan.bindings {
        let members: Vec<String> = template
            .members
            .iter()
            .map(|m| identities.resolve_member(m, &spec.email))
            .collect();
        println!("  {}: {}", template.role, members.join(", "));
    }

    if !plan.manifests.is_empty() {
        println!();
        println!("Mesh manifests:");
        for manifest in &plan.manifests {
            println!("  {}", manifest.name);
        }
    }

    println!();
    println!("Secrets:");
    for (namespace, name) in &plan.secrets {
        println!("  {}/{}", namespace, name);
    }

    let auth = AuthCredentials::from_env(spec.use_basic_auth);
    match &auth {
        Ok(credentials) => {
            let secret = credentials.secret(&spec);
            println!("  {}/{}", secret.namespace, secret.name);
        }
        Err(e) => println!("  [ERROR] {}", e),
    }

    if let Err(e) = auth {
        bail!("[{}] {}", e.kind(), e);
    }
    Ok(())
}
