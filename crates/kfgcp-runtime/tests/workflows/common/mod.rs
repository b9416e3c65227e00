//! Shared fixtures for the workflow tests.

#![allow(dead_code)]

use kfgcp_core::DeploymentSpec;
use kfgcp_provider::{CloudClients, MemoryCloud};
use kfgcp_runtime::{AuthCredentials, Coordinator};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub const PROJECT: &str = "proj";
pub const ADMIN_MEMBER: &str = "serviceAccount:demo-admin@proj.iam.gserviceaccount.com";
pub const USER_MEMBER: &str = "serviceAccount:demo-user@proj.iam.gserviceaccount.com";
pub const VM_MEMBER: &str = "serviceAccount:demo-vm@proj.iam.gserviceaccount.com";

pub const STORAGE_TEMPLATE: &str = "\
resources:
- name: demo-storage
  type: storage.jinja
";

pub const CLUSTER_TEMPLATE: &str = "\
imports:
- path: network-fragment.yaml
resources:
- name: demo
  type: cluster.jinja
";

pub const NETWORK_FRAGMENT: &str = "\
network:
  name: demo-network
  autoCreateSubnetworks: false
";

pub const IAM_BINDINGS: &str = "\
bindings:
- role: roles/editor
  members:
  - set-kubeflow-admin-service-account
  - set-kubeflow-user-service-account
- role: roles/logging.logWriter
  members:
  - set-kubeflow-vm-service-account
- role: roles/iap.httpsResourceAccessor
  members:
  - set-kubeflow-iap-account
";

/// An app directory on disk plus a fresh sandbox cloud.
pub struct Fixture {
    pub dir: TempDir,
    pub spec: DeploymentSpec,
    pub cloud: MemoryCloud,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_dir = dir.path().join("gcp_config");
        fs::create_dir_all(&config_dir).expect("config dir");
        write(&config_dir.join("storage-kubeflow.yaml"), STORAGE_TEMPLATE);
        write(&config_dir.join("cluster-kubeflow.yaml"), CLUSTER_TEMPLATE);
        write(&config_dir.join("network-fragment.yaml"), NETWORK_FRAGMENT);
        write(&config_dir.join("iam_bindings.yaml"), IAM_BINDINGS);

        let yaml = format!(
            "name: demo\nproject: {}\nzone: us-east1-d\nemail: alice@example.com\napp_dir: {}\n",
            PROJECT,
            dir.path().display()
        );
        let spec = DeploymentSpec::from_yaml(&yaml).expect("spec");

        Self {
            dir,
            spec,
            cloud: MemoryCloud::new(),
        }
    }

    pub fn config_dir(&self) -> std::path::PathBuf {
        self.spec.config_dir()
    }

    /// Enable the mesh and lay out its manifests next to the repo.
    pub fn with_mesh(mut self) -> Self {
        let root = self.dir.path();
        let install = root.join("dependencies/istio/install");
        fs::create_dir_all(&install).expect("istio dir");
        write(&install.join("crds.yaml"), "kind: CustomResourceDefinition\n");
        write(&install.join("istio-noauth.yaml"), "kind: Deployment\n");
        write(&root.join("dependencies/istio/kf-istio-resources.yaml"), "kind: Gateway\n");

        self.spec.use_istio = true;
        self.spec.repo = Some(root.join("kubeflow"));
        self
    }

    pub fn coordinator(&self) -> Coordinator {
        Coordinator::new(
            CloudClients::from_shared(Arc::new(self.cloud.clone())),
            self.spec.clone(),
        )
    }
}

pub fn write(path: &Path, content: &str) {
    fs::write(path, content).expect("write fixture");
}

pub fn iap() -> AuthCredentials {
    AuthCredentials::Iap {
        client_id: "client-id".to_string(),
        client_secret: "client-secret".to_string(),
    }
}

pub fn basic_auth(username: &str, password: &str) -> AuthCredentials {
    let vars: HashMap<&str, String> = HashMap::from([
        ("KUBEFLOW_USERNAME", username.to_string()),
        ("KUBEFLOW_PASSWORD", password.to_string()),
    ]);
    AuthCredentials::resolve(true, |name| vars.get(name).cloned()).expect("basic auth")
}
