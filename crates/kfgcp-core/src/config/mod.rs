//! Deployment spec for kfgcp.
//!
//! The spec is a single YAML document (`app.yaml`) written by the init and
//! generate steps and read back by every workflow. It names the deployment,
//! the project it lives in, the app directory holding the generated
//! templates, and the auth and mesh options.
//!
//! # Derived locations
//!
//! - **config dir**: `{app_dir}/gcp_config`, holding the resource-group
//!   templates and `iam_bindings.yaml`
//! - **mesh manifests**: `dirname(repo)/dependencies/istio/...`

pub mod retry;

use crate::deployment::ResourceGroup;
use crate::identity::ServiceIdentities;
use crate::secret::MESH_NAMESPACE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub use retry::{PolicyRetryConfig, PollerConfig};

/// Directory under the app dir holding generated provider configs.
pub const CONFIG_DIR: &str = "gcp_config";
/// Cluster template.
pub const CLUSTER_FILE: &str = "cluster-kubeflow.yaml";
/// Storage template.
pub const STORAGE_FILE: &str = "storage-kubeflow.yaml";
/// Optional network template.
pub const NETWORK_FILE: &str = "network.yaml";
/// Optional filestore template.
pub const GCFS_FILE: &str = "gcfs.yaml";
/// IAM bindings template.
pub const IAM_BINDINGS_FILE: &str = "iam_bindings.yaml";

/// Basic-auth username.
pub const USERNAME_ENV: &str = "KUBEFLOW_USERNAME";
/// Basic-auth password.
pub const PASSWORD_ENV: &str = "KUBEFLOW_PASSWORD";
/// IAP OAuth client id.
pub const CLIENT_ID_ENV: &str = "CLIENT_ID";
/// IAP OAuth client secret.
pub const CLIENT_SECRET_ENV: &str = "CLIENT_SECRET";

/// Provider APIs enabled by project initialisation.
pub const REQUIRED_APIS: [&str; 9] = [
    "deploymentmanager.googleapis.com",
    "servicemanagement.googleapis.com",
    "container.googleapis.com",
    "cloudresourcemanager.googleapis.com",
    "endpoints.googleapis.com",
    "file.googleapis.com",
    "ml.googleapis.com",
    "iam.googleapis.com",
    "sqladmin.googleapis.com",
];

/// Declarative deployment spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentSpec {
    /// Deployment name; also the cluster name and identity prefix.
    pub name: String,

    /// Namespace the platform is installed into.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Provider project.
    pub project: String,

    /// Zone of the cluster.
    #[serde(default)]
    pub zone: String,

    /// Operator identity; resolves the IAP account placeholder and is bound
    /// as cluster admin.
    #[serde(default)]
    pub email: String,

    /// App directory containing `gcp_config/`.
    #[serde(default = "default_app_dir")]
    pub app_dir: PathBuf,

    /// Local manifest repository; mesh manifests are found next to it.
    #[serde(default)]
    pub repo: Option<PathBuf>,

    /// Basic auth instead of IAP.
    #[serde(default)]
    pub use_basic_auth: bool,

    /// Install the service mesh and mirror SA secrets into its namespace.
    #[serde(default)]
    pub use_istio: bool,

    /// Whether delete also removes the storage deployment.
    #[serde(default)]
    pub delete_storage: bool,

    /// Skip enabling provider APIs during init.
    #[serde(default)]
    pub skip_init_project: bool,

    /// Explicit resource groups, replacing the standard set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_groups: Option<Vec<ResourceGroupConfig>>,

    /// Operation polling.
    #[serde(default)]
    pub poller: PollerConfig,

    /// Policy write retries.
    #[serde(default)]
    pub policy: PolicyRetryConfig,
}

/// One entry of an explicit resource-group list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroupConfig {
    /// Group label, e.g. `storage`.
    pub name: String,

    /// Deployment name; defaults to the standard naming for the label.
    #[serde(default)]
    pub deployment: Option<String>,

    /// Template file, relative to the config dir unless absolute.
    pub template: PathBuf,

    #[serde(default = "default_true")]
    pub required: bool,
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parse error in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid {}: {reason}", path.display())]
    Invalid { path: PathBuf, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ConfigError {
    pub fn kind(&self) -> crate::ErrorKind {
        crate::ErrorKind::Config
    }
}

impl DeploymentSpec {
    /// A spec with every optional field at its default.
    pub fn new(name: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: default_namespace(),
            project: project.into(),
            zone: String::new(),
            email: String::new(),
            app_dir: default_app_dir(),
            repo: None,
            use_basic_auth: false,
            use_istio: false,
            delete_storage: false,
            skip_init_project: false,
            resource_groups: None,
            poller: PollerConfig::default(),
            policy: PolicyRetryConfig::default(),
        }
    }

    /// Load the spec from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let spec: Self = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        spec.validate()?;
        Ok(spec)
    }

    /// Parse the spec from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let spec: Self = serde_yaml::from_str(content)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(ConfigError::from)
    }

    /// Write the spec back to disk.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        fs::write(path, self.to_yaml()?).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Config("`name` must not be empty".to_string()));
        }
        if self.project.trim().is_empty() {
            return Err(ConfigError::Config("`project` must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn config_dir(&self) -> PathBuf {
        self.app_dir.join(CONFIG_DIR)
    }

    pub fn iam_bindings_path(&self) -> PathBuf {
        self.config_dir().join(IAM_BINDINGS_FILE)
    }

    /// Identities owned by this deployment.
    pub fn identities(&self) -> ServiceIdentities {
        ServiceIdentities::new(&self.name, &self.project)
    }

    /// Resource groups in creation order.
    ///
    /// Standard order is storage, cluster, network, filesystem; the last two
    /// are optional.
    pub fn resource_groups(&self) -> Vec<ResourceGroup> {
        let config_dir = self.config_dir();
        if let Some(groups) = &self.resource_groups {
            return groups
                .iter()
                .map(|g| ResourceGroup {
                    name: g.name.clone(),
                    deployment: g
                        .deployment
                        .clone()
                        .unwrap_or_else(|| self.deployment_name(&g.name)),
                    template: if g.template.is_absolute() {
                        g.template.clone()
                    } else {
                        config_dir.join(&g.template)
                    },
                    required: g.required,
                })
                .collect();
        }

        [
            ("storage", STORAGE_FILE, true),
            ("cluster", CLUSTER_FILE, true),
            ("network", NETWORK_FILE, false),
            ("gcfs", GCFS_FILE, false),
        ]
        .into_iter()
        .map(|(name, file, required)| ResourceGroup {
            name: name.to_string(),
            deployment: self.deployment_name(name),
            template: config_dir.join(file),
            required,
        })
        .collect()
    }

    /// Resource groups to delete, in reverse creation order.
    ///
    /// Storage is kept unless `delete_storage` is set.
    pub fn deletion_groups(&self) -> Vec<ResourceGroup> {
        let mut groups: Vec<ResourceGroup> = self
            .resource_groups()
            .into_iter()
            .filter(|g| g.name != "storage" || self.delete_storage)
            .collect();
        groups.reverse();
        groups
    }

    /// Standard deployment name for a group label.
    pub fn deployment_name(&self, group: &str) -> String {
        if group == "cluster" {
            self.name.clone()
        } else {
            format!("{}-{}", self.name, group)
        }
    }

    /// Mesh manifests in install order, if a repo is configured.
    pub fn mesh_manifests(&self) -> Option<Vec<PathBuf>> {
        let repo = self.repo.as_ref()?;
        let parent = repo.parent().unwrap_or(Path::new("."));
        Some(vec![
            parent.join("dependencies/istio/install/crds.yaml"),
            parent.join("dependencies/istio/install/istio-noauth.yaml"),
            parent.join("dependencies/istio/kf-istio-resources.yaml"),
        ])
    }

    /// Namespace receiving the OAuth client secret.
    pub fn oauth_secret_namespace(&self) -> &str {
        if self.use_istio {
            MESH_NAMESPACE
        } else {
            &self.namespace
        }
    }
}

fn default_namespace() -> String {
    "kubeflow".to_string()
}

fn default_app_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SPEC: &str = r#"
name: demo
project: proj
zone: us-east1-d
email: alice@example.com
app_dir: /apps/demo
repo: /cache/v0.4/kubeflow
"#;

    #[test]
    fn applies_defaults() {
        let spec = DeploymentSpec::from_yaml(SPEC).unwrap();
        assert_eq!(spec.namespace, "kubeflow");
        assert!(!spec.use_basic_auth);
        assert!(!spec.delete_storage);
        assert_eq!(spec.poller, PollerConfig::default());
        assert_eq!(spec.policy.max_attempts, 5);
        assert_eq!(spec.config_dir(), PathBuf::from("/apps/demo/gcp_config"));
    }

    #[test]
    fn written_spec_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.yaml");
        let mut spec = DeploymentSpec::new("demo", "proj");
        spec.use_istio = true;
        spec.write_to(&path).unwrap();

        let loaded = DeploymentSpec::from_file(&path).unwrap();
        assert_eq!(loaded.name, "demo");
        assert!(loaded.use_istio);
        assert_eq!(loaded.namespace, "kubeflow");
    }

    #[test]
    fn rejects_empty_name() {
        let err = DeploymentSpec::from_yaml("name: ''\nproject: p\n").unwrap_err();
        assert!(matches!(err, ConfigError::Config(_)));
    }

    #[test]
    fn standard_resource_groups_in_creation_order() {
        let spec = DeploymentSpec::from_yaml(SPEC).unwrap();
        let groups: Vec<(String, String, bool)> = spec
            .resource_groups()
            .into_iter()
            .map(|g| (g.name, g.deployment, g.required))
            .collect();
        assert_eq!(
            groups,
            vec![
                ("storage".to_string(), "demo-storage".to_string(), true),
                ("cluster".to_string(), "demo".to_string(), true),
                ("network".to_string(), "demo-network".to_string(), false),
                ("gcfs".to_string(), "demo-gcfs".to_string(), false),
            ]
        );
    }

    #[test]
    fn deletion_order_is_reversed_and_keeps_storage_by_default() {
        let mut spec = DeploymentSpec::from_yaml(SPEC).unwrap();
        let names: Vec<String> = spec.deletion_groups().into_iter().map(|g| g.name).collect();
        assert_eq!(names, vec!["gcfs", "network", "cluster"]);

        spec.delete_storage = true;
        let names: Vec<String> = spec.deletion_groups().into_iter().map(|g| g.name).collect();
        assert_eq!(names, vec!["gcfs", "network", "cluster", "storage"]);
    }

    #[test]
    fn explicit_resource_groups() {
        let yaml = format!(
            "{SPEC}resource_groups:\n  - name: storage\n    template: storage.yaml\n  - name: cluster\n    template: /abs/cluster.yaml\n"
        );
        let spec = DeploymentSpec::from_yaml(&yaml).unwrap();
        let groups = spec.resource_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].deployment, "demo-storage");
        assert_eq!(groups[0].template, PathBuf::from("/apps/demo/gcp_config/storage.yaml"));
        assert_eq!(groups[1].deployment, "demo");
        assert_eq!(groups[1].template, PathBuf::from("/abs/cluster.yaml"));
        assert!(groups[1].required);
    }

    #[test]
    fn mesh_manifests_live_next_to_repo() {
        let spec = DeploymentSpec::from_yaml(SPEC).unwrap();
        assert_eq!(
            spec.mesh_manifests().unwrap(),
            vec![
                PathBuf::from("/cache/v0.4/dependencies/istio/install/crds.yaml"),
                PathBuf::from("/cache/v0.4/dependencies/istio/install/istio-noauth.yaml"),
                PathBuf::from("/cache/v0.4/dependencies/istio/kf-istio-resources.yaml"),
            ]
        );
    }

    #[test]
    fn oauth_secret_follows_mesh() {
        let mut spec = DeploymentSpec::from_yaml(SPEC).unwrap();
        assert_eq!(spec.oauth_secret_namespace(), "kubeflow");
        spec.use_istio = true;
        assert_eq!(spec.oauth_secret_namespace(), "istio-system");
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.yaml");
        let spec = DeploymentSpec::from_yaml(SPEC).unwrap();
        spec.write_to(&path).unwrap();
        let loaded = DeploymentSpec::from_file(&path).unwrap();
        assert_eq!(loaded.name, "demo");
        assert_eq!(loaded.repo, spec.repo);
    }
}
