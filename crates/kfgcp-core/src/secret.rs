//! Credential objects provisioned into the cluster.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Secret holding the admin service-account key.
pub const ADMIN_SECRET_NAME: &str = "admin-gcp-sa";
/// Secret holding the user service-account key.
pub const USER_SECRET_NAME: &str = "user-gcp-sa";
/// OAuth client credentials used by IAP.
pub const OAUTH_SECRET_NAME: &str = "kubeflow-oauth";
/// Username and password hash used by basic auth.
pub const BASIC_AUTH_SECRET_NAME: &str = "kubeflow-login";
/// Namespace of the service mesh control plane.
pub const MESH_NAMESPACE: &str = "istio-system";

/// A namespaced secret and its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSpec {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub payload: BTreeMap<String, Vec<u8>>,
}

impl SecretSpec {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            payload: BTreeMap::new(),
        }
    }

    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}
