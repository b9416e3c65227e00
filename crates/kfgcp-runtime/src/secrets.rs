//! Credential secrets inside the cluster.
//!
//! Service-account keys and OAuth client secrets are create-once: an existing
//! secret is never touched and no key is minted for it. The basic-auth login
//! is the only secret that is overwritten on every run.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use kfgcp_core::{ErrorKind, SecretSpec};
use kfgcp_provider::{KeyMinter, KeyRequest, ProviderError, SecretStore};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Result of provisioning one secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretOutcome {
    Created,
    Updated,
    /// Already present and left as is.
    Existing,
}

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret {namespace}/{name}: {action} failed: {source}")]
    Store {
        namespace: String,
        name: String,
        action: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error("minting key for {service_account} failed: {source}")]
    Mint {
        service_account: String,
        #[source]
        source: ProviderError,
    },

    #[error("key minted for {service_account} is not valid base64: {source}")]
    KeyEncoding {
        service_account: String,
        #[source]
        source: base64::DecodeError,
    },
}

impl SecretError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SecretError::Store { source, .. } | SecretError::Mint { source, .. } => source.kind(),
            SecretError::KeyEncoding { .. } => ErrorKind::External,
        }
    }
}

/// Data key holding a service-account credentials file.
pub fn key_file_entry(secret_name: &str) -> String {
    format!("{}.json", secret_name)
}

pub struct SecretProvisioner {
    keys: Arc<dyn KeyMinter>,
}

impl SecretProvisioner {
    pub fn new(keys: Arc<dyn KeyMinter>) -> Self {
        Self { keys }
    }

    /// Create `secret` unless a secret with its name exists in its namespace.
    pub async fn ensure<S>(&self, store: &S, secret: &SecretSpec) -> Result<SecretOutcome, SecretError>
    where
        S: SecretStore + ?Sized,
    {
        if self.exists(store, &secret.namespace, &secret.name).await? {
            return Ok(SecretOutcome::Existing);
        }
        self.create(store, secret).await
    }

    /// Create a secret holding a freshly minted key for `service_account`
    /// unless the secret exists.
    ///
    /// The key is minted only after the secret was found missing.
    pub async fn ensure_service_account_key<S>(
        &self,
        store: &S,
        namespace: &str,
        name: &str,
        service_account: &str,
    ) -> Result<SecretOutcome, SecretError>
    where
        S: SecretStore + ?Sized,
    {
        if self.exists(store, namespace, name).await? {
            return Ok(SecretOutcome::Existing);
        }

        info!(namespace, secret = name, service_account, "Minting service account key");
        let encoded = self
            .keys
            .create_key(&KeyRequest::credentials_file(service_account))
            .await
            .map_err(|source| SecretError::Mint {
                service_account: service_account.to_string(),
                source,
            })?;
        let key = STANDARD
            .decode(encoded.trim())
            .map_err(|source| SecretError::KeyEncoding {
                service_account: service_account.to_string(),
                source,
            })?;

        let secret = SecretSpec::new(name, namespace).with_entry(key_file_entry(name), key);
        self.create(store, &secret).await
    }

    /// Overwrite `secret`, creating it if it does not exist yet.
    pub async fn upsert<S>(&self, store: &S, secret: &SecretSpec) -> Result<SecretOutcome, SecretError>
    where
        S: SecretStore + ?Sized,
    {
        match store.update_secret(secret).await {
            Ok(()) => {
                info!(namespace = %secret.namespace, secret = %secret.name, "Secret updated");
                Ok(SecretOutcome::Updated)
            }
            Err(e) if e.is_not_found() => {
                warn!(namespace = %secret.namespace, secret = %secret.name, "Secret missing on update, creating");
                self.create(store, secret).await
            }
            Err(source) => Err(store_error(&secret.namespace, &secret.name, "update", source)),
        }
    }

    async fn exists<S>(&self, store: &S, namespace: &str, name: &str) -> Result<bool, SecretError>
    where
        S: SecretStore + ?Sized,
    {
        match store.get_secret(namespace, name).await {
            Ok(_) => {
                info!(namespace, secret = name, "Secret already exists, leaving it untouched");
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(source) => Err(store_error(namespace, name, "lookup", source)),
        }
    }

    async fn create<S>(&self, store: &S, secret: &SecretSpec) -> Result<SecretOutcome, SecretError>
    where
        S: SecretStore + ?Sized,
    {
        match store.create_secret(secret).await {
            Ok(()) => {
                info!(namespace = %secret.namespace, secret = %secret.name, "Secret created");
                Ok(SecretOutcome::Created)
            }
            // Another caller created it between our lookup and create.
            Err(e) if e.is_conflict() => Ok(SecretOutcome::Existing),
            Err(source) => Err(store_error(&secret.namespace, &secret.name, "create", source)),
        }
    }
}

fn store_error(namespace: &str, name: &str, action: &'static str, source: ProviderError) -> SecretError {
    SecretError::Store {
        namespace: namespace.to_string(),
        name: name.to_string(),
        action,
        source,
    }
}
