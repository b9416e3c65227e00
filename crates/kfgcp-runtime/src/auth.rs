//! Auth-mode inputs, resolved once before any provisioning.

use argon2::{
    Argon2,
    password_hash::{PasswordHasher, SaltString, rand_core::OsRng},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use kfgcp_core::config::{CLIENT_ID_ENV, CLIENT_SECRET_ENV, PASSWORD_ENV, USERNAME_ENV};
use kfgcp_core::secret::{BASIC_AUTH_SECRET_NAME, OAUTH_SECRET_NAME};
use kfgcp_core::{DeploymentSpec, ErrorKind, SecretSpec};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{variable} must be set when using {mode}")]
    MissingInput {
        variable: &'static str,
        mode: &'static str,
    },

    #[error("failed to hash password: {0}")]
    Hash(String),
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::MissingInput { .. } => ErrorKind::Validation,
            AuthError::Hash(_) => ErrorKind::External,
        }
    }
}

/// Credentials for the selected auth mode.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthCredentials {
    /// Username and password login. Only the hash of the password is kept.
    BasicAuth {
        username: String,
        password_hash: String,
    },
    /// OAuth client for the identity-aware proxy.
    Iap {
        client_id: String,
        client_secret: String,
    },
}

impl std::fmt::Debug for AuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthCredentials::BasicAuth { username, .. } => f
                .debug_struct("BasicAuth")
                .field("username", username)
                .finish_non_exhaustive(),
            AuthCredentials::Iap { client_id, .. } => f
                .debug_struct("Iap")
                .field("client_id", client_id)
                .finish_non_exhaustive(),
        }
    }
}

impl AuthCredentials {
    /// Resolve credentials from the process environment.
    pub fn from_env(use_basic_auth: bool) -> Result<Self, AuthError> {
        Self::resolve(use_basic_auth, |name| std::env::var(name).ok())
    }

    /// Resolve credentials through `lookup`. Empty values count as missing.
    pub fn resolve<F>(use_basic_auth: bool, lookup: F) -> Result<Self, AuthError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mode = if use_basic_auth { "basic auth" } else { "IAP" };
        let require = |variable: &'static str| {
            lookup(variable)
                .filter(|v| !v.trim().is_empty())
                .ok_or(AuthError::MissingInput { variable, mode })
        };

        if use_basic_auth {
            let username = require(USERNAME_ENV)?;
            let password = require(PASSWORD_ENV)?;
            Ok(AuthCredentials::BasicAuth {
                username,
                password_hash: hash_password(&password)?,
            })
        } else {
            Ok(AuthCredentials::Iap {
                client_id: require(CLIENT_ID_ENV)?,
                client_secret: require(CLIENT_SECRET_ENV)?,
            })
        }
    }

    /// The secret carrying these credentials into the cluster.
    pub fn secret(&self, spec: &DeploymentSpec) -> SecretSpec {
        match self {
            AuthCredentials::BasicAuth {
                username,
                password_hash,
            } => SecretSpec::new(BASIC_AUTH_SECRET_NAME, &spec.namespace)
                .with_entry("username", username.as_str())
                .with_entry("passwordhash", STANDARD.encode(password_hash)),
            AuthCredentials::Iap {
                client_id,
                client_secret,
            } => SecretSpec::new(OAUTH_SECRET_NAME, spec.oauth_secret_namespace())
                .with_entry("client_id", client_id.as_str())
                .with_entry("client_secret", client_secret.as_str()),
        }
    }
}

/// Argon2 PHC string for `password`.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AuthError::Hash(e.to_string()))?
        .to_string();
    Ok(hash)
}
