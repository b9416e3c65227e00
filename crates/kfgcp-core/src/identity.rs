//! Service identities derived from a deployment name.
//!
//! Nothing here is stored: every identity is a pure function of the
//! deployment name and the project.

use serde::{Deserialize, Serialize};

/// Domain shared by every provider-managed service account.
pub const SERVICE_ACCOUNT_DOMAIN: &str = "iam.gserviceaccount.com";

/// Placeholder in binding templates that resolves to the caller's identity.
pub const IAP_ACCOUNT_PLACEHOLDER: &str = "set-kubeflow-iap-account";

/// The three service identities a deployment owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityRole {
    Admin,
    User,
    Vm,
}

impl IdentityRole {
    pub const ALL: [IdentityRole; 3] = [IdentityRole::Admin, IdentityRole::User, IdentityRole::Vm];

    /// Suffix appended to the deployment name in the account id.
    pub fn suffix(&self) -> &'static str {
        match self {
            IdentityRole::Admin => "admin",
            IdentityRole::User => "user",
            IdentityRole::Vm => "vm",
        }
    }

    /// Binding-template placeholder that resolves to this identity.
    pub fn placeholder(&self) -> &'static str {
        match self {
            IdentityRole::Admin => "set-kubeflow-admin-service-account",
            IdentityRole::User => "set-kubeflow-user-service-account",
            IdentityRole::Vm => "set-kubeflow-vm-service-account",
        }
    }
}

/// Owner tag for everything a single deployment put into the project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentities {
    name: String,
    project: String,
}

impl ServiceIdentities {
    pub fn new(name: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            project: project.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// `{name}-{suffix}@{project}.iam.gserviceaccount.com`
    pub fn email(&self, role: IdentityRole) -> String {
        format!(
            "{}-{}@{}.{}",
            self.name,
            role.suffix(),
            self.project,
            SERVICE_ACCOUNT_DOMAIN
        )
    }

    /// Policy member string for the identity.
    pub fn member(&self, role: IdentityRole) -> String {
        format!("serviceAccount:{}", self.email(role))
    }

    /// Member strings of all three owned identities.
    pub fn members(&self) -> Vec<String> {
        IdentityRole::ALL.iter().map(|r| self.member(*r)).collect()
    }

    /// Whether a policy member belongs to this deployment.
    ///
    /// Exact string comparison only: a member differing in case or
    /// whitespace is someone else's.
    pub fn owns(&self, member: &str) -> bool {
        IdentityRole::ALL.iter().any(|r| self.member(*r) == member)
    }

    /// Fully qualified resource name used by the key-minting API.
    pub fn resource_name(&self, role: IdentityRole) -> String {
        format!("projects/{}/serviceAccounts/{}", self.project, self.email(role))
    }

    /// Resolve a binding-template member.
    ///
    /// Owned-identity placeholders become service-account members, the IAP
    /// placeholder becomes the caller's member, and anything else is returned
    /// unchanged.
    pub fn resolve_member(&self, member: &str, caller: &str) -> String {
        if member == IAP_ACCOUNT_PLACEHOLDER {
            return caller_member(caller);
        }
        IdentityRole::ALL
            .iter()
            .find(|r| r.placeholder() == member)
            .map(|r| self.member(*r))
            .unwrap_or_else(|| member.to_string())
    }
}

/// Member string for the operator's own identity.
///
/// An email that already looks like a service account keeps that type,
/// everything else is treated as an end user.
pub fn caller_member(email: &str) -> String {
    if email.contains(SERVICE_ACCOUNT_DOMAIN) {
        format!("serviceAccount:{}", email)
    } else {
        format!("user:{}", email)
    }
}
