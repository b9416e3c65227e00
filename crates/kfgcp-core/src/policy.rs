//! Access-policy documents and the binding templates merged into them.

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// Association of a role with its members.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub role: String,
    #[serde(default)]
    pub members: Vec<String>,
}

impl Binding {
    pub fn new(role: impl Into<String>, members: Vec<String>) -> Self {
        Self {
            role: role.into(),
            members,
        }
    }

    /// Add a member unless it is already present. Returns whether it was added.
    pub fn add_member(&mut self, member: &str) -> bool {
        if self.members.iter().any(|m| m == member) {
            return false;
        }
        self.members.push(member.to_string());
        true
    }
}

/// A project's access policy together with its concurrency token.
///
/// The `etag` proves the snapshot is current; the provider rejects writes
/// carrying an old one and issues a new one after every successful write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(default)]
    pub etag: String,
    #[serde(default)]
    pub bindings: Vec<Binding>,
}

impl PolicyDocument {
    pub fn binding(&self, role: &str) -> Option<&Binding> {
        self.bindings.iter().find(|b| b.role == role)
    }

    pub fn binding_mut(&mut self, role: &str) -> Option<&mut Binding> {
        self.bindings.iter_mut().find(|b| b.role == role)
    }

    pub fn contains_member(&self, member: &str) -> bool {
        self.bindings
            .iter()
            .any(|b| b.members.iter().any(|m| m == member))
    }

    /// Role to member-set view, ignoring etag, ordering and empty bindings.
    pub fn normalized(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut out: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for b in &self.bindings {
            if b.members.is_empty() {
                continue;
            }
            out.entry(b.role.clone())
                .or_default()
                .extend(b.members.iter().cloned());
        }
        out
    }
}

/// A binding whose members may still contain placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingTemplate {
    pub role: String,
    pub members: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BindingTemplateFile {
    bindings: Option<Vec<RawBindingTemplate>>,
}

#[derive(Debug, Deserialize)]
struct RawBindingTemplate {
    role: String,
    members: Option<Vec<String>>,
}

impl BindingTemplate {
    /// Load the `bindings:` list of an IAM bindings template.
    pub fn load(path: impl AsRef<Path>) -> Result<Vec<Self>, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: BindingTemplateFile =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let Some(raw) = file.bindings else {
            return Err(ConfigError::Invalid {
                path: path.to_path_buf(),
                reason: "not able to find `bindings` entry".to_string(),
            });
        };

        raw.into_iter()
            .map(|b| match b.members {
                Some(members) => Ok(BindingTemplate {
                    role: b.role,
                    members,
                }),
                None => Err(ConfigError::Invalid {
                    path: path.to_path_buf(),
                    reason: format!("binding for role '{}' has no `members` entry", b.role),
                }),
            })
            .collect()
    }
}
