//! In-memory sandbox cloud.
//!
//! [`MemoryCloud`] implements every collaborator trait against process-local
//! state with the semantics the workflows rely on:
//! - fingerprints and etags rotate on every accepted write
//! - operations move PENDING -> RUNNING -> DONE over a configurable number of
//!   polls and only then take effect
//! - stale tokens and duplicate names are rejected with conflicts
//!
//! Faults can be queued to exercise retry paths, and the whole state can be
//! saved to and loaded from JSON so the CLI can run workflows repeatedly
//! against the same sandbox. A snapshot file has a single writer at a time:
//! callers hold a [`SandboxLock`] from load until save.

use crate::api::{
    ClusterClient, ClusterConnector, ClusterRef, ClusterRoleBinding, DeploymentApi, KeyMinter,
    KeyRequest, PolicyApi, SecretStore, ServiceUsageApi,
};
use crate::error::ProviderError;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use kfgcp_core::{
    Binding, Deployment, Operation, OperationError, OperationStatus, PolicyDocument, SecretSpec,
    TargetConfiguration,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs::{self, OpenOptions};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Errors loading or saving a sandbox snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sandbox is in use by another process (remove {} if it is stale)", path.display())]
    Locked { path: PathBuf },
}

/// Exclusive hold on a snapshot file, released on drop.
#[derive(Debug)]
pub struct SandboxLock {
    path: PathBuf,
}

impl SandboxLock {
    /// Take the lock next to `snapshot`. Fails with [`SandboxError::Locked`]
    /// while another holder exists.
    pub fn acquire(snapshot: impl AsRef<Path>) -> Result<Self, SandboxError> {
        let path = sibling(snapshot.as_ref(), "lock");
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Self { path }),
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => Err(SandboxError::Locked { path }),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for SandboxLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release sandbox lock");
        }
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{}", suffix));
    path.with_file_name(name)
}

/// Calls observed by the sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallCounters {
    pub inserts: u32,
    pub updates: u32,
    pub deletes: u32,
    pub polls: u32,
    pub policy_writes: u32,
    pub policy_conflicts: u32,
    pub key_mints: u32,
    pub secret_creates: u32,
    pub secret_updates: u32,
    pub manifest_applies: u32,
    pub services_enabled: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum OperationKind {
    Insert,
    Update,
    Delete,
}

impl OperationKind {
    fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TrackedOperation {
    project: String,
    deployment: String,
    kind: OperationKind,
    operation: Operation,
    polls_remaining: u32,
    #[serde(default)]
    target: Option<TargetConfiguration>,
    #[serde(default)]
    failure: Option<OperationError>,
}

#[derive(Debug, Default)]
struct Faults {
    submission_errors: VecDeque<ProviderError>,
    operation_failures: VecDeque<OperationError>,
    renames: u32,
    poll_errors: u32,
    policy_races: VecDeque<Binding>,
    manifest_failures: BTreeSet<String>,
    service_failures: BTreeSet<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Sandbox {
    #[serde(default = "default_polls_until_done")]
    polls_until_done: u32,
    #[serde(default)]
    deployments: BTreeMap<String, Deployment>,
    #[serde(default)]
    operations: BTreeMap<String, TrackedOperation>,
    #[serde(default)]
    policies: BTreeMap<String, PolicyDocument>,
    #[serde(default)]
    secrets: BTreeMap<String, SecretSpec>,
    #[serde(default)]
    namespaces: BTreeSet<String>,
    #[serde(default)]
    role_bindings: BTreeMap<String, ClusterRoleBinding>,
    #[serde(default)]
    manifests: Vec<String>,
    #[serde(default)]
    services: BTreeSet<String>,
    #[serde(default)]
    key_requests: Vec<KeyRequest>,
    #[serde(default)]
    counters: CallCounters,
    #[serde(skip)]
    faults: Faults,
}

fn default_polls_until_done() -> u32 {
    2
}

fn key(scope: &str, name: &str) -> String {
    format!("{}/{}", scope, name)
}

fn token() -> String {
    Uuid::new_v4().simple().to_string()
}

impl Sandbox {
    fn submit(
        &mut self,
        project: &str,
        deployment: &str,
        kind: OperationKind,
        target: Option<TargetConfiguration>,
    ) -> Operation {
        let operation = Operation {
            name: format!("operation-{}-{}", kind.as_str(), token()),
            status: OperationStatus::Pending,
            error: None,
        };
        let mut tracked = TrackedOperation {
            project: project.to_string(),
            deployment: deployment.to_string(),
            kind,
            operation: operation.clone(),
            polls_remaining: self.polls_until_done,
            target,
            failure: self.faults.operation_failures.pop_front(),
        };
        tracing::debug!(
            operation = %operation.name,
            deployment = %deployment,
            kind = kind.as_str(),
            "Sandbox operation submitted"
        );
        if tracked.polls_remaining == 0 {
            self.complete(&mut tracked);
        }
        let snapshot = tracked.operation.clone();
        self.sync_deployment(&tracked);
        self.operations.insert(snapshot.name.clone(), tracked);
        snapshot
    }

    fn complete(&mut self, tracked: &mut TrackedOperation) {
        tracked.operation.status = OperationStatus::Done;
        if let Some(failure) = tracked.failure.take() {
            tracing::debug!(operation = %tracked.operation.name, code = failure.http_code, "Sandbox operation failed");
            tracked.operation.error = Some(failure);
            return;
        }
        let deployment_key = key(&tracked.project, &tracked.deployment);
        match tracked.kind {
            OperationKind::Insert | OperationKind::Update => {
                if let Some(d) = self.deployments.get_mut(&deployment_key) {
                    d.target = tracked.target.clone();
                }
            }
            OperationKind::Delete => {
                self.deployments.remove(&deployment_key);
            }
        }
    }

    fn sync_deployment(&mut self, tracked: &TrackedOperation) {
        if let Some(d) = self
            .deployments
            .get_mut(&key(&tracked.project, &tracked.deployment))
        {
            d.operation = Some(tracked.operation.clone());
        }
    }

    fn poll(&mut self, name: &str) -> Result<Operation, ProviderError> {
        self.counters.polls += 1;
        if self.faults.poll_errors > 0 {
            self.faults.poll_errors -= 1;
            return Err(ProviderError::unavailable("backend temporarily unavailable"));
        }
        let mut tracked = self
            .operations
            .remove(name)
            .ok_or_else(|| ProviderError::not_found(format!("operation {} not found", name)))?;

        if tracked.operation.status != OperationStatus::Done {
            tracked.polls_remaining = tracked.polls_remaining.saturating_sub(1);
            tracked.operation.status = OperationStatus::Running;
            if tracked.polls_remaining == 0 {
                self.complete(&mut tracked);
            } else if self.faults.renames > 0 {
                self.faults.renames -= 1;
                let renamed = format!("operation-{}-{}", tracked.kind.as_str(), token());
                tracing::debug!(from = %tracked.operation.name, to = %renamed, "Sandbox operation renamed");
                tracked.operation.name = renamed;
            }
        }

        let snapshot = tracked.operation.clone();
        self.sync_deployment(&tracked);
        self.operations.insert(snapshot.name.clone(), tracked);
        Ok(snapshot)
    }
}

/// Process-local implementation of every provider collaborator.
#[derive(Clone)]
pub struct MemoryCloud {
    inner: Arc<Mutex<Sandbox>>,
}

impl Default for MemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCloud {
    /// A sandbox whose operations finish on the second poll.
    pub fn new() -> Self {
        let sandbox = Sandbox {
            polls_until_done: default_polls_until_done(),
            ..Sandbox::default()
        };
        Self {
            inner: Arc::new(Mutex::new(sandbox)),
        }
    }

    /// Number of polls an operation needs before it is DONE. Zero finishes
    /// operations at submission.
    pub fn with_polls_until_done(self, polls: u32) -> Self {
        self.state().polls_until_done = polls;
        self
    }

    fn state(&self) -> MutexGuard<'_, Sandbox> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load a snapshot written by [`MemoryCloud::save`]; a missing file gives
    /// an empty sandbox.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SandboxError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let raw = fs::read_to_string(path)?;
        let sandbox: Sandbox = serde_json::from_str(&raw)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(sandbox)),
        })
    }

    /// Write the snapshot through a temporary sibling and rename it into
    /// place, so readers never see a partial file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SandboxError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&*self.state())?;
        let staging = sibling(path, &format!("tmp-{}", token()));
        fs::write(&staging, json)?;
        if let Err(e) = fs::rename(&staging, path) {
            let _ = fs::remove_file(&staging);
            return Err(e.into());
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Fault injection
    // ---------------------------------------------------------------------

    /// Reject the next insert or update with `error`.
    pub fn fail_next_submission(&self, error: ProviderError) {
        self.state().faults.submission_errors.push_back(error);
    }

    /// Make the next submitted operation finish with an error code.
    pub fn fail_next_operation(&self, http_code: u16, message: impl Into<String>) {
        self.state().faults.operation_failures.push_back(OperationError {
            http_code,
            message: message.into(),
            details: Vec::new(),
        });
    }

    /// Rename the next in-flight operation when it is polled. The old name
    /// stops resolving.
    pub fn rename_next_operation(&self) {
        self.state().faults.renames += 1;
    }

    /// Fail the next `count` operation polls with a 503.
    pub fn fail_next_polls(&self, count: u32) {
        self.state().faults.poll_errors += count;
    }

    /// Simulate another writer: just before the next policy write is checked,
    /// `binding`'s members are added to the stored policy and the etag
    /// rotates.
    pub fn race_next_policy_write(&self, binding: Binding) {
        self.state().faults.policy_races.push_back(binding);
    }

    pub fn fail_manifest(&self, name: impl Into<String>) {
        self.state().faults.manifest_failures.insert(name.into());
    }

    pub fn fail_service(&self, service: impl Into<String>) {
        self.state().faults.service_failures.insert(service.into());
    }

    // ---------------------------------------------------------------------
    // Seeding and inspection
    // ---------------------------------------------------------------------

    pub fn seed_policy(&self, project: &str, bindings: Vec<Binding>) {
        self.state().policies.insert(
            project.to_string(),
            PolicyDocument {
                etag: token(),
                bindings,
            },
        );
    }

    pub fn seed_secret(&self, secret: SecretSpec) {
        self.state()
            .secrets
            .insert(key(&secret.namespace, &secret.name), secret);
    }

    pub fn counters(&self) -> CallCounters {
        self.state().counters.clone()
    }

    pub fn deployment(&self, project: &str, name: &str) -> Option<Deployment> {
        self.state().deployments.get(&key(project, name)).cloned()
    }

    pub fn deployment_names(&self, project: &str) -> Vec<String> {
        let prefix = format!("{}/", project);
        self.state()
            .deployments
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    pub fn policy(&self, project: &str) -> PolicyDocument {
        self.state()
            .policies
            .get(project)
            .cloned()
            .unwrap_or_default()
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<SecretSpec> {
        self.state().secrets.get(&key(namespace, name)).cloned()
    }

    /// Every key mint request, oldest first.
    pub fn key_requests(&self) -> Vec<KeyRequest> {
        self.state().key_requests.clone()
    }

    pub fn secret_names(&self) -> Vec<String> {
        self.state().secrets.keys().cloned().collect()
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.state().namespaces.contains(name)
    }

    pub fn role_binding(&self, name: &str) -> Option<ClusterRoleBinding> {
        self.state().role_bindings.get(name).cloned()
    }

    pub fn manifests(&self) -> Vec<String> {
        self.state().manifests.clone()
    }

    pub fn enabled_services(&self, project: &str) -> Vec<String> {
        let prefix = format!("{}/", project);
        self.state()
            .services
            .iter()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl DeploymentApi for MemoryCloud {
    async fn get_deployment(&self, project: &str, name: &str) -> Result<Deployment, ProviderError> {
        self.state()
            .deployments
            .get(&key(project, name))
            .cloned()
            .ok_or_else(|| ProviderError::not_found(format!("deployment {}/{} not found", project, name)))
    }

    async fn insert_deployment(
        &self,
        project: &str,
        name: &str,
        target: &TargetConfiguration,
    ) -> Result<Operation, ProviderError> {
        let mut state = self.state();
        state.counters.inserts += 1;
        if let Some(err) = state.faults.submission_errors.pop_front() {
            return Err(err);
        }
        let deployment_key = key(project, name);
        if state.deployments.contains_key(&deployment_key) {
            return Err(ProviderError::conflict(format!(
                "deployment {}/{} already exists",
                project, name
            )));
        }
        state.deployments.insert(
            deployment_key,
            Deployment {
                name: name.to_string(),
                fingerprint: token(),
                operation: None,
                target: None,
            },
        );
        Ok(state.submit(project, name, OperationKind::Insert, Some(target.clone())))
    }

    async fn update_deployment(
        &self,
        project: &str,
        name: &str,
        fingerprint: &str,
        target: &TargetConfiguration,
    ) -> Result<Operation, ProviderError> {
        let mut state = self.state();
        state.counters.updates += 1;
        if let Some(err) = state.faults.submission_errors.pop_front() {
            return Err(err);
        }
        let Some(current) = state.deployments.get_mut(&key(project, name)) else {
            return Err(ProviderError::not_found(format!("deployment {}/{} not found", project, name)));
        };
        if current.fingerprint != fingerprint {
            return Err(ProviderError::new(412, format!("fingerprint for {} is stale", name)));
        }
        if current.operation.as_ref().is_some_and(|op| !op.is_done()) {
            return Err(ProviderError::conflict(format!(
                "deployment {} has an operation in progress",
                name
            )));
        }
        current.fingerprint = token();
        Ok(state.submit(project, name, OperationKind::Update, Some(target.clone())))
    }

    async fn delete_deployment(&self, project: &str, name: &str) -> Result<Operation, ProviderError> {
        let mut state = self.state();
        state.counters.deletes += 1;
        if !state.deployments.contains_key(&key(project, name)) {
            return Err(ProviderError::not_found(format!("deployment {}/{} not found", project, name)));
        }
        Ok(state.submit(project, name, OperationKind::Delete, None))
    }

    async fn get_operation(&self, _project: &str, operation: &str) -> Result<Operation, ProviderError> {
        self.state().poll(operation)
    }
}

#[async_trait]
impl PolicyApi for MemoryCloud {
    async fn get_policy(&self, project: &str) -> Result<PolicyDocument, ProviderError> {
        Ok(self
            .state()
            .policies
            .entry(project.to_string())
            .or_insert_with(|| PolicyDocument {
                etag: token(),
                bindings: Vec::new(),
            })
            .clone())
    }

    async fn set_policy(&self, project: &str, policy: &PolicyDocument) -> Result<(), ProviderError> {
        let mut state = self.state();
        let sandbox = &mut *state;
        let race = sandbox.faults.policy_races.pop_front();
        let current = sandbox.policies.entry(project.to_string()).or_default();

        if let Some(foreign) = race {
            match current.binding_mut(&foreign.role) {
                Some(b) => {
                    for m in &foreign.members {
                        b.add_member(m);
                    }
                }
                None => current.bindings.push(foreign),
            }
            current.etag = token();
        }

        if current.etag != policy.etag {
            sandbox.counters.policy_conflicts += 1;
            return Err(ProviderError::conflict(format!(
                "etag for project {} is stale",
                project
            )));
        }
        current.bindings = policy.bindings.clone();
        current.etag = token();
        sandbox.counters.policy_writes += 1;
        Ok(())
    }
}

#[async_trait]
impl KeyMinter for MemoryCloud {
    async fn create_key(&self, request: &KeyRequest) -> Result<String, ProviderError> {
        {
            let mut state = self.state();
            state.counters.key_mints += 1;
            state.key_requests.push(request.clone());
        }
        let service_account = request.service_account.as_str();
        let email = service_account
            .rsplit('/')
            .next()
            .unwrap_or(service_account);
        let credentials = serde_json::json!({
            "type": "service_account",
            "client_email": email,
            "private_key_id": token(),
        });
        Ok(STANDARD.encode(credentials.to_string()))
    }
}

#[async_trait]
impl ServiceUsageApi for MemoryCloud {
    async fn enable_service(&self, project: &str, service: &str) -> Result<(), ProviderError> {
        let mut state = self.state();
        if state.faults.service_failures.contains(service) {
            return Err(ProviderError::new(403, format!("cannot enable {}", service)));
        }
        state.counters.services_enabled += 1;
        state.services.insert(key(project, service));
        Ok(())
    }
}

#[async_trait]
impl SecretStore for MemoryCloud {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<SecretSpec, ProviderError> {
        self.state()
            .secrets
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ProviderError::not_found(format!("secret {}/{} not found", namespace, name)))
    }

    async fn create_secret(&self, secret: &SecretSpec) -> Result<(), ProviderError> {
        let mut state = self.state();
        let secret_key = key(&secret.namespace, &secret.name);
        if state.secrets.contains_key(&secret_key) {
            return Err(ProviderError::conflict(format!("secret {} already exists", secret_key)));
        }
        state.counters.secret_creates += 1;
        state.secrets.insert(secret_key, secret.clone());
        Ok(())
    }

    async fn update_secret(&self, secret: &SecretSpec) -> Result<(), ProviderError> {
        let mut state = self.state();
        let secret_key = key(&secret.namespace, &secret.name);
        let Some(existing) = state.secrets.get_mut(&secret_key) else {
            return Err(ProviderError::not_found(format!("secret {} not found", secret_key)));
        };
        *existing = secret.clone();
        state.counters.secret_updates += 1;
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for MemoryCloud {
    async fn get_namespace(&self, name: &str) -> Result<(), ProviderError> {
        if self.state().namespaces.contains(name) {
            Ok(())
        } else {
            Err(ProviderError::not_found(format!("namespace {} not found", name)))
        }
    }

    async fn create_namespace(&self, name: &str) -> Result<(), ProviderError> {
        if !self.state().namespaces.insert(name.to_string()) {
            return Err(ProviderError::conflict(format!("namespace {} already exists", name)));
        }
        Ok(())
    }

    async fn get_cluster_role_binding(&self, name: &str) -> Result<ClusterRoleBinding, ProviderError> {
        self.state()
            .role_bindings
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::not_found(format!("clusterrolebinding {} not found", name)))
    }

    async fn create_cluster_role_binding(&self, binding: &ClusterRoleBinding) -> Result<(), ProviderError> {
        let mut state = self.state();
        if state.role_bindings.contains_key(&binding.name) {
            return Err(ProviderError::conflict(format!(
                "clusterrolebinding {} already exists",
                binding.name
            )));
        }
        state.role_bindings.insert(binding.name.clone(), binding.clone());
        Ok(())
    }

    async fn update_cluster_role_binding(&self, binding: &ClusterRoleBinding) -> Result<(), ProviderError> {
        let mut state = self.state();
        let Some(existing) = state.role_bindings.get_mut(&binding.name) else {
            return Err(ProviderError::not_found(format!(
                "clusterrolebinding {} not found",
                binding.name
            )));
        };
        *existing = binding.clone();
        Ok(())
    }

    async fn apply_manifest(&self, name: &str, _content: &str) -> Result<(), ProviderError> {
        let mut state = self.state();
        state.counters.manifest_applies += 1;
        if state.faults.manifest_failures.contains(name) {
            return Err(ProviderError::internal(format!("failed to create objects from {}", name)));
        }
        if !state.manifests.iter().any(|m| m == name) {
            state.manifests.push(name.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterConnector for MemoryCloud {
    async fn connect(&self, cluster: &ClusterRef) -> Result<Arc<dyn ClusterClient>, ProviderError> {
        let state = self.state();
        let ready = state
            .deployments
            .get(&key(&cluster.project, &cluster.name))
            .and_then(|d| d.operation.as_ref())
            .is_some_and(|op| op.is_done() && op.failure().is_none());
        if !ready {
            return Err(ProviderError::not_found(format!(
                "cluster {}/{}/{} not found",
                cluster.project, cluster.zone, cluster.name
            )));
        }
        drop(state);
        Ok(Arc::new(self.clone()))
    }
}
