//! Overlapping callers, renamed operations and cancellation.

use crate::common::*;
use async_trait::async_trait;
use kfgcp_core::{Deployment, Operation, PollerConfig, ResourceGroup, TargetConfiguration};
use kfgcp_provider::{DeploymentApi, MemoryCloud, ProviderError};
use kfgcp_runtime::{DeploymentOrchestrator, Poller, ReconcileAction};
use pretty_assertions::assert_eq;
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Barrier;

/// Holds the first `get_deployment` of each caller until every caller has
/// read, so all of them decide from the same snapshot before submitting.
struct SameSnapshot {
    cloud: MemoryCloud,
    barrier: Arc<Barrier>,
    waited: AtomicBool,
}

impl SameSnapshot {
    fn orchestrators(cloud: &MemoryCloud) -> (DeploymentOrchestrator, DeploymentOrchestrator) {
        let barrier = Arc::new(Barrier::new(2));
        let make = || {
            DeploymentOrchestrator::new(
                Arc::new(SameSnapshot {
                    cloud: cloud.clone(),
                    barrier: barrier.clone(),
                    waited: AtomicBool::new(false),
                }),
                PROJECT,
                Poller::new(PollerConfig::default()),
            )
        };
        (make(), make())
    }
}

#[async_trait]
impl DeploymentApi for SameSnapshot {
    async fn get_deployment(&self, project: &str, name: &str) -> Result<Deployment, ProviderError> {
        let result = self.cloud.get_deployment(project, name).await;
        if !self.waited.swap(true, Ordering::SeqCst) {
            self.barrier.wait().await;
        }
        result
    }

    async fn insert_deployment(
        &self,
        project: &str,
        name: &str,
        target: &TargetConfiguration,
    ) -> Result<Operation, ProviderError> {
        self.cloud.insert_deployment(project, name, target).await
    }

    async fn update_deployment(
        &self,
        project: &str,
        name: &str,
        fingerprint: &str,
        target: &TargetConfiguration,
    ) -> Result<Operation, ProviderError> {
        self.cloud.update_deployment(project, name, fingerprint, target).await
    }

    async fn delete_deployment(&self, project: &str, name: &str) -> Result<Operation, ProviderError> {
        self.cloud.delete_deployment(project, name).await
    }

    async fn get_operation(&self, project: &str, operation: &str) -> Result<Operation, ProviderError> {
        self.cloud.get_operation(project, operation).await
    }
}

fn sorted(first: ReconcileAction, second: ReconcileAction) -> Vec<ReconcileAction> {
    let mut actions = vec![first, second];
    actions.sort_by_key(|a| format!("{:?}", a));
    actions
}

fn storage_group(fx: &Fixture) -> ResourceGroup {
    fx.spec
        .resource_groups()
        .into_iter()
        .find(|g| g.name == "storage")
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn concurrent_reconciles_submit_one_insert() {
    let fx = Fixture::new();
    let group = storage_group(&fx);
    let a = DeploymentOrchestrator::new(
        Arc::new(fx.cloud.clone()),
        PROJECT,
        Poller::new(PollerConfig::default()),
    );
    let b = DeploymentOrchestrator::new(
        Arc::new(fx.cloud.clone()),
        PROJECT,
        Poller::new(PollerConfig::default()),
    );

    let (first, second) = tokio::join!(a.reconcile(&group), b.reconcile(&group));

    let mut actions = vec![first.unwrap(), second.unwrap()];
    actions.sort_by_key(|a| format!("{:?}", a));
    assert_eq!(actions, vec![ReconcileAction::Attached, ReconcileAction::Inserted]);
    assert_eq!(fx.cloud.counters().inserts, 1);
}

#[tokio::test(start_paused = true)]
async fn rejected_insert_attaches_to_the_winner() {
    let fx = Fixture::new();
    let group = storage_group(&fx);
    let (a, b) = SameSnapshot::orchestrators(&fx.cloud);

    let (first, second) = tokio::join!(a.reconcile(&group), b.reconcile(&group));

    assert_eq!(
        sorted(first.unwrap(), second.unwrap()),
        vec![ReconcileAction::Attached, ReconcileAction::Inserted]
    );
    // Both callers submitted; the provider accepted one.
    assert_eq!(fx.cloud.counters().inserts, 2);
    assert_eq!(fx.cloud.deployment_names(PROJECT), vec!["demo-storage".to_string()]);
    assert!(fx.cloud.deployment(PROJECT, "demo-storage").unwrap().target.is_some());
}

#[tokio::test(start_paused = true)]
async fn rejected_update_attaches_to_the_in_flight_operation() {
    let fx = Fixture::new();
    let group = storage_group(&fx);
    let seed = DeploymentOrchestrator::new(
        Arc::new(fx.cloud.clone()),
        PROJECT,
        Poller::new(PollerConfig::default()),
    );
    assert_eq!(seed.reconcile(&group).await.unwrap(), ReconcileAction::Inserted);

    fs::write(&group.template, "resources:\n- name: demo-storage\n  type: storage-v2.jinja\n").unwrap();
    let (a, b) = SameSnapshot::orchestrators(&fx.cloud);

    let (first, second) = tokio::join!(a.reconcile(&group), b.reconcile(&group));

    assert_eq!(
        sorted(first.unwrap(), second.unwrap()),
        vec![ReconcileAction::Attached, ReconcileAction::Updated]
    );
    assert_eq!(fx.cloud.counters().updates, 2);
    let stored = fx.cloud.deployment(PROJECT, "demo-storage").unwrap();
    assert!(stored.target.unwrap().config.contains("storage-v2.jinja"));
}

#[tokio::test(start_paused = true)]
async fn concurrent_applies_converge_without_duplicates() {
    let fx = Fixture::new();
    let first = fx.coordinator();
    let second = fx.coordinator();

    let (iap_a, iap_b) = (iap(), iap());
    let (a, b) = tokio::join!(first.apply(&iap_a), second.apply(&iap_b));
    a.unwrap();
    b.unwrap();

    let counters = fx.cloud.counters();
    assert_eq!(counters.inserts, 2);
    assert_eq!(counters.key_mints, 2);
    assert_eq!(counters.secret_creates, 3);
    let editor = fx.cloud.policy(PROJECT).binding("roles/editor").cloned().unwrap();
    assert_eq!(editor.members, vec![ADMIN_MEMBER.to_string(), USER_MEMBER.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn renamed_operation_is_followed() {
    let fx = Fixture::new();
    fx.cloud.rename_next_operation();

    let report = fx.coordinator().apply(&iap()).await.unwrap();

    assert_eq!(report.groups[0], ("storage".to_string(), ReconcileAction::Inserted));
    assert!(fx.cloud.deployment(PROJECT, "demo-storage").unwrap().target.is_some());
}

#[tokio::test(start_paused = true)]
async fn transient_poll_errors_are_retried() {
    let fx = Fixture::new();
    fx.cloud.fail_next_polls(3);

    fx.coordinator().apply(&iap()).await.unwrap();

    // Two groups needing two successful polls each, plus the failures.
    assert_eq!(fx.cloud.counters().polls, 7);
}

#[tokio::test(start_paused = true)]
async fn dropped_apply_reattaches_to_the_running_operation() {
    let fx = Fixture::new();
    let coordinator = fx.coordinator();

    let cancelled = tokio::time::timeout(Duration::from_millis(100), coordinator.apply(&iap())).await;
    assert!(cancelled.is_err());
    assert_eq!(fx.cloud.counters().inserts, 1);

    let report = coordinator.apply(&iap()).await.unwrap();

    assert_eq!(
        report.groups,
        vec![
            ("storage".to_string(), ReconcileAction::Attached),
            ("cluster".to_string(), ReconcileAction::Inserted),
        ]
    );
    assert_eq!(fx.cloud.counters().inserts, 2);
}

#[tokio::test(start_paused = true)]
async fn deadline_stops_waiting_but_leaves_operation_running() {
    let mut fx = Fixture::new();
    fx.spec.poller.deadline_secs = Some(1);
    let slow = kfgcp_provider::MemoryCloud::new().with_polls_until_done(1_000);
    fx.cloud = slow;

    let err = fx.coordinator().apply(&iap()).await.unwrap_err();

    assert_eq!(err.kind(), kfgcp_core::ErrorKind::Cancelled);
    let storage = fx.cloud.deployment(PROJECT, "demo-storage").unwrap();
    assert!(!storage.operation.unwrap().is_done());
}
