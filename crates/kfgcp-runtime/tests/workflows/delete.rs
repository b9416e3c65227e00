//! Delete workflow tests.

use crate::common::*;
use kfgcp_core::Binding;
use kfgcp_runtime::DeleteAction;
use pretty_assertions::assert_eq;

#[tokio::test(start_paused = true)]
async fn delete_twice_succeeds_and_keeps_storage() {
    let fx = Fixture::new();
    let coordinator = fx.coordinator();
    coordinator.apply(&iap()).await.unwrap();

    let first = coordinator.delete().await.unwrap();
    let second = coordinator.delete().await.unwrap();

    assert_eq!(first.groups, vec![("cluster".to_string(), DeleteAction::Deleted)]);
    assert_eq!(second.groups, vec![("cluster".to_string(), DeleteAction::AlreadyAbsent)]);
    assert_eq!(fx.cloud.deployment_names(PROJECT), vec!["demo-storage".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn delete_storage_removes_every_group_in_reverse_order() {
    let mut fx = Fixture::new();
    write(&fx.config_dir().join("network.yaml"), "resources: []\n");
    fx.spec.delete_storage = true;
    let coordinator = fx.coordinator();
    coordinator.apply(&iap()).await.unwrap();

    let report = coordinator.delete().await.unwrap();

    let order: Vec<&str> = report.groups.iter().map(|(g, _)| g.as_str()).collect();
    assert_eq!(order, vec!["network", "cluster", "storage"]);
    assert_eq!(report.skipped, vec!["gcfs".to_string()]);
    assert!(fx.cloud.deployment_names(PROJECT).is_empty());
}

#[tokio::test(start_paused = true)]
async fn delete_of_nothing_is_success() {
    let fx = Fixture::new();

    let report = fx.coordinator().delete().await.unwrap();

    assert!(report
        .groups
        .iter()
        .all(|(_, action)| *action == DeleteAction::AlreadyAbsent));
    assert_eq!(fx.cloud.counters().policy_writes, 0);
}

#[tokio::test(start_paused = true)]
async fn policy_round_trip_leaves_unrelated_members() {
    let fx = Fixture::new();
    fx.cloud.seed_policy(
        PROJECT,
        vec![
            Binding::new("roles/editor", vec!["user:bob@example.com".to_string()]),
            Binding::new("roles/viewer", vec!["group:ops@example.com".to_string()]),
        ],
    );
    let coordinator = fx.coordinator();

    coordinator.apply(&iap()).await.unwrap();
    coordinator.delete().await.unwrap();

    let policy = fx.cloud.policy(PROJECT);
    for member in [ADMIN_MEMBER, USER_MEMBER, VM_MEMBER] {
        assert!(!policy.contains_member(member), "{member} still bound");
    }
    assert_eq!(
        policy.binding("roles/editor").unwrap().members,
        vec!["user:bob@example.com".to_string()]
    );
    assert_eq!(
        policy.binding("roles/viewer").unwrap().members,
        vec!["group:ops@example.com".to_string()]
    );
    assert!(policy.binding("roles/logging.logWriter").is_none());
}
