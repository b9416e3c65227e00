//! Apply workflow tests.

use crate::common::*;
use kfgcp_core::{Binding, ErrorKind};
use kfgcp_runtime::{ReconcileAction, ReconcileError, SecretOutcome};
use pretty_assertions::assert_eq;

fn actions(report: &kfgcp_runtime::ApplyReport) -> Vec<(&str, ReconcileAction)> {
    report
        .groups
        .iter()
        .map(|(name, action)| (name.as_str(), *action))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn first_apply_creates_everything_in_order() {
    let fx = Fixture::new();

    let report = fx.coordinator().apply(&iap()).await.unwrap();

    assert_eq!(
        actions(&report),
        vec![
            ("storage", ReconcileAction::Inserted),
            ("cluster", ReconcileAction::Inserted),
        ]
    );
    assert_eq!(report.skipped, vec!["network".to_string(), "gcfs".to_string()]);

    let cluster = fx.cloud.deployment(PROJECT, "demo").unwrap();
    let target = cluster.target.unwrap();
    assert_eq!(target.imports.len(), 1);
    assert_eq!(target.imports[0].name, "network-fragment.yaml");
    assert_eq!(target.imports[0].content, NETWORK_FRAGMENT);
    assert!(fx.cloud.deployment(PROJECT, "demo-storage").is_some());

    let policy = fx.cloud.policy(PROJECT);
    assert_eq!(
        policy.binding("roles/editor").unwrap().members,
        vec![ADMIN_MEMBER.to_string(), USER_MEMBER.to_string()]
    );
    assert!(policy.contains_member(VM_MEMBER));
    assert!(policy.contains_member("user:alice@example.com"));
    assert_eq!(fx.cloud.counters().policy_writes, 1);

    assert!(fx.cloud.has_namespace("kubeflow"));
    let admin = fx.cloud.role_binding("default-admin").unwrap();
    assert_eq!(admin.role, "cluster-admin");
    assert_eq!(admin.user, "alice@example.com");

    assert!(fx.cloud.secret("kubeflow", "admin-gcp-sa").is_some());
    assert!(fx.cloud.secret("kubeflow", "user-gcp-sa").is_some());
    let oauth = fx.cloud.secret("kubeflow", "kubeflow-oauth").unwrap();
    assert_eq!(oauth.payload["client_id"], b"client-id".to_vec());
    assert_eq!(fx.cloud.counters().key_mints, 2);
}

#[tokio::test(start_paused = true)]
async fn second_apply_changes_nothing() {
    let fx = Fixture::new();
    let coordinator = fx.coordinator();

    coordinator.apply(&iap()).await.unwrap();
    let policy_after_first = fx.cloud.policy(PROJECT).normalized();
    let admin_key = fx.cloud.secret("kubeflow", "admin-gcp-sa").unwrap();

    let report = coordinator.apply(&iap()).await.unwrap();

    assert_eq!(
        actions(&report),
        vec![
            ("storage", ReconcileAction::Unchanged),
            ("cluster", ReconcileAction::Unchanged),
        ]
    );
    assert!(report.secrets.iter().all(|s| s.outcome == SecretOutcome::Existing));

    let counters = fx.cloud.counters();
    assert_eq!(counters.inserts, 2);
    assert_eq!(counters.updates, 0);
    assert_eq!(counters.key_mints, 2);
    assert_eq!(counters.secret_creates, 3);
    assert_eq!(fx.cloud.policy(PROJECT).normalized(), policy_after_first);
    assert_eq!(fx.cloud.secret("kubeflow", "admin-gcp-sa").unwrap(), admin_key);
}

#[tokio::test(start_paused = true)]
async fn changed_template_updates_only_that_group() {
    let fx = Fixture::new();
    let coordinator = fx.coordinator();
    coordinator.apply(&iap()).await.unwrap();

    write(
        &fx.config_dir().join("storage-kubeflow.yaml"),
        "resources:\n- name: demo-storage\n  type: storage.jinja\n  properties:\n    size: 200\n",
    );
    let report = coordinator.apply(&iap()).await.unwrap();

    assert_eq!(
        actions(&report),
        vec![
            ("storage", ReconcileAction::Updated),
            ("cluster", ReconcileAction::Unchanged),
        ]
    );
    assert_eq!(fx.cloud.counters().updates, 1);
}

#[tokio::test(start_paused = true)]
async fn optional_group_is_reconciled_when_its_template_exists() {
    let fx = Fixture::new();
    write(&fx.config_dir().join("network.yaml"), "resources: []\n");

    let report = fx.coordinator().apply(&iap()).await.unwrap();

    assert_eq!(
        actions(&report),
        vec![
            ("storage", ReconcileAction::Inserted),
            ("cluster", ReconcileAction::Inserted),
            ("network", ReconcileAction::Inserted),
        ]
    );
    assert_eq!(report.skipped, vec!["gcfs".to_string()]);
    assert!(fx.cloud.deployment(PROJECT, "demo-network").is_some());
}

#[tokio::test(start_paused = true)]
async fn missing_required_template_fails_before_any_provider_call() {
    let fx = Fixture::new();
    std::fs::remove_file(fx.config_dir().join("cluster-kubeflow.yaml")).unwrap();

    let err = fx.coordinator().apply(&iap()).await.unwrap_err();

    assert!(matches!(err, ReconcileError::MissingTemplate { ref group, .. } if group == "cluster"));
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(fx.cloud.counters(), Default::default());
}

#[tokio::test(start_paused = true)]
async fn malformed_bindings_file_is_a_config_error() {
    let fx = Fixture::new();
    write(&fx.config_dir().join("iam_bindings.yaml"), "roles: []\n");

    let err = fx.coordinator().apply(&iap()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Config);
    assert_eq!(fx.cloud.counters().inserts, 0);
}

#[tokio::test(start_paused = true)]
async fn terminal_operation_failure_names_the_group_and_rerun_recovers() {
    let fx = Fixture::new();
    let coordinator = fx.coordinator();
    fx.cloud.fail_next_operation(403, "quota exceeded");

    let err = coordinator.apply(&iap()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TerminalProvider);
    assert!(err.to_string().contains("storage"), "{err}");
    assert!(fx.cloud.deployment(PROJECT, "demo").is_none());

    let report = coordinator.apply(&iap()).await.unwrap();
    assert_eq!(report.groups[0], ("storage".to_string(), ReconcileAction::Updated));
}

#[tokio::test(start_paused = true)]
async fn basic_auth_login_is_rewritten_every_run() {
    let fx = Fixture::new();
    let coordinator = fx.coordinator();

    coordinator.apply(&basic_auth("admin", "first")).await.unwrap();
    let first = fx.cloud.secret("kubeflow", "kubeflow-login").unwrap();
    coordinator.apply(&basic_auth("admin", "second")).await.unwrap();
    let second = fx.cloud.secret("kubeflow", "kubeflow-login").unwrap();

    assert_eq!(second.payload["username"], b"admin".to_vec());
    assert_ne!(first.payload["passwordhash"], second.payload["passwordhash"]);
    assert_eq!(fx.cloud.counters().secret_updates, 1);
    assert!(fx.cloud.secret("kubeflow", "kubeflow-oauth").is_none());
}

#[tokio::test(start_paused = true)]
async fn mesh_manifests_and_secrets_go_to_the_mesh_namespace() {
    let fx = Fixture::new().with_mesh();

    let report = fx.coordinator().apply(&iap()).await.unwrap();

    assert_eq!(
        fx.cloud.manifests(),
        vec![
            "crds.yaml".to_string(),
            "istio-noauth.yaml".to_string(),
            "kf-istio-resources.yaml".to_string(),
        ]
    );
    for name in ["admin-gcp-sa", "user-gcp-sa"] {
        assert!(fx.cloud.secret("kubeflow", name).is_some());
        assert!(fx.cloud.secret("istio-system", name).is_some());
    }
    assert!(fx.cloud.secret("istio-system", "kubeflow-oauth").is_some());
    assert!(fx.cloud.secret("kubeflow", "kubeflow-oauth").is_none());
    assert_eq!(fx.cloud.counters().key_mints, 4);

    let order: Vec<(&str, &str)> = report
        .secrets
        .iter()
        .map(|s| (s.namespace.as_str(), s.name.as_str()))
        .collect();
    assert_eq!(
        order,
        vec![
            ("kubeflow", "admin-gcp-sa"),
            ("kubeflow", "user-gcp-sa"),
            ("istio-system", "admin-gcp-sa"),
            ("istio-system", "user-gcp-sa"),
            ("istio-system", "kubeflow-oauth"),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn failing_manifest_aborts_the_rest_of_apply() {
    let fx = Fixture::new().with_mesh();
    fx.cloud.fail_manifest("istio-noauth.yaml");

    let err = fx.coordinator().apply(&iap()).await.unwrap_err();

    assert!(err.to_string().contains("istio-noauth.yaml"), "{err}");
    assert_eq!(fx.cloud.manifests(), vec!["crds.yaml".to_string()]);
    assert!(fx.cloud.secret_names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn concurrent_policy_edit_survives_apply() {
    let fx = Fixture::new();
    fx.cloud.race_next_policy_write(Binding::new(
        "roles/editor",
        vec!["user:carol@example.com".to_string()],
    ));

    fx.coordinator().apply(&iap()).await.unwrap();

    let editor = fx.cloud.policy(PROJECT).binding("roles/editor").cloned().unwrap();
    assert!(editor.members.contains(&"user:carol@example.com".to_string()));
    assert!(editor.members.contains(&ADMIN_MEMBER.to_string()));
    assert_eq!(fx.cloud.counters().policy_conflicts, 1);
}
