//! # Team Reconciler Tests
//!
//! Drives the Team reconciler pass by pass against the in-memory store.
//!
//! These tests verify:
//! - Namespace creation and the finalizer ordering
//! - Idempotent replays
//! - Rejection of protected and malformed names
//! - Finalizer-guarded deletion, including a slow namespace teardown
//! - Conflict and timeout handling

mod common;

use async_trait::async_trait;
use common::{eventually, fast_config, owned_namespace, team_key, Fixture};
use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tenancy_controller::constants::{TEAM_FINALIZER, TEAM_OWNER_LABEL};
use tenancy_controller::controller::team::TeamReconciler;
use tenancy_controller::controller::{Outcome, ReconcileError, Reconciler};
use tenancy_controller::crd::{ReconcileStatus, Team};
use tenancy_controller::store::{
    Fault, MemoryStore, ObjectKey, ReadResource, StoreError, StoreOperation, WriteResource,
};

/// Reconcile until a pass asks for no follow-up
async fn converge<R: Reconciler>(reconciler: &R, key: &ObjectKey) -> Result<usize, ReconcileError> {
    for pass in 1..=5 {
        let outcome: Outcome = reconciler.reconcile(key).await?;
        if !outcome.requeue {
            return Ok(pass);
        }
    }
    panic!("{key} did not settle within 5 passes");
}

fn status_of(team: &Team) -> ReconcileStatus {
    team.status.as_ref().map(|s| s.status).unwrap_or_default()
}

#[tokio::test]
async fn test_create_team_creates_labelled_namespace() {
    let fx = Fixture::new();
    fx.create_team("t1").await;
    let key = team_key("t1");

    let first = fx.reconciler.reconcile(&key).await.unwrap();
    assert!(first.requeue, "finalizer pass should ask for a follow-up");
    let team = fx.get_team("t1").await.unwrap();
    assert_eq!(team.finalizers(), &[TEAM_FINALIZER.to_string()]);
    assert!(
        fx.get_namespace("t1").await.is_none(),
        "namespace must not exist before the finalizer is in place"
    );

    let second = fx.reconciler.reconcile(&key).await.unwrap();
    assert!(!second.requeue);

    let ns = fx.get_namespace("t1").await.unwrap();
    assert_eq!(
        ns.labels().get(TEAM_OWNER_LABEL).map(String::as_str),
        Some("t1")
    );
    let team = fx.get_team("t1").await.unwrap();
    let status = team.status.unwrap();
    assert_eq!(status.status, ReconcileStatus::Success);
    assert!(status.conditions.is_empty());
    assert_eq!(status.observed_generation, Some(1));
}

#[tokio::test]
async fn test_replay_is_idempotent() {
    let fx = Fixture::new();
    fx.create_team("t1").await;
    let key = team_key("t1");
    converge(&fx.reconciler, &key).await.unwrap();

    let err = fx.teams.create(&common::team("t1")).await.unwrap_err();
    assert!(err.is_already_exists());

    let status_writes = fx.teams.call_count(StoreOperation::UpdateStatus);
    let team_writes = fx.teams.call_count(StoreOperation::Update);
    let ns_creates = fx.namespaces.call_count(StoreOperation::Create);
    let before = fx.get_team("t1").await.unwrap();

    for _ in 0..3 {
        let outcome = fx.reconciler.reconcile(&key).await.unwrap();
        assert!(!outcome.requeue);
    }

    assert_eq!(fx.teams.call_count(StoreOperation::UpdateStatus), status_writes);
    assert_eq!(fx.teams.call_count(StoreOperation::Update), team_writes);
    assert_eq!(fx.namespaces.call_count(StoreOperation::Create), ns_creates);
    assert_eq!(fx.namespaces.len(), 1);
    let after = fx.get_team("t1").await.unwrap();
    assert_eq!(after.status, before.status);
    assert_eq!(after.resource_version(), before.resource_version());
}

#[tokio::test]
async fn test_existing_unlabelled_namespace_is_adopted() {
    let fx = Fixture::new();
    let mut ns = Namespace::default();
    ns.metadata.name = Some("t1".to_string());
    fx.namespaces.create(&ns).await.unwrap();
    fx.create_team("t1").await;

    converge(&fx.reconciler, &team_key("t1")).await.unwrap();

    assert_eq!(fx.namespaces.len(), 1);
    assert_eq!(
        status_of(&fx.get_team("t1").await.unwrap()),
        ReconcileStatus::Success
    );
}

#[tokio::test]
async fn test_protected_name_is_rejected() {
    let fx = Fixture::new();
    fx.create_team("kube-system").await;

    let err = fx
        .reconciler
        .reconcile(&team_key("kube-system"))
        .await
        .unwrap_err();
    assert!(err.is_terminal());
    assert!(matches!(err, ReconcileError::InvalidSpec { .. }));

    let team = fx.get_team("kube-system").await.unwrap();
    assert!(team.finalizers().is_empty());
    let status = team.status.unwrap();
    assert_eq!(status.status, ReconcileStatus::Failure);
    assert_eq!(status.conditions.len(), 1);
    assert!(status.conditions[0].message.contains("protected"));
    assert_eq!(status.conditions[0].r#type.as_deref(), Some("InvalidName"));

    assert_eq!(fx.namespaces.call_count(StoreOperation::Create), 0);
    assert!(fx.namespaces.is_empty());
}

#[tokio::test]
async fn test_controller_namespace_is_protected() {
    let mut config = fast_config();
    config.controller_namespace = "platform".to_string();
    config.protected_namespaces.push("platform".to_string());
    let fx = Fixture::with_config(config);
    fx.create_team("platform").await;

    let err = fx.reconciler.reconcile(&team_key("platform")).await.unwrap_err();
    assert!(err.is_terminal());
    assert!(fx.namespaces.is_empty());
}

#[tokio::test]
async fn test_malformed_name_is_rejected() {
    let fx = Fixture::new();
    fx.create_team("Team_A").await;

    let err = fx.reconciler.reconcile(&team_key("Team_A")).await.unwrap_err();
    assert!(err.is_terminal());

    let status = fx.get_team("Team_A").await.unwrap().status.unwrap();
    assert_eq!(status.status, ReconcileStatus::Failure);
    assert!(status.conditions[0].message.contains("DNS-1123"));
    assert!(fx.namespaces.is_empty());
}

#[tokio::test]
async fn test_namespace_owned_by_another_team_is_left_alone() {
    let fx = Fixture::new();
    fx.namespaces
        .create(&owned_namespace("t1", "other"))
        .await
        .unwrap();
    fx.create_team("t1").await;
    let key = team_key("t1");

    assert!(fx.reconciler.reconcile(&key).await.unwrap().requeue);
    let err = fx.reconciler.reconcile(&key).await.unwrap_err();
    assert!(err.is_terminal());

    let status = fx.get_team("t1").await.unwrap().status.unwrap();
    assert_eq!(status.status, ReconcileStatus::Failure);
    assert!(status.conditions[0].message.contains("owned by another team"));

    // Deleting the team must not take the other team's namespace with it.
    fx.teams.delete(&key).await.unwrap();
    fx.reconciler.reconcile(&key).await.unwrap();
    assert!(fx.get_team("t1").await.is_none());
    let ns = fx.get_namespace("t1").await.unwrap();
    assert_eq!(
        ns.labels().get(TEAM_OWNER_LABEL).map(String::as_str),
        Some("other")
    );
}

#[tokio::test]
async fn test_spec_change_updates_observed_generation() {
    let fx = Fixture::new();
    fx.create_team("t1").await;
    let key = team_key("t1");
    converge(&fx.reconciler, &key).await.unwrap();

    let mut team = fx.get_team("t1").await.unwrap();
    team.spec.summary = "renamed".to_string();
    let updated = fx.teams.update(&team).await.unwrap();
    assert_eq!(updated.metadata.generation, Some(2));

    converge(&fx.reconciler, &key).await.unwrap();
    let status = fx.get_team("t1").await.unwrap().status.unwrap();
    assert_eq!(status.status, ReconcileStatus::Success);
    assert_eq!(status.observed_generation, Some(2));
}

#[tokio::test]
async fn test_delete_removes_namespace_before_team() {
    let fx = Fixture::new();
    fx.create_team("t1").await;
    let key = team_key("t1");
    converge(&fx.reconciler, &key).await.unwrap();

    fx.teams.delete(&key).await.unwrap();
    let team = fx.get_team("t1").await.unwrap();
    assert!(team.metadata.deletion_timestamp.is_some());

    fx.reconciler.reconcile(&key).await.unwrap();
    assert!(fx.get_namespace("t1").await.is_none());
    let team = fx.get_team("t1").await.unwrap();
    assert_eq!(status_of(&team), ReconcileStatus::Deleting);
    assert_eq!(team.finalizers(), &[TEAM_FINALIZER.to_string()]);

    fx.reconciler.reconcile(&key).await.unwrap();
    assert!(fx.get_team("t1").await.is_none());
}

#[tokio::test]
async fn test_team_is_kept_while_namespace_terminates() {
    let fx = Fixture::new();
    fx.create_team("t1").await;
    let key = team_key("t1");
    converge(&fx.reconciler, &key).await.unwrap();

    // Hold the namespace in Terminating the way the API server would.
    let mut ns = fx.get_namespace("t1").await.unwrap();
    ns.finalizers_mut().push("kubernetes".to_string());
    fx.namespaces.update(&ns).await.unwrap();

    fx.teams.delete(&key).await.unwrap();
    fx.reconciler.reconcile(&key).await.unwrap();
    fx.reconciler.reconcile(&key).await.unwrap();

    let ns = fx.get_namespace("t1").await.unwrap();
    assert!(ns.metadata.deletion_timestamp.is_some());
    assert_eq!(fx.namespaces.call_count(StoreOperation::Delete), 1);
    let team = fx.get_team("t1").await.unwrap();
    assert_eq!(status_of(&team), ReconcileStatus::Deleting);
    assert!(!team.finalizers().is_empty());

    let mut ns = ns;
    ns.finalizers_mut().clear();
    fx.namespaces.update(&ns).await.unwrap();
    assert!(fx.get_namespace("t1").await.is_none());

    fx.reconciler.reconcile(&key).await.unwrap();
    assert!(fx.get_team("t1").await.is_none());
}

#[tokio::test]
async fn test_failed_finalizer_removal_is_reported_and_retried() {
    let fx = Fixture::new();
    fx.create_team("t1").await;
    let key = team_key("t1");
    converge(&fx.reconciler, &key).await.unwrap();

    fx.teams.delete(&key).await.unwrap();
    fx.reconciler.reconcile(&key).await.unwrap();
    assert!(fx.get_namespace("t1").await.is_none());

    fx.teams.fail_next(StoreOperation::Update, Fault::Conflict);
    let err = fx.reconciler.reconcile(&key).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Cleanup { .. }));
    assert!(!err.is_terminal());

    let team = fx.get_team("t1").await.unwrap();
    assert!(!team.finalizers().is_empty());
    let status = team.status.unwrap();
    assert_eq!(status.status, ReconcileStatus::Failure);
    assert_eq!(
        status.conditions[0].r#type.as_deref(),
        Some("FinalizerRemoval")
    );

    fx.reconciler.reconcile(&key).await.unwrap();
    assert!(fx.get_team("t1").await.is_none());
}

#[tokio::test]
async fn test_status_conflict_is_transient_and_recovers() {
    let fx = Fixture::new();
    fx.create_team("t1").await;
    let key = team_key("t1");

    assert!(fx.reconciler.reconcile(&key).await.unwrap().requeue);

    fx.teams.fail_next(StoreOperation::UpdateStatus, Fault::Conflict);
    let err = fx.reconciler.reconcile(&key).await.unwrap_err();
    assert!(!err.is_terminal());
    assert!(matches!(err, ReconcileError::Store(ref e) if e.is_conflict()));
    assert!(fx.get_namespace("t1").await.is_some());

    let outcome = fx.reconciler.reconcile(&key).await.unwrap();
    assert!(!outcome.requeue);
    assert_eq!(
        status_of(&fx.get_team("t1").await.unwrap()),
        ReconcileStatus::Success
    );
    assert_eq!(fx.namespaces.call_count(StoreOperation::Create), 1);
}

#[tokio::test]
async fn test_store_outage_is_transient() {
    let fx = Fixture::new();
    fx.create_team("t1").await;

    fx.teams.fail_next(StoreOperation::Get, Fault::Unavailable);
    let err = fx.reconciler.reconcile(&team_key("t1")).await.unwrap_err();
    assert!(!err.is_terminal());
    assert_eq!(err.class(), "transient");
}

#[tokio::test]
async fn test_rejected_namespace_create_is_reported_on_the_team() {
    let fx = Fixture::new();
    fx.create_team("t1").await;
    let key = team_key("t1");
    assert!(fx.reconciler.reconcile(&key).await.unwrap().requeue);

    fx.namespaces.fail_next(StoreOperation::Create, Fault::Rejected);
    let err = fx.reconciler.reconcile(&key).await.unwrap_err();
    assert!(err.is_terminal());
    assert!(fx.get_namespace("t1").await.is_none());

    let status = fx.get_team("t1").await.unwrap().status.unwrap();
    assert_eq!(status.status, ReconcileStatus::Failure);
    assert_eq!(status.conditions.len(), 1);
    let condition = &status.conditions[0];
    assert_eq!(condition.r#type.as_deref(), Some("RequestRejected"));
    assert!(condition.message.contains("admission webhook denied"));
    assert!(!condition.detail.is_empty());

    // Once the policy is fixed the next pass converges.
    fx.reconciler.reconcile(&key).await.unwrap();
    assert!(fx.get_namespace("t1").await.is_some());
    assert_eq!(
        status_of(&fx.get_team("t1").await.unwrap()),
        ReconcileStatus::Success
    );
}

#[tokio::test]
async fn test_rejected_namespace_delete_is_reported_on_the_team() {
    let fx = Fixture::new();
    fx.create_team("t1").await;
    let key = team_key("t1");
    converge(&fx.reconciler, &key).await.unwrap();
    fx.teams.delete(&key).await.unwrap();

    fx.namespaces.fail_next(StoreOperation::Delete, Fault::Rejected);
    let err = fx.reconciler.reconcile(&key).await.unwrap_err();
    assert!(err.is_terminal());

    let team = fx.get_team("t1").await.unwrap();
    assert!(!team.finalizers().is_empty());
    let status = team.status.unwrap();
    assert_eq!(status.status, ReconcileStatus::Failure);
    assert_eq!(
        status.conditions[0].r#type.as_deref(),
        Some("RequestRejected")
    );
    assert!(fx.get_namespace("t1").await.is_some());
}

#[tokio::test]
async fn test_missing_team_is_a_no_op() {
    let fx = Fixture::new();
    let outcome = fx.reconciler.reconcile(&team_key("ghost")).await.unwrap();
    assert!(!outcome.requeue);
    assert!(fx.namespaces.is_empty());
}

/// Namespace store whose calls never complete
#[derive(Debug)]
struct StalledNamespaces;

#[async_trait]
impl ReadResource<Namespace> for StalledNamespaces {
    async fn get(&self, _key: &ObjectKey) -> Result<Option<Namespace>, StoreError> {
        std::future::pending().await
    }
}

#[async_trait]
impl WriteResource<Namespace> for StalledNamespaces {
    async fn create(&self, _obj: &Namespace) -> Result<Namespace, StoreError> {
        std::future::pending().await
    }

    async fn update(&self, _obj: &Namespace) -> Result<Namespace, StoreError> {
        std::future::pending().await
    }

    async fn delete(&self, _key: &ObjectKey) -> Result<(), StoreError> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_stalled_store_call_times_out() {
    let mut config = fast_config();
    config.call_timeout = Duration::from_secs(2);
    let teams = Arc::new(MemoryStore::<Team>::new());
    let reconciler = TeamReconciler::new(Arc::clone(&teams), Arc::new(StalledNamespaces), config);
    teams.create(&common::team("t1")).await.unwrap();
    let key = team_key("t1");

    assert!(reconciler.reconcile(&key).await.unwrap().requeue);

    let started = tokio::time::Instant::now();
    let err = reconciler.reconcile(&key).await.unwrap_err();
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(!err.is_terminal());
    assert!(matches!(
        err,
        ReconcileError::Store(StoreError::Timeout { .. })
    ));

    let team = teams.get(&key).await.unwrap().unwrap();
    assert!(team.status.is_none());
}

#[tokio::test]
async fn test_converges_under_concurrent_passes() {
    let fx = Arc::new(Fixture::new());
    fx.create_team("t1").await;
    let key = team_key("t1");

    // Overlapping passes race on resourceVersion; losers fail with a conflict
    // and a later pass finishes the job.
    let mut handles = Vec::new();
    for _ in 0..4 {
        let (fx, key) = (Arc::clone(&fx), key.clone());
        handles.push(tokio::spawn(async move {
            let _ = fx.reconciler.reconcile(&key).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let settled = eventually(Duration::from_secs(2), || {
        let (fx, key) = (Arc::clone(&fx), key.clone());
        async move {
            let _ = fx.reconciler.reconcile(&key).await;
            fx.get_team("t1")
                .await
                .is_some_and(|t| status_of(&t) == ReconcileStatus::Success)
        }
    })
    .await;
    assert!(settled);
    assert_eq!(fx.namespaces.len(), 1);
}
