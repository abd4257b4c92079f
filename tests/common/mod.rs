//! Shared fixtures for the integration tests

#![allow(dead_code, reason = "each test binary uses a different subset of the fixtures")]

use k8s_openapi::api::core::v1::Namespace;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tenancy_controller::config::ControllerConfig;
use tenancy_controller::constants::TEAM_OWNER_LABEL;
use tenancy_controller::controller::team::TeamReconciler;
use tenancy_controller::crd::{Team, TeamSpec};
use tenancy_controller::store::{MemoryStore, ObjectKey, ReadResource, WriteResource};

pub type MemoryTeamReconciler = TeamReconciler<MemoryStore<Team>, MemoryStore<Namespace>>;

pub fn team(name: &str) -> Team {
    Team::new(
        name,
        TeamSpec {
            summary: format!("{name} team"),
            description: String::new(),
        },
    )
}

pub fn team_key(name: &str) -> ObjectKey {
    ObjectKey::of::<Team>(None, name)
}

pub fn namespace_key(name: &str) -> ObjectKey {
    ObjectKey::of::<Namespace>(None, name)
}

/// A namespace labelled as owned by `owner`
pub fn owned_namespace(name: &str, owner: &str) -> Namespace {
    let mut ns = Namespace::default();
    ns.metadata.name = Some(name.to_string());
    ns.metadata.labels = Some(BTreeMap::from([(
        TEAM_OWNER_LABEL.to_string(),
        owner.to_string(),
    )]));
    ns
}

/// Short intervals so the control loops settle within a test
pub fn fast_config() -> ControllerConfig {
    ControllerConfig {
        worker_count: 2,
        resync_interval: Duration::from_millis(200),
        watch_restart_delay: Duration::from_millis(50),
        backoff_base: Duration::from_millis(10),
        backoff_max: Duration::from_millis(100),
        call_timeout: Duration::from_secs(5),
        startup_timeout: Duration::from_secs(5),
        shutdown_timeout: Duration::from_secs(5),
        ..ControllerConfig::default()
    }
}

pub struct Fixture {
    pub teams: Arc<MemoryStore<Team>>,
    pub namespaces: Arc<MemoryStore<Namespace>>,
    pub reconciler: MemoryTeamReconciler,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: ControllerConfig) -> Self {
        let teams = Arc::new(MemoryStore::<Team>::new());
        let namespaces = Arc::new(MemoryStore::<Namespace>::new());
        let reconciler = TeamReconciler::new(Arc::clone(&teams), Arc::clone(&namespaces), config);
        Self {
            teams,
            namespaces,
            reconciler,
        }
    }

    pub async fn create_team(&self, name: &str) -> Team {
        self.teams.create(&team(name)).await.unwrap()
    }

    pub async fn get_team(&self, name: &str) -> Option<Team> {
        self.teams.get(&team_key(name)).await.unwrap()
    }

    pub async fn get_namespace(&self, name: &str) -> Option<Namespace> {
        self.namespaces.get(&namespace_key(name)).await.unwrap()
    }
}

/// Poll `check` until it holds or `timeout` passes
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
