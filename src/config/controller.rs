//! # Control Loop Configuration
//!
//! Worker pool sizing, resync cadence, retry policy and the protected namespace list.

use super::env_var_or_default;
use crate::constants::{
    DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_SECS, DEFAULT_CALL_TIMEOUT_SECS,
    DEFAULT_CONTROLLER_NAMESPACE, DEFAULT_PROTECTED_NAMESPACES, DEFAULT_RESYNC_INTERVAL_SECS,
    DEFAULT_SHUTDOWN_TIMEOUT_SECS, DEFAULT_STARTUP_TIMEOUT_SECS, DEFAULT_WATCH_RESTART_DELAY_SECS,
    DEFAULT_WORKER_COUNT,
};
use std::time::Duration;

/// Settings shared by every controller the supervisor starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Concurrent reconciles per resource kind (minimum 1)
    pub worker_count: usize,
    /// Interval between full re-lists of a watched kind
    pub resync_interval: Duration,
    /// Fixed delay before a failed watch loop is restarted
    pub watch_restart_delay: Duration,
    /// First retry delay after a transient reconcile error
    pub backoff_base: Duration,
    /// Upper bound for the retry delay
    pub backoff_max: Duration,
    /// Deadline for each store call made during a reconcile pass
    pub call_timeout: Duration,
    /// How long `ControllerManager::run` waits for watches to start
    pub startup_timeout: Duration,
    /// How long shutdown waits for workers to drain
    pub shutdown_timeout: Duration,
    /// Namespace the controller is deployed to
    pub controller_namespace: String,
    /// Names no team may claim (controller namespace is always included)
    pub protected_namespaces: Vec<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let controller_namespace = DEFAULT_CONTROLLER_NAMESPACE.to_string();
        let protected_namespaces = with_controller_namespace(
            DEFAULT_PROTECTED_NAMESPACES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            &controller_namespace,
        );
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            resync_interval: Duration::from_secs(DEFAULT_RESYNC_INTERVAL_SECS),
            watch_restart_delay: Duration::from_secs(DEFAULT_WATCH_RESTART_DELAY_SECS),
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            backoff_max: Duration::from_secs(DEFAULT_BACKOFF_MAX_SECS),
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
            startup_timeout: Duration::from_secs(DEFAULT_STARTUP_TIMEOUT_SECS),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            controller_namespace,
            protected_namespaces,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        let controller_namespace = env_var_or_default(
            "CONTROLLER_NAMESPACE",
            DEFAULT_CONTROLLER_NAMESPACE.to_string(),
        );
        let protected = parse_namespace_list(&env_var_or_default(
            "PROTECTED_NAMESPACES",
            DEFAULT_PROTECTED_NAMESPACES.join(","),
        ));

        Self {
            worker_count: env_var_or_default("WORKER_COUNT", DEFAULT_WORKER_COUNT).max(1),
            resync_interval: Duration::from_secs(env_var_or_default(
                "RESYNC_INTERVAL_SECS",
                DEFAULT_RESYNC_INTERVAL_SECS,
            )),
            watch_restart_delay: Duration::from_secs(env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            )),
            backoff_base: Duration::from_millis(env_var_or_default(
                "BACKOFF_BASE_MS",
                DEFAULT_BACKOFF_BASE_MS,
            )),
            backoff_max: Duration::from_secs(env_var_or_default(
                "BACKOFF_MAX_SECS",
                DEFAULT_BACKOFF_MAX_SECS,
            )),
            call_timeout: Duration::from_secs(env_var_or_default(
                "CALL_TIMEOUT_SECS",
                DEFAULT_CALL_TIMEOUT_SECS,
            )),
            startup_timeout: Duration::from_secs(env_var_or_default(
                "STARTUP_TIMEOUT_SECS",
                DEFAULT_STARTUP_TIMEOUT_SECS,
            )),
            shutdown_timeout: Duration::from_secs(env_var_or_default(
                "SHUTDOWN_TIMEOUT_SECS",
                DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            )),
            protected_namespaces: with_controller_namespace(protected, &controller_namespace),
            controller_namespace,
        }
    }

    /// Whether `name` is on the protected list
    #[must_use]
    pub fn is_protected(&self, name: &str) -> bool {
        self.protected_namespaces.iter().any(|p| p == name)
    }
}

/// Split a comma separated list, dropping blanks and duplicates
fn parse_namespace_list(raw: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

fn with_controller_namespace(mut names: Vec<String>, controller_namespace: &str) -> Vec<String> {
    if !names.iter().any(|n| n == controller_namespace) {
        names.push(controller_namespace.to_string());
    }
    names
}
