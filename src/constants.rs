//! # Constants
//!
//! Default values for controller and server configuration.
//! Every value here can be overridden through the environment, see [`crate::config`].

/// Finalizer marker owned by the Team controller
pub const TEAM_FINALIZER: &str = "teams";

/// Label placed on namespaces created for a team, pointing back at the owning team
pub const TEAM_OWNER_LABEL: &str = "tenancy.io/team";

/// Namespace the controller itself runs in (always protected)
pub const DEFAULT_CONTROLLER_NAMESPACE: &str = "tenancy-system";

/// Namespaces a team may never claim
pub const DEFAULT_PROTECTED_NAMESPACES: &[&str] =
    &["default", "kube-system", "kube-public", "kube-node-lease"];

/// Concurrent reconciles per resource kind
pub const DEFAULT_WORKER_COUNT: usize = 2;

/// Full re-list interval used to self-heal from missed watch events (seconds)
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 300;

/// Delay before a crashed watch loop is restarted (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// First retry delay after a transient reconcile error (milliseconds)
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 500;

/// Cap on the retry delay after repeated transient errors (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

/// Deadline applied to every store call made from a reconcile pass (seconds)
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;

/// How long a manager may take to report its watches started (seconds)
pub const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 60;

/// How long shutdown waits for in-flight reconciles to drain (seconds)
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Metrics and probe server port
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Server startup timeout (seconds)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Server readiness poll interval (milliseconds)
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;
