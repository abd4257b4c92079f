//! # Controller Manager
//!
//! Owns the lifecycle of a set of controllers: starts each one under
//! supervised restart, reports when they are all watching, and drains them on
//! shutdown.

use super::clock::Clock;
use super::error::ManagerError;
use super::restart::{supervise, RestartPolicy};
use crate::config::ControllerConfig;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// A control loop the manager can run and restart
#[async_trait]
pub trait Controller: Send + Sync {
    fn name(&self) -> &str;

    /// Run until `cancel` fires or the loop fails.
    /// Sets `ready` once the watch is open and the initial list is queued.
    async fn run(
        &self,
        cancel: CancellationToken,
        ready: &watch::Sender<bool>,
    ) -> Result<(), ManagerError>;
}

pub struct ControllerManager {
    name: String,
    controllers: Vec<Arc<dyn Controller>>,
    policy: RestartPolicy,
    clock: Arc<dyn Clock>,
    startup_timeout: Duration,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<u32>>,
    readiness: Vec<watch::Receiver<bool>>,
}

impl fmt::Debug for ControllerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerManager")
            .field("name", &self.name)
            .field(
                "controllers",
                &self.controllers.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .field("policy", &self.policy)
            .field("running", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl ControllerManager {
    pub fn new(name: impl Into<String>, config: &ControllerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            controllers: Vec::new(),
            policy: RestartPolicy::fixed(config.watch_restart_delay),
            clock,
            startup_timeout: config.startup_timeout,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            readiness: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add(&mut self, controller: Arc<dyn Controller>) {
        self.controllers.push(controller);
    }

    /// Readiness channel of each controller, populated by [`ControllerManager::run`]
    #[must_use]
    pub fn readiness(&self) -> &[watch::Receiver<bool>] {
        &self.readiness
    }

    /// Every controller has its watch open
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !self.readiness.is_empty() && self.readiness.iter().all(|ready| *ready.borrow())
    }

    /// Start every controller and wait until all of them are watching.
    ///
    /// The controllers keep running in the background after this returns,
    /// until `parent` is cancelled or [`ControllerManager::stop`] is called.
    ///
    /// # Errors
    ///
    /// [`ManagerError::StartupTimeout`] if the watches are not established in
    /// time; the controllers are cancelled in that case.
    pub async fn run(&mut self, parent: &CancellationToken) -> Result<(), ManagerError> {
        self.cancel = parent.child_token();
        let mut receivers = Vec::with_capacity(self.controllers.len());

        for controller in &self.controllers {
            let (ready_tx, ready_rx) = watch::channel(false);
            receivers.push(ready_rx);

            let controller = Arc::clone(controller);
            let name = controller.name().to_string();
            let clock = Arc::clone(&self.clock);
            let cancel = self.cancel.clone();
            let policy = self.policy;
            info!(manager = %self.name, controller = %name, "starting controller");
            self.tasks.push(tokio::spawn(async move {
                let (target, token, ready) = (&*controller, &cancel, &ready_tx);
                let restarts = supervise(&name, policy, clock.as_ref(), &cancel, move || {
                    target.run(token.clone(), ready)
                })
                .await;
                info!(controller = %name, restarts, "controller stopped");
                restarts
            }));
        }

        let wait_all = async {
            for ready in &mut receivers {
                ready
                    .wait_for(|ready| *ready)
                    .await
                    .map_err(|_closed| ManagerError::Stopped(self.name.clone()))?;
            }
            Ok(())
        };
        let result = match tokio::time::timeout(self.startup_timeout, wait_all).await {
            Ok(result) => result,
            Err(_elapsed) => Err(ManagerError::StartupTimeout {
                name: self.name.clone(),
                timeout: self.startup_timeout,
            }),
        };
        self.readiness = receivers;

        match result {
            Ok(()) => {
                info!(manager = %self.name, "all controllers watching");
                Ok(())
            }
            Err(e) => {
                error!(manager = %self.name, error = %e, "controller manager failed to start");
                self.cancel.cancel();
                Err(e)
            }
        }
    }

    /// Cancel every controller and wait for in-flight reconciles to finish
    ///
    /// # Errors
    ///
    /// [`ManagerError::ShutdownTimeout`] if the controllers do not stop in time.
    pub async fn stop(&mut self, timeout: Duration) -> Result<(), ManagerError> {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut self.tasks);
        match tokio::time::timeout(timeout, futures::future::join_all(tasks)).await {
            Ok(results) => {
                for joined in results {
                    if let Err(e) = joined {
                        error!(manager = %self.name, error = %e, "controller task failed");
                    }
                }
                info!(manager = %self.name, "controller manager stopped");
                Ok(())
            }
            Err(_elapsed) => {
                warn!(manager = %self.name, "controllers did not drain in time");
                Err(ManagerError::ShutdownTimeout {
                    name: self.name.clone(),
                    timeout,
                })
            }
        }
    }
}
