//! # Process Supervisor
//!
//! Outermost component: builds one controller manager per registered factory,
//! starts them in registration order and relays shutdown to all of them.

use crate::config::ControllerConfig;
use crate::controller::clock::Clock;
use crate::controller::registry::{ControllerRegistry, Dependencies};
use crate::controller::{ControllerManager, ManagerError};
use crate::store::StoreBackend;
use futures::future::select_all;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug)]
pub struct ProcessSupervisor {
    registry: ControllerRegistry,
    deps: Dependencies,
    managers: Vec<ControllerManager>,
    cancel: CancellationToken,
}

impl ProcessSupervisor {
    pub fn new(
        registry: ControllerRegistry,
        backend: StoreBackend,
        config: ControllerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            deps: Dependencies {
                backend,
                config,
                clock,
            },
            managers: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Token cancelled by [`ProcessSupervisor::stop`]
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Every manager has all of its watches open
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !self.managers.is_empty() && self.managers.iter().all(ControllerManager::is_ready)
    }

    /// Live view of every controller's readiness
    #[must_use]
    pub fn readiness(&self) -> Readiness {
        Readiness {
            receivers: self
                .managers
                .iter()
                .flat_map(|manager| manager.readiness().iter().cloned())
                .collect(),
        }
    }

    /// Build and start every registered controller.
    ///
    /// # Errors
    ///
    /// Returns the first build or startup failure. Managers started before it
    /// are stopped again.
    pub async fn start(&mut self) -> Result<(), ManagerError> {
        if self.registry.is_empty() {
            warn!("no controllers registered");
        }
        let factories: Vec<_> = self.registry.factories().cloned().collect();
        for factory in factories {
            let started = match factory.build(&self.deps) {
                Ok(controller) => {
                    let mut manager = ControllerManager::new(
                        factory.name(),
                        &self.deps.config,
                        Arc::clone(&self.deps.clock),
                    );
                    manager.add(controller);
                    let result = manager.run(&self.cancel).await;
                    self.managers.push(manager);
                    result
                }
                Err(e) => Err(e),
            };
            if let Err(e) = started {
                error!(controller = factory.name(), error = %e, "failed to start controller");
                self.stop().await;
                return Err(e);
            }
        }
        info!(controllers = ?self.registry.names(), "all controllers started");
        Ok(())
    }

    /// Cancel every manager and wait for each to drain, logging any that time out
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        let timeout = self.deps.config.shutdown_timeout;
        for manager in &mut self.managers {
            if let Err(e) = manager.stop(timeout).await {
                warn!(manager = manager.name(), error = %e, "controller manager did not stop cleanly");
            }
        }
        info!("all controllers stopped");
    }
}

/// Readiness of a set of controllers. Drops to not-ready while any of them is
/// restarting its watch.
#[derive(Debug, Clone)]
pub struct Readiness {
    receivers: Vec<watch::Receiver<bool>>,
}

impl Readiness {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !self.receivers.is_empty() && self.receivers.iter().all(|ready| *ready.borrow())
    }

    /// Wait until any controller's readiness changes.
    /// Returns false once a controller has stopped for good.
    pub async fn changed(&mut self) -> bool {
        if self.receivers.is_empty() {
            return false;
        }
        let changes = self.receivers.iter_mut().map(|ready| Box::pin(ready.changed()));
        let (result, _index, _rest) = select_all(changes).await;
        result.is_ok()
    }
}
