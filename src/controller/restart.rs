//! # Supervised Restart
//!
//! Reruns a control loop that exits, waiting between attempts according to a
//! [`RestartPolicy`], until cancelled. Delays go through the injected [`Clock`].

use super::backoff::ExponentialBackoff;
use super::clock::Clock;
use super::error::ManagerError;
use crate::observability;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    backoff: ExponentialBackoff,
}

impl RestartPolicy {
    /// Same delay before every restart
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self {
            backoff: ExponentialBackoff::fixed(delay),
        }
    }

    /// Doubling delay between restarts, capped at `max`
    #[must_use]
    pub fn exponential(base: Duration, max: Duration) -> Self {
        Self {
            backoff: ExponentialBackoff::new(base, max),
        }
    }

    /// Delay before restart number `restarts` (0-indexed)
    #[must_use]
    pub fn delay(&self, restarts: u32) -> Duration {
        self.backoff.delay(restarts)
    }
}

/// Run `run` until `cancel` fires, restarting it whenever it returns.
/// Returns the number of restarts performed.
pub async fn supervise<F, Fut>(
    name: &str,
    policy: RestartPolicy,
    clock: &dyn Clock,
    cancel: &CancellationToken,
    mut run: F,
) -> u32
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), ManagerError>>,
{
    let mut restarts: u32 = 0;
    loop {
        let result = run().await;
        if cancel.is_cancelled() {
            return restarts;
        }

        let delay = policy.delay(restarts);
        let span = info_span!("controller.restart", controller = name, restarts);
        async {
            match &result {
                Ok(()) => warn!("control loop exited unexpectedly"),
                Err(e) => warn!(error = %e, "control loop failed"),
            }
            info!("Restarting in {}s", delay.as_secs_f64());
        }
        .instrument(span)
        .await;

        restarts = restarts.saturating_add(1);
        observability::metrics::increment_controller_restarts(name);
        tokio::select! {
            () = cancel.cancelled() => return restarts,
            () = clock.sleep(delay) => {}
        }
    }
}
