//! # Team Controller
//!
//! Drives a [`Team`] and the namespace it owns toward convergence.
//!
//! ## Upsert path
//!
//! 1. Validate the name (protected list, DNS-1123). A bad name is a terminal
//!    `Failure`; no finalizer is added and nothing is created.
//! 2. Add the `teams` finalizer if missing, then requeue. The marker is in
//!    place before the namespace exists, so a crash right after creating it
//!    still leaves a cleanup obligation behind.
//! 3. Ensure the namespace exists and is labelled for this team. A namespace
//!    labelled for another team is a terminal `Failure`.
//! 4. Write `Success` with empty conditions.
//!
//! ## Delete path
//!
//! 1. If the team's namespace still exists, request its deletion, report
//!    `Deleting` and return. A later watch event or resync re-enters here.
//! 2. Once the namespace is gone, remove the finalizer so the store can drop
//!    the team. If that fails the team reports `Failure` and keeps the marker.
//!
//! A request the store refuses outright (admission webhook, quota) on either
//! path is reported as a `RequestRejected` failure condition and not retried.

mod namespace;
mod status;
mod validation;

pub use namespace::{desired_namespace, foreign_owner, namespace_key};
pub use status::apply_status;
pub use validation::{validate_team_name, NameViolation};

use super::dispatcher::Dispatcher;
use super::error::{ManagerError, ReconcileError};
use super::finalizer::FinalizerGuard;
use super::manager::Controller;
use super::reconciler::{Outcome, Reconciler};
use super::registry::{ControllerFactory, ControllerRegistry, Dependencies};
use crate::config::ControllerConfig;
use crate::constants::TEAM_FINALIZER;
use crate::crd::{Condition, ObjectStatus, Team};
use crate::store::{ObjectKey, ReadResource, StoreError, WriteResource, WriteStatus};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::{Resource, ResourceExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Store access the Team reconciler needs for teams
pub trait TeamStore: ReadResource<Team> + WriteResource<Team> + WriteStatus<Team> {}

impl<T> TeamStore for T where T: ReadResource<Team> + WriteResource<Team> + WriteStatus<Team> + ?Sized {}

/// Store access the Team reconciler needs for namespaces
pub trait NamespaceStore: ReadResource<Namespace> + WriteResource<Namespace> {}

impl<T> NamespaceStore for T where T: ReadResource<Namespace> + WriteResource<Namespace> + ?Sized {}

pub struct TeamReconciler<T: ?Sized, N: ?Sized> {
    teams: Arc<T>,
    namespaces: Arc<N>,
    guard: FinalizerGuard,
    config: ControllerConfig,
}

impl<T: ?Sized, N: ?Sized> fmt::Debug for TeamReconciler<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeamReconciler")
            .field("finalizer", &self.guard.name())
            .field("call_timeout", &self.config.call_timeout)
            .finish_non_exhaustive()
    }
}

impl<T, N> TeamReconciler<T, N>
where
    T: TeamStore + ?Sized,
    N: NamespaceStore + ?Sized,
{
    pub fn new(teams: Arc<T>, namespaces: Arc<N>, config: ControllerConfig) -> Self {
        Self {
            teams,
            namespaces,
            guard: FinalizerGuard::new(TEAM_FINALIZER),
            config,
        }
    }

    /// Bound a store call by the configured deadline
    async fn call<R>(
        &self,
        operation: &'static str,
        request: impl Future<Output = Result<R, StoreError>>,
    ) -> Result<R, StoreError> {
        let timeout = self.config.call_timeout;
        tokio::time::timeout(timeout, request)
            .await
            .unwrap_or(Err(StoreError::Timeout { operation, timeout }))
    }

    async fn write_status(&self, team: &Team, desired: ObjectStatus) -> Result<(), StoreError> {
        self.call("update team status", apply_status(&*self.teams, team, desired))
            .await
            .map(|_written| ())
    }

    /// Report a terminal problem and fail the pass
    async fn reject(
        &self,
        key: &ObjectKey,
        team: &Team,
        condition: Condition,
    ) -> Result<Outcome, ReconcileError> {
        let reason = condition.message.clone();
        warn!(resource.name = %key.name, reason = %reason, "team rejected");
        self.write_status(team, ObjectStatus::failure(team.meta().generation, condition))
            .await?;
        Err(ReconcileError::InvalidSpec {
            key: key.clone(),
            reason,
        })
    }

    async fn upsert(&self, key: &ObjectKey, team: &Team) -> Result<Outcome, ReconcileError> {
        let name = team.name_any();

        if let Err(violation) = validate_team_name(&name, &self.config) {
            let condition = Condition::new(violation.to_string(), violation.corrective_action())
                .with_type("InvalidName");
            return self.reject(key, team, condition).await;
        }

        if self.guard.need_to_add(team) {
            self.call("add finalizer", self.guard.add(&*self.teams, team))
                .await?;
            info!(resource.name = %name, finalizer = self.guard.name(), "finalizer added");
            return Ok(Outcome::requeue());
        }

        let ns_key = namespace_key(&name);
        match self.call("get namespace", self.namespaces.get(&ns_key)).await? {
            Some(existing) => {
                if let Some(owner) = foreign_owner(&existing, &name) {
                    let condition = Condition::new(
                        format!("namespace '{name}' is owned by another team ('{owner}')"),
                        "Rename this team or remove the other team first",
                    )
                    .with_type("NamespaceConflict");
                    return self.reject(key, team, condition).await;
                }
                debug!(resource.name = %name, "namespace present");
            }
            None => match self
                .call("create namespace", self.namespaces.create(&desired_namespace(&name)))
                .await
            {
                Ok(_) => info!(resource.name = %name, "namespace created"),
                Err(e) if e.is_already_exists() => {
                    debug!(resource.name = %name, "namespace created concurrently");
                }
                Err(e) => return Err(e.into()),
            },
        }

        self.write_status(team, ObjectStatus::success(team.meta().generation))
            .await?;
        Ok(Outcome::done())
    }

    async fn cleanup(&self, key: &ObjectKey, team: &Team) -> Result<Outcome, ReconcileError> {
        let name = team.name_any();
        let ns_key = namespace_key(&name);

        if let Some(existing) = self.call("get namespace", self.namespaces.get(&ns_key)).await? {
            match foreign_owner(&existing, &name) {
                None => {
                    if existing.metadata.deletion_timestamp.is_none() {
                        self.call("delete namespace", self.namespaces.delete(&ns_key))
                            .await?;
                        info!(resource.name = %name, "namespace deletion requested");
                    } else {
                        debug!(resource.name = %name, "namespace still terminating");
                    }
                    let condition = Condition::new(
                        format!("waiting for namespace '{name}' to be removed"),
                        "The team is released once its namespace is gone",
                    );
                    self.write_status(
                        team,
                        ObjectStatus::deleting(team.meta().generation, condition),
                    )
                    .await?;
                    return Ok(Outcome::done());
                }
                Some(owner) => {
                    debug!(resource.name = %name, owner, "namespace belongs to another team, leaving it");
                }
            }
        }

        match self
            .call("remove finalizer", self.guard.remove(&*self.teams, team))
            .await
        {
            Ok(_) => {
                info!(resource.name = %name, finalizer = self.guard.name(), "finalizer removed");
                Ok(Outcome::done())
            }
            Err(source) => {
                warn!(resource.name = %name, error = %source, "failed to remove finalizer");
                let condition = Condition::new(
                    "namespace removed but the team could not be released",
                    source.to_string(),
                )
                .with_type("FinalizerRemoval");
                if let Err(e) = self.record_failure(key, condition).await {
                    warn!(resource.name = %name, error = %e, "failed to record finalizer removal failure");
                }
                Err(ReconcileError::Cleanup {
                    key: key.clone(),
                    source,
                })
            }
        }
    }

    /// The server refused a write outright. Retrying the same request cannot
    /// help, so the refusal is reported on the team and the pass ends terminal.
    async fn surface_rejection(
        &self,
        key: &ObjectKey,
        refused: &ObjectKey,
        message: String,
    ) -> Result<Outcome, ReconcileError> {
        warn!(resource.name = %key.name, refused = %refused, reason = %message, "store rejected request");
        let condition = Condition::new(
            format!("request for {refused} was rejected: {message}"),
            "Resolve the admission policy, quota or schema problem named above, then edit the team to retry",
        )
        .with_type("RequestRejected");
        if let Err(e) = self.record_failure(key, condition).await {
            warn!(resource.name = %key.name, error = %e, "failed to record rejection");
        }
        Err(ReconcileError::InvalidSpec {
            key: key.clone(),
            reason: message,
        })
    }

    /// Write a `Failure` status on the latest version of the team
    async fn record_failure(&self, key: &ObjectKey, condition: Condition) -> Result<(), StoreError> {
        let Some(latest) = self.call("get team", self.teams.get(key)).await? else {
            return Ok(());
        };
        self.write_status(
            &latest,
            ObjectStatus::failure(latest.meta().generation, condition),
        )
        .await
    }
}

#[async_trait]
impl<T, N> Reconciler for TeamReconciler<T, N>
where
    T: TeamStore + ?Sized + 'static,
    N: NamespaceStore + ?Sized + 'static,
{
    fn name(&self) -> &str {
        self.guard.name()
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<Outcome, ReconcileError> {
        let Some(team) = self.call("get team", self.teams.get(key)).await? else {
            debug!(resource.name = %key.name, "team not found, nothing to do");
            return Ok(Outcome::done());
        };

        let result = if self.guard.is_deletion_candidate(&team) {
            self.cleanup(key, &team).await
        } else if team.meta().deletion_timestamp.is_some() {
            debug!(resource.name = %key.name, "team is being deleted without our finalizer");
            return Ok(Outcome::done());
        } else {
            self.upsert(key, &team).await
        };

        match result {
            Err(ReconcileError::Store(StoreError::Invalid { key: refused, message })) => {
                self.surface_rejection(key, &refused, message).await
            }
            other => other,
        }
    }
}

/// Builds the Team dispatcher on top of the shared store backend
#[derive(Debug, Clone, Copy, Default)]
pub struct TeamControllerFactory;

impl ControllerFactory for TeamControllerFactory {
    fn name(&self) -> &str {
        TEAM_FINALIZER
    }

    fn build(&self, deps: &Dependencies) -> Result<Arc<dyn Controller>, ManagerError> {
        let teams = deps.backend.cluster_store::<Team>();
        let namespaces = deps.backend.cluster_store::<Namespace>();
        let reconciler = Arc::new(TeamReconciler::new(
            Arc::clone(&teams),
            namespaces,
            deps.config.clone(),
        ));
        Ok(Arc::new(Dispatcher::new(reconciler, teams, &deps.config)))
    }
}

/// Add the Team controller to `registry`
///
/// # Errors
///
/// [`ManagerError::DuplicateController`] if it is already registered.
pub fn register(registry: &mut ControllerRegistry) -> Result<(), ManagerError> {
    registry.register(Arc::new(TeamControllerFactory))
}
