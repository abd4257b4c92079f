//! # Status Management
//!
//! Writes Team status through the status subresource.
//!
//! The write is skipped when nothing changed, so replays stay free of store
//! writes and do not emit extra watch events.

use crate::crd::{ObjectStatus, Team};
use crate::store::{StoreError, WriteStatus};
use kube::ResourceExt;
use tracing::debug;

/// Persist `desired` as the status of `team`. Returns whether a write happened.
///
/// A team that disappeared in the meantime is not an error.
///
/// # Errors
///
/// Returns the store error, a conflict included, for the caller to retry.
pub async fn apply_status<S>(store: &S, team: &Team, desired: ObjectStatus) -> Result<bool, StoreError>
where
    S: WriteStatus<Team> + ?Sized,
{
    if team.status.as_ref() == Some(&desired) {
        debug!(
            resource.name = %team.name_any(),
            status = %desired.status,
            "Skipping status update - status unchanged"
        );
        return Ok(false);
    }

    let mut next = team.clone();
    next.status = Some(desired);
    match store.update_status(&next).await {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found() => {
            debug!(resource.name = %team.name_any(), "team deleted before status update");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
