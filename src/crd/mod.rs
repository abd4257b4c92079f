//! # Custom Resource Definitions
//!
//! CRD types for the tenancy control plane.
//!
//! Every managed kind carries the shared [`ObjectStatus`] so the control loop can
//! report convergence the same way for all of them.

mod status;

pub use status::{Condition, ObjectStatus, ReconcileStatus};

use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Team Custom Resource Definition
///
/// A team is a tenant of the control plane. Each team owns a namespace of the
/// same name, created when the team is reconciled and removed before the team
/// itself is allowed to disappear.
///
/// # Example
///
/// ```yaml
/// apiVersion: tenancy.io/v1
/// kind: Team
/// metadata:
///   name: payments
/// spec:
///   summary: Payments platform team
///   description: Owns the checkout and billing services
/// ```
#[derive(CustomResource, Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Team",
    group = "tenancy.io",
    version = "v1",
    status = "ObjectStatus",
    shortname = "tm",
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TeamSpec {
    /// One-line summary of the team
    pub summary: String,
    /// Longer description of the team
    #[serde(default)]
    pub description: String,
}
