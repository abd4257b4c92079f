//! # Object Status
//!
//! Status types shared by every managed kind. The owning reconciler is the only writer.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall convergence state shown to users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
pub enum ReconcileStatus {
    /// Not yet reconciled
    #[default]
    Pending,
    /// Desired state has been applied
    Success,
    /// Reconciliation failed; see conditions for the corrective action
    Failure,
    /// Dependent resources are being torn down
    Deleting,
}

impl ReconcileStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileStatus::Pending => "Pending",
            ReconcileStatus::Success => "Success",
            ReconcileStatus::Failure => "Failure",
            ReconcileStatus::Deleting => "Deleting",
        }
    }
}

impl fmt::Display for ReconcileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a resource is or isn't converged
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Optional machine-readable category
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    /// Human-readable summary
    pub message: String,
    /// Underlying error or additional context
    #[serde(default)]
    pub detail: String,
}

impl Condition {
    pub fn new(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            r#type: None,
            message: message.into(),
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn with_type(mut self, condition_type: impl Into<String>) -> Self {
        self.r#type = Some(condition_type.into());
        self
    }
}

/// Observed state of a managed resource
///
/// Conditions are rewritten in full on every pass, never appended to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStatus {
    #[serde(default)]
    pub status: ReconcileStatus,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Generation of the spec this status describes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl ObjectStatus {
    #[must_use]
    pub fn success(observed_generation: Option<i64>) -> Self {
        Self {
            status: ReconcileStatus::Success,
            conditions: Vec::new(),
            observed_generation,
        }
    }

    #[must_use]
    pub fn failure(observed_generation: Option<i64>, condition: Condition) -> Self {
        Self {
            status: ReconcileStatus::Failure,
            conditions: vec![condition],
            observed_generation,
        }
    }

    #[must_use]
    pub fn deleting(observed_generation: Option<i64>, condition: Condition) -> Self {
        Self {
            status: ReconcileStatus::Deleting,
            conditions: vec![condition],
            observed_generation,
        }
    }
}
