//! # Validation
//!
//! Team names become namespace names, so they must be DNS-1123 labels and
//! must not collide with a protected namespace.

use crate::config::ControllerConfig;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

const MAX_LABEL_LEN: usize = 63;

static DNS1123_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$")
        .expect("Failed to compile DNS-1123 label regex - this should never happen")
});

/// Why a team name cannot be used
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameViolation {
    Protected(String),
    TooLong(String),
    NotDns1123(String),
}

impl NameViolation {
    /// What the user has to do about it
    #[must_use]
    pub fn corrective_action(&self) -> &'static str {
        match self {
            NameViolation::Protected(_) => {
                "Recreate the team under a name that is not reserved by the platform"
            }
            NameViolation::TooLong(_) => "Recreate the team with a name of at most 63 characters",
            NameViolation::NotDns1123(_) => {
                "Recreate the team with lowercase letters, digits and '-', starting and ending with an alphanumeric character"
            }
        }
    }
}

impl fmt::Display for NameViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameViolation::Protected(name) => {
                write!(f, "team name '{name}' is protected")
            }
            NameViolation::TooLong(name) => write!(
                f,
                "team name '{name}' is {} characters, longer than {MAX_LABEL_LEN}",
                name.len()
            ),
            NameViolation::NotDns1123(name) => {
                write!(f, "team name '{name}' is not a valid DNS-1123 label")
            }
        }
    }
}

/// Check that `name` can be claimed as a namespace
///
/// # Errors
///
/// Returns the first violation found.
pub fn validate_team_name(name: &str, config: &ControllerConfig) -> Result<(), NameViolation> {
    if config.is_protected(name) {
        return Err(NameViolation::Protected(name.to_string()));
    }
    if name.len() > MAX_LABEL_LEN {
        return Err(NameViolation::TooLong(name.to_string()));
    }
    if !DNS1123_LABEL.is_match(name) {
        return Err(NameViolation::NotDns1123(name.to_string()));
    }
    Ok(())
}
