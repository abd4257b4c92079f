//! # Controller Registry
//!
//! Append-only table of controller factories, built once at startup and handed
//! to the process supervisor. Tests build their own registry with only the
//! controllers they need.

use super::clock::Clock;
use super::error::ManagerError;
use super::manager::Controller;
use crate::config::ControllerConfig;
use crate::store::StoreBackend;
use std::fmt;
use std::sync::Arc;

/// Everything a factory may use to build its controller
#[derive(Debug, Clone)]
pub struct Dependencies {
    pub backend: StoreBackend,
    pub config: ControllerConfig,
    pub clock: Arc<dyn Clock>,
}

pub trait ControllerFactory: Send + Sync {
    /// Unique controller name; doubles as the finalizer marker
    fn name(&self) -> &str;

    /// Build the controller
    ///
    /// # Errors
    ///
    /// [`ManagerError::Build`] when the controller cannot be wired up.
    fn build(&self, deps: &Dependencies) -> Result<Arc<dyn Controller>, ManagerError>;
}

#[derive(Default)]
pub struct ControllerRegistry {
    factories: Vec<Arc<dyn ControllerFactory>>,
}

impl fmt::Debug for ControllerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerRegistry")
            .field("controllers", &self.names())
            .finish()
    }
}

impl ControllerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factory. There is no way to remove one.
    ///
    /// # Errors
    ///
    /// [`ManagerError::DuplicateController`] if the name is taken, since two
    /// controllers sharing a finalizer marker would release each other's objects.
    pub fn register(&mut self, factory: Arc<dyn ControllerFactory>) -> Result<(), ManagerError> {
        if self.factories.iter().any(|f| f.name() == factory.name()) {
            return Err(ManagerError::DuplicateController(factory.name().to_string()));
        }
        self.factories.push(factory);
        Ok(())
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.factories.iter().map(|f| f.name()).collect()
    }

    pub fn factories(&self) -> impl Iterator<Item = &Arc<dyn ControllerFactory>> {
        self.factories.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
