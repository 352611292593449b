//! Registry of controller classes.
//!
//! Maps a controller class name (the `class` key of a `[[controllers]]`
//! entry) to the factory that builds it. Constructed at startup and passed to
//! `Pool::from_config`; no global state.

use crate::error::EngineError;
use pool_common::config::ControllerConfig;
use pool_common::controller::{Controller, ControllerFactory};
use std::collections::HashMap;

/// Controller classes known to the pool, by name.
pub struct DriverRegistry {
    factories: HashMap<&'static str, ControllerFactory>,
}

impl DriverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a controller class.
    ///
    /// # Panics
    /// Panics if a class with the same name is already registered.
    pub fn register(&mut self, class: &'static str, factory: ControllerFactory) {
        if self.factories.contains_key(class) {
            panic!("Controller class '{class}' is already registered");
        }
        self.factories.insert(class, factory);
    }

    /// Factory of `class`, if registered.
    pub fn get_factory(&self, class: &str) -> Option<ControllerFactory> {
        self.factories.get(class).copied()
    }

    /// Build the controller described by `config`.
    ///
    /// # Errors
    /// `EngineError::DriverNotFound` for an unknown class,
    /// `EngineError::Driver` if the factory rejects the configuration.
    pub fn create_controller(
        &self,
        config: &ControllerConfig,
    ) -> Result<Box<dyn Controller>, EngineError> {
        let factory = self
            .get_factory(&config.class)
            .ok_or_else(|| EngineError::DriverNotFound(config.class.clone()))?;
        factory(config).map_err(|source| EngineError::Driver {
            class: config.class.clone(),
            source,
        })
    }

    /// Registered class names, sorted.
    pub fn list_classes(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
