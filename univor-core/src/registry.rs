//! Hypervisor instance name to driver mapping.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use univor_driver::{Driver, DriverKind, MockDriver};

use crate::config::{EngineConfig, HypervisorConfig};
use crate::error::{Result, UnivorError};

/// One driver instance per configured hypervisor, reused across commands.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, Arc<dyn Driver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate a driver for every configured hypervisor.
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut registry = Self::new();
        for (name, hypervisor) in &config.hypervisors {
            registry.drivers.insert(name.clone(), build_driver(name, hypervisor));
        }
        registry
    }

    /// Register (or replace) a driver under its own name.
    pub fn with_driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.insert(driver);
        self
    }

    pub fn insert(&mut self, driver: Arc<dyn Driver>) {
        info!(hypervisor = %driver.name(), kind = %driver.kind(), "Registering driver");
        self.drivers.insert(driver.name().to_string(), driver);
    }

    /// Driver for the hypervisor named by `use_hypervisor`.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Driver>> {
        self.drivers.get(name).cloned().ok_or_else(|| {
            UnivorError::Validation(format!("Unknown hypervisor: {}", name))
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.drivers.keys().cloned().collect()
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}

fn build_driver(name: &str, config: &HypervisorConfig) -> Arc<dyn Driver> {
    match config.kind {
        DriverKind::Mock => Arc::new(MockDriver::new(name)),
    }
}
