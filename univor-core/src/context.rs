//! Explicit context handed to every engine component.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::registry::DriverRegistry;
use crate::storage::Storage;
use crate::tree::DescriptorTree;

/// Tree, storage, drivers and configuration, shared by the engine and its
/// runners.
#[derive(Clone)]
pub struct Context {
    pub tree: Arc<DescriptorTree>,
    pub storage: Arc<dyn Storage>,
    pub drivers: DriverRegistry,
    pub config: Arc<EngineConfig>,
}

impl Context {
    pub fn new(
        tree: DescriptorTree,
        storage: Arc<dyn Storage>,
        drivers: DriverRegistry,
        config: EngineConfig,
    ) -> Self {
        Self {
            tree: Arc::new(tree),
            storage,
            drivers,
            config: Arc::new(config),
        }
    }
}
