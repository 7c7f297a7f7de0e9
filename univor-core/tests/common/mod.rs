//! Shared harness for the engine integration tests.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::sync::Arc;
use univor_core::{
    CommandParams, CommandRecord, Definition, DriverRegistry, Engine, EngineConfig, MemoryStorage,
    NodePath, Operation, TargetState,
};
use univor_driver::{DiskPolicy, MockDriver};

pub const HYPERVISOR: &str = "ESXi_1";

pub struct Harness {
    pub engine: Engine,
    pub mock: Arc<MockDriver>,
    pub storage: Arc<MemoryStorage>,
}

/// Fast retries and a release-disks undeploy policy.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        retry_backoff_ms: 1,
        undeploy_disk_policy: Some(DiskPolicy::Release),
        ..Default::default()
    }
}

pub fn path(raw: &str) -> NodePath {
    NodePath::parse(raw).expect("valid path")
}

pub fn definition(value: Value) -> Definition {
    Definition::from_value(value).expect("valid definition")
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    /// Engine over empty storage, with the root common definition pointing at
    /// the mock hypervisor.
    pub async fn with_config(config: EngineConfig) -> Self {
        // Only the first test in the process installs the subscriber.
        let _ = univor_common::init_logging("warn");

        let storage = Arc::new(MemoryStorage::new());
        let mock = Arc::new(MockDriver::new(HYPERVISOR));
        let engine = Self::open(storage.clone(), mock.clone(), config).await;

        engine
            .set_common_definition(
                &NodePath::root(),
                definition(json!({"use_hypervisor": HYPERVISOR, "use_prototype": "proto_docker"})),
            )
            .await
            .expect("root common");

        Self { engine, mock, storage }
    }

    pub async fn open(storage: Arc<MemoryStorage>, mock: Arc<MockDriver>, config: EngineConfig) -> Engine {
        let drivers = DriverRegistry::new().with_driver(mock);
        Engine::open(storage, drivers, config).await.expect("engine opens")
    }

    pub async fn provision(&self, raw: &str, local: Value) -> NodePath {
        let target = path(raw);
        self.engine
            .submit(Operation::Provision, &[target.clone()], CommandParams::with_definition(definition(local)))
            .await
            .expect("provision");
        target
    }

    /// Submit and wait for the command to finish.
    pub async fn run(&self, operation: Operation, target: &NodePath) -> CommandRecord {
        self.run_with(operation, target, CommandParams::default()).await
    }

    pub async fn run_with(&self, operation: Operation, target: &NodePath, params: CommandParams) -> CommandRecord {
        let submitted = self
            .engine
            .submit(operation, &[target.clone()], params)
            .await
            .expect("submit");
        self.engine.wait(submitted.command_id()).await.expect("wait")
    }

    pub fn vm_id(&self, target: &NodePath) -> String {
        self.engine
            .descriptor(target)
            .expect("descriptor")
            .vm_id()
            .expect("deployed")
            .to_string()
    }
}

pub fn failure(record: &CommandRecord, target: &NodePath) -> univor_core::ErrorInfo {
    match record.target(target) {
        Some(TargetState::Failed(info)) => info.clone(),
        other => panic!("expected failure for {}, got {:?}", target, other),
    }
}
