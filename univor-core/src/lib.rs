//! # Univor Core
//!
//! Orchestration core for fleets of virtual machines described as a tree.
//!
//! - [`tree`]: folders, descriptors and per-folder `common` definitions
//! - [`resolver`]: cascading definition inheritance
//! - [`lifecycle`]: descriptor state machine and driver calls
//! - [`engine`]: command submission, per-descriptor FIFO serialization,
//!   results and the command log
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use univor_core::{CommandParams, Definition, DriverRegistry, Engine, EngineConfig,
//!     MemoryStorage, NodePath, Operation};
//!
//! let config = EngineConfig::default().with_mock_hypervisor("ESXi_1");
//! let drivers = DriverRegistry::from_config(&config);
//! let engine = Engine::open(Arc::new(MemoryStorage::new()), drivers, config).await?;
//!
//! let vm = NodePath::parse("/student1")?;
//! let definition = Definition::parse("use_hypervisor: ESXi_1\nuse_prototype: proto_docker")?;
//! engine.submit(Operation::Provision, &[vm.clone()], CommandParams::with_definition(definition)).await?;
//!
//! let submitted = engine.submit(Operation::Deploy, &[vm], CommandParams::default()).await?;
//! let record = engine.wait(submitted.command_id()).await?;
//! ```

pub mod access;
pub mod config;
pub mod context;
pub mod definition;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod operation;
pub mod path;
pub mod registry;
pub mod resolver;
pub mod storage;
pub mod tree;

pub use access::AccessControl;
pub use config::{EngineConfig, HypervisorConfig};
pub use context::Context;
pub use definition::{Definition, Tier};
pub use descriptor::{Descriptor, DescriptorHandle, DescriptorStatus, OperationMetadata, OperationOutcome};
pub use engine::command::{
    CommandParams, CommandRecord, CommandState, OperationResult, Submission, TargetResult, TargetState,
};
pub use engine::log::{CommandLog, CommandLogEntry, Outcome};
pub use engine::Engine;
pub use error::{ErrorInfo, ErrorKind, Result, UnivorError};
pub use operation::Operation;
pub use path::NodePath;
pub use registry::DriverRegistry;
pub use storage::{FolderRecord, MemoryStorage, Storage, TreeSnapshot};
pub use tree::{DescriptorTree, Node, NodeKind};
