//! # Univor Driver
//!
//! Hypervisor driver contract consumed by the orchestration engine.
//!
//! Every hypervisor technology gets one [`Driver`] implementation. The engine
//! hands drivers a [`VmSpec`] (built from a descriptor's computed definition)
//! or a [`ReconfigureDelta`], and gets back either an observed state or one of
//! the normalized [`DriverError`] variants.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              Driver Trait               │
//! │ (create, start, stop, suspend, resume,  │
//! │  destroy, reconfigure, query_status)    │
//! └─────────────────────┬───────────────────┘
//!                       │
//!         ┌─────────────┴─────────────┐
//!         ▼                           ▼
//! ┌───────────────────┐     ┌───────────────────┐
//! │    MockDriver     │     │  future drivers   │
//! │   (in-memory)     │     │ (one per DriverKind)
//! └───────────────────┘     └───────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use univor_driver::{Driver, MockDriver, VmSpec};
//!
//! #[tokio::main]
//! async fn main() {
//!     let driver = MockDriver::new("ESXi_1");
//!     let spec = VmSpec::new("courseA_student1", "proto_docker").with_memory(4096);
//!
//!     let status = driver.create(&spec).await.unwrap();
//!     driver.start(&status.vm_id).await.unwrap();
//! }
//! ```

pub mod error;
pub mod mock;
pub mod traits;
pub mod types;

pub use error::DriverError;
pub use mock::{MockCall, MockDriver, MockVmInfo};
pub use traits::Driver;
pub use types::*;
