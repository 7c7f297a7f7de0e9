//! # Univor Common
//!
//! Shared utilities for the Univor components.
//!
//! ## Logging
//!
//! ```rust,no_run
//! use univor_common::init_logging;
//!
//! // Initialize with level; RUST_LOG overrides it when set
//! init_logging("info").unwrap();
//! tracing::info!(target_path = "/courseA/student1", "Descriptor deployed");
//! ```

pub mod logging;

pub use logging::{
    init_logging,
    init_logging_file,
    init_logging_json,
    LOG_FILE_PREFIX,
};
