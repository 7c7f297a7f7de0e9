//! Core driver abstraction trait.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::types::*;

/// Core driver abstraction trait.
///
/// One implementation exists per hypervisor technology. The engine only ever
/// talks to hypervisors through this capability set and only ever sees the
/// normalized [`DriverError`](crate::DriverError) variants.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Instance name (the `use_hypervisor` value this driver serves).
    fn name(&self) -> &str;

    /// Technology behind this driver.
    fn kind(&self) -> DriverKind;

    // =========================================================================
    // VM Lifecycle
    // =========================================================================

    /// Create a new VM (does not start it).
    ///
    /// Returns the hypervisor-assigned id and the observed state.
    async fn create(&self, spec: &VmSpec) -> Result<VmStatus>;

    /// Power on a VM.
    async fn start(&self, vm_id: &str) -> Result<PowerState>;

    /// Shut a VM down, waiting up to `timeout` for a graceful stop.
    async fn stop(&self, vm_id: &str, timeout: Duration) -> Result<PowerState>;

    /// Suspend (pause) a running VM.
    async fn suspend(&self, vm_id: &str) -> Result<PowerState>;

    /// Resume a suspended VM.
    async fn resume(&self, vm_id: &str) -> Result<PowerState>;

    /// Destroy a VM and release its hypervisor resources.
    ///
    /// `disks` decides whether virtual disks go with it.
    async fn destroy(&self, vm_id: &str, disks: DiskPolicy) -> Result<()>;

    /// Apply execution-parameter changes to an existing VM.
    async fn reconfigure(&self, vm_id: &str, delta: &ReconfigureDelta) -> Result<PowerState>;

    // =========================================================================
    // VM Status
    // =========================================================================

    /// Get the current status of a VM.
    ///
    /// Fails with `ResourceMissing` if the VM no longer exists.
    async fn query_status(&self, vm_id: &str) -> Result<VmStatus>;
}
