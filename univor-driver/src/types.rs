//! Type definitions exchanged between the engine and drivers.

use serde::{Deserialize, Serialize};

// =============================================================================
// VM SPEC
// =============================================================================

/// Everything a driver needs to build a VM, extracted from a computed
/// definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmSpec {
    /// Hypervisor-side VM name
    pub name: String,
    /// Image or template the VM is cloned from
    pub prototype: String,
    /// Disk placement
    pub placement: Placement,
    /// Number of vCPUs
    pub cpu: u32,
    /// Memory size in MiB
    pub memory_mib: u64,
    /// Network interfaces
    pub nics: Vec<NicSpec>,
    /// Attached media (ISO paths)
    pub media: Vec<String>,
}

impl VmSpec {
    /// Create a spec with default sizing.
    pub fn new(name: impl Into<String>, prototype: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prototype: prototype.into(),
            placement: Placement::default(),
            cpu: 1,
            memory_mib: 1024,
            nics: Vec::new(),
            media: Vec::new(),
        }
    }

    /// Set the number of vCPUs.
    pub fn with_cpu(mut self, cpu: u32) -> Self {
        self.cpu = cpu;
        self
    }

    /// Set the memory size in MiB.
    pub fn with_memory(mut self, memory_mib: u64) -> Self {
        self.memory_mib = memory_mib;
        self
    }

    /// Add a network interface.
    pub fn with_nic(mut self, nic: NicSpec) -> Self {
        self.nics.push(nic);
        self
    }
}

/// Where the VM's disks live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub datastore: Option<String>,
    pub resource_pool: Option<String>,
}

/// Network interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicSpec {
    /// Network (port group, bridge) the NIC connects to
    pub network: String,
    /// Fixed MAC address; the hypervisor assigns one when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
}

/// Changes to apply to an existing VM. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconfigureDelta {
    pub cpu: Option<u32>,
    pub memory_mib: Option<u64>,
    pub nics: Option<Vec<NicSpec>>,
    pub media: Option<Vec<String>>,
}

impl ReconfigureDelta {
    /// True when the delta changes nothing.
    pub fn is_empty(&self) -> bool {
        self.cpu.is_none()
            && self.memory_mib.is_none()
            && self.nics.is_none()
            && self.media.is_none()
    }
}

// =============================================================================
// VM STATUS
// =============================================================================

/// Power state observed on the hypervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    Stopped,
    Running,
    Paused,
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowerState::Stopped => write!(f, "stopped"),
            PowerState::Running => write!(f, "running"),
            PowerState::Paused => write!(f, "paused"),
        }
    }
}

/// Status of a VM as reported by a driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmStatus {
    /// Hypervisor-assigned identifier
    pub vm_id: String,
    /// Hypervisor-side name
    pub name: String,
    /// Current power state
    pub state: PowerState,
}

// =============================================================================
// POLICY & DISPATCH
// =============================================================================

/// What happens to a VM's virtual disks when it is destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskPolicy {
    /// Delete the disks together with the VM.
    Release,
    /// Keep the disks on the datastore.
    Retain,
}

/// Hypervisor technologies a driver exists for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// In-memory hypervisor for testing/development
    Mock,
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverKind::Mock => write!(f, "mock"),
        }
    }
}

/// The capability set every driver implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverOp {
    Create,
    Start,
    Stop,
    Suspend,
    Resume,
    Destroy,
    Reconfigure,
    QueryStatus,
}

impl DriverOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverOp::Create => "create",
            DriverOp::Start => "start",
            DriverOp::Stop => "stop",
            DriverOp::Suspend => "suspend",
            DriverOp::Resume => "resume",
            DriverOp::Destroy => "destroy",
            DriverOp::Reconfigure => "reconfigure",
            DriverOp::QueryStatus => "query_status",
        }
    }
}

impl std::fmt::Display for DriverOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
