//! Descriptors: the user-facing handle for one virtual machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::access::AccessControl;
use crate::definition::{Definition, Tier};
use crate::error::{poisoned, ErrorInfo, Result, UnivorError};
use crate::operation::Operation;
use crate::path::NodePath;

/// Lifecycle state of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorStatus {
    /// Defined but no VM exists.
    Provisioned,
    /// VM exists and has never been started since deploy.
    Created,
    Starting,
    Running,
    Paused,
    Stopping,
    Stopped,
    /// The hypervisor holding the VM cannot be reached.
    Unreachable,
    /// An unrecoverable error occurred; only `recover` leaves this state.
    Failed,
}

impl DescriptorStatus {
    /// True for states where a VM is believed to exist.
    pub fn has_vm(&self) -> bool {
        !matches!(self, DescriptorStatus::Provisioned)
    }

    /// Tiers of the definition that may be edited in this state.
    pub fn editable(&self, tier: Tier) -> bool {
        match tier {
            Tier::Creation => *self == DescriptorStatus::Provisioned,
            Tier::Execution => matches!(
                self,
                DescriptorStatus::Provisioned | DescriptorStatus::Created | DescriptorStatus::Stopped
            ),
        }
    }
}

impl fmt::Display for DescriptorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DescriptorStatus::Provisioned => "provisioned",
            DescriptorStatus::Created => "created",
            DescriptorStatus::Starting => "starting",
            DescriptorStatus::Running => "running",
            DescriptorStatus::Paused => "paused",
            DescriptorStatus::Stopping => "stopping",
            DescriptorStatus::Stopped => "stopped",
            DescriptorStatus::Unreachable => "unreachable",
            DescriptorStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// How the last command against a descriptor ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationOutcome {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationMetadata {
    pub command_id: u64,
    pub operation: Operation,
    pub outcome: OperationOutcome,
    pub at: DateTime<Utc>,
}

/// Persistent state of a descriptor.
///
/// The computed definition is never stored here; it is derived from the
/// ancestor chain on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub full_name: NodePath,
    pub status: DescriptorStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) vm_id: Option<String>,
    #[serde(default)]
    pub local_definition: Definition,
    /// Computed definition captured at deploy time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_config: Option<Definition>,
    /// Hypervisor instance holding the VM.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypervisor: Option<String>,
    /// Stable state held before the connection was lost.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unreachable_from: Option<DescriptorStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<OperationMetadata>,
    #[serde(default, skip_serializing_if = "AccessControl::is_empty")]
    pub access: AccessControl,
}

impl Descriptor {
    /// A freshly provisioned descriptor.
    pub fn new(full_name: NodePath, local_definition: Definition) -> Self {
        Self {
            full_name,
            status: DescriptorStatus::Provisioned,
            vm_id: None,
            local_definition,
            deployed_config: None,
            hypervisor: None,
            unreachable_from: None,
            last_error: None,
            last_operation: None,
            access: AccessControl::default(),
        }
    }

    /// Hypervisor-side VM id. Fails while no VM exists.
    pub fn vm_id(&self) -> Result<&str> {
        self.vm_id.as_deref().ok_or_else(|| {
            UnivorError::State(format!("{} has no VM (status {})", self.full_name, self.status))
        })
    }

    pub fn has_vm_id(&self) -> bool {
        self.vm_id.is_some()
    }

    /// Hypervisor-side default name when `vm_name` is not set.
    pub fn default_vm_name(&self) -> String {
        self.full_name.flat_name()
    }

    /// Patch the local definition, enforcing the tier edit policy.
    ///
    /// Keys mapped to `null` in `patch` are removed.
    pub fn apply_edit(&mut self, patch: &Definition) -> Result<()> {
        patch.validate()?;
        for tier in patch.tiers()? {
            if !self.status.editable(tier) {
                return Err(UnivorError::State(format!(
                    "Cannot edit {} parameters of {} while {}",
                    match tier {
                        Tier::Creation => "creation",
                        Tier::Execution => "execution",
                    },
                    self.full_name,
                    self.status
                )));
            }
        }

        let mut updated = self.local_definition.clone();
        updated.merge_from(patch);
        updated.validate()?;
        self.local_definition = updated;
        Ok(())
    }

    pub(crate) fn record_deployment(&mut self, vm_id: String, hypervisor: String, config: Definition) {
        self.vm_id = Some(vm_id);
        self.hypervisor = Some(hypervisor);
        self.deployed_config = Some(config);
    }

    /// Forget the live resource; the descriptor becomes Provisioned.
    pub(crate) fn clear_deployment(&mut self) {
        self.vm_id = None;
        self.hypervisor = None;
        self.deployed_config = None;
        self.unreachable_from = None;
        self.status = DescriptorStatus::Provisioned;
    }
}

/// Stable identity of a descriptor inside the tree, unaffected by moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorId(pub(crate) u64);

impl fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.0)
    }
}

/// Shared, lockable descriptor.
///
/// The mutex guards in-memory reads and writes only and is never held
/// across an await point.
#[derive(Debug)]
pub struct DescriptorHandle {
    id: DescriptorId,
    state: Mutex<Descriptor>,
}

impl DescriptorHandle {
    pub fn new(id: DescriptorId, descriptor: Descriptor) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: Mutex::new(descriptor),
        })
    }

    pub fn id(&self) -> DescriptorId {
        self.id
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> Result<Descriptor> {
        Ok(self.state.lock().map_err(poisoned)?.clone())
    }

    pub fn status(&self) -> Result<DescriptorStatus> {
        Ok(self.state.lock().map_err(poisoned)?.status)
    }

    pub fn full_name(&self) -> Result<NodePath> {
        Ok(self.state.lock().map_err(poisoned)?.full_name.clone())
    }

    /// Mutate under the lock and return the closure's result.
    pub fn update<R>(&self, f: impl FnOnce(&mut Descriptor) -> R) -> Result<R> {
        let mut state = self.state.lock().map_err(poisoned)?;
        Ok(f(&mut state))
    }
}
