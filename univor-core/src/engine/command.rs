//! Commands, their per-target outcomes and the submission reply.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::definition::Definition;
use crate::descriptor::DescriptorStatus;
use crate::error::ErrorInfo;
use crate::operation::Operation;
use crate::path::NodePath;

/// Operation-specific parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandParams {
    /// Definition for `provision`, or the merge patch for `edit`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<Definition>,

    /// Disk handling for `undeploy`; falls back to the configured policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_disks: Option<bool>,

    /// Graceful shutdown timeout for `stop`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_timeout_secs: Option<u64>,
}

impl CommandParams {
    pub fn with_definition(definition: Definition) -> Self {
        Self {
            definition: Some(definition),
            ..Default::default()
        }
    }

    pub fn with_release_disks(release: bool) -> Self {
        Self {
            release_disks: Some(release),
            ..Default::default()
        }
    }
}

/// What a successful operation left behind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    /// Descriptor status afterwards; `None` once deprovisioned
    pub status: Option<DescriptorStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Computed definition, returned by `show`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<Definition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "outcome", rename_all = "lowercase")]
pub enum TargetState {
    Pending,
    Running,
    Succeeded(OperationResult),
    Failed(ErrorInfo),
    /// Cancelled before it started.
    Withdrawn,
}

impl TargetState {
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            TargetState::Succeeded(_) | TargetState::Failed(_) | TargetState::Withdrawn
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetResult {
    pub path: NodePath,
    pub state: TargetState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl std::fmt::Display for CommandState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandState::Pending => write!(f, "pending"),
            CommandState::Running => write!(f, "running"),
            CommandState::Succeeded => write!(f, "succeeded"),
            CommandState::Failed => write!(f, "failed"),
            CommandState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A submitted command as seen through `poll`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub id: u64,
    pub operation: Operation,
    pub targets: Vec<TargetResult>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub state: CommandState,
}

impl CommandRecord {
    pub fn new(id: u64, operation: Operation, targets: Vec<TargetResult>) -> Self {
        let mut record = Self {
            id,
            operation,
            targets,
            submitted_at: Utc::now(),
            finished_at: None,
            state: CommandState::Pending,
        };
        record.refresh_state();
        record
    }

    pub fn is_final(&self) -> bool {
        matches!(
            self.state,
            CommandState::Succeeded | CommandState::Failed | CommandState::Cancelled
        )
    }

    /// Aggregate the per-target states into the command state.
    ///
    /// All withdrawn: Cancelled. Otherwise any failure: Failed. Otherwise
    /// Succeeded. Until every target is final: Running once any target has
    /// moved, else Pending.
    pub fn refresh_state(&mut self) {
        let all_final = self.targets.iter().all(|t| t.state.is_final());
        self.state = if all_final {
            if !self.targets.is_empty()
                && self.targets.iter().all(|t| t.state == TargetState::Withdrawn)
            {
                CommandState::Cancelled
            } else if self.targets.iter().any(|t| matches!(t.state, TargetState::Failed(_))) {
                CommandState::Failed
            } else {
                CommandState::Succeeded
            }
        } else if self.targets.iter().any(|t| t.state != TargetState::Pending) {
            CommandState::Running
        } else {
            CommandState::Pending
        };

        if all_final && self.finished_at.is_none() {
            self.finished_at = Some(Utc::now());
        }
    }

    /// Outcome for one target path, if it is part of this command.
    pub fn target(&self, path: &NodePath) -> Option<&TargetState> {
        self.targets.iter().find(|t| &t.path == path).map(|t| &t.state)
    }
}

/// Reply to `submit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Submission {
    /// Queued; follow up with `poll` or `wait`.
    Pending { command_id: u64 },
    /// Ran synchronously.
    Completed {
        command_id: u64,
        outcomes: Vec<TargetResult>,
    },
}

impl Submission {
    pub fn command_id(&self) -> u64 {
        match self {
            Submission::Pending { command_id } | Submission::Completed { command_id, .. } => *command_id,
        }
    }
}
