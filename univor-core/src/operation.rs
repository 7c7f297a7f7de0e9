//! Operations that can be submitted against descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::UnivorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Return the descriptor with its computed definition.
    Show,
    /// Patch the local definition.
    Edit,
    /// Create a descriptor in a folder.
    Provision,
    /// Remove a descriptor that has no live resource.
    Deprovision,
    Deploy,
    Undeploy,
    Start,
    Stop,
    Pause,
    Resume,
    /// Push execution-parameter changes to the live VM.
    Reconfigure,
    /// Reconcile with the hypervisor.
    Refresh,
    /// Leave the Failed state.
    Recover,
}

impl Operation {
    pub const ALL: [Operation; 13] = [
        Operation::Show,
        Operation::Edit,
        Operation::Provision,
        Operation::Deprovision,
        Operation::Deploy,
        Operation::Undeploy,
        Operation::Start,
        Operation::Stop,
        Operation::Pause,
        Operation::Resume,
        Operation::Reconfigure,
        Operation::Refresh,
        Operation::Recover,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Show => "show",
            Operation::Edit => "edit",
            Operation::Provision => "provision",
            Operation::Deprovision => "deprovision",
            Operation::Deploy => "deploy",
            Operation::Undeploy => "undeploy",
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Pause => "pause",
            Operation::Resume => "resume",
            Operation::Reconfigure => "reconfigure",
            Operation::Refresh => "refresh",
            Operation::Recover => "recover",
        }
    }

    /// Async operations talk to a driver and go through the descriptor queue.
    pub fn is_async(&self) -> bool {
        !matches!(
            self,
            Operation::Show | Operation::Edit | Operation::Provision | Operation::Deprovision
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = UnivorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == wanted)
            .ok_or_else(|| UnivorError::Validation(format!("Unknown operation: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("deploy".parse::<Operation>().unwrap(), Operation::Deploy);
        assert_eq!(" Start ".parse::<Operation>().unwrap(), Operation::Start);
        assert!("reboot".parse::<Operation>().is_err());

        for op in Operation::ALL {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
        }
    }

    #[test]
    fn test_sync_split() {
        assert!(!Operation::Show.is_async());
        assert!(!Operation::Deprovision.is_async());
        assert!(Operation::Deploy.is_async());
        assert!(Operation::Recover.is_async());
    }
}
