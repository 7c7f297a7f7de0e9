//! Cascading access control.
//!
//! Every folder and descriptor carries an optional [`AccessControl`] layer.
//! Layers merge root to leaf like definitions: a field set on a deeper layer
//! replaces the inherited one, unset fields inherit.

use serde::{Deserialize, Serialize};

use crate::operation::Operation;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    /// Principals allowed every operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managers: Option<Vec<String>>,

    /// Principals allowed the operations in `user_operations`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_operations: Option<Vec<Operation>>,
}

impl AccessControl {
    pub fn is_empty(&self) -> bool {
        self.managers.is_none() && self.users.is_none() && self.user_operations.is_none()
    }

    pub fn with_managers<I, S>(mut self, managers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.managers = Some(managers.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_users<I, S>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.users = Some(users.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_user_operations(mut self, ops: impl IntoIterator<Item = Operation>) -> Self {
        self.user_operations = Some(ops.into_iter().collect());
        self
    }

    /// Overlay `layer` on top of `self`.
    pub fn merge_from(&mut self, layer: &AccessControl) {
        if layer.managers.is_some() {
            self.managers = layer.managers.clone();
        }
        if layer.users.is_some() {
            self.users = layer.users.clone();
        }
        if layer.user_operations.is_some() {
            self.user_operations = layer.user_operations.clone();
        }
    }

    /// Merge a chain of layers, root first.
    pub fn merged<'a>(layers: impl IntoIterator<Item = &'a AccessControl>) -> AccessControl {
        let mut acl = AccessControl::default();
        for layer in layers {
            acl.merge_from(layer);
        }
        acl
    }

    /// Decide on an already merged layer.
    pub fn permits(&self, principal: &str, operation: Operation) -> bool {
        let listed = |list: &Option<Vec<String>>| {
            list.as_ref().map_or(false, |l| l.iter().any(|p| p == principal))
        };

        if listed(&self.managers) {
            return true;
        }
        listed(&self.users)
            && self
                .user_operations
                .as_ref()
                .map_or(false, |ops| ops.contains(&operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_managers_users_and_strangers() {
        let acl = AccessControl::default()
            .with_managers(["instructor"])
            .with_users(["student1"])
            .with_user_operations([Operation::Start, Operation::Stop]);

        assert!(acl.permits("instructor", Operation::Undeploy));
        assert!(acl.permits("student1", Operation::Start));
        assert!(!acl.permits("student1", Operation::Undeploy));
        assert!(!acl.permits("student2", Operation::Show));
    }

    #[test]
    fn test_deeper_layer_overrides() {
        let root = AccessControl::default()
            .with_managers(["admin"])
            .with_user_operations([Operation::Show]);
        let course = AccessControl::default().with_users(["student1"]);
        let vm = AccessControl::default().with_user_operations([Operation::Start]);

        let acl = AccessControl::merged([&root, &course, &vm]);
        assert_eq!(acl.managers, Some(vec!["admin".to_string()]));
        assert!(acl.permits("student1", Operation::Start));
        assert!(!acl.permits("student1", Operation::Show));
    }

    #[test]
    fn test_empty_denies_everyone() {
        let acl = AccessControl::default();
        assert!(acl.is_empty());
        assert!(!acl.permits("anyone", Operation::Show));
    }
}
