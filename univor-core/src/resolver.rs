//! Cascading definition resolution.
//!
//! The computed definition of a descriptor is the deep merge of every
//! ancestor folder's common definition, root first, with the descriptor's
//! local definition on top. Nothing here is cached: callers pass a snapshot
//! of the ancestor chain taken under the tree read lock.

use crate::definition::{merge_layers, Definition};
use crate::error::Result;

/// Merge of the ancestor layers only.
pub fn inherited(ancestors: &[Definition]) -> Definition {
    merge_layers(ancestors)
}

/// Full computed definition. Fails if a required creation parameter is
/// missing after the merge.
pub fn compute(ancestors: &[Definition], local: &Definition) -> Result<Definition> {
    let computed = merge_partial(ancestors, local);
    computed.require_creation()?;
    Ok(computed)
}

/// Like [`compute`] but without the completeness check, for display.
pub fn merge_partial(ancestors: &[Definition], local: &Definition) -> Definition {
    let mut computed = inherited(ancestors);
    computed.merge_from(local);
    computed
}

/// Top-level keys where `computed` differs from `deployed`.
pub fn drift(computed: &Definition, deployed: &Definition) -> Vec<String> {
    computed.drift(deployed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UnivorError;
    use serde_json::json;

    fn def(value: serde_json::Value) -> Definition {
        Definition::from_value(value).unwrap()
    }

    #[test]
    fn test_leaf_overrides_ancestors() {
        let root = def(json!({"use_hypervisor": "ESXi_1", "memory": 1024}));
        let course = def(json!({"use_prototype": "proto_docker", "memory": 2048}));
        let local = def(json!({"memory": 4096}));

        let computed = compute(&[root, course], &local).unwrap();
        assert_eq!(computed.use_hypervisor(), Some("ESXi_1"));
        assert_eq!(computed.use_prototype(), Some("proto_docker"));
        assert_eq!(computed.memory(), Some(4096));
    }

    #[test]
    fn test_missing_creation_parameter() {
        let root = def(json!({"use_hypervisor": "ESXi_1"}));
        let err = compute(&[root.clone()], &Definition::new()).unwrap_err();
        assert!(matches!(err, UnivorError::Validation(_)));

        let partial = merge_partial(&[root], &Definition::new());
        assert_eq!(partial.use_hypervisor(), Some("ESXi_1"));
    }

    #[test]
    fn test_inherited_and_drift() {
        let root = def(json!({"use_hypervisor": "ESXi_1", "use_prototype": "p", "cpu": 2}));
        let local = def(json!({"cpu": 4}));

        let parent_view = inherited(std::slice::from_ref(&root));
        assert_eq!(parent_view.cpu(), Some(2));

        let computed = compute(&[root.clone()], &local).unwrap();
        assert_eq!(drift(&computed, &root), vec!["cpu".to_string()]);
    }
}
