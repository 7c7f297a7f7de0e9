//! The descriptor tree: folders and descriptors addressed by path.
//!
//! Structure lives in an arena guarded by one `RwLock`. Descriptor state sits
//! behind each [`DescriptorHandle`]'s own mutex. Lock order is always tree
//! first, then descriptor.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use crate::access::AccessControl;
use crate::definition::Definition;
use crate::descriptor::{Descriptor, DescriptorHandle, DescriptorId, DescriptorStatus};
use crate::error::{poisoned, Result, UnivorError};
use crate::path::{validate_name, NodePath, COMMON};
use crate::resolver;
use crate::storage::{FolderRecord, TreeSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FolderId(u64);

const ROOT: FolderId = FolderId(0);

#[derive(Debug, Clone, Copy)]
enum Child {
    Folder(FolderId),
    Descriptor(DescriptorId),
}

#[derive(Debug)]
struct FolderNode {
    name: String,
    parent: Option<FolderId>,
    children: BTreeMap<String, Child>,
    common: Definition,
    access: AccessControl,
}

impl FolderNode {
    fn new(name: &str, parent: Option<FolderId>) -> Self {
        Self {
            name: name.to_string(),
            parent,
            children: BTreeMap::new(),
            common: Definition::new(),
            access: AccessControl::default(),
        }
    }
}

#[derive(Debug)]
struct DescriptorEntry {
    parent: FolderId,
    handle: Arc<DescriptorHandle>,
}

#[derive(Debug, Clone, Copy)]
enum Located {
    Folder(FolderId),
    Descriptor(DescriptorId),
    Common(FolderId),
}

/// Kind of a folder child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Folder,
    Descriptor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildEntry {
    pub name: String,
    pub kind: NodeKind,
}

/// Read-only view of a folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderInfo {
    pub path: NodePath,
    pub common: Definition,
    pub access: AccessControl,
    pub children: Vec<ChildEntry>,
}

impl FolderInfo {
    pub fn is_root(&self) -> bool {
        self.path.is_root()
    }

    pub fn record(&self) -> FolderRecord {
        FolderRecord {
            path: self.path.clone(),
            common: self.common.clone(),
            access: self.access.clone(),
        }
    }
}

/// Result of resolving a path.
#[derive(Debug, Clone)]
pub enum Node {
    Folder(FolderInfo),
    Descriptor(Arc<DescriptorHandle>),
    /// `<folder>/common`: the folder's own definition.
    Common(FolderInfo),
}

/// Records rewritten by a move, keyed by their previous path.
#[derive(Debug, Clone, Default)]
pub struct MoveOutcome {
    pub from: NodePath,
    pub to: NodePath,
    pub folders: Vec<(NodePath, FolderRecord)>,
    pub descriptors: Vec<(NodePath, Descriptor)>,
}

#[derive(Debug)]
struct TreeInner {
    folders: HashMap<FolderId, FolderNode>,
    descriptors: HashMap<DescriptorId, DescriptorEntry>,
    next_id: u64,
}

/// Hierarchical store of folders and descriptors.
#[derive(Debug)]
pub struct DescriptorTree {
    inner: RwLock<TreeInner>,
}

impl Default for DescriptorTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorTree {
    /// A tree holding only the root folder.
    pub fn new() -> Self {
        let mut folders = HashMap::new();
        folders.insert(ROOT, FolderNode::new("", None));
        Self {
            inner: RwLock::new(TreeInner {
                folders,
                descriptors: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Rebuild a tree from persisted records. Missing intermediate folders
    /// are created empty.
    pub fn from_snapshot(snapshot: TreeSnapshot) -> Result<Self> {
        let tree = Self::new();
        {
            let mut inner = tree.write()?;

            let mut folders = snapshot.folders;
            folders.sort_by_key(|f| f.path.depth());
            for record in folders {
                let id = inner.ensure_folder(&record.path)?;
                let folder = inner.folder_mut(id)?;
                folder.common = record.common;
                folder.access = record.access;
            }

            for descriptor in snapshot.descriptors {
                let path = descriptor.full_name.clone();
                let (parent_path, name) = split(&path)?;
                let parent = inner.ensure_folder(&parent_path)?;
                inner.insert_descriptor(parent, name, descriptor)?;
            }

            info!(
                folders = inner.folders.len(),
                descriptors = inner.descriptors.len(),
                "Descriptor tree loaded"
            );
        }
        Ok(tree)
    }

    /// Records for every folder (root included) and descriptor.
    pub fn snapshot(&self) -> Result<TreeSnapshot> {
        let inner = self.read()?;
        let mut folders = Vec::with_capacity(inner.folders.len());
        for id in inner.folders.keys() {
            folders.push(inner.folder_info(*id)?.record());
        }
        folders.sort_by(|a, b| a.path.cmp(&b.path));

        let mut descriptors = inner
            .descriptors
            .values()
            .map(|e| e.handle.snapshot())
            .collect::<Result<Vec<_>>>()?;
        descriptors.sort_by(|a, b| a.full_name.cmp(&b.full_name));

        Ok(TreeSnapshot { folders, descriptors })
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub fn resolve(&self, path: &NodePath) -> Result<Node> {
        let inner = self.read()?;
        match inner.locate(path)? {
            Located::Folder(id) => Ok(Node::Folder(inner.folder_info(id)?)),
            Located::Common(id) => Ok(Node::Common(inner.folder_info(id)?)),
            Located::Descriptor(id) => Ok(Node::Descriptor(inner.entry(id)?.handle.clone())),
        }
    }

    /// Resolve a path that must name a descriptor.
    pub fn descriptor(&self, path: &NodePath) -> Result<Arc<DescriptorHandle>> {
        match self.resolve(path)? {
            Node::Descriptor(handle) => Ok(handle),
            _ => Err(UnivorError::Validation(format!("{} is not a descriptor", path))),
        }
    }

    /// Sorted children of a folder.
    pub fn list(&self, path: &NodePath) -> Result<Vec<ChildEntry>> {
        match self.resolve(path)? {
            Node::Folder(info) => Ok(info.children),
            _ => Err(UnivorError::Validation(format!("{} is not a folder", path))),
        }
    }

    /// The descriptor at `path`, or every descriptor beneath the folder at
    /// `path`, depth first in name order.
    pub fn descriptors_under(&self, path: &NodePath) -> Result<Vec<Arc<DescriptorHandle>>> {
        let inner = self.read()?;
        match inner.locate(path)? {
            Located::Descriptor(id) => Ok(vec![inner.entry(id)?.handle.clone()]),
            Located::Folder(id) => {
                let mut folders = Vec::new();
                let mut ids = Vec::new();
                inner.collect_subtree(id, &mut folders, &mut ids)?;
                ids.into_iter()
                    .map(|id| Ok(inner.entry(id)?.handle.clone()))
                    .collect()
            }
            Located::Common(_) => Err(UnivorError::Validation(format!(
                "{} is a definition node, not a command target", path
            ))),
        }
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Common definitions of every ancestor folder, root first.
    pub fn ancestor_definitions(&self, handle: &DescriptorHandle) -> Result<Vec<Definition>> {
        let inner = self.read()?;
        inner.chain(inner.entry(handle.id())?.parent)
    }

    /// Computed definition of a descriptor, from a consistent snapshot of
    /// the ancestor chain and its local definition.
    pub fn compute(&self, handle: &DescriptorHandle) -> Result<Definition> {
        let (ancestors, local) = self.layers(handle)?;
        resolver::compute(&ancestors, &local)
    }

    /// Computed definition without the completeness check.
    pub fn compute_partial(&self, handle: &DescriptorHandle) -> Result<Definition> {
        let (ancestors, local) = self.layers(handle)?;
        Ok(resolver::merge_partial(&ancestors, &local))
    }

    fn layers(&self, handle: &DescriptorHandle) -> Result<(Vec<Definition>, Definition)> {
        let inner = self.read()?;
        let ancestors = inner.chain(inner.entry(handle.id())?.parent)?;
        let local = handle.snapshot()?.local_definition;
        Ok((ancestors, local))
    }

    /// Merged access layer in effect at `path`.
    pub fn access_for(&self, path: &NodePath) -> Result<AccessControl> {
        let inner = self.read()?;
        match inner.locate(path)? {
            Located::Folder(id) | Located::Common(id) => inner.access_chain(id),
            Located::Descriptor(id) => {
                let entry = inner.entry(id)?;
                let mut acl = inner.access_chain(entry.parent)?;
                acl.merge_from(&entry.handle.snapshot()?.access);
                Ok(acl)
            }
        }
    }

    // =========================================================================
    // Structural changes
    // =========================================================================

    pub fn create_folder(&self, parent: &NodePath, name: &str) -> Result<NodePath> {
        validate_name(name)?;
        let mut inner = self.write()?;
        let parent_id = inner.locate_folder(parent)?;
        inner.check_free(parent_id, parent, name)?;

        let id = FolderId(inner.allocate());
        inner.folders.insert(id, FolderNode::new(name, Some(parent_id)));
        inner.folder_mut(parent_id)?.children.insert(name.to_string(), Child::Folder(id));

        let path = parent.join(name)?;
        debug!(path = %path, "Folder created");
        Ok(path)
    }

    /// Provision a descriptor from `definition`.
    pub fn create_descriptor(
        &self,
        parent: &NodePath,
        name: &str,
        definition: Definition,
    ) -> Result<Arc<DescriptorHandle>> {
        validate_name(name)?;
        definition.validate()?;
        let path = parent.join(name)?;

        let mut inner = self.write()?;
        let parent_id = inner.locate_folder(parent)?;
        let handle = inner.insert_descriptor(parent_id, name, Descriptor::new(path.clone(), definition))?;

        debug!(path = %path, "Descriptor provisioned");
        Ok(handle)
    }

    /// Remove an empty folder. Its common definition goes with it.
    pub fn remove_folder(&self, path: &NodePath) -> Result<()> {
        if path.is_root() {
            return Err(UnivorError::Validation("The root folder cannot be removed".to_string()));
        }
        let mut inner = self.write()?;
        let id = inner.locate_folder(path)?;
        let folder = inner.folder(id)?;
        if !folder.children.is_empty() {
            return Err(UnivorError::NotEmpty(format!(
                "{} has {} children", path, folder.children.len()
            )));
        }

        let name = folder.name.clone();
        let parent = folder.parent;
        inner.folders.remove(&id);
        if let Some(parent) = parent {
            inner.folder_mut(parent)?.children.remove(&name);
        }
        debug!(path = %path, "Folder removed");
        Ok(())
    }

    /// Remove a Provisioned descriptor and return its final state.
    pub fn remove_descriptor(
        &self,
        path: &NodePath,
        is_busy: impl Fn(DescriptorId) -> bool,
    ) -> Result<Descriptor> {
        let mut inner = self.write()?;
        let id = match inner.locate(path)? {
            Located::Descriptor(id) => id,
            _ => return Err(UnivorError::Validation(format!("{} is not a descriptor", path))),
        };

        let entry = inner.entry(id)?;
        let descriptor = entry.handle.snapshot()?;
        if descriptor.status != DescriptorStatus::Provisioned {
            return Err(UnivorError::State(format!(
                "{} is {}; undeploy it first", path, descriptor.status
            )));
        }
        if is_busy(id) {
            return Err(UnivorError::State(format!("{} has a command in progress", path)));
        }

        let parent = entry.parent;
        inner.descriptors.remove(&id);
        if let Some(name) = path.name() {
            inner.folder_mut(parent)?.children.remove(name);
        }
        debug!(path = %path, "Descriptor removed");
        Ok(descriptor)
    }

    /// Move a folder or descriptor under `new_parent`.
    ///
    /// Every descriptor in the moved subtree must be Provisioned and idle.
    pub fn move_node(
        &self,
        path: &NodePath,
        new_parent: &NodePath,
        is_busy: impl Fn(DescriptorId) -> bool,
    ) -> Result<MoveOutcome> {
        let (old_parent_path, name) = split(path)?;
        let mut inner = self.write()?;

        let located = inner.locate(path)?;
        let dest = inner.locate_folder(new_parent)?;

        let (child, mut folder_ids, mut descriptor_ids) = match located {
            Located::Common(_) => {
                return Err(UnivorError::Validation(format!("{} cannot be moved", path)))
            }
            Located::Descriptor(id) => (Child::Descriptor(id), Vec::new(), vec![id]),
            Located::Folder(id) => {
                if new_parent.starts_with(path) {
                    return Err(UnivorError::Validation(format!(
                        "Cannot move {} into its own subtree", path
                    )));
                }
                let (mut folders, mut ids) = (Vec::new(), Vec::new());
                inner.collect_subtree(id, &mut folders, &mut ids)?;
                (Child::Folder(id), folders, ids)
            }
        };
        inner.check_free(dest, new_parent, name)?;

        for id in &descriptor_ids {
            let entry = inner.entry(*id)?;
            let descriptor = entry.handle.snapshot()?;
            if descriptor.status != DescriptorStatus::Provisioned {
                return Err(UnivorError::Conflict(format!(
                    "{} is {}; only Provisioned descriptors can be renamed",
                    descriptor.full_name, descriptor.status
                )));
            }
            if is_busy(*id) {
                return Err(UnivorError::Conflict(format!(
                    "{} has a command in progress", descriptor.full_name
                )));
            }
        }

        let old_parent = inner.locate_folder(&old_parent_path)?;
        inner.folder_mut(old_parent)?.children.remove(name);
        inner.folder_mut(dest)?.children.insert(name.to_string(), child);
        match child {
            Child::Folder(id) => inner.folder_mut(id)?.parent = Some(dest),
            Child::Descriptor(id) => {
                if let Some(entry) = inner.descriptors.get_mut(&id) {
                    entry.parent = dest;
                }
            }
        }

        let to = new_parent.join(name)?;
        let mut outcome = MoveOutcome {
            from: path.clone(),
            to: to.clone(),
            ..Default::default()
        };

        for id in descriptor_ids.drain(..) {
            let handle = inner.entry(id)?.handle.clone();
            let (old, renamed) = handle.update(|d| {
                let old = d.full_name.clone();
                if let Some(rebased) = old.rebase(path, &to) {
                    d.full_name = rebased;
                }
                (old, d.clone())
            })?;
            outcome.descriptors.push((old, renamed));
        }
        for id in folder_ids.drain(..) {
            let record = inner.folder_info(id)?.record();
            let old = record.path.rebase(&to, path).unwrap_or_else(|| record.path.clone());
            outcome.folders.push((old, record));
        }

        info!(from = %path, to = %to, descriptors = outcome.descriptors.len(), "Node moved");
        Ok(outcome)
    }

    /// Replace a folder's common definition.
    pub fn set_common(&self, folder: &NodePath, definition: Definition) -> Result<FolderRecord> {
        definition.validate()?;
        let mut inner = self.write()?;
        let id = match inner.locate(folder)? {
            Located::Folder(id) | Located::Common(id) => id,
            Located::Descriptor(_) => {
                return Err(UnivorError::Validation(format!("{} is not a folder", folder)))
            }
        };
        inner.folder_mut(id)?.common = definition;
        Ok(inner.folder_info(id)?.record())
    }

    /// Replace the access layer of a folder or descriptor.
    pub fn set_access(&self, path: &NodePath, access: AccessControl) -> Result<Node> {
        let mut inner = self.write()?;
        match inner.locate(path)? {
            Located::Folder(id) | Located::Common(id) => {
                inner.folder_mut(id)?.access = access;
                Ok(Node::Folder(inner.folder_info(id)?))
            }
            Located::Descriptor(id) => {
                let handle = inner.entry(id)?.handle.clone();
                handle.update(|d| d.access = access)?;
                Ok(Node::Descriptor(handle))
            }
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, TreeInner>> {
        self.inner.read().map_err(poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, TreeInner>> {
        self.inner.write().map_err(poisoned)
    }
}

impl TreeInner {
    fn allocate(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn folder(&self, id: FolderId) -> Result<&FolderNode> {
        self.folders
            .get(&id)
            .ok_or_else(|| UnivorError::Internal(format!("Dangling folder id {}", id.0)))
    }

    fn folder_mut(&mut self, id: FolderId) -> Result<&mut FolderNode> {
        self.folders
            .get_mut(&id)
            .ok_or_else(|| UnivorError::Internal(format!("Dangling folder id {}", id.0)))
    }

    fn entry(&self, id: DescriptorId) -> Result<&DescriptorEntry> {
        self.descriptors
            .get(&id)
            .ok_or_else(|| UnivorError::NotFound(format!("Descriptor {} no longer exists", id)))
    }

    fn locate(&self, path: &NodePath) -> Result<Located> {
        let segments = path.segments();
        let mut current = ROOT;

        for (i, segment) in segments.iter().enumerate() {
            let last = i + 1 == segments.len();
            if segment == COMMON && last {
                return Ok(Located::Common(current));
            }
            match self.folder(current)?.children.get(segment) {
                Some(Child::Folder(id)) => current = *id,
                Some(Child::Descriptor(id)) if last => return Ok(Located::Descriptor(*id)),
                _ => return Err(UnivorError::NotFound(path.to_string())),
            }
        }
        Ok(Located::Folder(current))
    }

    fn locate_folder(&self, path: &NodePath) -> Result<FolderId> {
        match self.locate(path)? {
            Located::Folder(id) => Ok(id),
            _ => Err(UnivorError::Validation(format!("{} is not a folder", path))),
        }
    }

    fn check_free(&self, parent: FolderId, parent_path: &NodePath, name: &str) -> Result<()> {
        if self.folder(parent)?.children.contains_key(name) {
            return Err(UnivorError::Conflict(format!(
                "{} already exists in {}", name, parent_path
            )));
        }
        Ok(())
    }

    fn folder_path(&self, id: FolderId) -> Result<NodePath> {
        let mut names = Vec::new();
        let mut current = id;
        while let Some(parent) = self.folder(current)?.parent {
            names.push(self.folder(current)?.name.clone());
            current = parent;
        }

        let mut path = NodePath::root();
        for name in names.iter().rev() {
            path = path.join(name)?;
        }
        Ok(path)
    }

    fn folder_info(&self, id: FolderId) -> Result<FolderInfo> {
        let folder = self.folder(id)?;
        let children = folder
            .children
            .iter()
            .map(|(name, child)| ChildEntry {
                name: name.clone(),
                kind: match child {
                    Child::Folder(_) => NodeKind::Folder,
                    Child::Descriptor(_) => NodeKind::Descriptor,
                },
            })
            .collect();

        Ok(FolderInfo {
            path: self.folder_path(id)?,
            common: folder.common.clone(),
            access: folder.access.clone(),
            children,
        })
    }

    /// Common definitions from the root down to `id`.
    fn chain(&self, id: FolderId) -> Result<Vec<Definition>> {
        let mut layers = Vec::new();
        let mut current = Some(id);
        while let Some(folder_id) = current {
            let folder = self.folder(folder_id)?;
            layers.push(folder.common.clone());
            current = folder.parent;
        }
        layers.reverse();
        Ok(layers)
    }

    fn access_chain(&self, id: FolderId) -> Result<AccessControl> {
        let mut layers = Vec::new();
        let mut current = Some(id);
        while let Some(folder_id) = current {
            let folder = self.folder(folder_id)?;
            layers.push(&folder.access);
            current = folder.parent;
        }
        Ok(AccessControl::merged(layers.into_iter().rev()))
    }

    fn collect_subtree(
        &self,
        id: FolderId,
        folders: &mut Vec<FolderId>,
        descriptors: &mut Vec<DescriptorId>,
    ) -> Result<()> {
        folders.push(id);
        for child in self.folder(id)?.children.values() {
            match child {
                Child::Folder(sub) => self.collect_subtree(*sub, folders, descriptors)?,
                Child::Descriptor(d) => descriptors.push(*d),
            }
        }
        Ok(())
    }

    fn ensure_folder(&mut self, path: &NodePath) -> Result<FolderId> {
        let mut current = ROOT;
        for segment in path.segments() {
            current = match self.folder(current)?.children.get(segment) {
                Some(Child::Folder(id)) => *id,
                Some(Child::Descriptor(_)) => {
                    return Err(UnivorError::Conflict(format!(
                        "{} is a descriptor, expected a folder", path
                    )))
                }
                None => {
                    validate_name(segment)?;
                    let id = FolderId(self.allocate());
                    self.folders.insert(id, FolderNode::new(segment, Some(current)));
                    self.folder_mut(current)?.children.insert(segment.clone(), Child::Folder(id));
                    id
                }
            };
        }
        Ok(current)
    }

    fn insert_descriptor(
        &mut self,
        parent: FolderId,
        name: &str,
        descriptor: Descriptor,
    ) -> Result<Arc<DescriptorHandle>> {
        if self.folder(parent)?.children.contains_key(name) {
            return Err(UnivorError::Conflict(format!(
                "{} already exists", descriptor.full_name
            )));
        }

        let id = DescriptorId(self.allocate());
        let handle = DescriptorHandle::new(id, descriptor);
        self.descriptors.insert(id, DescriptorEntry { parent, handle: handle.clone() });
        self.folder_mut(parent)?.children.insert(name.to_string(), Child::Descriptor(id));
        Ok(handle)
    }
}

/// Split a non-root path into its parent and last segment.
fn split(path: &NodePath) -> Result<(NodePath, &str)> {
    match (path.parent(), path.name()) {
        (Some(parent), Some(name)) => Ok((parent, name)),
        _ => Err(UnivorError::Validation("The root folder cannot be addressed here".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn p(s: &str) -> NodePath {
        NodePath::parse(s).unwrap()
    }

    fn def(value: serde_json::Value) -> Definition {
        Definition::from_value(value).unwrap()
    }

    fn course_tree() -> DescriptorTree {
        let tree = DescriptorTree::new();
        tree.set_common(&NodePath::root(), def(json!({"use_hypervisor": "ESXi_1"}))).unwrap();
        tree.create_folder(&NodePath::root(), "courseA").unwrap();
        tree.set_common(&p("/courseA/common"), def(json!({"use_prototype": "proto_docker"}))).unwrap();
        tree.create_descriptor(&p("/courseA"), "student1", def(json!({"memory": 4096}))).unwrap();
        tree
    }

    #[test]
    fn test_resolve_kinds() {
        let tree = course_tree();
        assert!(matches!(tree.resolve(&p("/courseA")).unwrap(), Node::Folder(_)));
        assert!(matches!(tree.resolve(&p("/courseA/student1")).unwrap(), Node::Descriptor(_)));
        match tree.resolve(&p("/courseA/common")).unwrap() {
            Node::Common(info) => assert_eq!(info.common.use_prototype(), Some("proto_docker")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(tree.resolve(&p("/courseB")), Err(UnivorError::NotFound(_))));
        assert!(matches!(tree.resolve(&p("/courseA/student1/x")), Err(UnivorError::NotFound(_))));
    }

    #[test]
    fn test_compute_cascade() {
        let tree = course_tree();
        let handle = tree.descriptor(&p("/courseA/student1")).unwrap();
        let computed = tree.compute(&handle).unwrap();

        let expected = def(json!({
            "use_hypervisor": "ESXi_1",
            "use_prototype": "proto_docker",
            "memory": 4096,
        }));
        assert_eq!(computed, expected);
    }

    #[test]
    fn test_create_conflicts() {
        let tree = course_tree();
        assert!(matches!(
            tree.create_folder(&NodePath::root(), "courseA"),
            Err(UnivorError::Conflict(_))
        ));
        assert!(matches!(
            tree.create_descriptor(&p("/courseA"), "student1", Definition::new()),
            Err(UnivorError::Conflict(_))
        ));
        assert!(matches!(
            tree.create_folder(&p("/courseA"), "common"),
            Err(UnivorError::Validation(_))
        ));
        assert!(matches!(
            tree.create_descriptor(&p("/courseA/student1"), "x", Definition::new()),
            Err(UnivorError::Validation(_))
        ));
    }

    #[test]
    fn test_remove_folder() {
        let tree = course_tree();
        assert!(matches!(tree.remove_folder(&p("/courseA")), Err(UnivorError::NotEmpty(_))));

        tree.remove_descriptor(&p("/courseA/student1"), |_| false).unwrap();
        tree.remove_folder(&p("/courseA")).unwrap();
        assert!(tree.list(&NodePath::root()).unwrap().is_empty());
        assert!(tree.remove_folder(&NodePath::root()).is_err());
    }

    #[test]
    fn test_remove_descriptor_requires_provisioned() {
        let tree = course_tree();
        let handle = tree.descriptor(&p("/courseA/student1")).unwrap();
        handle.update(|d| d.status = DescriptorStatus::Created).unwrap();

        let err = tree.remove_descriptor(&p("/courseA/student1"), |_| false).unwrap_err();
        assert!(matches!(err, UnivorError::State(_)));
    }

    #[test]
    fn test_move_subtree_renames_descendants() {
        let tree = course_tree();
        tree.create_folder(&NodePath::root(), "archive").unwrap();

        let outcome = tree.move_node(&p("/courseA"), &p("/archive"), |_| false).unwrap();
        assert_eq!(outcome.to, p("/archive/courseA"));
        assert_eq!(outcome.descriptors[0].0, p("/courseA/student1"));

        let handle = tree.descriptor(&p("/archive/courseA/student1")).unwrap();
        assert_eq!(handle.full_name().unwrap(), p("/archive/courseA/student1"));
        assert_eq!(tree.compute(&handle).unwrap().use_prototype(), Some("proto_docker"));
        assert!(tree.resolve(&p("/courseA")).is_err());
    }

    #[test]
    fn test_move_rules() {
        let tree = course_tree();
        tree.create_folder(&p("/courseA"), "sub").unwrap();

        assert!(matches!(
            tree.move_node(&p("/courseA"), &p("/courseA/sub"), |_| false),
            Err(UnivorError::Validation(_))
        ));
        assert!(tree.move_node(&NodePath::root(), &p("/courseA"), |_| false).is_err());

        let err = tree.move_node(&p("/courseA/student1"), &p("/courseA/sub"), |_| true).unwrap_err();
        assert!(matches!(err, UnivorError::Conflict(_)));

        let handle = tree.descriptor(&p("/courseA/student1")).unwrap();
        handle.update(|d| d.status = DescriptorStatus::Running).unwrap();
        let err = tree.move_node(&p("/courseA/student1"), &p("/courseA/sub"), |_| false).unwrap_err();
        assert!(matches!(err, UnivorError::Conflict(_)));
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let tree = course_tree();
        let snapshot = tree.snapshot().unwrap();
        let rebuilt = DescriptorTree::from_snapshot(snapshot.clone()).unwrap();
        assert_eq!(rebuilt.snapshot().unwrap(), snapshot);
    }

    #[test]
    fn test_descriptors_under_and_access() {
        let tree = course_tree();
        tree.create_descriptor(&p("/courseA"), "student2", Definition::new()).unwrap();
        let all = tree.descriptors_under(&NodePath::root()).unwrap();
        assert_eq!(all.len(), 2);

        tree.set_access(&NodePath::root(), AccessControl::default().with_managers(["admin"])).unwrap();
        tree.set_access(&p("/courseA/student2"), AccessControl::default().with_users(["student2"])).unwrap();
        let acl = tree.access_for(&p("/courseA/student2")).unwrap();
        assert_eq!(acl.managers, Some(vec!["admin".to_string()]));
        assert_eq!(acl.users, Some(vec!["student2".to_string()]));
    }
}
