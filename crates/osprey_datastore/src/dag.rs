//! Append-only version DAG.
//!
//! Versions are UUID-named nodes with compact ids used in physical keys.
//! A node is mutable only while unlocked; children may only branch from
//! locked parents, so every ancestor of a writable node is immutable.
//!
//! [`VersionDag::ancestry`] defines the resolution order for versioned
//! reads: breadth-first from the queried node toward the root with parents
//! visited in declared order, first visit winning. For multi-parent merges
//! the declared parent order is therefore the deterministic tie-break
//! between equidistant ancestors.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use osprey_common::error::DatastoreError;
use osprey_common::types::{VersionId, VersionUuid};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionNode {
    pub uuid: VersionUuid,
    pub id: VersionId,
    pub parents: Vec<VersionId>,
    pub children: Vec<VersionId>,
    pub locked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionDag {
    nodes: HashMap<VersionId, VersionNode>,
    by_uuid: HashMap<VersionUuid, VersionId>,
    root: VersionId,
    next_id: u32,
}

impl VersionDag {
    /// A new DAG with a single unlocked root node.
    pub fn new(root_uuid: VersionUuid) -> Self {
        // Id 0 is reserved for the unversioned metadata context.
        let root = VersionId(1);
        let node = VersionNode {
            uuid: root_uuid,
            id: root,
            parents: Vec::new(),
            children: Vec::new(),
            locked: false,
        };
        VersionDag {
            nodes: HashMap::from([(root, node)]),
            by_uuid: HashMap::from([(root_uuid, root)]),
            root,
            next_id: 2,
        }
    }

    pub fn root(&self) -> VersionId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, uuid: VersionUuid) -> bool {
        self.by_uuid.contains_key(&uuid)
    }

    pub fn version_id(&self, uuid: VersionUuid) -> Result<VersionId, DatastoreError> {
        self.by_uuid
            .get(&uuid)
            .copied()
            .ok_or_else(|| DatastoreError::UnknownVersion(uuid.to_string()))
    }

    pub fn version_uuid(&self, id: VersionId) -> Result<VersionUuid, DatastoreError> {
        self.node(id).map(|n| n.uuid)
    }

    pub fn is_locked(&self, uuid: VersionUuid) -> Result<bool, DatastoreError> {
        let id = self.version_id(uuid)?;
        self.node(id).map(|n| n.locked)
    }

    fn node(&self, id: VersionId) -> Result<&VersionNode, DatastoreError> {
        self.nodes
            .get(&id)
            .ok_or_else(|| DatastoreError::UnknownVersion(id.to_string()))
    }

    /// Lock a version against further mutation. Idempotent.
    pub fn lock(&mut self, uuid: VersionUuid) -> Result<(), DatastoreError> {
        let id = self.version_id(uuid)?;
        if let Some(node) = self.nodes.get_mut(&id) {
            node.locked = true;
        }
        Ok(())
    }

    /// Branch a new child off a locked parent.
    pub fn branch(
        &mut self,
        parent_uuid: VersionUuid,
        child_uuid: VersionUuid,
    ) -> Result<VersionId, DatastoreError> {
        self.merge(&[parent_uuid], child_uuid)
    }

    /// Create a child with one or more locked parents. The declared parent
    /// order is recorded verbatim; it is the merge tie-break order.
    pub fn merge(
        &mut self,
        parent_uuids: &[VersionUuid],
        child_uuid: VersionUuid,
    ) -> Result<VersionId, DatastoreError> {
        if self.by_uuid.contains_key(&child_uuid) {
            return Err(DatastoreError::DuplicateVersion(child_uuid.to_string()));
        }
        let mut parents = Vec::with_capacity(parent_uuids.len());
        for &uuid in parent_uuids {
            let id = self.version_id(uuid)?;
            if !self.nodes[&id].locked {
                return Err(DatastoreError::ParentUnlocked(uuid.to_string()));
            }
            parents.push(id);
        }

        let child = VersionId(self.next_id);
        self.next_id += 1;
        for &parent in &parents {
            if let Some(node) = self.nodes.get_mut(&parent) {
                node.children.push(child);
            }
        }
        self.nodes.insert(
            child,
            VersionNode {
                uuid: child_uuid,
                id: child,
                parents,
                children: Vec::new(),
                locked: false,
            },
        );
        self.by_uuid.insert(child_uuid, child);
        Ok(child)
    }

    /// Ancestors of a version including itself, in resolution order:
    /// breadth-first toward the root, parents in declared order, first
    /// visit wins. Index in the returned vector is the ancestor's distance
    /// rank for versioned reads.
    pub fn ancestry(&self, start: VersionId) -> Result<Vec<VersionId>, DatastoreError> {
        if !self.nodes.contains_key(&start) {
            return Err(DatastoreError::UnknownVersion(start.to_string()));
        }
        let mut order = Vec::new();
        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(id) = queue.pop_front() {
            order.push(id);
            if let Some(node) = self.nodes.get(&id) {
                for &parent in &node.parents {
                    if seen.insert(parent) {
                        queue.push_back(parent);
                    }
                }
            }
        }
        Ok(order)
    }

    /// Leaves of the DAG: versions without children.
    pub fn leaves(&self) -> Vec<VersionUuid> {
        let mut leaves: Vec<&VersionNode> = self
            .nodes
            .values()
            .filter(|n| n.children.is_empty())
            .collect();
        leaves.sort_by_key(|n| n.id);
        leaves.iter().map(|n| n.uuid).collect()
    }
}
