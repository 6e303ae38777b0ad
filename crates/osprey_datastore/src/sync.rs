//! Annotation sync contract.
//!
//! Annotation datatypes emit [`SyncEvent`]s as elements are added, deleted,
//! or moved; consumers like the label-size index apply them synchronously.
//! Within one (instance, version) events arrive in producer order; across
//! versions no ordering is defined.

use serde::{Deserialize, Serialize};

use osprey_common::error::OspreyError;
use osprey_common::types::{Point3d, VersionUuid};

/// Kind of annotation element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementKind {
    PostSyn,
    PreSyn,
    Gap,
    Note,
}

impl ElementKind {
    /// Synaptic elements aggregate under the AllSyn index; notes do not.
    pub fn is_synaptic(&self) -> bool {
        !matches!(self, ElementKind::Note)
    }
}

/// One annotation mutation with its label assignment(s).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SyncEvent {
    Added {
        elem: ElementKind,
        label: u64,
        pos: Point3d,
    },
    Deleted {
        elem: ElementKind,
        label: u64,
        pos: Point3d,
    },
    /// An element moved, changing position and therefore possibly its
    /// label assignment.
    Moved {
        elem: ElementKind,
        old_label: u64,
        old_pos: Point3d,
        new_label: u64,
        new_pos: Point3d,
    },
}

impl SyncEvent {
    pub fn elem(&self) -> ElementKind {
        match self {
            SyncEvent::Added { elem, .. }
            | SyncEvent::Deleted { elem, .. }
            | SyncEvent::Moved { elem, .. } => *elem,
        }
    }
}

/// A scannable source of annotation elements, used for the initial
/// synchronization that replays every element as an add.
pub trait AnnotationSource: Send + Sync {
    /// Visit every element at the given version. Order is unspecified but
    /// stable for a given source state.
    fn for_each_element(
        &self,
        version: VersionUuid,
        visit: &mut dyn FnMut(ElementKind, u64, Point3d) -> Result<(), OspreyError>,
    ) -> Result<(), OspreyError>;
}
