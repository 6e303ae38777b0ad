//! Region-of-interest filtering.
//!
//! A ROI is an immutable set of block coordinates pinned to a version. A
//! consumer references it by the `"<roiname>,<uuid>"` spec string recorded
//! at instance creation; the binding cannot change afterwards.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use osprey_common::error::{DatastoreError, OspreyError};
use osprey_common::types::{BlockCoord, InstanceName, Point3d, VersionUuid};

/// Cubic block edge length used by ROI block grids.
pub const DEFAULT_BLOCK_SIZE: i32 = 32;

/// Reference to a static ROI: `"<roiname>,<uuid>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoiSpec {
    pub name: InstanceName,
    pub version: VersionUuid,
}

impl RoiSpec {
    pub fn parse(spec: &str) -> Result<Self, DatastoreError> {
        let (name, uuid) = spec
            .split_once(',')
            .ok_or_else(|| DatastoreError::BadRoiSpec(spec.to_string()))?;
        if name.is_empty() {
            return Err(DatastoreError::BadRoiSpec(spec.to_string()));
        }
        let version = VersionUuid::from_str(uuid.trim())
            .map_err(|_| DatastoreError::BadRoiSpec(spec.to_string()))?;
        Ok(RoiSpec {
            name: InstanceName(name.trim().to_string()),
            version,
        })
    }
}

impl fmt::Display for RoiSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.name, self.version)
    }
}

/// An immutable ROI resolved at a fixed version.
#[derive(Debug, Clone)]
pub struct ImmutableRoi {
    pub name: InstanceName,
    pub version: VersionUuid,
    block_size: i32,
    blocks: HashSet<BlockCoord>,
}

impl ImmutableRoi {
    pub fn new(
        name: InstanceName,
        version: VersionUuid,
        block_size: i32,
        blocks: HashSet<BlockCoord>,
    ) -> Self {
        ImmutableRoi {
            name,
            version,
            block_size: block_size.max(1),
            blocks,
        }
    }

    pub fn voxel_within(&self, pos: Point3d) -> bool {
        self.blocks.contains(&pos.block(self.block_size))
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

/// Resolves ROI specs to immutable ROIs.
///
/// The production provider reads the roi datatype's stored spans; this
/// crate ships an in-memory provider for consumers and tests.
pub trait RoiProvider: Send + Sync {
    fn immutable_roi(&self, spec: &RoiSpec) -> Result<ImmutableRoi, OspreyError>;
}

/// In-memory provider of pre-registered ROIs.
#[derive(Default)]
pub struct StaticRoiProvider {
    rois: HashMap<RoiSpec, ImmutableRoi>,
}

impl StaticRoiProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, roi: ImmutableRoi) {
        let spec = RoiSpec {
            name: roi.name.clone(),
            version: roi.version,
        };
        self.rois.insert(spec, roi);
    }
}

impl RoiProvider for StaticRoiProvider {
    fn immutable_roi(&self, spec: &RoiSpec) -> Result<ImmutableRoi, OspreyError> {
        self.rois
            .get(spec)
            .cloned()
            .ok_or_else(|| OspreyError::Internal(format!("no ROI registered for spec {spec}")))
    }
}
