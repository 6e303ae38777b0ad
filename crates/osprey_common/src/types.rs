//! Identifier and coordinate types shared across the workspace.
//!
//! Physical storage keys embed the compact `InstanceId`/`VersionId` forms in
//! big-endian so lexicographic key order matches numeric order. The 128-bit
//! `VersionUuid` is the external name of a version node; the compact ids are
//! internal to key framing and the DAG.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Compact data-instance id embedded at the front of every physical key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub u32);

impl InstanceId {
    /// Reserved id for repo metadata; never allocated to a data instance.
    pub const METADATA: InstanceId = InstanceId(0);

    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    pub fn from_bytes(b: [u8; 4]) -> Self {
        InstanceId(u32::from_be_bytes(b))
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compact version id appended to every physical key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionId(pub u32);

impl VersionId {
    /// Reserved id used by the unversioned metadata context.
    pub const UNVERSIONED: VersionId = VersionId(0);

    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    pub fn from_bytes(b: [u8; 4]) -> Self {
        VersionId(u32::from_be_bytes(b))
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 128-bit UUID naming a version node (or a data instance in log file names).
///
/// Displays as 32 lowercase hex characters without hyphens; parsing accepts
/// both hyphenated and bare forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionUuid(Uuid);

impl VersionUuid {
    pub fn random() -> Self {
        VersionUuid(Uuid::new_v4())
    }

    pub fn nil() -> Self {
        VersionUuid(Uuid::nil())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for VersionUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for VersionUuid {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(VersionUuid(Uuid::parse_str(s)?))
    }
}

impl From<Uuid> for VersionUuid {
    fn from(u: Uuid) -> Self {
        VersionUuid(u)
    }
}

/// Name of a data instance, unique within a repo.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceName(pub String);

impl fmt::Display for InstanceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InstanceName {
    fn from(s: &str) -> Self {
        InstanceName(s.to_string())
    }
}

/// Datatype family name, e.g. "labelsz" or "annotation".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatatypeName(pub String);

impl fmt::Display for DatatypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DatatypeName {
    fn from(s: &str) -> Self {
        DatatypeName(s.to_string())
    }
}

/// Identifies a data instance across repos: (instance name, root version).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataSpecifier {
    pub name: InstanceName,
    pub root: VersionUuid,
}

impl DataSpecifier {
    pub fn new(name: InstanceName, root: VersionUuid) -> Self {
        DataSpecifier { name, root }
    }

    /// Parse the `"<name>:<uuid>"` form used in backend assignment keys.
    pub fn parse(spec: &str) -> Option<Self> {
        let (name, uuid) = spec.split_once(':')?;
        if name.is_empty() {
            return None;
        }
        let root = VersionUuid::from_str(uuid).ok()?;
        Some(DataSpecifier {
            name: InstanceName(name.to_string()),
            root,
        })
    }
}

impl fmt::Display for DataSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.root)
    }
}

/// Voxel coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point3d {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Point3d {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Point3d { x, y, z }
    }

    /// The block containing this voxel for a given cubic block size.
    pub fn block(&self, block_size: i32) -> BlockCoord {
        BlockCoord {
            x: self.x.div_euclid(block_size),
            y: self.y.div_euclid(block_size),
            z: self.z.div_euclid(block_size),
        }
    }
}

impl fmt::Display for Point3d {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.x, self.y, self.z)
    }
}

/// Block coordinate in a regular grid of cubic blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockCoord {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        BlockCoord { x, y, z }
    }
}
