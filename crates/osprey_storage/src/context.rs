//! Physical key and value framing.
//!
//! A datatype works with opaque *type-keys*. [`DataContext`] turns a
//! type-key into the physical storage key
//!
//! ```text
//! instance_id (u32 BE) || type_key || version_id (u32 BE)
//! ```
//!
//! so every key of one data instance shares a 4-byte prefix and all versions
//! of one type-key are physically adjacent. Big-endian ids keep
//! lexicographic order aligned with numeric order.
//!
//! Stored values carry a 1-byte marker: versioned deletion writes a
//! tombstone value rather than removing the key, or ancestor reads would
//! resurrect stale values.

use osprey_common::error::StorageError;
use osprey_common::types::{InstanceId, VersionId};

use crate::store::OrderedKeyValueDb;

/// Marker byte prefixed to stored data values.
const VALUE_DATA: u8 = 0x00;
/// Marker byte of a tombstone value.
const VALUE_TOMBSTONE: u8 = 0x01;

const ID_LEN: usize = 4;

/// Binds a data instance and one version node for key framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataContext {
    pub instance: InstanceId,
    pub version: VersionId,
}

impl DataContext {
    pub fn new(instance: InstanceId, version: VersionId) -> Self {
        DataContext { instance, version }
    }

    /// Context for repo metadata: reserved instance 0, unversioned.
    pub fn metadata() -> Self {
        DataContext {
            instance: InstanceId::METADATA,
            version: VersionId::UNVERSIONED,
        }
    }

    /// Physical key for a type-key at this context's version.
    pub fn encode(&self, type_key: &[u8]) -> Vec<u8> {
        self.encode_at(type_key, self.version)
    }

    /// Physical key for a type-key at an explicit version.
    pub fn encode_at(&self, type_key: &[u8], version: VersionId) -> Vec<u8> {
        let mut key = Vec::with_capacity(ID_LEN * 2 + type_key.len());
        key.extend_from_slice(&self.instance.to_bytes());
        key.extend_from_slice(type_key);
        key.extend_from_slice(&version.to_bytes());
        key
    }

    /// Split a physical key back into (type_key, version). Errors on keys
    /// too short to carry the framing or belonging to another instance.
    pub fn decode(&self, physical: &[u8]) -> Result<(Vec<u8>, VersionId), StorageError> {
        if physical.len() < ID_LEN * 2 {
            return Err(StorageError::Corruption(format!(
                "physical key of length {} cannot carry instance/version framing",
                physical.len()
            )));
        }
        let mut inst = [0u8; ID_LEN];
        inst.copy_from_slice(&physical[..ID_LEN]);
        let instance = InstanceId::from_bytes(inst);
        if instance != self.instance {
            return Err(StorageError::Corruption(format!(
                "physical key for instance {} decoded under context for instance {}",
                instance, self.instance
            )));
        }
        let mut ver = [0u8; ID_LEN];
        ver.copy_from_slice(&physical[physical.len() - ID_LEN..]);
        let type_key = physical[ID_LEN..physical.len() - ID_LEN].to_vec();
        Ok((type_key, VersionId::from_bytes(ver)))
    }

    /// Physical span covering every version of one type-key.
    pub fn version_span(&self, type_key: &[u8]) -> (Vec<u8>, Vec<u8>) {
        (
            self.encode_at(type_key, VersionId(0)),
            self.encode_at(type_key, VersionId(u32::MAX)),
        )
    }

    /// Physical span covering `[begin_tkey, end_tkey]` across all versions.
    pub fn range_span(&self, begin_tkey: &[u8], end_tkey: &[u8]) -> (Vec<u8>, Vec<u8>) {
        (
            self.encode_at(begin_tkey, VersionId(0)),
            self.encode_at(end_tkey, VersionId(u32::MAX)),
        )
    }

    /// Physical span covering every key of this data instance.
    ///
    /// The inclusive upper bound is the next instance's bare 4-byte prefix:
    /// no physical key equals it (keys carry at least 8 bytes of framing)
    /// and every longer key with that prefix sorts after it.
    pub fn instance_span(&self) -> (Vec<u8>, Vec<u8>) {
        let begin = self.instance.to_bytes().to_vec();
        let end = match self.instance.0.checked_add(1) {
            Some(next) => InstanceId(next).to_bytes().to_vec(),
            // Last representable instance: bound by a key longer than any
            // real framing tail.
            None => vec![0xff; 80],
        };
        (begin, end)
    }

    /// Remove every physical key of this data instance, metadata included.
    pub fn delete_all(&self, db: &dyn OrderedKeyValueDb) -> Result<(), StorageError> {
        let (begin, end) = self.instance_span();
        db.delete_range(&begin, &end)
    }

    /// Frame a data value for storage.
    pub fn frame_value(data: &[u8]) -> Vec<u8> {
        let mut v = Vec::with_capacity(1 + data.len());
        v.push(VALUE_DATA);
        v.extend_from_slice(data);
        v
    }

    /// The tombstone sentinel value.
    pub fn tombstone_value() -> Vec<u8> {
        vec![VALUE_TOMBSTONE]
    }

    /// Strip value framing. `Ok(None)` means tombstone.
    pub fn unframe_value(framed: &[u8]) -> Result<Option<&[u8]>, StorageError> {
        match framed.first() {
            Some(&VALUE_DATA) => Ok(Some(&framed[1..])),
            Some(&VALUE_TOMBSTONE) => Ok(None),
            Some(marker) => Err(StorageError::Corruption(format!(
                "unknown value marker byte {marker:#04x}"
            ))),
            None => Err(StorageError::Corruption(
                "empty stored value lacks marker byte".to_string(),
            )),
        }
    }
}
