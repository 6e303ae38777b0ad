//! Key schemas for the label-size index.
//!
//! Two type-key families per index type, both with multi-byte integers in
//! big-endian so lexicographic order is numeric order:
//!
//! ```text
//! record:  'R' || index_type (u8) || label (u64 BE)          -> count (u32 LE)
//! size:    'S' || index_type (u8) || u32::MAX - count (BE)
//!              || label (u64 BE)                             -> (empty)
//! ```
//!
//! The size key inverts the count, so an ascending ordered scan yields
//! labels in descending count order, ties broken by ascending label.

use std::fmt;

use serde::{Deserialize, Serialize};

use osprey_common::error::StorageError;
use osprey_datastore::sync::ElementKind;

const TAG_RECORD: u8 = b'R';
const TAG_SIZE: u8 = b'S';

pub const RECORD_TKEY_LEN: usize = 10;
pub const SIZE_TKEY_LEN: usize = 14;

/// Category of annotation element counted by the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum IndexType {
    PostSyn = 0,
    PreSyn = 1,
    Gap = 2,
    Note = 3,
    /// Catch-all over every synaptic element kind.
    AllSyn = 4,
    /// Declared but not yet wired to a source; queries return empty.
    Voxels = 5,
}

impl IndexType {
    pub const ALL: [IndexType; 6] = [
        IndexType::PostSyn,
        IndexType::PreSyn,
        IndexType::Gap,
        IndexType::Note,
        IndexType::AllSyn,
        IndexType::Voxels,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IndexType::PostSyn => "PostSyn",
            IndexType::PreSyn => "PreSyn",
            IndexType::Gap => "Gap",
            IndexType::Note => "Note",
            IndexType::AllSyn => "AllSyn",
            IndexType::Voxels => "Voxels",
        }
    }

    /// Exact-name parse, mirroring the HTTP surface's index type strings.
    pub fn parse(s: &str) -> Option<IndexType> {
        IndexType::ALL.into_iter().find(|i| i.as_str() == s)
    }

    fn from_u8(raw: u8) -> Option<IndexType> {
        IndexType::ALL.into_iter().find(|i| *i as u8 == raw)
    }

    /// The index type counting a single element kind.
    pub fn for_element(elem: ElementKind) -> IndexType {
        match elem {
            ElementKind::PostSyn => IndexType::PostSyn,
            ElementKind::PreSyn => IndexType::PreSyn,
            ElementKind::Gap => IndexType::Gap,
            ElementKind::Note => IndexType::Note,
        }
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-key of the per-label count record.
pub fn record_tkey(i: IndexType, label: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(RECORD_TKEY_LEN);
    key.push(TAG_RECORD);
    key.push(i as u8);
    key.extend_from_slice(&label.to_be_bytes());
    key
}

/// Type-key of the inverted (count, label) ranking entry.
pub fn size_tkey(i: IndexType, count: u32, label: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(SIZE_TKEY_LEN);
    key.push(TAG_SIZE);
    key.push(i as u8);
    key.extend_from_slice(&(u32::MAX - count).to_be_bytes());
    key.extend_from_slice(&label.to_be_bytes());
    key
}

/// Decode a record type-key, validating tag and index type.
pub fn decode_record_tkey(expected: IndexType, tkey: &[u8]) -> Result<u64, StorageError> {
    if tkey.len() != RECORD_TKEY_LEN || tkey[0] != TAG_RECORD {
        return Err(StorageError::Corruption(format!(
            "malformed label record key of length {}",
            tkey.len()
        )));
    }
    check_index_type(expected, tkey[1])?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&tkey[2..10]);
    Ok(u64::from_be_bytes(raw))
}

/// Decode a size type-key into (count, label), validating tag and index
/// type.
pub fn decode_size_tkey(expected: IndexType, tkey: &[u8]) -> Result<(u32, u64), StorageError> {
    if tkey.len() != SIZE_TKEY_LEN || tkey[0] != TAG_SIZE {
        return Err(StorageError::Corruption(format!(
            "malformed label size key of length {}",
            tkey.len()
        )));
    }
    check_index_type(expected, tkey[1])?;
    let mut inverted = [0u8; 4];
    inverted.copy_from_slice(&tkey[2..6]);
    let mut raw_label = [0u8; 8];
    raw_label.copy_from_slice(&tkey[6..14]);
    Ok((
        u32::MAX - u32::from_be_bytes(inverted),
        u64::from_be_bytes(raw_label),
    ))
}

fn check_index_type(expected: IndexType, raw: u8) -> Result<(), StorageError> {
    match IndexType::from_u8(raw) {
        Some(found) if found == expected => Ok(()),
        Some(found) => Err(StorageError::Corruption(format!(
            "bad iteration of keys: expected index type {expected}, got {found}"
        ))),
        None => Err(StorageError::Corruption(format!(
            "unknown index type byte {raw:#04x} in key"
        ))),
    }
}

/// Type-key span of an ordered ranking scan for one index type, largest
/// counts first. The lower bound starts at count `u32::MAX - 1`, the
/// largest count the index ever stores.
pub fn size_scan_span(i: IndexType) -> (Vec<u8>, Vec<u8>) {
    (size_tkey(i, u32::MAX - 1, 0), size_tkey(i, 0, u64::MAX))
}

/// Type-key span over every record key of one index type.
pub fn record_scan_span(i: IndexType) -> (Vec<u8>, Vec<u8>) {
    (record_tkey(i, 0), record_tkey(i, u64::MAX))
}
