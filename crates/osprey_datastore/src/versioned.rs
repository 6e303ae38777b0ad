//! Versioned context: key framing plus DAG-ancestry read resolution.
//!
//! Reads walk from the bound version toward the root and return the value
//! of the nearest ancestor that wrote the key; a tombstone at that ancestor
//! means absence. Writes and deletions target the bound version only, and
//! deletion writes a tombstone value rather than removing the physical key,
//! or ancestor reads would resurrect stale values.
//!
//! Resolution works by ordered iteration: all versions of one type-key are
//! physically adjacent, so one range scan collects the candidate versions
//! and the ancestry rank picks the winner.

use std::collections::HashMap;

use osprey_common::error::{DatastoreError, StorageError};
use osprey_common::types::{InstanceId, VersionId, VersionUuid};
use osprey_storage::context::DataContext;
use osprey_storage::store::{KeyValue, KeyValueDb, OrderedKeyValueDb};

use crate::dag::VersionDag;

/// Visitor over version-resolved (type_key, value) pairs in ascending
/// type-key order. `Err(StorageError::ScanAborted)` short-circuits.
pub type TypeKeyVisitor<'a> = dyn FnMut(&[u8], &[u8]) -> Result<(), StorageError> + 'a;

pub struct VersionedCtx {
    ctx: DataContext,
    uuid: VersionUuid,
    /// Ancestor version -> distance rank; rank 0 is the bound version.
    ancestry: HashMap<VersionId, usize>,
    locked: bool,
}

impl VersionedCtx {
    /// Bind a data instance to a version node of the DAG.
    pub fn new(
        dag: &VersionDag,
        instance: InstanceId,
        version: VersionUuid,
    ) -> Result<Self, DatastoreError> {
        let id = dag.version_id(version)?;
        let order = dag.ancestry(id)?;
        let ancestry = order.into_iter().enumerate().map(|(rank, v)| (v, rank)).collect();
        Ok(VersionedCtx {
            ctx: DataContext::new(instance, id),
            uuid: version,
            ancestry,
            locked: dag.is_locked(version)?,
        })
    }

    pub fn data_context(&self) -> DataContext {
        self.ctx
    }

    pub fn version(&self) -> VersionId {
        self.ctx.version
    }

    pub fn version_uuid(&self) -> VersionUuid {
        self.uuid
    }

    /// Whether the bound version accepts writes.
    pub fn mutable(&self) -> bool {
        !self.locked
    }

    /// Writers call this before mutating; a locked version rejects writes.
    pub fn require_mutable(&self) -> Result<(), DatastoreError> {
        if self.locked {
            return Err(DatastoreError::VersionLocked(self.ctx.version.to_string()));
        }
        Ok(())
    }

    /// Nearest-ancestor read. `Ok(None)` when no ancestor wrote the key or
    /// the nearest ancestor wrote a tombstone.
    pub fn get(
        &self,
        db: &dyn OrderedKeyValueDb,
        type_key: &[u8],
    ) -> Result<Option<Vec<u8>>, StorageError> {
        let (begin, end) = self.ctx.version_span(type_key);
        let mut best: Option<(usize, Vec<u8>)> = None;
        let mut visitor = |kv: &KeyValue| {
            let (tkey, version) = self.ctx.decode(&kv.key)?;
            // The span can catch longer type-keys sharing this prefix.
            if tkey != type_key {
                return Ok(());
            }
            if let Some(&rank) = self.ancestry.get(&version) {
                if best.as_ref().is_none_or(|(best_rank, _)| rank < *best_rank) {
                    best = Some((rank, kv.value.clone()));
                }
            }
            Ok(())
        };
        db.process_range(&begin, &end, &mut visitor)?;
        match best {
            Some((_, framed)) => Ok(DataContext::unframe_value(&framed)?.map(<[u8]>::to_vec)),
            None => Ok(None),
        }
    }

    /// Write a value at the bound version.
    pub fn put(
        &self,
        db: &dyn KeyValueDb,
        type_key: &[u8],
        value: &[u8],
    ) -> Result<(), StorageError> {
        db.put(&self.ctx.encode(type_key), &DataContext::frame_value(value))
    }

    /// Write a tombstone at the bound version.
    pub fn delete(&self, db: &dyn KeyValueDb, type_key: &[u8]) -> Result<(), StorageError> {
        db.put(&self.ctx.encode(type_key), &DataContext::tombstone_value())
    }

    /// Version-resolving ordered iteration over `[begin_tkey, end_tkey]`:
    /// each distinct type-key in the span is resolved to its nearest
    /// ancestor value, tombstoned keys are skipped, and the visitor sees
    /// surviving (type_key, value) pairs in ascending type-key order.
    pub fn process_range(
        &self,
        db: &dyn OrderedKeyValueDb,
        begin_tkey: &[u8],
        end_tkey: &[u8],
        visitor: &mut TypeKeyVisitor<'_>,
    ) -> Result<(), StorageError> {
        let (begin, end) = self.ctx.range_span(begin_tkey, end_tkey);

        fn emit(
            group: Option<(Vec<u8>, usize, Vec<u8>)>,
            visitor: &mut TypeKeyVisitor<'_>,
        ) -> Result<(), StorageError> {
            if let Some((tkey, _, framed)) = group {
                if let Some(value) = DataContext::unframe_value(&framed)? {
                    visitor(&tkey, value)?;
                }
            }
            Ok(())
        }

        // Best candidate for the type-key currently being grouped.
        let mut current: Option<(Vec<u8>, usize, Vec<u8>)> = None;

        let mut range_visitor = |kv: &KeyValue| -> Result<(), StorageError> {
            let (tkey, version) = self.ctx.decode(&kv.key)?;
            if current.as_ref().is_some_and(|(cur, _, _)| *cur != tkey) {
                emit(current.take(), &mut *visitor)?;
            }
            if let Some(&rank) = self.ancestry.get(&version) {
                let better = match &current {
                    Some((cur, best_rank, _)) => *cur != tkey || rank < *best_rank,
                    None => true,
                };
                if better {
                    current = Some((tkey, rank, kv.value.clone()));
                }
            }
            Ok(())
        };
        db.process_range(&begin, &end, &mut range_visitor)?;
        emit(current.take(), visitor)
    }

    /// Remove every physical key of the bound data instance.
    pub fn delete_all(&self, db: &dyn OrderedKeyValueDb) -> Result<(), StorageError> {
        self.ctx.delete_all(db)
    }
}
