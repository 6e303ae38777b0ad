//! The label-size index engine.
//!
//! Maintains, per data instance and per [`IndexType`], an ordered ranking
//! of labels by annotation count. Consistency contract: for every
//! (index type, label) there is at most one record key and exactly one
//! matching size key, and a label whose count reaches zero has neither.
//!
//! A per-instance readers-writer lock guards the logical index: readers
//! hold the read lock for their entire scan, and a mutation batch applies
//! all of its per-label updates under one write-lock acquisition.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{error, info};

use osprey_common::error::{DatastoreError, OspreyError, StorageError};
use osprey_common::types::{InstanceId, InstanceName, Point3d, VersionUuid};
use osprey_datastore::repo::DataInstance;
use osprey_datastore::roi::{ImmutableRoi, RoiProvider, RoiSpec};
use osprey_datastore::sync::{AnnotationSource, ElementKind, SyncEvent};
use osprey_datastore::versioned::VersionedCtx;
use osprey_storage::logqueue::{LogMessage, LogQueue};
use osprey_storage::store::OrderedKeyValueDb;

use crate::keys::{
    decode_size_tkey, record_tkey, size_scan_span, size_tkey, IndexType,
};

/// Maximum number of labels returned by a threshold page.
pub const MAX_LABELS_RETURNED: usize = 10_000;

/// Elements replayed per mutation batch during initial synchronization.
const SYNC_BATCH: usize = 1_000;

/// Mutation log entry types.
pub const LOG_ENTRY_ADD: u16 = 1;
pub const LOG_ENTRY_DELETE: u16 = 2;
pub const LOG_ENTRY_MOVE: u16 = 3;

/// The count for a given label under some index type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelSize {
    pub label: u64,
    pub size: u32,
}

impl LabelSize {
    /// `{"Label":L,"<IndexType>":N}`, the wire form of the HTTP surface.
    pub fn to_json(&self, i: IndexType) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert("Label".to_string(), serde_json::json!(self.label));
        obj.insert(i.to_string(), serde_json::json!(self.size));
        serde_json::Value::Object(obj)
    }
}

/// JSON array of ranked label sizes.
pub fn ranking_json(sizes: &[LabelSize], i: IndexType) -> serde_json::Value {
    serde_json::Value::Array(sizes.iter().map(|s| s.to_json(i)).collect())
}

enum RoiCache {
    Unchecked,
    /// Resolution failed once; remembered so later reads do not retry.
    /// Everything filters out, which makes the failure obvious as empty
    /// rankings.
    Unresolvable,
    Loaded(Arc<ImmutableRoi>),
}

/// One labelsz data instance.
pub struct LabelszData {
    name: InstanceName,
    instance: InstanceId,
    uuid: VersionUuid,
    root: VersionUuid,

    /// Optional static ROI bound at creation; immutable afterwards.
    static_roi: Option<RoiSpec>,
    roi_provider: Arc<dyn RoiProvider>,
    roi_cache: Mutex<RoiCache>,

    /// One-shot binding to the annotation source.
    sync_source: Mutex<Option<InstanceName>>,

    index_lock: RwLock<()>,

    log: Option<Arc<LogQueue>>,
}

impl LabelszData {
    /// Build the engine for a data instance. The `roi` creation property,
    /// if present, must parse as `"<roiname>,<uuid>"`.
    pub fn new(
        data: &DataInstance,
        roi_provider: Arc<dyn RoiProvider>,
        log: Option<Arc<LogQueue>>,
    ) -> Result<LabelszData, OspreyError> {
        let roi_property = data
            .properties
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("roi"))
            .map(|(_, value)| value.as_str());
        let static_roi = match roi_property {
            Some(spec) => Some(RoiSpec::parse(spec)?),
            None => None,
        };
        Ok(LabelszData {
            name: data.name.clone(),
            instance: data.id,
            uuid: data.uuid,
            root: data.root,
            static_roi,
            roi_provider,
            roi_cache: Mutex::new(RoiCache::Unchecked),
            sync_source: Mutex::new(None),
            index_lock: RwLock::new(()),
            log,
        })
    }

    pub fn name(&self) -> &InstanceName {
        &self.name
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance
    }

    pub fn root(&self) -> VersionUuid {
        self.root
    }

    pub fn static_roi(&self) -> Option<&RoiSpec> {
        self.static_roi.as_ref()
    }

    pub fn sync_source(&self) -> Option<InstanceName> {
        self.sync_source.lock().clone()
    }

    /// Whether a position passes the static ROI filter. With no ROI
    /// configured everything passes; with an unresolvable ROI nothing does.
    fn in_roi(&self, pos: Point3d) -> bool {
        let Some(spec) = &self.static_roi else {
            return true;
        };
        let mut cache = self.roi_cache.lock();
        if matches!(*cache, RoiCache::Unchecked) {
            *cache = match self.roi_provider.immutable_roi(spec) {
                Ok(roi) => RoiCache::Loaded(Arc::new(roi)),
                Err(e) => {
                    error!("could not load immutable ROI by spec {spec}: {e}");
                    RoiCache::Unresolvable
                }
            };
        }
        match &*cache {
            RoiCache::Loaded(roi) => roi.voxel_within(pos),
            _ => false,
        }
    }

    /// Count of the given index type for a label. Absent means zero.
    pub fn get_count(
        &self,
        ctx: &VersionedCtx,
        db: &dyn OrderedKeyValueDb,
        i: IndexType,
        label: u64,
    ) -> Result<u32, OspreyError> {
        let _read = self.index_lock.read();
        match ctx.get(db, &record_tkey(i, label))? {
            None => Ok(0),
            Some(value) => Ok(parse_count(&value, i, label)?),
        }
    }

    /// The top `n` labels by count of the given index type.
    pub fn top_n(
        &self,
        ctx: &VersionedCtx,
        db: &dyn OrderedKeyValueDb,
        i: IndexType,
        n: usize,
    ) -> Result<Vec<LabelSize>, OspreyError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let (begin, end) = size_scan_span(i);
        let _read = self.index_lock.read();
        let mut ranked = Vec::with_capacity(n.min(MAX_LABELS_RETURNED));
        let scanned = ctx.process_range(db, &begin, &end, &mut |tkey, _| {
            let (size, label) = decode_size_tkey(i, tkey)?;
            ranked.push(LabelSize { label, size });
            if ranked.len() >= n {
                return Err(StorageError::ScanAborted);
            }
            Ok(())
        });
        finish_scan(scanned)?;
        Ok(ranked)
    }

    /// Labels with count >= `min_size` under the given index type, in
    /// descending count order, skipping the first `offset` and returning at
    /// most `num` (0 means the 10,000 default page; larger requests are
    /// capped there).
    pub fn threshold(
        &self,
        ctx: &VersionedCtx,
        db: &dyn OrderedKeyValueDb,
        i: IndexType,
        min_size: u32,
        offset: usize,
        num: usize,
    ) -> Result<Vec<LabelSize>, OspreyError> {
        let page = if num == 0 {
            MAX_LABELS_RETURNED
        } else {
            num.min(MAX_LABELS_RETURNED)
        };
        let (begin, end) = size_scan_span(i);
        let _read = self.index_lock.read();
        let mut ranked = Vec::with_capacity(page.min(1024));
        let mut rank = 0usize;
        let scanned = ctx.process_range(db, &begin, &end, &mut |tkey, _| {
            let (size, label) = decode_size_tkey(i, tkey)?;
            if size < min_size {
                return Err(StorageError::ScanAborted);
            }
            if rank >= offset {
                ranked.push(LabelSize { label, size });
                if ranked.len() >= page {
                    return Err(StorageError::ScanAborted);
                }
            }
            rank += 1;
            Ok(())
        });
        finish_scan(scanned)?;
        Ok(ranked)
    }

    /// Bind the annotation source and replay every element as an add,
    /// yielding a consistent index. One-shot: the source set may not change
    /// afterwards. Returns the number of elements replayed.
    pub fn init_sync(
        &self,
        ctx: &VersionedCtx,
        db: &dyn OrderedKeyValueDb,
        source_name: InstanceName,
        source: &dyn AnnotationSource,
    ) -> Result<usize, OspreyError> {
        {
            let mut bound = self.sync_source.lock();
            if bound.is_some() {
                return Err(DatastoreError::SyncAlreadySet.into());
            }
            *bound = Some(source_name.clone());
        }
        info!(data = %self.name, source = %source_name, "starting labelsz sync");

        let mut batch: Vec<SyncEvent> = Vec::with_capacity(SYNC_BATCH);
        let mut total = 0usize;
        source.for_each_element(ctx.version_uuid(), &mut |elem, label, pos| {
            batch.push(SyncEvent::Added { elem, label, pos });
            total += 1;
            if batch.len() >= SYNC_BATCH {
                self.process_events(ctx, db, &batch)?;
                batch.clear();
            }
            Ok(())
        })?;
        if !batch.is_empty() {
            self.process_events(ctx, db, &batch)?;
        }
        info!(data = %self.name, elements = total, "labelsz sync complete");
        Ok(total)
    }

    /// Apply a batch of annotation events.
    ///
    /// ROI filtering happens first; a move straddling the ROI boundary
    /// decomposes into a delete and/or an add. All surviving per-label
    /// updates apply under one write-lock acquisition, so readers never
    /// observe a record key without its matching size key.
    pub fn process_events(
        &self,
        ctx: &VersionedCtx,
        db: &dyn OrderedKeyValueDb,
        events: &[SyncEvent],
    ) -> Result<(), OspreyError> {
        ctx.require_mutable()?;

        let mut deltas: Vec<(IndexType, u64, i32)> = Vec::new();
        for event in events {
            match *event {
                SyncEvent::Added { elem, label, pos } => {
                    if self.in_roi(pos) {
                        push_deltas(&mut deltas, elem, label, 1);
                    }
                }
                SyncEvent::Deleted { elem, label, pos } => {
                    if self.in_roi(pos) {
                        push_deltas(&mut deltas, elem, label, -1);
                    }
                }
                SyncEvent::Moved {
                    elem,
                    old_label,
                    old_pos,
                    new_label,
                    new_pos,
                } => {
                    if self.in_roi(old_pos) {
                        push_deltas(&mut deltas, elem, old_label, -1);
                    }
                    if self.in_roi(new_pos) {
                        push_deltas(&mut deltas, elem, new_label, 1);
                    }
                }
            }
        }

        if !deltas.is_empty() {
            let _write = self.index_lock.write();
            for (i, label, delta) in deltas {
                self.apply_delta(ctx, db, i, label, delta)?;
            }
        }

        if let Some(log) = &self.log {
            for event in events {
                let payload = bincode::serialize(event)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                log.send(LogMessage {
                    entry_type: log_entry_type(event),
                    data: self.uuid,
                    version: ctx.version_uuid(),
                    payload,
                })?;
            }
        }
        Ok(())
    }

    /// Apply one ±1 count change for a label. The paired record/size key
    /// writes keep invariant: record exists ⇔ matching size key exists ⇔
    /// count > 0.
    fn apply_delta(
        &self,
        ctx: &VersionedCtx,
        db: &dyn OrderedKeyValueDb,
        i: IndexType,
        label: u64,
        delta: i32,
    ) -> Result<(), OspreyError> {
        let current = match ctx.get(db, &record_tkey(i, label))? {
            None => 0,
            Some(value) => parse_count(&value, i, label)?,
        };
        let updated = if delta >= 0 {
            current.checked_add(delta as u32).ok_or_else(|| {
                StorageError::Corruption(format!(
                    "count overflow for index type {i}, label {label}"
                ))
            })?
        } else {
            let dec = delta.unsigned_abs();
            if dec > current {
                return Err(StorageError::Corruption(format!(
                    "count decrement below zero for index type {i}, label {label}"
                ))
                .into());
            }
            current - dec
        };

        if current > 0 {
            ctx.delete(db, &size_tkey(i, current, label))?;
        }
        if updated > 0 {
            ctx.put(db, &size_tkey(i, updated, label), &[])?;
            ctx.put(db, &record_tkey(i, label), &updated.to_le_bytes())?;
        } else {
            ctx.delete(db, &record_tkey(i, label))?;
        }
        Ok(())
    }
}

/// Route one element-kind delta to its own index type and, for synaptic
/// kinds, the AllSyn aggregate.
fn push_deltas(deltas: &mut Vec<(IndexType, u64, i32)>, elem: ElementKind, label: u64, delta: i32) {
    deltas.push((IndexType::for_element(elem), label, delta));
    if elem.is_synaptic() {
        deltas.push((IndexType::AllSyn, label, delta));
    }
}

fn log_entry_type(event: &SyncEvent) -> u16 {
    match event {
        SyncEvent::Added { .. } => LOG_ENTRY_ADD,
        SyncEvent::Deleted { .. } => LOG_ENTRY_DELETE,
        SyncEvent::Moved { .. } => LOG_ENTRY_MOVE,
    }
}

fn parse_count(value: &[u8], i: IndexType, label: u64) -> Result<u32, StorageError> {
    let raw: [u8; 4] = value.try_into().map_err(|_| {
        StorageError::Corruption(format!(
            "bad size in value for index type {i}, label {label}: value has length {}",
            value.len()
        ))
    })?;
    Ok(u32::from_le_bytes(raw))
}

/// Treat the short-circuit sentinel as a clean stop.
fn finish_scan(result: Result<(), StorageError>) -> Result<(), StorageError> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_scan_abort() => Ok(()),
        Err(e) => Err(e),
    }
}
