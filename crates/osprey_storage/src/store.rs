//! Store capability variants.
//!
//! A backend engine opens into a [`Store`], a tagged sum over the capability
//! traits. Callers view a store as the variant they require through the
//! explicit downcast accessors; a failed downcast is a typed
//! capability-mismatch error. Capabilities are additive: every ordered store
//! is also a plain key-value store.

use std::sync::Arc;

use osprey_common::config::StoreConfig;
use osprey_common::error::StorageError;
use osprey_common::types::VersionUuid;

/// One key/value pair delivered to a range visitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Visitor invoked in ascending key order by [`OrderedKeyValueDb::process_range`].
///
/// Returning `Err(StorageError::ScanAborted)` stops the scan; the sentinel
/// propagates to the range driver's caller, which treats it as a clean stop.
pub type RangeVisitor<'a> = dyn FnMut(&KeyValue) -> Result<(), StorageError> + 'a;

/// Behavior common to every opened store.
pub trait StoreCore: Send + Sync {
    /// Name of the engine that opened this store.
    fn engine_name(&self) -> &'static str;

    /// Human-readable identity for logs.
    fn describe(&self) -> String;

    /// Flush and release resources. Idempotent.
    fn close(&self);

    /// Structural equality against a store configuration, used to detect
    /// duplicate stores during startup.
    fn equal(&self, config: &StoreConfig) -> bool;
}

/// Unordered key-value operations over physical keys.
pub trait KeyValueDb: StoreCore {
    /// Point read. Absence is `Ok(None)`, never an error.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;

    /// Physical key removal. Versioned deletion is a tombstone *write* at
    /// the context layer, not this.
    fn delete(&self, key: &[u8]) -> Result<(), StorageError>;
}

/// Ordered iteration on top of [`KeyValueDb`].
pub trait OrderedKeyValueDb: KeyValueDb {
    /// Invoke `visitor` for every key in `[begin, end]` (inclusive both
    /// ends) in ascending key order. The scan is stable against concurrent
    /// writers for its duration.
    fn process_range(
        &self,
        begin: &[u8],
        end: &[u8],
        visitor: &mut RangeVisitor<'_>,
    ) -> Result<(), StorageError>;

    /// Remove every key in `[begin, end]`. Backs the context layer's
    /// whole-instance `delete_all`.
    fn delete_range(&self, begin: &[u8], end: &[u8]) -> Result<(), StorageError>;
}

/// Append-only write log keyed by (data uuid, version uuid).
///
/// Durability: by the time `append` returns without error, the record is
/// synced to stable storage. Existing bytes are never mutated or truncated,
/// and records within one (data, version) log are totally ordered by append.
pub trait WriteLog: StoreCore {
    fn append(
        &self,
        entry_type: u16,
        data: VersionUuid,
        version: VersionUuid,
        payload: &[u8],
    ) -> Result<(), StorageError>;
}

/// An opened store tagged with its strongest capability.
#[derive(Clone)]
pub enum Store {
    KeyValue(Arc<dyn KeyValueDb>),
    OrderedKeyValue(Arc<dyn OrderedKeyValueDb>),
    WriteLog(Arc<dyn WriteLog>),
}

impl Store {
    fn core(&self) -> &dyn StoreCore {
        match self {
            Store::KeyValue(db) => db.as_ref(),
            Store::OrderedKeyValue(db) => db.as_ref(),
            Store::WriteLog(log) => log.as_ref(),
        }
    }

    pub fn engine_name(&self) -> &'static str {
        self.core().engine_name()
    }

    pub fn describe(&self) -> String {
        self.core().describe()
    }

    pub fn close(&self) {
        self.core().close()
    }

    pub fn equal(&self, config: &StoreConfig) -> bool {
        self.core().equal(config)
    }

    /// View as a plain key-value store, if supported.
    pub fn key_value(&self) -> Option<Arc<dyn KeyValueDb>> {
        match self {
            Store::KeyValue(db) => Some(db.clone()),
            Store::OrderedKeyValue(db) => Some(db.clone() as Arc<dyn KeyValueDb>),
            Store::WriteLog(_) => None,
        }
    }

    /// View as an ordered key-value store, if supported.
    pub fn ordered_key_value(&self) -> Option<Arc<dyn OrderedKeyValueDb>> {
        match self {
            Store::OrderedKeyValue(db) => Some(db.clone()),
            _ => None,
        }
    }

    /// View as a write log, if supported.
    pub fn write_log(&self) -> Option<Arc<dyn WriteLog>> {
        match self {
            Store::WriteLog(log) => Some(log.clone()),
            _ => None,
        }
    }

    pub fn require_key_value(&self) -> Result<Arc<dyn KeyValueDb>, StorageError> {
        self.key_value().ok_or_else(|| self.mismatch("key-value"))
    }

    pub fn require_ordered(&self) -> Result<Arc<dyn OrderedKeyValueDb>, StorageError> {
        self.ordered_key_value()
            .ok_or_else(|| self.mismatch("ordered key-value"))
    }

    pub fn require_write_log(&self) -> Result<Arc<dyn WriteLog>, StorageError> {
        self.write_log().ok_or_else(|| self.mismatch("write log"))
    }

    fn mismatch(&self, capability: &'static str) -> StorageError {
        StorageError::CapabilityMismatch {
            store: self.describe(),
            capability,
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Store({})", self.describe())
    }
}
