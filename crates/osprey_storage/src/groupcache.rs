//! Read-through immutable cache wrapper.
//!
//! Wraps an ordered store for data instances the operator has declared
//! immutable-for-GET. Cache keys are full physical keys, so entries are
//! already namespaced by (instance, type-key, version). Only `get` is
//! cached; `put`/`delete` pass through and invalidate the exact key. If the
//! immutability declaration is violated the cache may serve stale reads;
//! that contract is the operator's responsibility.

use std::sync::Arc;

use moka::sync::Cache;

use osprey_common::config::{GroupcacheConfig, StoreConfig};
use osprey_common::error::StorageError;

use crate::store::{KeyValueDb, OrderedKeyValueDb, RangeVisitor, StoreCore};

/// Shared byte cache sized by the configured GiB budget; weighted by
/// key+value footprint.
pub type ByteCache = Cache<Vec<u8>, Arc<Vec<u8>>>;

pub fn build_cache(config: &GroupcacheConfig) -> Arc<ByteCache> {
    let cache = Cache::builder()
        .max_capacity(config.gb.saturating_mul(1 << 30))
        .weigher(|key: &Vec<u8>, value: &Arc<Vec<u8>>| {
            (key.len() + value.len()).min(u32::MAX as usize) as u32
        })
        .build();
    Arc::new(cache)
}

/// An ordered store whose point reads go through the shared cache.
pub struct CachedStore {
    inner: Arc<dyn OrderedKeyValueDb>,
    cache: Arc<ByteCache>,
}

impl CachedStore {
    pub fn new(inner: Arc<dyn OrderedKeyValueDb>, cache: Arc<ByteCache>) -> Self {
        CachedStore { inner, cache }
    }
}

impl StoreCore for CachedStore {
    fn engine_name(&self) -> &'static str {
        self.inner.engine_name()
    }

    fn describe(&self) -> String {
        format!("groupcache-wrapped {}", self.inner.describe())
    }

    fn close(&self) {
        self.inner.close()
    }

    fn equal(&self, config: &StoreConfig) -> bool {
        self.inner.equal(config)
    }
}

impl KeyValueDb for CachedStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        if let Some(hit) = self.cache.get(key) {
            return Ok(Some((*hit).clone()));
        }
        match self.inner.get(key)? {
            Some(value) => {
                self.cache.insert(key.to_vec(), Arc::new(value.clone()));
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.inner.put(key, value)?;
        self.cache.invalidate(key);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        self.inner.delete(key)?;
        self.cache.invalidate(key);
        Ok(())
    }
}

impl OrderedKeyValueDb for CachedStore {
    fn process_range(
        &self,
        begin: &[u8],
        end: &[u8],
        visitor: &mut RangeVisitor<'_>,
    ) -> Result<(), StorageError> {
        // Range reads bypass the cache; they are not point-read shaped.
        self.inner.process_range(begin, end, visitor)
    }

    fn delete_range(&self, begin: &[u8], end: &[u8]) -> Result<(), StorageError> {
        self.inner.delete_range(begin, end)?;
        // No per-key accounting for span deletes; drop everything.
        self.cache.invalidate_all();
        Ok(())
    }
}
