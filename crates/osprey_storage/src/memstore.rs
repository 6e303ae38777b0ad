//! In-memory ordered key-value engine.
//!
//! A `BTreeMap` behind a readers-writer lock. Range visitors run under the
//! read lock, so a scan observes a stable snapshot for its entire duration
//! and concurrent writers wait. This engine backs tests and small
//! deployments; heavier embedded backends plug in through the same
//! [`Engine`] contract.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use osprey_common::config::StoreConfig;
use osprey_common::error::StorageError;

use crate::engine::Engine;
use crate::store::{KeyValue, KeyValueDb, OrderedKeyValueDb, RangeVisitor, Store, StoreCore};

pub const ENGINE_NAME: &str = "memstore";

pub struct MemStore {
    config: StoreConfig,
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemStore {
    pub fn new(config: StoreConfig) -> Self {
        MemStore {
            config,
            map: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of stored keys. Test observability.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl StoreCore for MemStore {
    fn engine_name(&self) -> &'static str {
        ENGINE_NAME
    }

    fn describe(&self) -> String {
        format!("memstore [{} keys]", self.map.read().len())
    }

    fn close(&self) {
        debug!("closing memstore ({} keys)", self.map.read().len());
    }

    fn equal(&self, config: &StoreConfig) -> bool {
        self.config == *config
    }
}

impl KeyValueDb for MemStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        self.map.write().remove(key);
        Ok(())
    }
}

impl OrderedKeyValueDb for MemStore {
    fn process_range(
        &self,
        begin: &[u8],
        end: &[u8],
        visitor: &mut RangeVisitor<'_>,
    ) -> Result<(), StorageError> {
        if begin > end {
            return Ok(());
        }
        let map = self.map.read();
        for (key, value) in map.range::<[u8], _>((Bound::Included(begin), Bound::Included(end))) {
            let kv = KeyValue {
                key: key.clone(),
                value: value.clone(),
            };
            visitor(&kv)?;
        }
        Ok(())
    }

    fn delete_range(&self, begin: &[u8], end: &[u8]) -> Result<(), StorageError> {
        if begin > end {
            return Ok(());
        }
        let mut map = self.map.write();
        let doomed: Vec<Vec<u8>> = map
            .range::<[u8], _>((Bound::Included(begin), Bound::Included(end)))
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            map.remove(&key);
        }
        Ok(())
    }
}

/// Factory for [`MemStore`].
pub struct MemStoreEngine;

impl Engine for MemStoreEngine {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    fn version(&self) -> &'static str {
        "0.1.0"
    }

    fn new_store(&self, config: &StoreConfig) -> Result<(Store, bool), StorageError> {
        let store = Arc::new(MemStore::new(config.clone()));
        // Purely in-memory, so every open creates fresh state.
        Ok((Store::OrderedKeyValue(store), true))
    }
}
