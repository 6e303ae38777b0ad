//! Graph store: vertex and edge operations layered over an ordered
//! key-value store.
//!
//! Type-keys carry a tag byte, the vertex id(s) in big-endian, and bincode
//! weights as values. Edges are undirected; the smaller vertex id always
//! comes first in the key so an edge has exactly one physical form.

use std::sync::Arc;

use osprey_common::error::StorageError;

use crate::context::DataContext;
use crate::store::{KeyValue, OrderedKeyValueDb};

const TAG_VERTEX: u8 = b'v';
const TAG_EDGE: u8 = b'e';

fn vertex_key(id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(TAG_VERTEX);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn edge_key(a: u64, b: u64) -> Vec<u8> {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut key = Vec::with_capacity(17);
    key.push(TAG_EDGE);
    key.extend_from_slice(&lo.to_be_bytes());
    key.extend_from_slice(&hi.to_be_bytes());
    key
}

/// Graph operations bound to one ordered store.
pub struct GraphStore {
    db: Arc<dyn OrderedKeyValueDb>,
}

impl GraphStore {
    pub fn new(db: Arc<dyn OrderedKeyValueDb>) -> Self {
        GraphStore { db }
    }

    pub fn set_vertex(&self, ctx: &DataContext, id: u64, weight: f64) -> Result<(), StorageError> {
        let value = bincode::serialize(&weight)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.db.put(&ctx.encode(&vertex_key(id)), &value)
    }

    pub fn get_vertex(&self, ctx: &DataContext, id: u64) -> Result<Option<f64>, StorageError> {
        match self.db.get(&ctx.encode(&vertex_key(id)))? {
            Some(bytes) => {
                let weight = bincode::deserialize(&bytes)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(Some(weight))
            }
            None => Ok(None),
        }
    }

    pub fn remove_vertex(&self, ctx: &DataContext, id: u64) -> Result<(), StorageError> {
        self.db.delete(&ctx.encode(&vertex_key(id)))
    }

    pub fn set_edge(
        &self,
        ctx: &DataContext,
        a: u64,
        b: u64,
        weight: f64,
    ) -> Result<(), StorageError> {
        let value = bincode::serialize(&weight)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.db.put(&ctx.encode(&edge_key(a, b)), &value)
    }

    pub fn get_edge(&self, ctx: &DataContext, a: u64, b: u64) -> Result<Option<f64>, StorageError> {
        match self.db.get(&ctx.encode(&edge_key(a, b)))? {
            Some(bytes) => {
                let weight = bincode::deserialize(&bytes)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(Some(weight))
            }
            None => Ok(None),
        }
    }

    pub fn remove_edge(&self, ctx: &DataContext, a: u64, b: u64) -> Result<(), StorageError> {
        self.db.delete(&ctx.encode(&edge_key(a, b)))
    }

    /// All vertex ids of the instance, ascending.
    pub fn vertices(&self, ctx: &DataContext) -> Result<Vec<u64>, StorageError> {
        let (begin, end) = ctx.range_span(&vertex_key(0), &vertex_key(u64::MAX));
        let mut ids = Vec::new();
        let mut visitor = |kv: &KeyValue| {
            let (tkey, _) = ctx.decode(&kv.key)?;
            if tkey.len() == 9 && tkey[0] == TAG_VERTEX {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&tkey[1..9]);
                ids.push(u64::from_be_bytes(raw));
            }
            Ok(())
        };
        self.db.process_range(&begin, &end, &mut visitor)?;
        Ok(ids)
    }
}
