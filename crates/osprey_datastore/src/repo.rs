//! Repo metadata: the version DAG plus the table of data instances, with
//! bincode persistence into the metadata store.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::info;

use osprey_common::config::{InstanceIdGen, ServerConfig};
use osprey_common::error::{DatastoreError, StorageError};
use osprey_common::types::{DatatypeName, InstanceId, InstanceName, VersionUuid};
use osprey_storage::context::DataContext;
use osprey_storage::store::{KeyValue, OrderedKeyValueDb};

use crate::dag::VersionDag;

/// Metadata type-key under which the serialized repo lives.
const REPO_TKEY: &[u8] = b"repo";

/// A named, typed collection of data bound to a root version.
///
/// The assigned store and ROI binding of an instance are resolved from its
/// (name, root) and datatype; both are immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataInstance {
    pub name: InstanceName,
    pub id: InstanceId,
    /// Stable UUID naming this instance, e.g. in mutation log file names.
    pub uuid: VersionUuid,
    pub datatype: DatatypeName,
    pub root: VersionUuid,
    /// Annotation instances this data syncs from. Fixed once set.
    pub sync_sources: Vec<InstanceName>,
    /// Datatype-specific creation settings, e.g. a labelsz ROI spec.
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repo {
    dag: VersionDag,
    instances: HashMap<InstanceName, DataInstance>,
    id_gen: InstanceIdGen,
    next_instance_id: u32,
}

impl Repo {
    pub fn new(root: VersionUuid, server: &ServerConfig) -> Self {
        Repo {
            dag: VersionDag::new(root),
            instances: HashMap::new(),
            id_gen: server.instance_id_gen,
            next_instance_id: server.instance_id_start.max(1),
        }
    }

    pub fn dag(&self) -> &VersionDag {
        &self.dag
    }

    pub fn dag_mut(&mut self) -> &mut VersionDag {
        &mut self.dag
    }

    fn allocate_instance_id(&mut self) -> InstanceId {
        match self.id_gen {
            InstanceIdGen::Sequential => {
                let id = InstanceId(self.next_instance_id.max(1));
                self.next_instance_id = id.0 + 1;
                id
            }
            InstanceIdGen::Random => loop {
                let bytes = uuid::Uuid::new_v4();
                let raw = u32::from_be_bytes(bytes.as_bytes()[..4].try_into().unwrap_or([0; 4]));
                let id = InstanceId(raw);
                if id != InstanceId::METADATA && !self.instances.values().any(|d| d.id == id) {
                    return id;
                }
            },
        }
    }

    /// Create a new data instance rooted at the given version.
    pub fn new_data(
        &mut self,
        name: InstanceName,
        datatype: DatatypeName,
        root: VersionUuid,
        properties: BTreeMap<String, String>,
    ) -> Result<&DataInstance, DatastoreError> {
        if !self.dag.contains(root) {
            return Err(DatastoreError::UnknownVersion(root.to_string()));
        }
        if self.instances.contains_key(&name) {
            return Err(DatastoreError::DuplicateInstance(name.to_string()));
        }
        let id = self.allocate_instance_id();
        info!(name = %name, id = %id, datatype = %datatype, "created data instance");
        let instance = DataInstance {
            name: name.clone(),
            id,
            uuid: VersionUuid::random(),
            datatype,
            root,
            sync_sources: Vec::new(),
            properties,
        };
        Ok(self.instances.entry(name).or_insert(instance))
    }

    pub fn data(&self, name: &InstanceName) -> Result<&DataInstance, DatastoreError> {
        self.instances
            .get(name)
            .ok_or_else(|| DatastoreError::UnknownInstance(name.to_string()))
    }

    pub fn instances(&self) -> impl Iterator<Item = &DataInstance> {
        self.instances.values()
    }

    /// Remove an instance from the repo. The caller wipes its stored keys
    /// through the storage manager.
    pub fn delete_data(&mut self, name: &InstanceName) -> Result<DataInstance, DatastoreError> {
        self.instances
            .remove(name)
            .ok_or_else(|| DatastoreError::UnknownInstance(name.to_string()))
    }

    /// Bind the sync sources of an instance. One-shot: sources may not be
    /// changed once set.
    pub fn set_sync(
        &mut self,
        name: &InstanceName,
        sources: Vec<InstanceName>,
    ) -> Result<(), DatastoreError> {
        let instance = self
            .instances
            .get_mut(name)
            .ok_or_else(|| DatastoreError::UnknownInstance(name.to_string()))?;
        if !instance.sync_sources.is_empty() {
            return Err(DatastoreError::SyncAlreadySet);
        }
        instance.sync_sources = sources;
        Ok(())
    }

    /// Persist into the metadata store.
    pub fn save(&self, db: &dyn OrderedKeyValueDb) -> Result<(), StorageError> {
        let bytes =
            bincode::serialize(self).map_err(|e| StorageError::Serialization(e.to_string()))?;
        let ctx = DataContext::metadata();
        db.put(&ctx.encode(REPO_TKEY), &DataContext::frame_value(&bytes))
    }

    /// Load from the metadata store. `Ok(None)` when no repo was saved yet.
    pub fn load(db: &dyn OrderedKeyValueDb) -> Result<Option<Repo>, StorageError> {
        let ctx = DataContext::metadata();
        match db.get(&ctx.encode(REPO_TKEY))? {
            Some(framed) => match DataContext::unframe_value(&framed)? {
                Some(bytes) => {
                    let repo = bincode::deserialize(bytes)
                        .map_err(|e| StorageError::Serialization(e.to_string()))?;
                    Ok(Some(repo))
                }
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    /// Every metadata key, for tests and diagnostics.
    pub fn metadata_keys(db: &dyn OrderedKeyValueDb) -> Result<Vec<Vec<u8>>, StorageError> {
        let ctx = DataContext::metadata();
        let (begin, end) = ctx.instance_span();
        let mut keys = Vec::new();
        let mut visitor = |kv: &KeyValue| {
            keys.push(kv.key.clone());
            Ok(())
        };
        db.process_range(&begin, &end, &mut visitor)?;
        Ok(keys)
    }
}
