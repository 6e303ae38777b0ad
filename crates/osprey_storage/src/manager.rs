//! Backend routing manager.
//!
//! Process-wide singleton with an explicit `initialize`/`close` lifecycle.
//! After initialization all routing state is read-only, so lookups take the
//! read lock only. Stores live in a single arena keyed by alias; every
//! assignment map holds aliases, never store handles.
//!
//! Assignment resolution for a request on data instance `n` at root `r` of
//! datatype `t`: the `(n, r)` instance map wins, then the datatype map,
//! then the default store. Capability requirements are validated here at
//! startup so they never fail at request time.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use osprey_common::config::{Alias, OspreyConfig, ASSIGN_DEFAULT, ASSIGN_METADATA};
use osprey_common::error::StorageError;
use osprey_common::types::{DataSpecifier, DatatypeName, InstanceId, InstanceName, VersionUuid};

use crate::context::DataContext;
use crate::engine;
use crate::graph::GraphStore;
use crate::groupcache::{build_cache, ByteCache, CachedStore};
use crate::store::{Store, WriteLog};

/// Datatype whose store assignment backs the graph store.
const GRAPH_DATATYPE: &str = "labelgraph";

struct Manager {
    stores: HashMap<Alias, Store>,

    default_kv: Alias,
    metadata: Alias,
    default_log: Option<Alias>,

    datatype_store: HashMap<DatatypeName, Alias>,
    instance_store: HashMap<DataSpecifier, Alias>,
    datatype_log: HashMap<DatatypeName, Alias>,
    instance_log: HashMap<DataSpecifier, Alias>,

    groupcache: HashSet<DataSpecifier>,
    cache: Option<Arc<ByteCache>>,

    graph: Arc<GraphStore>,
}

static MANAGER: RwLock<Option<Manager>> = RwLock::new(None);

fn with_manager<T>(f: impl FnOnce(&Manager) -> Result<T, StorageError>) -> Result<T, StorageError> {
    match MANAGER.read().as_ref() {
        Some(manager) => f(manager),
        None => Err(StorageError::NotInitialized),
    }
}

/// Config keys are case-insensitive, so instance assignment lookups
/// normalize the same way config loading does.
fn instance_key(name: &InstanceName, root: VersionUuid) -> DataSpecifier {
    DataSpecifier::new(InstanceName(name.0.to_lowercase()), root)
}

fn datatype_key(datatype: &DatatypeName) -> DatatypeName {
    DatatypeName(datatype.0.to_lowercase())
}

/// Capability failure during startup is a configuration error.
fn startup_capability(err: StorageError, role: &str, alias: &Alias) -> StorageError {
    match err {
        StorageError::CapabilityMismatch { .. } => StorageError::Config(format!(
            "store {alias:?} assigned as {role} lacks the required capability"
        )),
        other => other,
    }
}

/// Open all configured stores and build the routing tables. Returns true
/// when the metadata store was newly created and needs initialization.
pub fn initialize(config: &OspreyConfig) -> Result<bool, StorageError> {
    let mut guard = MANAGER.write();
    if guard.is_some() {
        return Err(StorageError::Config(
            "storage manager is already initialized".to_string(),
        ));
    }
    engine::register_builtin_engines();

    // Open every store, rejecting structural duplicates.
    let mut stores: HashMap<Alias, Store> = HashMap::with_capacity(config.store.len());
    let mut created: HashMap<Alias, bool> = HashMap::new();
    let mut aliases: Vec<&Alias> = config.store.keys().collect();
    aliases.sort();
    for alias in aliases {
        let store_config = &config.store[alias];
        for (existing_alias, existing) in &stores {
            if existing.equal(store_config) {
                return Err(StorageError::Config(format!(
                    "store {alias:?} configuration duplicates store {existing_alias:?}"
                )));
            }
        }
        let (store, was_created) = engine::new_store(store_config)?;
        info!(alias = %alias, "opened store {}", store.describe());
        created.insert(alias.clone(), was_created);
        stores.insert(alias.clone(), store);
    }

    let backend = &config.backend;

    // Default kv store: explicit assignment, or the sole store.
    let (default_kv, created_default) = match backend.default_store() {
        Some(alias) => (alias.clone(), created[alias]),
        None => {
            let mut aliases = stores.keys();
            match (aliases.next(), aliases.next()) {
                (Some(only), None) => {
                    let alias = only.clone();
                    let was_created = created[&alias];
                    (alias, was_created)
                }
                _ => {
                    return Err(StorageError::Config(
                        "either backend.store.default or a single store must be configured"
                            .to_string(),
                    ))
                }
            }
        }
    };
    stores[&default_kv]
        .require_key_value()
        .map_err(|e| startup_capability(e, "default kv store", &default_kv))?;

    // Metadata store: explicit assignment, or the default store.
    let (metadata, created_metadata) = match backend.metadata_store() {
        Some(alias) => (alias.clone(), created[alias]),
        None => (default_kv.clone(), created_default),
    };
    stores[&metadata]
        .require_ordered()
        .map_err(|e| startup_capability(e, "metadata store", &metadata))?;

    // Default write log, if assigned.
    let default_log = match backend.default_log() {
        Some(alias) => {
            stores[alias]
                .require_write_log()
                .map_err(|e| startup_capability(e, "default log", alias))?;
            Some(alias.clone())
        }
        None => None,
    };

    // Per-datatype and per-instance assignments.
    let mut datatype_store = HashMap::new();
    let mut instance_store = HashMap::new();
    for (target, alias) in &backend.store {
        if target == ASSIGN_DEFAULT || target == ASSIGN_METADATA {
            continue;
        }
        stores[alias]
            .require_key_value()
            .map_err(|e| startup_capability(e, "kv store", alias))?;
        match DataSpecifier::parse(target) {
            Some(spec) => {
                instance_store.insert(spec, alias.clone());
            }
            None => {
                datatype_store.insert(DatatypeName(target.clone()), alias.clone());
            }
        }
    }
    let mut datatype_log = HashMap::new();
    let mut instance_log = HashMap::new();
    for (target, alias) in &backend.log {
        if target == ASSIGN_DEFAULT {
            continue;
        }
        stores[alias]
            .require_write_log()
            .map_err(|e| startup_capability(e, "write log", alias))?;
        match DataSpecifier::parse(target) {
            Some(spec) => {
                instance_log.insert(spec, alias.clone());
            }
            None => {
                datatype_log.insert(DatatypeName(target.clone()), alias.clone());
            }
        }
    }

    // Groupcache declarations.
    let groupcache: HashSet<DataSpecifier> = config.groupcache.instance_specs().into_iter().collect();
    let cache = if config.groupcache.enabled() {
        info!(
            gb = config.groupcache.gb,
            instances = groupcache.len(),
            "groupcache enabled"
        );
        Some(build_cache(&config.groupcache))
    } else {
        None
    };

    // Graph store over the labelgraph assignment (default store otherwise).
    let graph_alias = datatype_store
        .get(&DatatypeName::from(GRAPH_DATATYPE))
        .cloned()
        .unwrap_or_else(|| default_kv.clone());
    let graph_db = stores[&graph_alias]
        .require_ordered()
        .map_err(|e| startup_capability(e, "graph store", &graph_alias))?;
    let graph = Arc::new(GraphStore::new(graph_db));

    info!(
        default_kv = %default_kv,
        metadata = %metadata,
        default_log = default_log.as_deref().unwrap_or("<none>"),
        "storage manager initialized"
    );
    *guard = Some(Manager {
        stores,
        default_kv,
        metadata,
        default_log,
        datatype_store,
        instance_store,
        datatype_log,
        instance_log,
        groupcache,
        cache,
        graph,
    });
    Ok(created_metadata)
}

/// Close all stores and reset the manager. Callers must drain mutation log
/// queues first; an in-flight append completes before its store closes
/// because `close` waits on each store's own synchronization.
pub fn close() {
    let mut guard = MANAGER.write();
    if let Some(manager) = guard.take() {
        for (alias, store) in &manager.stores {
            info!(alias = %alias, "closing store {}", store.describe());
            store.close();
        }
    }
}

pub fn is_initialized() -> bool {
    MANAGER.read().is_some()
}

/// All store aliases, sorted.
pub fn store_aliases() -> Result<Vec<Alias>, StorageError> {
    with_manager(|m| {
        let mut aliases: Vec<Alias> = m.stores.keys().cloned().collect();
        aliases.sort();
        Ok(aliases)
    })
}

/// A store by its configuration alias.
pub fn store_by_alias(alias: &str) -> Result<Store, StorageError> {
    with_manager(|m| {
        m.stores.get(alias).cloned().ok_or_else(|| {
            StorageError::Config(format!("no store with alias {alias:?} is configured"))
        })
    })
}

pub fn default_kv_store() -> Result<Store, StorageError> {
    with_manager(|m| Ok(m.stores[&m.default_kv].clone()))
}

/// The metadata store, always ordered (validated at startup).
pub fn metadata_store() -> Result<Arc<dyn crate::store::OrderedKeyValueDb>, StorageError> {
    with_manager(|m| m.stores[&m.metadata].require_ordered())
}

/// The default write log. Unset is an error for callers that require one.
pub fn default_log() -> Result<Arc<dyn WriteLog>, StorageError> {
    with_manager(|m| match &m.default_log {
        Some(alias) => m.stores[alias].require_write_log(),
        None => Err(StorageError::Config(
            "no default write log has been configured".to_string(),
        )),
    })
}

/// The store assigned to a data instance, wrapped with the read-through
/// cache when the instance is declared immutable-for-GET.
pub fn assigned_store(
    name: &InstanceName,
    root: VersionUuid,
    datatype: &DatatypeName,
) -> Result<Store, StorageError> {
    with_manager(|m| {
        let spec = instance_key(name, root);
        let alias = m
            .instance_store
            .get(&spec)
            .or_else(|| m.datatype_store.get(&datatype_key(datatype)))
            .unwrap_or(&m.default_kv);
        let store = m.stores[alias].clone();

        if m.groupcache.contains(&spec) {
            if let (Some(cache), Some(ordered)) = (m.cache.clone(), store.ordered_key_value()) {
                debug!(instance = %spec, "returning groupcache-wrapped store");
                return Ok(Store::OrderedKeyValue(Arc::new(CachedStore::new(
                    ordered, cache,
                ))));
            }
        }
        Ok(store)
    })
}

/// The write log assigned to a data instance. `Ok(None)` when no log is
/// assigned anywhere; the instance then runs without a mutation log.
pub fn assigned_log(
    name: &InstanceName,
    root: VersionUuid,
    datatype: &DatatypeName,
) -> Result<Option<Arc<dyn WriteLog>>, StorageError> {
    with_manager(|m| {
        let spec = instance_key(name, root);
        let alias = m
            .instance_log
            .get(&spec)
            .or_else(|| m.datatype_log.get(&datatype_key(datatype)))
            .or(m.default_log.as_ref());
        match alias {
            Some(alias) => m.stores[alias].require_write_log().map(Some),
            None => Ok(None),
        }
    })
}

/// The graph store built at initialization.
pub fn graph_store() -> Result<Arc<GraphStore>, StorageError> {
    with_manager(|m| Ok(m.graph.clone()))
}

/// Remove every stored key of a data instance from its assigned store.
pub fn delete_data_instance(
    name: &InstanceName,
    root: VersionUuid,
    datatype: &DatatypeName,
    instance: InstanceId,
) -> Result<(), StorageError> {
    let store = assigned_store(name, root, datatype)?;
    let db = store.require_ordered()?;
    info!(instance = %instance, name = %name, "deleting all keys of data instance");
    DataContext::new(instance, osprey_common::types::VersionId::UNVERSIONED).delete_all(db.as_ref())
}
