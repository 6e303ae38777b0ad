//! Engine registry.
//!
//! An engine is a factory that opens stores from configuration. Engines
//! register once under a unique name; opening dispatches on the `engine` key
//! of a `[store.<alias>]` table. Unknown engine names are configuration
//! errors surfaced at startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use osprey_common::config::StoreConfig;
use osprey_common::error::StorageError;

use crate::filelog::FileLogEngine;
use crate::memstore::MemStoreEngine;
use crate::store::Store;

/// A storage engine: name, semantic version, and store factory.
pub trait Engine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Semantic version of the engine implementation.
    fn version(&self) -> &'static str;

    /// Open a store from configuration. The bool is true when the open
    /// created new backing state rather than finding existing state.
    fn new_store(&self, config: &StoreConfig) -> Result<(Store, bool), StorageError>;
}

static ENGINES: RwLock<BTreeMap<&'static str, Arc<dyn Engine>>> = RwLock::new(BTreeMap::new());

/// Register an engine. Names must be unique process-wide.
pub fn register_engine(engine: Arc<dyn Engine>) -> Result<(), StorageError> {
    let mut engines = ENGINES.write();
    let name = engine.name();
    if engines.contains_key(name) {
        return Err(StorageError::Config(format!(
            "engine {name:?} is already registered"
        )));
    }
    info!(engine = name, version = engine.version(), "registered storage engine");
    engines.insert(name, engine);
    Ok(())
}

/// Register the built-in engines if they are not present yet. Safe to call
/// from multiple initialization paths.
pub fn register_builtin_engines() {
    let mut engines = ENGINES.write();
    if !engines.contains_key("memstore") {
        engines.insert("memstore", Arc::new(MemStoreEngine) as Arc<dyn Engine>);
    }
    if !engines.contains_key("filelog") {
        engines.insert("filelog", Arc::new(FileLogEngine) as Arc<dyn Engine>);
    }
}

/// Registered (name, version) pairs, sorted by name.
pub fn registered_engines() -> Vec<(&'static str, &'static str)> {
    ENGINES
        .read()
        .values()
        .map(|e| (e.name(), e.version()))
        .collect()
}

/// Open a store by dispatching on `config.engine`.
pub fn new_store(config: &StoreConfig) -> Result<(Store, bool), StorageError> {
    let engine = {
        let engines = ENGINES.read();
        engines.get(config.engine.as_str()).cloned()
    };
    match engine {
        Some(engine) => engine.new_store(config),
        None => Err(StorageError::Config(format!(
            "no storage engine named {:?} is registered",
            config.engine
        ))),
    }
}
