//! TOML server configuration.
//!
//! Section keys are case-insensitive: known camelCase spellings are accepted
//! via serde aliases and all assignment-map keys (backend targets, store
//! aliases, groupcache instances) are normalized to lowercase on load.
//!
//! Parse failures are configuration errors and fatal at startup; there is no
//! fall-back to defaults for a config file that exists but does not parse.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::types::DataSpecifier;

/// Store alias as written in the configuration, e.g. `"raid6"`.
pub type Alias = String;

/// Assignment key in a backend map: `"default"`, `"metadata"`, a datatype
/// name, or `"<name>:<uuid>"` for a single data instance.
pub const ASSIGN_DEFAULT: &str = "default";
pub const ASSIGN_METADATA: &str = "metadata";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OspreyConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    /// Groupcache settings; `[cache]` is accepted as a legacy alias.
    #[serde(default, alias = "cache")]
    pub groupcache: GroupcacheConfig,
    /// `[store.<alias>]` tables.
    #[serde(default)]
    pub store: HashMap<Alias, StoreConfig>,
}

impl OspreyConfig {
    /// Parse from TOML text, normalize map keys, and validate references.
    pub fn from_toml(text: &str) -> Result<Self, StorageError> {
        let mut config: OspreyConfig = toml::from_str(text)
            .map_err(|e| StorageError::Config(format!("bad TOML config: {e}")))?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, StorageError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn to_toml_pretty(&self) -> Result<String, StorageError> {
        toml::to_string_pretty(self).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    /// Lowercase all assignment-map keys and store aliases.
    fn normalize(&mut self) {
        self.backend.store = lowercase_keys(std::mem::take(&mut self.backend.store));
        self.backend.log = lowercase_keys(std::mem::take(&mut self.backend.log));
        self.store = lowercase_keys(std::mem::take(&mut self.store));
        for alias in self.backend.store.values_mut() {
            *alias = alias.to_lowercase();
        }
        for alias in self.backend.log.values_mut() {
            *alias = alias.to_lowercase();
        }
        for inst in &mut self.groupcache.instances {
            *inst = inst.to_lowercase();
        }
    }

    /// Reject assignments to undeclared aliases and malformed instance
    /// specifiers before any store is opened.
    fn validate(&self) -> Result<(), StorageError> {
        for (target, alias) in self.backend.store.iter().chain(self.backend.log.iter()) {
            if !self.store.contains_key(alias) {
                return Err(StorageError::Config(format!(
                    "backend assignment {target:?} -> {alias:?} references an undeclared store"
                )));
            }
            if target.contains(':') && DataSpecifier::parse(target).is_none() {
                return Err(StorageError::Config(format!(
                    "bad backend assignment key {target:?}, expected \"<name>:<uuid>\""
                )));
            }
        }
        for inst in &self.groupcache.instances {
            if DataSpecifier::parse(inst).is_none() {
                return Err(StorageError::Config(format!(
                    "bad groupcache instance {inst:?}, expected \"<name>:<uuid>\""
                )));
            }
        }
        Ok(())
    }
}

fn lowercase_keys<V>(map: HashMap<String, V>) -> HashMap<String, V> {
    map.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect()
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default, alias = "httpAddress")]
    pub http_address: String,
    #[serde(default, alias = "rpcAddress")]
    pub rpc_address: String,
    /// Directory of the bundled web client, if any.
    #[serde(default, alias = "webClient")]
    pub web_client: String,
    /// Operator note surfaced in server info.
    #[serde(default)]
    pub note: String,
    /// How new data-instance ids are generated.
    #[serde(default)]
    pub instance_id_gen: InstanceIdGen,
    /// First id handed out by the sequential generator.
    #[serde(default = "default_instance_id_start")]
    pub instance_id_start: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_address: String::new(),
            rpc_address: String::new(),
            web_client: String::new(),
            note: String::new(),
            instance_id_gen: InstanceIdGen::default(),
            instance_id_start: default_instance_id_start(),
        }
    }
}

fn default_instance_id_start() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceIdGen {
    #[default]
    Sequential,
    Random,
}

/// `[backend]` section: maps from assignment key to store alias.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Key-value store assignments (`default`, `metadata`, datatype, or
    /// `"<name>:<uuid>"`).
    #[serde(default)]
    pub store: HashMap<String, Alias>,
    /// Write-log assignments (`default`, datatype, or `"<name>:<uuid>"`).
    #[serde(default)]
    pub log: HashMap<String, Alias>,
}

impl BackendConfig {
    pub fn default_store(&self) -> Option<&Alias> {
        self.store.get(ASSIGN_DEFAULT)
    }

    pub fn metadata_store(&self) -> Option<&Alias> {
        self.store.get(ASSIGN_METADATA)
    }

    pub fn default_log(&self) -> Option<&Alias> {
        self.log.get(ASSIGN_DEFAULT)
    }
}

/// One `[store.<alias>]` table: the engine name plus engine-specific keys
/// kept as raw TOML so each engine parses its own settings.
///
/// Structural equality over (engine, params) backs duplicate detection at
/// startup and `Store::equal`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub engine: String,
    #[serde(flatten)]
    pub params: toml::value::Table,
}

impl StoreConfig {
    pub fn new(engine: &str) -> Self {
        StoreConfig {
            engine: engine.to_string(),
            params: toml::value::Table::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: toml::Value) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    pub fn param_bool(&self, key: &str) -> Option<bool> {
        self.params.get(key).and_then(|v| v.as_bool())
    }

    pub fn param_int(&self, key: &str) -> Option<i64> {
        self.params.get(key).and_then(|v| v.as_integer())
    }

    /// Required string parameter; missing or mistyped is a config error.
    pub fn require_str(&self, key: &str) -> Result<&str, StorageError> {
        self.param_str(key).ok_or_else(|| {
            StorageError::Config(format!(
                "{:?} must be specified as a string for engine {:?}",
                key, self.engine
            ))
        })
    }
}

/// `[groupcache]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupcacheConfig {
    /// Cache budget in GiB; 0 disables the cache entirely.
    #[serde(default)]
    pub gb: u64,
    /// This node's groupcache address (reserved for the distributed form).
    #[serde(default)]
    pub host: String,
    /// Peer addresses (reserved for the distributed form).
    #[serde(default)]
    pub peers: Vec<String>,
    /// Data instances (`"<name>:<uuid>"`) declared immutable-for-GET whose
    /// reads go through the cache.
    #[serde(default)]
    pub instances: Vec<String>,
}

impl GroupcacheConfig {
    pub fn enabled(&self) -> bool {
        self.gb > 0 && !self.instances.is_empty()
    }

    /// Parsed instance specifiers. Validated at config load, so this does
    /// not fail after `OspreyConfig::from_toml`.
    pub fn instance_specs(&self) -> Vec<DataSpecifier> {
        self.instances
            .iter()
            .filter_map(|s| DataSpecifier::parse(s))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[server]
httpAddress = ":8000"
rpcAddress = ":8001"
note = "test node"
instance_id_gen = "sequential"
instance_id_start = 100

[backend.store]
default = "Main"
metadata = "main"
labelsz = "fast"

[backend.log]
default = "mutlog"

[store.main]
engine = "memstore"

[store.fast]
engine = "memstore"
testing = true

[store.mutlog]
engine = "filelog"
path = "osprey-test-log"
testing = true
"#;

    #[test]
    fn test_parse_and_normalize() {
        let c = OspreyConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(c.server.http_address, ":8000");
        assert_eq!(c.server.instance_id_start, 100);
        assert_eq!(c.server.instance_id_gen, InstanceIdGen::Sequential);
        // "Main" normalized to lowercase and resolvable.
        assert_eq!(c.backend.default_store().unwrap(), "main");
        assert_eq!(c.backend.metadata_store().unwrap(), "main");
        assert_eq!(c.backend.default_log().unwrap(), "mutlog");
        assert_eq!(c.store["mutlog"].engine, "filelog");
        assert_eq!(c.store["mutlog"].param_str("path"), Some("osprey-test-log"));
        assert_eq!(c.store["fast"].param_bool("testing"), Some(true));
    }

    #[test]
    fn test_unresolved_alias_rejected() {
        let bad = r#"
[backend.store]
default = "nope"

[store.main]
engine = "memstore"
"#;
        let err = OspreyConfig::from_toml(bad).unwrap_err();
        assert!(matches!(err, StorageError::Config(_)));
    }

    #[test]
    fn test_store_config_equality() {
        let a = StoreConfig::new("memstore").with_param("path", toml::Value::String("x".into()));
        let b = StoreConfig::new("memstore").with_param("path", toml::Value::String("x".into()));
        let c = StoreConfig::new("memstore").with_param("path", toml::Value::String("y".into()));
        assert_eq!(a, b);
        assert_eq!(b, a);
        assert_ne!(a, c);
    }

    #[test]
    fn test_bad_instance_specifier_rejected() {
        let bad = r#"
[groupcache]
gb = 1
instances = ["not-a-spec"]
"#;
        assert!(OspreyConfig::from_toml(bad).is_err());
    }
}
