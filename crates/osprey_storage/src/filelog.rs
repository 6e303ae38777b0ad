//! File-based append-only write log engine.
//!
//! One file per (data uuid, version uuid), named `<data>-<version>` under
//! the configured directory. Record frame on disk, all integers
//! little-endian:
//!
//! ```text
//! +------+----------+-----------+
//! | u16  |   u32    |  payload  |
//! | type | length N |  N bytes  |
//! +------+----------+-----------+
//! ```
//!
//! Files are opened create+append and every record is synced before
//! `append` returns. A per-file mutex holds across the header and payload
//! writes so frames are never interleaved; there is no global log lock.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{info, warn};

use osprey_common::config::StoreConfig;
use osprey_common::error::StorageError;
use osprey_common::types::VersionUuid;

use crate::engine::Engine;
use crate::store::{Store, StoreCore, WriteLog};

pub const ENGINE_NAME: &str = "filelog";

const HEADER_LEN: usize = 6;

fn log_file_name(data: VersionUuid, version: VersionUuid) -> String {
    format!("{data}-{version}")
}

/// Resolve the directory from config: required `path`, optionally relocated
/// under the OS temp dir when `testing = true`.
fn parse_config(config: &StoreConfig) -> Result<PathBuf, StorageError> {
    let path = config.require_str("path")?;
    let testing = config.param_bool("testing").unwrap_or(false);
    if testing {
        Ok(std::env::temp_dir().join(path))
    } else {
        Ok(PathBuf::from(path))
    }
}

struct LogFile {
    file: File,
}

impl LogFile {
    fn append_record(&mut self, entry_type: u16, payload: &[u8]) -> std::io::Result<()> {
        let mut header = [0u8; HEADER_LEN];
        header[..2].copy_from_slice(&entry_type.to_le_bytes());
        header[2..].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        self.file.write_all(&header)?;
        self.file.write_all(payload)?;
        // Durability contract: the record is on stable storage before
        // append returns.
        self.file.sync_data()
    }
}

pub struct FileLog {
    path: PathBuf,
    files: DashMap<String, Arc<Mutex<LogFile>>>,
}

impl FileLog {
    /// Open (creating if needed) the log directory for a configuration.
    pub fn open(config: &StoreConfig) -> Result<(Arc<FileLog>, bool), StorageError> {
        let path = parse_config(config)?;
        let created = !path.exists();
        if created {
            info!("log directory {path:?} not found, creating");
            fs::create_dir_all(&path)?;
        }
        Ok((
            Arc::new(FileLog {
                path,
                files: DashMap::new(),
            }),
            created,
        ))
    }

    fn log_file(&self, data: VersionUuid, version: VersionUuid) -> Result<Arc<Mutex<LogFile>>, StorageError> {
        let name = log_file_name(data, version);
        if let Some(fl) = self.files.get(&name) {
            return Ok(fl.clone());
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.join(&name))?;
        let entry = self
            .files
            .entry(name)
            .or_insert_with(|| Arc::new(Mutex::new(LogFile { file })));
        Ok(entry.clone())
    }

    /// Read back the full framed record sequence of one log file. Test and
    /// recovery-tooling helper; the serving path never reads logs.
    pub fn read_all(
        &self,
        data: VersionUuid,
        version: VersionUuid,
    ) -> Result<Vec<(u16, Vec<u8>)>, StorageError> {
        let name = log_file_name(data, version);
        let mut file = File::open(self.path.join(&name))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let mut records = Vec::new();
        let mut at = 0usize;
        while at < bytes.len() {
            if bytes.len() - at < HEADER_LEN {
                return Err(StorageError::Corruption(format!(
                    "log file {name} has {} trailing bytes, too short for a record header",
                    bytes.len() - at
                )));
            }
            let entry_type = u16::from_le_bytes([bytes[at], bytes[at + 1]]);
            let len =
                u32::from_le_bytes([bytes[at + 2], bytes[at + 3], bytes[at + 4], bytes[at + 5]])
                    as usize;
            at += HEADER_LEN;
            if bytes.len() - at < len {
                return Err(StorageError::Corruption(format!(
                    "log file {name} record claims {len} payload bytes but only {} remain",
                    bytes.len() - at
                )));
            }
            records.push((entry_type, bytes[at..at + len].to_vec()));
            at += len;
        }
        Ok(records)
    }
}

impl StoreCore for FileLog {
    fn engine_name(&self) -> &'static str {
        ENGINE_NAME
    }

    fn describe(&self) -> String {
        format!("write logs @ {:?}", self.path)
    }

    fn close(&self) {
        for entry in self.files.iter() {
            let fl = entry.value().lock();
            if let Err(e) = fl.file.sync_all() {
                warn!("error syncing log file {:?} on close: {e}", entry.key());
            }
        }
        self.files.clear();
    }

    fn equal(&self, config: &StoreConfig) -> bool {
        match parse_config(config) {
            Ok(path) => path == self.path,
            Err(_) => false,
        }
    }
}

impl WriteLog for FileLog {
    fn append(
        &self,
        entry_type: u16,
        data: VersionUuid,
        version: VersionUuid,
        payload: &[u8],
    ) -> Result<(), StorageError> {
        let fl = self.log_file(data, version)?;
        let mut fl = fl.lock();
        fl.append_record(entry_type, payload)?;
        Ok(())
    }
}

/// Factory for [`FileLog`].
pub struct FileLogEngine;

impl Engine for FileLogEngine {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    fn version(&self) -> &'static str {
        "0.1.0"
    }

    fn new_store(&self, config: &StoreConfig) -> Result<(Store, bool), StorageError> {
        let (log, created) = FileLog::open(config)?;
        Ok((Store::WriteLog(log), created))
    }
}

/// Remove a (testing) log directory. Counterpart of the Go testable-engine
/// cleanup; used by integration tests.
pub fn delete_log_dir(config: &StoreConfig) -> Result<(), StorageError> {
    let path = parse_config(config)?;
    if path.exists() {
        fs::remove_dir_all(&path)?;
    }
    Ok(())
}
