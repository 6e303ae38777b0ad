//! Mutation log queue.
//!
//! Datatypes hand mutation records to a bounded queue drained by a single
//! background consumer that appends to the write log. The channel is bounded
//! at 10,000 messages; when it fills, producers **block** until the consumer
//! catches up. Mutations are never dropped, and per-(instance, version)
//! producer order is preserved through the single consumer.
//!
//! Shutdown closes intake, lets the consumer drain every pending message,
//! then joins it. Stores must stay open until the drain completes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use tracing::{error, info};

use osprey_common::error::StorageError;
use osprey_common::types::VersionUuid;

use crate::store::WriteLog;

/// Maximum pending mutation records before producers block.
pub const LOG_QUEUE_CAPACITY: usize = 10_000;

/// One mutation record bound for the write log.
#[derive(Debug, Clone)]
pub struct LogMessage {
    pub entry_type: u16,
    pub data: VersionUuid,
    pub version: VersionUuid,
    pub payload: Vec<u8>,
}

pub struct LogQueue {
    tx: Mutex<Option<Sender<LogMessage>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    /// Set at the start of shutdown so intake stops before the drain.
    stopping: AtomicBool,
}

impl LogQueue {
    /// Start the background consumer over the given write log.
    pub fn spawn(log: Arc<dyn WriteLog>) -> Result<Arc<LogQueue>, StorageError> {
        let (tx, rx) = bounded::<LogMessage>(LOG_QUEUE_CAPACITY);
        let handle = std::thread::Builder::new()
            .name("osprey-logqueue".to_string())
            .spawn(move || {
                for msg in rx.iter() {
                    if let Err(e) =
                        log.append(msg.entry_type, msg.data, msg.version, &msg.payload)
                    {
                        // A failed append makes the log stale for that
                        // instance; re-sync from source is the repair path.
                        error!(
                            data = %msg.data,
                            version = %msg.version,
                            entry_type = msg.entry_type,
                            "mutation log append failed: {e}"
                        );
                    }
                }
                info!("mutation log queue drained");
            })?;
        Ok(Arc::new(LogQueue {
            tx: Mutex::new(Some(tx)),
            consumer: Mutex::new(Some(handle)),
            stopping: AtomicBool::new(false),
        }))
    }

    /// Enqueue a mutation record. Blocks while the queue is full.
    pub fn send(&self, msg: LogMessage) -> Result<(), StorageError> {
        if self.stopping.load(Ordering::SeqCst) {
            return Err(StorageError::Corruption(
                "mutation log queue is shut down".to_string(),
            ));
        }
        // Clone the sender out so a blocked send never holds the lock.
        let tx = self.tx.lock().clone();
        match tx {
            Some(tx) => tx.send(msg).map_err(|_| {
                StorageError::Corruption("mutation log queue consumer exited early".to_string())
            }),
            None => Err(StorageError::Corruption(
                "mutation log queue is shut down".to_string(),
            )),
        }
    }

    /// Number of messages waiting in the queue.
    pub fn pending(&self) -> usize {
        self.tx.lock().as_ref().map_or(0, |tx| tx.len())
    }

    /// Stop intake, drain pending messages, and join the consumer.
    /// Idempotent.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        // Dropping the sender closes the channel once in-flight clones are
        // gone; the consumer finishes the backlog and exits.
        drop(self.tx.lock().take());
        if let Some(handle) = self.consumer.lock().take() {
            if handle.join().is_err() {
                error!("mutation log consumer panicked during drain");
            }
        }
    }
}

impl Drop for LogQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
