//! Recognition worker pool
//!
//! Holds a fixed number of interchangeable engines. Membership only ever
//! changes wholesale: the old set is fully terminated before a new one is
//! created, and a new set is published only once every member has loaded.

use futures_util::future::join_all;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::ocr::{EngineFactory, RecognitionEngine};
use crate::error::{Result, ScanError};

/// Pool of recognition engines sized by the worker count
pub struct WorkerPool {
    factory: Arc<dyn EngineFactory>,
    language: String,
    /// Serializes initialize / resize / terminate
    op_lock: Mutex<()>,
    members: RwLock<Vec<Arc<dyn RecognitionEngine>>>,
}

impl WorkerPool {
    pub fn new(factory: Arc<dyn EngineFactory>, language: impl Into<String>) -> Self {
        Self {
            factory,
            language: language.into(),
            op_lock: Mutex::new(()),
            members: RwLock::new(Vec::new()),
        }
    }

    /// Replace the pool with `count` fresh engines.
    ///
    /// On failure every engine created by this attempt is terminated and the
    /// pool is left empty.
    pub async fn initialize(&self, count: usize) -> Result<()> {
        let _op = self.op_lock.lock().await;
        self.initialize_locked(count).await
    }

    /// Same as `terminate` followed by `initialize`, as one serialized operation
    pub async fn resize(&self, count: usize) -> Result<()> {
        let _op = self.op_lock.lock().await;
        info!(worker_count = count, "Resizing worker pool");
        self.initialize_locked(count).await
    }

    /// Terminate every member; a no-op on an empty pool
    pub async fn terminate(&self) {
        let _op = self.op_lock.lock().await;
        self.terminate_locked().await;
    }

    /// Number of live members
    pub fn size(&self) -> usize {
        self.members.read().len()
    }

    /// Snapshot of the current members for one dispatch
    pub fn workers(&self) -> Vec<Arc<dyn RecognitionEngine>> {
        self.members.read().clone()
    }

    async fn initialize_locked(&self, count: usize) -> Result<()> {
        if count == 0 {
            return Err(ScanError::config("worker count must be at least 1"));
        }

        self.terminate_locked().await;

        debug!(worker_count = count, language = %self.language, "Creating recognition workers");
        let attempts = join_all((0..count).map(|_| self.factory.create(&self.language))).await;

        let mut created = Vec::with_capacity(count);
        let mut first_error = None;
        for attempt in attempts {
            match attempt {
                Ok(engine) => created.push(engine),
                Err(e) => {
                    error!("Failed to create recognition worker: {}", e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            join_all(created.iter().map(|engine| engine.terminate())).await;
            return Err(match e {
                ScanError::PoolInit(msg) => ScanError::PoolInit(msg),
                other => ScanError::pool_init(other.to_string()),
            });
        }

        *self.members.write() = created;
        info!(worker_count = count, "Initialized recognition workers");
        Ok(())
    }

    async fn terminate_locked(&self) {
        let members = std::mem::take(&mut *self.members.write());
        if members.is_empty() {
            return;
        }

        join_all(members.iter().map(|engine| engine.terminate())).await;
        info!(worker_count = members.len(), "Terminated recognition workers");
    }
}
