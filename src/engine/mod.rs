mod admission;
mod conflict;
mod error;
mod expiry;
mod queries;
mod store;
mod sweep;

pub use conflict::{find_conflict, now_ms};
pub use error::EngineError;
pub use expiry::is_live;
pub use store::SlotStore;

use std::io;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// The scheduling engine: admission, active-slot resolution and reaping over
/// a single [`SlotStore`].
pub struct Engine {
    store: SlotStore,
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        Self::with_timeout(wal_path, DEFAULT_STORE_TIMEOUT)
    }

    pub fn with_timeout(wal_path: PathBuf, store_timeout: Duration) -> io::Result<Self> {
        Ok(Self {
            store: SlotStore::open(wal_path, store_timeout)?,
        })
    }

    pub fn store(&self) -> &SlotStore {
        &self.store
    }

    pub async fn slot_count(&self) -> Result<usize, EngineError> {
        Ok(self.store.read().await?.len())
    }

    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        self.store.compact().await
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.store.appends_since_compact().await
    }
}
