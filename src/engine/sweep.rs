use crate::model::Ms;
use crate::observability::SLOTS_REAPED_TOTAL;

use super::{Engine, EngineError};

impl Engine {
    /// Physically delete every slot with `end <= now`. Returns how many were
    /// removed. The whole pass is one WAL record, so the write guard is held
    /// for a single fsync no matter how much has piled up. On a storage
    /// error nothing is removed and the next sweep retries.
    pub async fn sweep(&self, now: Ms) -> Result<usize, EngineError> {
        let mut table = self.store.write().await?;
        let expired = table.ended_by(now);
        let reaped = self.store.delete_many(&mut table, expired).await?;
        if reaped > 0 {
            tracing::debug!("reaped {reaped} slots ended by {now}");
            metrics::counter!(SLOTS_REAPED_TOTAL).increment(reaped as u64);
        }
        Ok(reaped)
    }
}
