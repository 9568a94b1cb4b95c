use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::{now_ms, Engine};
use crate::observability::REAPER_ERRORS_TOTAL;

/// How often the compactor checks the WAL growth counter.
const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Background task that physically deletes slots whose hour is over.
/// Readers already hide them, so a slow or failed pass only costs storage.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match engine.sweep(now_ms()).await {
            Ok(0) => {}
            Ok(n) => info!("reaped {n} expired slots"),
            Err(e) => {
                metrics::counter!(REAPER_ERRORS_TOTAL).increment(1);
                warn!("reaper pass failed, retrying next tick: {e}");
            }
        }
    }
}

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SLOT_DURATION_MS;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("spotlight_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn reaper_task_removes_ended_slots() {
        let path = test_wal_path("reaper_task.wal");
        let engine = Arc::new(Engine::new(path).unwrap());

        let now = now_ms();
        engine
            .propose_slot(
                now - 3 * SLOT_DURATION_MS,
                "OLD".into(),
                "long gone".into(),
                None,
                now - 3 * SLOT_DURATION_MS,
            )
            .await
            .unwrap();
        engine
            .propose_slot(now + SLOT_DURATION_MS, "NEXT".into(), "soon".into(), None, now)
            .await
            .unwrap();

        let handle = tokio::spawn(run_reaper(engine.clone(), Duration::from_millis(20)));
        for _ in 0..100 {
            if engine.slot_count().await.unwrap() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();

        assert_eq!(engine.slot_count().await.unwrap(), 1);
    }
}
