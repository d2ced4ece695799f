use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that compacts a tenant's WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

/// One compactor round. Returns true if the WAL was rewritten.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if threshold == 0 || appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(true) => {
            info!("compacted WAL after {appends} appends");
            true
        }
        Ok(false) => {
            debug!("compaction deferred: rows busy");
            false
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::DEFAULT_LOCK_TIMEOUT;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roomlock_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let engine = Engine::new(test_wal_path("threshold.wal"), DEFAULT_LOCK_TIMEOUT).unwrap();
        let (hotel, rt) = (Ulid::new(), Ulid::new());
        engine.create_room_type(rt, hotel, "Single".into()).await.unwrap();
        for i in 0..4 {
            engine.create_room(Ulid::new(), hotel, rt, format!("{i}")).await.unwrap();
        }

        assert!(!compact_if_due(&engine, 10).await);
        assert_eq!(engine.wal_appends_since_compact().await, 5);

        assert!(compact_if_due(&engine, 5).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert_eq!(engine.room_count(), 4);
    }

    #[tokio::test]
    async fn zero_threshold_disables() {
        let engine = Engine::new(test_wal_path("disabled.wal"), DEFAULT_LOCK_TIMEOUT).unwrap();
        engine.create_room_type(Ulid::new(), Ulid::new(), "Single".into()).await.unwrap();
        assert!(!compact_if_due(&engine, 0).await);
    }
}
