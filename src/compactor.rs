use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Background task that rewrites a tenant's WAL once enough events have
/// accumulated since the last rewrite. A threshold of zero disables it.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    if threshold == 0 {
        debug!(tenant = %engine.tenant(), "WAL compaction disabled");
        return;
    }
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

/// One compaction check. Returns whether the WAL was rewritten.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!(tenant = %engine.tenant(), appends, "compacted WAL");
            true
        }
        Err(e) => {
            warn!(tenant = %engine.tenant(), "WAL compaction failed: {e}");
            false
        }
    }
}
