use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::WalStore;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task: compact the journal whenever it has grown by `threshold`
/// appends since the last compaction. Exits when `shutdown` fires.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.cancelled() => {
                debug!("compactor stopping");
                return;
            }
        }
        let appends = store.appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match store.compact().await {
            Ok(()) => info!("compacted journal after {appends} appends"),
            Err(e) => warn!("journal compaction failed: {e}"),
        }
    }
}
