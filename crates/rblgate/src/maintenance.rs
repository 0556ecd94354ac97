use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use rg_cache::TieredCache;

const SWEEP_INTERVAL: Duration = Duration::from_secs(300);
const STATS_INTERVAL: Duration = Duration::from_secs(3600);

/// Drop expired cache entries every 5 minutes until shutdown fires.
pub async fn run_cache_sweep(cache: Arc<TieredCache>, mut shutdown: watch::Receiver<bool>) {
    info!("Cache sweep task started (runs every 5 minutes)");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(SWEEP_INTERVAL) => {
                match cache.clean_expired().await {
                    Ok(0) => {}
                    Ok(count) => info!("Removed {} expired cache entries", count),
                    Err(e) => warn!("Cache sweep failed: {}", e),
                }
            }
            _ = shutdown.changed() => {
                info!("Cache sweep task stopping");
                return;
            }
        }
    }
}

/// Log a cache statistics snapshot every hour until shutdown fires.
pub async fn run_stats_snapshot(cache: Arc<TieredCache>, mut shutdown: watch::Receiver<bool>) {
    info!("Cache stats task started (runs hourly)");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(STATS_INTERVAL) => {
                match cache.stats() {
                    Ok(stats) => info!(
                        "Cache stats: {} total ({} valid, {} expired): {} listed, {} clean, {} errors",
                        stats.total, stats.valid, stats.expired,
                        stats.listed, stats.not_listed, stats.errors
                    ),
                    Err(e) => warn!("Cache stats snapshot failed: {}", e),
                }
            }
            _ = shutdown.changed() => {
                info!("Cache stats task stopping");
                return;
            }
        }
    }
}
