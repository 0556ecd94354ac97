mod config;
mod maintenance;
mod supervisor;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use signal_hook::consts::SIGHUP;
use signal_hook_tokio::Signals;
use tokio::sync::{watch, RwLock};
use tokio_stream::StreamExt;
use tracing::{error, info};

use rg_cache::{CacheStore, MemoryCache, TieredCache};
use rg_custom::CustomRblStore;
use rg_dns::DnsClient;
use rg_rbl::{sources, AggregateExecutor, RblResolver, ZoneRegistry};
use rg_server::logging::QueryLogger;
use rg_server::{server, ServerState, SharedServerState};

use config::AppConfig;
use supervisor::{spawn_supervised, ServicePriority};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "rblgate.json".to_string());

    let config = AppConfig::load(Path::new(&config_path))?;

    // RUST_LOG wins; otherwise the configured log level applies
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.env_filter().parse().expect("valid filter")),
        )
        .init();

    info!("rblgate starting...");
    if Path::new(&config_path).exists() {
        info!("Config loaded from {}", config_path);
    } else {
        info!("No config file at {}, using defaults", config_path);
    }

    // ── Durable stores ─────────────────────────────────────────────────

    let cache_store = CacheStore::open(&config.database_path)?;
    let custom_store = CustomRblStore::open(&config.database_path)?;
    info!("Durable store opened at {}", config.database_path);

    let memory = config
        .memory_cache
        .as_ref()
        .filter(|m| m.enabled)
        .map(|m| MemoryCache::new(m.max_entries));
    if memory.is_none() {
        info!("Memory cache tier disabled, serving from the durable tier only");
    }
    let cache = Arc::new(TieredCache::new(cache_store, memory));

    // ── Zone data ──────────────────────────────────────────────────────

    let registry = Arc::new(build_registry(&config, &custom_store)?);
    info!(
        "Zone registry: {} RBLs, {} aggregate zones, custom zone {}",
        registry.rbls().len(),
        registry.aggregates().len(),
        registry.custom_zone().unwrap_or("disabled"),
    );

    // ── Resolver wiring ────────────────────────────────────────────────

    let client = Arc::new(DnsClient::new(
        &config.upstream_resolver,
        config.upstream_timeout_ms,
    )?);
    let resolver = Arc::new(RblResolver::new(
        client.clone(),
        cache.clone(),
        Duration::from_millis(config.upstream_timeout_ms),
    ));
    let aggregate = Arc::new(AggregateExecutor::new(
        resolver.clone(),
        Duration::from_millis(config.aggregate_timeout_ms),
    ));

    let query_logger = if config.query_log_path.is_empty() {
        None
    } else {
        Some(QueryLogger::new(&config.query_log_path))
    };

    let state: SharedServerState = Arc::new(RwLock::new(ServerState {
        registry,
        resolver,
        aggregate,
        custom: custom_store.clone(),
        cache: cache.clone(),
        client,
        query_logger,
    }));

    // ── Listeners ──────────────────────────────────────────────────────

    let addr: SocketAddr = config.listen_addr().parse()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let udp_handle = {
        let state = state.clone();
        let shutdown = shutdown_rx.clone();
        spawn_supervised("dns-udp", ServicePriority::Critical, move || {
            let state = state.clone();
            let shutdown = shutdown.clone();
            async move { server::run_udp_server(addr, state, shutdown).await }
        })
    };

    let tcp_handle = {
        let state = state.clone();
        let shutdown = shutdown_rx.clone();
        spawn_supervised("dns-tcp", ServicePriority::Critical, move || {
            let state = state.clone();
            let shutdown = shutdown.clone();
            async move { server::run_tcp_server(addr, state, shutdown).await }
        })
    };

    // ── Background maintenance ─────────────────────────────────────────

    {
        let cache = cache.clone();
        let shutdown = shutdown_rx.clone();
        spawn_supervised("cache-sweep", ServicePriority::Background, move || {
            let cache = cache.clone();
            let shutdown = shutdown.clone();
            async move {
                maintenance::run_cache_sweep(cache, shutdown).await;
                Ok(())
            }
        });
    }
    {
        let cache = cache.clone();
        let shutdown = shutdown_rx.clone();
        spawn_supervised("cache-stats", ServicePriority::Background, move || {
            let cache = cache.clone();
            let shutdown = shutdown.clone();
            async move {
                maintenance::run_stats_snapshot(cache, shutdown).await;
                Ok(())
            }
        });
    }

    // ── SIGHUP reload ──────────────────────────────────────────────────

    {
        let state = state.clone();
        let custom_store = custom_store.clone();
        let config = config.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_sighup(config, custom_store, state).await {
                error!("SIGHUP handler error: {}", e);
            }
        });
    }

    // ── Ready ──────────────────────────────────────────────────────────

    info!("rblgate started successfully");
    info!("  DNS: listening on {} (UDP and TCP)", addr);
    info!("  Upstream resolver: {}", config.upstream_resolver);
    info!("  Aggregate deadline: {}ms", config.aggregate_timeout_ms);
    match cache.stats() {
        Ok(stats) => info!("  Cache: {} entries ({} valid)", stats.total, stats.valid),
        Err(e) => error!("  Cache: stats unavailable: {}", e),
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    // Stop accepting and cancel maintenance; in-flight requests finish
    // within their own deadlines
    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(2), async {
        let _ = udp_handle.await;
        let _ = tcp_handle.await;
    })
    .await;

    Ok(())
}

/// Build the zone registry from the RBL servers file, the optional
/// aggregate zones file, and the custom-RBL configuration row.
fn build_registry(config: &AppConfig, custom_store: &CustomRblStore) -> anyhow::Result<ZoneRegistry> {
    let rbls = sources::load_rbl_servers(Path::new(&config.rbl_servers_file))?;

    let aggregates = if config.aggregate_zones_file.is_empty() {
        Vec::new()
    } else {
        sources::load_aggregate_zones(Path::new(&config.aggregate_zones_file), &rbls)?
    };

    let custom_config = custom_store.config()?;
    if let Some(c) = &custom_config {
        info!("Custom RBL zone: {}", c.zone_name);
    }

    Ok(ZoneRegistry::new(
        rbls,
        aggregates,
        custom_config.map(|c| c.zone_name),
    ))
}

/// Rebuild the zone registry on SIGHUP. The cache is left intact; only the
/// routing table is swapped.
async fn handle_sighup(
    config: AppConfig,
    custom_store: CustomRblStore,
    state: SharedServerState,
) -> anyhow::Result<()> {
    let mut signals = Signals::new([SIGHUP])?;

    while let Some(signal) = signals.next().await {
        if signal == SIGHUP {
            info!("Received SIGHUP, reloading zone configuration...");
            match build_registry(&config, &custom_store) {
                Ok(registry) => {
                    let mut s = state.write().await;
                    s.registry = Arc::new(registry);
                    info!(
                        "Zone registry reloaded: {} RBLs, {} aggregate zones",
                        s.registry.rbls().len(),
                        s.registry.aggregates().len()
                    );
                }
                Err(e) => {
                    error!("Failed to reload zone registry: {}", e);
                }
            }
        }
    }

    Ok(())
}
