pub mod handler;
pub mod logging;
pub mod server;

use std::sync::Arc;

use tokio::sync::RwLock;

use rg_cache::TieredCache;
use rg_custom::CustomRblStore;
use rg_dns::DnsClient;
use rg_rbl::{AggregateExecutor, RblResolver, ZoneRegistry};

/// Everything a request needs, wired together at startup. The registry is
/// the only piece replaced on reload; the rest lives for the process.
pub struct ServerState {
    pub registry: Arc<ZoneRegistry>,
    pub resolver: Arc<RblResolver>,
    pub aggregate: Arc<AggregateExecutor>,
    pub custom: CustomRblStore,
    pub cache: Arc<TieredCache>,
    pub client: Arc<DnsClient>,
    pub query_logger: Option<logging::QueryLogger>,
}

pub type SharedServerState = Arc<RwLock<ServerState>>;
