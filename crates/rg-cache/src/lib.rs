//! Two-tier TTL cache for RBL lookup results: a process-local fast tier in
//! front of a durable SQLite tier. The durable tier is authoritative across
//! restarts; the fast tier is best-effort and may be disabled entirely.

pub mod entry;
pub mod memory;
pub mod store;

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use rg_common::ip::canonical_ip;
use rg_common::now_epoch;

pub use entry::{CacheEntry, CacheStats, ListStatus};
pub use memory::MemoryCache;
pub use store::{CacheStore, StoreError};

/// Outstanding fire-and-forget writes are bounded; beyond this the write is
/// dropped (the next lookup recomputes it).
const WRITE_QUEUE_CAPACITY: usize = 256;

pub struct TieredCache {
    memory: Option<Arc<MemoryCache>>,
    store: CacheStore,
    writer: mpsc::Sender<CacheEntry>,
}

impl TieredCache {
    /// Build the cache and start its background writer task. Must be called
    /// from within a tokio runtime.
    pub fn new(store: CacheStore, memory: Option<MemoryCache>) -> Self {
        let memory = memory.map(Arc::new);
        let (writer, mut rx) = mpsc::channel::<CacheEntry>(WRITE_QUEUE_CAPACITY);

        let writer_memory = memory.clone();
        let writer_store = store.clone();
        tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                if let Some(mem) = &writer_memory {
                    mem.set(entry.clone(), now_epoch()).await;
                }
                if let Err(e) = writer_store.upsert(&entry) {
                    warn!("Background cache write failed for {}/{}: {}", entry.ip, entry.rbl, e);
                }
            }
        });

        Self { memory, store, writer }
    }

    /// Lookup a non-expired entry: fast tier first, then the durable tier
    /// with a fast-tier backfill at the remaining TTL. A durable-tier read
    /// failure degrades to a miss.
    pub async fn get(&self, ip: IpAddr, rbl: &str) -> Option<CacheEntry> {
        let key_ip = canonical_ip(ip);
        let now = now_epoch();

        if let Some(mem) = &self.memory {
            if let Some(entry) = mem.get(&key_ip, rbl, now).await {
                return Some(entry);
            }
        }

        match self.store.get(&key_ip, rbl, now) {
            Ok(Some(entry)) => {
                if let Some(mem) = &self.memory {
                    mem.set(entry.clone(), now).await;
                }
                Some(entry)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Cache read failed for {}/{}: {}", key_ip, rbl, e);
                None
            }
        }
    }

    /// Upsert the entry for `(ip, rbl)`. The fast-tier write is best-effort;
    /// only a durable-tier failure is surfaced.
    pub async fn put(
        &self,
        ip: IpAddr,
        rbl: &str,
        status: ListStatus,
        response: Option<Ipv4Addr>,
        error: Option<String>,
        ttl: u32,
    ) -> Result<(), StoreError> {
        let entry = self.make_entry(ip, rbl, status, response, error, ttl);
        if let Some(mem) = &self.memory {
            mem.set(entry.clone(), entry.cached_at).await;
        }
        self.store.upsert(&entry)
    }

    /// Queue the write on the bounded background writer; a full queue drops
    /// the write rather than stalling the lookup path.
    pub fn put_background(
        &self,
        ip: IpAddr,
        rbl: &str,
        status: ListStatus,
        response: Option<Ipv4Addr>,
        error: Option<String>,
        ttl: u32,
    ) {
        let entry = self.make_entry(ip, rbl, status, response, error, ttl);
        match self.writer.try_send(entry) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(entry)) => {
                warn!("Cache write queue full, dropping write for {}/{}", entry.ip, entry.rbl);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Cache writer stopped");
            }
        }
    }

    fn make_entry(
        &self,
        ip: IpAddr,
        rbl: &str,
        status: ListStatus,
        response: Option<Ipv4Addr>,
        error: Option<String>,
        ttl: u32,
    ) -> CacheEntry {
        CacheEntry::new(
            canonical_ip(ip),
            rbl.to_string(),
            status,
            response,
            error,
            ttl,
            now_epoch(),
        )
    }

    /// Drop expired entries from both tiers; returns the durable-tier count.
    pub async fn clean_expired(&self) -> Result<usize, StoreError> {
        let now = now_epoch();
        if let Some(mem) = &self.memory {
            mem.purge_expired(now).await;
        }
        self.store.clean_expired(now)
    }

    pub async fn clear_all(&self) -> Result<usize, StoreError> {
        if let Some(mem) = &self.memory {
            mem.clear().await;
        }
        self.store.clear_all()
    }

    /// Remove every entry for an address, whatever lexical form it was
    /// originally supplied in.
    pub async fn clear_by_ip(&self, ip: IpAddr) -> Result<usize, StoreError> {
        let key_ip = canonical_ip(ip);
        if let Some(mem) = &self.memory {
            mem.remove_by_ip(&key_ip).await;
        }
        self.store.clear_by_ip(&key_ip)
    }

    /// Snapshot of the durable tier (the authoritative population).
    pub fn stats(&self) -> Result<CacheStats, StoreError> {
        self.store.stats(now_epoch())
    }
}
