//! Process-local fast tier: a bounded map with absolute-time expiry.

use rustc_hash::FxHashMap;
use tokio::sync::RwLock;

use crate::entry::CacheEntry;

type CacheKey = (String, String); // canonical (ip, rbl)

pub struct MemoryCache {
    entries: RwLock<FxHashMap<CacheKey, CacheEntry>>,
    max_entries: usize,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(FxHashMap::with_capacity_and_hasher(
                max_entries,
                Default::default(),
            )),
            max_entries,
        }
    }

    /// Lookup an entry. Returns None if absent or expired.
    pub async fn get(&self, ip: &str, rbl: &str, now: i64) -> Option<CacheEntry> {
        let entries = self.entries.read().await;
        let entry = entries.get(&(ip.to_string(), rbl.to_string()))?;
        if entry.is_expired(now) {
            return None;
        }
        Some(entry.clone())
    }

    /// Upsert an entry, evicting expired entries (then the oldest) at capacity.
    pub async fn set(&self, entry: CacheEntry, now: i64) {
        let key = (entry.ip.clone(), entry.rbl.clone());
        let mut entries = self.entries.write().await;

        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            entries.retain(|_, v| !v.is_expired(now));
        }
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            if let Some(oldest_key) = entries
                .iter()
                .min_by_key(|(_, v)| v.cached_at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest_key);
            }
        }

        entries.insert(key, entry);
    }

    pub async fn remove_by_ip(&self, ip: &str) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|(entry_ip, _), _| entry_ip != ip);
        before - entries.len()
    }

    pub async fn purge_expired(&self, now: i64) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, v| !v.is_expired(now));
        before - entries.len()
    }

    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        entries.clear();
        count
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
