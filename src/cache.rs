//! In-memory cache tier.
//!
//! A bounded LRU from cid text to that cid's provider map. The cache is
//! advisory: the datastore stays authoritative, and evicting an entry only
//! costs a prefix scan on the next touch. It is touched exclusively from the
//! registry worker task, so it carries no interior locking.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use lru::LruCache;

/// Peer text mapped to the millisecond timestamp of its most recent provide.
pub(crate) type PeerMap = HashMap<String, u64>;

/// Bounded LRU of per-cid provider maps.
pub(crate) struct ProviderCache {
    entries: LruCache<String, PeerMap>,
}

impl ProviderCache {
    pub(crate) fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Look up a cached provider map, refreshing its recency.
    ///
    /// `None` means "not cached", never "no providers".
    pub(crate) fn get(&mut self, cid_text: &str) -> Option<&PeerMap> {
        self.entries.get(cid_text)
    }

    /// Mutable lookup, refreshing recency.
    pub(crate) fn get_mut(&mut self, cid_text: &str) -> Option<&mut PeerMap> {
        self.entries.get_mut(cid_text)
    }

    /// Insert or replace an entry, evicting the least recently used on overflow.
    pub(crate) fn put(&mut self, cid_text: String, peers: PeerMap) {
        self.entries.put(cid_text, peers);
    }

    /// Drop an entry.
    pub(crate) fn remove(&mut self, cid_text: &str) {
        self.entries.pop(cid_text);
    }

    /// Number of cids currently cached.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
