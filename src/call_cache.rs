//! Duplicate-call cache for non-idempotent procedures.
//!
//! A client that retransmits a call over a new connection must not make
//! a side-effecting procedure run twice. The transport shell consults
//! this cache before dispatching any procedure registered as
//! non-idempotent: a duplicate of an in-progress call is dropped (the
//! eventual reply answers both transmissions), and a duplicate of a
//! completed call is answered from the retained reply bytes without
//! re-running the handler.
//!
//! Entries are keyed by `(client address, xid)` and evicted
//! least-recently-used once the configured capacity is reached.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;

use bytes::Bytes;

/// Default number of retained entries.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Cache key: one transaction from one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientRequest {
    pub client: IpAddr,
    pub xid: u32,
}

/// State of a tracked call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEntry {
    /// Handler still running; duplicates are dropped.
    InProgress,
    /// Reply bytes retained for retransmitted calls.
    Completed(Bytes),
}

/// Bounded LRU of recently seen non-idempotent calls.
///
/// Not internally synchronized; the shell keeps one per server behind a
/// mutex so duplicates arriving over different connections are seen.
pub struct CallCache {
    entries: HashMap<ClientRequest, CacheEntry>,
    /// Keys ordered least- to most-recently used.
    order: VecDeque<ClientRequest>,
    capacity: usize,
}

impl CallCache {
    /// Create a cache retaining up to `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0);
        Self {
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Maximum number of retained entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of tracked calls.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a call, inserting an `InProgress` entry if it is new.
    ///
    /// Returns `None` for a fresh call (the caller should dispatch it)
    /// or the existing entry for a duplicate.
    pub fn check_or_insert(&mut self, client: IpAddr, xid: u32) -> Option<CacheEntry> {
        let key = ClientRequest { client, xid };

        if let Some(entry) = self.entries.get(&key) {
            let entry = entry.clone();
            self.touch(&key);
            return Some(entry);
        }

        self.insert(key, CacheEntry::InProgress);
        None
    }

    /// Record the reply for a dispatched call.
    ///
    /// If the entry was evicted while the handler ran, it is re-added;
    /// a retransmission arriving later can still be answered cheaply.
    pub fn complete(&mut self, client: IpAddr, xid: u32, reply: Bytes) {
        let key = ClientRequest { client, xid };

        if self.entries.contains_key(&key) {
            self.entries.insert(key, CacheEntry::Completed(reply));
            self.touch(&key);
        } else {
            self.insert(key, CacheEntry::Completed(reply));
        }
    }

    fn insert(&mut self, key: ClientRequest, entry: CacheEntry) {
        if self.entries.len() == self.capacity {
            if let Some(eldest) = self.order.pop_front() {
                self.entries.remove(&eldest);
            }
        }
        self.entries.insert(key, entry);
        self.order.push_back(key);
    }

    /// Move a key to the most-recently-used position.
    fn touch(&mut self, key: &ClientRequest) {
        if let Some(index) = self.order.iter().position(|k| k == key) {
            self.order.remove(index);
            self.order.push_back(*key);
        }
    }
}

impl Default for CallCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(octet: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, octet])
    }

    #[test]
    fn test_fresh_call_inserts_in_progress() {
        let mut cache = CallCache::new(4);

        assert_eq!(cache.check_or_insert(client(1), 100), None);
        assert_eq!(cache.len(), 1);

        // Same call again: now a duplicate of an in-progress entry.
        assert_eq!(
            cache.check_or_insert(client(1), 100),
            Some(CacheEntry::InProgress)
        );
    }

    #[test]
    fn test_completed_call_returns_reply() {
        let mut cache = CallCache::new(4);
        cache.check_or_insert(client(1), 7);
        cache.complete(client(1), 7, Bytes::from_static(b"reply"));

        match cache.check_or_insert(client(1), 7) {
            Some(CacheEntry::Completed(reply)) => assert_eq!(&reply[..], b"reply"),
            other => panic!("expected completed entry, got {other:?}"),
        }
    }

    #[test]
    fn test_same_xid_different_clients_are_distinct() {
        let mut cache = CallCache::new(4);

        assert_eq!(cache.check_or_insert(client(1), 42), None);
        assert_eq!(cache.check_or_insert(client(2), 42), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() {
        let mut cache = CallCache::new(2);

        cache.check_or_insert(client(1), 1);
        cache.check_or_insert(client(1), 2);
        cache.check_or_insert(client(1), 3);

        assert_eq!(cache.len(), 2);
        // Entry 1 was eldest and is gone: looking it up re-inserts.
        assert_eq!(cache.check_or_insert(client(1), 1), None);
    }

    #[test]
    fn test_duplicate_check_refreshes_lru_position() {
        let mut cache = CallCache::new(2);

        cache.check_or_insert(client(1), 1);
        cache.check_or_insert(client(1), 2);

        // Touch entry 1, then insert a third: entry 2 is now eldest.
        cache.check_or_insert(client(1), 1);
        cache.check_or_insert(client(1), 3);

        assert_eq!(
            cache.check_or_insert(client(1), 1),
            Some(CacheEntry::InProgress)
        );
        assert_eq!(cache.check_or_insert(client(1), 2), None);
    }

    #[test]
    fn test_complete_after_eviction_reinserts() {
        let mut cache = CallCache::new(2);

        cache.check_or_insert(client(1), 1);
        cache.check_or_insert(client(1), 2);
        cache.check_or_insert(client(1), 3); // evicts xid 1

        cache.complete(client(1), 1, Bytes::from_static(b"late"));

        match cache.check_or_insert(client(1), 1) {
            Some(CacheEntry::Completed(reply)) => assert_eq!(&reply[..], b"late"),
            other => panic!("expected completed entry, got {other:?}"),
        }
    }

    #[test]
    fn test_eviction_keeps_map_and_order_in_sync() {
        let mut cache = CallCache::new(3);

        for xid in 0..10 {
            cache.check_or_insert(client(1), xid);
        }

        assert_eq!(cache.len(), 3);
        // The three most recent xids survive.
        for xid in 7..10 {
            assert!(cache.check_or_insert(client(1), xid).is_some());
        }
    }
}
