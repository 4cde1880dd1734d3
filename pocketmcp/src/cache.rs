//! Time-to-live cache for resource contents.
//!
//! The cache is process-wide: it is shared by every client that uses the
//! same handle (or the [`ResourceCache::shared`] instance) and it outlives
//! individual sessions. Entries are keyed by resource URI, hold at most one
//! value per URI, and are logically absent once their TTL has elapsed even
//! if still physically stored.

use crate::types::ReadResourceResult;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;

/// Default time-to-live for cached resource contents.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct CacheEntry {
    content: ReadResourceResult,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self) -> bool {
        self.inserted_at.elapsed() < self.ttl
    }
}

/// TTL cache over resource URIs.
///
/// Writes are atomic per key; a reader never observes a partially written
/// entry. Concurrent stores for the same URI resolve by last write wins.
#[derive(Default)]
pub struct ResourceCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl ResourceCache {
    /// Create a new, empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache instance shared by clients that do not
    /// configure their own.
    pub fn shared() -> Arc<ResourceCache> {
        static SHARED: OnceLock<Arc<ResourceCache>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(ResourceCache::new())).clone()
    }

    /// Get the cached content for a URI, if a fresh entry exists.
    pub fn get(&self, uri: &str) -> Option<ReadResourceResult> {
        let entries = self.entries.read();
        entries
            .get(uri)
            .filter(|entry| entry.is_fresh())
            .map(|entry| entry.content.clone())
    }

    /// Store content for a URI, overwriting any prior entry.
    pub fn insert(&self, uri: impl Into<String>, content: ReadResourceResult, ttl: Duration) {
        self.entries.write().insert(
            uri.into(),
            CacheEntry {
                content,
                inserted_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Remove the entry for a URI.
    pub fn remove(&self, uri: &str) {
        self.entries.write().remove(uri);
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Physically remove entries whose TTL has elapsed.
    pub fn evict_expired(&self) {
        self.entries.write().retain(|_, entry| entry.is_fresh());
    }

    /// Number of physically stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
