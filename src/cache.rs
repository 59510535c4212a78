//! Expiring key/value cache
//!
//! Every entry carries its own expiry instant, reset on each `set`. Expired
//! entries are removed lazily when read and eagerly by a background sweep, so
//! keys nobody asks for again still release their memory.
//!
//! Storage is a `DashMap`: reads of different keys proceed concurrently and
//! writes only lock the shard owning the key.

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Instant};
use tracing::debug;

/// Default interval between background sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Generic TTL cache with lazy and periodic eviction
pub struct TtlCache<K, V> {
    entries: Arc<DashMap<K, Entry<V>>>,
    ttl: Duration,
    shutdown_tx: watch::Sender<bool>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache and start its background sweep.
    ///
    /// Must be called within a Tokio runtime. The sweep stops when
    /// [`TtlCache::shutdown`] is called or the cache is dropped.
    pub fn new(ttl: Duration, sweep_interval: Duration) -> Self {
        let entries: Arc<DashMap<K, Entry<V>>> = Arc::new(DashMap::new());
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let sweep_entries = Arc::clone(&entries);
        let sweep_interval = sweep_interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut interval = time::interval(sweep_interval);

            // Skip the first tick which fires immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = sweep_expired(&sweep_entries);
                        if removed > 0 {
                            debug!(removed, remaining = sweep_entries.len(), "swept expired cache entries");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        // A closed channel means the cache itself was dropped
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            entries,
            ttl,
            shutdown_tx,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store a value, restarting its TTL clock
    pub fn set(&self, key: K, value: V) {
        let expires_at = Instant::now() + self.ttl;
        self.entries.insert(key, Entry { value, expires_at });
    }

    /// Insert only if the key is missing or expired.
    ///
    /// Returns `true` when this call stored the value. The check and the
    /// insert happen under the same shard lock.
    pub fn set_if_absent(&self, key: K, value: V) -> bool {
        let now = Instant::now();
        let fresh = Entry {
            value,
            expires_at: now + self.ttl,
        };

        match self.entries.entry(key) {
            MapEntry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(fresh);
                    true
                } else {
                    false
                }
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(fresh);
                true
            }
        }
    }

    /// Return the value if present and unexpired.
    ///
    /// An expired entry found here is deleted on the spot.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        {
            let entry = self.entries.get(key)?;
            if !entry.is_expired(now) {
                return Some(entry.value.clone());
            }
        }

        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        None
    }

    /// Like [`TtlCache::get`] without cloning the value
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        {
            let Some(entry) = self.entries.get(key) else {
                return false;
            };
            if !entry.is_expired(now) {
                return true;
            }
        }

        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        false
    }

    /// Remove a key. Returns whether anything was stored under it.
    pub fn delete<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Run one eviction pass now, returning how many entries were removed
    pub fn sweep(&self) -> usize {
        sweep_expired(&self.entries)
    }

    /// Number of stored entries, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stop the background sweep. Lazy expiry on read keeps working.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

fn sweep_expired<K, V>(entries: &DashMap<K, Entry<V>>) -> usize
where
    K: Eq + Hash,
{
    let now = Instant::now();
    let mut removed = 0;
    entries.retain(|_, entry| {
        let keep = !entry.is_expired(now);
        if !keep {
            removed += 1;
        }
        keep
    });
    removed
}
