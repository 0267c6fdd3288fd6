use std::{
    collections::HashMap,
    sync::{
        Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use super::{Quota, TokenBucket, instant_now};

/// Per-client token buckets keyed by client identifier.
///
/// Lookups take the read lock and only fall back to the write lock when the client is unseen, so
/// steady traffic from known clients never serializes on the map. Last-use stamps are atomics
/// refreshed under the read lock; [`sweep`](ClientRegistry::sweep) holds the write lock for the
/// whole pass, so a client being touched is never evicted halfway.
#[derive(Debug)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, ClientEntry>>,
    epoch: Instant,
}

#[derive(Debug)]
struct ClientEntry {
    bucket: Arc<TokenBucket>,
    // Nanoseconds since the registry epoch.
    last_used: AtomicU64,
}

impl ClientEntry {
    fn touch(&self, stamp: u64) {
        self.last_used.fetch_max(stamp, Ordering::Relaxed);
    }

    fn last_used(&self) -> u64 {
        self.last_used.load(Ordering::Relaxed)
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            epoch: instant_now(),
        }
    }

    /// Returns the client's bucket, creating one with `quota` on first sight.
    ///
    /// Either way the client's last-use time is refreshed. Concurrent first requests from the same
    /// client all receive the bucket created by whichever caller won the write lock.
    pub fn get_or_create(&self, client_id: &str, quota: Quota) -> Arc<TokenBucket> {
        self.get_or_create_at(client_id, quota, instant_now())
    }

    pub(crate) fn get_or_create_at(
        &self,
        client_id: &str,
        quota: Quota,
        now: Instant,
    ) -> Arc<TokenBucket> {
        let stamp = self.stamp(now);

        if let Some(entry) = self.read().get(client_id) {
            entry.touch(stamp);
            return Arc::clone(&entry.bucket);
        }

        let mut clients = self.write();
        let entry = clients.entry(client_id.to_owned()).or_insert_with(|| {
            trace!(message = "Tracking new client.", client_id);
            ClientEntry {
                bucket: Arc::new(TokenBucket::new_at(quota, now)),
                last_used: AtomicU64::new(stamp),
            }
        });
        entry.touch(stamp);
        Arc::clone(&entry.bucket)
    }

    /// Number of tracked clients.
    pub fn count(&self) -> usize {
        self.read().len()
    }

    /// Last-use time of every tracked client.
    pub fn snapshot(&self) -> HashMap<String, Instant> {
        let clients = self.read();
        clients
            .iter()
            .map(|(id, entry)| (id.clone(), self.instant(entry.last_used())))
            .collect()
    }

    /// Stops tracking a client. Returns whether it was tracked.
    pub fn remove(&self, client_id: &str) -> bool {
        self.write().remove(client_id).is_some()
    }

    /// Drops every client last used before `now - expiration`. Returns how many were dropped.
    pub fn sweep(&self, now: Instant, expiration: Duration) -> usize {
        let Some(cutoff) = now.checked_sub(expiration) else {
            return 0;
        };
        // A cutoff before the epoch saturates to zero and expires nothing.
        let cutoff = self.stamp(cutoff);

        let mut clients = self.write();
        let before = clients.len();
        clients.retain(|_, entry| entry.last_used() >= cutoff);
        let removed = before - clients.len();

        // Give memory back after a large churn of short-lived clients.
        if removed > 0 && clients.capacity() > 4 * clients.len().max(16) {
            clients.shrink_to_fit();
        }
        removed
    }

    fn stamp(&self, at: Instant) -> u64 {
        let nanos = at.saturating_duration_since(self.epoch).as_nanos();
        u64::try_from(nanos).unwrap_or(u64::MAX)
    }

    fn instant(&self, stamp: u64) -> Instant {
        self.epoch + Duration::from_nanos(stamp)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ClientEntry>> {
        self.clients.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ClientEntry>> {
        self.clients.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Barrier, thread};

    use super::*;

    const QUOTA: Quota = Quota::new(1.0, 2);

    #[test]
    fn creates_once_and_reuses() {
        let registry = ClientRegistry::new();

        let first = registry.get_or_create("10.0.0.1", QUOTA);
        let second = registry.get_or_create("10.0.0.1", QUOTA);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn distinct_clients_get_distinct_buckets() {
        let registry = ClientRegistry::new();

        let a = registry.get_or_create("a", QUOTA);
        let b = registry.get_or_create("b", QUOTA);

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn existing_bucket_keeps_its_quota() {
        let registry = ClientRegistry::new();
        registry.get_or_create("a", QUOTA);

        let bucket = registry.get_or_create("a", Quota::new(50.0, 100));
        assert_eq!(bucket.quota(), QUOTA);
    }

    #[test]
    fn remove_reports_presence() {
        let registry = ClientRegistry::new();
        registry.get_or_create("a", QUOTA);

        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));
        assert!(!registry.remove("never-seen"));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn snapshot_reports_last_use() {
        let registry = ClientRegistry::new();
        let start = registry.epoch;
        let later = start + Duration::from_secs(5);

        registry.get_or_create_at("a", QUOTA, start);
        registry.get_or_create_at("b", QUOTA, start);
        registry.get_or_create_at("b", QUOTA, later);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["a"], start);
        assert_eq!(snapshot["b"], later);
    }

    #[test]
    fn last_use_never_moves_backwards() {
        let registry = ClientRegistry::new();
        let start = registry.epoch;
        let later = start + Duration::from_secs(5);

        registry.get_or_create_at("a", QUOTA, later);
        registry.get_or_create_at("a", QUOTA, start);

        assert_eq!(registry.snapshot()["a"], later);
    }

    #[test]
    fn sweep_drops_only_idle_clients() {
        let registry = ClientRegistry::new();
        let start = registry.epoch;
        let expiration = Duration::from_secs(10);

        registry.get_or_create_at("idle", QUOTA, start);
        registry.get_or_create_at("active", QUOTA, start);
        registry.get_or_create_at("active", QUOTA, start + Duration::from_secs(8));

        let removed = registry.sweep(start + Duration::from_secs(15), expiration);

        assert_eq!(removed, 1);
        let snapshot = registry.snapshot();
        assert!(snapshot.contains_key("active"));
        assert!(!snapshot.contains_key("idle"));
    }

    #[test]
    fn sweep_keeps_clients_exactly_at_cutoff() {
        let registry = ClientRegistry::new();
        let start = registry.epoch;
        let seen = start + Duration::from_secs(1);
        registry.get_or_create_at("a", QUOTA, seen);

        assert_eq!(registry.sweep(seen + Duration::from_secs(10), Duration::from_secs(10)), 0);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn sweep_before_expiration_elapsed_is_noop() {
        let registry = ClientRegistry::new();
        registry.get_or_create_at("a", QUOTA, registry.epoch);

        assert_eq!(registry.sweep(registry.epoch, Duration::from_secs(60)), 0);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn churn_is_fully_reclaimed() {
        let registry = ClientRegistry::new();
        let start = registry.epoch;

        for i in 0..10_000 {
            registry.get_or_create_at(&format!("10.0.{}.{}", i / 256, i % 256), QUOTA, start);
        }
        assert_eq!(registry.count(), 10_000);

        let removed = registry.sweep(start + Duration::from_secs(61), Duration::from_secs(60));

        assert_eq!(removed, 10_000);
        assert_eq!(registry.count(), 0);
        assert!(registry.read().capacity() < 10_000);
    }

    #[test]
    fn concurrent_first_sight_creates_one_bucket() {
        let registry = ClientRegistry::new();
        let barrier = Barrier::new(16);

        let buckets: Vec<_> = thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        registry.get_or_create("fresh", QUOTA)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(registry.count(), 1);
        assert!(buckets.iter().all(|b| Arc::ptr_eq(b, &buckets[0])));
    }
}
