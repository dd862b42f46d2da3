use crate::{PreviewError, PreviewRecord};
use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Records live for a day unless configured otherwise.
pub const DEFAULT_TTL: Duration = Duration::from_secs(86_400);

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub record: PreviewRecord,
    pub expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

type Flight = Shared<BoxFuture<'static, Result<PreviewRecord, PreviewError>>>;

/// A running fetch, held weakly: once every waiter is gone the fetch future
/// is dropped (releasing whatever it holds) and the slot no longer upgrades.
struct InFlight {
    id: u64,
    flight: Option<WeakShared<BoxFuture<'static, Result<PreviewRecord, PreviewError>>>>,
}

impl InFlight {
    fn new(id: u64, flight: &Flight) -> Self {
        Self {
            id,
            flight: flight.downgrade(),
        }
    }

    fn join(&self) -> Option<Flight> {
        self.flight.as_ref().and_then(WeakShared::upgrade)
    }
}

/// Clears the `in_flight` slot it was created for when the fetch future
/// finishes or is dropped unfinished.
struct FlightGuard {
    in_flight: Arc<DashMap<String, InFlight>>,
    key: String,
    id: u64,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove_if(&self.key, |_, slot| slot.id == self.id);
    }
}

/// Expiring preview store keyed by normalized URL.
///
/// Expiry is passive: an expired entry is dropped the next time it is read.
/// [`Cache::get_or_fetch`] additionally coalesces concurrent misses on the
/// same key so only one upstream fetch runs.
#[derive(Clone)]
pub struct Cache {
    entries: Arc<DashMap<String, CacheEntry>>,
    in_flight: Arc<DashMap<String, InFlight>>,
    next_flight: Arc<AtomicU64>,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl Cache {
    /// `capacity` is a pre-allocation hint, not an eviction bound.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).map_or(100, NonZeroUsize::get);
        Self {
            entries: Arc::new(DashMap::with_capacity(capacity)),
            in_flight: Arc::new(DashMap::new()),
            next_flight: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn get(&self, key: &str) -> Option<PreviewRecord> {
        self.lookup(key)
    }

    pub async fn set(&self, key: String, record: PreviewRecord, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.entries.insert(key, CacheEntry { record, expires_at });
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries, expired ones included until they are read or purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the cached record for `key`, or runs `fetch` and caches its
    /// successful result for `ttl`.
    ///
    /// While a fetch for `key` is running, further callers await that same
    /// fetch instead of starting their own. Failures are handed to every
    /// waiter and are never cached.
    pub async fn get_or_fetch<F>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<PreviewRecord, PreviewError>
    where
        F: Future<Output = Result<PreviewRecord, PreviewError>> + Send + 'static,
    {
        if let Some(hit) = self.lookup(key) {
            debug!(key = %key, "Cache hit");
            return Ok(hit);
        }

        let flight = match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(mut slot) => match slot.get().join() {
                Some(flight) => {
                    debug!(key = %key, "Joining in-flight fetch");
                    flight
                }
                None => {
                    debug!(key = %key, "Replacing abandoned fetch");
                    let (id, flight) = self.start_flight(key, ttl, fetch);
                    slot.insert(InFlight::new(id, &flight));
                    flight
                }
            },
            Entry::Vacant(slot) => {
                // Another leader may have finished between the lookup and here.
                if let Some(hit) = self.lookup(key) {
                    return Ok(hit);
                }
                debug!(key = %key, "Cache miss, starting fetch");
                let (id, flight) = self.start_flight(key, ttl, fetch);
                slot.insert(InFlight::new(id, &flight));
                flight
            }
        };

        flight.await
    }

    /// Number of fetches currently running through [`Cache::get_or_fetch`].
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// The live entry for `key`, with its expiry. Expired entries are
    /// removed and reported as absent.
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        let now = Instant::now();
        let fresh = self
            .entries
            .get(key)
            .map(|entry| (!entry.is_expired(now)).then(|| entry.clone()))?;

        if fresh.is_none() {
            debug!(key = %key, "Cache entry expired");
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        fresh
    }

    fn lookup(&self, key: &str) -> Option<PreviewRecord> {
        self.peek(key).map(|entry| entry.record)
    }

    fn start_flight<F>(&self, key: &str, ttl: Duration, fetch: F) -> (u64, Flight)
    where
        F: Future<Output = Result<PreviewRecord, PreviewError>> + Send + 'static,
    {
        let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
        let cache = self.clone();
        let guard = FlightGuard {
            in_flight: self.in_flight.clone(),
            key: key.to_string(),
            id,
        };

        let flight = async move {
            let result = fetch.await;
            if let Ok(record) = &result {
                cache.set(guard.key.clone(), record.clone(), ttl).await;
            }
            drop(guard);
            result
        }
        .boxed()
        .shared();

        (id, flight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(title: &str) -> PreviewRecord {
        let mut record = PreviewRecord::default();
        record.insert("metaTags".to_string(), json!({ "ogTitle": title }));
        record
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = Cache::new(10);
        cache
            .set("https://a.example/".into(), record("a"), Duration::from_secs(1))
            .await;
        assert_eq!(cache.get("https://a.example/").await, Some(record("a")));

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(cache.get("https://a.example/").await, None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_set_wins() {
        let cache = Cache::new(10);
        cache.set("k".into(), record("first"), DEFAULT_TTL).await;
        cache.set("k".into(), record("second"), DEFAULT_TTL).await;
        assert_eq!(cache.get("k").await, Some(record("second")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = Cache::new(10);
        cache.set("short".into(), record("s"), Duration::from_secs(1)).await;
        cache.set("long".into(), record("l"), DEFAULT_TTL).await;

        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.invalidate("long"));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_fetch_once() {
        let cache = Cache::new(10);
        let calls = Arc::new(AtomicUsize::new(0));

        let requests = (0..5).map(|_| {
            let calls = calls.clone();
            cache.get_or_fetch("https://slow.example/", DEFAULT_TTL, async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, PreviewError>(record("slow"))
            })
        });
        let results = futures::future::join_all(requests).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r.as_ref() == Ok(&record("slow"))));
        assert_eq!(cache.get("https://slow.example/").await, Some(record("slow")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_shared_and_not_cached() {
        let cache = Cache::new(10);
        let failure = PreviewError::FetchError {
            url: "https://down.example/".into(),
            status: Some(503),
            message: "Service Unavailable".into(),
        };

        let requests = (0..3).map(|_| {
            let failure = failure.clone();
            cache.get_or_fetch("https://down.example/", DEFAULT_TTL, async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err::<PreviewRecord, _>(failure)
            })
        });
        let results = futures::future::join_all(requests).await;

        assert!(results.iter().all(|r| r.as_ref() == Err(&failure)));
        assert!(cache.is_empty());
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_fetch_is_dropped() {
        let cache = Cache::new(10);
        let permits = Arc::new(tokio::sync::Semaphore::new(1));

        let held = permits.clone();
        let slow = cache.get_or_fetch("https://hang.example/", DEFAULT_TTL, async move {
            let _permit = held.acquire_owned().await;
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<_, PreviewError>(record("never"))
        });
        assert!(tokio::time::timeout(Duration::from_millis(100), slow).await.is_err());

        assert_eq!(cache.in_flight(), 0);
        assert_eq!(permits.available_permits(), 1);

        // A later request for the same key starts a fresh fetch.
        let retry = cache
            .get_or_fetch("https://hang.example/", DEFAULT_TTL, async {
                Ok::<_, PreviewError>(record("back"))
            })
            .await;
        assert_eq!(retry, Ok(record("back")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_peek_reports_expiry() {
        let cache = Cache::new(10);
        cache.set("k".into(), record("k"), Duration::from_secs(30)).await;

        let entry = cache.peek("k").unwrap();
        assert_eq!(entry.record, record("k"));
        assert_eq!(entry.expires_at, Instant::now() + Duration::from_secs(30));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cache.peek("k").is_none());
        assert!(cache.is_empty());
    }
}
