//! Per-base-currency rate table cache.
//!
//! Each base currency has its own entry holding the fetch status, a
//! generation counter and the listeners subscribed to it. Entries are locked
//! individually, so work on one base never blocks another.
//!
//! A status change and its notifications happen under the entry's delivery
//! lock, so every listener sees one entry's transitions in the order they
//! were made, whichever threads made them.
//!
//! Fetches run as spawned Tokio tasks: the cache must be created and used
//! from inside a runtime.

use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use ratewise_common::{CurrencyCode, FetchError, RateSnapshot, RateTable};

use crate::config::CacheConfig;
use crate::provider::RateProvider;

/// Fetch lifecycle for one base currency.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchStatus {
    NotRequested,
    Pending,
    Ready(Arc<RateSnapshot>),
    Failed(FetchError),
}

impl FetchStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, FetchStatus::Pending)
    }

    /// Ready or Failed.
    pub fn is_settled(&self) -> bool {
        matches!(self, FetchStatus::Ready(_) | FetchStatus::Failed(_))
    }

    pub fn snapshot(&self) -> Option<&Arc<RateSnapshot>> {
        match self {
            FetchStatus::Ready(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    pub fn table(&self) -> Option<&RateTable> {
        self.snapshot().map(|s| &s.table)
    }

    /// The loaded table, or an empty one when not Ready.
    pub fn table_or_empty(&self) -> Cow<'_, RateTable> {
        match self.table() {
            Some(table) => Cow::Borrowed(table),
            None => Cow::Owned(RateTable::empty()),
        }
    }

    pub fn error(&self) -> Option<&FetchError> {
        match self {
            FetchStatus::Failed(error) => Some(error),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FetchStatus::NotRequested => "not_requested",
            FetchStatus::Pending => "pending",
            FetchStatus::Ready(_) => "ready",
            FetchStatus::Failed(_) => "failed",
        }
    }
}

/// Callback invoked with every status change of the subscribed base.
pub type Listener = Arc<dyn Fn(&CurrencyCode, &FetchStatus) + Send + Sync>;

struct Entry {
    status: FetchStatus,
    generation: u64,
    next_listener_id: u64,
    listeners: Vec<(u64, Listener)>,
}

impl Entry {
    fn new() -> Self {
        Self {
            status: FetchStatus::NotRequested,
            generation: 0,
            next_listener_id: 0,
            listeners: Vec::new(),
        }
    }

    /// Start a new generation; any fetch still in flight becomes stale.
    fn begin_fetch(&mut self) -> (u64, Vec<Listener>) {
        self.generation += 1;
        self.status = FetchStatus::Pending;
        (self.generation, self.listeners())
    }

    fn listeners(&self) -> Vec<Listener> {
        self.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
    }
}

/// One base currency's entry plus the lock that orders its deliveries.
///
/// Lock order is `delivery` then `state`. `state` is never held while
/// listeners run; `delivery` is reentrant so a listener may call back into
/// the cache for the same base.
struct Slot {
    delivery: ReentrantMutex<()>,
    state: Mutex<Entry>,
}

impl Slot {
    fn new() -> Self {
        Self {
            delivery: ReentrantMutex::new(()),
            state: Mutex::new(Entry::new()),
        }
    }
}

type SharedEntry = Arc<Slot>;

// Called with the slot's delivery lock held and its state lock released.
fn notify(listeners: &[Listener], base: &CurrencyCode, status: &FetchStatus) {
    for listener in listeners {
        listener(base, status);
    }
}

/// Apply a fetch result if it belongs to the entry's current generation.
fn resolve(
    slot: &Slot,
    base: &CurrencyCode,
    generation: u64,
    result: Result<RateSnapshot, FetchError>,
) -> bool {
    let _delivery = slot.delivery.lock();
    let (status, listeners) = {
        let mut guard = slot.state.lock();
        if guard.generation != generation {
            debug!(
                base = %base,
                generation,
                current = guard.generation,
                "Discarding superseded fetch result"
            );
            return false;
        }

        guard.status = match result {
            Ok(snapshot) => {
                info!(
                    base = %base,
                    generation,
                    currencies = snapshot.table.len(),
                    "Rate table ready"
                );
                FetchStatus::Ready(Arc::new(snapshot))
            }
            Err(error) => {
                warn!(base = %base, generation, error = %error, "Rate table fetch failed");
                FetchStatus::Failed(error)
            }
        };

        (guard.status.clone(), guard.listeners())
    };

    notify(&listeners, base, &status);
    true
}

/// Cancellation handle returned by [`RateTableCache::subscribe`].
///
/// The listener stays registered for as long as this handle lives.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    entry: Weak<Slot>,
    id: u64,
    base: CurrencyCode,
}

impl Subscription {
    pub fn base(&self) -> &CurrencyCode {
        &self.base
    }

    /// Unregister the listener.
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(slot) = self.entry.upgrade() {
            slot.state.lock().listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("base", &self.base)
            .field("id", &self.id)
            .finish()
    }
}

/// Rate tables keyed by base currency, with fetch de-duplication.
pub struct RateTableCache {
    provider: Arc<dyn RateProvider>,
    entries: DashMap<CurrencyCode, SharedEntry>,
    config: CacheConfig,
}

impl RateTableCache {
    /// Create a cache with default configuration.
    pub fn new(provider: Arc<dyn RateProvider>) -> Self {
        Self::with_config(provider, CacheConfig::default())
    }

    /// Create a cache with custom configuration.
    pub fn with_config(provider: Arc<dyn RateProvider>, config: CacheConfig) -> Self {
        Self {
            provider,
            entries: DashMap::new(),
            config,
        }
    }

    fn entry(&self, base: &CurrencyCode) -> SharedEntry {
        let entry = self
            .entries
            .entry(base.clone())
            .or_insert_with(|| Arc::new(Slot::new()));
        Arc::clone(entry.value())
    }

    /// Last known status for `base`.
    pub fn get(&self, base: &CurrencyCode) -> FetchStatus {
        match self.entries.get(base) {
            Some(slot) => slot.state.lock().status.clone(),
            None => FetchStatus::NotRequested,
        }
    }

    /// Make sure a table for `base` is loaded or loading.
    ///
    /// Starts a fetch when nothing was requested yet or the previous fetch
    /// failed. While a fetch is pending further calls attach to it. Returns
    /// without waiting for the network.
    #[instrument(skip_all, fields(base = %base))]
    pub fn ensure(&self, base: &CurrencyCode) -> FetchStatus {
        let slot = self.entry(base);
        let delivery = slot.delivery.lock();
        let (generation, listeners) = {
            let mut guard = slot.state.lock();
            if matches!(guard.status, FetchStatus::Pending | FetchStatus::Ready(_)) {
                debug!(status = guard.status.label(), "Rate table already requested");
                return guard.status.clone();
            }
            guard.begin_fetch()
        };

        notify(&listeners, base, &FetchStatus::Pending);
        drop(delivery);
        self.spawn_fetch(base.clone(), slot, generation);
        FetchStatus::Pending
    }

    /// Refetch `base` whatever its status, superseding any fetch in flight.
    #[instrument(skip_all, fields(base = %base))]
    pub fn refresh(&self, base: &CurrencyCode) -> FetchStatus {
        let slot = self.entry(base);
        let delivery = slot.delivery.lock();
        let (generation, listeners) = slot.state.lock().begin_fetch();

        notify(&listeners, base, &FetchStatus::Pending);
        drop(delivery);
        self.spawn_fetch(base.clone(), slot, generation);
        FetchStatus::Pending
    }

    fn spawn_fetch(&self, base: CurrencyCode, slot: SharedEntry, generation: u64) {
        let provider = Arc::clone(&self.provider);
        let timeout = self.config.fetch_timeout;

        debug!(base = %base, generation, provider = provider.name(), "Fetching rate table");

        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, provider.fetch_rates(&base)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(base.clone())),
            };
            resolve(&slot, &base, generation, result);
        });
    }

    /// Register `listener` for status changes of `base`.
    ///
    /// If the status is already Ready or Failed the listener is called with
    /// it before this returns.
    pub fn subscribe<F>(&self, base: &CurrencyCode, listener: F) -> Subscription
    where
        F: Fn(&CurrencyCode, &FetchStatus) + Send + Sync + 'static,
    {
        let slot = self.entry(base);
        let listener: Listener = Arc::new(listener);

        let _delivery = slot.delivery.lock();
        let (id, replay) = {
            let mut guard = slot.state.lock();
            let id = guard.next_listener_id;
            guard.next_listener_id += 1;
            guard.listeners.push((id, Arc::clone(&listener)));
            let replay = guard.status.is_settled().then(|| guard.status.clone());
            (id, replay)
        };

        if let Some(status) = replay {
            listener(base, &status);
        }

        Subscription {
            entry: Arc::downgrade(&slot),
            id,
            base: base.clone(),
        }
    }

    /// Wait until `base` is no longer Pending.
    pub async fn settled(&self, base: &CurrencyCode) -> FetchStatus {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = self.subscribe(base, move |_, status| {
            let _ = tx.send(status.clone());
        });

        loop {
            let status = self.get(base);
            if !status.is_pending() {
                return status;
            }
            if rx.recv().await.is_none() {
                return self.get(base);
            }
        }
    }

    /// Get the number of bases known to the cache.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        for entry in self.entries.iter() {
            stats.total_entries += 1;
            match entry.value().state.lock().status {
                FetchStatus::NotRequested => {}
                FetchStatus::Pending => stats.pending += 1,
                FetchStatus::Ready(_) => stats.ready += 1,
                FetchStatus::Failed(_) => stats.failed += 1,
            }
        }
        stats
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub pending: usize,
    pub ready: usize,
    pub failed: usize,
}

/// Shared rate table cache.
pub type SharedRateTableCache = Arc<RateTableCache>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockRateProvider;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready};

    fn usd_table() -> RateTable {
        RateTable::from_pairs([(CurrencyCode::inr(), 83.1), (CurrencyCode::eur(), 0.91)]).unwrap()
    }

    fn setup() -> (Arc<MockRateProvider>, RateTableCache) {
        let provider = Arc::new(MockRateProvider::new("test"));
        provider.set_rates(CurrencyCode::usd(), usd_table());
        let cache = RateTableCache::new(provider.clone());
        (provider, cache)
    }

    type Seen = Arc<Mutex<Vec<FetchStatus>>>;

    fn recorder() -> (Seen, impl Fn(&CurrencyCode, &FetchStatus) + Send + Sync + 'static) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |_: &CurrencyCode, status: &FetchStatus| {
            sink.lock().push(status.clone())
        })
    }

    async fn let_tasks_run() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_get_defaults_to_not_requested() {
        let (provider, cache) = setup();

        assert_eq!(cache.get(&CurrencyCode::usd()), FetchStatus::NotRequested);
        assert!(cache.is_empty());
        assert_eq!(provider.fetch_count(&CurrencyCode::usd()), 0);
    }

    #[tokio::test]
    async fn test_ensure_loads_table() {
        let (_, cache) = setup();

        assert_eq!(cache.ensure(&CurrencyCode::usd()), FetchStatus::Pending);
        let status = cache.settled(&CurrencyCode::usd()).await;

        assert_eq!(status.table(), Some(&usd_table()));
        assert_eq!(cache.get(&CurrencyCode::usd()), status);
    }

    #[tokio::test]
    async fn test_concurrent_ensure_issues_one_fetch() {
        let (provider, cache) = setup();
        let usd = CurrencyCode::usd();
        provider.hold(usd.clone());

        let first = cache.ensure(&usd);
        let second = cache.ensure(&usd);
        assert_eq!(first, FetchStatus::Pending);
        assert_eq!(second, FetchStatus::Pending);

        provider.release(&usd);
        let (a, b) = tokio::join!(cache.settled(&usd), cache.settled(&usd));

        assert!(matches!(a, FetchStatus::Ready(_)));
        assert_eq!(a, b);
        assert_eq!(provider.fetch_count(&usd), 1);
    }

    #[tokio::test]
    async fn test_ensure_on_ready_does_not_refetch() {
        let (provider, cache) = setup();
        let usd = CurrencyCode::usd();

        cache.ensure(&usd);
        cache.settled(&usd).await;
        let status = cache.ensure(&usd);

        assert!(matches!(status, FetchStatus::Ready(_)));
        assert_eq!(provider.fetch_count(&usd), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_retried_only_on_ensure() {
        let (provider, cache) = setup();
        let xyz = CurrencyCode::new("xyz").unwrap();
        provider.fail_with(xyz.clone(), FetchError::Network("connection reset".into()));

        cache.ensure(&xyz);
        let status = cache.settled(&xyz).await;
        assert_eq!(
            status,
            FetchStatus::Failed(FetchError::Network("connection reset".into()))
        );

        provider.set_rates(xyz.clone(), usd_table());
        let_tasks_run().await;
        assert!(matches!(cache.get(&xyz), FetchStatus::Failed(_)));
        assert_eq!(provider.fetch_count(&xyz), 1);

        assert_eq!(cache.ensure(&xyz), FetchStatus::Pending);
        let status = cache.settled(&xyz).await;
        assert!(matches!(status, FetchStatus::Ready(_)));
        assert_eq!(provider.fetch_count(&xyz), 2);
    }

    #[tokio::test]
    async fn test_superseded_fetch_is_discarded() {
        let (provider, cache) = setup();
        let usd = CurrencyCode::usd();
        let (seen, listener) = recorder();
        let _sub = cache.subscribe(&usd, listener);

        provider.hold(usd.clone());
        cache.ensure(&usd);
        let_tasks_run().await;
        assert_eq!(provider.fetch_count(&usd), 1);

        let fresh = RateTable::from_pairs([(CurrencyCode::inr(), 84.0)]).unwrap();
        provider.set_rates(usd.clone(), fresh.clone());
        cache.refresh(&usd);
        let_tasks_run().await;
        assert_eq!(provider.fetch_count(&usd), 2);

        provider.release(&usd);
        let status = cache.settled(&usd).await;
        let_tasks_run().await;

        assert_eq!(status.table(), Some(&fresh));
        assert_eq!(cache.get(&usd).table(), Some(&fresh));
        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert!(seen[0].is_pending());
        assert!(seen[1].is_pending());
        assert_eq!(seen[2].table(), Some(&fresh));
    }

    #[tokio::test]
    async fn test_resolve_checks_generation() {
        let (provider, cache) = setup();
        let usd = CurrencyCode::usd();
        provider.hold(usd.clone());

        cache.ensure(&usd);
        cache.refresh(&usd);
        let entry = cache.entry(&usd);
        let stale = RateSnapshot::new(usd.clone(), RateTable::empty());

        assert!(!resolve(&entry, &usd, 1, Ok(stale)));
        assert!(cache.get(&usd).is_pending());

        let current = RateSnapshot::new(usd.clone(), usd_table());
        assert!(resolve(&entry, &usd, 2, Ok(current)));
        assert_eq!(cache.get(&usd).table(), Some(&usd_table()));
    }

    #[tokio::test]
    async fn test_statuses_delivered_in_order() {
        let (_, cache) = setup();
        let usd = CurrencyCode::usd();
        let (seen, listener) = recorder();
        let _sub = cache.subscribe(&usd, listener);

        cache.ensure(&usd);
        cache.settled(&usd).await;

        let labels: Vec<&str> = seen.lock().iter().map(|s| s.label()).collect();
        assert_eq!(labels, ["pending", "ready"]);
    }

    #[tokio::test]
    async fn test_late_subscriber_called_immediately() {
        let (_, cache) = setup();
        let usd = CurrencyCode::usd();
        cache.ensure(&usd);
        cache.settled(&usd).await;

        let (seen, listener) = recorder();
        let _sub = cache.subscribe(&usd, listener);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].table(), Some(&usd_table()));
    }

    #[tokio::test]
    async fn test_dropped_subscription_stops_notifications() {
        let (_, cache) = setup();
        let usd = CurrencyCode::usd();
        let (seen, listener) = recorder();

        let sub = cache.subscribe(&usd, listener);
        sub.cancel();
        cache.ensure(&usd);
        cache.settled(&usd).await;

        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_other_bases_unaffected() {
        let (provider, cache) = setup();
        provider.set_rates(CurrencyCode::eur(), usd_table());
        provider.hold(CurrencyCode::usd());

        cache.ensure(&CurrencyCode::usd());
        cache.ensure(&CurrencyCode::eur());
        let eur = cache.settled(&CurrencyCode::eur()).await;

        assert!(matches!(eur, FetchStatus::Ready(_)));
        assert!(cache.get(&CurrencyCode::usd()).is_pending());
    }

    #[tokio::test]
    async fn test_settled_waits_for_fetch() {
        let (provider, cache) = setup();
        let usd = CurrencyCode::usd();
        provider.hold(usd.clone());
        cache.ensure(&usd);

        let mut settled = tokio_test::task::spawn(cache.settled(&usd));
        assert_pending!(settled.poll());

        provider.release(&usd);
        let_tasks_run().await;

        let status = assert_ready!(settled.poll());
        assert!(matches!(status, FetchStatus::Ready(_)));
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let provider = Arc::new(
            MockRateProvider::new("slow").with_latency(Duration::from_millis(500)),
        );
        provider.set_rates(CurrencyCode::usd(), usd_table());
        let cache = RateTableCache::with_config(
            provider,
            CacheConfig {
                fetch_timeout: Duration::from_millis(20),
            },
        );

        cache.ensure(&CurrencyCode::usd());
        let status = cache.settled(&CurrencyCode::usd()).await;

        assert_eq!(
            status,
            FetchStatus::Failed(FetchError::Timeout(CurrencyCode::usd()))
        );
    }

    #[tokio::test]
    async fn test_stats() {
        let (provider, cache) = setup();
        let gbp = CurrencyCode::gbp();
        provider.hold(CurrencyCode::eur());

        cache.ensure(&CurrencyCode::usd());
        cache.ensure(&CurrencyCode::eur());
        cache.ensure(&gbp);
        cache.settled(&CurrencyCode::usd()).await;
        cache.settled(&gbp).await;

        assert_eq!(
            cache.stats(),
            CacheStats {
                total_entries: 3,
                pending: 1,
                ready: 1,
                failed: 1,
            }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_retry_pending_not_overtaken_by_previous_failure() {
        let (provider, cache) = setup();
        let cache = Arc::new(cache);
        let xyz = CurrencyCode::new("xyz").unwrap();
        provider.fail_with(xyz.clone(), FetchError::Network("connection reset".into()));

        // Holds up delivery of the first failure on the fetch task's thread.
        let slow_once = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let _slow = cache.subscribe(&xyz, move |_, status| {
            if matches!(status, FetchStatus::Failed(_))
                && slow_once.swap(false, std::sync::atomic::Ordering::SeqCst)
            {
                std::thread::sleep(Duration::from_millis(100));
            }
        });
        let (seen, listener) = recorder();
        let _sub = cache.subscribe(&xyz, listener);

        cache.ensure(&xyz);
        while !matches!(cache.get(&xyz), FetchStatus::Failed(_)) {
            tokio::task::yield_now().await;
        }

        provider.hold(xyz.clone());
        let retry = {
            let cache = Arc::clone(&cache);
            let xyz = xyz.clone();
            tokio::task::spawn_blocking(move || cache.ensure(&xyz))
        };
        assert_eq!(retry.await.unwrap(), FetchStatus::Pending);
        tokio::time::sleep(Duration::from_millis(150)).await;

        let labels: Vec<&str> = seen.lock().iter().map(|s| s.label()).collect();
        assert_eq!(labels, ["pending", "failed", "pending"]);
        assert!(cache.get(&xyz).is_pending());
        provider.release(&xyz);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_ensure_from_many_threads_issues_one_fetch() {
        let (provider, cache) = setup();
        let cache = Arc::new(cache);
        let usd = CurrencyCode::usd();
        provider.hold(usd.clone());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let usd = usd.clone();
                tokio::spawn(async move { cache.ensure(&usd) })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap(), FetchStatus::Pending);
        }

        provider.release(&usd);
        let status = cache.settled(&usd).await;

        assert_eq!(status.table(), Some(&usd_table()));
        assert_eq!(provider.fetch_count(&usd), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refresh_ends_on_current_status() {
        let provider = Arc::new(MockRateProvider::new("test").with_latency(Duration::from_millis(5)));
        provider.set_rates(CurrencyCode::usd(), usd_table());
        let cache = Arc::new(RateTableCache::new(provider.clone()));
        let usd = CurrencyCode::usd();
        let (seen, listener) = recorder();
        let _sub = cache.subscribe(&usd, listener);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                let usd = usd.clone();
                tokio::spawn(async move {
                    if i % 2 == 0 {
                        cache.refresh(&usd);
                    } else {
                        cache.ensure(&usd);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let status = cache.settled(&usd).await;
        assert_eq!(status.table(), Some(&usd_table()));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let seen = seen.lock();
        assert_eq!(seen.first().map(|s| s.label()), Some("pending"));
        assert_eq!(seen.last(), Some(&cache.get(&usd)));
        // Every settled status is preceded by the Pending that started it.
        for pair in seen.windows(2) {
            assert!(pair[0].is_pending() || pair[1].is_pending());
        }
    }
}
