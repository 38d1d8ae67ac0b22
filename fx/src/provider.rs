//! Rate provider trait and the in-memory mock.

use async_trait::async_trait;
use ratewise_common::{CurrencyCode, FetchError, RateSnapshot};

/// Source of rate tables, addressed by base currency.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Fetch the full rate table for `base`.
    async fn fetch_rates(&self, base: &CurrencyCode) -> Result<RateSnapshot, FetchError>;
}

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockRateProvider;

#[cfg(any(test, feature = "test-utils"))]
mod mock {
    use std::time::Duration;

    use async_trait::async_trait;
    use dashmap::DashMap;
    use ratewise_common::{CurrencyCode, FetchError, RateSnapshot, RateTable};
    use tokio::sync::watch;

    use super::RateProvider;

    /// In-memory provider for tests and the simulator.
    ///
    /// The answer for a fetch is decided when the fetch starts; latency and
    /// gates only delay its delivery. Holding a base makes every fetch for it
    /// wait until [`MockRateProvider::release`] is called.
    pub struct MockRateProvider {
        name: String,
        snapshots: DashMap<CurrencyCode, RateSnapshot>,
        failures: DashMap<CurrencyCode, FetchError>,
        latencies: DashMap<CurrencyCode, Duration>,
        gates: DashMap<CurrencyCode, watch::Sender<bool>>,
        fetch_counts: DashMap<CurrencyCode, usize>,
        default_latency: Option<Duration>,
    }

    impl MockRateProvider {
        /// Create a new mock provider.
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                snapshots: DashMap::new(),
                failures: DashMap::new(),
                latencies: DashMap::new(),
                gates: DashMap::new(),
                fetch_counts: DashMap::new(),
                default_latency: None,
            }
        }

        /// Delay every answer by `latency` unless a per-base latency is set.
        pub fn with_latency(mut self, latency: Duration) -> Self {
            self.default_latency = Some(latency);
            self
        }

        /// Serve `table` for `base`, clearing any injected failure.
        pub fn set_rates(&self, base: CurrencyCode, table: RateTable) {
            self.failures.remove(&base);
            self.snapshots
                .insert(base.clone(), RateSnapshot::new(base, table));
        }

        /// Fail every fetch for `base` with `error`.
        pub fn fail_with(&self, base: CurrencyCode, error: FetchError) {
            self.failures.insert(base, error);
        }

        pub fn set_latency(&self, base: CurrencyCode, latency: Duration) {
            self.latencies.insert(base, latency);
        }

        /// Park fetches for `base` until released.
        pub fn hold(&self, base: CurrencyCode) {
            let (tx, _rx) = watch::channel(false);
            self.gates.insert(base, tx);
        }

        /// Let parked and future fetches for `base` complete.
        pub fn release(&self, base: &CurrencyCode) {
            if let Some((_, tx)) = self.gates.remove(base) {
                tx.send_replace(true);
            }
        }

        /// Number of fetches started for `base`.
        pub fn fetch_count(&self, base: &CurrencyCode) -> usize {
            self.fetch_counts.get(base).map(|c| *c).unwrap_or(0)
        }
    }

    #[async_trait]
    impl RateProvider for MockRateProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn fetch_rates(&self, base: &CurrencyCode) -> Result<RateSnapshot, FetchError> {
            *self.fetch_counts.entry(base.clone()).or_insert(0) += 1;

            let outcome = match self.failures.get(base) {
                Some(error) => Err(error.clone()),
                None => self
                    .snapshots
                    .get(base)
                    .map(|s| s.clone())
                    .ok_or_else(|| FetchError::Status {
                        base: base.clone(),
                        status: 404,
                    }),
            };

            let latency = self
                .latencies
                .get(base)
                .map(|l| *l)
                .or(self.default_latency);
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }

            let gate = self.gates.get(base).map(|g| g.subscribe());
            if let Some(mut gate) = gate {
                // A dropped sender means the gate was released.
                let _ = gate.wait_for(|open| *open).await;
            }

            outcome
        }
    }
}
