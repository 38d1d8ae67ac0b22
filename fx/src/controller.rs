//! Conversion state machine.
//!
//! The controller owns the two amounts and the two currency selections.
//! User events are plain `&mut self` calls processed to completion one at a
//! time. The only asynchronous input is the rate cache: the controller
//! subscribes to the table of its source currency and the subscription feeds
//! a channel that [`ConversionController::pump`] and
//! [`ConversionController::settle`] drain.

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use ratewise_common::CurrencyCode;

use crate::cache::{FetchStatus, SharedRateTableCache, Subscription};
use crate::config::ConverterConfig;
use crate::conversion;
use crate::error::{ConvertError, ConvertResult};

/// What both input views render from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionState {
    pub amount_in: f64,
    pub currency_from: CurrencyCode,
    pub currency_to: CurrencyCode,
    pub amount_out: f64,
}

/// Status change forwarded from the cache, tagged with the subscription epoch.
#[derive(Debug)]
struct RateUpdate {
    epoch: u64,
    base: CurrencyCode,
    status: FetchStatus,
}

/// Drives one conversion form.
pub struct ConversionController {
    cache: SharedRateTableCache,
    state: ConversionState,
    /// Bumped on every resubscription; older updates are stale.
    epoch: u64,
    subscription: Option<Subscription>,
    updates_tx: mpsc::UnboundedSender<RateUpdate>,
    updates_rx: mpsc::UnboundedReceiver<RateUpdate>,
    published: watch::Sender<ConversionState>,
    stale_discarded: u64,
}

impl ConversionController {
    /// Create a controller converting `from` into `to`, starting at zero.
    pub fn new(cache: SharedRateTableCache, from: CurrencyCode, to: CurrencyCode) -> Self {
        let state = ConversionState {
            amount_in: 0.0,
            currency_from: from,
            currency_to: to,
            amount_out: 0.0,
        };
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (published, _) = watch::channel(state.clone());

        let mut controller = Self {
            cache,
            state,
            epoch: 0,
            subscription: None,
            updates_tx,
            updates_rx,
            published,
            stale_discarded: 0,
        };
        controller.watch_source();
        controller.recompute();
        controller
    }

    /// Create a controller using the configured default currencies.
    pub fn from_config(cache: SharedRateTableCache, config: &ConverterConfig) -> ConvertResult<Self> {
        let (from, to) = config.default_pair()?;
        Ok(Self::new(cache, from, to))
    }

    pub fn state(&self) -> &ConversionState {
        &self.state
    }

    /// Receiver that observes every state change.
    pub fn watch(&self) -> watch::Receiver<ConversionState> {
        self.published.subscribe()
    }

    /// Cache status of the source currency's table.
    pub fn source_status(&self) -> FetchStatus {
        self.cache.get(&self.state.currency_from)
    }

    /// Options for both currency selectors, taken from the source table.
    pub fn currency_options(&self) -> Vec<CurrencyCode> {
        conversion::available_currencies(&self.source_status().table_or_empty())
    }

    /// Label of the explicit convert action, e.g. "Convert USD to INR".
    pub fn submit_label(&self) -> String {
        format!(
            "Convert {} to {}",
            self.state.currency_from.to_display_upper(),
            self.state.currency_to.to_display_upper()
        )
    }

    /// Number of cache updates dropped because they belonged to an earlier
    /// source currency.
    pub fn stale_updates_discarded(&self) -> u64 {
        self.stale_discarded
    }

    pub fn set_amount_in(&mut self, amount: f64) -> ConvertResult<()> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(ConvertError::InvalidAmount(amount.to_string()));
        }

        self.state.amount_in = amount;
        self.recompute();
        Ok(())
    }

    pub fn set_currency_from(&mut self, currency: CurrencyCode) {
        debug!(from = %currency, "Source currency changed");
        self.state.currency_from = currency;
        self.watch_source();
        self.recompute();
    }

    pub fn set_currency_to(&mut self, currency: CurrencyCode) {
        debug!(to = %currency, "Target currency changed");
        self.state.currency_to = currency;
        self.recompute();
    }

    /// Exchange source and target.
    ///
    /// The previous output becomes the new input and vice versa, so each side
    /// keeps showing what the user last saw. The output is recomputed once
    /// the new source table is delivered by the subscription, not from
    /// whatever table happens to be loaded now.
    pub fn swap(&mut self) {
        let state = &mut self.state;
        std::mem::swap(&mut state.currency_from, &mut state.currency_to);
        std::mem::swap(&mut state.amount_in, &mut state.amount_out);
        debug!(from = %state.currency_from, to = %state.currency_to, "Swapped currencies");

        if self.watch_source() {
            self.publish();
        } else {
            // Same currency on both sides: no new subscription will fire.
            self.recompute();
        }
    }

    /// Explicit convert action; same result as the automatic recomputation.
    pub fn submit(&mut self) {
        self.recompute();
    }

    /// Ask the cache to retry the source table after a failure.
    pub fn retry_rates(&mut self) -> FetchStatus {
        self.cache.ensure(&self.state.currency_from)
    }

    /// Force a refetch of the source table.
    pub fn refresh_rates(&mut self) -> FetchStatus {
        self.cache.refresh(&self.state.currency_from)
    }

    /// Recompute `amount_out` from the current state and cached table.
    pub fn recompute(&mut self) {
        let status = self.cache.get(&self.state.currency_from);
        self.state.amount_out = conversion::convert(
            self.state.amount_in,
            &status.table_or_empty(),
            &self.state.currency_to,
        );
        self.publish();
    }

    /// Apply every update already queued, without waiting.
    ///
    /// Returns how many triggered a recomputation.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(update) = self.updates_rx.try_recv() {
            if self.apply_update(update) {
                applied += 1;
            }
        }
        applied
    }

    /// Wait for the next update from the cache and apply it.
    pub async fn next_update(&mut self) -> bool {
        match self.updates_rx.recv().await {
            Some(update) => self.apply_update(update),
            None => false,
        }
    }

    /// Process updates until the source table is no longer loading.
    pub async fn settle(&mut self) -> &ConversionState {
        loop {
            self.pump();
            if !self.source_status().is_pending() {
                break;
            }
            if let Some(update) = self.updates_rx.recv().await {
                self.apply_update(update);
            }
        }

        // The status can flip before its notification is queued.
        self.recompute();
        &self.state
    }

    /// Subscribe to the source table unless already subscribed to it, then
    /// make sure it is loading. Returns whether a new subscription was made.
    fn watch_source(&mut self) -> bool {
        let from = self.state.currency_from.clone();
        let subscribed = self
            .subscription
            .as_ref()
            .is_some_and(|s| s.base() == &from);

        if !subscribed {
            self.epoch += 1;
            self.subscription = None;

            let tx = self.updates_tx.clone();
            let epoch = self.epoch;
            self.subscription = Some(self.cache.subscribe(&from, move |base, status| {
                let _ = tx.send(RateUpdate {
                    epoch,
                    base: base.clone(),
                    status: status.clone(),
                });
            }));
        }

        self.cache.ensure(&from);
        !subscribed
    }

    fn apply_update(&mut self, update: RateUpdate) -> bool {
        if update.epoch != self.epoch {
            self.stale_discarded += 1;
            debug!(
                base = %update.base,
                epoch = update.epoch,
                current = self.epoch,
                "Ignoring update for previous source currency"
            );
            return false;
        }

        if !update.status.is_settled() {
            return false;
        }

        self.recompute();
        info!(
            base = %update.base,
            status = update.status.label(),
            amount_out = self.state.amount_out,
            "Recomputed after rate update"
        );
        true
    }

    fn publish(&self) {
        self.published.send_replace(self.state.clone());
    }
}
