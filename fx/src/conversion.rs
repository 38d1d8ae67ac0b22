//! Stateless conversion functions.
//!
//! Nothing here holds state, so these are safe to call from any task.

use ratewise_common::{CurrencyCode, MissingRateError, RateTable};
use tracing::debug;

/// Convert `amount` using the multiplier for `target`.
///
/// A target missing from `rates` means the pair is not convertible yet
/// (usually because the table has not loaded) and yields `0.0`.
pub fn convert(amount: f64, rates: &RateTable, target: &CurrencyCode) -> f64 {
    match try_convert(amount, rates, target) {
        Ok(value) => value,
        Err(e) => {
            debug!(currency = %e.target, loaded = !rates.is_empty(), "Rate not available, showing 0");
            0.0
        }
    }
}

/// Like [`convert`] but reports a missing rate instead of degrading to zero.
pub fn try_convert(
    amount: f64,
    rates: &RateTable,
    target: &CurrencyCode,
) -> Result<f64, MissingRateError> {
    rates
        .get(target)
        .map(|rate| amount * rate)
        .ok_or_else(|| MissingRateError {
            target: target.clone(),
        })
}

/// Currency options for the selectors, in source order.
pub fn available_currencies(rates: &RateTable) -> Vec<CurrencyCode> {
    rates.codes().cloned().collect()
}
