//! Conversion error types.

use ratewise_common::InvalidCurrencyCode;
use thiserror::Error;

/// Errors surfaced by the controller and configuration layer.
///
/// Fetch failures are not in here: they travel inside
/// [`FetchStatus::Failed`](crate::cache::FetchStatus::Failed) and never fail
/// a controller call.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// Amount is negative, not finite, or not a number at all.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Currency selector produced something that is not a currency code.
    #[error(transparent)]
    InvalidCurrency(#[from] InvalidCurrencyCode),

    /// Configuration failed validation.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for conversion operations.
pub type ConvertResult<T> = Result<T, ConvertError>;
