//! Error types shared across Ratewise crates.

use crate::CurrencyCode;
use thiserror::Error;

/// Failure retrieving a rate table for a base currency.
///
/// Stored inside the cache's fetch status, hence `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Transport-level failure.
    #[error("Network error: {0}")]
    Network(String),

    /// The data source answered with a non-success status.
    #[error("Rate source returned HTTP {status} for {base}")]
    Status { base: CurrencyCode, status: u16 },

    /// The response body was not a rate table.
    #[error("Malformed rate data: {0}")]
    Parse(String),

    /// The response parsed but carried no table for the requested base.
    #[error("No rate table for {0} in response")]
    MissingTable(CurrencyCode),

    /// The fetch did not complete in time.
    #[error("Fetch timed out for {0}")]
    Timeout(CurrencyCode),
}

impl FetchError {
    /// Whether calling `ensure` again has a reasonable chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Timeout(_) => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Parse(_) | FetchError::MissingTable(_) => false,
        }
    }

    /// Stable error code for logs and presentation.
    pub fn error_code(&self) -> &'static str {
        match self {
            FetchError::Network(_) => "NETWORK_ERROR",
            FetchError::Status { .. } => "HTTP_STATUS",
            FetchError::Parse(_) => "PARSE_ERROR",
            FetchError::MissingTable(_) => "MISSING_TABLE",
            FetchError::Timeout(_) => "TIMEOUT",
        }
    }
}

/// Target currency absent from an otherwise valid rate table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("No rate for {target} in table")]
pub struct MissingRateError {
    pub target: CurrencyCode,
}

/// A string that is not a currency code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid currency code: {0:?}")]
pub struct InvalidCurrencyCode(pub String);

/// A multiplier that is not finite and strictly positive.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Invalid rate {rate} for {code}")]
pub struct InvalidRate {
    pub code: CurrencyCode,
    pub rate: f64,
}
