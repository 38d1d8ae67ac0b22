//! Converter configuration.

use std::time::Duration;

use ratewise_common::CurrencyCode;

use crate::error::{ConvertError, ConvertResult};

/// Default rate source, one JSON document per base currency.
pub const DEFAULT_BASE_URL: &str =
    "https://cdn.jsdelivr.net/gh/fawazahmed0/currency-api@1/latest/currencies";

/// HTTP provider configuration.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// URL prefix; `/{base}.json` is appended per request.
    pub base_url: String,
    /// Per-request timeout enforced by the HTTP client.
    pub request_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ProviderConfig {
    pub fn validate(&self) -> ConvertResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(ConvertError::Config("API URL cannot be empty".to_string()));
        }

        if self.request_timeout.is_zero() {
            return Err(ConvertError::Config(
                "Request timeout cannot be zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Rate cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Upper bound on a single fetch, provider latency included.
    pub fetch_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(45),
        }
    }
}

/// Top-level converter configuration.
#[derive(Debug, Clone)]
pub struct ConverterConfig {
    pub provider: ProviderConfig,
    pub cache: CacheConfig,
    /// Source currency selected at start.
    pub default_from: String,
    /// Target currency selected at start.
    pub default_to: String,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            cache: CacheConfig::default(),
            default_from: "usd".to_string(),
            default_to: "inr".to_string(),
        }
    }
}

fn secs_from_env(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

impl ConverterConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("RATEWISE_API_URL") {
            config.provider.base_url = url;
        }

        if let Some(timeout) = secs_from_env("RATEWISE_REQUEST_TIMEOUT_SECS") {
            config.provider.request_timeout = timeout;
        }

        if let Some(timeout) = secs_from_env("RATEWISE_FETCH_TIMEOUT_SECS") {
            config.cache.fetch_timeout = timeout;
        }

        if let Ok(from) = std::env::var("RATEWISE_DEFAULT_FROM") {
            config.default_from = from;
        }

        if let Ok(to) = std::env::var("RATEWISE_DEFAULT_TO") {
            config.default_to = to;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> ConvertResult<()> {
        self.provider.validate()?;

        if self.cache.fetch_timeout.is_zero() {
            return Err(ConvertError::Config(
                "Fetch timeout cannot be zero".to_string(),
            ));
        }

        self.default_pair()?;

        Ok(())
    }

    /// Parsed default currencies.
    pub fn default_pair(&self) -> ConvertResult<(CurrencyCode, CurrencyCode)> {
        Ok((
            CurrencyCode::new(&self.default_from)?,
            CurrencyCode::new(&self.default_to)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConverterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.default_pair().unwrap(),
            (CurrencyCode::usd(), CurrencyCode::inr())
        );
    }

    #[test]
    fn test_invalid_config() {
        let mut config = ConverterConfig::default();
        config.provider.base_url = String::new();
        assert!(matches!(config.validate(), Err(ConvertError::Config(_))));

        let mut config = ConverterConfig::default();
        config.cache.fetch_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = ConverterConfig::default();
        config.default_to = "not a code".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConvertError::InvalidCurrency(_))
        ));
    }
}
