//! Ratewise FX
//!
//! Live currency conversion: a per-base-currency rate table cache, stateless
//! conversion functions, and the controller that keeps two linked amount
//! fields consistent while rate tables load in the background.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ratewise_fx::{ConversionController, ConverterConfig, HttpRateProvider, RateTableCache};
//!
//! let config = ConverterConfig::from_env();
//! let provider = Arc::new(HttpRateProvider::new(&config.provider)?);
//! let cache = Arc::new(RateTableCache::with_config(provider, config.cache.clone()));
//!
//! let mut controller = ConversionController::from_config(cache, &config)?;
//! controller.set_amount_in(10.0)?;
//! let state = controller.settle().await;
//! println!("{} {} = {} {}", state.amount_in, state.currency_from, state.amount_out, state.currency_to);
//! ```

pub mod cache;
pub mod config;
pub mod controller;
pub mod conversion;
pub mod error;
pub mod http;
pub mod provider;
pub mod view;

pub use cache::{CacheStats, FetchStatus, RateTableCache, SharedRateTableCache, Subscription};
pub use config::{CacheConfig, ConverterConfig, ProviderConfig};
pub use controller::{ConversionController, ConversionState};
pub use error::{ConvertError, ConvertResult};
pub use http::HttpRateProvider;
pub use provider::RateProvider;
pub use view::{CurrencyInputView, InputIntent, Side};

#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockRateProvider;
