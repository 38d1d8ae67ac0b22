//! HTTP rate provider.
//!
//! Talks to the static currency API published on jsDelivr. A request for
//! base `usd` hits `{base_url}/usd.json` and returns:
//!
//! ```json
//! { "date": "2024-03-01", "usd": { "eur": 0.92, "inr": 82.9, ... } }
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use ratewise_common::{CurrencyCode, FetchError, RateSnapshot, RateTable};

use crate::config::ProviderConfig;
use crate::error::{ConvertError, ConvertResult};
use crate::provider::RateProvider;

const PROVIDER_NAME: &str = "CURRENCY_API";

/// Response body: a date plus one table keyed by the requested base.
#[derive(Debug, Deserialize)]
struct RatesResponse {
    date: Option<NaiveDate>,
    #[serde(flatten)]
    tables: HashMap<String, RateTable>,
}

/// Fetches rate tables over HTTP.
pub struct HttpRateProvider {
    client: Client,
    base_url: String,
}

impl HttpRateProvider {
    /// Create a provider from configuration.
    pub fn new(config: &ProviderConfig) -> ConvertResult<Self> {
        config.validate()?;

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConvertError::Config(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, base: &CurrencyCode) -> String {
        format!("{}/{}.json", self.base_url, base)
    }
}

/// Pull the table for `base` out of a response body.
fn parse_body(base: &CurrencyCode, body: &str) -> Result<RateSnapshot, FetchError> {
    let mut response: RatesResponse =
        serde_json::from_str(body).map_err(|e| FetchError::Parse(e.to_string()))?;

    let table = response
        .tables
        .remove(base.as_str())
        .ok_or_else(|| FetchError::MissingTable(base.clone()))?;

    let snapshot = RateSnapshot::new(base.clone(), table);
    Ok(match response.date {
        Some(date) => snapshot.with_date(date),
        None => snapshot,
    })
}

#[async_trait]
impl RateProvider for HttpRateProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    #[instrument(skip_all, fields(base = %base))]
    async fn fetch_rates(&self, base: &CurrencyCode) -> Result<RateSnapshot, FetchError> {
        let url = self.url_for(base);
        debug!(url = %url, "Requesting rate table");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                base: base.clone(),
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        parse_body(base, &body)
    }
}
