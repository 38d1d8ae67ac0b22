//! Currency codes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::InvalidCurrencyCode;

/// Longest code accepted by [`CurrencyCode::new`].
pub const MAX_CODE_LEN: usize = 16;

/// A currency identifier, normalized to lowercase.
///
/// Codes are compared case-insensitively by construction: `"USD"`, `"usd"`
/// and `" Usd "` all produce the same value. Besides ISO 4217 codes the rate
/// source also lists tokens such as `1inch`, so any short ASCII alphanumeric
/// string is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// Parse and normalize a currency code.
    pub fn new(code: impl AsRef<str>) -> Result<Self, InvalidCurrencyCode> {
        let raw = code.as_ref();
        let trimmed = raw.trim();

        if trimmed.is_empty()
            || trimmed.len() > MAX_CODE_LEN
            || !trimmed.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(InvalidCurrencyCode(raw.to_string()));
        }

        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    /// Get the normalized code.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Uppercase form for labels ("usd" -> "USD").
    pub fn to_display_upper(&self) -> String {
        self.0.to_ascii_uppercase()
    }

    /// Conventional number of minor-unit digits shown for this currency.
    pub fn decimal_places(&self) -> u32 {
        match self.0.as_str() {
            "jpy" | "krw" | "vnd" => 0,
            "bhd" | "kwd" | "omr" => 3,
            _ => 2,
        }
    }

    pub fn usd() -> Self {
        Self("usd".to_string())
    }

    pub fn eur() -> Self {
        Self("eur".to_string())
    }

    pub fn gbp() -> Self {
        Self("gbp".to_string())
    }

    pub fn inr() -> Self {
        Self("inr".to_string())
    }

    pub fn jpy() -> Self {
        Self("jpy".to_string())
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CurrencyCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for CurrencyCode {
    type Err = InvalidCurrencyCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for CurrencyCode {
    type Error = InvalidCurrencyCode;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = InvalidCurrencyCode;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.0
    }
}
