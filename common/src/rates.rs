//! Rate tables.

use chrono::NaiveDate;
use serde::de::{IgnoredAny, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

use crate::error::InvalidRate;
use crate::CurrencyCode;

fn is_valid_rate(rate: f64) -> bool {
    rate.is_finite() && rate > 0.0
}

/// Multipliers from one base currency to each listed target currency.
///
/// Keys keep the order in which the source data listed them; the currency
/// selector's option list is taken verbatim from [`RateTable::codes`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateTable {
    entries: Vec<(CurrencyCode, f64)>,
    index: HashMap<CurrencyCode, usize>,
}

impl RateTable {
    /// An empty table, standing in for "rates not loaded".
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a table from `(code, rate)` pairs in order.
    ///
    /// Every rate must be finite and strictly positive.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, InvalidRate>
    where
        I: IntoIterator<Item = (CurrencyCode, f64)>,
    {
        let mut table = Self::default();
        for (code, rate) in pairs {
            if !is_valid_rate(rate) {
                return Err(InvalidRate { code, rate });
            }
            table.insert(code, rate);
        }
        Ok(table)
    }

    /// A repeated code keeps its first position and takes the newest rate.
    fn insert(&mut self, code: CurrencyCode, rate: f64) {
        match self.index.get(&code) {
            Some(&pos) => self.entries[pos].1 = rate,
            None => {
                self.index.insert(code.clone(), self.entries.len());
                self.entries.push((code, rate));
            }
        }
    }

    /// Multiplier for `target`, if listed.
    pub fn get(&self, target: &CurrencyCode) -> Option<f64> {
        self.index.get(target).map(|&pos| self.entries[pos].1)
    }

    pub fn contains(&self, target: &CurrencyCode) -> bool {
        self.index.contains_key(target)
    }

    /// Codes in source order.
    pub fn codes(&self) -> impl Iterator<Item = &CurrencyCode> {
        self.entries.iter().map(|(code, _)| code)
    }

    /// `(code, rate)` pairs in source order.
    pub fn iter(&self) -> impl Iterator<Item = (&CurrencyCode, f64)> {
        self.entries.iter().map(|(code, rate)| (code, *rate))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for RateTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (code, rate) in &self.entries {
            map.serialize_entry(code, rate)?;
        }
        map.end()
    }
}

/// A row value as published; anything but a number is skipped.
#[derive(Deserialize)]
#[serde(untagged)]
enum RateValue {
    Number(f64),
    Other(IgnoredAny),
}

struct RateTableVisitor;

impl<'de> Visitor<'de> for RateTableVisitor {
    type Value = RateTable;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of currency codes to numeric rates")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<RateTable, A::Error> {
        let mut table = RateTable::default();

        while let Some(key) = access.next_key::<String>()? {
            let code = match CurrencyCode::new(&key) {
                Ok(code) => code,
                Err(_) => {
                    warn!(key = %key, "Skipping rate row with invalid currency code");
                    access.next_value::<IgnoredAny>()?;
                    continue;
                }
            };

            let rate = match access.next_value::<RateValue>()? {
                RateValue::Number(rate) => rate,
                RateValue::Other(_) => {
                    warn!(code = %code, "Skipping non-numeric rate");
                    continue;
                }
            };
            if !is_valid_rate(rate) {
                warn!(code = %code, rate, "Skipping non-positive rate");
                continue;
            }

            table.insert(code, rate);
        }

        Ok(table)
    }
}

impl<'de> Deserialize<'de> for RateTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(RateTableVisitor)
    }
}

/// A rate table as delivered by a provider for one base currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSnapshot {
    /// Currency every multiplier converts from.
    pub base: CurrencyCode,
    /// Publication date reported by the data source, when it gives one.
    pub date: Option<NaiveDate>,
    pub table: RateTable,
}

impl RateSnapshot {
    pub fn new(base: CurrencyCode, table: RateTable) -> Self {
        Self {
            base,
            date: None,
            table,
        }
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }
}
