//! Scripted conversion scenarios.

use serde::{Deserialize, Serialize};

/// A named sequence of steps run against the mock provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScenarioStep {
    /// Open a conversion form for a currency pair.
    Open { from: String, to: String },
    /// Serve these rates for `base` from now on.
    ServeRates {
        base: String,
        rates: Vec<(String, f64)>,
    },
    /// Make every fetch for `base` fail with a network error.
    FailRates { base: String, reason: String },
    /// Park fetches for `base`.
    Hold { base: String },
    /// Let parked fetches for `base` complete.
    Release { base: String },
    /// Call `ensure` on the cache directly.
    Ensure { base: String },
    /// Wait until the cache entry for `base` is settled.
    AwaitRates { base: String },
    SetAmount { amount: f64 },
    SetFrom { currency: String },
    SetTo { currency: String },
    Swap,
    Submit,
    Retry,
    /// Apply queued cache updates without waiting.
    Pump,
    /// Process updates until the source table has settled.
    Settle,
    /// Check a condition.
    Expect { condition: ExpectCondition },
}

/// Conditions a scenario can check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExpectCondition {
    AmountIn { amount: f64 },
    AmountOut { amount: f64 },
    Pair { from: String, to: String },
    /// Cache status label: `not_requested`, `pending`, `ready` or `failed`.
    Status { base: String, status: String },
    FetchCount { base: String, count: usize },
    StaleDiscarded { at_least: u64 },
}

fn step_expect(condition: ExpectCondition) -> ScenarioStep {
    ScenarioStep::Expect { condition }
}

fn owned(code: &str) -> String {
    code.to_string()
}

impl Scenario {
    /// Names accepted by [`Scenario::load`].
    pub const NAMES: [&'static str; 5] = [
        "basic-conversion",
        "deduplicated-fetch",
        "swap",
        "failed-fetch",
        "stale-response",
    ];

    /// Load a scenario by name.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "basic-conversion" => Ok(Self::basic_conversion()),
            "deduplicated-fetch" => Ok(Self::deduplicated_fetch()),
            "swap" => Ok(Self::swap()),
            "failed-fetch" => Ok(Self::failed_fetch()),
            "stale-response" => Ok(Self::stale_response()),
            _ => Err(anyhow::anyhow!(
                "Unknown scenario: {} (expected one of {})",
                name,
                Self::NAMES.join(", ")
            )),
        }
    }

    /// usd to inr at 83.1.
    fn basic_conversion() -> Self {
        Self {
            name: "basic-conversion".to_string(),
            description: "Convert 10 USD to INR once the table loads".to_string(),
            steps: vec![
                ScenarioStep::ServeRates {
                    base: owned("usd"),
                    rates: vec![(owned("inr"), 83.1), (owned("eur"), 0.91)],
                },
                ScenarioStep::Open {
                    from: owned("usd"),
                    to: owned("inr"),
                },
                ScenarioStep::SetAmount { amount: 10.0 },
                ScenarioStep::Settle,
                step_expect(ExpectCondition::AmountOut { amount: 831.0 }),
                ScenarioStep::Submit,
                step_expect(ExpectCondition::AmountOut { amount: 831.0 }),
            ],
        }
    }

    /// Two ensures while the first fetch is in flight share one request.
    fn deduplicated_fetch() -> Self {
        Self {
            name: "deduplicated-fetch".to_string(),
            description: "Concurrent requests for one base start a single fetch".to_string(),
            steps: vec![
                ScenarioStep::Hold { base: owned("usd") },
                ScenarioStep::Open {
                    from: owned("usd"),
                    to: owned("inr"),
                },
                ScenarioStep::Ensure { base: owned("usd") },
                ScenarioStep::Ensure { base: owned("usd") },
                step_expect(ExpectCondition::Status {
                    base: owned("usd"),
                    status: owned("pending"),
                }),
                ScenarioStep::Release { base: owned("usd") },
                ScenarioStep::AwaitRates { base: owned("usd") },
                step_expect(ExpectCondition::FetchCount {
                    base: owned("usd"),
                    count: 1,
                }),
                step_expect(ExpectCondition::Status {
                    base: owned("usd"),
                    status: owned("ready"),
                }),
            ],
        }
    }

    /// Swapping exchanges both the currencies and the amounts.
    fn swap() -> Self {
        Self {
            name: "swap".to_string(),
            description: "Swap source and target after a conversion".to_string(),
            steps: vec![
                ScenarioStep::ServeRates {
                    base: owned("usd"),
                    rates: vec![(owned("eur"), 0.5)],
                },
                ScenarioStep::Open {
                    from: owned("usd"),
                    to: owned("eur"),
                },
                ScenarioStep::SetAmount { amount: 100.0 },
                ScenarioStep::Settle,
                step_expect(ExpectCondition::AmountOut { amount: 50.0 }),
                ScenarioStep::Swap,
                step_expect(ExpectCondition::Pair {
                    from: owned("eur"),
                    to: owned("usd"),
                }),
                step_expect(ExpectCondition::AmountIn { amount: 50.0 }),
                step_expect(ExpectCondition::AmountOut { amount: 100.0 }),
                ScenarioStep::Swap,
                step_expect(ExpectCondition::Pair {
                    from: owned("usd"),
                    to: owned("eur"),
                }),
            ],
        }
    }

    /// A failed table yields zero and stays failed until retried.
    fn failed_fetch() -> Self {
        Self {
            name: "failed-fetch".to_string(),
            description: "Network failure for a base, then an explicit retry".to_string(),
            steps: vec![
                ScenarioStep::FailRates {
                    base: owned("xyz"),
                    reason: owned("connection reset"),
                },
                ScenarioStep::Open {
                    from: owned("xyz"),
                    to: owned("usd"),
                },
                ScenarioStep::SetAmount { amount: 5.0 },
                ScenarioStep::Settle,
                step_expect(ExpectCondition::Status {
                    base: owned("xyz"),
                    status: owned("failed"),
                }),
                step_expect(ExpectCondition::AmountOut { amount: 0.0 }),
                ScenarioStep::ServeRates {
                    base: owned("xyz"),
                    rates: vec![(owned("usd"), 2.0)],
                },
                ScenarioStep::Submit,
                step_expect(ExpectCondition::Status {
                    base: owned("xyz"),
                    status: owned("failed"),
                }),
                step_expect(ExpectCondition::FetchCount {
                    base: owned("xyz"),
                    count: 1,
                }),
                ScenarioStep::Retry,
                ScenarioStep::Settle,
                step_expect(ExpectCondition::Status {
                    base: owned("xyz"),
                    status: owned("ready"),
                }),
                step_expect(ExpectCondition::AmountOut { amount: 10.0 }),
            ],
        }
    }

    /// A slow answer for an abandoned source currency is ignored.
    fn stale_response() -> Self {
        Self {
            name: "stale-response".to_string(),
            description: "Switch source twice before the first table arrives".to_string(),
            steps: vec![
                ScenarioStep::Open {
                    from: owned("usd"),
                    to: owned("inr"),
                },
                ScenarioStep::SetAmount { amount: 10.0 },
                ScenarioStep::Settle,
                ScenarioStep::Hold { base: owned("eur") },
                ScenarioStep::SetFrom {
                    currency: owned("eur"),
                },
                ScenarioStep::SetFrom {
                    currency: owned("gbp"),
                },
                ScenarioStep::Settle,
                ScenarioStep::Release { base: owned("eur") },
                ScenarioStep::AwaitRates { base: owned("eur") },
                ScenarioStep::Pump,
                step_expect(ExpectCondition::Pair {
                    from: owned("gbp"),
                    to: owned("inr"),
                }),
                step_expect(ExpectCondition::AmountOut { amount: 1052.0 }),
                step_expect(ExpectCondition::StaleDiscarded { at_least: 1 }),
            ],
        }
    }
}
