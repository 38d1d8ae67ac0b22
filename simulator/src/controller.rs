//! Simulation controller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use ratewise_common::{CurrencyCode, FetchError, RateTable};
use ratewise_fx::conversion;
use ratewise_fx::{ConversionController, MockRateProvider, RateTableCache, SharedRateTableCache};

use crate::metrics::SimulationMetrics;
use crate::scenario::{ExpectCondition, Scenario, ScenarioStep};

/// Relative tolerance for amount checks.
const AMOUNT_TOLERANCE: f64 = 1e-9;

/// Currencies the soak run picks from. `xyz` has no table and always fails.
const SOAK_CURRENCIES: [&str; 6] = ["usd", "eur", "gbp", "inr", "jpy", "xyz"];

/// Tables the mock provider serves unless a scenario overrides them.
const SAMPLE_RATES: [(&str, [(&str, f64); 4]); 5] = [
    ("usd", [("inr", 83.1), ("eur", 0.91), ("gbp", 0.79), ("jpy", 151.37)]),
    ("eur", [("usd", 1.09), ("inr", 90.4), ("gbp", 0.86), ("jpy", 164.9)]),
    ("gbp", [("usd", 1.27), ("eur", 1.16), ("inr", 105.2), ("jpy", 191.6)]),
    ("inr", [("usd", 0.012), ("eur", 0.011), ("gbp", 0.0095), ("jpy", 1.82)]),
    ("jpy", [("usd", 0.0066), ("eur", 0.0061), ("gbp", 0.0052), ("inr", 0.55)]),
];

fn code(text: &str) -> anyhow::Result<CurrencyCode> {
    CurrencyCode::new(text).with_context(|| format!("invalid currency code {text:?}"))
}

fn table(rates: &[(String, f64)]) -> anyhow::Result<RateTable> {
    let pairs = rates
        .iter()
        .map(|(c, rate)| Ok((code(c)?, *rate)))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(RateTable::from_pairs(pairs)?)
}

/// Mock provider serving the sample tables, and an empty cache over it.
fn sample_market() -> anyhow::Result<(Arc<MockRateProvider>, SharedRateTableCache)> {
    let provider = Arc::new(MockRateProvider::new("simulator"));
    for (base, rates) in SAMPLE_RATES {
        let rates: Vec<(String, f64)> = rates.iter().map(|(c, r)| (c.to_string(), *r)).collect();
        provider.set_rates(code(base)?, table(&rates)?);
    }

    let cache = Arc::new(RateTableCache::new(provider.clone()));
    Ok((provider, cache))
}

fn amounts_match(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() <= AMOUNT_TOLERANCE * expected.abs().max(1.0)
}

/// A random user event in a soak run.
#[derive(Debug, Clone)]
enum SoakEvent {
    SetAmount(f64),
    SetFrom(CurrencyCode),
    SetTo(CurrencyCode),
    Swap,
    DoubleSwap,
    Submit,
    Settle,
}

/// Drives scenarios and soak runs against the mock provider.
pub struct SimulationController {
    provider: Arc<MockRateProvider>,
    cache: SharedRateTableCache,
    converter: Option<ConversionController>,
    rng: StdRng,
    metrics: SimulationMetrics,
}

impl SimulationController {
    /// Create a controller whose mock serves the sample tables.
    pub fn new(seed: Option<u64>) -> anyhow::Result<Self> {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let (provider, cache) = sample_market()?;

        Ok(Self {
            provider,
            cache,
            converter: None,
            rng,
            metrics: SimulationMetrics::new(),
        })
    }

    /// Start over with an empty cache and freshly seeded mock. Metrics keep
    /// accumulating.
    fn reset(&mut self) -> anyhow::Result<()> {
        let (provider, cache) = sample_market()?;
        self.provider = provider;
        self.cache = cache;
        self.converter = None;
        Ok(())
    }

    /// Run a scenario step by step.
    pub async fn run_scenario(&mut self, scenario: Scenario) -> anyhow::Result<()> {
        info!("Running scenario: {} - {}", scenario.name, scenario.description);
        self.reset()?;

        for step in &scenario.steps {
            self.execute_step(step).await?;
            self.metrics.record_step();
        }

        self.finish();
        Ok(())
    }

    /// Apply `steps` random events, checking the conversion invariant after
    /// every settle.
    pub async fn run_soak(&mut self, steps: u64) -> anyhow::Result<()> {
        info!(steps, "Running soak");
        self.reset()?;

        for base in SOAK_CURRENCIES {
            let latency = Duration::from_millis(self.rng.gen_range(0..5));
            self.provider.set_latency(code(base)?, latency);
        }

        self.converter = Some(ConversionController::new(
            self.cache.clone(),
            CurrencyCode::usd(),
            CurrencyCode::inr(),
        ));

        for _ in 0..steps {
            let event = self.random_event()?;
            debug!(?event, "Soak event");
            self.apply_event(event).await?;
            self.metrics.record_step();
        }

        self.settle().await?;
        self.check_invariant()?;
        self.finish();
        Ok(())
    }

    /// Get simulation metrics.
    pub fn get_metrics(&self) -> &SimulationMetrics {
        &self.metrics
    }

    fn random_event(&mut self) -> anyhow::Result<SoakEvent> {
        let pick = |rng: &mut StdRng| code(SOAK_CURRENCIES[rng.gen_range(0..SOAK_CURRENCIES.len())]);

        Ok(match self.rng.gen_range(0..10) {
            0..=2 => SoakEvent::SetAmount(self.rng.gen_range(0..1_000_000) as f64 / 100.0),
            3 => SoakEvent::SetFrom(pick(&mut self.rng)?),
            4 => SoakEvent::SetTo(pick(&mut self.rng)?),
            5 => SoakEvent::Swap,
            6 => SoakEvent::DoubleSwap,
            7 => SoakEvent::Submit,
            _ => SoakEvent::Settle,
        })
    }

    async fn apply_event(&mut self, event: SoakEvent) -> anyhow::Result<()> {
        match event {
            SoakEvent::SetAmount(amount) => self.converter()?.set_amount_in(amount)?,
            SoakEvent::SetFrom(currency) => self.converter()?.set_currency_from(currency),
            SoakEvent::SetTo(currency) => self.converter()?.set_currency_to(currency),
            SoakEvent::Swap => self.converter()?.swap(),
            SoakEvent::DoubleSwap => {
                let converter = self.converter()?;
                let before = (
                    converter.state().currency_from.clone(),
                    converter.state().currency_to.clone(),
                );
                converter.swap();
                converter.swap();
                let after = (
                    converter.state().currency_from.clone(),
                    converter.state().currency_to.clone(),
                );
                self.check("double swap restores pair", before == after);
            }
            SoakEvent::Submit => {
                let converter = self.converter()?;
                // A table landing between the two submits would change the answer.
                let settled = converter.source_status().is_settled();
                converter.submit();
                let first = converter.state().amount_out;
                converter.submit();
                let second = converter.state().amount_out;
                if settled {
                    self.check("submit is idempotent", first == second);
                }
            }
            SoakEvent::Settle => {
                self.settle().await?;
                self.check_invariant()?;
            }
        }
        Ok(())
    }

    /// After a settle, the output must be exactly the engine's answer for
    /// the current state and the cached source table.
    fn check_invariant(&mut self) -> anyhow::Result<()> {
        let cache = self.cache.clone();
        let state = self.converter()?.state().clone();
        let status = cache.get(&state.currency_from);
        let expected =
            conversion::convert(state.amount_in, &status.table_or_empty(), &state.currency_to);

        self.check("amount_out matches conversion", state.amount_out == expected);
        Ok(())
    }

    async fn settle(&mut self) -> anyhow::Result<()> {
        let start = Instant::now();
        self.converter()?.settle().await;
        self.metrics.record_settle(start.elapsed());
        Ok(())
    }

    fn converter(&mut self) -> anyhow::Result<&mut ConversionController> {
        self.converter
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("no conversion form is open"))
    }

    fn check(&mut self, what: &str, passed: bool) {
        if passed {
            debug!(check = what, "Check passed");
        } else {
            warn!(check = what, "Check failed");
        }
        self.metrics.record_check(passed);
    }

    fn finish(&mut self) {
        if let Some(converter) = &self.converter {
            self.metrics.stale_discarded += converter.stale_updates_discarded();
        }
    }

    /// Execute a single scenario step.
    async fn execute_step(&mut self, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::Open { from, to } => {
                info!("Opening {} -> {}", from, to);
                self.converter = Some(ConversionController::new(
                    self.cache.clone(),
                    code(from)?,
                    code(to)?,
                ));
            }
            ScenarioStep::ServeRates { base, rates } => {
                self.provider.set_rates(code(base)?, table(rates)?);
            }
            ScenarioStep::FailRates { base, reason } => {
                self.provider
                    .fail_with(code(base)?, FetchError::Network(reason.clone()));
            }
            ScenarioStep::Hold { base } => self.provider.hold(code(base)?),
            ScenarioStep::Release { base } => self.provider.release(&code(base)?),
            ScenarioStep::Ensure { base } => {
                let status = self.cache.ensure(&code(base)?);
                debug!(base = %base, status = status.label(), "Ensured");
            }
            ScenarioStep::AwaitRates { base } => {
                let status = self.cache.settled(&code(base)?).await;
                debug!(base = %base, status = status.label(), "Rates settled");
            }
            ScenarioStep::SetAmount { amount } => self.converter()?.set_amount_in(*amount)?,
            ScenarioStep::SetFrom { currency } => {
                let currency = code(currency)?;
                self.converter()?.set_currency_from(currency);
            }
            ScenarioStep::SetTo { currency } => {
                let currency = code(currency)?;
                self.converter()?.set_currency_to(currency);
            }
            ScenarioStep::Swap => self.converter()?.swap(),
            ScenarioStep::Submit => self.converter()?.submit(),
            ScenarioStep::Retry => {
                self.converter()?.retry_rates();
            }
            ScenarioStep::Pump => {
                self.converter()?.pump();
            }
            ScenarioStep::Settle => self.settle().await?,
            ScenarioStep::Expect { condition } => self.expect(condition)?,
        }

        Ok(())
    }

    fn expect(&mut self, condition: &ExpectCondition) -> anyhow::Result<()> {
        let passed = match condition {
            ExpectCondition::AmountIn { amount } => {
                let actual = self.converter()?.state().amount_in;
                info!(expected = amount, actual, "Expect amount_in");
                amounts_match(actual, *amount)
            }
            ExpectCondition::AmountOut { amount } => {
                let actual = self.converter()?.state().amount_out;
                info!(expected = amount, actual, "Expect amount_out");
                amounts_match(actual, *amount)
            }
            ExpectCondition::Pair { from, to } => {
                let (from, to) = (code(from)?, code(to)?);
                let state = self.converter()?.state();
                info!(from = %state.currency_from, to = %state.currency_to, "Expect pair");
                state.currency_from == from && state.currency_to == to
            }
            ExpectCondition::Status { base, status } => {
                let actual = self.cache.get(&code(base)?);
                info!(base = %base, expected = %status, actual = actual.label(), "Expect status");
                actual.label() == status
            }
            ExpectCondition::FetchCount { base, count } => {
                let actual = self.provider.fetch_count(&code(base)?);
                info!(base = %base, expected = count, actual, "Expect fetch count");
                actual == *count
            }
            ExpectCondition::StaleDiscarded { at_least } => {
                let actual = self.converter()?.stale_updates_discarded();
                info!(at_least, actual, "Expect stale updates discarded");
                actual >= *at_least
            }
        };

        self.check(&format!("{condition:?}"), passed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_scenario_passes() {
        for name in Scenario::NAMES {
            let mut sim = SimulationController::new(Some(7)).unwrap();
            sim.run_scenario(Scenario::load(name).unwrap()).await.unwrap();

            let metrics = sim.get_metrics();
            assert!(metrics.checks_passed > 0, "{name} ran no checks");
            assert!(metrics.all_checks_passed(), "{name} failed a check");
        }
    }

    #[tokio::test]
    async fn test_stale_response_counts_discards() {
        let mut sim = SimulationController::new(Some(1)).unwrap();
        sim.run_scenario(Scenario::load("stale-response").unwrap())
            .await
            .unwrap();

        assert!(sim.get_metrics().stale_discarded >= 1);
    }

    #[tokio::test]
    async fn test_soak_holds_invariant() {
        let mut sim = SimulationController::new(Some(42)).unwrap();
        sim.run_soak(200).await.unwrap();

        let metrics = sim.get_metrics();
        assert_eq!(metrics.steps_executed, 200);
        assert!(metrics.checks_passed > 0);
        assert!(metrics.all_checks_passed());
    }

    #[tokio::test]
    async fn test_scenarios_do_not_share_cache() {
        let mut sim = SimulationController::new(Some(3)).unwrap();
        for name in Scenario::NAMES {
            sim.run_scenario(Scenario::load(name).unwrap()).await.unwrap();
        }

        assert!(sim.get_metrics().all_checks_passed());
    }

    #[tokio::test]
    async fn test_step_without_open_form_errors() {
        let mut sim = SimulationController::new(None).unwrap();
        let err = sim.execute_step(&ScenarioStep::Swap).await.unwrap_err();
        assert!(err.to_string().contains("no conversion form"));
    }

    #[test]
    fn test_amounts_match() {
        assert!(amounts_match(10.0 * 83.1, 831.0));
        assert!(amounts_match(0.0, 0.0));
        assert!(!amounts_match(830.0, 831.0));
    }
}
