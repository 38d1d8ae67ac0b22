//! Ratewise Simulator
//!
//! Drives the conversion controller through scripted scenarios, random soak
//! runs, or a one-shot conversion against the live rate API.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod controller;
mod metrics;
mod scenario;

use controller::SimulationController;
use ratewise_fx::view::format_amount;
use ratewise_fx::{ConversionController, ConverterConfig, HttpRateProvider, RateTableCache};
use scenario::Scenario;

/// Ratewise Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Ratewise conversion test and simulation environment")]
struct Args {
    /// Scenario to run
    #[arg(short, long, conflicts_with_all = ["soak", "live"])]
    scenario: Option<String>,

    /// Number of random events to apply
    #[arg(long, conflicts_with = "live")]
    soak: Option<u64>,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Convert once against the live rate API
    #[arg(long)]
    live: bool,

    /// Source currency (live mode)
    #[arg(long)]
    from: Option<String>,

    /// Target currency (live mode)
    #[arg(long)]
    to: Option<String>,

    /// Amount to convert (live mode)
    #[arg(long, default_value = "1.0")]
    amount: f64,

    /// Swap the pair after converting (live mode)
    #[arg(long)]
    swap: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json);

    info!("Starting Ratewise Simulator");

    if args.live {
        return run_live(&args).await;
    }

    let mut controller = SimulationController::new(args.seed)?;

    if let Some(steps) = args.soak {
        info!("Running soak with {} steps", steps);
        controller.run_soak(steps).await?;
    } else {
        let names = match &args.scenario {
            Some(name) => vec![name.as_str()],
            None => Scenario::NAMES.to_vec(),
        };
        for name in names {
            let scenario = Scenario::load(name)?;
            controller.run_scenario(scenario).await?;
        }
    }

    // Print metrics
    let metrics = controller.get_metrics();
    info!("Simulation complete");
    info!("Steps executed: {}", metrics.steps_executed);
    info!("Checks passed: {}", metrics.checks_passed);
    info!("Checks failed: {}", metrics.checks_failed);
    info!("Stale updates discarded: {}", metrics.stale_discarded);
    info!(
        "Settle time: avg {}us, p99 {}us",
        metrics.average_settle_us(),
        metrics.p99_settle_us()
    );

    if !metrics.all_checks_passed() {
        anyhow::bail!("{} check(s) failed", metrics.checks_failed);
    }

    Ok(())
}

async fn run_live(args: &Args) -> anyhow::Result<()> {
    let mut config = ConverterConfig::from_env();
    if let Some(from) = &args.from {
        config.default_from = from.clone();
    }
    if let Some(to) = &args.to {
        config.default_to = to.clone();
    }
    config.validate().context("invalid configuration")?;

    let provider = Arc::new(HttpRateProvider::new(&config.provider)?);
    let cache = Arc::new(RateTableCache::with_config(provider, config.cache.clone()));
    let mut converter = ConversionController::from_config(cache, &config)?;

    converter.set_amount_in(args.amount)?;
    converter.settle().await;
    report(&converter);

    if args.swap {
        converter.swap();
        converter.settle().await;
        report(&converter);
    }

    Ok(())
}

fn report(converter: &ConversionController) {
    let state = converter.state();
    let status = converter.source_status();

    if let Some(error) = status.error() {
        warn!(
            base = %state.currency_from,
            code = error.error_code(),
            retryable = error.is_retryable(),
            "Rates unavailable: {}",
            error
        );
    }

    info!(
        rates_date = ?status.snapshot().and_then(|s| s.date),
        "{}: {} {} = {} {}",
        converter.submit_label(),
        format_amount(state.amount_in, &state.currency_from),
        state.currency_from.to_display_upper(),
        format_amount(state.amount_out, &state.currency_to),
        state.currency_to.to_display_upper(),
    );
}
