//! Simulation metrics.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;

/// Simulation metrics.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationMetrics {
    /// Steps or random events executed.
    pub steps_executed: u64,
    /// Checks that held.
    pub checks_passed: u64,
    /// Checks that did not hold.
    pub checks_failed: u64,
    /// Cache updates the controller dropped as stale.
    pub stale_discarded: u64,
    /// Settle durations (microseconds).
    #[serde(skip)]
    settle_samples: VecDeque<u64>,
    #[serde(skip)]
    max_samples: usize,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            steps_executed: 0,
            checks_passed: 0,
            checks_failed: 0,
            stale_discarded: 0,
            settle_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    pub fn record_step(&mut self) {
        self.steps_executed += 1;
    }

    /// Record the outcome of a check.
    pub fn record_check(&mut self, passed: bool) {
        if passed {
            self.checks_passed += 1;
        } else {
            self.checks_failed += 1;
        }
    }

    /// Record how long a settle took.
    pub fn record_settle(&mut self, elapsed: Duration) {
        if self.settle_samples.len() >= self.max_samples {
            self.settle_samples.pop_front();
        }
        self.settle_samples
            .push_back(elapsed.as_micros().min(u64::MAX as u128) as u64);
    }

    /// Get average settle time in microseconds.
    pub fn average_settle_us(&self) -> u64 {
        if self.settle_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.settle_samples.iter().sum();
        sum / self.settle_samples.len() as u64
    }

    /// Get p99 settle time in microseconds.
    pub fn p99_settle_us(&self) -> u64 {
        if self.settle_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.settle_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * 99 / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    pub fn all_checks_passed(&self) -> bool {
        self.checks_failed == 0
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let mut metrics = SimulationMetrics::new();

        metrics.record_step();
        metrics.record_step();
        metrics.record_check(true);
        metrics.record_check(true);
        metrics.record_check(false);
        metrics.record_settle(Duration::from_micros(100));
        metrics.record_settle(Duration::from_micros(200));
        metrics.record_settle(Duration::from_micros(150));

        assert_eq!(metrics.steps_executed, 2);
        assert_eq!(metrics.checks_passed, 2);
        assert_eq!(metrics.checks_failed, 1);
        assert!(!metrics.all_checks_passed());
        assert_eq!(metrics.average_settle_us(), 150);
        assert_eq!(metrics.p99_settle_us(), 200);
    }

    #[test]
    fn test_empty_metrics() {
        let metrics = SimulationMetrics::default();
        assert_eq!(metrics.average_settle_us(), 0);
        assert_eq!(metrics.p99_settle_us(), 0);
        assert!(metrics.all_checks_passed());
    }
}
