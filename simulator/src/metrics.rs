//! Client-side outcome and latency tracking for simulated transfers.

use std::time::Duration;

use simplebank_common::ErrorKind;

/// Latency samples kept per run; older samples are overwritten.
const LATENCY_WINDOW: usize = 10_000;

/// Latency distribution over the retained samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencySummary {
    pub mean: Duration,
    pub p50: Duration,
    pub p99: Duration,
    pub max: Duration,
}

/// Outcomes observed by the simulator.
#[derive(Debug, Clone, Default)]
pub struct SimulationMetrics {
    pub total_transfers: u64,
    pub committed_transfers: u64,
    pub failed_transfers: u64,
    /// Failures that surfaced as `Conflict` after retries ran out.
    pub conflict_failures: u64,
    latencies: Vec<Duration>,
    /// Ring position of the next overwrite once the window is full.
    cursor: usize,
}

impl SimulationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a committed transfer and how long the caller waited for it.
    pub fn record_success(&mut self, latency: Duration) {
        self.total_transfers += 1;
        self.committed_transfers += 1;

        if self.latencies.len() < LATENCY_WINDOW {
            self.latencies.push(latency);
        } else {
            self.latencies[self.cursor] = latency;
            self.cursor = (self.cursor + 1) % LATENCY_WINDOW;
        }
    }

    pub fn record_failure(&mut self, kind: ErrorKind) {
        self.total_transfers += 1;
        self.failed_transfers += 1;
        if kind == ErrorKind::Conflict {
            self.conflict_failures += 1;
        }
    }

    /// Summarize committed-transfer latency, or all zeros when none committed.
    pub fn latency(&self) -> LatencySummary {
        let mut sorted = self.latencies.clone();
        sorted.sort_unstable();
        let Some(&max) = sorted.last() else {
            return LatencySummary::default();
        };

        let rank = |pct: usize| sorted[(sorted.len() * pct / 100).min(sorted.len() - 1)];
        let total: Duration = sorted.iter().sum();
        LatencySummary {
            mean: total / sorted.len() as u32,
            p50: rank(50),
            p99: rank(99),
            max,
        }
    }

    /// Fraction of attempted transfers that committed.
    pub fn success_rate(&self) -> f64 {
        if self.total_transfers == 0 {
            return 0.0;
        }
        self.committed_transfers as f64 / self.total_transfers as f64
    }

    /// Attempted transfers per second over `elapsed`.
    pub fn throughput(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.total_transfers as f64 / secs
    }
}
