//! Per-breaker metrics collection
//!
//! Every breaker owns a [`MetricsCollector`] that counts requests by outcome,
//! counts state transitions by target state, and keeps the latencies of the
//! most recent executions in a fixed-capacity ring buffer.
//!
//! Latency statistics are derived on demand: [`MetricsCollector::snapshot`]
//! sorts a copy of the window each time it is called. With the window bounded
//! at [`LATENCY_WINDOW`] samples this stays cheap, but it is not meant for
//! high-frequency polling of a much larger window.
//!
//! # Example
//!
//! ```
//! use conductor_core_breaker::metrics::MetricsCollector;
//! use std::time::Duration;
//!
//! let metrics = MetricsCollector::new();
//! metrics.record_success(Duration::from_millis(10));
//! metrics.record_failure(Duration::from_millis(30));
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.requests_total, 2);
//! assert_eq!(snapshot.avg_latency, Duration::from_millis(20));
//! ```

use crate::circuit_breaker::CircuitState;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

/// Number of latency samples retained for percentile computation
pub const LATENCY_WINDOW: usize = 100;

/// Point-in-time copy of a breaker's metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Every admission attempt, including rejected ones
    pub requests_total: u64,
    /// Executions that returned `Ok`
    pub requests_successful: u64,
    /// Executions that failed, panicked or were abandoned
    pub requests_failed: u64,
    /// Admission attempts refused while open or with the bulkhead full
    pub requests_rejected: u64,
    /// Transition count keyed by the name of the state entered
    pub state_transitions: BTreeMap<String, u64>,
    /// Number of samples currently in the latency window
    pub sample_count: usize,
    pub avg_latency: Duration,
    pub min_latency: Duration,
    pub max_latency: Duration,
    pub p50_latency: Duration,
    pub p95_latency: Duration,
    pub p99_latency: Duration,
}

impl MetricsSnapshot {
    /// Fraction of executed requests that failed (0.0 when nothing ran)
    pub fn failure_rate(&self) -> f64 {
        let executed = self.requests_successful + self.requests_failed;
        if executed == 0 {
            0.0
        } else {
            self.requests_failed as f64 / executed as f64
        }
    }

    /// Transitions into `state` recorded so far
    pub fn transitions_to(&self, state: CircuitState) -> u64 {
        self.state_transitions
            .get(state.as_str())
            .copied()
            .unwrap_or(0)
    }
}

#[derive(Debug, Default)]
struct MetricsInner {
    requests_total: u64,
    requests_successful: u64,
    requests_failed: u64,
    requests_rejected: u64,
    state_transitions: BTreeMap<String, u64>,
    latencies: VecDeque<Duration>,
}

impl MetricsInner {
    fn push_latency(&mut self, latency: Duration) {
        if self.latencies.len() == LATENCY_WINDOW {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
    }
}

/// Thread-safe metrics sink for a single breaker
#[derive(Debug)]
pub struct MetricsCollector {
    inner: Mutex<MetricsInner>,
}

impl MetricsCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsInner {
                latencies: VecDeque::with_capacity(LATENCY_WINDOW),
                ..Default::default()
            }),
        }
    }

    /// Record a successful execution and its latency
    pub fn record_success(&self, latency: Duration) {
        let mut inner = self.inner.lock();
        inner.requests_total += 1;
        inner.requests_successful += 1;
        inner.push_latency(latency);
    }

    /// Record a failed execution and its latency
    pub fn record_failure(&self, latency: Duration) {
        let mut inner = self.inner.lock();
        inner.requests_total += 1;
        inner.requests_failed += 1;
        inner.push_latency(latency);
    }

    /// Record an admission attempt that was refused
    pub fn record_rejection(&self) {
        let mut inner = self.inner.lock();
        inner.requests_total += 1;
        inner.requests_rejected += 1;
    }

    /// Record a transition into `to`
    pub fn record_transition(&self, to: CircuitState) {
        let mut inner = self.inner.lock();
        *inner
            .state_transitions
            .entry(to.as_str().to_string())
            .or_insert(0) += 1;
    }

    /// Clear every counter and the latency window
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        *inner = MetricsInner::default();
    }

    /// Compute a snapshot, including latency statistics over the window
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (mut snapshot, mut samples) = {
            let inner = self.inner.lock();
            let snapshot = MetricsSnapshot {
                requests_total: inner.requests_total,
                requests_successful: inner.requests_successful,
                requests_failed: inner.requests_failed,
                requests_rejected: inner.requests_rejected,
                state_transitions: inner.state_transitions.clone(),
                sample_count: inner.latencies.len(),
                ..Default::default()
            };
            (snapshot, inner.latencies.iter().copied().collect::<Vec<_>>())
        };

        if samples.is_empty() {
            return snapshot;
        }

        samples.sort_unstable();
        let total: Duration = samples.iter().sum();
        snapshot.avg_latency = total / samples.len() as u32;
        snapshot.min_latency = samples[0];
        snapshot.max_latency = samples[samples.len() - 1];
        snapshot.p50_latency = percentile(&samples, 50.0);
        snapshot.p95_latency = percentile(&samples, 95.0);
        snapshot.p99_latency = percentile(&samples, 99.0);
        snapshot
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Nearest-rank percentile over an ascending, non-empty slice
fn percentile(sorted: &[Duration], pct: f64) -> Duration {
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    let index = rank.saturating_sub(1).min(sorted.len() - 1);
    sorted[index]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_empty_snapshot() {
        let metrics = MetricsCollector::new();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_total, 0);
        assert_eq!(snapshot.sample_count, 0);
        assert_eq!(snapshot.avg_latency, Duration::ZERO);
        assert_eq!(snapshot.p99_latency, Duration::ZERO);
        assert_eq!(snapshot.failure_rate(), 0.0);
    }

    #[test]
    fn test_counts_by_outcome() {
        let metrics = MetricsCollector::new();
        metrics.record_success(ms(5));
        metrics.record_success(ms(5));
        metrics.record_failure(ms(5));
        metrics.record_rejection();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_total, 4);
        assert_eq!(snapshot.requests_successful, 2);
        assert_eq!(snapshot.requests_failed, 1);
        assert_eq!(snapshot.requests_rejected, 1);
        // Rejections carry no latency sample
        assert_eq!(snapshot.sample_count, 3);
        assert!((snapshot.failure_rate() - 1.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_latency_statistics() {
        let metrics = MetricsCollector::new();
        for n in 1..=100 {
            metrics.record_success(ms(n));
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.min_latency, ms(1));
        assert_eq!(snapshot.max_latency, ms(100));
        assert_eq!(snapshot.p50_latency, ms(50));
        assert_eq!(snapshot.p95_latency, ms(95));
        assert_eq!(snapshot.p99_latency, ms(99));
        assert_eq!(snapshot.avg_latency, Duration::from_micros(50_500));
    }

    #[test]
    fn test_window_evicts_oldest() {
        let metrics = MetricsCollector::new();
        metrics.record_success(ms(1_000));
        for _ in 0..LATENCY_WINDOW {
            metrics.record_success(ms(2));
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sample_count, LATENCY_WINDOW);
        assert_eq!(snapshot.max_latency, ms(2));
        assert_eq!(snapshot.requests_successful, LATENCY_WINDOW as u64 + 1);
    }

    #[test]
    fn test_single_sample_percentiles() {
        let metrics = MetricsCollector::new();
        metrics.record_failure(ms(7));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.p50_latency, ms(7));
        assert_eq!(snapshot.p99_latency, ms(7));
        assert_eq!(snapshot.min_latency, snapshot.max_latency);
    }

    #[test]
    fn test_transition_counts() {
        let metrics = MetricsCollector::new();
        metrics.record_transition(CircuitState::Open);
        metrics.record_transition(CircuitState::HalfOpen);
        metrics.record_transition(CircuitState::Open);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.transitions_to(CircuitState::Open), 2);
        assert_eq!(snapshot.transitions_to(CircuitState::HalfOpen), 1);
        assert_eq!(snapshot.transitions_to(CircuitState::Closed), 0);
        assert_eq!(snapshot.state_transitions.get("half-open"), Some(&1));
    }

    #[test]
    fn test_reset_clears_everything() {
        let metrics = MetricsCollector::new();
        metrics.record_success(ms(3));
        metrics.record_transition(CircuitState::Open);
        metrics.reset();

        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }
}
