/*!
 * Prometheus export of breaker state
 *
 * [`BreakerExporter`] polls a [`MultiCircuitBreaker`] and mirrors each
 * breaker's stats and metrics into a private Prometheus registry, which is
 * rendered in the text exposition format. Every poll replaces the previous
 * values, so breakers that have disappeared leave no stale series behind.
 */

use prometheus::{Encoder, GaugeVec, IntGaugeVec, Opts, Registry, TextEncoder};

use conductor_core_breaker::{CircuitBreaker, CircuitState, MultiCircuitBreaker};

use crate::error::Result;

const STATES: [CircuitState; 3] = [
    CircuitState::Closed,
    CircuitState::Open,
    CircuitState::HalfOpen,
];

/// Mirrors breaker snapshots into Prometheus gauges
pub struct BreakerExporter {
    registry: Registry,
    state: IntGaugeVec,
    requests: IntGaugeVec,
    transitions: IntGaugeVec,
    consecutive_failures: IntGaugeVec,
    latency: GaugeVec,
    health: IntGaugeVec,
}

impl BreakerExporter {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let state = IntGaugeVec::new(
            Opts::new(
                "conductor_breaker_state",
                "Current breaker state (1 for the active state, 0 otherwise)",
            ),
            &["breaker", "state"],
        )?;
        let requests = IntGaugeVec::new(
            Opts::new(
                "conductor_breaker_requests",
                "Requests seen by the breaker, by outcome",
            ),
            &["breaker", "outcome"],
        )?;
        let transitions = IntGaugeVec::new(
            Opts::new(
                "conductor_breaker_transitions",
                "State transitions, by state entered",
            ),
            &["breaker", "to"],
        )?;
        let consecutive_failures = IntGaugeVec::new(
            Opts::new(
                "conductor_breaker_consecutive_failures",
                "Consecutive failures in the current state",
            ),
            &["breaker"],
        )?;
        let latency = GaugeVec::new(
            Opts::new(
                "conductor_breaker_latency_seconds",
                "Execution latency over the most recent samples",
            ),
            &["breaker", "quantile"],
        )?;
        let health = IntGaugeVec::new(
            Opts::new(
                "conductor_breakers",
                "Registered breakers, by health bucket",
            ),
            &["health"],
        )?;

        registry.register(Box::new(state.clone()))?;
        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(transitions.clone()))?;
        registry.register(Box::new(consecutive_failures.clone()))?;
        registry.register(Box::new(latency.clone()))?;
        registry.register(Box::new(health.clone()))?;

        Ok(Self {
            registry,
            state,
            requests,
            transitions,
            consecutive_failures,
            latency,
            health,
        })
    }

    /// Replace all series with the registry's current state
    pub fn update(&self, breakers: &MultiCircuitBreaker) {
        self.state.reset();
        self.requests.reset();
        self.transitions.reset();
        self.consecutive_failures.reset();
        self.latency.reset();

        for breaker in breakers.snapshot() {
            self.observe(&breaker);
        }

        let health = breakers.health();
        self.health
            .with_label_values(&["healthy"])
            .set(health.healthy.len() as i64);
        self.health
            .with_label_values(&["degraded"])
            .set(health.degraded.len() as i64);
        self.health
            .with_label_values(&["unhealthy"])
            .set(health.unhealthy.len() as i64);
    }

    /// Mirror a single breaker
    pub fn observe(&self, breaker: &CircuitBreaker) {
        let name = breaker.name();
        let stats = breaker.stats();
        let metrics = breaker.metrics();

        for state in STATES {
            self.state
                .with_label_values(&[name, state.as_str()])
                .set(i64::from(stats.state == state));
            self.transitions
                .with_label_values(&[name, state.as_str()])
                .set(metrics.transitions_to(state) as i64);
        }

        self.requests
            .with_label_values(&[name, "success"])
            .set(metrics.requests_successful as i64);
        self.requests
            .with_label_values(&[name, "failure"])
            .set(metrics.requests_failed as i64);
        self.requests
            .with_label_values(&[name, "rejected"])
            .set(metrics.requests_rejected as i64);

        self.consecutive_failures
            .with_label_values(&[name])
            .set(i64::from(stats.consecutive_failures));

        for (quantile, value) in [
            ("0.5", metrics.p50_latency),
            ("0.95", metrics.p95_latency),
            ("0.99", metrics.p99_latency),
        ] {
            self.latency
                .with_label_values(&[name, quantile])
                .set(value.as_secs_f64());
        }
    }

    /// Text exposition of every series
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| prometheus::Error::Msg(format!("non UTF-8 exposition: {}", e)).into())
    }
}

/// One-shot export of `breakers`
pub fn render_registry(breakers: &MultiCircuitBreaker) -> Result<String> {
    let exporter = BreakerExporter::new()?;
    exporter.update(breakers);
    exporter.render()
}
