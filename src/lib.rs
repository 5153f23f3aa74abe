/*!
 * Conductor - resilience layer of a multi-tenant agent-orchestration backend
 *
 * Wires the circuit breakers of `conductor-core-breaker` into a running
 * process:
 * - TOML configuration of a default breaker profile and per-dependency overrides
 * - Structured logging via `tracing`
 * - Append-only audit log of every breaker state transition
 * - Prometheus text export of breaker state, counters and latency
 * - Scripted simulations for exercising a configured breaker
 */

pub mod audit;
pub mod config;
pub mod error;
pub mod logging;
pub mod simulate;
pub mod telemetry;

// Re-export commonly used types
pub use audit::{AuditLogger, TransitionRecord};
pub use config::{AuditFormat, BreakerOverride, BreakerProfile, ConductorConfig, LogLevel, RetryProfile};
pub use error::{ConductorError, Result};
pub use simulate::{Outcome, Pattern, SimulationOptions, SimulationReport, Step, StepOutcome};
pub use telemetry::BreakerExporter;

pub use conductor_core_breaker as breaker;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
