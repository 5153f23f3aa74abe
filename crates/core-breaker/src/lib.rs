//! Conductor Core Breaker: failure isolation for agent-orchestration backends
//!
//! # Overview
//!
//! This crate provides the circuit breaker that guards every call Conductor
//! makes into a failure-prone dependency (databases, external APIs, agent
//! subprocesses, MCP servers), plus the combinators layered on top of it:
//!
//! - **Circuit Breaker**: Three-state admission control with a half-open bulkhead
//! - **Metrics**: Request counters, transition counts and p50/p95/p99 latency
//! - **Observers**: Multi-subscriber state-change notifications
//! - **Retry**: Exponential backoff that never retries an open circuit
//! - **Fallback**: Substitute values instead of errors
//! - **Adaptive**: Background error-rate tracking
//! - **Registry**: Lazily created, name-keyed breakers with aggregate health
//! - **Group**: Parallel execution across a fixed set of breakers
//!
//! # Key Principles
//!
//! The breaker is **local and in-memory**. It has no knowledge of:
//! - Persistence (state does not survive a restart)
//! - Other processes or instances
//! - The network; it only gates work the caller hands it
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Your Application                │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │  Retry / Fallback / Adaptive / Group    │  ← Policy on top
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       MultiCircuitBreaker               │  ← One breaker per dependency
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       CircuitBreaker                    │  ← Admission + state machine
//! │  (MetricsCollector, StateObservers)     │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//!        Protected dependency
//!     (Postgres, LLM API, MCP server)
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use conductor_core_breaker::{BreakerConfig, CircuitBreaker, BreakerError};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), BreakerError<std::io::Error>> {
//! let config = BreakerConfig {
//!     failure_threshold: 5,
//!     success_threshold: 2,
//!     timeout: Duration::from_secs(30),
//!     ..Default::default()
//! };
//!
//! let breaker = CircuitBreaker::new("mcp-filesystem", config).expect("valid config");
//! let ctx = CancellationToken::new();
//!
//! let listing = breaker
//!     .execute(&ctx, |_token| async {
//!         // Your potentially failing operation
//!         Ok::<_, std::io::Error>(vec!["README.md"])
//!     })
//!     .await?;
//! # let _ = listing;
//! # Ok(())
//! # }
//! ```

pub mod adaptive;
pub mod circuit_breaker;
pub mod error;
pub mod fallback;
pub mod group;
pub mod metrics;
pub mod observer;
pub mod registry;
pub mod retry;

// Re-export main types for convenience
pub use adaptive::AdaptiveBreaker;
pub use circuit_breaker::{BreakerConfig, BreakerStats, CircuitBreaker, CircuitState};
pub use error::{BreakerError, ConfigError};
pub use fallback::FallbackBreaker;
pub use group::CircuitBreakerGroup;
pub use metrics::{MetricsCollector, MetricsSnapshot, LATENCY_WINDOW};
pub use observer::{BroadcastObserver, FnObserver, StateChangeEvent, StateObserver};
pub use registry::{HealthStatus, MultiCircuitBreaker};
pub use retry::{RetryConfig, RetryingBreaker};

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use conductor_core_breaker::prelude::*;
/// ```
pub mod prelude {
    pub use super::adaptive::AdaptiveBreaker;
    pub use super::circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitState};
    pub use super::error::BreakerError;
    pub use super::fallback::FallbackBreaker;
    pub use super::group::CircuitBreakerGroup;
    pub use super::observer::{StateChangeEvent, StateObserver};
    pub use super::registry::MultiCircuitBreaker;
    pub use super::retry::{RetryConfig, RetryingBreaker};
}
