//! Circuit Breaker implementation for fault tolerance
//!
//! The circuit breaker prevents cascading failures by failing fast when a
//! dependency is experiencing issues. It has three states:
//! - Closed: Normal operation, requests pass through
//! - Open: Dependency is unhealthy, requests fail immediately
//! - HalfOpen: A bounded number of trial requests test recovery
//!
//! # Transitions
//!
//! ```text
//!            consecutive failures >= failure_threshold
//!   Closed ─────────────────────────────────────────────▶ Open
//!     ▲                                                  │  ▲
//!     │ consecutive successes                  timeout   │  │ any failure
//!     │ >= success_threshold                   elapsed   ▼  │
//!     └───────────────────────────────────────────── HalfOpen
//! ```
//!
//! # Cancellation
//!
//! [`CircuitBreaker::execute`] runs the operation on its own task and races it
//! against the caller's [`CancellationToken`]. When the token fires first the
//! call returns [`BreakerError::Timeout`] and counts as a failure. The task is
//! not aborted: it receives a child token, which is cancelled along with the
//! caller's, and is expected to stop on its own. Whatever it eventually
//! returns is discarded.

use crate::error::{BreakerError, ConfigError};
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::observer::{StateChangeEvent, StateObserver};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// State of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Circuit is closed, requests pass through normally
    Closed,
    /// Circuit is open, requests fail immediately
    Open,
    /// Circuit is half-open, testing dependency recovery
    HalfOpen,
}

impl CircuitState {
    /// Stable lowercase name used in stats, metrics and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for circuit breaker behavior
#[derive(Clone)]
pub struct BreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,
    /// Number of consecutive successes in half-open to close circuit
    pub success_threshold: u32,
    /// Duration to wait before transitioning from open to half-open
    pub timeout: Duration,
    /// Half-open trial requests allowed in flight at once (0 is treated as 1)
    pub max_concurrent_requests: u32,
    /// Notified of every state transition
    pub observers: Vec<Arc<dyn StateObserver>>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
            max_concurrent_requests: 1,
            observers: Vec::new(),
        }
    }
}

impl fmt::Debug for BreakerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerConfig")
            .field("failure_threshold", &self.failure_threshold)
            .field("success_threshold", &self.success_threshold)
            .field("timeout", &self.timeout)
            .field("max_concurrent_requests", &self.max_concurrent_requests)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl BreakerConfig {
    /// Register an additional state-change observer
    pub fn with_observer<O>(mut self, observer: O) -> Self
    where
        O: StateObserver + 'static,
    {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Register an observer that is already shared elsewhere
    pub fn with_shared_observer(mut self, observer: Arc<dyn StateObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Check every positive-required field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::must_be_positive("failure_threshold"));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::must_be_positive("success_threshold"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::must_be_positive("timeout"));
        }
        Ok(())
    }

    fn normalized(mut self) -> Self {
        self.max_concurrent_requests = self.max_concurrent_requests.max(1);
        self
    }
}

/// Read-only snapshot of a breaker's state and counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    /// When the breaker entered its current state
    pub state_changed_at: DateTime<Utc>,
    /// Executed requests (rejections are counted in metrics only)
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    /// Half-open trial requests currently in flight
    pub half_open_in_flight: u32,
}

/// Internal state of the circuit breaker
#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Monotonic start of the current state; drives the open timer
    state_changed_at: Instant,
    state_changed_wall: DateTime<Utc>,
    total_requests: u64,
    total_successes: u64,
    total_failures: u64,
    consecutive_successes: u32,
    consecutive_failures: u32,
    last_error: Option<String>,
    last_error_at: Option<DateTime<Utc>>,
    half_open_in_flight: u32,
    /// Bumped on every transition and reset; outcomes from an older
    /// generation never touch the state machine
    generation: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            state_changed_at: Instant::now(),
            state_changed_wall: Utc::now(),
            total_requests: 0,
            total_successes: 0,
            total_failures: 0,
            consecutive_successes: 0,
            consecutive_failures: 0,
            last_error: None,
            last_error_at: None,
            half_open_in_flight: 0,
            generation: 0,
        }
    }

    /// Move to `to`, restarting the state timer and both consecutive counters.
    /// Returns the previous state.
    fn transition(&mut self, to: CircuitState) -> CircuitState {
        let from = self.state;
        self.state = to;
        self.state_changed_at = Instant::now();
        self.state_changed_wall = Utc::now();
        self.consecutive_successes = 0;
        self.consecutive_failures = 0;
        self.generation += 1;
        from
    }
}

/// State and generation a request was admitted under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Admission {
    state: CircuitState,
    generation: u64,
}

/// Why admission was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    Open,
    HalfOpenFull,
}

/// Circuit breaker for protecting calls into a failure-prone dependency
///
/// Cloning is cheap and yields another handle to the same breaker.
///
/// # Example
/// ```no_run
/// use conductor_core_breaker::{BreakerConfig, CircuitBreaker};
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() {
///     let breaker = CircuitBreaker::new("postgres", BreakerConfig::default()).unwrap();
///     let ctx = CancellationToken::new();
///
///     let rows = breaker
///         .execute(&ctx, |_token| async { Ok::<_, std::io::Error>(42) })
///         .await;
///
///     println!("Result: {:?}", rows);
/// }
/// ```
#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: Arc<BreakerConfig>,
    inner: Arc<Mutex<BreakerInner>>,
    metrics: Arc<MetricsCollector>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker, validating the configuration
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_validated(name, config))
    }

    /// Create a new circuit breaker, panicking on an invalid configuration.
    ///
    /// Intended for startup wiring where a bad config is a programming error.
    pub fn must_new(name: impl Into<String>, config: BreakerConfig) -> Self {
        let name = name.into();
        match Self::new(name.clone(), config) {
            Ok(breaker) => breaker,
            Err(e) => panic!("invalid circuit breaker config for {}: {}", name, e),
        }
    }

    /// Build from a configuration the caller has already validated
    pub(crate) fn from_validated(name: impl Into<String>, config: BreakerConfig) -> Self {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            config: Arc::new(config.normalized()),
            inner: Arc::new(Mutex::new(BreakerInner::new())),
            metrics: Arc::new(MetricsCollector::new()),
        }
    }

    /// Name of the protected dependency
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Effective configuration (with `max_concurrent_requests` normalised)
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Current state as `"closed"`, `"open"` or `"half-open"`
    pub fn state_name(&self) -> &'static str {
        self.state().as_str()
    }

    /// Snapshot of state and counters
    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock();
        BreakerStats {
            name: self.name.to_string(),
            state: inner.state,
            state_changed_at: inner.state_changed_wall,
            total_requests: inner.total_requests,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            consecutive_successes: inner.consecutive_successes,
            consecutive_failures: inner.consecutive_failures,
            last_error: inner.last_error.clone(),
            last_error_at: inner.last_error_at,
            half_open_in_flight: inner.half_open_in_flight,
        }
    }

    /// Request counts, transition counts and latency statistics
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Return to closed with zeroed consecutive counters.
    ///
    /// Cumulative counters and metrics are kept.
    pub fn reset(&self) {
        let from = {
            let mut inner = self.inner.lock();
            inner.half_open_in_flight = 0;
            if inner.state == CircuitState::Closed {
                inner.consecutive_successes = 0;
                inner.consecutive_failures = 0;
                inner.generation += 1;
                None
            } else {
                Some(inner.transition(CircuitState::Closed))
            }
        };

        info!(breaker = %self.name, "circuit breaker reset");
        if let Some(from) = from {
            self.on_transition(from, CircuitState::Closed);
        }
    }

    /// Execute an operation with circuit breaker protection.
    ///
    /// `op` receives a child of `ctx`, cancelled when `ctx` is. Any `Err`,
    /// panic or cancellation counts as a failure; the caller's error is
    /// returned verbatim inside [`BreakerError::Operation`].
    pub async fn execute<F, Fut, T, E>(
        &self,
        ctx: &CancellationToken,
        op: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let admission = self.before_request().map_err(|rejection| match rejection {
            Rejection::Open => BreakerError::CircuitOpen,
            Rejection::HalfOpenFull => BreakerError::TooManyRequests,
        })?;

        let token = ctx.child_token();
        let started = Instant::now();
        let handle = tokio::spawn(async move { op(token).await });

        let outcome = tokio::select! {
            biased;
            joined = handle => match joined {
                Ok(result) => result.map_err(BreakerError::Operation),
                Err(join_err) if join_err.is_panic() => {
                    Err(BreakerError::Panicked(panic_message(join_err.into_panic())))
                }
                Err(join_err) => Err(BreakerError::Panicked(join_err.to_string())),
            },
            _ = ctx.cancelled() => Err(BreakerError::Timeout),
        };

        let error = outcome.as_ref().err().map(|e| e.to_string());
        self.after_request(admission, error, started.elapsed());
        outcome
    }

    /// Execute with a deadline instead of a caller-owned token
    pub async fn execute_with_timeout<F, Fut, T, E>(
        &self,
        timeout: Duration,
        op: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let ctx = CancellationToken::new();
        let timer = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                ctx.cancel();
            })
        };

        let result = self.execute(&ctx, op).await;
        timer.abort();
        result
    }

    /// Admission check. Returns the state and generation the request was
    /// admitted under.
    fn before_request(&self) -> Result<Admission, Rejection> {
        let mut transitioned = None;
        let result = {
            let mut inner = self.inner.lock();
            let state = match inner.state {
                CircuitState::Closed => Ok(CircuitState::Closed),
                CircuitState::Open => {
                    if inner.state_changed_at.elapsed() >= self.config.timeout {
                        transitioned = Some(inner.transition(CircuitState::HalfOpen));
                        inner.half_open_in_flight = 1;
                        Ok(CircuitState::HalfOpen)
                    } else {
                        Err(Rejection::Open)
                    }
                }
                CircuitState::HalfOpen => {
                    if inner.half_open_in_flight >= self.config.max_concurrent_requests {
                        Err(Rejection::HalfOpenFull)
                    } else {
                        inner.half_open_in_flight += 1;
                        Ok(CircuitState::HalfOpen)
                    }
                }
            };
            state.map(|state| Admission {
                state,
                generation: inner.generation,
            })
        };

        if let Some(from) = transitioned {
            self.on_transition(from, CircuitState::HalfOpen);
        }
        if let Err(rejection) = result {
            self.metrics.record_rejection();
            debug!(breaker = %self.name, ?rejection, "request rejected");
        }
        result
    }

    /// Apply an outcome to counters, metrics and the state machine.
    ///
    /// Outcomes admitted under an earlier generation only update totals and
    /// metrics.
    fn after_request(&self, admission: Admission, error: Option<String>, latency: Duration) {
        let transitioned = {
            let mut inner = self.inner.lock();
            inner.total_requests += 1;

            let current = inner.generation == admission.generation;
            if current && admission.state == CircuitState::HalfOpen {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
            }

            match error {
                None => {
                    inner.total_successes += 1;
                    self.metrics.record_success(latency);
                    if current {
                        self.on_success(&mut inner)
                    } else {
                        None
                    }
                }
                Some(message) => {
                    debug!(breaker = %self.name, error = %message, "request failed");
                    inner.total_failures += 1;
                    inner.last_error = Some(message);
                    inner.last_error_at = Some(Utc::now());
                    self.metrics.record_failure(latency);
                    if current {
                        self.on_failure(&mut inner)
                    } else {
                        None
                    }
                }
            }
        };

        if let Some((from, to)) = transitioned {
            self.on_transition(from, to);
        }
    }

    /// Handle successful operation; returns a transition if one happened
    fn on_success(&self, inner: &mut BreakerInner) -> Option<(CircuitState, CircuitState)> {
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                None
            }
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.half_open_in_flight = 0;
                    let from = inner.transition(CircuitState::Closed);
                    Some((from, CircuitState::Closed))
                } else {
                    None
                }
            }
            // No request is admitted while open
            CircuitState::Open => None,
        }
    }

    /// Handle failed operation; returns a transition if one happened
    fn on_failure(&self, inner: &mut BreakerInner) -> Option<(CircuitState, CircuitState)> {
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    let from = inner.transition(CircuitState::Open);
                    Some((from, CircuitState::Open))
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                inner.half_open_in_flight = 0;
                let from = inner.transition(CircuitState::Open);
                Some((from, CircuitState::Open))
            }
            CircuitState::Open => None,
        }
    }

    /// Log, count and fan out a transition. Called with the lock released.
    fn on_transition(&self, from: CircuitState, to: CircuitState) {
        self.metrics.record_transition(to);
        match to {
            CircuitState::Open => {
                warn!(breaker = %self.name, %from, %to, "circuit breaker opened")
            }
            _ => info!(breaker = %self.name, %from, %to, "circuit breaker state changed"),
        }

        if self.config.observers.is_empty() {
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(breaker = %self.name, "no async runtime; state observers not notified");
                return;
            }
        };

        let event = Arc::new(StateChangeEvent::new(self.name.to_string(), from, to));
        for observer in &self.config.observers {
            let observer = Arc::clone(observer);
            let event = Arc::clone(&event);
            runtime.spawn(async move {
                observer.on_state_change(&event).await;
            });
        }
    }
}

/// Render a panic payload as text
fn panic_message(payload: Box<dyn Any + Send + 'static>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
