//! Retry with exponential backoff around a circuit breaker
//!
//! [`RetryingBreaker`] re-runs a failed operation through its breaker with a
//! delay that starts at `initial_delay`, grows by `backoff_factor` after every
//! attempt and is capped at `max_delay`.
//!
//! Fast-fail wins over retry policy: a [`BreakerError::CircuitOpen`] is
//! returned immediately. Backoff sleeps are cancelled by the caller's token,
//! which ends the loop with [`BreakerError::Timeout`].
//!
//! # Example
//!
//! ```no_run
//! use conductor_core_breaker::{BreakerConfig, CircuitBreaker, RetryConfig, RetryingBreaker};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let breaker = CircuitBreaker::new("mcp-server", BreakerConfig::default()).unwrap();
//! let retrying = RetryingBreaker::new(breaker, RetryConfig::default())
//!     .unwrap()
//!     .retry_if(|e: &std::io::Error| e.kind() == std::io::ErrorKind::ConnectionReset);
//!
//! let reply = retrying
//!     .execute(&CancellationToken::new(), |_token| async { Ok::<_, std::io::Error>("pong") })
//!     .await;
//! # let _ = reply;
//! # }
//! ```

use crate::circuit_breaker::CircuitBreaker;
use crate::error::{BreakerError, ConfigError};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Backoff policy for [`RetryingBreaker`]
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each attempt
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Check attempt count and backoff shape
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::must_be_positive("max_attempts"));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ConfigError::invalid_value(
                "backoff_factor",
                format!("must be a finite value of at least 1.0, got {}", self.backoff_factor),
            ));
        }
        if self.initial_delay > self.max_delay {
            return Err(ConfigError::invalid_value(
                "initial_delay",
                "must not exceed max_delay",
            ));
        }
        Ok(())
    }

    /// Delay to use after `current`. Growth that overflows `Duration`
    /// saturates at `max_delay`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        Duration::try_from_secs_f64(current.as_secs_f64() * self.backoff_factor)
            .map_or(self.max_delay, |next| next.min(self.max_delay))
    }
}

type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// A circuit breaker that retries failed operations
pub struct RetryingBreaker<E> {
    breaker: CircuitBreaker,
    config: RetryConfig,
    retryable: Vec<RetryPredicate<E>>,
}

impl<E> fmt::Debug for RetryingBreaker<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryingBreaker")
            .field("breaker", &self.breaker.name())
            .field("config", &self.config)
            .field("retryable", &self.retryable.len())
            .finish()
    }
}

impl<E> RetryingBreaker<E>
where
    E: fmt::Display + Send + 'static,
{
    /// Wrap `breaker` with the given backoff policy
    pub fn new(breaker: CircuitBreaker, config: RetryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            breaker,
            config,
            retryable: Vec::new(),
        })
    }

    /// Restrict retries to operation errors matching at least one predicate.
    ///
    /// With no predicates every failure except circuit-open is retried. Once
    /// one is registered, only matching operation errors are.
    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retryable.push(Arc::new(predicate));
        self
    }

    /// The wrapped breaker
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Whether a failed attempt may be retried
    pub fn should_retry(&self, err: &BreakerError<E>) -> bool {
        if err.is_circuit_open() {
            return false;
        }
        if self.retryable.is_empty() {
            return true;
        }
        match err.operation() {
            Some(e) => self.retryable.iter().any(|p| p(e)),
            None => false,
        }
    }

    /// Execute `op` through the breaker, retrying per the policy.
    ///
    /// Returns the first success or the last error.
    pub async fn execute<F, Fut, T>(
        &self,
        ctx: &CancellationToken,
        op: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
    {
        let op = Arc::new(op);
        let mut delay = self.config.initial_delay;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let op = Arc::clone(&op);
            let err = match self.breaker.execute(ctx, move |token| op(token)).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if attempt >= self.config.max_attempts || !self.should_retry(&err) {
                return Err(err);
            }

            debug!(
                breaker = self.breaker.name(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying after failure"
            );

            tokio::select! {
                _ = ctx.cancelled() => return Err(BreakerError::Timeout),
                _ = tokio::time::sleep(delay) => {}
            }
            delay = self.config.next_delay(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{BreakerConfig, CircuitState};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn breaker(failure_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::must_new(
            "retry-test",
            BreakerConfig {
                failure_threshold,
                timeout: Duration::from_secs(60),
                ..Default::default()
            },
        )
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            backoff_factor: 2.0,
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(RetryConfig::default().validate().is_ok());
        assert!(fast_retry(0).validate().is_err());
        assert!(RetryConfig {
            backoff_factor: 0.5,
            ..Default::default()
        }
        .validate()
        .is_err());
        assert!(RetryConfig {
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(1),
            ..Default::default()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            backoff_factor: 2.0,
            max_attempts: 5,
        };
        let d1 = config.next_delay(config.initial_delay);
        let d2 = config.next_delay(d1);
        let d3 = config.next_delay(d2);
        assert_eq!(d1, Duration::from_millis(200));
        assert_eq!(d2, Duration::from_millis(300));
        assert_eq!(d3, Duration::from_millis(300));
    }

    #[test]
    fn test_huge_backoff_factor_saturates() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 1e300,
            max_attempts: 3,
        };
        assert!(config.validate().is_ok());
        let d1 = config.next_delay(config.initial_delay);
        assert_eq!(d1, Duration::from_secs(30));
        assert_eq!(config.next_delay(d1), Duration::from_secs(30));
        assert_eq!(config.next_delay(Duration::MAX), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_huge_backoff_factor_does_not_panic_execute() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_factor: 1e300,
            max_attempts: 4,
        };
        let retrying = RetryingBreaker::new(breaker(10), config).unwrap();

        let err = retrying
            .execute(&CancellationToken::new(), |_| async {
                Err::<(), _>("still down".to_string())
            })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "still down");
        assert_eq!(retrying.breaker().stats().total_failures, 4);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let retrying = RetryingBreaker::new(breaker(10), fast_retry(3)).unwrap();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let value = retrying
            .execute(&CancellationToken::new(), move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("flaky".to_string())
                    } else {
                        Ok(7)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(retrying.breaker().stats().total_failures, 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let retrying = RetryingBreaker::new(breaker(10), fast_retry(4)).unwrap();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let err = retrying
            .execute(&CancellationToken::new(), move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("still down".to_string())
                }
            })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "still down");
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_does_not_retry_open_circuit() {
        let retrying = RetryingBreaker::new(breaker(2), fast_retry(5)).unwrap();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let err = retrying
            .execute(&CancellationToken::new(), move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("boom".to_string())
                }
            })
            .await
            .unwrap_err();

        // Two real attempts trip the breaker; the third is refused and ends the loop
        assert!(err.is_circuit_open());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(retrying.breaker().state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_allow_list_limits_retries() {
        let retrying = RetryingBreaker::new(breaker(10), fast_retry(5))
            .unwrap()
            .retry_if(|e: &String| e.starts_with("transient"));
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let err = retrying
            .execute(&CancellationToken::new(), move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        Err::<(), _>("transient: reset".to_string())
                    } else {
                        Err("permanent: bad request".to_string())
                    }
                }
            })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "permanent: bad request");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_allow_list_skips_breaker_errors() {
        let retrying = RetryingBreaker::new(breaker(10), fast_retry(5))
            .unwrap()
            .retry_if(|_: &String| true);

        let panicked: BreakerError<String> = BreakerError::Panicked("x".to_string());
        assert!(!retrying.should_retry(&panicked));
        assert!(!retrying.should_retry(&BreakerError::CircuitOpen));
        assert!(retrying.should_retry(&BreakerError::Operation("any".to_string())));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_backoff() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(10),
            backoff_factor: 1.0,
        };
        let retrying = RetryingBreaker::new(breaker(100), config).unwrap();
        let ctx = CancellationToken::new();
        {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                ctx.cancel();
            });
        }

        let started = Instant::now();
        let err = retrying
            .execute(&ctx, |_| async { Err::<(), _>("down".to_string()) })
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
