//! Periodic error-rate tracking for a circuit breaker
//!
//! [`AdaptiveBreaker`] runs a background ticker that recomputes the breaker's
//! cumulative error rate (`failures / total`) every `interval`.
//!
//! The rate is only exposed through [`AdaptiveBreaker::error_rate`]. It is not
//! fed back into `failure_threshold` or `success_threshold`; the breaker's
//! configuration stays immutable. Any tuning policy belongs to the caller.

use crate::circuit_breaker::{BreakerStats, CircuitBreaker};
use crate::error::{BreakerError, ConfigError};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Error rate stored as `f64` bits
#[derive(Debug, Default)]
struct SharedRate(AtomicU64);

impl SharedRate {
    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, rate: f64) {
        self.0.store(rate.to_bits(), Ordering::Relaxed);
    }
}

/// Failure fraction of all executed requests; 0.0 before any have run
pub fn error_rate(stats: &BreakerStats) -> f64 {
    if stats.total_requests == 0 {
        0.0
    } else {
        stats.total_failures as f64 / stats.total_requests as f64
    }
}

/// A circuit breaker with a background error-rate ticker.
///
/// The ticker stops when [`stop`](AdaptiveBreaker::stop) is called or the
/// wrapper is dropped.
pub struct AdaptiveBreaker {
    breaker: CircuitBreaker,
    interval: Duration,
    rate: Arc<SharedRate>,
    shutdown: CancellationToken,
    ticker: JoinHandle<()>,
}

impl fmt::Debug for AdaptiveBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptiveBreaker")
            .field("breaker", &self.breaker.name())
            .field("interval", &self.interval)
            .field("error_rate", &self.error_rate())
            .finish()
    }
}

impl AdaptiveBreaker {
    /// Wrap `breaker` and start the ticker. Must be called inside a tokio runtime.
    pub fn new(breaker: CircuitBreaker, interval: Duration) -> Result<Self, ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::must_be_positive("interval"));
        }

        let rate = Arc::new(SharedRate::default());
        let shutdown = CancellationToken::new();
        let ticker = tokio::spawn(run_ticker(
            breaker.clone(),
            interval,
            Arc::clone(&rate),
            shutdown.clone(),
        ));

        Ok(Self {
            breaker,
            interval,
            rate,
            shutdown,
            ticker,
        })
    }

    /// Error rate as of the last tick
    pub fn error_rate(&self) -> f64 {
        self.rate.load()
    }

    /// The wrapped breaker
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the ticker is still running
    pub fn is_running(&self) -> bool {
        !self.ticker.is_finished()
    }

    /// Stop the ticker; the last computed rate stays readable
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Delegate to the wrapped breaker
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
        self.breaker.execute(ctx, op).await
    }
}

impl Drop for AdaptiveBreaker {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_ticker(
    breaker: CircuitBreaker,
    interval: Duration,
    rate: Arc<SharedRate>,
    shutdown: CancellationToken,
) {
    let mut ticks = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticks.tick() => {
                let current = error_rate(&breaker.stats());
                rate.store(current);
                trace!(breaker = breaker.name(), error_rate = current, "error rate updated");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::BreakerConfig;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::must_new(
            "adaptive",
            BreakerConfig {
                failure_threshold: 100,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_zero_interval_rejected() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            assert!(AdaptiveBreaker::new(breaker(), Duration::ZERO).is_err());
        });
    }

    #[tokio::test]
    async fn test_error_rate_tracks_failures() {
        let adaptive = AdaptiveBreaker::new(breaker(), Duration::from_millis(10)).unwrap();
        assert_eq!(adaptive.error_rate(), 0.0);

        for i in 0..4 {
            let _ = adaptive
                .execute(&CancellationToken::new(), move |_| async move {
                    if i == 0 {
                        Err("failed".to_string())
                    } else {
                        Ok(())
                    }
                })
                .await;
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!((adaptive.error_rate() - 0.25).abs() < 1e-9);
        // Thresholds are untouched by the computed rate
        assert_eq!(adaptive.breaker().config().failure_threshold, 100);
    }

    #[tokio::test]
    async fn test_stop_ends_ticker() {
        let adaptive = AdaptiveBreaker::new(breaker(), Duration::from_millis(5)).unwrap();
        assert!(adaptive.is_running());

        adaptive.stop();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!adaptive.is_running());
    }

    #[test]
    fn test_error_rate_of_empty_stats() {
        let stats = breaker().stats();
        assert_eq!(error_rate(&stats), 0.0);
    }
}
