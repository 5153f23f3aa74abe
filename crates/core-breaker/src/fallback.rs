//! Substitute values for failed or rejected calls
//!
//! [`FallbackBreaker`] runs an operation through its breaker and, on any
//! error (circuit-open included), returns the value produced by the fallback
//! function instead. Callers of the wrapper never see the breaker's error;
//! the fallback receives it so it can choose a degraded value.

use crate::circuit_breaker::CircuitBreaker;
use crate::error::BreakerError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

type FallbackFn<T, E> = Arc<dyn Fn(BreakerError<E>) -> T + Send + Sync>;

/// A circuit breaker that always yields a `T`
pub struct FallbackBreaker<T, E> {
    breaker: CircuitBreaker,
    fallback: FallbackFn<T, E>,
}

impl<T, E> Clone for FallbackBreaker<T, E> {
    fn clone(&self) -> Self {
        Self {
            breaker: self.breaker.clone(),
            fallback: Arc::clone(&self.fallback),
        }
    }
}

impl<T, E> fmt::Debug for FallbackBreaker<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackBreaker")
            .field("breaker", &self.breaker.name())
            .finish_non_exhaustive()
    }
}

impl<T, E> FallbackBreaker<T, E>
where
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    pub fn new<F>(breaker: CircuitBreaker, fallback: F) -> Self
    where
        F: Fn(BreakerError<E>) -> T + Send + Sync + 'static,
    {
        Self {
            breaker,
            fallback: Arc::new(fallback),
        }
    }

    /// The wrapped breaker
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Run `op`, substituting the fallback value on any error
    pub async fn execute<F, Fut>(&self, ctx: &CancellationToken, op: F) -> T
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        match self.breaker.execute(ctx, op).await {
            Ok(value) => value,
            Err(err) => {
                debug!(breaker = self.breaker.name(), error = %err, "using fallback value");
                (self.fallback)(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::BreakerConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn cached_answer() -> FallbackBreaker<String, String> {
        let breaker = CircuitBreaker::must_new(
            "llm",
            BreakerConfig {
                failure_threshold: 1,
                timeout: Duration::from_secs(60),
                ..Default::default()
            },
        );
        FallbackBreaker::new(breaker, |err: BreakerError<String>| {
            if err.is_circuit_open() {
                "cached (circuit open)".to_string()
            } else {
                "cached".to_string()
            }
        })
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let fallback = cached_answer();
        let value = fallback
            .execute(&CancellationToken::new(), |_| async {
                Ok::<_, String>("fresh".to_string())
            })
            .await;
        assert_eq!(value, "fresh");
    }

    #[tokio::test]
    async fn test_failure_uses_fallback() {
        let fallback = cached_answer();
        let value = fallback
            .execute(&CancellationToken::new(), |_| async {
                Err::<String, _>("timeout talking to model".to_string())
            })
            .await;
        assert_eq!(value, "cached");
    }

    #[tokio::test]
    async fn test_open_circuit_uses_fallback_without_running() {
        let fallback = cached_answer();
        fallback
            .execute(&CancellationToken::new(), |_| async {
                Err::<String, _>("down".to_string())
            })
            .await;

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let value = fallback
            .execute(&CancellationToken::new(), move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>("fresh".to_string())
            })
            .await;

        assert_eq!(value, "cached (circuit open)");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panic_uses_fallback() {
        let fallback = cached_answer();
        let value = fallback
            .execute(&CancellationToken::new(), |_| async {
                if true {
                    panic!("bad response");
                }
                Ok::<String, String>(String::new())
            })
            .await;
        assert_eq!(value, "cached");
    }
}
