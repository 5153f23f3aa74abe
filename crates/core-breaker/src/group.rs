//! Parallel execution across a fixed set of breakers
//!
//! A [`CircuitBreakerGroup`] binds N breakers to N slots. Each call to
//! [`execute_all`](CircuitBreakerGroup::execute_all) runs one operation per
//! slot concurrently and returns the results in slot order.

use crate::circuit_breaker::CircuitBreaker;
use crate::error::BreakerError;
use futures::future::join_all;
use std::fmt;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// A fixed, ordered set of breakers
#[derive(Debug, Clone)]
pub struct CircuitBreakerGroup {
    breakers: Vec<CircuitBreaker>,
}

impl CircuitBreakerGroup {
    pub fn new(breakers: Vec<CircuitBreaker>) -> Self {
        Self { breakers }
    }

    pub fn breakers(&self) -> &[CircuitBreaker] {
        &self.breakers
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Run `ops[i]` through breaker `i`, all concurrently.
    ///
    /// # Panics
    ///
    /// Panics if `ops.len()` differs from the number of breakers.
    pub async fn execute_all<F, Fut, T, E>(
        &self,
        ctx: &CancellationToken,
        ops: Vec<F>,
    ) -> Vec<Result<T, BreakerError<E>>>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        assert_eq!(
            ops.len(),
            self.breakers.len(),
            "circuit breaker group has {} breakers but received {} operations",
            self.breakers.len(),
            ops.len()
        );

        join_all(
            self.breakers
                .iter()
                .zip(ops)
                .map(|(breaker, op)| breaker.execute(ctx, op)),
        )
        .await
    }
}
