//! Error types for breaker operations

use thiserror::Error;

/// Error returned by [`CircuitBreaker::execute`](crate::CircuitBreaker::execute)
/// and the combinators built on top of it.
///
/// The first four variants are produced by the breaker itself. `Operation`
/// carries the caller's own error verbatim.
#[derive(Error, Debug)]
pub enum BreakerError<E> {
    /// Circuit is open and the timeout has not elapsed; the operation never ran
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// Half-open trial slots are exhausted
    #[error("too many requests while circuit breaker is half-open")]
    TooManyRequests,

    /// The caller's cancellation token fired before the operation reported a result
    #[error("circuit breaker call cancelled before the operation completed")]
    Timeout,

    /// The operation panicked; the payload is rendered as a message
    #[error("operation panicked: {0}")]
    Panicked(String),

    /// The operation itself failed
    #[error("{0}")]
    Operation(E),
}

impl<E> BreakerError<E> {
    /// True when the breaker rejected the call because it is open
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, BreakerError::CircuitOpen)
    }

    /// True when the half-open bulkhead rejected the call
    pub fn is_too_many_requests(&self) -> bool {
        matches!(self, BreakerError::TooManyRequests)
    }

    /// True when the caller stopped waiting for the result
    pub fn is_timeout(&self) -> bool {
        matches!(self, BreakerError::Timeout)
    }

    /// True when the operation panicked
    pub fn is_panic(&self) -> bool {
        matches!(self, BreakerError::Panicked(_))
    }

    /// True when the breaker refused admission without running the operation
    pub fn is_rejection(&self) -> bool {
        self.is_circuit_open() || self.is_too_many_requests()
    }

    /// Borrow the caller's error, if this is one
    pub fn operation(&self) -> Option<&E> {
        match self {
            BreakerError::Operation(e) => Some(e),
            _ => None,
        }
    }

    /// Take the caller's error, if this is one
    pub fn into_operation(self) -> Option<E> {
        match self {
            BreakerError::Operation(e) => Some(e),
            _ => None,
        }
    }

    /// Map the caller's error type, keeping breaker-produced variants as they are
    pub fn map_operation<F, E2>(self, f: F) -> BreakerError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            BreakerError::CircuitOpen => BreakerError::CircuitOpen,
            BreakerError::TooManyRequests => BreakerError::TooManyRequests,
            BreakerError::Timeout => BreakerError::Timeout,
            BreakerError::Panicked(msg) => BreakerError::Panicked(msg),
            BreakerError::Operation(e) => BreakerError::Operation(f(e)),
        }
    }
}

/// Configuration validation failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A field that must be strictly positive was zero
    #[error("{field} must be greater than zero")]
    MustBePositive { field: &'static str },

    /// A field holds a value outside its accepted range
    #[error("invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ConfigError {
    /// Create a must-be-positive error
    pub fn must_be_positive(field: &'static str) -> Self {
        ConfigError::MustBePositive { field }
    }

    /// Create an invalid value error
    pub fn invalid_value<S: Into<String>>(field: &'static str, reason: S) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}
