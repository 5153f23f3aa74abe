//! Name-keyed pool of circuit breakers
//!
//! [`MultiCircuitBreaker`] lazily creates one breaker per dependency name.
//! Creation uses a double-checked lock: a read lock serves the common case,
//! and the write lock re-checks before inserting, so concurrent first access
//! to the same name always yields the same breaker.
//!
//! The registry is an ordinary value owned by the caller and passed to
//! whatever needs it; there is no process-wide instance.
//!
//! # Example
//!
//! ```
//! use conductor_core_breaker::{BreakerConfig, MultiCircuitBreaker};
//!
//! let registry = MultiCircuitBreaker::new(BreakerConfig::default()).unwrap();
//! let db = registry.get_or_create("postgres");
//! let again = registry.get_or_create("postgres");
//! assert_eq!(db.name(), again.name());
//! assert_eq!(registry.len(), 1);
//! assert!(registry.health().is_healthy());
//! ```

use crate::circuit_breaker::{BreakerConfig, BreakerStats, CircuitBreaker, CircuitState};
use crate::error::{BreakerError, ConfigError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Registered breakers bucketed by state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Closed breakers
    pub healthy: Vec<String>,
    /// Half-open breakers
    pub degraded: Vec<String>,
    /// Open breakers
    pub unhealthy: Vec<String>,
}

impl HealthStatus {
    /// True when no breaker is open or half-open
    pub fn is_healthy(&self) -> bool {
        self.degraded.is_empty() && self.unhealthy.is_empty()
    }

    /// Number of breakers covered
    pub fn total(&self) -> usize {
        self.healthy.len() + self.degraded.len() + self.unhealthy.len()
    }
}

/// Lazily populated registry of named breakers
pub struct MultiCircuitBreaker {
    default_config: BreakerConfig,
    overrides: HashMap<String, BreakerConfig>,
    breakers: RwLock<HashMap<String, CircuitBreaker>>,
}

impl fmt::Debug for MultiCircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiCircuitBreaker")
            .field("default_config", &self.default_config)
            .field("overrides", &self.overrides.keys().collect::<Vec<_>>())
            .field("breakers", &self.names())
            .finish()
    }
}

impl MultiCircuitBreaker {
    /// Create a registry whose breakers use `default_config`
    pub fn new(default_config: BreakerConfig) -> Result<Self, ConfigError> {
        default_config.validate()?;
        Ok(Self {
            default_config,
            overrides: HashMap::new(),
            breakers: RwLock::new(HashMap::new()),
        })
    }

    /// Use `config` instead of the default for breakers named `name`
    pub fn with_override(
        mut self,
        name: impl Into<String>,
        config: BreakerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        self.overrides.insert(name.into(), config);
        Ok(self)
    }

    /// Configuration a breaker named `name` is (or would be) created with
    pub fn config_for(&self, name: &str) -> &BreakerConfig {
        self.overrides.get(name).unwrap_or(&self.default_config)
    }

    /// Existing breaker, if one has been created
    pub fn get(&self, name: &str) -> Option<CircuitBreaker> {
        self.breakers.read().get(name).cloned()
    }

    /// Existing breaker, or a new one registered under `name`
    pub fn get_or_create(&self, name: &str) -> CircuitBreaker {
        if let Some(breaker) = self.breakers.read().get(name) {
            return breaker.clone();
        }

        let mut breakers = self.breakers.write();
        if let Some(breaker) = breakers.get(name) {
            return breaker.clone();
        }

        debug!(breaker = name, "creating circuit breaker");
        let breaker = CircuitBreaker::from_validated(name, self.config_for(name).clone());
        breakers.insert(name.to_string(), breaker.clone());
        breaker
    }

    /// Execute `op` through the breaker registered under `name`
    pub async fn execute<F, Fut, T, E>(
        &self,
        name: &str,
        ctx: &CancellationToken,
        op: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let breaker = self.get_or_create(name);
        breaker.execute(ctx, op).await
    }

    /// Sorted names of every registered breaker
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }

    /// Bucket every breaker by its current state
    pub fn health(&self) -> HealthStatus {
        let mut status = HealthStatus::default();
        for breaker in self.snapshot() {
            let name = breaker.name().to_string();
            match breaker.state() {
                CircuitState::Closed => status.healthy.push(name),
                CircuitState::HalfOpen => status.degraded.push(name),
                CircuitState::Open => status.unhealthy.push(name),
            }
        }
        status
    }

    /// Stats of every breaker, sorted by name
    pub fn stats_all(&self) -> Vec<BreakerStats> {
        self.snapshot().iter().map(CircuitBreaker::stats).collect()
    }

    /// Reset every registered breaker to closed
    pub fn reset_all(&self) {
        for breaker in self.snapshot() {
            breaker.reset();
        }
    }

    /// Handles to all breakers sorted by name, taken without holding the
    /// registry lock while breakers are inspected
    pub fn snapshot(&self) -> Vec<CircuitBreaker> {
        let mut breakers: Vec<CircuitBreaker> = self.breakers.read().values().cloned().collect();
        breakers.sort_by(|a, b| a.name().cmp(b.name()));
        breakers
    }
}
