//! State-change observers
//!
//! A breaker reports every state transition to the observers registered on
//! its [`BreakerConfig`](crate::BreakerConfig). Each notification runs on its
//! own spawned task, so an observer that is slow or panics never blocks the
//! breaker or changes the result of the call that caused the transition.
//!
//! Three adapters cover the common cases:
//! - implement [`StateObserver`] directly (e.g. an audit sink),
//! - wrap a closure with [`FnObserver`],
//! - fan events out to any number of subscribers with [`BroadcastObserver`].
//!
//! # Example
//!
//! ```
//! use conductor_core_breaker::{BreakerConfig, BroadcastObserver, FnObserver, StateChangeEvent};
//!
//! let events = BroadcastObserver::new(64);
//! let mut rx = events.subscribe();
//!
//! let config = BreakerConfig::default()
//!     .with_observer(events.clone())
//!     .with_observer(FnObserver::new(|event: &StateChangeEvent| {
//!         println!("{} moved {} -> {}", event.name, event.from, event.to);
//!     }));
//! # let _ = (config, &mut rx);
//! ```

use crate::circuit_breaker::CircuitState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

/// A single state transition of a named breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChangeEvent {
    /// Breaker that changed state
    pub name: String,
    pub from: CircuitState,
    pub to: CircuitState,
    /// Wall-clock time of the transition
    pub at: DateTime<Utc>,
}

impl StateChangeEvent {
    /// Create an event stamped with the current time
    pub fn new(name: impl Into<String>, from: CircuitState, to: CircuitState) -> Self {
        Self {
            name: name.into(),
            from,
            to,
            at: Utc::now(),
        }
    }
}

/// Receives state transitions from one or more breakers
#[async_trait]
pub trait StateObserver: Send + Sync {
    /// Called once per transition, on a dedicated task
    async fn on_state_change(&self, event: &StateChangeEvent);
}

/// Adapts a plain closure into a [`StateObserver`]
pub struct FnObserver<F> {
    callback: F,
}

impl<F> FnObserver<F>
where
    F: Fn(&StateChangeEvent) + Send + Sync + 'static,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> fmt::Debug for FnObserver<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnObserver").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> StateObserver for FnObserver<F>
where
    F: Fn(&StateChangeEvent) + Send + Sync + 'static,
{
    async fn on_state_change(&self, event: &StateChangeEvent) {
        (self.callback)(event);
    }
}

/// Forwards events into a bounded broadcast channel.
///
/// Slow subscribers lag and lose the oldest events rather than applying
/// backpressure to the breaker. Sending with no live subscribers is a no-op.
#[derive(Debug, Clone)]
pub struct BroadcastObserver {
    tx: broadcast::Sender<StateChangeEvent>,
}

impl BroadcastObserver {
    /// Create a channel holding at most `capacity` undelivered events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Open a new subscription; only events sent afterwards are received
    pub fn subscribe(&self) -> broadcast::Receiver<StateChangeEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl StateObserver for BroadcastObserver {
    async fn on_state_change(&self, event: &StateChangeEvent) {
        let _ = self.tx.send(event.clone());
    }
}
