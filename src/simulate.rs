/*!
 * Scripted breaker simulations
 *
 * A pattern such as `fffwss` drives one breaker through a known sequence of
 * outcomes so its configuration can be checked before it guards real
 * traffic:
 *
 * | char | step                                           |
 * |------|------------------------------------------------|
 * | `s`  | operation succeeds                             |
 * | `f`  | operation returns an error                     |
 * | `p`  | operation panics                               |
 * | `w`  | wait out the breaker's open timeout            |
 *
 * Whitespace, `,` and `-` are ignored so longer scripts can be grouped.
 */

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use conductor_core_breaker::{
    BreakerError, BreakerStats, CircuitBreaker, CircuitState, MetricsSnapshot, RetryConfig,
    RetryingBreaker,
};

use crate::error::{ConductorError, Result};

/// Slack added to the open timeout so a `w` step always lands past it
const WAIT_MARGIN: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Success,
    Failure,
    Panic,
    Wait,
}

impl Step {
    fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            's' => Some(Step::Success),
            'f' => Some(Step::Failure),
            'p' => Some(Step::Panic),
            'w' => Some(Step::Wait),
            _ => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::Success => "success",
            Step::Failure => "failure",
            Step::Panic => "panic",
            Step::Wait => "wait",
        };
        f.pad(s)
    }
}

/// Parsed simulation script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern(Vec<Step>);

impl Pattern {
    pub fn steps(&self) -> &[Step] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for Pattern {
    type Err = ConductorError;

    fn from_str(s: &str) -> Result<Self> {
        let mut steps = Vec::new();
        for (position, c) in s.chars().enumerate() {
            if c.is_whitespace() || c == ',' || c == '-' {
                continue;
            }
            let step = Step::from_char(c).ok_or_else(|| ConductorError::InvalidPattern {
                position,
                reason: format!("unexpected '{}', expected one of s, f, p, w", c),
            })?;
            steps.push(step);
        }

        if steps.is_empty() {
            return Err(ConductorError::InvalidPattern {
                position: 0,
                reason: "pattern contains no steps".to_string(),
            });
        }
        Ok(Pattern(steps))
    }
}

/// What one step produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure { error: String },
    Panicked { message: String },
    Rejected { reason: String },
    Timeout,
    Waited { ms: u64 },
}

impl Outcome {
    fn from_result(result: std::result::Result<(), BreakerError<String>>) -> Self {
        match result {
            Ok(()) => Outcome::Success,
            Err(BreakerError::Operation(error)) => Outcome::Failure { error },
            Err(BreakerError::Panicked(message)) => Outcome::Panicked { message },
            Err(BreakerError::Timeout) => Outcome::Timeout,
            Err(err) => Outcome::Rejected {
                reason: err.to_string(),
            },
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "ok"),
            Outcome::Failure { error } => write!(f, "failed: {}", error),
            Outcome::Panicked { message } => write!(f, "panicked: {}", message),
            Outcome::Rejected { reason } => write!(f, "rejected: {}", reason),
            Outcome::Timeout => write!(f, "timed out"),
            Outcome::Waited { ms } => write!(f, "waited {}ms", ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub index: usize,
    pub step: Step,
    pub outcome: Outcome,
    /// Breaker state once the step finished
    pub state: CircuitState,
}

/// Everything a simulation observed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReport {
    pub breaker: String,
    pub steps: Vec<StepOutcome>,
    pub stats: BreakerStats,
    pub metrics: MetricsSnapshot,
}

impl SimulationReport {
    /// Count of steps that ended with `predicate`
    pub fn count<P: Fn(&Outcome) -> bool>(&self, predicate: P) -> usize {
        self.steps.iter().filter(|s| predicate(&s.outcome)).count()
    }
}

/// Knobs for [`run`]
#[derive(Debug, Clone, Default)]
pub struct SimulationOptions {
    /// Simulated latency of every operation
    pub delay: Duration,
    /// Pause between steps
    pub pause: Duration,
    /// Route operations through a retrying breaker
    pub retry: Option<RetryConfig>,
}

/// Drive `breaker` through `pattern`
pub async fn run(
    breaker: &CircuitBreaker,
    pattern: &Pattern,
    options: &SimulationOptions,
) -> Result<SimulationReport> {
    let retrying = match &options.retry {
        Some(config) => Some(
            RetryingBreaker::new(breaker.clone(), config.clone())
                .map_err(|e| ConductorError::invalid_breaker("retry", e))?,
        ),
        None => None,
    };
    let ctx = CancellationToken::new();

    info!(
        breaker = breaker.name(),
        steps = pattern.len(),
        retry = retrying.is_some(),
        "starting simulation"
    );

    let mut steps = Vec::with_capacity(pattern.len());
    for (index, &step) in pattern.steps().iter().enumerate() {
        if index > 0 && !options.pause.is_zero() {
            tokio::time::sleep(options.pause).await;
        }

        let outcome = match step {
            Step::Wait => {
                let wait = breaker.config().timeout + WAIT_MARGIN;
                tokio::time::sleep(wait).await;
                Outcome::Waited {
                    ms: wait.as_millis() as u64,
                }
            }
            _ => {
                let delay = options.delay;
                let op = move |_token: CancellationToken| simulated_call(step, delay);
                let result = match &retrying {
                    Some(retrying) => retrying.execute(&ctx, op).await,
                    None => breaker.execute(&ctx, op).await,
                };
                Outcome::from_result(result)
            }
        };

        let state = breaker.state();
        debug!(breaker = breaker.name(), index, %step, %outcome, %state, "simulation step");
        steps.push(StepOutcome {
            index,
            step,
            outcome,
            state,
        });
    }

    Ok(SimulationReport {
        breaker: breaker.name().to_string(),
        steps,
        stats: breaker.stats(),
        metrics: breaker.metrics(),
    })
}

async fn simulated_call(step: Step, delay: Duration) -> std::result::Result<(), String> {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    match step {
        Step::Failure => Err("simulated failure".to_string()),
        Step::Panic => panic!("simulated panic"),
        _ => Ok(()),
    }
}
