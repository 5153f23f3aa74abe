/*!
 * Configuration for Conductor breakers, logging and audit
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use conductor_core_breaker::{BreakerConfig, MultiCircuitBreaker, RetryConfig, StateObserver};

use crate::error::{ConductorError, Result};

/// Top-level Conductor configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConductorConfig {
    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Write logs to this file (JSON) instead of stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Force debug-level logging
    #[serde(default)]
    pub verbose: bool,

    /// Record breaker state transitions to this file
    #[serde(default)]
    pub audit_log_path: Option<PathBuf>,

    /// Audit log format
    #[serde(default)]
    pub audit_format: AuditFormat,

    /// Profile used by every breaker without an override
    #[serde(default)]
    pub defaults: BreakerProfile,

    /// Per-dependency overrides, keyed by breaker name
    #[serde(default)]
    pub breakers: BTreeMap<String, BreakerOverride>,

    /// Backoff policy for retried calls
    #[serde(default)]
    pub retry: RetryProfile,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
            audit_log_path: None,
            audit_format: AuditFormat::Json,
            defaults: BreakerProfile::default(),
            breakers: BTreeMap::new(),
            retry: RetryProfile::default(),
        }
    }
}

/// Breaker settings as they appear in TOML (durations in milliseconds)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BreakerProfile {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Time spent open before probing
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Concurrent half-open probes
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: u32,
}

impl Default for BreakerProfile {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            timeout_ms: default_timeout_ms(),
            max_concurrent_requests: default_max_concurrent(),
        }
    }
}

impl BreakerProfile {
    /// Convert into a breaker configuration without observers
    pub fn to_breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            timeout: Duration::from_millis(self.timeout_ms),
            max_concurrent_requests: self.max_concurrent_requests,
            observers: Vec::new(),
        }
    }
}

/// Partial profile for a single breaker; unset fields inherit `[defaults]`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BreakerOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_threshold: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_requests: Option<u32>,
}

impl BreakerOverride {
    /// Layer this override on top of `base`
    pub fn apply(&self, base: &BreakerProfile) -> BreakerProfile {
        BreakerProfile {
            failure_threshold: self.failure_threshold.unwrap_or(base.failure_threshold),
            success_threshold: self.success_threshold.unwrap_or(base.success_threshold),
            timeout_ms: self.timeout_ms.unwrap_or(base.timeout_ms),
            max_concurrent_requests: self
                .max_concurrent_requests
                .unwrap_or(base.max_concurrent_requests),
        }
    }
}

/// Retry settings as they appear in TOML
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RetryProfile {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for RetryProfile {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl RetryProfile {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_factor: self.backoff_factor,
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Format for audit logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AuditFormat {
    /// JSON Lines format (one JSON object per line)
    #[default]
    Json,
    /// CSV format with header
    Csv,
}

// Default value functions for serde
fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_max_concurrent() -> u32 {
    1
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl ConductorConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: ConductorConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Validate the default profile, every override and the retry profile
    pub fn validate(&self) -> Result<()> {
        self.defaults
            .to_breaker_config()
            .validate()
            .map_err(|e| ConductorError::invalid_breaker("defaults", e))?;

        for name in self.breakers.keys() {
            if name.trim().is_empty() {
                return Err(ConductorError::Config(
                    "breaker names must not be empty".to_string(),
                ));
            }
            self.breaker_config(name)
                .validate()
                .map_err(|e| ConductorError::invalid_breaker(format!("breakers.{}", name), e))?;
        }

        self.retry
            .to_retry_config()
            .validate()
            .map_err(|e| ConductorError::invalid_breaker("retry", e))?;

        Ok(())
    }

    /// Effective profile for the breaker called `name`
    pub fn profile_for(&self, name: &str) -> BreakerProfile {
        match self.breakers.get(name) {
            Some(over) => over.apply(&self.defaults),
            None => self.defaults,
        }
    }

    /// Effective breaker configuration (without observers) for `name`
    pub fn breaker_config(&self, name: &str) -> BreakerConfig {
        self.profile_for(name).to_breaker_config()
    }

    pub fn retry_config(&self) -> RetryConfig {
        self.retry.to_retry_config()
    }

    /// Build a registry with every configured override registered.
    ///
    /// `observers` are attached to the default profile and every override,
    /// so each breaker the registry creates reports its transitions to them.
    pub fn build_registry(
        &self,
        observers: &[Arc<dyn StateObserver>],
    ) -> Result<MultiCircuitBreaker> {
        self.validate()?;

        let attach = |config: BreakerConfig| {
            observers
                .iter()
                .cloned()
                .fold(config, BreakerConfig::with_shared_observer)
        };

        let mut registry = MultiCircuitBreaker::new(attach(self.defaults.to_breaker_config()))
            .map_err(|e| ConductorError::invalid_breaker("defaults", e))?;

        for name in self.breakers.keys() {
            registry = registry
                .with_override(name.clone(), attach(self.breaker_config(name)))
                .map_err(|e| ConductorError::invalid_breaker(format!("breakers.{}", name), e))?;
        }

        Ok(registry)
    }

    /// Example configuration written by `conductor init`
    pub fn example() -> Self {
        let mut breakers = BTreeMap::new();
        breakers.insert(
            "anthropic-api".to_string(),
            BreakerOverride {
                failure_threshold: Some(3),
                timeout_ms: Some(30_000),
                ..Default::default()
            },
        );
        breakers.insert(
            "postgres".to_string(),
            BreakerOverride {
                failure_threshold: Some(10),
                success_threshold: Some(3),
                timeout_ms: Some(15_000),
                max_concurrent_requests: Some(2),
            },
        );
        breakers.insert(
            "mcp-github".to_string(),
            BreakerOverride {
                timeout_ms: Some(45_000),
                ..Default::default()
            },
        );

        Self {
            audit_log_path: Some(PathBuf::from("conductor_audit.log")),
            breakers,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core_breaker::{ConfigError, FnObserver, StateChangeEvent};

    #[test]
    fn test_default_config() {
        let config = ConductorConfig::default();
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.defaults.failure_threshold, 5);
        assert_eq!(config.defaults.success_threshold, 2);
        assert_eq!(config.defaults.timeout_ms, 60_000);
        assert!(config.breakers.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_override_inherits_defaults() {
        let config = ConductorConfig::from_toml_str(
            r#"
[defaults]
failure_threshold = 4
timeout_ms = 2000

[breakers.llm]
failure_threshold = 8
"#,
        )
        .unwrap();

        let llm = config.profile_for("llm");
        assert_eq!(llm.failure_threshold, 8);
        assert_eq!(llm.timeout_ms, 2000);
        assert_eq!(llm.success_threshold, 2);

        let other = config.breaker_config("redis");
        assert_eq!(other.failure_threshold, 4);
        assert_eq!(other.timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_invalid_override_names_scope() {
        let config = ConductorConfig::from_toml_str(
            r#"
[breakers.postgres]
success_threshold = 0
"#,
        )
        .unwrap();

        match config.validate().unwrap_err() {
            ConductorError::InvalidBreaker { scope, source } => {
                assert_eq!(scope, "breakers.postgres");
                assert_eq!(source, ConfigError::must_be_positive("success_threshold"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_invalid_retry_rejected() {
        let config = ConductorConfig {
            retry: RetryProfile {
                backoff_factor: 0.5,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().is_config_error());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = ConductorConfig::from_toml_str("[defaults]\ntimeout_ms = 0\n").unwrap();
        assert!(config.build_registry(&[]).is_err());
    }

    #[test]
    fn test_build_registry_applies_overrides_and_observers() {
        let config = ConductorConfig::example();
        let observer: Arc<dyn StateObserver> =
            Arc::new(FnObserver::new(|_: &StateChangeEvent| {}));
        let registry = config.build_registry(&[observer]).unwrap();

        let db = registry.get_or_create("postgres");
        assert_eq!(db.config().failure_threshold, 10);
        assert_eq!(db.config().max_concurrent_requests, 2);
        assert_eq!(db.config().observers.len(), 1);

        let fallback = registry.get_or_create("unlisted");
        assert_eq!(fallback.config().failure_threshold, 5);
        assert_eq!(fallback.config().observers.len(), 1);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = ConductorConfig::example();
        let toml = toml::to_string_pretty(&config).unwrap();
        let parsed = ConductorConfig::from_toml_str(&toml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conductor.toml");

        ConductorConfig::example().to_file(&path).unwrap();
        let loaded = ConductorConfig::from_file(&path).unwrap();

        assert_eq!(loaded.breakers.len(), 3);
        assert_eq!(loaded.profile_for("anthropic-api").failure_threshold, 3);
    }

    #[test]
    fn test_malformed_toml() {
        let err = ConductorConfig::from_toml_str("defaults = 3").unwrap_err();
        assert!(matches!(err, ConductorError::ConfigParse(_)));
    }

    #[test]
    fn test_readme_config_example() {
        let toml_str = r#"
log_level = "debug"
verbose = false
audit_log_path = "/var/log/conductor_audit.log"
audit_format = "csv"

[defaults]
failure_threshold = 5
success_threshold = 2
timeout_ms = 60000
max_concurrent_requests = 1

[breakers.anthropic-api]
failure_threshold = 3
timeout_ms = 30000

[retry]
max_attempts = 4
initial_delay_ms = 200
max_delay_ms = 5000
backoff_factor = 1.5
"#;

        let config = ConductorConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.audit_format, AuditFormat::Csv);
        assert_eq!(
            config.audit_log_path,
            Some(PathBuf::from("/var/log/conductor_audit.log"))
        );
        let retry = config.retry_config();
        assert_eq!(retry.max_attempts, 4);
        assert_eq!(retry.initial_delay, Duration::from_millis(200));
        assert_eq!(retry.backoff_factor, 1.5);
        assert!(config.validate().is_ok());
    }
}
