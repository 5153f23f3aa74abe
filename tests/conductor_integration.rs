//! Host-level integration: TOML config -> registry -> audit log and metrics

use conductor::audit::read_audit_log;
use conductor::breaker::{CircuitState, StateObserver};
use conductor::simulate::{self, Outcome, Pattern, SimulationOptions};
use conductor::telemetry::render_registry;
use conductor::{AuditFormat, AuditLogger, ConductorConfig};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

const CONFIG: &str = r#"
log_level = "warn"

[defaults]
failure_threshold = 5
timeout_ms = 60000

[breakers.anthropic-api]
failure_threshold = 2
success_threshold = 1
timeout_ms = 40

[retry]
max_attempts = 2
initial_delay_ms = 1
max_delay_ms = 2
"#;

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn simulated_outage_is_audited_and_exported() {
    let dir = tempdir().unwrap();
    let audit_path = dir.path().join("transitions.jsonl");

    let config = ConductorConfig::from_toml_str(CONFIG).unwrap();
    let audit: Arc<dyn StateObserver> =
        Arc::new(AuditLogger::new(Some(audit_path.as_path()), AuditFormat::Json).unwrap());
    let registry = config.build_registry(&[audit]).unwrap();

    let breaker = registry.get_or_create("anthropic-api");
    let pattern: Pattern = "ff s w s".parse().unwrap();
    let report = simulate::run(&breaker, &pattern, &SimulationOptions::default())
        .await
        .unwrap();

    assert!(matches!(report.steps[2].outcome, Outcome::Rejected { .. }));
    assert_eq!(report.stats.state, CircuitState::Closed);
    settle().await;

    let records = read_audit_log(&audit_path).unwrap();
    let mut events: Vec<&str> = records.iter().map(|r| r.event.as_str()).collect();
    events.sort_unstable();
    assert_eq!(events, vec!["opened", "probing", "recovered"]);
    assert!(records.iter().all(|r| r.breaker == "anthropic-api"));

    let text = render_registry(&registry).unwrap();
    assert!(text.contains(
        "conductor_breaker_transitions{breaker=\"anthropic-api\",to=\"open\"} 1"
    ));
    assert!(text.contains("conductor_breakers{health=\"healthy\"} 1"));
}

#[tokio::test]
async fn unlisted_breaker_uses_default_profile() {
    let config = ConductorConfig::from_toml_str(CONFIG).unwrap();
    let registry = config.build_registry(&[]).unwrap();

    let pattern: Pattern = "ffff".parse().unwrap();
    let report = simulate::run(
        &registry.get_or_create("postgres"),
        &pattern,
        &SimulationOptions::default(),
    )
    .await
    .unwrap();

    assert!(report.steps.iter().all(|s| s.state == CircuitState::Closed));
    assert_eq!(report.stats.consecutive_failures, 4);
    assert!(registry.health().is_healthy());
}

#[tokio::test]
async fn configured_retry_policy_is_applied() {
    let config = ConductorConfig::from_toml_str(CONFIG).unwrap();
    let registry = config.build_registry(&[]).unwrap();
    let options = SimulationOptions {
        retry: Some(config.retry_config()),
        ..Default::default()
    };

    let pattern: Pattern = "f".parse().unwrap();
    let report = simulate::run(&registry.get_or_create("postgres"), &pattern, &options)
        .await
        .unwrap();

    assert!(matches!(report.steps[0].outcome, Outcome::Failure { .. }));
    assert_eq!(report.stats.total_failures, 2);
}

#[test]
fn example_config_survives_disk_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("conductor.toml");

    ConductorConfig::example().to_file(&path).unwrap();
    let loaded = ConductorConfig::from_file(&path).unwrap();

    assert_eq!(loaded, ConductorConfig::example());
    let registry = loaded.build_registry(&[]).unwrap();
    assert_eq!(
        registry.get_or_create("postgres").config().timeout,
        Duration::from_secs(15)
    );
}
