/*!
 * Conductor CLI - validate breaker configuration and drive simulations
 */

use anyhow::Context;
use clap::{Parser, Subcommand};
use conductor::{
    audit::AuditLogger,
    breaker::StateObserver,
    config::{ConductorConfig, LogLevel},
    error::{ConductorError, EXIT_PARTIAL, EXIT_SUCCESS},
    logging,
    simulate::{self, Pattern, SimulationOptions},
    telemetry,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(version, about = "Circuit breaker configuration and simulation for Conductor", long_about = None)]
struct Cli {
    /// Log level (overrides the config file)
    #[arg(long = "log-level", value_enum, global = true)]
    log_level: Option<LogLevel>,

    /// Write JSON logs to this file instead of stderr
    #[arg(long = "log-file", value_name = "FILE", global = true)]
    log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    /// Record breaker state transitions to this file
    #[arg(long = "audit-log", value_name = "FILE", global = true)]
    audit_log: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a configuration file, validate it and list the breakers it defines
    Validate {
        /// Configuration file (TOML)
        #[arg(short = 'c', long = "config", value_name = "FILE")]
        config: PathBuf,
    },

    /// Drive one breaker through a scripted sequence of outcomes
    Simulate {
        /// Configuration file (TOML); built-in defaults when omitted
        #[arg(short = 'c', long = "config", value_name = "FILE")]
        config: Option<PathBuf>,

        /// Breaker to drive
        #[arg(short = 'b', long = "breaker")]
        breaker: String,

        /// Steps: s = success, f = failure, p = panic, w = wait out the open timeout
        #[arg(short = 'p', long = "pattern")]
        pattern: String,

        /// Simulated latency of each operation in milliseconds
        #[arg(long = "delay-ms", default_value = "0")]
        delay_ms: u64,

        /// Pause between steps in milliseconds
        #[arg(long = "pause-ms", default_value = "0")]
        pause_ms: u64,

        /// Route operations through the configured retry policy
        #[arg(long = "retry")]
        retry: bool,

        /// Print Prometheus text instead of the JSON report
        #[arg(long = "prometheus")]
        prometheus: bool,
    },

    /// Write an example configuration file
    Init {
        /// Destination path
        #[arg(short = 'o', long = "output", default_value = "conductor.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(short = 'f', long = "force")]
        force: bool,
    },
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<ConductorError>()
                .map(ConductorError::exit_code)
                .unwrap_or(EXIT_PARTIAL)
        }
    };
    std::process::exit(code);
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { ref config } => {
            let config = load_config(Some(config.as_path()), &cli)?;
            init_logging(&config);
            validate(&config)
        }
        Commands::Simulate {
            ref config,
            ref breaker,
            ref pattern,
            delay_ms,
            pause_ms,
            retry,
            prometheus,
        } => {
            let config = load_config(config.as_deref(), &cli)?;
            init_logging(&config);
            let pattern: Pattern = pattern.parse()?;
            let options = SimulationOptions {
                delay: Duration::from_millis(delay_ms),
                pause: Duration::from_millis(pause_ms),
                retry: retry.then(|| config.retry_config()),
            };

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("failed to start async runtime")?;
            runtime.block_on(run_simulation(&config, breaker, &pattern, &options, prometheus))
        }
        Commands::Init { ref output, force } => {
            init_logging(&apply_cli(ConductorConfig::default(), &cli));
            init(output, force)
        }
    }
}

/// Config file (or defaults) with command-line overrides applied
fn load_config(path: Option<&Path>, cli: &Cli) -> anyhow::Result<ConductorConfig> {
    let config = match path {
        Some(path) => ConductorConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ConductorConfig::default(),
    };
    Ok(apply_cli(config, cli))
}

fn apply_cli(mut config: ConductorConfig, cli: &Cli) -> ConductorConfig {
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    if cli.log_file.is_some() {
        config.log_file = cli.log_file.clone();
    }
    if cli.audit_log.is_some() {
        config.audit_log_path = cli.audit_log.clone();
    }
    config.verbose |= cli.verbose;
    config
}

fn init_logging(config: &ConductorConfig) {
    if let Err(e) = logging::init_logging(config) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }
}

fn validate(config: &ConductorConfig) -> anyhow::Result<()> {
    config.validate()?;

    println!("Configuration is valid");
    print_profile("(default)", config.defaults);
    for name in config.breakers.keys() {
        print_profile(name, config.profile_for(name));
    }

    let retry = &config.retry;
    println!(
        "retry: max_attempts={} initial_delay={}ms max_delay={}ms backoff_factor={}",
        retry.max_attempts, retry.initial_delay_ms, retry.max_delay_ms, retry.backoff_factor
    );
    Ok(())
}

fn print_profile(name: &str, profile: conductor::BreakerProfile) {
    println!(
        "  {:<24} failure_threshold={} success_threshold={} timeout={}ms max_concurrent={}",
        name,
        profile.failure_threshold,
        profile.success_threshold,
        profile.timeout_ms,
        profile.max_concurrent_requests
    );
}

async fn run_simulation(
    config: &ConductorConfig,
    name: &str,
    pattern: &Pattern,
    options: &SimulationOptions,
    prometheus: bool,
) -> anyhow::Result<()> {
    let mut observers: Vec<Arc<dyn StateObserver>> = Vec::new();
    if let Some(ref path) = config.audit_log_path {
        let audit = AuditLogger::new(Some(path.as_path()), config.audit_format)?;
        info!(path = %audit.path().display(), "audit log enabled");
        observers.push(Arc::new(audit));
    }

    let registry = config.build_registry(&observers)?;
    let breaker = registry.get_or_create(name);
    let report = simulate::run(&breaker, pattern, options).await?;

    for step in &report.steps {
        println!(
            "{:>3}  {:<8} {:<40} -> {}",
            step.index, step.step, step.outcome.to_string(), step.state
        );
    }

    // Observer notifications run on their own tasks; let them drain before exit
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }

    if prometheus {
        print!("{}", telemetry::render_registry(&registry)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

fn init(output: &Path, force: bool) -> anyhow::Result<()> {
    if output.exists() && !force {
        return Err(ConductorError::Config(format!(
            "{} already exists (use --force to overwrite)",
            output.display()
        ))
        .into());
    }

    ConductorConfig::example()
        .to_file(output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!(path = %output.display(), "wrote example configuration");
    println!("Wrote example configuration to {}", output.display());
    Ok(())
}
