/*!
 * Audit logging for breaker state transitions
 *
 * [`AuditLogger`] is a [`StateObserver`]: register it on every breaker and
 * each transition becomes one JSON Lines (or CSV) record in an append-only
 * file.
 *
 * # Example
 *
 * ```no_run
 * use conductor::audit::AuditLogger;
 * use conductor::config::AuditFormat;
 * use conductor::breaker::{BreakerConfig, CircuitBreaker};
 * use std::path::Path;
 * use std::sync::Arc;
 *
 * let audit = Arc::new(AuditLogger::new(Some(Path::new("audit.log")), AuditFormat::Json).unwrap());
 * let config = BreakerConfig::default().with_shared_observer(audit);
 * let breaker = CircuitBreaker::new("postgres", config).unwrap();
 * # let _ = breaker;
 * ```
 */

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use conductor_core_breaker::{CircuitState, StateChangeEvent, StateObserver};

use crate::config::AuditFormat;
use crate::error::{ConductorError, Result};

const CSV_HEADER: &str = "timestamp,breaker,from,to,event";

/// One audit record per breaker state transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// When the transition happened, serialized as RFC 3339
    pub timestamp: DateTime<Utc>,

    /// Breaker that changed state
    pub breaker: String,

    pub from: CircuitState,
    pub to: CircuitState,

    /// Event kind: opened, probing, recovered, reset
    pub event: String,
}

impl TransitionRecord {
    pub fn from_event(event: &StateChangeEvent) -> Self {
        Self {
            timestamp: event.at,
            breaker: event.name.clone(),
            from: event.from,
            to: event.to,
            event: classify(event.from, event.to).to_string(),
        }
    }
}

/// Name the transition the way operators talk about it
fn classify(from: CircuitState, to: CircuitState) -> &'static str {
    match (from, to) {
        (_, CircuitState::Open) => "opened",
        (_, CircuitState::HalfOpen) => "probing",
        (CircuitState::HalfOpen, CircuitState::Closed) => "recovered",
        (_, CircuitState::Closed) => "reset",
    }
}

/// Append-only transition log
pub struct AuditLogger {
    /// Path to the audit log file
    path: PathBuf,
    /// Output format (JSON or CSV)
    format: AuditFormat,
    /// Writer plus whether the CSV header is already in the file
    writer: Mutex<(BufWriter<File>, bool)>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("path", &self.path)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl AuditLogger {
    /// Create a new audit logger
    ///
    /// Opens or creates the log file in append mode. If `path` is None,
    /// defaults to "conductor_audit.log" in the current directory.
    ///
    /// # Errors
    ///
    /// Returns `ConductorError::AuditLogOpen` if the file cannot be opened or created.
    pub fn new(path: Option<&Path>, format: AuditFormat) -> Result<Self> {
        let log_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("conductor_audit.log"));

        if let Some(parent) = log_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| {
                    ConductorError::AuditLogOpen {
                        path: log_path.clone(),
                        source,
                    }
                })?;
            }
        }

        let has_content = std::fs::metadata(&log_path)
            .map(|m| m.len() > 0)
            .unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|source| ConductorError::AuditLogOpen {
                path: log_path.clone(),
                source,
            })?;

        Ok(Self {
            path: log_path,
            format,
            writer: Mutex::new((BufWriter::new(file), has_content)),
        })
    }

    /// Get the path to the audit log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the audit format
    pub fn format(&self) -> AuditFormat {
        self.format
    }

    /// Write one record and flush it
    pub fn emit(&self, record: &TransitionRecord) -> Result<()> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| ConductorError::AuditLog("audit writer lock poisoned".to_string()))?;
        let (writer, header_written) = &mut *guard;

        match self.format {
            AuditFormat::Json => {
                let json = serde_json::to_string(record)?;
                writeln!(writer, "{}", json)?;
            }
            AuditFormat::Csv => {
                if !*header_written {
                    writeln!(writer, "{}", CSV_HEADER)?;
                    *header_written = true;
                }
                writeln!(
                    writer,
                    "{},{},{},{},{}",
                    record.timestamp.to_rfc3339(),
                    escape_csv(&record.breaker),
                    record.from,
                    record.to,
                    record.event
                )?;
            }
        }

        writer.flush()?;
        Ok(())
    }
}

#[async_trait]
impl StateObserver for AuditLogger {
    async fn on_state_change(&self, event: &StateChangeEvent) {
        if let Err(e) = self.emit(&TransitionRecord::from_event(event)) {
            warn!(breaker = %event.name, error = %e, "failed to write audit record");
        }
    }
}

/// Quote fields that contain separators
fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Read back a JSON Lines audit log
pub fn read_audit_log(log_path: &Path) -> Result<Vec<TransitionRecord>> {
    let file = File::open(log_path)?;
    let mut records = Vec::new();

    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }

    Ok(records)
}
