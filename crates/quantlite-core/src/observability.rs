//! Observability: tracing init and the JSONL audit trail.
//!
//! Uses [`ObservabilityConfig`] for QUANTLITE_QUIET, LOG_LEVEL, LOG_JSON, AUDIT_LOG.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use serde_json::json;
use tracing_subscriber::{prelude::*, EnvFilter};

use crate::config::ObservabilityConfig;

static AUDIT_PATH: Mutex<Option<String>> = Mutex::new(None);

/// Initialize tracing. Call once at process startup; logs go to stderr so
/// stdout stays reserved for the job report.
/// When QUANTLITE_QUIET=1, only WARN and above are logged.
pub fn init_tracing() {
    let cfg = ObservabilityConfig::from_env();
    let level = if cfg.quiet {
        "quantlite=warn".to_string()
    } else {
        cfg.log_level.clone()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    let _ = if cfg.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    };
}

/// Quiet flag, as read by the `info_log!` style helpers.
pub fn is_quiet() -> bool {
    ObservabilityConfig::from_env().quiet
}

fn get_audit_path() -> Option<String> {
    {
        let guard = AUDIT_PATH.lock().ok()?;
        if let Some(ref p) = *guard {
            return Some(p.clone());
        }
    }
    let path = ObservabilityConfig::from_env().audit_log.clone()?;
    if let Some(parent) = Path::new(&path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    {
        let mut guard = AUDIT_PATH.lock().ok()?;
        *guard = Some(path.clone());
    }
    Some(path)
}

fn append_jsonl(path: &str, record: &serde_json::Value) {
    if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(path) {
        if let Ok(line) = serde_json::to_string(record) {
            let _ = writeln!(f, "{}", line);
        }
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Fresh id tying together all audit records of one run.
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Audit: job_started
pub fn audit_job_started(run_id: &str, job: &serde_json::Value) {
    if let Some(path) = get_audit_path() {
        let record = json!({
            "ts": now(),
            "event": "job_started",
            "run_id": run_id,
            "job": job,
        });
        append_jsonl(&path, &record);
    }
}

/// Audit: step_finished (verify / fetch / clean / build / quantize)
pub fn audit_step_finished(run_id: &str, step: &str, ok: bool, duration_ms: u64) {
    if let Some(path) = get_audit_path() {
        let record = json!({
            "ts": now(),
            "event": "step_finished",
            "run_id": run_id,
            "step": step,
            "ok": ok,
            "duration_ms": duration_ms,
        });
        append_jsonl(&path, &record);
    }
}

/// Audit: volume_committed
pub fn audit_volume_committed(run_id: &str, volume: &str, files: &[String]) {
    if let Some(path) = get_audit_path() {
        let record = json!({
            "ts": now(),
            "event": "volume_committed",
            "run_id": run_id,
            "volume": volume,
            "files": files,
        });
        append_jsonl(&path, &record);
    }
}

/// Audit: job_finished. `outcome` is one of input_missing / completed / tool_failed / error.
pub fn audit_job_finished(run_id: &str, outcome: &str, exit_code: Option<i32>) {
    if let Some(path) = get_audit_path() {
        let record = json!({
            "ts": now(),
            "event": "job_finished",
            "run_id": run_id,
            "outcome": outcome,
            "exit_code": exit_code,
            "success": outcome == "completed",
        });
        append_jsonl(&path, &record);
    }
}
