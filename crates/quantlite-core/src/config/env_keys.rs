//! 环境变量 key 常量
//!
//! Every key uses the `QUANTLITE_*` prefix. None of them affect where the job
//! reads or writes model files.

/// 可观测性与日志
pub mod observability {
    pub const QUANTLITE_QUIET: &str = "QUANTLITE_QUIET";
    pub const QUANTLITE_LOG_LEVEL: &str = "QUANTLITE_LOG_LEVEL";
    pub const QUANTLITE_LOG_JSON: &str = "QUANTLITE_LOG_JSON";
    /// JSONL audit trail of job events (unset = disabled)
    pub const QUANTLITE_AUDIT_LOG: &str = "QUANTLITE_AUDIT_LOG";
}

/// Build tree handling
pub mod build {
    /// "1"/"true": discard the build tree before fetching, forcing a fresh clone.
    pub const QUANTLITE_REBUILD: &str = "QUANTLITE_REBUILD";
}
