//! 按领域分组的配置结构体

use super::env_keys::{build as build_keys, observability as obv_keys};
use super::loader::{env_bool, env_optional, env_or};

/// 可观测性配置：quiet、log_level、log_json、audit_log
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub quiet: bool,
    pub log_level: String,
    pub log_json: bool,
    pub audit_log: Option<String>,
}

impl ObservabilityConfig {
    /// Read once per process; later calls return the cached value.
    pub fn from_env() -> &'static Self {
        use std::sync::OnceLock;
        static CACHE: OnceLock<ObservabilityConfig> = OnceLock::new();
        CACHE.get_or_init(Self::load)
    }

    fn load() -> Self {
        Self {
            quiet: env_bool(obv_keys::QUANTLITE_QUIET, &[], false),
            log_level: env_or(obv_keys::QUANTLITE_LOG_LEVEL, &[], || {
                "quantlite=info".to_string()
            }),
            log_json: env_bool(obv_keys::QUANTLITE_LOG_JSON, &[], false),
            audit_log: env_optional(obv_keys::QUANTLITE_AUDIT_LOG, &[]),
        }
    }
}

/// What to do with a build tree left over from an earlier run.
///
/// There is no staleness check: an existing tree is either trusted as-is or
/// thrown away, and the operator picks which.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildPolicy {
    /// Reuse any existing tree without checking it against upstream.
    #[default]
    ReuseExisting,
    /// Remove the tree first so the fetch step clones again.
    Fresh,
}

#[derive(Debug, Clone, Copy)]
pub struct BuildConfig {
    pub policy: BuildPolicy,
}

impl BuildConfig {
    pub fn from_env() -> Self {
        let policy = if env_bool(build_keys::QUANTLITE_REBUILD, &[], false) {
            BuildPolicy::Fresh
        } else {
            BuildPolicy::ReuseExisting
        };
        Self { policy }
    }

    /// CLI `--rebuild` wins over the environment; absent flag keeps env value.
    pub fn with_cli_override(mut self, rebuild: bool) -> Self {
        if rebuild {
            self.policy = BuildPolicy::Fresh;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_rebuild_overrides_default() {
        let cfg = BuildConfig {
            policy: BuildPolicy::ReuseExisting,
        }
        .with_cli_override(true);
        assert_eq!(cfg.policy, BuildPolicy::Fresh);
    }

    #[test]
    fn test_cli_without_flag_keeps_env_policy() {
        let cfg = BuildConfig {
            policy: BuildPolicy::Fresh,
        }
        .with_cli_override(false);
        assert_eq!(cfg.policy, BuildPolicy::Fresh);
    }
}
