//! quantlite 统一配置层
//!
//! All environment reads live here; the rest of the workspace goes through the
//! structured configs instead of calling `std::env::var` directly. Job paths are
//! fixed in [`crate::job::JobSpec`] and are deliberately not configurable.
//!
//! - `loader`: env_or / env_optional / env_bool helpers
//! - `schema`: ObservabilityConfig, BuildConfig
//! - `env_keys`: key constants

pub mod env_keys;
pub mod loader;
pub mod schema;

pub use loader::{env_bool, env_optional, env_or};
pub use schema::{BuildConfig, BuildPolicy, ObservabilityConfig};
