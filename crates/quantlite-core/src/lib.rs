pub mod config;
pub mod job;
pub mod observability;
pub mod units;
