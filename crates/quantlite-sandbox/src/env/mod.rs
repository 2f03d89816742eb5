//! Execution environment: declared image, volume binding, resource budget.
//!
//! `image` describes what the environment must contain; `builder` checks the
//! host actually provides it and hands back a [`builder::Sandbox`] that owns the
//! volume handle and the deadline-bound process runner.

pub mod builder;
pub mod image;
