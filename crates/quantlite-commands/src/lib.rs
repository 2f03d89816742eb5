//! quantlite commands: the quantize job plus the environment helpers around it.

pub mod check;
pub mod image;
pub mod quantize;
pub mod status;

pub use quantize::{cmd_run, JobOutcome, QuantizeJob};
