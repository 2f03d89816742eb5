pub mod common;
pub mod env;
pub mod log;
pub mod runner;
pub mod volume;

pub use env::builder::{provision, ProvisionError, Sandbox, VolumeMount};
pub use env::image::ImageSpec;
pub use runner::{CommandSpec, ProcessError, ProcessRunner, SystemRunner};
pub use volume::{CommitRecord, LocalVolume, Volume, VolumeError};
