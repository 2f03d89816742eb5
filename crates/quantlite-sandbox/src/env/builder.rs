//! Provision the execution environment and resolve what the job will run with.

use std::path::{Path, PathBuf};
use std::time::Instant;

use quantlite_core::job::ResourceRequest;
use thiserror::Error;

use super::image::ImageSpec;
use crate::runner::SystemRunner;
use crate::volume::{LocalVolume, VolumeError};

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Package '{package}' is declared but '{binary}' is not on PATH")]
    MissingTool { package: String, binary: String },

    #[error("Volume '{name}' is not mounted at {path}")]
    MissingMount { name: String, path: PathBuf },

    #[error(transparent)]
    Volume(#[from] VolumeError),
}

/// Where the durable volume is bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub name: String,
    pub path: PathBuf,
}

impl VolumeMount {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// A declared executable and where it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTool {
    pub package: &'static str,
    pub binary: &'static str,
    pub path: PathBuf,
}

/// A provisioned environment. The wall-clock budget starts when this is built.
#[derive(Debug)]
pub struct Sandbox {
    image: ImageSpec,
    volume: LocalVolume,
    resources: ResourceRequest,
    tools: Vec<ResolvedTool>,
    started: Instant,
}

impl Sandbox {
    pub fn image(&self) -> &ImageSpec {
        &self.image
    }

    pub fn volume(&self) -> &LocalVolume {
        &self.volume
    }

    pub fn resources(&self) -> ResourceRequest {
        self.resources
    }

    pub fn tools(&self) -> &[ResolvedTool] {
        &self.tools
    }

    /// Runner whose children all share this sandbox's deadline and CPU budget.
    pub fn runner(&self) -> SystemRunner {
        SystemRunner::unbounded()
            .with_deadline(self.started, self.resources.timeout_secs)
            .with_cpus(self.resources.cpus)
    }
}

/// Check the host against `image`, bind the volume and start the clock.
///
/// Any failure here is fatal: nothing of the job has run yet.
pub fn provision(
    image: &ImageSpec,
    mount: &VolumeMount,
    resources: ResourceRequest,
) -> Result<Sandbox, ProvisionError> {
    provision_with(image, mount, resources, |bin| which::which(bin).ok())
}

/// [`provision`] with a custom executable lookup.
pub fn provision_with<F>(
    image: &ImageSpec,
    mount: &VolumeMount,
    resources: ResourceRequest,
    lookup: F,
) -> Result<Sandbox, ProvisionError>
where
    F: Fn(&str) -> Option<PathBuf>,
{
    let tools = resolve_tools(image, lookup)?;
    let volume = bind_volume(mount)?;

    tracing::info!(
        base = image.base,
        packages = ?image.package_names(),
        volume = %mount.name,
        mount = %mount.path.display(),
        timeout_secs = resources.timeout_secs,
        cpus = resources.cpus,
        "environment provisioned"
    );

    Ok(Sandbox {
        image: image.clone(),
        volume,
        resources,
        tools,
        started: Instant::now(),
    })
}

fn resolve_tools<F>(image: &ImageSpec, lookup: F) -> Result<Vec<ResolvedTool>, ProvisionError>
where
    F: Fn(&str) -> Option<PathBuf>,
{
    let mut tools = Vec::new();
    for pkg in image.packages {
        for &binary in pkg.provides {
            let path = lookup(binary).ok_or_else(|| ProvisionError::MissingTool {
                package: pkg.name.to_string(),
                binary: binary.to_string(),
            })?;
            tracing::debug!(package = pkg.name, binary, path = %path.display(), "tool resolved");
            tools.push(ResolvedTool {
                package: pkg.name,
                binary,
                path,
            });
        }
    }
    Ok(tools)
}

fn bind_volume(mount: &VolumeMount) -> Result<LocalVolume, ProvisionError> {
    if !Path::new(&mount.path).is_dir() {
        return Err(ProvisionError::MissingMount {
            name: mount.name.clone(),
            path: mount.path.clone(),
        });
    }
    Ok(LocalVolume::open(mount.name.clone(), mount.path.clone())?)
}
