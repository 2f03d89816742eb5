//! `quantlite check`: provision the environment without running the job.

use anyhow::{Context, Result};
use quantlite_core::job::{ResourceRequest, VOLUME_MOUNT, VOLUME_NAME};
use quantlite_sandbox::env::builder::Sandbox;
use quantlite_sandbox::{provision, ImageSpec, VolumeMount};
use std::io::Write;

pub fn cmd_check(out: &mut dyn Write) -> Result<()> {
    let mount = VolumeMount::new(VOLUME_NAME, VOLUME_MOUNT);
    let sandbox = provision(&ImageSpec::default(), &mount, ResourceRequest::default())
        .context("Environment check failed")?;
    write_summary(&sandbox, out)
}

fn write_summary(sandbox: &Sandbox, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "✅ Environment ready ({})", sandbox.image().base)?;
    for tool in sandbox.tools() {
        writeln!(
            out,
            "   {:<16} {:<12} {}",
            tool.package,
            tool.binary,
            tool.path.display()
        )?;
    }
    let resources = sandbox.resources();
    writeln!(
        out,
        "   volume: {} → {}",
        VOLUME_NAME,
        sandbox.volume().root().display()
    )?;
    writeln!(
        out,
        "   budget: {}s wall clock, {} CPUs",
        resources.timeout_secs, resources.cpus
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quantlite_sandbox::env::builder::provision_with;
    use std::path::PathBuf;

    #[test]
    fn test_summary_lists_tools_and_budget() {
        let dir = tempfile::tempdir().unwrap();
        let mount = VolumeMount::new(VOLUME_NAME, dir.path());
        let sandbox = provision_with(
            &ImageSpec::default(),
            &mount,
            ResourceRequest::default(),
            |b| Some(PathBuf::from("/usr/bin").join(b)),
        )
        .unwrap();
        let mut out = Vec::new();
        write_summary(&sandbox, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("/usr/bin/git"));
        assert!(text.contains("/usr/bin/pkg-config"));
        assert!(text.contains("3600s wall clock, 8 CPUs"));
    }
}
