//! `quantlite status`: what the volume holds and what has been committed.

use anyhow::{Context, Result};
use quantlite_core::job::{JobSpec, VOLUME_MOUNT, VOLUME_NAME};
use quantlite_core::units::bytes_to_gb;
use quantlite_sandbox::{LocalVolume, Volume};
use serde_json::json;
use std::io::Write;
use std::path::Path;

pub fn cmd_status(json_output: bool, out: &mut dyn Write) -> Result<()> {
    let volume = LocalVolume::open(VOLUME_NAME, VOLUME_MOUNT)
        .with_context(|| format!("Volume '{}' is not available at {}", VOLUME_NAME, VOLUME_MOUNT))?;
    write_status(&volume, &JobSpec::default(), json_output, out)
}

fn describe(volume: &LocalVolume, path: &Path) -> Result<serde_json::Value> {
    if !volume.exists(path) {
        return Ok(json!({ "path": path, "present": false }));
    }
    Ok(json!({
        "path": path,
        "present": true,
        "bytes": volume.size(path)?,
        "committed": volume.is_committed(path)?,
    }))
}

fn write_status(
    volume: &LocalVolume,
    spec: &JobSpec,
    json_output: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let input = describe(volume, &spec.input_model)?;
    let output = describe(volume, &spec.output_model)?;
    let latest = volume.latest_commit()?;

    if json_output {
        let doc = json!({
            "volume": volume.name(),
            "input": input,
            "output": output,
            "latest_commit": latest,
        });
        writeln!(out, "{}", serde_json::to_string_pretty(&doc)?)?;
        return Ok(());
    }

    writeln!(out, "Volume: {} ({})", volume.name(), volume.root().display())?;
    for (label, v) in [("Input", &input), ("Output", &output)] {
        let path = v["path"].as_str().unwrap_or_default();
        match v["bytes"].as_u64() {
            Some(bytes) => {
                let committed = if v["committed"].as_bool() == Some(true) {
                    "committed"
                } else {
                    "uncommitted"
                };
                writeln!(
                    out,
                    "   {:<7} {} ({:.2} GB, {})",
                    format!("{}:", label),
                    path,
                    bytes_to_gb(bytes),
                    committed
                )?;
            }
            None => writeln!(out, "   {:<7} {} (missing)", format!("{}:", label), path)?,
        }
    }
    match latest {
        Some(c) => writeln!(
            out,
            "   Last commit: {} ({} file(s))",
            c.committed_at.to_rfc3339(),
            c.files.len()
        )?,
        None => writeln!(out, "   Last commit: never")?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, JobSpec, LocalVolume) {
        let dir = tempfile::tempdir().unwrap();
        let spec = JobSpec::rooted_at(dir.path(), &dir.path().join("build"));
        std::fs::write(&spec.input_model, vec![0u8; 64]).unwrap();
        let volume = LocalVolume::open("vol", dir.path()).unwrap();
        (dir, spec, volume)
    }

    #[test]
    fn test_status_before_any_commit() {
        let (_dir, spec, volume) = setup();
        let mut out = Vec::new();
        write_status(&volume, &spec, false, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("pruned_model.gguf (0.00 GB, uncommitted)"));
        assert!(text.contains("pruned_model_q4_k_m.gguf (missing)"));
        assert!(text.contains("Last commit: never"));
    }

    #[test]
    fn test_status_json_after_commit() {
        let (_dir, spec, volume) = setup();
        std::fs::write(&spec.output_model, vec![0u8; 16]).unwrap();
        volume.commit().unwrap();

        let mut out = Vec::new();
        write_status(&volume, &spec, true, &mut out).unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(doc["output"]["bytes"], 16);
        assert_eq!(doc["output"]["committed"], true);
        assert_eq!(doc["latest_commit"]["files"][0]["path"], "pruned_model_q4_k_m.gguf");
    }
}
