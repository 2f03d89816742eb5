//! The fixed quantize job: where the model lives, what gets built, how it is run.
//!
//! Paths here are a contract with the volume contents and must not drift; the
//! job takes no caller parameters.

use serde::Serialize;
use std::path::{Path, PathBuf};

/// Mount point of the durable model volume inside the sandbox.
pub const VOLUME_MOUNT: &str = "/data";
/// Name of the durable volume bound at [`VOLUME_MOUNT`].
pub const VOLUME_NAME: &str = "llama31-mlp-only";
pub const APP_NAME: &str = "llama-quantizer";

pub const INPUT_MODEL: &str = "/data/pruned_model.gguf";
pub const OUTPUT_MODEL: &str = "/data/pruned_model_q4_k_m.gguf";
pub const BUILD_DIR: &str = "/root/llama-repo";
/// Fork known to read the pruned model layout. Default branch, no pin.
pub const UPSTREAM_REPO: &str = "https://github.com/ymcki/llama.cpp-b4139";
pub const BUILD_TARGET: &str = "llama-quantize";
pub const PROFILE_TAG: &str = "Q4_K_M";

/// Wall-clock budget for the whole job, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_CPUS: usize = 8;

/// Resources the job asks the sandbox for. The sandbox enforces them; the
/// driver only declares them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResourceRequest {
    pub timeout_secs: u64,
    pub cpus: usize,
}

impl Default for ResourceRequest {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            cpus: DEFAULT_CPUS,
        }
    }
}

/// Immutable description of one quantize run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSpec {
    pub input_model: PathBuf,
    pub output_model: PathBuf,
    pub build_dir: PathBuf,
    pub repo_url: String,
    pub build_target: String,
    pub profile: String,
    pub resources: ResourceRequest,
}

impl Default for JobSpec {
    fn default() -> Self {
        Self {
            input_model: PathBuf::from(INPUT_MODEL),
            output_model: PathBuf::from(OUTPUT_MODEL),
            build_dir: PathBuf::from(BUILD_DIR),
            repo_url: UPSTREAM_REPO.to_string(),
            build_target: BUILD_TARGET.to_string(),
            profile: PROFILE_TAG.to_string(),
            resources: ResourceRequest::default(),
        }
    }
}

impl JobSpec {
    /// Same fixed job, but rooted elsewhere. Used to point the driver at scratch
    /// directories; the file names stay the same.
    pub fn rooted_at(volume_root: &Path, build_dir: &Path) -> Self {
        let base = Self::default();
        let file_name = |p: &Path| p.file_name().map(PathBuf::from).unwrap_or_default();
        Self {
            input_model: volume_root.join(file_name(&base.input_model)),
            output_model: volume_root.join(file_name(&base.output_model)),
            build_dir: build_dir.to_path_buf(),
            ..base
        }
    }

    /// Location of the compiled quantizer inside the build tree.
    pub fn quantizer_path(&self) -> PathBuf {
        self.build_dir.join(&self.build_target)
    }

    /// Positional arguments for the quantizer: input, output, profile.
    pub fn quantizer_args(&self) -> Vec<String> {
        vec![
            self.input_model.to_string_lossy().into_owned(),
            self.output_model.to_string_lossy().into_owned(),
            self.profile.clone(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths_match_volume_contract() {
        let spec = JobSpec::default();
        assert_eq!(spec.input_model, PathBuf::from("/data/pruned_model.gguf"));
        assert_eq!(
            spec.output_model,
            PathBuf::from("/data/pruned_model_q4_k_m.gguf")
        );
        assert!(spec.input_model.starts_with(VOLUME_MOUNT));
        assert!(spec.output_model.starts_with(VOLUME_MOUNT));
        assert_eq!(spec.quantizer_path(), PathBuf::from("/root/llama-repo/llama-quantize"));
    }

    #[test]
    fn test_quantizer_args_order() {
        let spec = JobSpec::default();
        assert_eq!(
            spec.quantizer_args(),
            vec![
                "/data/pruned_model.gguf".to_string(),
                "/data/pruned_model_q4_k_m.gguf".to_string(),
                "Q4_K_M".to_string(),
            ]
        );
    }

    #[test]
    fn test_default_resources() {
        let r = ResourceRequest::default();
        assert_eq!(r.timeout_secs, 3600);
        assert_eq!(r.cpus, 8);
    }

    #[test]
    fn test_rooted_at_keeps_file_names() {
        let spec = JobSpec::rooted_at(Path::new("/tmp/vol"), Path::new("/tmp/build"));
        assert_eq!(spec.input_model, PathBuf::from("/tmp/vol/pruned_model.gguf"));
        assert_eq!(
            spec.output_model,
            PathBuf::from("/tmp/vol/pruned_model_q4_k_m.gguf")
        );
        assert_eq!(spec.build_dir, PathBuf::from("/tmp/build"));
        assert_eq!(spec.profile, "Q4_K_M");
    }
}
