//! `quantlite run`: the quantize job.
//!
//! Flow:
//!   1. Verify the input model is on the volume (missing → soft return)
//!   2. Fetch the llama.cpp fork unless the build tree already exists
//!   3. `make clean` (best effort) then `make llama-quantize -jN` (fatal on failure)
//!   4. Run the quantizer, streaming its merged output line by line
//!   5. On exit 0 print sizes and commit the volume; otherwise print the code
//!
//! Failure tiers: a missing input and a failing quantizer are reported and end
//! the job with `Ok`; clone, build, spawn, timeout, interrupt and commit errors
//! propagate.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use quantlite_core::config::{BuildConfig, BuildPolicy};
use quantlite_core::job::{JobSpec, VOLUME_MOUNT, VOLUME_NAME};
use quantlite_core::observability;
use quantlite_core::units::SizeReport;
use quantlite_sandbox::info_log;
use quantlite_sandbox::volume::CommitRecord;
use quantlite_sandbox::{provision, CommandSpec, ImageSpec, ProcessRunner, Volume, VolumeMount};


/// How a job ended without an infrastructure error.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Input model absent; nothing was fetched, built, run or committed.
    InputMissing { input: PathBuf },
    /// Quantizer exited 0 and the volume was committed.
    Completed {
        report: SizeReport,
        commit: CommitRecord,
    },
    /// Quantizer exited non-zero; the volume was left uncommitted.
    ToolFailed { exit_code: i32 },
}

impl JobOutcome {
    fn audit_label(&self) -> (&'static str, Option<i32>) {
        match self {
            Self::InputMissing { .. } => ("input_missing", None),
            Self::Completed { .. } => ("completed", Some(0)),
            Self::ToolFailed { exit_code } => ("tool_failed", Some(*exit_code)),
        }
    }
}

/// One run of the fixed job against an explicit volume and process runner.
pub struct QuantizeJob<'a> {
    spec: &'a JobSpec,
    volume: &'a dyn Volume,
    runner: &'a dyn ProcessRunner,
    policy: BuildPolicy,
    run_id: String,
}

impl<'a> QuantizeJob<'a> {
    pub fn new(spec: &'a JobSpec, volume: &'a dyn Volume, runner: &'a dyn ProcessRunner) -> Self {
        Self {
            spec,
            volume,
            runner,
            policy: BuildPolicy::default(),
            run_id: observability::new_run_id(),
        }
    }

    pub fn with_policy(mut self, policy: BuildPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Run every step in order, writing the operator-facing report to `out`.
    pub fn run(&self, out: &mut dyn Write) -> Result<JobOutcome> {
        let job_json = serde_json::to_value(self.spec).unwrap_or(serde_json::Value::Null);
        observability::audit_job_started(&self.run_id, &job_json);

        let result = self.run_steps(out);
        match &result {
            Ok(outcome) => {
                let (label, code) = outcome.audit_label();
                observability::audit_job_finished(&self.run_id, label, code);
            }
            Err(e) => {
                tracing::error!(run_id = %self.run_id, error = %format!("{:#}", e), "job aborted");
                observability::audit_job_finished(&self.run_id, "error", None);
            }
        }
        result
    }

    fn run_steps(&self, out: &mut dyn Write) -> Result<JobOutcome> {
        if !self.timed("verify", || Ok(self.verify(out)))? {
            return Ok(JobOutcome::InputMissing {
                input: self.spec.input_model.clone(),
            });
        }

        self.timed("fetch", || self.fetch(out))?;
        self.timed("clean", || self.clean(out))?;
        self.timed("build", || self.build(out))?;
        let exit_code = self.timed("quantize", || self.quantize(out))?;
        self.report(exit_code, out)
    }

    /// Run one step and put its duration in the audit trail.
    fn timed<T>(&self, step: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let start = Instant::now();
        let result = f();
        observability::audit_step_finished(
            &self.run_id,
            step,
            result.is_ok(),
            start.elapsed().as_millis() as u64,
        );
        result
    }

    fn verify(&self, out: &mut dyn Write) -> bool {
        let input = &self.spec.input_model;
        if self.volume.exists(input) {
            return true;
        }
        tracing::warn!(input = %input.display(), volume = self.volume.name(), "input model not found");
        let _ = writeln!(out, "❌ Error: Input model {} not found.", input.display());
        false
    }

    fn fetch(&self, out: &mut dyn Write) -> Result<()> {
        let dir = &self.spec.build_dir;
        if self.policy == BuildPolicy::Fresh && dir.exists() {
            info_log!(build_dir = %dir.display(), "rebuild requested, removing build tree");
            fs::remove_dir_all(dir)
                .with_context(|| format!("Failed to remove build tree {}", dir.display()))?;
        }
        if dir.exists() {
            info_log!(build_dir = %dir.display(), "reusing existing build tree");
            return Ok(());
        }

        writeln!(out, "📥 Cloning llama.cpp fork {}...", self.spec.repo_url)?;
        let clone = CommandSpec::new("git")
            .arg("clone")
            .arg(self.spec.repo_url.as_str())
            .arg(dir.to_string_lossy());
        self.runner
            .run_or_fail(&clone, &mut forward_to(out))
            .with_context(|| format!("Failed to clone {}", self.spec.repo_url))
    }

    fn clean(&self, out: &mut dyn Write) -> Result<()> {
        let clean = CommandSpec::new("make")
            .arg("clean")
            .current_dir(&self.spec.build_dir);
        // Nothing to clean on a first run; only a timeout gets through.
        self.runner
            .run_best_effort(&clean, &mut forward_to(out))
            .context("make clean")
    }

    fn build(&self, out: &mut dyn Write) -> Result<()> {
        writeln!(out, "🔨 Compiling {}...", self.spec.build_target)?;
        let build = CommandSpec::new("make")
            .arg(self.spec.build_target.as_str())
            .arg(format!("-j{}", self.spec.resources.cpus))
            .current_dir(&self.spec.build_dir);
        self.runner
            .run_or_fail(&build, &mut forward_to(out))
            .with_context(|| format!("Failed to build {}", self.spec.build_target))
    }

    fn quantize(&self, out: &mut dyn Write) -> Result<i32> {
        writeln!(out)?;
        writeln!(out, "📦 Quantizing model to {}...", self.spec.profile)?;
        writeln!(out, "   Input:  {}", self.spec.input_model.display())?;
        writeln!(out, "   Output: {}", self.spec.output_model.display())?;
        writeln!(out, "{}", "=".repeat(50))?;
        out.flush()?;

        let cmd = CommandSpec::new(self.spec.quantizer_path()).args(self.spec.quantizer_args());
        let code = self
            .runner
            .stream(&cmd, &mut forward_to(out))
            .with_context(|| format!("Failed to run {}", self.spec.quantizer_path().display()))?;
        tracing::debug!(exit_code = code, "quantizer exited");
        Ok(code)
    }

    fn report(&self, exit_code: i32, out: &mut dyn Write) -> Result<JobOutcome> {
        if exit_code != 0 {
            writeln!(out, "\n\n❌ Quantization Failed (Code: {})", exit_code)?;
            tracing::warn!(exit_code, "quantizer failed, volume left uncommitted");
            return Ok(JobOutcome::ToolFailed { exit_code });
        }

        writeln!(out, "\n\n✅ Quantization Complete!")?;
        let original = self
            .volume
            .size(&self.spec.input_model)
            .context("Failed to size input model")?;
        let quantized = self
            .volume
            .size(&self.spec.output_model)
            .context("Failed to size quantized model")?;
        let report = SizeReport::new(original, quantized);
        writeln!(out, "{}", report.render())?;
        out.flush()?;

        let commit = self.volume.commit().context("Failed to commit volume")?;
        let files: Vec<String> = commit.files.iter().map(|f| f.path.clone()).collect();
        observability::audit_volume_committed(&self.run_id, self.volume.name(), &files);
        Ok(JobOutcome::Completed { report, commit })
    }
}

/// Line sink that writes straight through to the console, flushing per line.
fn forward_to(out: &mut dyn Write) -> impl FnMut(&str) + '_ {
    move |line: &str| {
        let _ = writeln!(out, "{}", line);
        let _ = out.flush();
    }
}

/// `quantlite run`: provision the environment, run one job, wait for it.
pub fn cmd_run(rebuild: bool) -> Result<JobOutcome> {
    let spec = JobSpec::default();
    let policy = BuildConfig::from_env().with_cli_override(rebuild).policy;
    let mount = VolumeMount::new(VOLUME_NAME, VOLUME_MOUNT);

    let sandbox = provision(&ImageSpec::default(), &mount, spec.resources)
        .context("Failed to provision execution environment")?;
    // Children run in their own session; Ctrl-C reaches them through this flag.
    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_handler = cancel.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("Received Ctrl+C, stopping the running command...");
        cancel_handler.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let runner = sandbox.runner().with_cancel(cancel);
    let job = QuantizeJob::new(&spec, sandbox.volume(), &runner).with_policy(policy);
    info_log!(run_id = job.run_id(), policy = ?policy, "starting quantize job");

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    job.run(&mut out)
}
