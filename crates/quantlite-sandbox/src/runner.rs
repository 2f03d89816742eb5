//! Process runner: the single seam through which the job touches external tools.
//!
//! Everything the job executes (git, make, the quantizer) goes through
//! [`ProcessRunner`], so the driver can be exercised with a scripted fake.
//! Child stderr shares one pipe with stdout (as `2>&1` would), and the merged
//! stream is handed to the caller one line at a time while the child runs.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::common::{self, LineSplitter, PIPE_READ_CHUNK, PROCESS_POLL_INTERVAL_MS};

/// One external command: program, positional args, working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Shell-ish rendering for logs and error messages.
    pub fn display(&self) -> String {
        let mut s = self.program.display().to_string();
        for a in &self.args {
            s.push(' ');
            s.push_str(a);
        }
        s
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed while waiting for '{command}': {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with code {code}")]
    NonZeroExit { command: String, code: i32 },

    #[error("'{command}' killed: job exceeded its wall-clock budget of {timeout_secs} seconds")]
    TimedOut { command: String, timeout_secs: u64 },

    #[error("'{command}' stopped: interrupted by the operator")]
    Interrupted { command: String },
}

impl ProcessError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// Timeouts and interrupts end the job no matter how the call was made.
    pub fn ends_job(&self) -> bool {
        matches!(self, Self::TimedOut { .. } | Self::Interrupted { .. })
    }
}

/// Runs external commands, forwarding merged output line by line.
pub trait ProcessRunner {
    /// Runner name for logging and diagnostics.
    fn name(&self) -> &str;

    /// Start `spec`, call `on_line` for each output line as it arrives, block
    /// until exit and return the exit code. A non-zero code is not an error
    /// here; only failure to start, to wait, or a blown deadline is.
    fn stream(
        &self,
        spec: &CommandSpec,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<i32, ProcessError>;

    /// Run to completion; a non-zero exit is an error.
    fn run_or_fail(
        &self,
        spec: &CommandSpec,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<(), ProcessError> {
        let code = self.stream(spec, on_line)?;
        if code != 0 {
            return Err(ProcessError::NonZeroExit {
                command: spec.display(),
                code,
            });
        }
        Ok(())
    }

    /// Run to completion, discarding start failures and non-zero exits.
    /// A timeout or interrupt still propagates.
    fn run_best_effort(
        &self,
        spec: &CommandSpec,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<(), ProcessError> {
        match self.run_or_fail(spec, on_line) {
            Ok(()) => Ok(()),
            Err(e) if e.ends_job() => Err(e),
            Err(e) => {
                tracing::debug!(command = %spec.display(), error = %e, "best-effort command failed, ignored");
                Ok(())
            }
        }
    }
}

/// Runs commands as real child processes on this host.
///
/// Every child shares the same absolute deadline (the job's wall-clock budget)
/// and, on Linux, is pinned to the first `cpus` cores.
///
/// Children run in their own session, so a terminal Ctrl-C does not reach
/// them directly. The caller installs a handler that raises the flag given to
/// [`SystemRunner::with_cancel`]; the running child's whole group is then
/// killed within one poll interval.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    deadline: Option<Instant>,
    timeout_secs: u64,
    cpus: Option<usize>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl SystemRunner {
    /// No deadline, no CPU pinning.
    pub fn unbounded() -> Self {
        Self {
            deadline: None,
            timeout_secs: 0,
            cpus: None,
            cancel: None,
        }
    }

    /// Children must finish before `started + timeout_secs`.
    pub fn with_deadline(mut self, started: Instant, timeout_secs: u64) -> Self {
        self.deadline = Some(started + Duration::from_secs(timeout_secs));
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_cpus(mut self, cpus: usize) -> Self {
        self.cpus = Some(cpus.max(1));
        self
    }

    /// Stop the running child, and refuse to start new ones, once `flag` is set.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn interrupted(&self, spec: &CommandSpec) -> ProcessError {
        ProcessError::Interrupted {
            command: spec.display(),
        }
    }

    fn timed_out(&self, spec: &CommandSpec) -> ProcessError {
        ProcessError::TimedOut {
            command: spec.display(),
            timeout_secs: self.timeout_secs,
        }
    }

    /// Own session (so a kill reaches make's children) and CPU affinity.
    #[cfg(target_os = "linux")]
    fn isolate(&self, cmd: &mut Command) {
        use nix::sched::{sched_setaffinity, CpuSet};
        use nix::unistd::{setsid, Pid};
        use std::os::unix::process::CommandExt;

        let cpus = self.cpus;
        // SAFETY: only async-signal-safe syscalls between fork and exec.
        unsafe {
            cmd.pre_exec(move || {
                setsid().map_err(std::io::Error::from)?;
                if let Some(n) = cpus {
                    let mut set = CpuSet::new();
                    for cpu in 0..n.min(CpuSet::count()) {
                        set.set(cpu).map_err(std::io::Error::from)?;
                    }
                    // Fewer cores than requested is not fatal.
                    let _ = sched_setaffinity(Pid::from_raw(0), &set);
                }
                Ok(())
            });
        }
    }

    #[cfg(target_os = "macos")]
    fn isolate(&self, cmd: &mut Command) {
        use nix::unistd::setsid;
        use std::os::unix::process::CommandExt;

        // SAFETY: setsid is async-signal-safe.
        unsafe {
            cmd.pre_exec(|| setsid().map(|_| ()).map_err(std::io::Error::from));
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    fn isolate(&self, _cmd: &mut Command) {}
}

/// Kill the child and everything in its session.
fn terminate(child: &mut Child) {
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        let _ = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL);
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Point the child's stdout and stderr at one pipe and return its read end.
#[cfg(any(target_os = "linux", target_os = "macos"))]
fn merged_output(cmd: &mut Command) -> std::io::Result<Option<Box<dyn Read + Send>>> {
    let (reader, writer) = cloexec_pipe()?;
    let writer_err = writer.try_clone()?;
    cmd.stdout(Stdio::from(writer)).stderr(Stdio::from(writer_err));
    Ok(Some(Box::new(std::fs::File::from(reader))))
}

#[cfg(target_os = "linux")]
fn cloexec_pipe() -> std::io::Result<(std::os::fd::OwnedFd, std::os::fd::OwnedFd)> {
    use nix::fcntl::OFlag;
    Ok(nix::unistd::pipe2(OFlag::O_CLOEXEC)?)
}

/// No `pipe2` here; a fork from another thread between the two calls can
/// still inherit the descriptors, as with std's own pipes.
#[cfg(target_os = "macos")]
fn cloexec_pipe() -> std::io::Result<(std::os::fd::OwnedFd, std::os::fd::OwnedFd)> {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};
    use std::os::fd::AsRawFd;

    let (reader, writer) = nix::unistd::pipe()?;
    for fd in [&reader, &writer] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    }
    Ok((reader, writer))
}

/// No shared pipe here: two pipes, read separately.
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn merged_output(cmd: &mut Command) -> std::io::Result<Option<Box<dyn Read + Send>>> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    Ok(None)
}

/// Pump a child pipe into `tx`, one message per line.
fn forward_lines<R: Read + Send + 'static>(mut pipe: R, tx: Sender<String>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut splitter = LineSplitter::new();
        let mut buf = [0u8; PIPE_READ_CHUNK];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    for line in splitter.push(&buf[..n]) {
                        if tx.send(line).is_err() {
                            return;
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        if let Some(tail) = splitter.finish() {
            let _ = tx.send(tail);
        }
    })
}

impl ProcessRunner for SystemRunner {
    fn name(&self) -> &str {
        "system"
    }

    fn stream(
        &self,
        spec: &CommandSpec,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<i32, ProcessError> {
        if self.cancelled() {
            return Err(self.interrupted(spec));
        }
        if common::remaining(self.deadline).is_some_and(|r| r.is_zero()) {
            return Err(self.timed_out(spec));
        }

        let spawn_error = |source: std::io::Error| ProcessError::Spawn {
            program: spec.program.display().to_string(),
            source,
        };
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args).stdin(Stdio::null());
        let merged = merged_output(&mut cmd).map_err(spawn_error)?;
        if let Some(ref cwd) = spec.cwd {
            cmd.current_dir(cwd);
        }
        self.isolate(&mut cmd);

        tracing::debug!(command = %spec.display(), cwd = ?spec.cwd, "spawning");
        let mut child = cmd.spawn().map_err(spawn_error)?;
        // `cmd` holds our copies of the pipe's write end; the reader sees EOF
        // only after they are closed.
        drop(cmd);

        // Reading in threads keeps a chatty child from blocking on a full pipe
        // while this thread watches the deadline.
        let (tx, rx) = mpsc::channel::<String>();
        let mut readers = Vec::with_capacity(2);
        if let Some(pipe) = merged {
            readers.push(forward_lines(pipe, tx.clone()));
        }
        if let Some(out) = child.stdout.take() {
            readers.push(forward_lines(out, tx.clone()));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(forward_lines(err, tx.clone()));
        }
        drop(tx);

        let poll = Duration::from_millis(PROCESS_POLL_INTERVAL_MS);
        loop {
            if self.cancelled() {
                terminate(&mut child);
                return Err(self.interrupted(spec));
            }
            let wait = match common::remaining(self.deadline) {
                Some(left) if left.is_zero() => {
                    terminate(&mut child);
                    return Err(self.timed_out(spec));
                }
                Some(left) => left.min(poll),
                None => poll,
            };
            match rx.recv_timeout(wait) {
                Ok(line) => on_line(&line),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        for r in readers {
            let _ = r.join();
        }

        let status = common::wait_with_deadline(&mut child, self.deadline).map_err(|source| {
            ProcessError::Wait {
                command: spec.display(),
                source,
            }
        })?;
        match status {
            Some(status) => Ok(common::exit_code(status)),
            None => {
                terminate(&mut child);
                Err(self.timed_out(spec))
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").args(["-c", script])
    }

    #[test]
    fn test_stream_collects_stdout_and_stderr() {
        let runner = SystemRunner::unbounded();
        let mut lines = Vec::new();
        let code = runner
            .stream(&sh("echo out; echo err 1>&2; exit 3"), &mut |l| lines.push(l.to_string()))
            .unwrap();
        assert_eq!(code, 3);
        lines.sort();
        assert_eq!(lines, vec!["err", "out"]);
    }

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    #[test]
    fn test_stderr_keeps_write_order_with_stdout() {
        let runner = SystemRunner::unbounded();
        let mut lines = Vec::new();
        let script = "for i in 1 2 3 4 5; do echo out$i; echo err$i 1>&2; done";
        runner
            .stream(&sh(script), &mut |l| lines.push(l.to_string()))
            .unwrap();
        let expected: Vec<String> = (1..=5)
            .flat_map(|i| [format!("out{i}"), format!("err{i}")])
            .collect();
        assert_eq!(lines, expected);
    }

    #[test]
    fn test_signal_death_reports_negative_signal() {
        let runner = SystemRunner::unbounded();
        let code = runner.stream(&sh("kill -9 $$"), &mut |_| {}).unwrap();
        assert_eq!(code, -9);
        let err = runner.run_or_fail(&sh("kill -9 $$"), &mut |_| {}).unwrap_err();
        assert!(matches!(err, ProcessError::NonZeroExit { code: -9, .. }));
    }

    #[test]
    fn test_cancel_kills_running_child() {
        let flag = Arc::new(AtomicBool::new(false));
        let runner = SystemRunner::unbounded().with_cancel(flag.clone());
        let raiser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            flag.store(true, Ordering::SeqCst);
        });
        let start = Instant::now();
        let err = runner.stream(&sh("sleep 30"), &mut |_| {}).unwrap_err();
        raiser.join().unwrap();
        assert!(matches!(err, ProcessError::Interrupted { .. }));
        assert!(err.ends_job());
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_cancelled_runner_starts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let runner = SystemRunner::unbounded().with_cancel(Arc::new(AtomicBool::new(true)));
        let script = format!("touch '{}'", marker.display());
        let err = runner.run_best_effort(&sh(&script), &mut |_| {}).unwrap_err();
        assert!(matches!(err, ProcessError::Interrupted { .. }));
        assert!(!marker.exists());
    }

    #[test]
    fn test_lines_arrive_before_exit() {
        let runner = SystemRunner::unbounded();
        let start = Instant::now();
        let mut seen = Vec::new();
        runner
            .stream(&sh("echo first; sleep 1; echo second"), &mut |l| {
                seen.push((l.to_string(), start.elapsed()))
            })
            .unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, "first");
        // "first" was delivered well before the one-second sleep ended.
        assert!(seen[1].1 - seen[0].1 >= Duration::from_millis(500));
    }

    #[test]
    fn test_run_or_fail_reports_exit_code() {
        let runner = SystemRunner::unbounded();
        let err = runner.run_or_fail(&sh("exit 2"), &mut |_| {}).unwrap_err();
        assert!(matches!(err, ProcessError::NonZeroExit { code: 2, .. }));
    }

    #[test]
    fn test_run_best_effort_swallows_failures() {
        let runner = SystemRunner::unbounded();
        assert!(runner.run_best_effort(&sh("exit 1"), &mut |_| {}).is_ok());
        let missing = CommandSpec::new("/nonexistent/quantlite-no-such-tool");
        assert!(runner.run_best_effort(&missing, &mut |_| {}).is_ok());
    }

    #[test]
    fn test_spawn_failure_is_error() {
        let runner = SystemRunner::unbounded();
        let missing = CommandSpec::new("/nonexistent/quantlite-no-such-tool");
        let err = runner.stream(&missing, &mut |_| {}).unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[test]
    fn test_deadline_kills_child() {
        let runner = SystemRunner::unbounded().with_deadline(Instant::now(), 1);
        let start = Instant::now();
        let err = runner.stream(&sh("sleep 30"), &mut |_| {}).unwrap_err();
        assert!(err.is_timeout());
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_timeout_not_swallowed_by_best_effort() {
        let runner = SystemRunner::unbounded().with_deadline(Instant::now(), 0);
        let err = runner.run_best_effort(&sh("true"), &mut |_| {}).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_current_dir_applied() {
        let dir = tempfile::tempdir().unwrap();
        let runner = SystemRunner::unbounded();
        let mut lines = Vec::new();
        runner
            .stream(&sh("pwd").current_dir(dir.path()), &mut |l| lines.push(l.to_string()))
            .unwrap();
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(std::path::PathBuf::from(&lines[0]).canonicalize().unwrap(), expected);
    }

    #[test]
    fn test_command_display() {
        let spec = CommandSpec::new("make").args(["llama-quantize", "-j8"]);
        assert_eq!(spec.display(), "make llama-quantize -j8");
    }
}
