//! Common utilities for the process runner
//!
//! Line splitting for streamed child output and deadline-bounded waiting.

use std::process::{Child, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

/// How often a waiting loop re-checks the child and the deadline.
pub const PROCESS_POLL_INTERVAL_MS: u64 = 100;

/// Read buffer size for child pipes.
pub const PIPE_READ_CHUNK: usize = 4096;

/// Splits a byte stream into lines the way a console would show them.
///
/// `\n`, `\r` and `\r\n` all terminate a line, so carriage-return progress
/// bars show up as successive lines instead of one huge line at exit.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
    last_was_cr: bool,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every line completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in chunk {
            match b {
                b'\n' if self.last_was_cr => {
                    // second half of \r\n, line already emitted
                    self.last_was_cr = false;
                }
                b'\n' | b'\r' => {
                    lines.push(String::from_utf8_lossy(&self.pending).into_owned());
                    self.pending.clear();
                    self.last_was_cr = b == b'\r';
                }
                _ => {
                    self.pending.push(b);
                    self.last_was_cr = false;
                }
            }
        }
        lines
    }

    /// Trailing text without a terminator, if any.
    pub fn finish(self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.pending).into_owned())
        }
    }
}

/// Time left before `deadline`, `None` when there is no deadline.
pub fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|d| d.saturating_duration_since(Instant::now()))
}

/// Wait for the child to exit, giving up at `deadline`.
///
/// Returns `Ok(None)` if the deadline passed with the child still running;
/// the caller decides how to terminate it.
pub fn wait_with_deadline(
    child: &mut Child,
    deadline: Option<Instant>,
) -> std::io::Result<Option<ExitStatus>> {
    let interval = Duration::from_millis(PROCESS_POLL_INTERVAL_MS);
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        match remaining(deadline) {
            Some(left) if left.is_zero() => return Ok(None),
            Some(left) => thread::sleep(left.min(interval)),
            None => thread::sleep(interval),
        }
    }
}

/// Exit code of a finished child. A child killed by signal `N` reports `-N`
/// on unix; with no code and no signal the result is `-1`.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_on_newline() {
        let mut s = LineSplitter::new();
        assert_eq!(s.push(b"a\nb\n"), vec!["a", "b"]);
        assert!(s.finish().is_none());
    }

    #[test]
    fn test_partial_line_carries_over_chunks() {
        let mut s = LineSplitter::new();
        assert!(s.push(b"llama_model_").is_empty());
        assert_eq!(s.push(b"quantize: done\ntail"), vec!["llama_model_quantize: done"]);
        assert_eq!(s.finish().as_deref(), Some("tail"));
    }

    #[test]
    fn test_carriage_return_progress() {
        let mut s = LineSplitter::new();
        assert_eq!(s.push(b"[ 1/3]\r[ 2/3]\r[ 3/3]\r\n"), vec!["[ 1/3]", "[ 2/3]", "[ 3/3]"]);
    }

    #[test]
    fn test_crlf_split_across_chunks() {
        let mut s = LineSplitter::new();
        assert_eq!(s.push(b"x\r"), vec!["x"]);
        assert_eq!(s.push(b"\ny\n"), vec!["y"]);
    }

    #[test]
    fn test_blank_lines_preserved() {
        let mut s = LineSplitter::new();
        assert_eq!(s.push(b"\n\nz\n"), vec!["", "", "z"]);
    }

    #[test]
    fn test_remaining_without_deadline() {
        assert!(remaining(None).is_none());
        let past = Instant::now() - Duration::from_secs(1);
        assert_eq!(remaining(Some(past)), Some(Duration::ZERO));
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_code_keeps_signal_number() {
        use std::os::unix::process::ExitStatusExt;
        // wait(2) encoding: low 7 bits carry the signal, the next byte the code.
        assert_eq!(exit_code(ExitStatus::from_raw(9)), -9);
        assert_eq!(exit_code(ExitStatus::from_raw(15)), -15);
        assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
        assert_eq!(exit_code(ExitStatus::from_raw(0)), 0);
    }
}
