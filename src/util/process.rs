//! Subprocess execution utilities.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::util::cancel::CancelToken;

/// How often a running child is polled for exit or cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Builder for subprocess execution.
#[derive(Debug, Clone)]
pub struct ProcessBuilder {
    program: PathBuf,
    args: Vec<String>,
    env: HashMap<String, String>,
    cwd: Option<PathBuf>,
}

/// Result of a cancellable execution.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// The child exited on its own.
    Finished(Output),
    /// The child was killed because cancellation was requested.
    Cancelled,
}

impl ProcessBuilder {
    /// Create a new process builder for the given program.
    pub fn new(program: impl AsRef<Path>) -> Self {
        ProcessBuilder {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(
            args.into_iter()
                .map(|s| s.as_ref().to_string_lossy().into_owned()),
        );
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.env
            .insert(key.as_ref().to_string(), value.as_ref().to_string());
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd
    }

    /// Execute the command and wait for completion.
    pub fn exec(&self) -> io::Result<Output> {
        self.build_command().spawn()?.wait_with_output()
    }

    /// Execute the command, killing it as soon as `cancel` fires.
    ///
    /// Both output streams are drained on helper threads so a chatty child
    /// cannot block on a full pipe while we poll.
    pub fn exec_cancellable(&self, cancel: &CancelToken) -> io::Result<ProcessOutcome> {
        if cancel.is_cancelled() {
            return Ok(ProcessOutcome::Cancelled);
        }

        let mut child = self.build_command().spawn()?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        loop {
            if cancel.is_cancelled() {
                kill(&mut child, &self.program);
                // Readers are left detached; a grandchild may still hold the
                // pipes open and we must not wait on it.
                return Ok(ProcessOutcome::Cancelled);
            }

            match child.try_wait()? {
                Some(status) => {
                    return Ok(ProcessOutcome::Finished(Output {
                        status,
                        stdout: join(stdout),
                        stderr: join(stderr),
                    }));
                }
                None => thread::sleep(POLL_INTERVAL),
            }
        }
    }

    /// Display the command for log and error messages.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

fn drain<R: Read + Send + 'static>(stream: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    stream.map(|mut s| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = s.read_to_end(&mut buf);
            buf
        })
    })
}

fn join(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

fn kill(child: &mut Child, program: &Path) {
    if let Err(e) = child.kill() {
        tracing::debug!("failed to kill `{}`: {}", program.display(), e);
    }
    let _ = child.wait();
}

/// Find an executable in PATH.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_display_command() {
        let pb = ProcessBuilder::new("zig").args(["build-lib", "-dynamic", "mod.zig"]);
        assert_eq!(pb.display_command(), "zig build-lib -dynamic mod.zig");
    }

    #[cfg(unix)]
    #[test]
    fn test_exec_captures_output() {
        let output = ProcessBuilder::new("sh")
            .args(["-c", "echo out; echo err >&2"])
            .exec()
            .unwrap();

        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "out");
        assert_eq!(String::from_utf8_lossy(&output.stderr).trim(), "err");
    }

    #[cfg(unix)]
    #[test]
    fn test_exec_cancellable_finishes() {
        let outcome = ProcessBuilder::new("sh")
            .args(["-c", "echo done"])
            .exec_cancellable(&CancelToken::new())
            .unwrap();

        match outcome {
            ProcessOutcome::Finished(output) => {
                assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "done");
            }
            ProcessOutcome::Cancelled => panic!("unexpected cancellation"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_exec_cancellable_kills_child() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            trigger.cancel();
        });

        let start = Instant::now();
        let outcome = ProcessBuilder::new("sleep")
            .arg("30")
            .exec_cancellable(&cancel)
            .unwrap();

        assert!(matches!(outcome, ProcessOutcome::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_pre_cancelled_never_spawns() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = ProcessBuilder::new("definitely-not-a-real-program")
            .exec_cancellable(&cancel)
            .unwrap();
        assert!(matches!(outcome, ProcessOutcome::Cancelled));
    }
}
