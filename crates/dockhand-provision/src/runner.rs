//! External command execution
//!
//! Steps never spawn processes themselves; they go through a [`CommandRunner`]
//! so the executor can be driven by a scripted runner in tests.
//!
//! [`SystemRunner`] starts every child in its own process group. When a
//! timeout expires the whole group receives SIGTERM, then SIGKILL after a
//! grace period, so package-manager helpers do not outlive the step. The
//! limit also covers background processes that keep the output pipes open
//! after the child itself has exited.

use std::io::Read;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;

use crate::error::CommandError;

/// Exit status and captured output of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was killed by a signal
    pub code: Option<i32>,
    /// Stdout followed by stderr
    pub output: String,
}

impl CommandOutput {
    /// Successful output with the given text
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            output: output.into(),
        }
    }

    /// Failed output with the given exit code and text
    pub fn failed(code: i32, output: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            output: output.into(),
        }
    }

    /// Whether the command exited with status 0
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Capability to run a named program with arguments
pub trait CommandRunner {
    /// Run `program` with `args`, waiting at most `timeout` if one is given.
    ///
    /// A non-zero exit is reported through [`CommandOutput::code`], not as an
    /// error. `Err` means the command could not be run to completion.
    fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, CommandError>;

    /// Run a snippet through `sh -c`
    fn shell(&self, script: &str, timeout: Option<Duration>) -> Result<CommandOutput, CommandError> {
        self.run("sh", &["-c", script], timeout)
    }
}

/// Runs commands on the local host
#[derive(Debug, Clone)]
pub struct SystemRunner {
    /// Time between SIGTERM and SIGKILL on timeout
    grace: Duration,
    /// Poll interval while waiting on a child with a deadline
    poll: Duration,
}

impl SystemRunner {
    /// Create a runner with a 5 second kill grace period
    pub fn new() -> Self {
        Self {
            grace: Duration::from_secs(5),
            poll: Duration::from_millis(50),
        }
    }

    /// Set the grace period between SIGTERM and SIGKILL
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    fn wait_until(&self, child: &mut Child, deadline: Instant) -> std::io::Result<Option<ExitStatus>> {
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(self.poll);
        }
    }

    /// Terminate the child's process group: SIGTERM, grace period, SIGKILL
    fn terminate_group(&self, child: &mut Child) {
        if i32::try_from(child.id()).is_err() {
            let _ = child.kill();
            return;
        }
        signal_group(child.id(), Signal::SIGTERM);

        let deadline = Instant::now() + self.grace;
        match self.wait_until(child, deadline) {
            Ok(Some(_)) => return,
            Ok(None) => tracing::warn!("process group {} ignored SIGTERM, sending SIGKILL", child.id()),
            Err(e) => tracing::warn!("waiting on process group {} failed: {e}", child.id()),
        }

        if !signal_group(child.id(), Signal::SIGKILL) {
            let _ = child.kill();
        }
    }

    /// Wait for the pipes to close, sending SIGKILL to the group if they stay
    /// open past the grace period
    fn close_pipes(&self, pgid: u32, rx: &Receiver<(Pipe, String)>, captured: &mut Captured) {
        if captured.collect(rx, Some(Instant::now() + self.grace)) {
            return;
        }
        tracing::warn!("process group {pgid} still holds its output pipes, sending SIGKILL");
        signal_group(pgid, Signal::SIGKILL);
        if !captured.collect(rx, Some(Instant::now() + self.grace)) {
            tracing::warn!("output pipes of process group {pgid} never closed");
        }
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Send `signal` to process group `pgid`; false when it could not be delivered
fn signal_group(pgid: u32, signal: Signal) -> bool {
    let Ok(raw) = i32::try_from(pgid) else {
        return false;
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!("{signal:?} to process group {raw} failed: {e}");
            false
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Pipe {
    Stdout,
    Stderr,
}

/// Read a pipe to its end on a helper thread and send the text back
///
/// The thread finishes once every process holding the write end has exited,
/// including background processes the child left behind.
fn drain<R: Read + Send + 'static>(pipe: Option<R>, which: Pipe, tx: Sender<(Pipe, String)>) {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = tx.send((which, String::from_utf8_lossy(&buf).into_owned()));
    });
}

/// Output of both pipes, filled in as each one closes
#[derive(Debug, Default)]
struct Captured {
    stdout: Option<String>,
    stderr: Option<String>,
}

impl Captured {
    /// Receive until both pipes have closed or `deadline` passes
    ///
    /// Returns true when both pipes closed.
    fn collect(&mut self, rx: &Receiver<(Pipe, String)>, deadline: Option<Instant>) -> bool {
        while self.stdout.is_none() || self.stderr.is_none() {
            let received = match deadline {
                Some(deadline) => rx
                    .recv_timeout(deadline.saturating_duration_since(Instant::now()))
                    .ok(),
                None => rx.recv().ok(),
            };
            match received {
                Some((Pipe::Stdout, text)) => self.stdout = Some(text),
                Some((Pipe::Stderr, text)) => self.stderr = Some(text),
                None => return false,
            }
        }
        true
    }

    /// Stdout followed by stderr
    fn into_output(self) -> String {
        let mut output = self.stdout.unwrap_or_default();
        output.push_str(&self.stderr.unwrap_or_default());
        output
    }
}

impl CommandRunner for SystemRunner {
    fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, CommandError> {
        tracing::debug!(program, ?args, ?timeout, "spawning command");

        let mut child = Command::new(program)
            .args(args)
            .env("DEBIAN_FRONTEND", "noninteractive")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(|source| CommandError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let (tx, rx) = mpsc::channel();
        drain(child.stdout.take(), Pipe::Stdout, tx.clone());
        drain(child.stderr.take(), Pipe::Stderr, tx);

        let deadline = timeout.map(|limit| Instant::now() + limit);
        let waited = match deadline {
            Some(deadline) => self.wait_until(&mut child, deadline),
            None => child.wait().map(Some),
        };

        let status = match waited {
            Ok(status) => status,
            Err(source) => {
                self.terminate_group(&mut child);
                return Err(CommandError::Wait {
                    program: program.to_string(),
                    source,
                });
            }
        };

        let pgid = child.id();
        let mut captured = Captured::default();
        let status = match status {
            // Leftover background processes may still hold the pipes
            Some(status) if captured.collect(&rx, deadline) => Some(status),
            Some(_) => {
                tracing::warn!(program, "command exited but its process group outlived the time limit");
                signal_group(pgid, Signal::SIGTERM);
                self.close_pipes(pgid, &rx, &mut captured);
                None
            }
            None => {
                self.terminate_group(&mut child);
                self.close_pipes(pgid, &rx, &mut captured);
                None
            }
        };

        let output = captured.into_output();
        match status {
            Some(status) => Ok(CommandOutput {
                code: status.code(),
                output,
            }),
            None => Err(CommandError::TimedOut {
                program: program.to_string(),
                limit: timeout.unwrap_or_default(),
                output,
            }),
        }
    }
}
