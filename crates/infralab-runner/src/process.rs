//! Subprocess execution of the external tool.
//!
//! This module provides [`ExternalTool`], the [`ToolRunner`] implementation
//! that spawns the real binary. Output is spooled to anonymous temporary files
//! while the child is polled, so a chatty command can never block on a full
//! pipe and the child can be killed on timeout or cancellation.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};

use crate::{CommandOutput, Result, RunnerError, ToolRunner};

/// Default interval between child status polls.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// The external provisioning tool, invoked as a subprocess.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use std::time::Duration;
/// use infralab_runner::{ExternalTool, ToolCommand, ToolRunner};
///
/// # fn example() -> infralab_runner::Result<()> {
/// let tool = ExternalTool::new("terraform").with_timeout(Some(Duration::from_secs(300)));
/// let output = tool.execute(Path::new("labs/hello-world"), ToolCommand::Init)?;
/// println!("exit code: {:?}", output.exit_code);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ExternalTool {
    program: PathBuf,
    timeout: Option<Duration>,
    cancel: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl ExternalTool {
    /// Creates a runner for the given program name or path, with no timeout.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
            cancel: Arc::new(AtomicBool::new(false)),
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Sets the per-invocation timeout. `None` waits indefinitely.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Shares a cancellation flag with the caller.
    ///
    /// When the flag is raised while a command runs, the child is killed,
    /// the flag is cleared, and [`RunnerError::Cancelled`] is returned.
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    /// Returns the configured program.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Returns the configured timeout.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Checks that the tool can be started, returning its version banner.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::NotFound`] if the binary does not exist, or
    /// [`RunnerError::Spawn`] if it exists but cannot be executed.
    #[instrument(skip(self), fields(program = %self.program.display()))]
    pub fn probe(&self) -> Result<String> {
        let output = self.run(Path::new("."), &["version"])?;
        let banner = output
            .stdout
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        debug!(version = %banner, "Tool probe succeeded");
        Ok(banner)
    }

    fn command_line(&self, args: &[&str]) -> String {
        let program = self.program.file_name().map_or_else(
            || self.program.display().to_string(),
            |name| name.to_string_lossy().into_owned(),
        );
        std::iter::once(program.as_str())
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn spawn(&self, work_dir: &Path, args: &[&str], stdout: &File, stderr: &File) -> Result<Child> {
        Command::new(&self.program)
            .args(args)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout.try_clone()?))
            .stderr(Stdio::from(stderr.try_clone()?))
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    RunnerError::NotFound(self.program.display().to_string())
                } else {
                    RunnerError::Spawn {
                        program: self.program.display().to_string(),
                        source: e,
                    }
                }
            })
    }

    /// Polls the child until it exits, the deadline passes, or the user cancels.
    fn wait(&self, child: &mut Child, command: &str, started: Instant) -> Result<ExitStatus> {
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }

            if self.cancel.swap(false, Ordering::SeqCst) {
                terminate(child);
                return Err(RunnerError::Cancelled {
                    command: command.to_string(),
                });
            }

            if let Some(timeout) = self.timeout {
                if started.elapsed() >= timeout {
                    terminate(child);
                    return Err(RunnerError::Timeout {
                        command: command.to_string(),
                        timeout,
                    });
                }
            }

            thread::sleep(self.poll_interval);
        }
    }
}

impl ToolRunner for ExternalTool {
    #[instrument(skip(self, work_dir), fields(program = %self.program.display(), work_dir = %work_dir.display()))]
    fn run(&self, work_dir: &Path, args: &[&str]) -> Result<CommandOutput> {
        // A missing current_dir surfaces as NotFound from spawn, which would
        // be misreported as a missing tool.
        if !work_dir.is_dir() {
            return Err(RunnerError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("working directory does not exist: {}", work_dir.display()),
            )));
        }

        let command = self.command_line(args);
        let mut stdout = tempfile::tempfile()?;
        let mut stderr = tempfile::tempfile()?;

        // Only an interrupt raised while this command runs cancels it.
        self.cancel.store(false, Ordering::SeqCst);
        let started = Instant::now();
        let mut child = self.spawn(work_dir, args, &stdout, &stderr)?;
        debug!(command = %command, pid = child.id(), "Spawned tool");

        let status = self.wait(&mut child, &command, started)?;
        let duration = started.elapsed();

        let output = CommandOutput {
            command,
            stdout: read_spool(&mut stdout)?,
            stderr: read_spool(&mut stderr)?,
            exit_code: status.code(),
            duration,
        };

        debug!(
            command = %output.command,
            exit_code = ?output.exit_code,
            duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            "Tool exited"
        );
        Ok(output)
    }
}

fn terminate(child: &mut Child) {
    if let Err(e) = child.kill() {
        warn!(error = %e, "Failed to kill tool process");
    }
    if let Err(e) = child.wait() {
        warn!(error = %e, "Failed to reap tool process");
    }
}

fn read_spool(file: &mut File) -> Result<String> {
    file.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
