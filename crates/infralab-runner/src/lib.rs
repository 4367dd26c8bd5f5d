//! infralab Runner
//!
//! Synchronous invocation of the external provisioning tool.
//!
//! This crate knows how to spawn the tool inside an exercise working directory,
//! capture its output and exit code, and recognise a handful of well-known
//! success and failure messages. It knows nothing about exercises or progress.

mod process;

pub use process::ExternalTool;

use std::fmt;
use std::path::Path;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while invoking the external tool.
///
/// A non-zero exit code is not an error: it is reported through
/// [`CommandOutput::exit_code`].
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The tool binary could not be found.
    #[error("tool not found: '{0}'")]
    NotFound(String),

    /// The tool exists but could not be started.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The command exceeded the configured timeout and was terminated.
    #[error("`{command}` timed out after {}s", timeout.as_secs())]
    Timeout {
        /// The command line that timed out.
        command: String,
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// The command was cancelled by the user and terminated.
    #[error("`{command}` was cancelled")]
    Cancelled {
        /// The command line that was cancelled.
        command: String,
    },

    /// I/O error while capturing output or waiting on the child.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;

// ============================================================================
// Commands
// ============================================================================

/// A user-facing operation of the external tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCommand {
    /// Initialize the working directory.
    Init,
    /// Preview changes.
    Plan,
    /// Apply changes.
    Apply,
    /// Inspect the current persisted state.
    Show,
}

impl ToolCommand {
    /// All commands, in the order they are offered to the user.
    pub const ALL: [Self; 4] = [Self::Init, Self::Plan, Self::Apply, Self::Show];

    /// Arguments passed to the tool for this command.
    ///
    /// Every command runs without interactive input since stdin is not
    /// attached to the terminal.
    #[must_use]
    pub const fn args(self) -> &'static [&'static str] {
        match self {
            Self::Init => &["init", "-input=false", "-no-color"],
            Self::Plan => &["plan", "-input=false", "-no-color"],
            Self::Apply => &["apply", "-input=false", "-auto-approve", "-no-color"],
            Self::Show => &["show", "-no-color"],
        }
    }

    /// Short name of the command.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Plan => "plan",
            Self::Apply => "apply",
            Self::Show => "show",
        }
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A read-only query used by validators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Inspection {
    /// List resource addresses held in the persisted state.
    StateList,
    /// Dump root module outputs as JSON.
    Outputs,
}

impl Inspection {
    /// Arguments passed to the tool for this inspection.
    #[must_use]
    pub const fn args(self) -> &'static [&'static str] {
        match self {
            Self::StateList => &["state", "list"],
            Self::Outputs => &["output", "-json"],
        }
    }
}

// ============================================================================
// Output
// ============================================================================

/// Captured result of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// The command line that was run, for display.
    pub command: String,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Exit code, or `None` if the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Wall-clock duration of the invocation.
    pub duration: Duration,
}

impl CommandOutput {
    /// Returns `true` if the process exited with code 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Recognises a well-known outcome message in the output.
    ///
    /// Errors take precedence over success messages because the tool may
    /// print partial progress before failing.
    #[must_use]
    pub fn signal(&self) -> Option<Signal> {
        Signal::detect(&self.stdout, &self.stderr)
    }
}

static ERROR_LINE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:│\s*)?Error:\s*(.+)$").ok());

static PLAN_LINE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?m)^Plan: (\d+) to add, (\d+) to change, (\d+) to destroy\.").ok());

static APPLY_LINE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?m)^Apply complete! Resources: (\d+) added, (\d+) changed, (\d+) destroyed\.")
        .ok()
});

/// A recognised outcome message from the tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// The working directory was initialized.
    Initialized,
    /// The plan found nothing to change.
    NoChanges,
    /// A plan summary line.
    PlanSummary {
        /// Resources to add.
        add: u32,
        /// Resources to change.
        change: u32,
        /// Resources to destroy.
        destroy: u32,
    },
    /// An apply finished.
    ApplyComplete {
        /// Resources added.
        added: u32,
        /// Resources changed.
        changed: u32,
        /// Resources destroyed.
        destroyed: u32,
    },
    /// The tool reported an error.
    Error(String),
}

impl Signal {
    fn detect(stdout: &str, stderr: &str) -> Option<Self> {
        for text in [stderr, stdout] {
            if let Some(caps) = ERROR_LINE.as_ref().and_then(|re| re.captures(text)) {
                let message = caps.get(1).map_or("", |m| m.as_str()).trim();
                return Some(Self::Error(message.to_string()));
            }
        }

        if let Some(caps) = APPLY_LINE.as_ref().and_then(|re| re.captures(stdout)) {
            return Some(Self::ApplyComplete {
                added: capture_u32(&caps, 1),
                changed: capture_u32(&caps, 2),
                destroyed: capture_u32(&caps, 3),
            });
        }

        if let Some(caps) = PLAN_LINE.as_ref().and_then(|re| re.captures(stdout)) {
            return Some(Self::PlanSummary {
                add: capture_u32(&caps, 1),
                change: capture_u32(&caps, 2),
                destroy: capture_u32(&caps, 3),
            });
        }

        if stdout.contains("No changes.") {
            return Some(Self::NoChanges);
        }

        if stdout.contains("has been successfully initialized") {
            return Some(Self::Initialized);
        }

        None
    }
}

fn capture_u32(caps: &regex::Captures<'_>, index: usize) -> u32 {
    caps.get(index)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialized => write!(f, "working directory initialized"),
            Self::NoChanges => write!(f, "no changes"),
            Self::PlanSummary {
                add,
                change,
                destroy,
            } => write!(f, "plan: {add} to add, {change} to change, {destroy} to destroy"),
            Self::ApplyComplete {
                added,
                changed,
                destroyed,
            } => write!(
                f,
                "apply complete: {added} added, {changed} changed, {destroyed} destroyed"
            ),
            Self::Error(message) => write!(f, "error: {message}"),
        }
    }
}

// ============================================================================
// ToolRunner
// ============================================================================

/// Something that can run the external tool inside a working directory.
///
/// [`ExternalTool`] is the real implementation; tests substitute scripted
/// runners.
pub trait ToolRunner {
    /// Runs the tool with raw arguments, blocking until it exits.
    fn run(&self, work_dir: &Path, args: &[&str]) -> Result<CommandOutput>;

    /// Runs a user-facing command.
    fn execute(&self, work_dir: &Path, command: ToolCommand) -> Result<CommandOutput> {
        self.run(work_dir, command.args())
    }

    /// Runs a read-only inspection.
    fn inspect(&self, work_dir: &Path, inspection: Inspection) -> Result<CommandOutput> {
        self.run(work_dir, inspection.args())
    }
}

impl<T: ToolRunner + ?Sized> ToolRunner for &T {
    fn run(&self, work_dir: &Path, args: &[&str]) -> Result<CommandOutput> {
        (**self).run(work_dir, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(stdout: &str, stderr: &str, exit_code: i32) -> CommandOutput {
        CommandOutput {
            command: "terraform plan".to_string(),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code: Some(exit_code),
            duration: Duration::from_millis(10),
        }
    }

    #[test]
    fn tool_command_args_are_non_interactive() {
        for command in ToolCommand::ALL {
            let args = command.args();
            assert_eq!(args[0], command.name());
            assert!(args.contains(&"-no-color"));
        }
        assert!(ToolCommand::Apply.args().contains(&"-auto-approve"));
    }

    #[test]
    fn tool_command_serializes_to_snake_case() {
        let json = serde_json::to_string(&ToolCommand::Apply).unwrap_or_default();
        assert_eq!(json, r#""apply""#);
    }

    #[test]
    fn success_requires_zero_exit_code() {
        assert!(output("", "", 0).success());
        assert!(!output("", "", 1).success());

        let killed = CommandOutput {
            exit_code: None,
            ..output("", "", 0)
        };
        assert!(!killed.success());
    }

    #[test]
    fn detects_init_signal() {
        let out = output("\nTerraform has been successfully initialized!\n", "", 0);
        assert_eq!(out.signal(), Some(Signal::Initialized));
    }

    #[test]
    fn detects_plan_summary() {
        let out = output(
            "  + resource \"local_file\" \"welcome\" {}\n\nPlan: 1 to add, 0 to change, 0 to destroy.\n",
            "",
            0,
        );
        assert_eq!(
            out.signal(),
            Some(Signal::PlanSummary {
                add: 1,
                change: 0,
                destroy: 0
            })
        );
    }

    #[test]
    fn detects_apply_complete() {
        let out = output(
            "Apply complete! Resources: 2 added, 1 changed, 0 destroyed.\n",
            "",
            0,
        );
        assert_eq!(
            out.signal().map(|s| s.to_string()),
            Some("apply complete: 2 added, 1 changed, 0 destroyed".to_string())
        );
    }

    #[test]
    fn error_takes_precedence() {
        let out = output(
            "Plan: 1 to add, 0 to change, 0 to destroy.\n",
            "\nError: Invalid reference\n",
            1,
        );
        assert_eq!(
            out.signal(),
            Some(Signal::Error("Invalid reference".to_string()))
        );
    }

    #[test]
    fn boxed_error_lines_are_recognised() {
        let out = output("", "╷\n│ Error: Missing required argument\n╵\n", 1);
        assert_eq!(
            out.signal(),
            Some(Signal::Error("Missing required argument".to_string()))
        );
    }

    #[test]
    fn no_signal_for_unrecognised_output() {
        assert_eq!(output("hello", "", 0).signal(), None);
    }

    #[test]
    fn runner_error_messages() {
        let err = RunnerError::Timeout {
            command: "terraform apply".to_string(),
            timeout: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "`terraform apply` timed out after 30s");
        assert_eq!(
            RunnerError::NotFound("terraform".to_string()).to_string(),
            "tool not found: 'terraform'"
        );
    }
}
