//! Validator set for exercise completion.
//!
//! Validation steps are a closed set of typed checks. Each one inspects the
//! exercise working directory, either by looking at the filesystem or by
//! running a read-only inspection of the tool, and yields a pass/fail result
//! with a message. Validators never modify the working directory.

use std::fmt;
use std::path::{Component, Path};

use infralab_runner::{Inspection, ToolRunner};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

// ============================================================================
// ValidationStep
// ============================================================================

/// A single completion check declared by an exercise.
///
/// Paths are relative to the exercise working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ValidationStep {
    /// A regular file exists at `path`.
    FileExists {
        /// Relative file path.
        path: String,
    },
    /// A directory exists at `path`.
    DirectoryExists {
        /// Relative directory path.
        path: String,
    },
    /// The persisted state holds at least `min` managed resources.
    StateResourceCount {
        /// Minimum number of managed resources.
        min: u32,
    },
    /// The root module output `key` renders to `value`.
    OutputEquals {
        /// Output name.
        key: String,
        /// Expected value. Non-string outputs compare against their compact
        /// JSON rendering.
        value: String,
    },
}

impl ValidationStep {
    /// Checks that the step is well-formed.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if a path is empty, absolute or
    /// escapes the working directory, or an output key is empty.
    pub fn check_definition(&self) -> std::result::Result<(), String> {
        match self {
            Self::FileExists { path } | Self::DirectoryExists { path } => check_relative(path),
            Self::StateResourceCount { .. } => Ok(()),
            Self::OutputEquals { key, .. } => {
                if key.trim().is_empty() {
                    Err("outputEquals step has an empty key".to_string())
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Evaluates this step against the exercise working directory.
    #[must_use]
    pub fn evaluate(&self, ctx: &ValidationContext<'_>) -> ValidationResult {
        match self {
            Self::FileExists { path } => {
                if ctx.work_dir.join(path).is_file() {
                    ValidationResult::pass(format!("found file {path}"))
                } else {
                    ValidationResult::fail(format!("missing file {path}"))
                }
            }
            Self::DirectoryExists { path } => {
                if ctx.work_dir.join(path).is_dir() {
                    ValidationResult::pass(format!("found directory {path}"))
                } else {
                    ValidationResult::fail(format!("missing directory {path}"))
                }
            }
            Self::StateResourceCount { min } => check_resource_count(ctx, *min),
            Self::OutputEquals { key, value } => check_output(ctx, key, value),
        }
    }
}

impl fmt::Display for ValidationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileExists { path } => write!(f, "file {path} exists"),
            Self::DirectoryExists { path } => write!(f, "directory {path} exists"),
            Self::StateResourceCount { min } => {
                write!(f, "state holds at least {min} managed resources")
            }
            Self::OutputEquals { key, value } => write!(f, "output {key} equals \"{value}\""),
        }
    }
}

fn check_relative(path: &str) -> std::result::Result<(), String> {
    if path.trim().is_empty() {
        return Err("validation path is empty".to_string());
    }
    let escapes = Path::new(path).components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(format!(
            "validation path '{path}' must stay inside the exercise directory"
        ));
    }
    Ok(())
}

// ============================================================================
// Results
// ============================================================================

/// Outcome of one validation step. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    /// Whether the check passed.
    pub passed: bool,
    /// What was found, suitable for showing verbatim.
    pub message: String,
}

impl ValidationResult {
    /// A passing result.
    #[must_use]
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
        }
    }

    /// A failing result.
    #[must_use]
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
        }
    }
}

/// A step together with its result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepResult {
    /// The step that ran.
    pub step: ValidationStep,
    /// Its outcome.
    pub result: ValidationResult,
}

/// Overall verdict of a validation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Every step passed.
    Passed,
    /// At least one step failed.
    Failed,
    /// The exercise declares no steps; the user has to confirm completion.
    ManualConfirmationRequired,
}

/// Results of every step of one validation attempt, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// One entry per declared step.
    pub results: Vec<StepResult>,
}

impl ValidationReport {
    /// The overall verdict.
    #[must_use]
    pub fn outcome(&self) -> ValidationOutcome {
        if self.results.is_empty() {
            ValidationOutcome::ManualConfirmationRequired
        } else if self.results.iter().all(|r| r.result.passed) {
            ValidationOutcome::Passed
        } else {
            ValidationOutcome::Failed
        }
    }

    /// Returns `true` only if there is at least one step and all passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.outcome() == ValidationOutcome::Passed
    }

    /// The failing steps.
    pub fn failures(&self) -> impl Iterator<Item = &StepResult> {
        self.results.iter().filter(|r| !r.result.passed)
    }
}

// ============================================================================
// Context and engine
// ============================================================================

/// Read-only view of an exercise handed to validators.
pub struct ValidationContext<'a> {
    /// The exercise working directory.
    pub work_dir: &'a Path,
    /// Runs read-only inspections of the tool.
    pub runner: &'a dyn ToolRunner,
}

impl fmt::Debug for ValidationContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationContext")
            .field("work_dir", &self.work_dir)
            .finish_non_exhaustive()
    }
}

/// Runs every step in order. There is no short-circuit: a failing step does
/// not prevent the following ones from running.
#[instrument(skip_all, fields(work_dir = %ctx.work_dir.display(), steps = steps.len()))]
pub fn validate(steps: &[ValidationStep], ctx: &ValidationContext<'_>) -> ValidationReport {
    let results = steps
        .iter()
        .map(|step| {
            let result = step.evaluate(ctx);
            debug!(step = %step, passed = result.passed, message = %result.message, "Validation step");
            StepResult {
                step: step.clone(),
                result,
            }
        })
        .collect();
    ValidationReport { results }
}

fn check_resource_count(ctx: &ValidationContext<'_>, min: u32) -> ValidationResult {
    let output = match ctx.runner.inspect(ctx.work_dir, Inspection::StateList) {
        Ok(output) => output,
        Err(e) => return ValidationResult::fail(format!("could not inspect state: {e}")),
    };

    let count = if output.success() {
        count_managed_resources(&output.stdout)
    } else if output.stderr.contains("No state file was found") {
        0
    } else {
        return ValidationResult::fail(format!(
            "state inspection failed: {}",
            first_line_or_exit_code(&output.stderr, output.exit_code)
        ));
    };

    let message = format!("state holds {count} managed resources (need at least {min})");
    if count >= min {
        ValidationResult::pass(message)
    } else {
        ValidationResult::fail(message)
    }
}

/// Counts state addresses that are not data sources, including those inside
/// modules such as `module.web.data.local_file.x`.
fn count_managed_resources(state_list: &str) -> u32 {
    let count = state_list
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with("data.") && !line.contains(".data."))
        .count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

fn check_output(ctx: &ValidationContext<'_>, key: &str, expected: &str) -> ValidationResult {
    let output = match ctx.runner.inspect(ctx.work_dir, Inspection::Outputs) {
        Ok(output) => output,
        Err(e) => return ValidationResult::fail(format!("could not read outputs: {e}")),
    };
    if !output.success() {
        return ValidationResult::fail(format!(
            "output inspection failed: {}",
            first_line_or_exit_code(&output.stderr, output.exit_code)
        ));
    }

    let json = output.stdout.trim();
    let outputs: serde_json::Value = if json.is_empty() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        match serde_json::from_str(json) {
            Ok(value) => value,
            Err(e) => return ValidationResult::fail(format!("could not parse outputs: {e}")),
        }
    };

    let Some(value) = outputs.get(key).and_then(|entry| entry.get("value")) else {
        return ValidationResult::fail(format!("output {key} is not defined"));
    };

    let actual = match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if actual == expected {
        ValidationResult::pass(format!("output {key} is \"{actual}\""))
    } else {
        ValidationResult::fail(format!(
            "output {key} is \"{actual}\", expected \"{expected}\""
        ))
    }
}

fn first_line_or_exit_code(stderr: &str, exit_code: Option<i32>) -> String {
    stderr
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map_or_else(
            || match exit_code {
                Some(code) => format!("exit code {code}"),
                None => "terminated by signal".to_string(),
            },
            ToString::to_string,
        )
}
