//! End-to-end tests for lab sessions
//!
//! These tests drive the session engine through its public API against the
//! built-in catalog. The provisioning tool is replaced by [`SimulatedTool`],
//! which creates files and reports state the way a real apply would, so no
//! external binary is needed.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;

use infralab_orchestrator::{
    validate, Action, Catalog, Exercise, LabError, MenuChoice, MenuEntry, Notice, ProgressFile,
    ProgressStatus, ProgressStore, Prompter, SessionContext, ValidationContext, ValidationOutcome,
    ValidationStep,
};
use infralab_runner::{CommandOutput, RunnerError, ToolCommand, ToolRunner};

// ============================================================================
// Test doubles
// ============================================================================

/// Stands in for the provisioning tool.
///
/// `apply` writes the configured files into the working directory and from
/// then on `state list` and `output -json` report the configured state.
#[derive(Default)]
struct SimulatedTool {
    files: Vec<&'static str>,
    resources: Vec<&'static str>,
    outputs: &'static str,
    applied: RefCell<HashSet<PathBuf>>,
    calls: RefCell<Vec<String>>,
}

impl SimulatedTool {
    fn output(args: &[&str], stdout: &str, stderr: &str, exit_code: i32) -> CommandOutput {
        CommandOutput {
            command: format!("terraform {}", args.join(" ")),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code: Some(exit_code),
            duration: Duration::from_millis(5),
        }
    }
}

impl ToolRunner for SimulatedTool {
    fn run(&self, work_dir: &Path, args: &[&str]) -> Result<CommandOutput, RunnerError> {
        self.calls.borrow_mut().push(args.join(" "));
        let applied = self.applied.borrow().contains(work_dir);

        let output = match args.first().copied() {
            Some("init") => Self::output(args, "Terraform has been successfully initialized!\n", "", 0),
            Some("plan") => Self::output(args, "Plan: 1 to add, 0 to change, 0 to destroy.\n", "", 0),
            Some("apply") => {
                for file in &self.files {
                    let path = work_dir.join(file);
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(path, "hello\n")?;
                }
                self.applied.borrow_mut().insert(work_dir.to_path_buf());
                Self::output(
                    args,
                    "Apply complete! Resources: 1 added, 0 changed, 0 destroyed.\n",
                    "",
                    0,
                )
            }
            Some("state") if applied => Self::output(args, &self.resources.join("\n"), "", 0),
            Some("state") => Self::output(args, "", "No state file was found!\n", 1),
            Some("output") if applied => Self::output(args, self.outputs, "", 0),
            Some("output") => Self::output(args, "{}\n", "", 0),
            _ => Self::output(args, "", "", 0),
        };
        Ok(output)
    }
}

/// Replays scripted answers and records every notice.
#[derive(Default)]
struct ScriptedPrompter {
    choices: VecDeque<MenuChoice>,
    actions: VecDeque<Action>,
    confirms: VecDeque<bool>,
    notices: Vec<Notice>,
}

impl ScriptedPrompter {
    fn new(choices: &[&str], actions: &[Action]) -> Self {
        Self {
            choices: choices
                .iter()
                .map(|id| MenuChoice::Exercise((*id).to_string()))
                .collect(),
            actions: actions.iter().copied().collect(),
            ..Self::default()
        }
    }

    fn blocked(&self) -> Vec<(String, Vec<String>)> {
        self.notices
            .iter()
            .filter_map(|notice| match notice {
                Notice::Blocked { id, unmet } => Some((id.clone(), unmet.clone())),
                _ => None,
            })
            .collect()
    }

    fn completions(&self) -> Vec<u32> {
        self.notices
            .iter()
            .filter_map(|notice| match notice {
                Notice::Completed { score, .. } => Some(*score),
                _ => None,
            })
            .collect()
    }
}

impl Prompter for ScriptedPrompter {
    fn user_name(&mut self) -> infralab_orchestrator::Result<String> {
        Ok("ada".to_string())
    }

    fn choose_exercise(&mut self, _entries: &[MenuEntry]) -> infralab_orchestrator::Result<MenuChoice> {
        Ok(self.choices.pop_front().unwrap_or(MenuChoice::Quit))
    }

    fn choose_action(&mut self, _exercise: &Exercise) -> infralab_orchestrator::Result<Action> {
        Ok(self.actions.pop_front().unwrap_or(Action::Back))
    }

    fn confirm(&mut self, _question: &str) -> infralab_orchestrator::Result<bool> {
        Ok(self.confirms.pop_front().unwrap_or(false))
    }

    fn notify(&mut self, notice: Notice) {
        self.notices.push(notice);
    }
}

struct Lab {
    dir: tempfile::TempDir,
    catalog: Catalog,
}

impl Lab {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("Failed to create temp dir"),
            catalog: Catalog::builtin().expect("Built-in catalog should load"),
        }
    }

    fn progress_path(&self) -> PathBuf {
        self.dir.path().join("progress.json")
    }

    fn workspace(&self) -> PathBuf {
        self.dir.path().join("labs")
    }

    fn session(&self, tool: SimulatedTool) -> SessionContext<'_, SimulatedTool> {
        let mut file = ProgressFile::new(self.progress_path());
        let loaded = file.load();
        assert!(loaded.warning.is_none(), "Unexpected load warning");
        SessionContext::new(&self.catalog, loaded.store, file, tool, self.workspace())
    }

    fn on_disk(&self) -> ProgressStore {
        ProgressFile::new(self.progress_path()).load().store
    }
}

// ============================================================================
// Scenarios
// ============================================================================

/// A first exercise fails validation until its file exists, then completes.
#[test]
fn test_hello_world_completes_after_apply() {
    let lab = Lab::new();
    let mut session = lab.session(SimulatedTool {
        files: vec!["output/welcome.txt"],
        ..SimulatedTool::default()
    });

    let mut prompter = ScriptedPrompter::new(&[], &[Action::Validate]);
    session
        .run_exercise("hello-world", &mut prompter)
        .expect("Session should run");

    let failed = prompter
        .notices
        .iter()
        .find_map(|notice| match notice {
            Notice::Validation(report) => Some(report.clone()),
            _ => None,
        })
        .expect("Validation should be reported");
    assert_eq!(failed.outcome(), ValidationOutcome::Failed);
    assert!(failed.results[0].result.message.contains("output/welcome.txt"));
    assert_eq!(session.progress().status("hello-world"), ProgressStatus::InProgress);

    let mut prompter = ScriptedPrompter::new(
        &[],
        &[
            Action::RunTool(ToolCommand::Init),
            Action::RunTool(ToolCommand::Apply),
            Action::Validate,
        ],
    );
    session
        .run_exercise("hello-world", &mut prompter)
        .expect("Session should run");

    assert_eq!(prompter.completions(), vec![100]);
    assert_eq!(session.progress().status("hello-world"), ProgressStatus::Completed);
    assert_eq!(session.progress().total_score(), 100);

    let saved = lab.on_disk();
    assert!(saved.is_completed("hello-world"));
    assert_eq!(saved.total_score(), 100);
    assert!(lab.workspace().join("hello-world/output/welcome.txt").exists());
}

/// Prerequisites lock an exercise until they are completed.
#[test]
fn test_prerequisites_unlock_in_order() {
    let lab = Lab::new();
    let mut session = lab.session(SimulatedTool {
        files: vec!["output/welcome.txt"],
        ..SimulatedTool::default()
    });

    let mut prompter = ScriptedPrompter::new(&["variables"], &[]);
    session.run_menu(&mut prompter).expect("Menu should run");
    assert_eq!(
        prompter.blocked(),
        vec![("variables".to_string(), vec!["hello-world".to_string()])]
    );
    assert_eq!(session.progress().status("variables"), ProgressStatus::NotStarted);
    assert!(!lab.workspace().join("variables").exists());

    let mut prompter = ScriptedPrompter::new(
        &["hello-world", "variables"],
        &[Action::RunTool(ToolCommand::Apply), Action::Validate],
    );
    session.run_menu(&mut prompter).expect("Menu should run");

    assert!(prompter.blocked().is_empty());
    assert!(session.progress().is_completed("hello-world"));
    assert_eq!(session.progress().status("variables"), ProgressStatus::InProgress);
}

/// Output checks read the values recorded by apply.
#[test]
fn test_variables_exercise_checks_outputs() {
    let lab = Lab::new();
    let mut session = lab.session(SimulatedTool {
        files: vec!["output/welcome.txt", "variables.tf"],
        outputs: r#"{"greeting":{"sensitive":false,"type":"string","value":"Hello, Terraform!"}}"#,
        ..SimulatedTool::default()
    });

    let mut prompter = ScriptedPrompter::new(
        &["hello-world", "variables"],
        &[
            Action::RunTool(ToolCommand::Apply),
            Action::Validate,
            Action::Validate,
            Action::RunTool(ToolCommand::Apply),
            Action::Validate,
        ],
    );
    session.run_menu(&mut prompter).expect("Menu should run");

    // The first validation of "variables" happens before its own apply.
    let reports: Vec<ValidationOutcome> = prompter
        .notices
        .iter()
        .filter_map(|notice| match notice {
            Notice::Validation(report) => Some(report.outcome()),
            _ => None,
        })
        .collect();
    assert_eq!(
        reports,
        vec![
            ValidationOutcome::Passed,
            ValidationOutcome::Failed,
            ValidationOutcome::Passed
        ]
    );
    assert_eq!(prompter.completions(), vec![100, 200]);
}

/// A report keeps every step's result even after a failure.
#[test]
fn test_validation_does_not_short_circuit() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    std::fs::write(dir.path().join("main.tf"), "").expect("Failed to write file");

    let steps = vec![
        ValidationStep::FileExists {
            path: "missing.tf".to_string(),
        },
        ValidationStep::FileExists {
            path: "main.tf".to_string(),
        },
    ];
    let tool = SimulatedTool::default();
    let ctx = ValidationContext {
        work_dir: dir.path(),
        runner: &tool,
    };

    let report = validate(&steps, &ctx);
    assert_eq!(report.results.len(), 2);
    assert!(!report.results[0].result.passed);
    assert!(report.results[1].result.passed);
    assert_eq!(report.outcome(), ValidationOutcome::Failed);
    assert!(!report.passed());

    let again = validate(&steps, &ctx);
    assert_eq!(report, again);
}

/// State counts come from the tool and ignore data sources.
#[test]
fn test_state_resource_count() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let tool = SimulatedTool {
        resources: vec![
            "local_file.a",
            "local_file.b",
            "random_pet.name",
            "data.local_file.readme",
        ],
        ..SimulatedTool::default()
    };
    let steps = vec![ValidationStep::StateResourceCount { min: 3 }];
    let ctx = ValidationContext {
        work_dir: dir.path(),
        runner: &tool,
    };

    let before = validate(&steps, &ctx);
    assert_eq!(before.outcome(), ValidationOutcome::Failed);

    tool.run(dir.path(), ToolCommand::Apply.args())
        .expect("Apply should run");
    let after = validate(&steps, &ctx);
    assert_eq!(after.outcome(), ValidationOutcome::Passed);
    assert!(tool.calls.borrow().iter().any(|call| call == "state list"));
}

/// A completed exercise stays completed when revisited.
#[test]
fn test_completed_exercise_stays_completed() {
    let lab = Lab::new();
    let mut session = lab.session(SimulatedTool {
        files: vec!["output/welcome.txt"],
        ..SimulatedTool::default()
    });

    let mut prompter = ScriptedPrompter::new(
        &["hello-world", "hello-world"],
        &[
            Action::RunTool(ToolCommand::Apply),
            Action::Validate,
            Action::Validate,
        ],
    );
    session.run_menu(&mut prompter).expect("Menu should run");

    let record = session.progress().record("hello-world");
    assert_eq!(record.status, ProgressStatus::Completed);
    assert_eq!(session.progress().total_score(), 100);

    std::fs::remove_file(lab.workspace().join("hello-world/output/welcome.txt"))
        .expect("Failed to remove file");
    let mut prompter = ScriptedPrompter::new(&[], &[Action::Validate]);
    session
        .run_exercise("hello-world", &mut prompter)
        .expect("Session should run");

    assert_eq!(session.progress().record("hello-world"), record);
    assert_eq!(lab.on_disk().record("hello-world"), record);
}

/// Progress written by one session is picked up by the next.
#[test]
fn test_resume_after_restart() {
    let lab = Lab::new();
    {
        let mut session = lab.session(SimulatedTool::default());
        let mut prompter = ScriptedPrompter::default();
        session
            .ensure_user_name(&mut prompter)
            .expect("Name prompt should work");
        session
            .run_exercise("hello-world", &mut prompter)
            .expect("Session should run");
    }

    let mut session = lab.session(SimulatedTool::default());
    assert_eq!(session.progress().user_name, "ada");

    let mut prompter = ScriptedPrompter::new(&[], &[Action::ShowInstructions]);
    session.resume(&mut prompter).expect("Resume should run");

    assert!(prompter
        .notices
        .iter()
        .any(|notice| matches!(notice, Notice::Entered { name, status }
            if name == "Hello, World" && *status == ProgressStatus::InProgress)));
}

/// Unknown exercise ids are rejected before anything runs.
#[test]
fn test_unknown_exercise_is_rejected() {
    let lab = Lab::new();
    let tool = SimulatedTool::default();
    let mut session = lab.session(tool);

    let err = session
        .run_exercise("does-not-exist", &mut ScriptedPrompter::default())
        .expect_err("Unknown id should fail");

    assert!(matches!(err, LabError::ExerciseNotFound { .. }));
    assert_eq!(err.exit_code(), infralab_orchestrator::EXIT_INVALID_EXERCISE);
    assert!(!lab.progress_path().exists());
}

/// Zero-step exercises are completed by the learner's confirmation.
#[test]
fn test_reflection_exercise_needs_confirmation() {
    let catalog = Catalog::from_json(
        r#"{"exercises": [
            {"id": "reflection", "name": "Reflection", "description": "Look back", "category": "state"}
        ]}"#,
    )
    .expect("Catalog should parse");
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut file = ProgressFile::new(dir.path().join("progress.json"));
    let store = file.load().store;
    let mut session = SessionContext::new(
        &catalog,
        store,
        file,
        SimulatedTool::default(),
        dir.path().join("labs"),
    );

    let mut prompter = ScriptedPrompter::new(&[], &[Action::Validate, Action::Validate]);
    prompter.confirms = VecDeque::from([false, true]);
    session
        .run_exercise("reflection", &mut prompter)
        .expect("Session should run");

    let outcomes: Vec<ValidationOutcome> = prompter
        .notices
        .iter()
        .filter_map(|notice| match notice {
            Notice::Validation(report) => Some(report.outcome()),
            _ => None,
        })
        .collect();
    assert_eq!(
        outcomes,
        vec![
            ValidationOutcome::ManualConfirmationRequired,
            ValidationOutcome::ManualConfirmationRequired
        ]
    );
    assert!(session.progress().is_completed("reflection"));
}

/// The built-in catalog is well formed and starts with an unlocked exercise.
#[test]
fn test_builtin_catalog_shape() {
    let catalog = Catalog::builtin().expect("Built-in catalog should load");
    let empty = ProgressStore::default();

    assert_eq!(catalog.len(), 8);
    let unlocked: Vec<&str> = catalog
        .list()
        .iter()
        .filter(|exercise| catalog.is_unlocked(exercise, &empty))
        .map(|exercise| exercise.id.as_str())
        .collect();
    assert_eq!(unlocked, vec!["hello-world"]);

    let state = catalog.get("state-inspection").expect("Exercise should exist");
    assert!(state.requires_manual_confirmation());
}
