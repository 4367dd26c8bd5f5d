//! Interactive session state machine.
//!
//! The session moves between explicit [`SessionState`]s. All mutable state
//! lives in a [`SessionContext`] that is passed to each transition, and every
//! interaction with the user goes through the [`Prompter`] trait so the
//! machine can be driven by a terminal or by a script.
//!
//! ```text
//! MainMenu -> PrerequisiteCheck -> Blocked -> MainMenu
//!                               -> ExerciseSession <-> Validating -> Completed -> MainMenu
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use chrono::Utc;
use infralab_runner::{CommandOutput, ToolCommand, ToolRunner};
use tracing::{debug, info, instrument, warn};

use crate::catalog::{Catalog, Difficulty, Exercise};
use crate::error::{LabError, Result};
use crate::progress::{
    Persisted, ProgressFile, ProgressStatus, ProgressStore, POINTS_PER_EXERCISE,
};
use crate::validator::{validate, ValidationContext, ValidationOutcome, ValidationReport};

// ============================================================================
// States and actions
// ============================================================================

/// A state of the session state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Choosing an exercise.
    MainMenu,
    /// Checking the prerequisites of the chosen exercise.
    PrerequisiteCheck(String),
    /// The exercise has unmet prerequisites.
    Blocked {
        /// The exercise that was chosen.
        id: String,
        /// Prerequisites that are not completed.
        unmet: Vec<String>,
    },
    /// Working on an exercise.
    ExerciseSession(String),
    /// Running the exercise's validation steps.
    Validating(String),
    /// The exercise was just completed.
    Completed(String),
    /// The user quit.
    Quit,
}

/// Something the user can do inside an exercise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Print the exercise instructions.
    ShowInstructions,
    /// Run one of the tool commands in the exercise directory.
    RunTool(ToolCommand),
    /// Show the next hint.
    Hint,
    /// Check whether the exercise is complete.
    Validate,
    /// Leave the exercise.
    Back,
}

impl Action {
    /// Every action, in menu order.
    pub const MENU: [Self; 8] = [
        Self::ShowInstructions,
        Self::RunTool(ToolCommand::Init),
        Self::RunTool(ToolCommand::Plan),
        Self::RunTool(ToolCommand::Apply),
        Self::RunTool(ToolCommand::Show),
        Self::Hint,
        Self::Validate,
        Self::Back,
    ];
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShowInstructions => f.write_str("Show instructions"),
            Self::RunTool(ToolCommand::Show) => f.write_str("Run show (inspect state)"),
            Self::RunTool(command) => write!(f, "Run {command}"),
            Self::Hint => f.write_str("Get a hint"),
            Self::Validate => f.write_str("Validate completion"),
            Self::Back => f.write_str("Back to menu"),
        }
    }
}

/// One line of the main menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuEntry {
    /// Exercise id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Category tag.
    pub category: String,
    /// Difficulty tag.
    pub difficulty: Difficulty,
    /// Status for the current user.
    pub status: ProgressStatus,
    /// `true` if some prerequisite is not completed.
    pub locked: bool,
}

/// Selection made in the main menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuChoice {
    /// Enter the exercise with this id.
    Exercise(String),
    /// Leave the program.
    Quit,
}

/// Information the session reports to the user.
#[derive(Debug)]
pub enum Notice {
    /// An exercise was entered.
    Entered {
        /// Exercise name.
        name: String,
        /// Status before entering.
        status: ProgressStatus,
    },
    /// An exercise cannot be entered yet.
    Blocked {
        /// Exercise id.
        id: String,
        /// Prerequisites that are not completed.
        unmet: Vec<String>,
    },
    /// Exercise instructions.
    Instructions {
        /// Exercise name.
        name: String,
        /// Text to show.
        text: String,
    },
    /// One hint.
    Hint {
        /// Hint text.
        text: String,
        /// One-based position of this hint.
        number: usize,
        /// Number of hints.
        total: usize,
    },
    /// The exercise has no hints.
    NoHints,
    /// A tool command ran to completion, whatever its exit code.
    CommandFinished(CommandOutput),
    /// Results of a validation attempt.
    Validation(ValidationReport),
    /// An exercise was completed.
    Completed {
        /// Exercise name.
        name: String,
        /// Total score afterwards.
        score: u32,
    },
    /// Resume was requested but nothing is in progress.
    NothingToResume,
    /// A non-fatal problem.
    Warning(String),
    /// A recoverable error.
    Error(LabError),
}

/// The user-facing side of a session.
pub trait Prompter {
    /// Asks for a display name.
    ///
    /// # Errors
    ///
    /// Returns `LabError::Interaction` if the prompt fails.
    fn user_name(&mut self) -> Result<String>;

    /// Shows the main menu.
    ///
    /// # Errors
    ///
    /// Returns `LabError::Interaction` if the prompt fails.
    fn choose_exercise(&mut self, entries: &[MenuEntry]) -> Result<MenuChoice>;

    /// Shows the action menu of an exercise.
    ///
    /// # Errors
    ///
    /// Returns `LabError::Interaction` if the prompt fails.
    fn choose_action(&mut self, exercise: &Exercise) -> Result<Action>;

    /// Asks a yes/no question.
    ///
    /// # Errors
    ///
    /// Returns `LabError::Interaction` if the prompt fails.
    fn confirm(&mut self, question: &str) -> Result<bool>;

    /// Reports something to the user.
    fn notify(&mut self, notice: Notice);
}

// ============================================================================
// SessionContext
// ============================================================================

/// Everything a session owns for the duration of a run.
pub struct SessionContext<'a, R> {
    catalog: &'a Catalog,
    progress: ProgressStore,
    progress_file: ProgressFile,
    runner: R,
    workspace: PathBuf,
    hint_cursor: HashMap<String, usize>,
}

impl<R> fmt::Debug for SessionContext<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("progress", &self.progress)
            .field("progress_file", &self.progress_file)
            .field("workspace", &self.workspace)
            .finish_non_exhaustive()
    }
}

impl<'a, R: ToolRunner> SessionContext<'a, R> {
    /// Creates a session over a loaded store.
    ///
    /// Each exercise works in `<workspace>/<exercise id>`.
    #[must_use]
    pub fn new(
        catalog: &'a Catalog,
        progress: ProgressStore,
        progress_file: ProgressFile,
        runner: R,
        workspace: impl Into<PathBuf>,
    ) -> Self {
        Self {
            catalog,
            progress,
            progress_file,
            runner,
            workspace: workspace.into(),
            hint_cursor: HashMap::new(),
        }
    }

    /// The current progress.
    #[must_use]
    pub const fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    /// Score over the exercises of the loaded catalog.
    ///
    /// The persisted `totalScore` also counts completed records of
    /// exercises the catalog no longer has; everything shown to the user
    /// uses this score instead, matching the report.
    #[must_use]
    pub fn catalog_score(&self) -> u32 {
        let completed = self
            .catalog
            .list()
            .iter()
            .filter(|exercise| self.progress.is_completed(&exercise.id))
            .count();
        u32::try_from(completed)
            .unwrap_or(u32::MAX)
            .saturating_mul(POINTS_PER_EXERCISE)
    }

    /// Ends the session, returning the final progress.
    #[must_use]
    pub fn into_progress(self) -> ProgressStore {
        self.progress
    }

    /// Working directory of an exercise.
    #[must_use]
    pub fn work_dir(&self, id: &str) -> PathBuf {
        self.workspace.join(id)
    }

    /// Main menu entries in catalog order.
    #[must_use]
    pub fn menu_entries(&self) -> Vec<MenuEntry> {
        self.catalog
            .list()
            .iter()
            .map(|exercise| MenuEntry {
                id: exercise.id.clone(),
                name: exercise.name.clone(),
                category: exercise.category.clone(),
                difficulty: exercise.difficulty,
                status: self.progress.status(&exercise.id),
                locked: !self.catalog.is_unlocked(exercise, &self.progress),
            })
            .collect()
    }

    /// Saves `candidate` and, only if that worked, makes it current.
    ///
    /// # Errors
    ///
    /// Returns `LabError::PersistenceWriteFailure` if the save failed. Memory
    /// and disk are then both unchanged.
    pub fn commit(&mut self, candidate: ProgressStore, prompter: &mut dyn Prompter) -> Result<()> {
        if self.progress_file.save(&candidate)? == Persisted::MemoryOnly {
            prompter.notify(Notice::Warning(format!(
                "Progress file '{}' is unavailable; this change is kept in memory only",
                self.progress_file.path().display()
            )));
        }
        self.progress = candidate;
        Ok(())
    }

    /// Asks for a display name if none is stored yet.
    ///
    /// # Errors
    ///
    /// Returns `LabError::Interaction` if the prompt fails.
    pub fn ensure_user_name(&mut self, prompter: &mut dyn Prompter) -> Result<()> {
        if !self.progress.user_name.trim().is_empty() {
            return Ok(());
        }
        let name = prompter.user_name()?;
        let name = name.trim();
        if name.is_empty() {
            return Ok(());
        }
        let candidate = self.progress.with_user_name(name);
        if let Err(e) = self.commit(candidate, prompter) {
            prompter.notify(Notice::Error(e));
        }
        Ok(())
    }

    /// Prerequisites of an exercise that are not completed yet.
    ///
    /// # Errors
    ///
    /// Returns `LabError::ExerciseNotFound` for an unknown id.
    pub fn unmet_prerequisites(&self, id: &str) -> Result<Vec<String>> {
        let exercise = self.catalog.get(id)?;
        Ok(self
            .catalog
            .unmet_prerequisites(exercise, &self.progress)
            .into_iter()
            .map(ToString::to_string)
            .collect())
    }

    /// Enters an unlocked exercise: creates its directory and marks it
    /// `InProgress` if it is not started yet.
    ///
    /// A failed save is reported and the exercise is entered anyway with its
    /// record unchanged.
    ///
    /// # Errors
    ///
    /// Returns `LabError::ExerciseNotFound` for an unknown id, or
    /// `LabError::Io` if the working directory cannot be created.
    #[instrument(skip(self, prompter))]
    pub fn enter_exercise(&mut self, id: &str, prompter: &mut dyn Prompter) -> Result<()> {
        let catalog = self.catalog;
        let exercise = catalog.get(id)?;
        std::fs::create_dir_all(self.work_dir(id))?;

        let record = self.progress.record(id);
        prompter.notify(Notice::Entered {
            name: exercise.name.clone(),
            status: record.status,
        });

        let started = record.start(Utc::now());
        if started != record {
            let candidate = self.progress.with_record(id, started);
            match self.commit(candidate, prompter) {
                Ok(()) => info!(exercise = %id, "Exercise started"),
                Err(e) => prompter.notify(Notice::Error(e)),
            }
        }
        Ok(())
    }

    /// Runs a tool command in the exercise directory.
    ///
    /// A non-zero exit code is returned as a normal [`CommandOutput`] and
    /// never changes progress.
    ///
    /// # Errors
    ///
    /// Returns `LabError::ToolMissing`, `LabError::ToolFailed`,
    /// `LabError::CommandTimeout` or `LabError::CommandCancelled` if the
    /// command did not run to completion.
    #[instrument(skip(self))]
    pub fn run_tool(&self, id: &str, command: ToolCommand) -> Result<CommandOutput> {
        let output = self.runner.execute(&self.work_dir(id), command)?;
        if output.success() {
            debug!(exercise = %id, "Tool command succeeded");
        } else {
            warn!(exercise = %id, exit_code = ?output.exit_code, "Tool command failed");
        }
        Ok(output)
    }

    /// Returns the next hint of an exercise, cycling through the list.
    pub fn next_hint(&mut self, exercise: &Exercise) -> Notice {
        if exercise.hints.is_empty() {
            return Notice::NoHints;
        }
        let cursor = self.hint_cursor.entry(exercise.id.clone()).or_insert(0);
        let index = *cursor % exercise.hints.len();
        *cursor = index + 1;
        Notice::Hint {
            text: exercise.hints[index].clone(),
            number: index + 1,
            total: exercise.hints.len(),
        }
    }

    /// Runs every validation step of an exercise. Does not change progress.
    ///
    /// # Errors
    ///
    /// Returns `LabError::ExerciseNotFound` for an unknown id.
    #[instrument(skip(self))]
    pub fn validate_exercise(&self, id: &str) -> Result<ValidationReport> {
        let exercise = self.catalog.get(id)?;
        let work_dir = self.work_dir(id);
        let ctx = ValidationContext {
            work_dir: &work_dir,
            runner: &self.runner,
        };
        Ok(validate(&exercise.validation, &ctx))
    }

    /// Marks an exercise completed and persists the change.
    ///
    /// Completing an already completed exercise does nothing.
    ///
    /// # Errors
    ///
    /// Returns `LabError::PersistenceWriteFailure` if the save failed; the
    /// exercise then stays in its previous status.
    pub fn mark_completed(&mut self, id: &str, prompter: &mut dyn Prompter) -> Result<()> {
        let record = self.progress.record(id);
        if record.is_completed() {
            return Ok(());
        }
        let candidate = self.progress.with_record(id, record.complete(Utc::now()));
        self.commit(candidate, prompter)?;
        info!(exercise = %id, score = self.catalog_score(), "Exercise completed");
        Ok(())
    }

    /// Performs one transition.
    ///
    /// # Errors
    ///
    /// Returns `LabError::ExerciseNotFound` for an unknown id and
    /// `LabError::Interaction` if a prompt fails. Recoverable problems are
    /// reported through the prompter instead.
    pub fn step(&mut self, state: SessionState, prompter: &mut dyn Prompter) -> Result<SessionState> {
        debug!(state = ?state, "Session step");
        let catalog = self.catalog;

        match state {
            SessionState::MainMenu => match prompter.choose_exercise(&self.menu_entries())? {
                MenuChoice::Exercise(id) => Ok(SessionState::PrerequisiteCheck(id)),
                MenuChoice::Quit => Ok(SessionState::Quit),
            },
            SessionState::PrerequisiteCheck(id) => {
                let unmet = self.unmet_prerequisites(&id)?;
                if unmet.is_empty() {
                    match self.enter_exercise(&id, prompter) {
                        Ok(()) => Ok(SessionState::ExerciseSession(id)),
                        Err(e @ LabError::Io(_)) => {
                            warn!(exercise = %id, error = %e, "Exercise directory unavailable");
                            prompter.notify(Notice::Error(e));
                            Ok(SessionState::MainMenu)
                        }
                        Err(e) => Err(e),
                    }
                } else {
                    Ok(SessionState::Blocked { id, unmet })
                }
            }
            SessionState::Blocked { id, unmet } => {
                info!(exercise = %id, unmet = ?unmet, "Exercise is locked");
                prompter.notify(Notice::Blocked { id, unmet });
                Ok(SessionState::MainMenu)
            }
            SessionState::ExerciseSession(id) => {
                let exercise = catalog.get(&id)?;
                let action = prompter.choose_action(exercise)?;
                self.perform(action, exercise, prompter)
            }
            SessionState::Validating(id) => self.finish_validation(catalog.get(&id)?, prompter),
            SessionState::Completed(id) => {
                let exercise = catalog.get(&id)?;
                prompter.notify(Notice::Completed {
                    name: exercise.name.clone(),
                    score: self.catalog_score(),
                });
                Ok(SessionState::MainMenu)
            }
            SessionState::Quit => Ok(SessionState::Quit),
        }
    }

    fn perform(
        &mut self,
        action: Action,
        exercise: &Exercise,
        prompter: &mut dyn Prompter,
    ) -> Result<SessionState> {
        let id = exercise.id.clone();
        match action {
            Action::ShowInstructions => {
                prompter.notify(Notice::Instructions {
                    name: exercise.name.clone(),
                    text: exercise.instructions().to_string(),
                });
                Ok(SessionState::ExerciseSession(id))
            }
            Action::RunTool(command) => match self.run_tool(&id, command) {
                Ok(output) => {
                    prompter.notify(Notice::CommandFinished(output));
                    Ok(SessionState::ExerciseSession(id))
                }
                Err(e @ LabError::CommandCancelled { .. }) => {
                    prompter.notify(Notice::Error(e));
                    Ok(SessionState::MainMenu)
                }
                Err(e) => {
                    prompter.notify(Notice::Error(e));
                    Ok(SessionState::ExerciseSession(id))
                }
            },
            Action::Hint => {
                let notice = self.next_hint(exercise);
                prompter.notify(notice);
                Ok(SessionState::ExerciseSession(id))
            }
            Action::Validate => Ok(SessionState::Validating(id)),
            Action::Back => Ok(SessionState::MainMenu),
        }
    }

    fn finish_validation(
        &mut self,
        exercise: &Exercise,
        prompter: &mut dyn Prompter,
    ) -> Result<SessionState> {
        let id = exercise.id.clone();
        let report = self.validate_exercise(&id)?;
        let outcome = report.outcome();
        prompter.notify(Notice::Validation(report));

        let complete = match outcome {
            ValidationOutcome::Passed => true,
            ValidationOutcome::Failed => false,
            ValidationOutcome::ManualConfirmationRequired => prompter.confirm(&format!(
                "'{}' has no automatic checks. Mark it as completed?",
                exercise.name
            ))?,
        };
        if !complete {
            return Ok(SessionState::ExerciseSession(id));
        }

        match self.mark_completed(&id, prompter) {
            Ok(()) => Ok(SessionState::Completed(id)),
            Err(e) => {
                prompter.notify(Notice::Error(e));
                Ok(SessionState::ExerciseSession(id))
            }
        }
    }

    fn drive(
        &mut self,
        mut state: SessionState,
        stop_at_menu: bool,
        prompter: &mut dyn Prompter,
    ) -> Result<()> {
        loop {
            state = self.step(state, prompter)?;
            match state {
                SessionState::Quit => return Ok(()),
                SessionState::MainMenu if stop_at_menu => return Ok(()),
                _ => {}
            }
        }
    }

    /// Runs the main menu until the user quits.
    ///
    /// Leaving an exercise, or finishing one, comes back to the menu.
    ///
    /// # Arguments
    ///
    /// * `prompter` - Answers every question and receives every notice.
    ///
    /// # Example
    ///
    /// ```rust
    /// use infralab_orchestrator::{
    ///     Action, Catalog, Exercise, MenuChoice, MenuEntry, Notice, ProgressFile, ProgressStore,
    ///     Prompter, Result, SessionContext,
    /// };
    /// use infralab_runner::ExternalTool;
    ///
    /// struct QuitRightAway;
    ///
    /// impl Prompter for QuitRightAway {
    ///     fn user_name(&mut self) -> Result<String> {
    ///         Ok("ada".to_string())
    ///     }
    ///     fn choose_exercise(&mut self, _entries: &[MenuEntry]) -> Result<MenuChoice> {
    ///         Ok(MenuChoice::Quit)
    ///     }
    ///     fn choose_action(&mut self, _exercise: &Exercise) -> Result<Action> {
    ///         Ok(Action::Back)
    ///     }
    ///     fn confirm(&mut self, _question: &str) -> Result<bool> {
    ///         Ok(false)
    ///     }
    ///     fn notify(&mut self, _notice: Notice) {}
    /// }
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let catalog = Catalog::builtin().unwrap();
    /// let mut session = SessionContext::new(
    ///     &catalog,
    ///     ProgressStore::new("ada"),
    ///     ProgressFile::new(dir.path().join("progress.json")),
    ///     ExternalTool::new("terraform"),
    ///     dir.path().join("labs"),
    /// );
    ///
    /// session.run_menu(&mut QuitRightAway).unwrap();
    /// assert_eq!(session.catalog_score(), 0);
    /// ```
    ///
    /// # Errors
    ///
    /// See [`SessionContext::step`].
    pub fn run_menu(&mut self, prompter: &mut dyn Prompter) -> Result<()> {
        self.drive(SessionState::MainMenu, false, prompter)
    }

    /// Runs a single exercise and returns when the user leaves it, or right
    /// away if it is locked.
    ///
    /// # Errors
    ///
    /// Returns `LabError::ExerciseNotFound` for an unknown id.
    pub fn run_exercise(&mut self, id: &str, prompter: &mut dyn Prompter) -> Result<()> {
        self.catalog.get(id)?;
        self.drive(SessionState::PrerequisiteCheck(id.to_string()), true, prompter)
    }

    /// Re-enters the most recently started in-progress exercise, then
    /// continues with the main menu. Records of exercises missing from the
    /// catalog are ignored.
    ///
    /// # Errors
    ///
    /// See [`SessionContext::step`].
    pub fn resume(&mut self, prompter: &mut dyn Prompter) -> Result<()> {
        let catalog = self.catalog;
        let target = self
            .progress
            .last_in_progress_where(|id| catalog.find(id).is_some())
            .map(ToString::to_string);

        match target {
            Some(id) => {
                info!(exercise = %id, "Resuming exercise");
                self.drive(SessionState::PrerequisiteCheck(id), false, prompter)
            }
            None => {
                prompter.notify(Notice::NothingToResume);
                self.run_menu(prompter)
            }
        }
    }
}
