//! infralab Report Generation
//!
//! Badges and progress summaries derived from a learner's progress.
//! Everything here is a pure function of its input; exporting a report
//! writes the report file and nothing else.
//!
//! # Types
//!
//! - [`BadgeTier`] - Achievement tier for a completion percentage
//! - [`ProgressInput`] - Per-exercise status handed in by the caller
//! - [`Report`] - The derived summary
//!
//! # Generators
//!
//! - [`json::JsonGenerator`] - Compact or pretty JSON
//! - [`MarkdownGenerator`] - Human-readable Markdown
//!
//! # Example
//!
//! ```rust
//! use infralab_report::{BadgeTier, ExerciseInput, ExerciseStatus, ProgressInput, Report};
//!
//! let input = ProgressInput {
//!     user_name: "ada".to_string(),
//!     exercises: vec![
//!         ExerciseInput::new("hello-world", "Hello, World", "basics", ExerciseStatus::Completed),
//!         ExerciseInput::new("variables", "Input Variables", "basics", ExerciseStatus::InProgress),
//!     ],
//! };
//!
//! let report = Report::new(&input);
//! assert_eq!(report.percentage, 50);
//! assert_eq!(report.tier, BadgeTier::Practitioner);
//! ```

pub mod json;
mod markdown;

pub use markdown::MarkdownGenerator;

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Points awarded per completed exercise.
pub const POINTS_PER_EXERCISE: u32 = 100;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during report generation.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Failed to serialize the report to JSON.
    #[error("failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to write the report file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for report operations.
pub type Result<T> = std::result::Result<T, ReportError>;

// ============================================================================
// Input (local copy to avoid cross-crate dependency)
// ============================================================================

/// Status of one exercise.
///
/// This is a local copy of `ProgressStatus` from the orchestrator crate so
/// that reporting does not depend on the session engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExerciseStatus {
    /// Never entered.
    #[default]
    NotStarted,
    /// Entered but not completed.
    InProgress,
    /// Completed.
    Completed,
}

/// One catalog exercise and its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExerciseInput {
    /// Exercise id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Category tag.
    pub category: String,
    /// Status for the learner.
    pub status: ExerciseStatus,
    /// Completion time, if known.
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExerciseInput {
    /// Creates an input without a completion time.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: impl Into<String>,
        status: ExerciseStatus,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: category.into(),
            status,
            completed_at: None,
        }
    }

    /// Sets the completion time.
    #[must_use]
    pub fn completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }
}

/// Everything a report is derived from, exercises in catalog order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressInput {
    /// Learner display name.
    pub user_name: String,
    /// Every catalog exercise.
    pub exercises: Vec<ExerciseInput>,
}

// ============================================================================
// BadgeTier
// ============================================================================

/// Achievement tier, from the integer (floor) completion percentage.
///
/// | Percentage | Tier |
/// |-----------|------|
/// | 0 | `None` |
/// | 1-24 | `Novice` |
/// | 25-49 | `Apprentice` |
/// | 50-74 | `Practitioner` |
/// | 75-89 | `Expert` |
/// | 90-99 | `Master` |
/// | 100 | `Champion` |
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum BadgeTier {
    /// Nothing completed yet.
    #[default]
    None,
    /// 1-24%.
    Novice,
    /// 25-49%.
    Apprentice,
    /// 50-74%.
    Practitioner,
    /// 75-89%.
    Expert,
    /// 90-99%.
    Master,
    /// Everything completed.
    Champion,
}

impl BadgeTier {
    /// Tier for a percentage in `0..=100`.
    #[must_use]
    pub const fn from_percentage(percentage: u32) -> Self {
        match percentage {
            0 => Self::None,
            1..=24 => Self::Novice,
            25..=49 => Self::Apprentice,
            50..=74 => Self::Practitioner,
            75..=89 => Self::Expert,
            90..=99 => Self::Master,
            _ => Self::Champion,
        }
    }

    /// Tier for `completed` out of `total` exercises. An empty catalog has no tier.
    #[must_use]
    pub fn from_counts(completed: usize, total: usize) -> Self {
        Self::from_percentage(percentage(completed, total))
    }

    /// Display name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Novice => "Novice",
            Self::Apprentice => "Apprentice",
            Self::Practitioner => "Practitioner",
            Self::Expert => "Expert",
            Self::Master => "Master",
            Self::Champion => "Champion",
        }
    }
}

impl std::fmt::Display for BadgeTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Integer floor of `completed / total` as a percentage, 0 for an empty catalog.
#[must_use]
pub fn percentage(completed: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    let pct = completed.min(total).saturating_mul(100) / total;
    u32::try_from(pct).unwrap_or(100)
}

// ============================================================================
// Report
// ============================================================================

/// The closest higher tier and how to get there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextTier {
    /// The tier reached next.
    pub tier: BadgeTier,
    /// Additional exercises needed to reach it.
    pub exercises_needed: usize,
}

/// Completion within one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryProgress {
    /// Category tag.
    pub category: String,
    /// Completed exercises in the category.
    pub completed: usize,
    /// Exercises in the category.
    pub total: usize,
}

/// A completed exercise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedExercise {
    /// Exercise id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Completion time, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Progress summary for one learner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    /// Learner display name.
    pub user_name: String,
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
    /// Completed exercises.
    pub completed: usize,
    /// Exercises in the catalog.
    pub total: usize,
    /// Floor completion percentage.
    pub percentage: u32,
    /// `100 x completed`.
    pub score: u32,
    /// Current tier.
    pub tier: BadgeTier,
    /// The next tier, absent at `Champion` or for an empty catalog.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_tier: Option<NextTier>,
    /// Completion per category, categories in order of first appearance.
    pub categories: Vec<CategoryProgress>,
    /// Completed exercises in catalog order.
    pub completed_exercises: Vec<CompletedExercise>,
}

impl Report {
    /// Derives a report generated now.
    ///
    /// Only the exercises in `input` count, so progress on exercises that
    /// left the catalog never shows up in a report.
    ///
    /// # Arguments
    ///
    /// * `input` - The learner and every catalog exercise with its status.
    ///
    /// # Example
    ///
    /// ```rust
    /// use infralab_report::{ExerciseInput, ExerciseStatus, ProgressInput, Report};
    ///
    /// let input = ProgressInput {
    ///     user_name: "ada".to_string(),
    ///     exercises: vec![
    ///         ExerciseInput::new("hello-world", "Hello", "basics", ExerciseStatus::Completed),
    ///         ExerciseInput::new("variables", "Variables", "basics", ExerciseStatus::NotStarted),
    ///     ],
    /// };
    ///
    /// let report = Report::new(&input);
    /// assert_eq!(report.completed, 1);
    /// assert_eq!(report.percentage, 50);
    /// assert_eq!(report.score, 100);
    /// ```
    #[must_use]
    pub fn new(input: &ProgressInput) -> Self {
        Self::at(input, Utc::now())
    }

    /// Derives a report with a fixed generation time.
    #[must_use]
    pub fn at(input: &ProgressInput, generated_at: DateTime<Utc>) -> Self {
        let total = input.exercises.len();
        let completed_exercises: Vec<CompletedExercise> = input
            .exercises
            .iter()
            .filter(|e| e.status == ExerciseStatus::Completed)
            .map(|e| CompletedExercise {
                id: e.id.clone(),
                name: e.name.clone(),
                completed_at: e.completed_at,
            })
            .collect();
        let completed = completed_exercises.len();

        let mut categories: Vec<CategoryProgress> = Vec::new();
        for exercise in &input.exercises {
            let done = usize::from(exercise.status == ExerciseStatus::Completed);
            match categories.iter_mut().find(|c| c.category == exercise.category) {
                Some(category) => {
                    category.total += 1;
                    category.completed += done;
                }
                None => categories.push(CategoryProgress {
                    category: exercise.category.clone(),
                    completed: done,
                    total: 1,
                }),
            }
        }

        Self {
            user_name: input.user_name.clone(),
            generated_at,
            completed,
            total,
            percentage: percentage(completed, total),
            score: u32::try_from(completed)
                .unwrap_or(u32::MAX)
                .saturating_mul(POINTS_PER_EXERCISE),
            tier: BadgeTier::from_counts(completed, total),
            next_tier: next_tier(completed, total),
            categories,
            completed_exercises,
        }
    }
}

fn next_tier(completed: usize, total: usize) -> Option<NextTier> {
    let current = BadgeTier::from_counts(completed, total);
    (completed + 1..=total).find_map(|count| {
        let tier = BadgeTier::from_counts(count, total);
        (tier > current).then_some(NextTier {
            tier,
            exercises_needed: count - completed,
        })
    })
}

// ============================================================================
// Export
// ============================================================================

/// Output format of an exported report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    /// Markdown document.
    #[default]
    Markdown,
    /// Pretty-printed JSON.
    Json,
}

/// Renders `report` in `format` and writes it to `path`.
///
/// # Errors
///
/// Returns [`ReportError::Io`] if the file cannot be written and
/// [`ReportError::Serialization`] if JSON rendering fails.
pub fn export(report: &Report, path: &Path, format: ReportFormat) -> Result<()> {
    match format {
        ReportFormat::Markdown => MarkdownGenerator::new(report).write_to_file(path),
        ReportFormat::Json => json::JsonGenerator::new(report).write_to_file(path, true),
    }
}
