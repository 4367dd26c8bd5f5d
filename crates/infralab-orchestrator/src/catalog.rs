//! Exercise catalog for the infralab orchestrator.
//!
//! The catalog is the immutable registry of every exercise: identity,
//! prerequisites, validation steps and hints. It is built once at startup,
//! checked for consistency, and then shared by reference.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LabError, Result};
use crate::progress::ProgressStore;
use crate::validator::ValidationStep;

/// The catalog shipped with the binary.
const BUILTIN_CATALOG: &str = include_str!("../catalog/default.json");

/// Exercise ids double as directory names, so they are restricted to a
/// portable subset.
static EXERCISE_ID: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").ok());

/// Default category for exercises that do not declare one.
fn default_category() -> String {
    "general".to_string()
}

// ============================================================================
// Difficulty
// ============================================================================

/// Difficulty tag of an exercise. Only used for grouping and display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Difficulty {
    /// First steps (default).
    #[default]
    Beginner,
    /// Builds on the basics.
    Intermediate,
    /// Combines several concepts.
    Advanced,
}

impl Difficulty {
    /// Parses a string into a `Difficulty`, case-insensitively.
    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "beginner" => Some(Self::Beginner),
            "intermediate" => Some(Self::Intermediate),
            "advanced" => Some(Self::Advanced),
            _ => None,
        }
    }

    /// Lowercase name of the difficulty.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        }
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Difficulty {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid difficulty '{s}': expected one of 'beginner', 'intermediate', 'advanced'"
            ))
        })
    }
}

impl Serialize for Difficulty {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

// ============================================================================
// Exercise
// ============================================================================

/// A unit of guided work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exercise {
    /// Unique, stable identifier. Also the name of the working directory.
    pub id: String,

    /// Display name.
    pub name: String,

    /// One-line description.
    pub description: String,

    /// Step-by-step instructions shown on request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Grouping tag.
    #[serde(default = "default_category")]
    pub category: String,

    /// Difficulty tag.
    #[serde(default)]
    pub difficulty: Difficulty,

    /// Exercises that must be completed before this one can start.
    #[serde(default)]
    pub prerequisites: BTreeSet<String>,

    /// Checks run, in order, to decide whether the exercise is complete.
    #[serde(default)]
    pub validation: Vec<ValidationStep>,

    /// Hints, surfaced one at a time.
    #[serde(default)]
    pub hints: Vec<String>,
}

impl Exercise {
    /// Instructions to display, falling back to the description.
    #[must_use]
    pub fn instructions(&self) -> &str {
        self.instructions.as_deref().unwrap_or(&self.description)
    }

    /// Returns `true` if completion must be confirmed by the user because
    /// there is nothing to check automatically.
    #[must_use]
    pub fn requires_manual_confirmation(&self) -> bool {
        self.validation.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    exercises: Vec<Exercise>,
}

// ============================================================================
// Catalog
// ============================================================================

/// Immutable, consistency-checked registry of exercises.
///
/// # Examples
///
/// ```
/// use infralab_orchestrator::Catalog;
///
/// let catalog = Catalog::builtin().unwrap();
/// let first = &catalog.list()[0];
/// assert_eq!(first.id, "hello-world");
/// assert!(catalog.prerequisites_of("variables").unwrap().contains("hello-world"));
/// ```
#[derive(Debug, Clone)]
pub struct Catalog {
    exercises: Vec<Exercise>,
    index: HashMap<String, usize>,
}

impl Catalog {
    /// Builds a catalog from exercises in declaration order.
    ///
    /// # Errors
    ///
    /// Returns `LabError::CatalogError` if an id is malformed or duplicated,
    /// a prerequisite is unknown, the prerequisite graph has a cycle, or a
    /// validation step is malformed.
    pub fn new(exercises: Vec<Exercise>) -> Result<Self> {
        let mut index = HashMap::with_capacity(exercises.len());

        for (position, exercise) in exercises.iter().enumerate() {
            if !is_valid_id(&exercise.id) {
                return Err(LabError::catalog(format!(
                    "exercise id '{}' must be lowercase letters, digits, '-' or '_'",
                    exercise.id
                )));
            }
            if exercise.name.trim().is_empty() {
                return Err(LabError::catalog(format!(
                    "exercise '{}' has an empty name",
                    exercise.id
                )));
            }
            if index.insert(exercise.id.clone(), position).is_some() {
                return Err(LabError::catalog(format!(
                    "exercise id '{}' is declared more than once",
                    exercise.id
                )));
            }
        }

        for exercise in &exercises {
            for prerequisite in &exercise.prerequisites {
                if !index.contains_key(prerequisite) {
                    return Err(LabError::catalog(format!(
                        "exercise '{}' requires unknown exercise '{prerequisite}'",
                        exercise.id
                    )));
                }
            }
            for step in &exercise.validation {
                step.check_definition().map_err(|message| {
                    LabError::catalog(format!("exercise '{}': {message}", exercise.id))
                })?;
            }
        }

        let catalog = Self { exercises, index };
        catalog.check_acyclic()?;
        debug!(exercises = catalog.exercises.len(), "Catalog loaded");
        Ok(catalog)
    }

    /// Loads the catalog shipped with infralab.
    ///
    /// # Errors
    ///
    /// Returns `LabError::CatalogError` if the embedded catalog is broken.
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_CATALOG)
    }

    /// Parses a catalog document: `{ "exercises": [ ... ] }`.
    ///
    /// # Errors
    ///
    /// Returns `LabError::CatalogError` for malformed JSON or an inconsistent
    /// catalog.
    pub fn from_json(json: &str) -> Result<Self> {
        let document: CatalogDocument = serde_json::from_str(json)
            .map_err(|e| LabError::catalog(format!("invalid catalog JSON: {e}")))?;
        Self::new(document.exercises)
    }

    /// Loads a catalog document from a file.
    ///
    /// # Errors
    ///
    /// Returns `LabError::CatalogError` if the file cannot be read or is
    /// inconsistent.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            LabError::catalog(format!("cannot read catalog '{}': {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Looks up an exercise by id.
    ///
    /// # Errors
    ///
    /// Returns `LabError::ExerciseNotFound` if no exercise has this id.
    pub fn get(&self, id: &str) -> Result<&Exercise> {
        self.find(id).ok_or_else(|| LabError::exercise_not_found(id))
    }

    /// Looks up an exercise by id, returning `None` if absent.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<&Exercise> {
        self.index.get(id).map(|&position| &self.exercises[position])
    }

    /// All exercises in declaration order.
    #[must_use]
    pub fn list(&self) -> &[Exercise] {
        &self.exercises
    }

    /// Number of exercises.
    #[must_use]
    pub fn len(&self) -> usize {
        self.exercises.len()
    }

    /// Returns `true` if the catalog has no exercises.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exercises.is_empty()
    }

    /// Prerequisite ids of an exercise.
    ///
    /// # Errors
    ///
    /// Returns `LabError::ExerciseNotFound` if no exercise has this id.
    pub fn prerequisites_of(&self, id: &str) -> Result<&BTreeSet<String>> {
        self.get(id).map(|exercise| &exercise.prerequisites)
    }

    /// Prerequisites of `exercise` that are not completed in `progress`.
    #[must_use]
    pub fn unmet_prerequisites<'a>(
        &self,
        exercise: &'a Exercise,
        progress: &ProgressStore,
    ) -> Vec<&'a str> {
        exercise
            .prerequisites
            .iter()
            .filter(|id| !progress.is_completed(id))
            .map(String::as_str)
            .collect()
    }

    /// Returns `true` if every prerequisite of `exercise` is completed.
    ///
    /// Vacuously true for an exercise without prerequisites.
    #[must_use]
    pub fn is_unlocked(&self, exercise: &Exercise, progress: &ProgressStore) -> bool {
        self.unmet_prerequisites(exercise, progress).is_empty()
    }

    /// Exercises grouped by category, categories in order of first appearance.
    #[must_use]
    pub fn by_category(&self) -> Vec<(&str, Vec<&Exercise>)> {
        let mut groups: Vec<(&str, Vec<&Exercise>)> = Vec::new();
        for exercise in &self.exercises {
            match groups
                .iter_mut()
                .find(|(category, _)| *category == exercise.category)
            {
                Some((_, members)) => members.push(exercise),
                None => groups.push((exercise.category.as_str(), vec![exercise])),
            }
        }
        groups
    }

    fn check_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        fn visit(catalog: &Catalog, position: usize, marks: &mut [Mark]) -> Result<()> {
            match marks[position] {
                Mark::Done => return Ok(()),
                Mark::InProgress => {
                    return Err(LabError::catalog(format!(
                        "prerequisites of '{}' form a cycle",
                        catalog.exercises[position].id
                    )));
                }
                Mark::Unvisited => {}
            }

            marks[position] = Mark::InProgress;
            for prerequisite in &catalog.exercises[position].prerequisites {
                if let Some(&next) = catalog.index.get(prerequisite) {
                    visit(catalog, next, marks)?;
                }
            }
            marks[position] = Mark::Done;
            Ok(())
        }

        let mut marks = vec![Mark::Unvisited; self.exercises.len()];
        for position in 0..self.exercises.len() {
            visit(self, position, &mut marks)?;
        }
        Ok(())
    }
}

fn is_valid_id(id: &str) -> bool {
    EXERCISE_ID.as_ref().is_some_and(|re| re.is_match(id))
}
