//! Durable per-user progress.
//!
//! [`ProgressStore`] is the in-memory record of every exercise's status and
//! timestamps. [`ProgressFile`] loads it from disk with corruption recovery
//! and saves it atomically: the new content is written to a temporary file in
//! the same directory, synced, then renamed over the old file, so a crash can
//! never leave a truncated progress file behind.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{LabError, Result};

/// Points awarded per completed exercise.
pub const POINTS_PER_EXERCISE: u32 = 100;

// ============================================================================
// ProgressStatus
// ============================================================================

/// Status of one exercise for the current user.
///
/// Transitions only move forward (`NotStarted` -> `InProgress` ->
/// `Completed`); the only way back is an explicit reset of the whole store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProgressStatus {
    /// Never entered.
    #[default]
    NotStarted,
    /// Entered but not yet validated.
    InProgress,
    /// Validated (or confirmed) as complete.
    Completed,
}

impl std::fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::NotStarted => "not started",
            Self::InProgress => "in progress",
            Self::Completed => "completed",
        };
        f.write_str(label)
    }
}

// ============================================================================
// ProgressRecord
// ============================================================================

/// Status and timestamps of one exercise.
///
/// Records are values: transitions return a new record and leave the
/// original untouched.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use infralab_orchestrator::{ProgressRecord, ProgressStatus};
///
/// let now = Utc::now();
/// let done = ProgressRecord::default().start(now).complete(now);
/// assert_eq!(done.status, ProgressStatus::Completed);
///
/// // Completed records never move back.
/// assert_eq!(done.start(now), done);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    /// Current status.
    #[serde(default)]
    pub status: ProgressStatus,

    /// When the exercise was first entered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When the exercise was completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProgressRecord {
    /// Returns the record after entering the exercise.
    ///
    /// Sets `started_at` if it is not set yet. A completed record is returned
    /// unchanged.
    #[must_use]
    pub fn start(&self, now: DateTime<Utc>) -> Self {
        match self.status {
            ProgressStatus::Completed => self.clone(),
            ProgressStatus::NotStarted | ProgressStatus::InProgress => Self {
                status: ProgressStatus::InProgress,
                started_at: Some(self.started_at.unwrap_or(now)),
                completed_at: None,
            },
        }
    }

    /// Returns the record after a successful validation.
    ///
    /// An already completed record keeps its original completion time.
    #[must_use]
    pub fn complete(&self, now: DateTime<Utc>) -> Self {
        match self.status {
            ProgressStatus::Completed => self.clone(),
            ProgressStatus::NotStarted | ProgressStatus::InProgress => Self {
                status: ProgressStatus::Completed,
                started_at: Some(self.started_at.unwrap_or(now)),
                completed_at: Some(now),
            },
        }
    }

    /// Returns `true` if the exercise is completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == ProgressStatus::Completed
    }
}

// ============================================================================
// ProgressStore
// ============================================================================

/// The full persisted progress of one user.
///
/// Missing records read as `NotStarted`. `total_score` is a cache of
/// `100 x completed`; it is recomputed on every change and on load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgressStore {
    /// Display name, set once on first run.
    pub user_name: String,

    total_score: u32,

    records: BTreeMap<String, ProgressRecord>,
}

impl ProgressStore {
    /// Creates an empty store for the given user.
    #[must_use]
    pub fn new(user_name: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            ..Self::default()
        }
    }

    /// Record of an exercise, `NotStarted` if there is none.
    #[must_use]
    pub fn record(&self, id: &str) -> ProgressRecord {
        self.records.get(id).cloned().unwrap_or_default()
    }

    /// Status of an exercise.
    #[must_use]
    pub fn status(&self, id: &str) -> ProgressStatus {
        self.records
            .get(id)
            .map_or(ProgressStatus::NotStarted, |record| record.status)
    }

    /// Returns `true` if the exercise is completed.
    #[must_use]
    pub fn is_completed(&self, id: &str) -> bool {
        self.status(id) == ProgressStatus::Completed
    }

    /// All stored records, ordered by exercise id.
    pub fn records(&self) -> impl Iterator<Item = (&str, &ProgressRecord)> {
        self.records.iter().map(|(id, record)| (id.as_str(), record))
    }

    /// Replaces the record of an exercise and refreshes the score.
    pub fn set_record(&mut self, id: impl Into<String>, record: ProgressRecord) {
        self.records.insert(id.into(), record);
        self.recompute_score();
    }

    /// Returns a copy of this store with one record replaced.
    #[must_use]
    pub fn with_record(&self, id: impl Into<String>, record: ProgressRecord) -> Self {
        let mut next = self.clone();
        next.set_record(id, record);
        next
    }

    /// Returns a copy of this store with the user name set.
    #[must_use]
    pub fn with_user_name(&self, user_name: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            ..self.clone()
        }
    }

    /// Number of completed exercises.
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.records.values().filter(|r| r.is_completed()).count()
    }

    /// The cached total score.
    #[must_use]
    pub const fn total_score(&self) -> u32 {
        self.total_score
    }

    /// The score derived from the records.
    #[must_use]
    pub fn score(&self) -> u32 {
        u32::try_from(self.completed_count())
            .unwrap_or(u32::MAX)
            .saturating_mul(POINTS_PER_EXERCISE)
    }

    fn recompute_score(&mut self) {
        self.total_score = self.score();
    }

    /// The in-progress exercise that was started most recently.
    #[must_use]
    pub fn last_in_progress(&self) -> Option<&str> {
        self.last_in_progress_where(|_| true)
    }

    /// The most recently started in-progress exercise among those `keep`
    /// accepts. Records `keep` rejects never shadow older ones.
    #[must_use]
    pub fn last_in_progress_where(&self, keep: impl Fn(&str) -> bool) -> Option<&str> {
        self.records
            .iter()
            .filter(|(id, record)| record.status == ProgressStatus::InProgress && keep(id))
            .max_by_key(|(_, record)| record.started_at)
            .map(|(id, _)| id.as_str())
    }

    /// The first completed record that carries no completion time.
    fn undated_completion(&self) -> Option<&str> {
        self.records
            .iter()
            .find(|(_, record)| record.is_completed() && record.completed_at.is_none())
            .map(|(id, _)| id.as_str())
    }
}

// ============================================================================
// ProgressFile
// ============================================================================

/// What happened to a save request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persisted {
    /// The store was written to disk.
    Written,
    /// The file was unreadable at load; nothing was written.
    MemoryOnly,
}

/// Result of loading the progress file.
#[derive(Debug)]
pub struct LoadedProgress {
    /// The loaded store, or an empty one.
    pub store: ProgressStore,
    /// Set when the file could not be used as is.
    pub warning: Option<LabError>,
}

/// Location of the progress file and whether it may be written.
#[derive(Debug, Clone)]
pub struct ProgressFile {
    path: PathBuf,
    writable: bool,
}

impl ProgressFile {
    /// Creates a handle for the given path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writable: true,
        }
    }

    /// Path of the progress file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `false` once the session runs memory-only.
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.writable
    }

    /// Loads the store. Never fails.
    ///
    /// - A missing file yields an empty store.
    /// - A file that is not valid progress JSON, or that holds a completed
    ///   record without `completedAt`, is renamed to
    ///   `<name>.corrupt-<timestamp>` and an empty store is returned with a
    ///   [`LabError::PersistenceCorruption`] warning.
    /// - A file that cannot be read, or a corrupt file that cannot be moved
    ///   aside, switches this handle to memory-only so the file is never
    ///   overwritten.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn load(&mut self) -> LoadedProgress {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No progress file yet; starting fresh");
                return LoadedProgress {
                    store: ProgressStore::default(),
                    warning: None,
                };
            }
            Err(e) => {
                warn!(error = %e, "Progress file unreadable; running memory-only");
                self.writable = false;
                return LoadedProgress {
                    store: ProgressStore::default(),
                    warning: Some(LabError::PersistenceReadFailure {
                        path: self.path.clone(),
                        message: e.to_string(),
                    }),
                };
            }
        };

        match serde_json::from_str::<ProgressStore>(&content) {
            Ok(mut store) => {
                if let Some(id) = store.undated_completion() {
                    let message = format!("record '{id}' is Completed without completedAt");
                    return LoadedProgress {
                        store: ProgressStore::default(),
                        warning: Some(self.quarantine(&message)),
                    };
                }

                store.recompute_score();
                debug!(
                    user = %store.user_name,
                    completed = store.completed_count(),
                    "Progress loaded"
                );
                LoadedProgress {
                    store,
                    warning: None,
                }
            }
            Err(parse_error) => LoadedProgress {
                store: ProgressStore::default(),
                warning: Some(self.quarantine(&parse_error.to_string())),
            },
        }
    }

    /// Moves a corrupt progress file aside.
    fn quarantine(&mut self, message: &str) -> LabError {
        let backup = self.backup_path();
        match std::fs::rename(&self.path, &backup) {
            Ok(()) => {
                warn!(backup = %backup.display(), error = %message, "Corrupt progress file preserved");
                LabError::PersistenceCorruption {
                    path: self.path.clone(),
                    backup,
                    message: message.to_string(),
                }
            }
            Err(e) => {
                warn!(error = %e, "Could not preserve corrupt progress file; running memory-only");
                self.writable = false;
                LabError::PersistenceReadFailure {
                    path: self.path.clone(),
                    message: format!("{message}; moving it aside failed: {e}"),
                }
            }
        }
    }

    fn backup_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let name = self
            .path
            .file_name()
            .map_or_else(|| "progress.json".into(), |n| n.to_string_lossy().into_owned());

        let mut candidate = self.path.with_file_name(format!("{name}.corrupt-{stamp}"));
        let mut n = 1;
        while candidate.exists() {
            candidate = self
                .path
                .with_file_name(format!("{name}.corrupt-{stamp}-{n}"));
            n += 1;
        }
        candidate
    }

    /// Saves the store atomically.
    ///
    /// The store is written to a temporary file next to the target, synced,
    /// then renamed over it. A memory-only handle writes nothing and
    /// returns [`Persisted::MemoryOnly`].
    ///
    /// # Arguments
    ///
    /// * `store` - The progress to persist, score included.
    ///
    /// # Example
    ///
    /// ```rust
    /// use infralab_orchestrator::{Persisted, ProgressFile, ProgressStore};
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let file = ProgressFile::new(dir.path().join("progress.json"));
    ///
    /// let store = ProgressStore::new("ada");
    /// assert_eq!(file.save(&store).unwrap(), Persisted::Written);
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`LabError::PersistenceWriteFailure`] if any step fails. The
    /// previous file is then unchanged.
    #[instrument(skip(self, store), fields(path = %self.path.display()))]
    pub fn save(&self, store: &ProgressStore) -> Result<Persisted> {
        if !self.writable {
            debug!("Memory-only session; save skipped");
            return Ok(Persisted::MemoryOnly);
        }

        let fail = |e: &dyn std::fmt::Display| LabError::persistence_write(&self.path, e.to_string());

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| fail(&e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| fail(&e))?;
        serde_json::to_writer_pretty(&mut tmp, store).map_err(|e| fail(&e))?;
        tmp.write_all(b"\n").map_err(|e| fail(&e))?;
        tmp.as_file().sync_all().map_err(|e| fail(&e))?;
        tmp.persist(&self.path).map_err(|e| fail(&e.error))?;

        info!(score = store.total_score(), "Progress saved");
        Ok(Persisted::Written)
    }
}

// ============================================================================
// Tests
// ============================================================================
