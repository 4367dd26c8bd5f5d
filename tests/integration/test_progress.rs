//! Integration tests for progress persistence and reporting
//!
//! These tests exercise the on-disk progress file the way separate runs of
//! the CLI would see it, and derive reports from the stored progress.

use std::path::Path;

use chrono::{Duration, TimeZone, Utc};
use infralab_orchestrator::{
    Catalog, LabError, Persisted, ProgressFile, ProgressRecord, ProgressStatus, ProgressStore,
    POINTS_PER_EXERCISE,
};
use infralab_report::{
    json::JsonGenerator, BadgeTier, ExerciseInput, ExerciseStatus, ProgressInput, Report,
};

fn sample_store() -> ProgressStore {
    let started = Utc
        .with_ymd_and_hms(2024, 3, 1, 9, 0, 0)
        .single()
        .expect("Valid timestamp");
    let finished = started + Duration::minutes(20);

    ProgressStore::new("ada")
        .with_record(
            "hello-world",
            ProgressRecord::default().start(started).complete(finished),
        )
        .with_record("variables", ProgressRecord::default().start(finished))
}

fn input_for(catalog: &Catalog, store: &ProgressStore) -> ProgressInput {
    ProgressInput {
        user_name: store.user_name.clone(),
        exercises: catalog
            .list()
            .iter()
            .map(|exercise| {
                let record = store.record(&exercise.id);
                let status = match record.status {
                    ProgressStatus::NotStarted => ExerciseStatus::NotStarted,
                    ProgressStatus::InProgress => ExerciseStatus::InProgress,
                    ProgressStatus::Completed => ExerciseStatus::Completed,
                };
                ExerciseInput {
                    id: exercise.id.clone(),
                    name: exercise.name.clone(),
                    category: exercise.category.clone(),
                    status,
                    completed_at: record.completed_at,
                }
            })
            .collect(),
    }
}

fn leftovers(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .expect("Failed to read dir")
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name != "progress.json")
        .collect()
}

/// What one run saves, the next run loads unchanged.
#[test]
fn test_progress_survives_restart() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("nested/progress.json");
    let store = sample_store();

    let file = ProgressFile::new(&path);
    assert_eq!(file.save(&store).expect("Save should work"), Persisted::Written);

    let loaded = ProgressFile::new(&path).load();
    assert!(loaded.warning.is_none());
    assert_eq!(loaded.store, store);
    assert_eq!(loaded.store.total_score(), POINTS_PER_EXERCISE);
    assert!(leftovers(path.parent().expect("Path has a parent")).is_empty());
}

/// An invalid progress file is moved aside and replaced by an empty store.
#[test]
fn test_corrupt_progress_is_quarantined() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("progress.json");
    std::fs::write(&path, "{ this is not json").expect("Failed to write file");

    let mut file = ProgressFile::new(&path);
    let loaded = file.load();

    assert_eq!(loaded.store, ProgressStore::default());
    assert!(file.is_writable());
    let Some(LabError::PersistenceCorruption { backup, .. }) = loaded.warning else {
        unreachable!("Expected a corruption warning");
    };
    assert_eq!(
        std::fs::read_to_string(&backup).expect("Backup should exist"),
        "{ this is not json"
    );
    assert!(backup
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("progress.json.corrupt-")));

    // The next save starts a fresh file next to the backup.
    file.save(&sample_store()).expect("Save should work");
    assert_eq!(ProgressFile::new(&path).load().store, sample_store());
    assert!(backup.exists());
}

/// Interrupted writes leave temp files behind that are never read back.
#[test]
fn test_partial_write_does_not_shadow_store() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("progress.json");
    let store = sample_store();
    ProgressFile::new(&path).save(&store).expect("Save should work");

    let stale = dir.path().join(".tmpAbC123");
    std::fs::write(&stale, r#"{"userName": "mallory", "exercises": {"#)
        .expect("Failed to write file");

    let loaded = ProgressFile::new(&path).load();
    assert!(loaded.warning.is_none());
    assert_eq!(loaded.store, store);
    assert!(stale.exists());
}

/// Completed stays completed across saves and repeated completion.
#[test]
fn test_completion_is_monotonic_on_disk() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("progress.json");
    let file = ProgressFile::new(&path);
    let store = sample_store();
    file.save(&store).expect("Save should work");

    let mut reloaded = ProgressFile::new(&path).load().store;
    let record = reloaded.record("hello-world");
    let later = Utc::now();
    reloaded.set_record("hello-world", record.start(later).complete(later));
    file.save(&reloaded).expect("Save should work");

    let final_store = ProgressFile::new(&path).load().store;
    assert_eq!(final_store.record("hello-world"), record);
    assert_eq!(final_store.status("hello-world"), ProgressStatus::Completed);
    assert_eq!(final_store.total_score(), POINTS_PER_EXERCISE);
}

/// Reports are derived from stored progress over the whole catalog.
#[test]
fn test_report_from_stored_progress() {
    let catalog = Catalog::builtin().expect("Built-in catalog should load");
    let report = Report::new(&input_for(&catalog, &sample_store()));

    assert_eq!(report.user_name, "ada");
    assert_eq!(report.completed, 1);
    assert_eq!(report.total, catalog.len());
    assert_eq!(report.percentage, 12);
    assert_eq!(report.score, 100);
    assert_eq!(report.tier, BadgeTier::Novice);
    assert_eq!(report.completed_exercises.len(), 1);
    assert_eq!(report.completed_exercises[0].id, "hello-world");

    let json = JsonGenerator::new(&report)
        .generate()
        .expect("JSON should serialize");
    let value: serde_json::Value = serde_json::from_str(&json).expect("JSON should parse");
    assert_eq!(value["userName"], "ada");
    assert_eq!(value["completed"], 1);
}

/// Completing every exercise reaches the top tier.
#[test]
fn test_all_completed_is_champion() {
    let catalog = Catalog::builtin().expect("Built-in catalog should load");
    let now = Utc::now();
    let store = catalog.list().iter().fold(ProgressStore::new("grace"), |store, exercise| {
        store.with_record(&exercise.id, ProgressRecord::default().start(now).complete(now))
    });

    let report = Report::new(&input_for(&catalog, &store));
    assert_eq!(report.percentage, 100);
    assert_eq!(report.tier, BadgeTier::Champion);
    assert!(report.next_tier.is_none());
    assert_eq!(store.total_score(), 800);
}
