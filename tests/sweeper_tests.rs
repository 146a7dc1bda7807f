use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use file_processor::config::RetentionConfig;
use file_processor::registry::{JobRecord, JobRegistry};
use file_processor::sweeper::RetentionSweeper;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn retention(max_age: Duration, sweep_interval: Duration) -> RetentionConfig {
    RetentionConfig {
        max_age,
        sweep_interval,
    }
}

/// A job of the given age with all three artifacts on disk.
fn job_with_files(root: &Path, age: TimeDelta) -> JobRecord {
    let id = Uuid::new_v4();
    let mut record = JobRecord::with_id(id, "data.csv".to_string(), Utc::now() - age);

    let input = root.join(format!("{}_data.csv", id));
    let code = root.join(format!("{}_process.py", id));
    let results = root.join(id.to_string());
    std::fs::write(&input, "a\n1\n").unwrap();
    std::fs::write(&code, "print(1)").unwrap();
    std::fs::create_dir_all(&results).unwrap();
    std::fs::write(results.join("out.json"), "{}").unwrap();

    record.input_path = Some(input);
    record.code_path = Some(code);
    record.result_dir = Some(results);
    record
}

#[tokio::test]
async fn test_sweep_purges_old_and_keeps_young() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = Arc::new(JobRegistry::new());

    let old = job_with_files(tmp.path(), TimeDelta::days(2));
    let young = job_with_files(tmp.path(), TimeDelta::minutes(5));
    registry.put(old.clone()).unwrap();
    registry.put(young.clone()).unwrap();

    let sweeper = RetentionSweeper::new(
        registry.clone(),
        &retention(Duration::from_secs(24 * 60 * 60), Duration::from_secs(3600)),
    );
    let report = sweeper.sweep_once().await;

    assert_eq!(report.expired, 1);
    assert_eq!(report.purged, 1);
    assert_eq!(report.retained, 0);
    assert_eq!(report.artifact_failures, 0);

    assert!(registry.get(&old.id).is_err());
    assert!(!old.input_path.unwrap().exists());
    assert!(!old.code_path.unwrap().exists());
    assert!(!old.result_dir.unwrap().exists());

    assert!(registry.get(&young.id).is_ok());
    assert!(young.input_path.unwrap().exists());
    assert!(young.result_dir.unwrap().exists());
}

#[tokio::test]
async fn test_sweep_tolerates_missing_artifacts() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = Arc::new(JobRegistry::new());

    let old = job_with_files(tmp.path(), TimeDelta::days(2));
    std::fs::remove_file(old.input_path.as_ref().unwrap()).unwrap();
    std::fs::remove_dir_all(old.result_dir.as_ref().unwrap()).unwrap();
    registry.put(old.clone()).unwrap();

    // Never got past upload, so only a name and a timestamp.
    let bare = JobRecord::with_id(
        Uuid::new_v4(),
        "bare.csv".to_string(),
        Utc::now() - TimeDelta::days(5),
    );
    registry.put(bare.clone()).unwrap();

    let sweeper = RetentionSweeper::new(
        registry.clone(),
        &retention(Duration::from_secs(60), Duration::from_secs(3600)),
    );
    let report = sweeper.sweep_once().await;

    assert_eq!(report.expired, 2);
    assert_eq!(report.purged, 2);
    assert_eq!(report.artifact_failures, 0);
    assert!(registry.is_empty());
    assert!(!old.code_path.unwrap().exists());
}

#[tokio::test]
async fn test_sweep_keeps_job_until_artifacts_are_removed() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = Arc::new(JobRegistry::new());

    // A directory where the input file should be cannot go through remove_file.
    let old = job_with_files(tmp.path(), TimeDelta::days(2));
    let input = old.input_path.clone().unwrap();
    std::fs::remove_file(&input).unwrap();
    std::fs::create_dir_all(input.join("nested")).unwrap();
    registry.put(old.clone()).unwrap();

    let sweeper = RetentionSweeper::new(
        registry.clone(),
        &retention(Duration::from_secs(60), Duration::from_secs(3600)),
    );

    let report = sweeper.sweep_once().await;
    assert_eq!(report.expired, 1);
    assert_eq!(report.purged, 0);
    assert_eq!(report.retained, 1);
    assert_eq!(report.artifact_failures, 1);
    assert!(registry.get(&old.id).is_ok());
    assert!(input.exists());
    assert!(!old.code_path.as_ref().unwrap().exists());

    std::fs::remove_dir_all(&input).unwrap();
    std::fs::write(&input, "a\n1\n").unwrap();

    let report = sweeper.sweep_once().await;
    assert_eq!(report.purged, 1);
    assert_eq!(report.retained, 0);
    assert_eq!(report.artifact_failures, 0);
    assert!(registry.get(&old.id).is_err());
    assert!(!input.exists());
}

#[tokio::test]
async fn test_sweep_with_nothing_expired() {
    let registry = Arc::new(JobRegistry::new());
    registry.put(JobRecord::new("data.csv".to_string())).unwrap();

    let sweeper = RetentionSweeper::new(
        registry.clone(),
        &retention(Duration::from_secs(3600), Duration::from_secs(3600)),
    );
    let report = sweeper.sweep_once().await;

    assert_eq!(report.expired, 0);
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_sweeper_loop_purges_and_stops_on_cancel() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = Arc::new(JobRegistry::new());
    let sweeper = RetentionSweeper::new(
        registry.clone(),
        &retention(Duration::from_secs(60), Duration::from_millis(50)),
    );

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(sweeper.run(shutdown.clone()));

    // Added after the loop started, so it is picked up by a later tick.
    let old = job_with_files(tmp.path(), TimeDelta::hours(1));
    registry.put(old.clone()).unwrap();
    let young = JobRecord::new("young.csv".to_string());
    registry.put(young.clone()).unwrap();

    let start = tokio::time::Instant::now();
    while registry.get(&old.id).is_ok() {
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "sweeper never purged the old job"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(registry.get(&young.id).is_ok());

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("sweeper should stop after cancellation")
        .unwrap();
}
