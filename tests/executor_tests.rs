#![cfg(unix)]


use std::sync::Arc;
use std::time::Duration;

use file_processor::config::SandboxConfig;
use file_processor::registry::{JobRecord, JobRegistry, JobStatus, JobUpdate};
use file_processor::sandbox::{host_launcher, ExecutionRequest, SandboxExecutor};
use tempfile::TempDir;

use test_harness::{fake_sandbox_config, write_fake_runtime};

struct Fixture {
    dir: TempDir,
    registry: Arc<JobRegistry>,
    executor: SandboxExecutor,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let script = write_fake_runtime(dir.path());
        Self::with_config(dir, fake_sandbox_config(&script))
    }

    fn with_config(dir: TempDir, config: SandboxConfig) -> Self {
        let registry = Arc::new(JobRegistry::new());
        let executor = SandboxExecutor::new(config, host_launcher(), registry.clone());
        Self {
            dir,
            registry,
            executor,
        }
    }

    /// Lay out files for a job and move it to `processing`, the state the
    /// executor expects to pick it up in.
    fn prepare(&self, code: &str, timeout: Duration) -> ExecutionRequest {
        let record = JobRecord::new("data.csv".to_string());
        let id = record.id;
        let root = self.dir.path().join(id.to_string());
        std::fs::create_dir_all(root.join("results")).unwrap();

        let input_path = root.join("data.csv");
        let code_path = root.join("process.py");
        let result_dir = root.join("results");
        std::fs::write(&input_path, "a,b\n1,2\n").unwrap();
        std::fs::write(&code_path, code).unwrap();

        self.registry.put(record).unwrap();
        self.registry
            .transition(
                &id,
                JobStatus::Uploaded,
                JobUpdate::status(JobStatus::Processing)
                    .with_input_path(input_path.clone())
                    .with_paths(code_path.clone(), result_dir.clone()),
            )
            .unwrap();

        ExecutionRequest {
            job_id: id,
            input_path,
            code_path,
            result_dir,
            timeout,
        }
    }
}

fn process_exists(pid: i32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

#[tokio::test]
async fn test_execute_captures_stdout_and_stderr_separately() {
    let fixture = Fixture::new();
    let request = fixture.prepare("echo hello; echo warn >&2", Duration::from_secs(10));
    let id = request.job_id;

    let status = fixture.executor.execute(request).await;
    assert_eq!(status, Some(JobStatus::Completed));

    let record = fixture.registry.get(&id).unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.stdout.as_deref(), Some("hello\n"));
    assert_eq!(record.stderr.as_deref(), Some("warn\n"));
    assert!(record.error.is_none());
}

#[tokio::test]
async fn test_execute_records_runtime_invocation() {
    let fixture = Fixture::new();
    let request = fixture.prepare("true", Duration::from_secs(10));
    let id = request.job_id;

    fixture.executor.execute(request).await;

    let cmd = fixture.registry.get(&id).unwrap().docker_cmd.unwrap();
    assert!(cmd.contains("--memory=512m"));
    assert!(cmd.contains("--cpu-shares=512"));
    assert!(cmd.contains("--stop-timeout 10"));
    assert!(cmd.contains(":/data/process.py:ro"));
    assert!(cmd.contains(":/data/input_file.csv:ro"));
    assert!(cmd.contains(":/data/output:rw"));
    assert!(cmd.contains(&format!("file-processor-{}", id)));
}

#[tokio::test]
async fn test_execute_nonzero_exit_marks_failed() {
    let fixture = Fixture::new();
    let request = fixture.prepare("echo partial; echo boom >&2; exit 3", Duration::from_secs(10));
    let id = request.job_id;

    let status = fixture.executor.execute(request).await;
    assert_eq!(status, Some(JobStatus::Failed));

    let record = fixture.registry.get(&id).unwrap();
    assert_eq!(record.error.as_deref(), Some("Exit code: 3\nStderr: boom\n"));
    assert_eq!(record.stdout.as_deref(), Some("partial\n"));
    assert_eq!(record.stderr.as_deref(), Some("boom\n"));
}

#[tokio::test]
async fn test_execute_timeout_kills_process_and_discards_output() {
    let fixture = Fixture::new();
    let request = fixture.prepare(
        "echo started; echo $$ > \"$OUTPUT_DIR/pid\"; exec sleep 30",
        Duration::from_secs(1),
    );
    let id = request.job_id;
    let pid_file = request.result_dir.join("pid");

    let start = tokio::time::Instant::now();
    let status = fixture.executor.execute(request).await;
    assert_eq!(status, Some(JobStatus::Timeout));
    assert!(start.elapsed() < Duration::from_secs(15));

    let record = fixture.registry.get(&id).unwrap();
    assert_eq!(record.status, JobStatus::Timeout);
    assert_eq!(
        record.error.as_deref(),
        Some("Execution timed out after 1 seconds")
    );
    assert!(record.stdout.is_none());
    assert!(record.stderr.is_none());

    let pid: i32 = std::fs::read_to_string(&pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(!process_exists(pid), "sandboxed process {} survived timeout", pid);
}

#[tokio::test]
async fn test_execute_launch_failure_marks_failed() {
    let dir = tempfile::tempdir().unwrap();
    let config = SandboxConfig {
        runtime: dir.path().join("no-such-runtime").display().to_string(),
        ..SandboxConfig::default()
    };
    let fixture = Fixture::with_config(dir, config);
    let request = fixture.prepare("true", Duration::from_secs(5));
    let id = request.job_id;

    let status = fixture.executor.execute(request).await;
    assert_eq!(status, Some(JobStatus::Failed));

    let record = fixture.registry.get(&id).unwrap();
    let error = record.error.unwrap();
    assert!(error.starts_with("Failed to launch sandbox runtime"), "{}", error);
    assert!(record.stdout.is_none());
}

#[tokio::test]
async fn test_execute_skips_deleted_job() {
    let fixture = Fixture::new();
    let request = fixture.prepare("touch \"$OUTPUT_DIR/launched\"", Duration::from_secs(5));
    let id = request.job_id;
    let marker = request.result_dir.join("launched");
    fixture.registry.delete(&id).unwrap();

    let status = fixture.executor.execute(request).await;
    assert_eq!(status, None);
    assert!(!marker.exists(), "sandbox launched for a deleted job");
    assert!(fixture.registry.get(&id).is_err());
}

#[tokio::test]
async fn test_execute_skips_terminal_job() {
    let fixture = Fixture::new();
    let request = fixture.prepare("touch \"$OUTPUT_DIR/launched\"", Duration::from_secs(5));
    let id = request.job_id;
    let marker = request.result_dir.join("launched");
    fixture
        .registry
        .update(&id, JobUpdate::failed("cancelled by operator"));

    let status = fixture.executor.execute(request).await;
    assert_eq!(status, Some(JobStatus::Failed));
    assert!(!marker.exists(), "sandbox launched for a finished job");

    let record = fixture.registry.get(&id).unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("cancelled by operator"));
    assert!(record.stdout.is_none());
    assert!(record.docker_cmd.is_none());
}

#[tokio::test]
async fn test_execute_reads_input_through_mount() {
    let fixture = Fixture::new();
    let request = fixture.prepare("cat \"$INPUT\"", Duration::from_secs(5));
    let id = request.job_id;

    fixture.executor.execute(request).await;
    let record = fixture.registry.get(&id).unwrap();
    assert_eq!(record.stdout.as_deref(), Some("a,b\n1,2\n"));
}

#[tokio::test]
async fn test_execute_large_output() {
    let fixture = Fixture::new();
    let request = fixture.prepare("seq 1 20000", Duration::from_secs(10));
    let id = request.job_id;

    let status = fixture.executor.execute(request).await;
    assert_eq!(status, Some(JobStatus::Completed));

    let stdout = fixture.registry.get(&id).unwrap().stdout.unwrap();
    assert_eq!(stdout.lines().count(), 20000);
}
