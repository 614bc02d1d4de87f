use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use rstest::*;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::tests::common::*;
use crate::types::jobs::template::CommandTemplate;
use crate::types::jobs::{ClassificationRules, Job, JobName};
use crate::worker::executor::{Executor, WorkerCommands};
use crate::worker::fs_watcher::FsWatcher;

const LOCAL_ID: &str = "worker-a";

fn rules() -> ClassificationRules {
    ClassificationRules {
        defer_to_other_large_codes: [12, 137].into(),
        retry_locally_with_large_codes: [10, 77].into(),
        ..ClassificationRules::default()
    }
}

fn executor(name: JobName, normal: &str, large: Option<&str>) -> Executor {
    let commands = WorkerCommands {
        normal: CommandTemplate::parse(normal).unwrap(),
        large: large.map(|cmd| CommandTemplate::parse(cmd).unwrap()),
    };
    Executor::new(LOCAL_ID, HashMap::from([(name, commands)]), rules())
}

fn locked_job(root: &Path, name: JobName, large_mode: bool, file_name: &str, exit_code: i32) -> Job {
    let definition = definition(root, name, large_mode);
    create_request(&requests_dir(root, name), file_name, exit_code);
    FsWatcher::new(LOCAL_ID, vec![definition]).get_best().expect("the request should be lockable")
}

#[rstest]
#[case(0)]
#[case(2)]
#[case(12)]
#[case(137)]
#[tokio::test]
async fn exit_code_is_reported_as_is(test_dir: TempDir, #[case] exit_code: i32) {
    let job = locked_job(test_dir.path(), JobName::Execution, false, &execution_request(0, 1), exit_code);
    let executor = executor(JobName::Execution, WORKER_CMD, Some(&large_worker_cmd(10)));

    let status = executor.run(&job, &CancellationToken::new()).await;

    assert_eq!(status.exit_code, exit_code);
    let tmp_output = &job.tmp_output_paths(LOCAL_ID)[0];
    assert_eq!(tmp_output.exists(), exit_code == 0);
}

#[rstest]
#[case(77, 67)]
#[case(10, 0)]
#[tokio::test]
async fn retry_code_reruns_the_large_command(test_dir: TempDir, #[case] first: i32, #[case] expected: i32) {
    let job = locked_job(test_dir.path(), JobName::Execution, false, &execution_request(0, 1), first);
    let executor = executor(JobName::Execution, WORKER_CMD, Some(&large_worker_cmd(10)));

    let status = executor.run(&job, &CancellationToken::new()).await;

    assert_eq!(status.exit_code, expected);
}

#[rstest]
#[tokio::test]
async fn no_local_retry_without_large_command(test_dir: TempDir) {
    let job = locked_job(test_dir.path(), JobName::Execution, false, &execution_request(0, 1), 77);
    let executor = executor(JobName::Execution, WORKER_CMD, None);

    assert_eq!(executor.run(&job, &CancellationToken::new()).await.exit_code, 77);
}

#[rstest]
#[tokio::test]
async fn no_local_retry_for_job_types_that_cannot_escalate(test_dir: TempDir) {
    let job = locked_job(test_dir.path(), JobName::Compression, false, &compression_request(0, 2), 10);
    let executor = executor(JobName::Compression, WORKER_CMD, Some(&large_worker_cmd(10)));

    assert_eq!(executor.run(&job, &CancellationToken::new()).await.exit_code, 10);
}

#[rstest]
#[tokio::test]
async fn large_job_runs_the_large_command_once(test_dir: TempDir) {
    let name = format!("{}.large", execution_request(0, 1));
    let job = locked_job(test_dir.path(), JobName::Execution, true, &name, 22);
    let executor = executor(JobName::Execution, WORKER_CMD, Some(&large_worker_cmd(12)));

    // 22 - 12 is in the retry set, but a large job is never retried
    assert_eq!(executor.run(&job, &CancellationToken::new()).await.exit_code, 10);
}

#[rstest]
#[tokio::test]
async fn command_placeholders_are_rendered(test_dir: TempDir) {
    let job = locked_job(test_dir.path(), JobName::Aggregation, false, &aggregation_request(3, 7), 0);
    let executor = executor(JobName::Aggregation, r#"echo "{{job}} {{start}} {{end}}" > {{out_file_0}}"#, None);

    assert_eq!(executor.run(&job, &CancellationToken::new()).await.exit_code, 0);
    let written = std::fs::read_to_string(&job.tmp_output_paths(LOCAL_ID)[0]).unwrap();
    assert_eq!(written.trim(), "aggregation 3 7");
}

#[rstest]
#[tokio::test]
async fn process_killed_by_signal_reports_shell_convention(test_dir: TempDir) {
    let job = locked_job(test_dir.path(), JobName::Execution, false, &execution_request(0, 1), 0);
    let executor = executor(JobName::Execution, "kill -9 $$", None);

    assert_eq!(executor.run(&job, &CancellationToken::new()).await.exit_code, 137);
}

#[rstest]
#[tokio::test]
async fn cancellation_kills_the_command(test_dir: TempDir) {
    let job = locked_job(test_dir.path(), JobName::Execution, false, &execution_request(0, 1), 0);
    let executor = executor(JobName::Execution, "sleep 30", None);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });
    let status = tokio::time::timeout(Duration::from_secs(10), executor.run(&job, &cancel))
        .await
        .expect("the command should have been killed");

    assert_eq!(status.exit_code, rules().killed_by_scheduler_code);
}
