use std::collections::HashMap;
use std::time::Duration;

use rstest::*;
use tempfile::TempDir;

use crate::tests::common::*;
use crate::types::jobs::template::CommandTemplate;
use crate::types::jobs::{ClassificationRules, JobName};
use crate::worker::executor::{Executor, WorkerCommands};
use crate::worker::fs_watcher::FsWatcher;
use crate::worker::transition::Transition;
use crate::worker::{Controller, ShutdownReason};

const LOCAL_ID: &str = "worker-a";

fn rules() -> ClassificationRules {
    ClassificationRules {
        defer_to_other_large_codes: [12, 137].into(),
        retry_locally_with_large_codes: [10, 77].into(),
        ..ClassificationRules::default()
    }
}

fn controller(root: &TempDir, large_mode: bool, normal: &str, large: Option<&str>, grace: Duration) -> Controller {
    let definition = definition(root.path(), JobName::Execution, large_mode);
    let commands = WorkerCommands {
        normal: CommandTemplate::parse(normal).unwrap(),
        large: large.map(|cmd| CommandTemplate::parse(cmd).unwrap()),
    };
    let executor = Executor::new(LOCAL_ID, HashMap::from([(JobName::Execution, commands)]), rules());
    Controller::new(
        FsWatcher::new(LOCAL_ID, vec![definition]),
        executor,
        vec![Duration::ZERO, Duration::from_millis(20)],
        grace,
        Duration::from_millis(50),
    )
}

fn simple_controller(root: &TempDir) -> Controller {
    controller(root, false, WORKER_CMD, None, Duration::from_secs(30))
}

#[rstest]
#[tokio::test]
async fn success_publishes_output_and_archives_request(test_dir: TempDir) {
    let name = create_request(&requests_dir(test_dir.path(), JobName::Execution), &execution_request(0, 1), 0);
    let controller = simple_controller(&test_dir);

    assert_eq!(controller.process_next().await, Some(Transition::Success));

    assert!(file_names(&requests_dir(test_dir.path(), JobName::Execution)).is_empty());
    assert_eq!(file_names(&done_dir(test_dir.path(), JobName::Execution)), vec![format!("{name}.success")]);
    assert_eq!(file_names(&responses_dir(test_dir.path(), JobName::Execution, 0)), vec!["0-1-getZkProof.json"]);
}

#[rstest]
#[tokio::test]
async fn success_drops_failure_history(test_dir: TempDir) {
    let requests = requests_dir(test_dir.path(), JobName::Execution);
    create_request(&requests, &format!("{}.failure.code_3", execution_request(0, 1)), 0);
    let controller = simple_controller(&test_dir);

    assert_eq!(controller.process_next().await, Some(Transition::Success));
    assert_eq!(
        file_names(&done_dir(test_dir.path(), JobName::Execution)),
        vec![format!("{}.success", execution_request(0, 1))]
    );
}

#[rstest]
#[tokio::test]
async fn hard_failures_accumulate_suffixes(test_dir: TempDir) {
    let requests = requests_dir(test_dir.path(), JobName::Execution);
    let name = create_request(&requests, &format!("{}.failure.code_2.failure.code_4", execution_request(0, 1)), 3);
    let controller = simple_controller(&test_dir);

    assert_eq!(controller.process_next().await, Some(Transition::Failure));

    assert_eq!(file_names(&done_dir(test_dir.path(), JobName::Execution)), vec![format!("{name}.failure.code_3")]);
    assert!(file_names(&responses_dir(test_dir.path(), JobName::Execution, 0)).is_empty());
}

#[rstest]
#[tokio::test]
async fn deferred_job_is_picked_up_by_a_large_worker(test_dir: TempDir) {
    let requests = requests_dir(test_dir.path(), JobName::Execution);
    create_request(&requests, &execution_request(0, 1), 12);
    let normal = simple_controller(&test_dir);

    assert_eq!(normal.process_next().await, Some(Transition::DeferToLarge));
    let deferred = format!("{}.large.failure.code_12", execution_request(0, 1));
    assert_eq!(file_names(&requests), vec![deferred.clone()]);
    assert!(file_names(&done_dir(test_dir.path(), JobName::Execution)).is_empty());

    // The normal worker no longer sees it, a large one does
    assert_eq!(normal.process_next().await, None);
    let large = controller(&test_dir, true, WORKER_CMD, Some(&large_worker_cmd(12)), Duration::from_secs(30));
    assert_eq!(large.process_next().await, Some(Transition::Success));
    assert_eq!(
        file_names(&done_dir(test_dir.path(), JobName::Execution)),
        vec![format!("{}.large.success", execution_request(0, 1))]
    );
}

#[rstest]
#[tokio::test]
async fn defer_code_on_a_large_job_is_a_hard_failure(test_dir: TempDir) {
    let requests = requests_dir(test_dir.path(), JobName::Execution);
    let name = create_request(&requests, &format!("{}.large", execution_request(0, 1)), 137);
    let large = controller(&test_dir, true, WORKER_CMD, None, Duration::from_secs(30));

    assert_eq!(large.process_next().await, Some(Transition::Failure));
    assert_eq!(file_names(&done_dir(test_dir.path(), JobName::Execution)), vec![format!("{name}.failure.code_137")]);
}

#[rstest]
#[tokio::test]
async fn spot_reclaim_requeues_the_active_job(test_dir: TempDir) {
    let requests = requests_dir(test_dir.path(), JobName::Execution);
    let name = create_request(&requests, &execution_request(0, 1), 0);
    let controller = controller(&test_dir, false, "touch {{out_file}}; sleep 30", None, Duration::from_secs(30));
    let state = controller.state().clone();
    let handle = controller.shutdown_handle();

    let running = tokio::spawn(controller.run());
    assert!(eventually(Duration::from_secs(5), || state.has_active()).await, "job never started");

    handle.request(ShutdownReason::SpotReclaim);
    let reason = tokio::time::timeout(Duration::from_secs(10), running).await.unwrap().unwrap();

    assert_eq!(reason, Some(ShutdownReason::SpotReclaim));
    assert_eq!(file_names(&requests), vec![name]);
    assert!(file_names(&done_dir(test_dir.path(), JobName::Execution)).is_empty());
    assert!(file_names(&responses_dir(test_dir.path(), JobName::Execution, 0)).is_empty());
}

#[rstest]
#[tokio::test]
async fn graceful_shutdown_lets_the_active_job_finish(test_dir: TempDir) {
    let requests = requests_dir(test_dir.path(), JobName::Execution);
    let first = create_request(&requests, &execution_request(0, 1), 0);
    let second = create_request(&requests, &execution_request(1, 2), 0);
    let cmd = format!("sleep 0.3\n{WORKER_CMD}");
    let controller = controller(&test_dir, false, &cmd, None, Duration::from_secs(30));
    let state = controller.state().clone();
    let handle = controller.shutdown_handle();

    let running = tokio::spawn(controller.run());
    assert!(eventually(Duration::from_secs(5), || state.has_active()).await, "job never started");
    handle.request(ShutdownReason::Graceful);
    let reason = tokio::time::timeout(Duration::from_secs(10), running).await.unwrap().unwrap();

    assert_eq!(reason, Some(ShutdownReason::Graceful));
    assert_eq!(file_names(&done_dir(test_dir.path(), JobName::Execution)), vec![format!("{first}.success")]);
    // No new job is picked once shutdown started
    assert_eq!(file_names(&requests), vec![second]);
}

#[rstest]
#[tokio::test]
async fn grace_period_expiry_kills_and_requeues(test_dir: TempDir) {
    let requests = requests_dir(test_dir.path(), JobName::Execution);
    let name = create_request(&requests, &execution_request(0, 1), 0);
    let controller = controller(&test_dir, false, "sleep 30", None, Duration::from_millis(200));
    let state = controller.state().clone();
    let handle = controller.shutdown_handle();

    let running = tokio::spawn(controller.run());
    assert!(eventually(Duration::from_secs(5), || state.has_active()).await, "job never started");
    handle.request(ShutdownReason::Graceful);
    let reason = tokio::time::timeout(Duration::from_secs(10), running).await.unwrap().unwrap();

    assert_eq!(reason, Some(ShutdownReason::Graceful));
    assert_eq!(file_names(&requests), vec![name]);
}

#[rstest]
#[tokio::test]
async fn idle_controller_stops_promptly(test_dir: TempDir) {
    let controller = controller(&test_dir, false, WORKER_CMD, None, Duration::from_secs(30));
    let handle = controller.shutdown_handle();

    let running = tokio::spawn(controller.run());
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.request(ShutdownReason::Graceful);

    let reason = tokio::time::timeout(Duration::from_secs(2), running).await.unwrap().unwrap();
    assert_eq!(reason, Some(ShutdownReason::Graceful));
}
