use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use controller_prover_interface::{ProverError, SharedRandomness};
use rstest::*;
use tempfile::TempDir;

use super::*;
use crate::error::PipelineError;
use crate::pipeline::barrier::{self, combine, BeaconRecord};
use crate::pipeline::bootstrap;
use crate::pipeline::metadata::PipelineMetadata;
use crate::pipeline::prover::DevProver;
use crate::pipeline::shared_failure::SharedFailures;
use crate::pipeline::PipelineContext;
use crate::tests::common::test_dir;
use crate::types::jobs::JobName;

fn commitment(index: usize) -> Vec<u8> {
    vec![index as u8 + 1; 32]
}

async fn bootstrapped(root: &Path, settings: LimitlessSection) -> (PipelineContext, PipelineMetadata) {
    let ctx = context(root, Arc::new(DevProver), settings);
    let metadata = bootstrap::run(&ctx, &bootstrap_request(root), &bootstrap_outputs(root)).await.unwrap();
    (ctx, metadata)
}

fn beacon_outputs(metadata: &PipelineMetadata, root: &Path) -> Vec<PathBuf> {
    vec![metadata.shared_randomness_file.clone(), root.join("beacon-record/requests").join(BEACON_RECORD_FILE)]
}

/// Publishes the commitments of `order`, one at a time.
async fn publish_commitments(metadata: &PipelineMetadata, order: &[usize]) {
    for &index in order {
        tokio::time::sleep(Duration::from_millis(20)).await;
        tokio::fs::write(&metadata.commitment_files[index], commitment(index)).await.unwrap();
    }
}

#[rstest]
#[case(vec![0, 1, 2])]
#[case(vec![2, 1, 0])]
#[case(vec![1, 2, 0])]
#[tokio::test]
async fn seed_does_not_depend_on_arrival_order(test_dir: TempDir, #[case] order: Vec<usize>) {
    let root = test_dir.path();
    let (ctx, metadata) = bootstrapped(root, settings()).await;
    let metadata_path = bootstrap_outputs(root).remove(0);
    let outputs = beacon_outputs(&metadata, root);

    let (seed, ()) =
        tokio::join!(barrier::run(&ctx, &metadata_path, &outputs), publish_commitments(&metadata, &order));
    let seed = seed.unwrap();

    let expected = combine(3, &(0..3).map(|i| (i as u32, commitment(i))).collect::<Vec<_>>());
    assert_eq!(seed, expected);
    assert_eq!(SharedRandomness::from_bytes(&std::fs::read(&outputs[0]).unwrap()).unwrap(), expected);

    let record = BeaconRecord::read(&outputs[1]).await.unwrap();
    assert_eq!((record.start_block, record.end_block, record.num_commitments), (10, 20, 3));
    assert_eq!(record.shared_randomness(), expected);
}

#[rstest]
#[tokio::test]
async fn missing_commitment_times_out(test_dir: TempDir) {
    let root = test_dir.path();
    let (ctx, metadata) = bootstrapped(root, LimitlessSection { barrier_timeout_seconds: 1, ..settings() }).await;
    publish_commitments(&metadata, &[0, 2]).await;

    let err = barrier::run(&ctx, &bootstrap_outputs(root)[0], &beacon_outputs(&metadata, root)).await.unwrap_err();

    assert_matches!(&err, PipelineError::WaitTimeout { path, .. } if *path == metadata.commitment_files[1]);
    assert_eq!(err.exit_code(), 3);
    assert!(!metadata.shared_randomness_file.exists());
}

#[rstest]
#[tokio::test]
async fn malformed_commitment_is_rejected(test_dir: TempDir) {
    let root = test_dir.path();
    let (ctx, metadata) = bootstrapped(root, settings()).await;
    publish_commitments(&metadata, &[0, 1, 2]).await;
    std::fs::write(&metadata.commitment_files[1], b"short").unwrap();

    let err = barrier::run(&ctx, &bootstrap_outputs(root)[0], &beacon_outputs(&metadata, root)).await.unwrap_err();

    assert_matches!(err, PipelineError::Prover(ProverError::InvalidArtifact(_)));
    assert!(!metadata.shared_randomness_file.exists());
}

#[rstest]
#[tokio::test]
async fn cancelled_barrier_stops_waiting(test_dir: TempDir) {
    let root = test_dir.path();
    let (ctx, metadata) = bootstrapped(root, settings()).await;
    let cancel = ctx.cancel.clone();

    let outputs = beacon_outputs(&metadata, root);
    let metadata_path = bootstrap_outputs(root).remove(0);
    let cancel_soon = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    };
    let (result, ()) = tokio::join!(barrier::run(&ctx, &metadata_path, &outputs), cancel_soon);

    assert_eq!(result.unwrap_err().exit_code(), 4);
}

#[rstest]
#[tokio::test]
async fn peer_failure_abandons_the_barrier(test_dir: TempDir) {
    let root = test_dir.path();
    let failures = SharedFailures::new(root.join("shared-failures"));
    let settings = LimitlessSection { shared_failure_dir: Some(failures.dir().to_path_buf()), ..settings() };
    let (ctx, metadata) = bootstrapped(root, settings).await;
    publish_commitments(&metadata, &[0, 2]).await;

    let outputs = beacon_outputs(&metadata, root);
    let metadata_path = bootstrap_outputs(root).remove(0);
    let fail_soon = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        failures.mark(JobName::Gl, 10, 20, 5).unwrap();
    };
    let (result, ()) = tokio::join!(barrier::run(&ctx, &metadata_path, &outputs), fail_soon);

    let err = result.unwrap_err();
    assert_matches!(&err, PipelineError::PeerFailed(marker) if marker == "10-20-gl.failure.code_5");
    assert_eq!(err.exit_code(), 7);
    assert!(!metadata.shared_randomness_file.exists());
}
