use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use controller_prover_interface::{DistributedProver, ModuleWitness, SharedRandomness};
use rstest::*;
use tempfile::TempDir;

use super::*;
use crate::error::PipelineError;
use crate::pipeline::barrier::BeaconRecord;
use crate::pipeline::metadata::PipelineMetadata;
use crate::pipeline::prover::DevProver;
use crate::pipeline::witness::SegmentWitness;
use crate::pipeline::{bootstrap, conglomeration, lpp, PipelineContext};
use crate::tests::common::test_dir;

const LPP_WITNESS: &str = "lpp/requests/10-20-etv0.1-stv0.2-seg1-getZkProof_LPPWitness.bin";
const SEED: [u8; 32] = [9; 32];

async fn bootstrapped(root: &Path, settings: LimitlessSection) -> (PipelineContext, PipelineMetadata) {
    let ctx = context(root, Arc::new(DevProver), settings);
    let metadata = bootstrap::run(&ctx, &bootstrap_request(root), &bootstrap_outputs(root)).await.unwrap();
    (ctx, metadata)
}

#[rstest]
#[tokio::test]
async fn lpp_waits_for_the_shared_randomness(test_dir: TempDir) {
    let root = test_dir.path();
    let (ctx, metadata) = bootstrapped(root, settings()).await;
    let output = root.join("lpp/responses/out.bin");
    let witness_path = root.join(LPP_WITNESS);
    let outputs = [output.clone()];

    let publish_seed = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!output.exists(), "LPP proved before the randomness was published");
        tokio::fs::write(&metadata.shared_randomness_file, SEED).await.unwrap();
    };
    let (result, ()) = tokio::join!(lpp::run(&ctx, &witness_path, &outputs), publish_seed);
    result.unwrap();

    let witness = SegmentWitness::read(&witness_path).await.unwrap();
    let expected = DevProver.prove_lpp(&witness.module_witness(), &SharedRandomness(SEED)).await.unwrap();
    assert_eq!(std::fs::read(&output).unwrap(), expected);
}

#[rstest]
#[tokio::test]
async fn lpp_gives_up_when_randomness_never_comes(test_dir: TempDir) {
    let root = test_dir.path();
    let (ctx, metadata) = bootstrapped(root, LimitlessSection { randomness_timeout_seconds: 1, ..settings() }).await;
    let output = root.join("lpp/responses/out.bin");

    let err = lpp::run(&ctx, &root.join(LPP_WITNESS), &[output.clone()]).await.unwrap_err();

    assert_matches!(&err, PipelineError::WaitTimeout { path, .. } if *path == metadata.shared_randomness_file);
    assert_eq!(err.exit_code(), 3);
    assert!(!output.exists());
}

#[rstest]
#[tokio::test]
async fn lpp_witness_must_name_its_randomness(test_dir: TempDir) {
    let root = test_dir.path();
    let ctx = context(root, Arc::new(DevProver), settings());
    let witness = root.join(LPP_WITNESS);
    let module = ModuleWitness { module: "lpp-1".to_string(), segment_index: 1, payload: vec![1] };
    std::fs::write(&witness, SegmentWitness::new(10, 20, module, None).to_bytes().unwrap()).unwrap();

    let err = lpp::run(&ctx, &witness, &[root.join("lpp/responses/out.bin")]).await.unwrap_err();
    assert_eq!(err.exit_code(), 6);
}

#[rstest]
#[tokio::test]
async fn conglomeration_rejects_a_record_of_another_range(test_dir: TempDir) {
    let root = test_dir.path();
    let (ctx, _) = bootstrapped(root, settings()).await;
    let record_path = root.join("beacon-record/requests").join(BEACON_RECORD_FILE);
    let record = BeaconRecord { start_block: 20, end_block: 30, num_commitments: 3, shared_randomness: SEED };
    std::fs::write(&record_path, bincode::serialize(&record).unwrap()).unwrap();

    let metadata_path = root.join("conglomeration/requests").join(METADATA_FILE);
    let err = conglomeration::run(&ctx, &metadata_path, &record_path, &[root.join("responses/out.json")])
        .await
        .unwrap_err();
    assert_matches!(err, PipelineError::InvalidRequest(_));
}

#[rstest]
#[tokio::test]
async fn conglomeration_times_out_on_a_missing_subproof(test_dir: TempDir) {
    let root = test_dir.path();
    let (ctx, metadata) = bootstrapped(root, LimitlessSection { conglomeration_timeout_seconds: 1, ..settings() }).await;
    let record_path = root.join("beacon-record/requests").join(BEACON_RECORD_FILE);
    let record = BeaconRecord { start_block: 10, end_block: 20, num_commitments: 3, shared_randomness: SEED };
    std::fs::write(&record_path, bincode::serialize(&record).unwrap()).unwrap();
    for path in metadata.gl_subproof_files.iter().chain(&metadata.lpp_subproof_files).skip(1) {
        std::fs::write(path, b"proof").unwrap();
    }

    let metadata_path = root.join("conglomeration/requests").join(METADATA_FILE);
    let err = conglomeration::run(&ctx, &metadata_path, &record_path, &[root.join("responses/out.json")])
        .await
        .unwrap_err();
    assert_matches!(&err, PipelineError::WaitTimeout { path, .. } if *path == metadata.gl_subproof_files[0]);
}
