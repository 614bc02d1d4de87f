//! Every stage run in dependency order over the files of one conflation.

use std::sync::Arc;

use rstest::*;
use tempfile::TempDir;

use super::*;
use crate::pipeline::prover::DevProver;
use crate::pipeline::{bootstrap, run_stage, Stage};
use crate::tests::common::{file_names, test_dir};

#[rstest]
#[tokio::test]
async fn stages_chain_into_the_final_proof(test_dir: TempDir) {
    let root = test_dir.path();
    let ctx = context(root, Arc::new(DevProver), settings());
    let request = bootstrap_request(root);
    let metadata_files = bootstrap_outputs(root);

    run_stage(&ctx, Stage::Bootstrap, &[request], &metadata_files).await.unwrap();
    let metadata = crate::pipeline::metadata::PipelineMetadata::read(&metadata_files[0]).await.unwrap();

    for (index, witness) in file_names(&root.join("gl/requests")).iter().enumerate() {
        let outputs = [metadata.gl_subproof_files[index].clone(), metadata.commitment_files[index].clone()];
        run_stage(&ctx, Stage::Gl, &[root.join("gl/requests").join(witness)], &outputs).await.unwrap();
    }

    let record = root.join("beacon-record/requests").join(BEACON_RECORD_FILE);
    let beacon_outputs = [metadata.shared_randomness_file.clone(), record.clone()];
    run_stage(&ctx, Stage::Beacon, &metadata_files[..1], &beacon_outputs).await.unwrap();

    for (index, witness) in file_names(&root.join("lpp/requests")).iter().enumerate() {
        let outputs = [metadata.lpp_subproof_files[index].clone()];
        run_stage(&ctx, Stage::Lpp, &[root.join("lpp/requests").join(witness)], &outputs).await.unwrap();
    }

    let response = root.join("responses/10-20-getZkProof.json");
    run_stage(&ctx, Stage::Conglomerate, &[metadata_files[1].clone(), record], &[response.clone()]).await.unwrap();

    let proof: serde_json::Value = serde_json::from_slice(&std::fs::read(&response).unwrap()).unwrap();
    assert_eq!(proof["numGl"], 3);
    assert_eq!(proof["numLpp"], 2);
    let seed = std::fs::read(&metadata.shared_randomness_file).unwrap();
    assert_eq!(proof["sharedRandomness"], format!("0x{}", hex::encode(seed)));
}

#[rstest]
#[tokio::test]
async fn chain_is_deterministic(test_dir: TempDir) {
    let root = test_dir.path();
    let mut seeds = Vec::new();
    for run in 0..2 {
        let run_root = root.join(format!("run-{run}"));
        let ctx = context(&run_root, Arc::new(DevProver), settings());
        let metadata = bootstrap::run(&ctx, &bootstrap_request(&run_root), &bootstrap_outputs(&run_root)).await.unwrap();
        for (index, witness) in file_names(&run_root.join("gl/requests")).iter().enumerate().rev() {
            let outputs = [metadata.gl_subproof_files[index].clone(), metadata.commitment_files[index].clone()];
            run_stage(&ctx, Stage::Gl, &[run_root.join("gl/requests").join(witness)], &outputs).await.unwrap();
        }
        let outputs = [metadata.shared_randomness_file.clone(), run_root.join("beacon-record/requests/record.bin")];
        run_stage(&ctx, Stage::Beacon, &bootstrap_outputs(&run_root)[..1], &outputs).await.unwrap();
        seeds.push(std::fs::read(&metadata.shared_randomness_file).unwrap());
    }
    assert_eq!(seeds[0], seeds[1]);
}

#[rstest]
#[case(Stage::Gl, 1, 1)]
#[case(Stage::Beacon, 1, 1)]
#[case(Stage::Conglomerate, 1, 1)]
#[case(Stage::Bootstrap, 2, 2)]
#[tokio::test]
async fn wrong_arity_is_an_invalid_request(
    test_dir: TempDir,
    #[case] stage: Stage,
    #[case] inputs: usize,
    #[case] outputs: usize,
) {
    let ctx = context(test_dir.path(), Arc::new(DevProver), settings());
    let inputs = vec![test_dir.path().join("in"); inputs];
    let outputs = vec![test_dir.path().join("out"); outputs];

    let err = run_stage(&ctx, stage, &inputs, &outputs).await.unwrap_err();
    assert_eq!(err.exit_code(), 6);
}
