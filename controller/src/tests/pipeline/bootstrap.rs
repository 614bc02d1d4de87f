use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use controller_prover_interface::{MockDistributedProver, ModulePartition, ModuleWitness, ProverError, Segmentation};
use mockall::predicate;
use rstest::*;
use tempfile::TempDir;

use super::*;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::bootstrap::{self, FsWitnessSink, WitnessSink};
use crate::pipeline::metadata::PipelineMetadata;
use crate::pipeline::prover::DevProver;
use crate::pipeline::witness::SegmentWitness;
use crate::tests::common::{file_names, test_dir};

/// Writes through to disk and checks, whenever an LPP witness is about to be written, that every
/// GL witness is already there.
struct RecordingSink {
    gl_dir: PathBuf,
    num_gl: usize,
    written: Mutex<Vec<PathBuf>>,
    lpp_before_gl: AtomicBool,
}

impl RecordingSink {
    fn new(root: &Path, num_gl: usize) -> Self {
        Self {
            gl_dir: root.join("gl/requests"),
            num_gl,
            written: Mutex::new(Vec::new()),
            lpp_before_gl: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl WitnessSink for RecordingSink {
    async fn write(&self, path: &Path, bytes: Vec<u8>) -> PipelineResult<()> {
        if path.to_string_lossy().ends_with("_LPPWitness.bin") && file_names(&self.gl_dir).len() != self.num_gl {
            self.lpp_before_gl.store(true, Ordering::SeqCst);
        }
        // Let other writers of the same batch run first
        tokio::time::sleep(Duration::from_millis(5)).await;
        FsWitnessSink.write(path, bytes).await?;
        self.written.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

fn witnesses(class: &str, indices: &[u32]) -> Vec<ModuleWitness> {
    indices
        .iter()
        .map(|&segment_index| ModuleWitness {
            module: format!("{class}-{segment_index}"),
            segment_index,
            payload: vec![segment_index as u8],
        })
        .collect()
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gl_witnesses_are_published_before_lpp_witnesses(test_dir: TempDir) {
    let root = test_dir.path();
    let settings = LimitlessSection { num_gl_modules: 6, num_lpp_modules: 5, witness_writer_concurrency: 3, ..settings() };
    let sink = Arc::new(RecordingSink::new(root, 6));
    let ctx = context(root, Arc::new(DevProver), settings).with_sink(sink.clone());

    bootstrap::run(&ctx, &bootstrap_request(root), &bootstrap_outputs(root)).await.unwrap();

    assert!(!sink.lpp_before_gl.load(Ordering::SeqCst), "an LPP witness was written before every GL witness");
    let written = sink.written.lock().unwrap().clone();
    assert_eq!(written.len(), 11);
    let first_lpp = written.iter().position(|p| p.to_string_lossy().ends_with("_LPPWitness.bin")).unwrap();
    assert!(written[..first_lpp].iter().all(|p| p.to_string_lossy().ends_with("_GLWitness.bin")));
    assert_eq!(first_lpp, 6);
}

#[rstest]
#[tokio::test]
async fn metadata_and_witnesses_describe_the_same_conflation(test_dir: TempDir) {
    let root = test_dir.path();
    let ctx = context(root, Arc::new(DevProver), settings());
    let outputs = bootstrap_outputs(root);

    let metadata = bootstrap::run(&ctx, &bootstrap_request(root), &outputs).await.unwrap();

    assert_eq!((metadata.start_block, metadata.end_block), (10, 20));
    assert_eq!((metadata.num_gl, metadata.num_lpp), (3, 2));
    for output in &outputs {
        assert_eq!(PipelineMetadata::read(output).await.unwrap(), metadata);
    }
    assert_eq!(
        file_names(&root.join("gl/requests")),
        (0..3).map(|i| format!("10-20-etv0.1-stv0.2-seg{i}-getZkProof_GLWitness.bin")).collect::<Vec<_>>()
    );

    let gl_path = root.join("gl/requests/10-20-etv0.1-stv0.2-seg1-getZkProof_GLWitness.bin");
    let gl = SegmentWitness::read(&gl_path).await.unwrap();
    assert_eq!((gl.segment_index, gl.module.as_str()), (1, "gl-1"));
    assert_eq!(gl.shared_randomness_file, None);

    let lpp_path = root.join("lpp/requests/10-20-etv0.1-stv0.2-seg0-getZkProof_LPPWitness.bin");
    let lpp = SegmentWitness::read(&lpp_path).await.unwrap();
    assert_eq!(lpp.shared_randomness_file.as_ref(), Some(&metadata.shared_randomness_file));
}

#[rstest]
#[case::gap(vec![0, 2], vec![0])]
#[case::duplicate(vec![0, 1], vec![0, 0])]
#[case::not_from_zero(vec![1, 2], vec![0])]
#[tokio::test]
async fn segment_indices_must_be_contiguous(test_dir: TempDir, #[case] gl: Vec<u32>, #[case] lpp: Vec<u32>) {
    let root = test_dir.path();
    let mut prover = MockDistributedProver::new();
    prover
        .expect_bootstrap()
        .with(predicate::always(), predicate::eq(ModulePartition { num_gl: 3, num_lpp: 2 }))
        .times(1)
        .returning(move |_, _| Ok(Segmentation { gl: witnesses("gl", &gl), lpp: witnesses("lpp", &lpp) }));
    let ctx = context(root, Arc::new(prover), settings());

    let result = bootstrap::run(&ctx, &bootstrap_request(root), &bootstrap_outputs(root)).await;

    let err = result.unwrap_err();
    assert_matches!(err, PipelineError::Prover(ProverError::InvalidArtifact(_)));
    assert_eq!(err.exit_code(), 5);
    assert!(file_names(&root.join("gl/requests")).is_empty());
    assert!(file_names(&root.join("beacon/requests")).is_empty());
}

#[rstest]
#[tokio::test]
async fn prover_rejection_fails_the_stage(test_dir: TempDir) {
    let root = test_dir.path();
    let ctx = context(root, Arc::new(DevProver), LimitlessSection { num_gl_modules: 0, ..settings() });

    let err = bootstrap::run(&ctx, &bootstrap_request(root), &bootstrap_outputs(root)).await.unwrap_err();
    assert_matches!(err, PipelineError::Prover(ProverError::RequestInvalid(_)));
}

#[rstest]
#[tokio::test]
async fn foreign_request_name_is_invalid(test_dir: TempDir) {
    let root = test_dir.path();
    let ctx = context(root, Arc::new(DevProver), settings());
    let request = root.join("bootstrap/requests/10-20-getZkAggregatedProof.json");
    std::fs::write(&request, b"").unwrap();

    let err = bootstrap::run(&ctx, &request, &bootstrap_outputs(root)).await.unwrap_err();
    assert_eq!(err.exit_code(), 6);
}

#[rstest]
#[tokio::test]
async fn rerun_does_not_republish_witnesses_already_taken(test_dir: TempDir) {
    let root = test_dir.path();
    let ctx = context(root, Arc::new(DevProver), settings());
    let gl = |i: u32| format!("10-20-etv0.1-stv0.2-seg{i}-getZkProof_GLWitness.bin");
    let requests = root.join("gl/requests");

    bootstrap::run(&ctx, &bootstrap_request(root), &bootstrap_outputs(root)).await.unwrap();
    std::fs::rename(requests.join(gl(0)), requests.join(format!("{}.inprogress.gl-worker", gl(0)))).unwrap();
    std::fs::rename(requests.join(gl(1)), root.join("gl/requests-done").join(format!("{}.success", gl(1)))).unwrap();

    bootstrap::run(&ctx, &bootstrap_request(root), &bootstrap_outputs(root)).await.unwrap();

    assert_eq!(file_names(&requests), vec![format!("{}.inprogress.gl-worker", gl(0)), gl(2)]);
    assert_eq!(file_names(&root.join("lpp/requests")).len(), 2);
}
