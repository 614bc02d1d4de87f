use std::fmt;

use async_trait::async_trait;
use mockall::automock;

/// Distributed prover provides an abstraction over the proving system used by the pipeline
/// stages. The controller treats every artifact as an opaque blob:
/// - `bootstrap` splits one conflation request into independent GL and LPP module witnesses
/// - `prove_gl` proves a GL module and returns the commitment used for the shared randomness
/// - `prove_lpp` proves an LPP module once the shared randomness of the conflation is known
/// - `conglomerate` folds every sub-proof of a conflation into the final proof
///
/// The only structure the controller relies on is the segment index of each module, which gives
/// the deterministic ordering of commitments.
#[automock]
#[async_trait]
pub trait DistributedProver: Send + Sync {
    async fn bootstrap(&self, request: &[u8], partition: &ModulePartition) -> Result<Segmentation, ProverError>;
    async fn prove_gl(&self, witness: &ModuleWitness) -> Result<GlProof, ProverError>;
    async fn prove_lpp(&self, witness: &ModuleWitness, seed: &SharedRandomness) -> Result<Vec<u8>, ProverError>;
    async fn conglomerate(
        &self,
        gl: &[SubProof],
        lpp: &[SubProof],
        seed: &SharedRandomness,
    ) -> Result<Vec<u8>, ProverError>;

    /// Deserialization hook applied to a persisted commitment before it is combined.
    fn decode_commitment(&self, raw: &[u8]) -> Result<Vec<u8>, ProverError>;
}

/// Number of GL and LPP modules a conflation is partitioned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModulePartition {
    pub num_gl: usize,
    pub num_lpp: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleWitness {
    pub module: String,
    pub segment_index: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Segmentation {
    pub gl: Vec<ModuleWitness>,
    pub lpp: Vec<ModuleWitness>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlProof {
    pub proof: Vec<u8>,
    pub commitment: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubProof {
    pub segment_index: u32,
    pub bytes: Vec<u8>,
}

/// Fiat-Shamir seed shared by every LPP module of a conflation.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SharedRandomness(pub [u8; 32]);

impl SharedRandomness {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProverError> {
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ProverError::InvalidArtifact(format!("shared randomness must be 32 bytes, got {}", bytes.len())))?;
        Ok(Self(seed))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SharedRandomness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedRandomness(0x{})", hex::encode(self.0))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProverError {
    #[error("Internal prover error: {0}")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),
    #[error("Request is invalid: {0}")]
    RequestInvalid(String),
    #[error("Proof generation failed for module {module}: {reason}")]
    ProvingFailed { module: String, reason: String },
}
