use async_trait::async_trait;
use controller_prover_interface::{
    DistributedProver, GlProof, ModulePartition, ModuleWitness, ProverError, Segmentation, SharedRandomness, SubProof,
};
use sha3::{Digest, Keccak256};

/// Deterministic stand-in for the proving system. Every artifact is a Keccak-256 digest of its
/// inputs, so the pipeline can run end to end and tests can predict every byte.
#[derive(Debug, Clone, Copy, Default)]
pub struct DevProver;

fn digest(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}

fn modules(request: &[u8], class: &str, count: usize) -> Vec<ModuleWitness> {
    (0..count as u32)
        .map(|segment_index| ModuleWitness {
            module: format!("{class}-{segment_index}"),
            segment_index,
            payload: digest(&[request, class.as_bytes(), &segment_index.to_le_bytes()]),
        })
        .collect()
}

#[async_trait]
impl DistributedProver for DevProver {
    async fn bootstrap(&self, request: &[u8], partition: &ModulePartition) -> Result<Segmentation, ProverError> {
        if partition.num_gl == 0 {
            return Err(ProverError::RequestInvalid("at least one GL module is required".to_string()));
        }
        Ok(Segmentation { gl: modules(request, "gl", partition.num_gl), lpp: modules(request, "lpp", partition.num_lpp) })
    }

    async fn prove_gl(&self, witness: &ModuleWitness) -> Result<GlProof, ProverError> {
        Ok(GlProof {
            proof: digest(&[b"gl-proof", &witness.payload]),
            commitment: digest(&[b"gl-commitment", &witness.payload]),
        })
    }

    async fn prove_lpp(&self, witness: &ModuleWitness, seed: &SharedRandomness) -> Result<Vec<u8>, ProverError> {
        Ok(digest(&[b"lpp-proof", &witness.payload, seed.as_bytes()]))
    }

    async fn conglomerate(
        &self,
        gl: &[SubProof],
        lpp: &[SubProof],
        seed: &SharedRandomness,
    ) -> Result<Vec<u8>, ProverError> {
        let mut parts: Vec<&[u8]> = vec![&b"conglomeration"[..], &seed.as_bytes()[..]];
        parts.extend(gl.iter().chain(lpp).map(|p| p.bytes.as_slice()));
        let response = serde_json::json!({
            "proof": format!("0x{}", hex::encode(digest(&parts))),
            "numGl": gl.len(),
            "numLpp": lpp.len(),
            "sharedRandomness": format!("0x{}", hex::encode(seed.as_bytes())),
        });
        serde_json::to_vec_pretty(&response).map_err(|e| ProverError::Internal(Box::new(e)))
    }

    fn decode_commitment(&self, raw: &[u8]) -> Result<Vec<u8>, ProverError> {
        if raw.len() != 32 {
            return Err(ProverError::InvalidArtifact(format!("commitment must be 32 bytes, got {}", raw.len())));
        }
        Ok(raw.to_vec())
    }
}
