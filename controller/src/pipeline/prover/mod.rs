pub mod dev;

use std::sync::Arc;

use controller_prover_interface::DistributedProver;

use crate::config::ProverMode;

pub use dev::DevProver;

pub fn build_prover(mode: ProverMode) -> Arc<dyn DistributedProver> {
    match mode {
        ProverMode::Dev => Arc::new(DevProver),
    }
}
