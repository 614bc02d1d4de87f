use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::pipeline::Stage;

#[derive(Parser, Debug)]
#[command(
    name = "controller",
    about = "Prover controller - filesystem-mediated scheduling of proof jobs",
    long_about = "The controller polls shared request directories, locks one job at a time by renaming its \
    request files and runs the configured worker command on it.\n\n\
    Pipeline stages of the distributed prover are run as worker commands through the `stage` subcommand.",
    after_help = "Examples:\n  \
    controller run --config /etc/prover/controller.yaml\n  \
    controller run --config controller.yaml --local-id worker-7\n  \
    controller stage gl --config controller.yaml --in witness.bin --out proof.bin --out commitment.bin"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the controller loop
    Run {
        #[command(flatten)]
        run_command: RunCmd,
    },
    /// Run one stage of the distributed proving pipeline
    Stage {
        #[command(flatten)]
        stage_command: StageCmd,
    },
}

#[derive(Parser, Debug, Clone)]
pub struct RunCmd {
    /// Path to the YAML configuration file
    #[arg(long = "config", short = 'c', env = "CONTROLLER_CONFIG", value_name = "PATH")]
    pub config_file: PathBuf,

    /// Overrides `controller.local_id` from the configuration
    #[arg(long, env = "CONTROLLER_LOCAL_ID")]
    pub local_id: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct StageCmd {
    /// Pipeline stage to run
    #[arg(value_enum)]
    pub stage: Stage,

    /// Path to the YAML configuration file shared with the controller
    #[arg(long = "config", short = 'c', env = "CONTROLLER_CONFIG", value_name = "PATH")]
    pub config_file: PathBuf,

    /// Input files, in the order of the job type inputs
    #[arg(long = "in", value_name = "PATH", required = true)]
    pub inputs: Vec<PathBuf>,

    /// Output files, in the order of the job type outputs
    #[arg(long = "out", value_name = "PATH", required = true)]
    pub outputs: Vec<PathBuf>,
}
