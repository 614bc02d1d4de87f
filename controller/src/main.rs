use clap::Parser as _;
use dotenvy::dotenv;
use prover_controller::cli::{Cli, Commands, RunCmd, StageCmd};
use prover_controller::config::{load_config, Config};
use prover_controller::pipeline::{run_stage, PipelineContext};
use prover_controller::utils::instrument::ControllerInstrumentation;
use prover_controller::utils::logging::init_logging;
use prover_controller::utils::signal_handler::SignalHandler;
use prover_controller::worker::Controller;
use prover_controller::ControllerResult;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Exit code of a `run` or `stage` invocation that failed before doing any work.
const SETUP_FAILURE_CODE: i32 = 2;

#[tokio::main]
async fn main() {
    dotenv().ok();
    if let Err(e) = init_logging() {
        panic!("Failed to initialize logging: {e:#}");
    }
    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Run { run_command } => {
            info!("Executing run command with args: {:?}", run_command);
            match run_controller(&run_command).await {
                Ok(()) => 0,
                Err(e) => {
                    error!(error = %e, error_chain = ?e, "Controller failed");
                    SETUP_FAILURE_CODE
                }
            }
        }
        Commands::Stage { stage_command } => run_pipeline_stage(&stage_command).await,
    };
    std::process::exit(exit_code);
}

async fn run_controller(run_cmd: &RunCmd) -> ControllerResult<()> {
    let config = load_config(&run_cmd.config_file, run_cmd.local_id.as_deref())?;
    let instrumentation = ControllerInstrumentation::new("prover-controller", config.otel_endpoint.as_ref())?;
    debug!("Configuration initialized");

    let controller = Controller::from_config(&config);
    let _signals = SignalHandler::new()?.spawn(controller.shutdown_handle());

    let reason = controller.run().await;
    info!(reason = ?reason, "Controller shutting down");

    instrumentation.shutdown()?;
    Ok(())
}

/// Runs one pipeline stage and returns the process exit code the controller classifies.
async fn run_pipeline_stage(stage_cmd: &StageCmd) -> i32 {
    let config: Config = match load_config(&stage_cmd.config_file, None) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, error_chain = ?e, "Failed to load configuration");
            return SETUP_FAILURE_CODE;
        }
    };

    let cancel = CancellationToken::new();
    let ctx = match PipelineContext::from_config(&config, cancel.clone()) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!(error = %e, "Failed to set up the pipeline");
            return e.exit_code();
        }
    };

    // Waits give up on interrupt; prover calls run to completion
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Stage interrupted");
            cancel.cancel();
        }
    });

    match run_stage(&ctx, stage_cmd.stage, &stage_cmd.inputs, &stage_cmd.outputs).await {
        Ok(()) => 0,
        Err(e) => {
            error!(stage = %stage_cmd.stage, error = %e, error_chain = ?e, "Stage failed");
            e.exit_code()
        }
    }
}
