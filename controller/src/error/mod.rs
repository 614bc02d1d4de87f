pub mod job;
pub mod pipeline;

use thiserror::Error;

pub use job::{ExecutorError, FsWatcherError, TemplateError, TransitionError};
pub use pipeline::{PipelineError, PipelineResult};

/// Result type for controller operations
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Error types for the controller
#[derive(Error, Debug)]
pub enum ControllerError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Controller Error: {0}")]
    ControllerAnyHowError(#[from] anyhow::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("FsWatcher error: {0}")]
    FsWatcherError(#[from] FsWatcherError),

    #[error("Template error: {0}")]
    TemplateError(#[from] TemplateError),

    #[error("Pipeline error: {0}")]
    PipelineError(#[from] PipelineError),

    /// Failed to install the OS signal listeners
    #[error("Signal handler error: {0}")]
    SignalError(String),

    /// Error while instrumenting the metrics exporter
    #[error("OTEL Metrics Error: {0}")]
    OTELMetricsError(String),

    #[error("Invalid regex: {0}")]
    RegexError(#[from] regex::Error),
}
