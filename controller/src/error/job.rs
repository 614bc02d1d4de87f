use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while scanning a request directory.
/// They are logged and skipped per directory, never propagated out of a scan.
#[derive(Error, Debug)]
pub enum FsWatcherError {
    #[error("Failed to list directory {dir}: {source}")]
    ReadDir {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while moving a locked job to its terminal state.
/// The in-progress file stays on disk so an operator can resolve it by hand.
#[derive(Error, Debug)]
pub enum TransitionError {
    #[error("Failed to rename {from} to {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Failed to spawn worker command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait for worker command: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Failed to render worker command: {0}")]
    Template(#[from] TemplateError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Unknown placeholder `{{{{{placeholder}}}}}` in template `{template}`")]
    UnknownPlaceholder { placeholder: String, template: String },

    #[error("Unterminated placeholder in template `{0}`")]
    Unterminated(String),

    #[error("Placeholder `{placeholder}` refers to index {index} but only {available} paths are available")]
    IndexOutOfRange { placeholder: String, index: usize, available: usize },
}
