//! Error taxonomy for pipeline loading, execution and artifact checks.

use std::path::PathBuf;

/// Errors produced by buildpipe.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Malformed pipeline definition, detected before any step runs.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A step's process could not be started or did not finish in time.
    #[error("step '{step}' failed to execute: {reason}")]
    StepExecution { step: String, reason: String },

    /// A required artifact pattern matched no files after the run.
    #[error("required artifact missing: no files match '{pattern}'")]
    ArtifactMissing { pattern: String },

    #[error("failed to parse pipeline file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        PipelineError::Configuration(msg.into())
    }
}

/// Result type for buildpipe operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
