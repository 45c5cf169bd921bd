//! buildpipe CI - sequential build pipelines
//!
//! Provides a fail-fast pipeline runner that:
//! - Executes named steps in order against one working directory
//! - Halts on the first fatal failure and reports later steps as skipped
//! - Validates expected artifacts and gates the process exit code

pub mod artifact;
pub mod config;
pub mod env;
pub mod error;
pub mod executor;
pub mod gate;
pub mod pipeline;
pub mod report;
pub mod retry;
pub mod step;
pub mod telemetry;

// Re-export key types
pub use artifact::{ArtifactExpectation, ArtifactValidator, ValidationReport};
pub use config::PipelineConfig;
pub use env::{BaseEnvironment, StepEnv};
pub use error::{PipelineError, Result};
pub use executor::{ExecutionOutput, ProcessExecutor, StepExecutor};
pub use gate::{GateVerdict, PipelineGate};
pub use pipeline::{PipelineRun, PipelineRunner, RunStatus, StepResult, StepStatus};
pub use report::PipelineReport;
pub use retry::{RetryOutcome, RetryPolicy};
pub use step::{BuiltinStep, FailurePolicy, Step, StepCommand};
pub use telemetry::init_tracing;
