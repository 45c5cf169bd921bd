//! Sequential pipeline execution and run recording.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::artifact::resolve_pattern;
use crate::env::BaseEnvironment;
use crate::error::{PipelineError, Result};
use crate::executor::{ProcessExecutor, StepExecutor};
use crate::step::{FailurePolicy, Step};

/// Outcome of a single step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
}

/// Lifecycle of a pipeline run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    /// Every step ran or was skipped by configuration; no fatal failure.
    Completed,
    /// A fatal step failed and the remaining steps were skipped.
    FailedFatal,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::FailedFatal)
    }
}

/// Result of one step. Created once and never changed afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepResult {
    pub step_name: String,

    pub status: StepStatus,

    /// Policy the step ran under.
    pub on_failure: FailurePolicy,

    /// Absent when no process exit code exists (skipped, spawn failure,
    /// timeout, killed by signal).
    pub exit_code: Option<i32>,

    pub duration_ms: u64,

    /// Files matched by the step's output patterns, relative to the
    /// working directory.
    pub produced_paths: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdout: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,

    /// Why the step failed without an exit code, or why it was skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepResult {
    fn skipped(step: &Step, reason: String) -> Self {
        Self {
            step_name: step.name.clone(),
            status: StepStatus::Skipped,
            on_failure: step.on_failure,
            exit_code: None,
            duration_ms: 0,
            produced_paths: Vec::new(),
            stdout: String::new(),
            stderr: String::new(),
            error: Some(reason),
        }
    }

    pub fn passed(&self) -> bool {
        self.status == StepStatus::Success
    }

    /// A failure that stopped the pipeline.
    pub fn is_fatal_failure(&self) -> bool {
        self.status == StepStatus::Failed && self.on_failure == FailurePolicy::Fatal
    }
}

/// A pipeline execution: the planned steps and the results so far.
///
/// `results` is always a prefix of `steps` by name and order, and has the
/// same length once the run is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,

    pub pipeline_name: String,

    /// SHA-256 over the serialized step list.
    pub pipeline_digest: String,

    pub status: RunStatus,

    pub steps: Vec<Step>,

    pub results: Vec<StepResult>,

    pub started_at: Option<DateTime<Utc>>,

    pub finished_at: Option<DateTime<Utc>>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl PipelineRun {
    fn new(pipeline_name: String, pipeline_digest: String, steps: Vec<Step>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pipeline_name,
            pipeline_digest,
            status: RunStatus::Pending,
            results: Vec::with_capacity(steps.len()),
            steps,
            started_at: None,
            finished_at: None,
            duration_ms: 0,
        }
    }

    fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    fn record(&mut self, result: StepResult) {
        debug_assert!(self.results.len() < self.steps.len());
        debug_assert_eq!(self.steps[self.results.len()].name, result.step_name);
        self.results.push(result);
    }

    fn finish(&mut self, fatal: bool, duration_ms: u64) {
        self.status = if fatal {
            RunStatus::FailedFatal
        } else {
            RunStatus::Completed
        };
        self.finished_at = Some(Utc::now());
        self.duration_ms = duration_ms;
    }

    /// Whether the run completed without a fatal failure.
    pub fn completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn passed_count(&self) -> usize {
        self.count(StepStatus::Success)
    }

    pub fn failed_count(&self) -> usize {
        self.count(StepStatus::Failed)
    }

    pub fn skipped_count(&self) -> usize {
        self.count(StepStatus::Skipped)
    }

    fn count(&self, status: StepStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// The fatal failure that halted the run, if any.
    pub fn halted_at(&self) -> Option<&StepResult> {
        self.results.iter().find(|r| r.is_fatal_failure())
    }

    /// Tolerated (warn-only) failures.
    pub fn tolerated_failures(&self) -> impl Iterator<Item = &StepResult> {
        self.results
            .iter()
            .filter(|r| r.status == StepStatus::Failed && r.on_failure == FailurePolicy::Warn)
    }
}

/// Check a step list before anything executes.
pub fn validate_steps(steps: &[Step]) -> Result<()> {
    if steps.is_empty() {
        return Err(PipelineError::config("pipeline has no steps"));
    }
    let mut seen = HashSet::new();
    for step in steps {
        step.validate()?;
        if !seen.insert(step.name.as_str()) {
            return Err(PipelineError::config(format!(
                "duplicate step name '{}'",
                step.name
            )));
        }
    }
    Ok(())
}

/// Deterministic digest of an ordered step list.
pub fn compute_pipeline_digest(steps: &[Step]) -> Result<String> {
    let bytes = serde_json::to_vec(steps)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Runs steps one after another against a single working directory.
pub struct PipelineRunner {
    name: String,
    working_dir: PathBuf,
    base_env: BaseEnvironment,
    executor: Arc<dyn StepExecutor>,
}

impl PipelineRunner {
    /// A runner that spawns real processes with the current environment.
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: "pipeline".to_string(),
            working_dir: working_dir.into(),
            base_env: BaseEnvironment::capture(),
            executor: Arc::new(ProcessExecutor::new()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_base_env(mut self, base_env: BaseEnvironment) -> Self {
        self.base_env = base_env;
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Execute `steps` in order.
    ///
    /// Fails only with [`PipelineError::Configuration`], before any step is
    /// invoked. Step failures are recorded in the returned run:
    /// - exit 0 is `Success`
    /// - a failure under `Fatal` halts; later steps are `Skipped`
    /// - a failure under `Warn` is recorded and execution continues
    pub async fn run(&self, steps: Vec<Step>) -> Result<PipelineRun> {
        validate_steps(&steps)?;
        if !self.working_dir.is_dir() {
            return Err(PipelineError::config(format!(
                "working directory {} does not exist",
                self.working_dir.display()
            )));
        }

        let digest = compute_pipeline_digest(&steps)?;
        let mut run = PipelineRun::new(self.name.clone(), digest, steps);
        let start = Instant::now();
        run.start();

        info!(
            run_id = %run.run_id,
            pipeline = %run.pipeline_name,
            steps = run.steps.len(),
            "Starting pipeline"
        );

        let mut halted_by: Option<String> = None;
        for i in 0..run.steps.len() {
            let result = {
                let step = &run.steps[i];
                match &halted_by {
                    Some(failed) => {
                        info!(step = %step.name, "Skipping step after fatal failure");
                        StepResult::skipped(step, format!("skipped: step '{}' failed", failed))
                    }
                    None if !step.enabled => {
                        info!(step = %step.name, "Skipping disabled step");
                        StepResult::skipped(step, "skipped: step is disabled".to_string())
                    }
                    None => self.execute_step(step).await,
                }
            };

            if result.is_fatal_failure() {
                halted_by = Some(result.step_name.clone());
            }
            run.record(result);
        }

        run.finish(halted_by.is_some(), start.elapsed().as_millis() as u64);

        match run.halted_at() {
            None => info!(
                run_id = %run.run_id,
                passed = run.passed_count(),
                failed = run.failed_count(),
                skipped = run.skipped_count(),
                duration_ms = run.duration_ms,
                "Pipeline completed"
            ),
            Some(failed) => error!(
                run_id = %run.run_id,
                step = %failed.step_name,
                skipped = run.skipped_count(),
                "Pipeline halted by fatal step failure"
            ),
        }

        Ok(run)
    }

    async fn execute_step(&self, step: &Step) -> StepResult {
        info!(step = %step.name, command = %step.command, "Executing step");

        let env = self.base_env.merged(&step.env_overrides);
        let start = Instant::now();
        let outcome = self.executor.execute(step, &env, &self.working_dir).await;

        let mut result = StepResult {
            step_name: step.name.clone(),
            status: StepStatus::Failed,
            on_failure: step.on_failure,
            exit_code: None,
            duration_ms: start.elapsed().as_millis() as u64,
            produced_paths: Vec::new(),
            stdout: String::new(),
            stderr: String::new(),
            error: None,
        };

        match outcome {
            Ok(out) => {
                result.exit_code = out.exit_code;
                result.duration_ms = out.duration_ms;
                if out.success() {
                    result.status = StepStatus::Success;
                    result.produced_paths = self.collect_outputs(step);
                } else if out.exit_code.is_none() {
                    result.error = Some("terminated by signal".to_string());
                }
                result.stdout = out.stdout;
                result.stderr = out.stderr;
            }
            Err(e) => result.error = Some(e.to_string()),
        }

        match (result.status, step.on_failure) {
            (StepStatus::Success, _) => info!(
                step = %step.name,
                duration_ms = result.duration_ms,
                produced = result.produced_paths.len(),
                "Step succeeded"
            ),
            (_, FailurePolicy::Warn) => warn!(
                step = %step.name,
                exit_code = ?result.exit_code,
                error = ?result.error,
                "Step failed (warn-only, continuing)"
            ),
            (_, FailurePolicy::Fatal) => error!(
                step = %step.name,
                exit_code = ?result.exit_code,
                error = ?result.error,
                "Step failed"
            ),
        }

        result
    }

    fn collect_outputs(&self, step: &Step) -> Vec<String> {
        let mut produced: Vec<String> = Vec::new();
        for pattern in &step.outputs {
            match resolve_pattern(&self.working_dir, pattern) {
                Ok(paths) => {
                    for path in paths {
                        if !produced.contains(&path) {
                            produced.push(path);
                        }
                    }
                }
                Err(e) => warn!(
                    step = %step.name,
                    pattern = %pattern,
                    error = %e,
                    "Could not resolve output pattern"
                ),
            }
        }
        produced
    }
}
