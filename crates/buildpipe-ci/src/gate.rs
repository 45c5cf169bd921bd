//! Overall pass/fail gate for a finished pipeline.

use serde::{Deserialize, Serialize};

use crate::artifact::ValidationReport;
use crate::pipeline::{PipelineRun, RunStatus};

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// Violations that caused failure (empty if passed).
    pub violations: Vec<String>,

    /// Tolerated problems: warn-only step failures and missing optional
    /// artifacts.
    pub warnings: Vec<String>,

    /// Summary message.
    pub message: String,
}

impl GateVerdict {
    /// Process exit code for this verdict.
    pub fn exit_code(&self) -> i32 {
        if self.passed {
            0
        } else {
            1
        }
    }
}

/// Pipeline gate rules.
pub struct PipelineGate;

impl PipelineGate {
    /// Evaluate a run together with its artifact report.
    ///
    /// Gate rule:
    /// - The run must be `Completed` (no fatal step failure, not unfinished)
    /// - The artifact report must carry no errors
    /// - Warn-only step failures and validator warnings never fail the gate
    pub fn evaluate(run: &PipelineRun, report: &ValidationReport) -> GateVerdict {
        let mut violations = Vec::new();
        let mut warnings = Vec::new();

        match run.status {
            RunStatus::Completed => {}
            RunStatus::FailedFatal => {
                let step = run
                    .halted_at()
                    .map(|r| r.step_name.as_str())
                    .unwrap_or("unknown");
                violations.push(format!(
                    "Step '{}' failed fatally; {} step(s) skipped",
                    step,
                    run.skipped_count()
                ));
            }
            status => violations.push(format!("Pipeline did not finish (status {:?})", status)),
        }

        for failed in run.tolerated_failures() {
            warnings.push(match failed.exit_code {
                Some(code) => format!(
                    "Step '{}' failed with exit code {} (warn-only)",
                    failed.step_name, code
                ),
                None => format!(
                    "Step '{}' failed: {} (warn-only)",
                    failed.step_name,
                    failed.error.as_deref().unwrap_or("no exit code")
                ),
            });
        }

        violations.extend(report.errors.iter().cloned());
        warnings.extend(report.warnings.iter().cloned());

        let passed = violations.is_empty();
        let message = if passed && warnings.is_empty() {
            "All steps passed and all required artifacts are present".to_string()
        } else if passed {
            format!("Gate passed with {} warning(s)", warnings.len())
        } else {
            format!("Gate failed with {} violation(s)", violations.len())
        };

        GateVerdict {
            passed,
            violations,
            warnings,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{StepResult, StepStatus};
    use crate::step::{FailurePolicy, Step, StepCommand};
    use uuid::Uuid;

    fn run(status: RunStatus, results: Vec<StepResult>) -> PipelineRun {
        PipelineRun {
            run_id: Uuid::new_v4(),
            pipeline_name: "desktop".to_string(),
            pipeline_digest: "abc123".to_string(),
            status,
            steps: results
                .iter()
                .map(|r| Step::new(r.step_name.clone(), StepCommand::argv(["true"])))
                .collect(),
            results,
            started_at: None,
            finished_at: None,
            duration_ms: 0,
        }
    }

    fn result(name: &str, status: StepStatus, on_failure: FailurePolicy) -> StepResult {
        StepResult {
            step_name: name.to_string(),
            status,
            on_failure,
            exit_code: match status {
                StepStatus::Success => Some(0),
                StepStatus::Failed => Some(2),
                StepStatus::Skipped => None,
            },
            duration_ms: 5,
            produced_paths: vec![],
            stdout: String::new(),
            stderr: String::new(),
            error: None,
        }
    }

    #[test]
    fn test_completed_run_with_clean_report_passes() {
        let run = run(
            RunStatus::Completed,
            vec![result("install", StepStatus::Success, FailurePolicy::Fatal)],
        );
        let verdict = PipelineGate::evaluate(&run, &ValidationReport::default());
        assert!(verdict.passed);
        assert_eq!(verdict.exit_code(), 0);
        assert!(verdict.violations.is_empty());
    }

    #[test]
    fn test_fatal_failure_fails_gate() {
        let run = run(
            RunStatus::FailedFatal,
            vec![
                result("install", StepStatus::Success, FailurePolicy::Fatal),
                result("download", StepStatus::Failed, FailurePolicy::Fatal),
                result("package", StepStatus::Skipped, FailurePolicy::Fatal),
            ],
        );
        let verdict = PipelineGate::evaluate(&run, &ValidationReport::default());
        assert!(!verdict.passed);
        assert_eq!(verdict.exit_code(), 1);
        assert!(verdict.violations[0].contains("download"));
        assert!(verdict.violations[0].contains("1 step(s) skipped"));
    }

    #[test]
    fn test_warn_failure_is_only_a_warning() {
        let run = run(
            RunStatus::Completed,
            vec![
                result("lint", StepStatus::Failed, FailurePolicy::Warn),
                result("build", StepStatus::Success, FailurePolicy::Fatal),
            ],
        );
        let verdict = PipelineGate::evaluate(&run, &ValidationReport::default());
        assert!(verdict.passed);
        assert_eq!(verdict.warnings.len(), 1);
        assert_eq!(
            verdict.warnings[0],
            "Step 'lint' failed with exit code 2 (warn-only)"
        );
    }

    #[test]
    fn test_artifact_errors_fail_completed_run() {
        let run = run(
            RunStatus::Completed,
            vec![result("package", StepStatus::Success, FailurePolicy::Fatal)],
        );
        let report = ValidationReport {
            errors: vec!["required artifact missing: no files match '*.exe'".to_string()],
            ..Default::default()
        };
        let verdict = PipelineGate::evaluate(&run, &report);
        assert!(!verdict.passed);
        assert_eq!(verdict.violations.len(), 1);
    }

    #[test]
    fn test_optional_artifact_warning_keeps_exit_zero() {
        let run = run(
            RunStatus::Completed,
            vec![result("package", StepStatus::Success, FailurePolicy::Fatal)],
        );
        let report = ValidationReport {
            warnings: vec![
                "optional artifact missing: no files match '*-portable.exe'".to_string(),
            ],
            ..Default::default()
        };
        let verdict = PipelineGate::evaluate(&run, &report);
        assert!(verdict.passed);
        assert_eq!(verdict.exit_code(), 0);
        assert_eq!(verdict.warnings.len(), 1);
    }

    #[test]
    fn test_unfinished_run_fails_gate() {
        let run = run(RunStatus::Running, vec![]);
        let verdict = PipelineGate::evaluate(&run, &ValidationReport::default());
        assert!(!verdict.passed);
        assert!(verdict.violations[0].contains("did not finish"));
    }
}
