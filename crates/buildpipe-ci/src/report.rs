//! Machine-readable run report (`buildpipe-report.json`).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::artifact::ValidationReport;
use crate::error::Result;
use crate::gate::{GateVerdict, PipelineGate};
use crate::pipeline::PipelineRun;

/// Everything a CI consumer needs to know about one pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run: PipelineRun,
    pub validation: ValidationReport,
    pub verdict: GateVerdict,
}

impl PipelineReport {
    /// Build a report, evaluating the gate.
    pub fn new(run: PipelineRun, validation: ValidationReport) -> Self {
        let verdict = PipelineGate::evaluate(&run, &validation);
        Self {
            run,
            validation,
            verdict,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.verdict.exit_code()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the report as pretty JSON, creating parent directories.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
