//! Post-run artifact expectations and their validation.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{PipelineError, Result};

fn default_required() -> bool {
    true
}

/// A glob that must (or should) match files once the pipeline is done.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactExpectation {
    /// Glob pattern relative to the working directory.
    #[serde(alias = "glob_pattern")]
    pub pattern: String,

    /// A missing required artifact fails the process; a missing optional
    /// one is only a warning.
    #[serde(default = "default_required")]
    pub required: bool,
}

impl ArtifactExpectation {
    pub fn required(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            required: true,
        }
    }

    pub fn optional(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            required: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        glob::Pattern::new(&self.pattern).map(|_| ()).map_err(|e| {
            PipelineError::config(format!(
                "invalid artifact pattern '{}': {}",
                self.pattern, e
            ))
        })
    }
}

/// Outcome of checking every expectation against a directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationReport {
    /// Required patterns with no match, and unusable patterns.
    pub errors: Vec<String>,

    /// Optional patterns with no match.
    pub warnings: Vec<String>,

    /// Matched files per pattern, sorted, relative to the working directory.
    pub matched: BTreeMap<String, Vec<String>>,

    /// Required patterns that matched nothing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Fail with the first missing required artifact, if any.
    pub fn ensure_complete(&self) -> Result<()> {
        match self.missing.first() {
            Some(pattern) => Err(PipelineError::ArtifactMissing {
                pattern: pattern.clone(),
            }),
            None if !self.errors.is_empty() => {
                Err(PipelineError::config(self.errors.join("; ")))
            }
            None => Ok(()),
        }
    }

    /// Every matched path, in pattern order.
    pub fn all_paths(&self) -> impl Iterator<Item = &str> {
        self.matched.values().flatten().map(String::as_str)
    }
}

/// Checks artifact expectations after a pipeline reaches a terminal state.
pub struct ArtifactValidator;

impl ArtifactValidator {
    /// Resolve each expectation against `working_dir`.
    ///
    /// Reads the filesystem only, so an unchanged directory always yields
    /// the same report.
    pub fn validate(expectations: &[ArtifactExpectation], working_dir: &Path) -> ValidationReport {
        let mut report = ValidationReport::default();

        for expectation in expectations {
            let pattern = &expectation.pattern;
            let paths = match resolve_pattern(working_dir, pattern) {
                Ok(paths) => paths,
                Err(e) => {
                    error!(pattern = %pattern, error = %e, "Unusable artifact pattern");
                    report.errors.push(e.to_string());
                    continue;
                }
            };

            if !paths.is_empty() {
                info!(pattern = %pattern, count = paths.len(), "Artifact found");
                report.matched.insert(pattern.clone(), paths);
            } else if expectation.required {
                error!(pattern = %pattern, "Required artifact missing");
                report.errors.push(format!(
                    "required artifact missing: no files match '{}'",
                    pattern
                ));
                report.missing.push(pattern.clone());
            } else {
                warn!(pattern = %pattern, "Optional artifact missing");
                report
                    .warnings
                    .push(format!("optional artifact missing: no files match '{}'", pattern));
            }
        }

        report
    }
}

/// Regular files under `working_dir` matching `pattern`, sorted and
/// relative to `working_dir`.
pub fn resolve_pattern(working_dir: &Path, pattern: &str) -> Result<Vec<String>> {
    let compiled = glob::Pattern::new(pattern).map_err(|e| {
        PipelineError::config(format!("invalid artifact pattern '{}': {}", pattern, e))
    })?;
    if Path::new(pattern).is_absolute() {
        return Err(PipelineError::config(format!(
            "artifact pattern '{}' must be relative to the working directory",
            pattern
        )));
    }

    let root = working_dir.to_str().ok_or_else(|| {
        PipelineError::config(format!(
            "working directory {} is not valid UTF-8",
            working_dir.display()
        ))
    })?;
    let full = format!(
        "{}/{}",
        glob::Pattern::escape(root.trim_end_matches('/')),
        compiled.as_str()
    );

    let entries = glob::glob(&full).map_err(|e| {
        PipelineError::config(format!("invalid artifact pattern '{}': {}", pattern, e))
    })?;

    let mut paths: Vec<String> = entries
        .flatten()
        .filter(|p| p.is_file())
        .map(|p| {
            p.strip_prefix(working_dir)
                .map(|rel| rel.to_path_buf())
                .unwrap_or(p)
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();
    paths.sort();
    paths.dedup();
    Ok(paths)
}
