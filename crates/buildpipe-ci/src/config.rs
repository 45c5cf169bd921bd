//! Pipeline files: loading, validation and the stock desktop template.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::artifact::ArtifactExpectation;
use crate::error::{PipelineError, Result};
use crate::pipeline::validate_steps;
use crate::step::{BuiltinStep, Step, StepCommand};

/// Default per-step timeout for the template, in seconds (30 minutes).
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 1_800;

/// `[pipeline]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineSettings {
    pub name: String,

    /// Directory the steps run in, relative to the pipeline file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

/// A parsed pipeline file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    pub pipeline: PipelineSettings,

    pub steps: Vec<Step>,

    #[serde(default)]
    pub artifacts: Vec<ArtifactExpectation>,

    /// Directory the file was loaded from; relative paths resolve here.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl PipelineConfig {
    /// Read, parse and validate a pipeline file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&content, path)?;
        config.base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        debug!(path = %path.display(), steps = config.steps.len(), "Loaded pipeline file");
        Ok(config)
    }

    /// Parse and validate TOML; `origin` is only used in error messages.
    pub fn parse(content: &str, origin: &Path) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|source| PipelineError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check steps and artifact patterns without running anything.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.name.trim().is_empty() {
            return Err(PipelineError::config("pipeline name must not be empty"));
        }
        validate_steps(&self.steps)?;
        for artifact in &self.artifacts {
            artifact.validate()?;
        }
        Ok(())
    }

    /// Working directory: `override_dir` if given, else the file's
    /// `working_dir` relative to the file, else the file's directory.
    pub fn resolve_working_dir(&self, override_dir: Option<&Path>) -> PathBuf {
        match (override_dir, &self.pipeline.working_dir) {
            (Some(dir), _) => dir.to_path_buf(),
            (None, Some(dir)) if dir.is_absolute() => dir.clone(),
            (None, Some(dir)) => self.base_dir.join(dir),
            (None, None) => self.base_dir.clone(),
        }
    }

    /// The Windows desktop-application build: install, build, package.
    ///
    /// The package step expects an installer under `dist/`; the portable
    /// build is optional.
    pub fn desktop_template() -> Self {
        let mut steps: Vec<Step> = [BuiltinStep::Install, BuiltinStep::Build, BuiltinStep::Package]
            .iter()
            .map(|s| s.to_step(DEFAULT_STEP_TIMEOUT_SECS))
            .collect();
        // a missing build/icon.ico is only a warning: electron-builder uses its default icon
        steps.insert(
            2,
            Step::new(
                "icon",
                StepCommand::argv(["node", "-e", "require('fs').accessSync('build/icon.ico')"]),
            )
            .warn_only()
            .with_timeout(60),
        );

        Self {
            pipeline: PipelineSettings {
                name: "desktop-windows".to_string(),
                working_dir: None,
            },
            steps,
            artifacts: vec![
                ArtifactExpectation::required("dist/*.exe"),
                ArtifactExpectation::optional("dist/*-portable.exe"),
            ],
            base_dir: PathBuf::from("."),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| PipelineError::config(format!("cannot render pipeline: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::FailurePolicy;

    const SAMPLE: &str = r#"
[pipeline]
name = "desktop"
working_dir = "app"

[[steps]]
name = "install"
command = ["npm", "ci"]
timeout_secs = 900
[steps.env]
PYTHON = "python3"

[[steps]]
name = "download"
command = "buildpipe retry --attempts 3 -- curl -fsSLO https://example.com/tool.zip"
on_failure = "warn"

[[steps]]
name = "package"
command = ["npx", "electron-builder", "--win"]
outputs = ["dist/*.exe"]
[steps.env]
CSC_IDENTITY_AUTO_DISCOVERY = "false"

[[artifacts]]
pattern = "dist/*.exe"

[[artifacts]]
pattern = "dist/*-portable.exe"
required = false
"#;

    #[test]
    fn test_parse_sample() {
        let config = PipelineConfig::parse(SAMPLE, Path::new("pipeline.toml")).unwrap();
        assert_eq!(config.pipeline.name, "desktop");
        assert_eq!(config.steps.len(), 3);
        assert_eq!(config.steps[0].env_overrides["PYTHON"], "python3");
        assert_eq!(config.steps[0].timeout_secs, Some(900));
        assert!(matches!(config.steps[1].command, StepCommand::Shell(_)));
        assert_eq!(config.steps[1].on_failure, FailurePolicy::Warn);
        assert_eq!(config.steps[2].on_failure, FailurePolicy::Fatal);
        assert!(config.steps[2].enabled);
        assert!(config.artifacts[0].required);
        assert!(!config.artifacts[1].required);
    }

    #[test]
    fn test_empty_command_is_configuration_error() {
        let toml = r#"
[pipeline]
name = "bad"

[[steps]]
name = "build"
command = []
"#;
        let err = PipelineConfig::parse(toml, Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_no_steps_is_configuration_error() {
        let toml = r#"
steps = []

[pipeline]
name = "empty"
"#;
        let err = PipelineConfig::parse(toml, Path::new("empty.toml")).unwrap_err();
        assert!(err.to_string().contains("no steps"));
    }

    #[test]
    fn test_unknown_policy_is_parse_error() {
        let toml = r#"
[pipeline]
name = "bad"

[[steps]]
name = "build"
command = ["npm", "run", "build"]
on_failure = "ignore"
"#;
        let err = PipelineConfig::parse(toml, Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, PipelineError::Parse { .. }));
    }

    #[test]
    fn test_invalid_artifact_pattern_rejected() {
        let toml = r#"
[pipeline]
name = "bad"

[[steps]]
name = "build"
command = ["true"]

[[artifacts]]
pattern = "dist/[.exe"
"#;
        assert!(PipelineConfig::parse(toml, Path::new("bad.toml")).is_err());
    }

    #[test]
    fn test_resolve_working_dir() {
        let mut config = PipelineConfig::parse(SAMPLE, Path::new("pipeline.toml")).unwrap();
        config.base_dir = PathBuf::from("/repo");
        assert_eq!(config.resolve_working_dir(None), PathBuf::from("/repo/app"));
        assert_eq!(
            config.resolve_working_dir(Some(Path::new("/elsewhere"))),
            PathBuf::from("/elsewhere")
        );
        config.pipeline.working_dir = None;
        assert_eq!(config.resolve_working_dir(None), PathBuf::from("/repo"));
    }

    #[test]
    fn test_desktop_template_is_valid_and_round_trips() {
        let template = PipelineConfig::desktop_template();
        assert!(template.validate().is_ok());
        assert_eq!(
            template.steps.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            vec!["install", "build", "icon", "package"]
        );

        let rendered = template.to_toml().unwrap();
        let parsed = PipelineConfig::parse(&rendered, Path::new("pipeline.toml")).unwrap();
        assert_eq!(parsed.steps, template.steps);
        assert_eq!(parsed.artifacts, template.artifacts);
    }

    #[test]
    fn test_desktop_template_icon_check_only_warns() {
        let template = PipelineConfig::desktop_template();
        let icon = &template.steps[2];
        assert_eq!(icon.name, "icon");
        assert_eq!(icon.on_failure, FailurePolicy::Warn);
        assert_eq!(icon.timeout_secs, Some(60));
        assert!(template
            .steps
            .iter()
            .filter(|s| s.name != "icon")
            .all(|s| s.on_failure == FailurePolicy::Fatal));
    }

    #[test]
    fn test_load_sets_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.base_dir, dir.path());
        assert_eq!(config.resolve_working_dir(None), dir.path().join("app"));
    }
}
