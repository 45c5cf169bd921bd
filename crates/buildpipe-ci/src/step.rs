//! Pipeline step definitions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// What happens to the rest of the pipeline when a step fails.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Halt; every later step is reported as skipped.
    #[default]
    Fatal,

    /// Record the failure and continue with the next step.
    #[serde(alias = "warn_only", alias = "warn-only")]
    Warn,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Fatal => f.write_str("fatal"),
            FailurePolicy::Warn => f.write_str("warn"),
        }
    }
}

/// How a step's process is launched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum StepCommand {
    /// Direct exec; the first element is the executable.
    Argv(Vec<String>),

    /// A command line handed to the platform shell.
    Shell(String),
}

impl StepCommand {
    /// Build an argv command from anything string-like.
    pub fn argv<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StepCommand::Argv(parts.into_iter().map(Into::into).collect())
    }

    pub fn shell(line: impl Into<String>) -> Self {
        StepCommand::Shell(line.into())
    }

    /// The program and arguments actually spawned.
    pub fn to_argv(&self) -> Vec<String> {
        match self {
            StepCommand::Argv(parts) => parts.clone(),
            StepCommand::Shell(line) => {
                if cfg!(windows) {
                    vec!["cmd".to_string(), "/C".to_string(), line.clone()]
                } else {
                    vec!["sh".to_string(), "-c".to_string(), line.clone()]
                }
            }
        }
    }

    fn validate(&self, step: &str) -> Result<()> {
        match self {
            StepCommand::Argv(parts) => match parts.first() {
                None => Err(PipelineError::config(format!(
                    "step '{}' has an empty command",
                    step
                ))),
                Some(exe) if exe.trim().is_empty() => Err(PipelineError::config(format!(
                    "step '{}' has an empty executable",
                    step
                ))),
                Some(_) => Ok(()),
            },
            StepCommand::Shell(line) if line.trim().is_empty() => Err(PipelineError::config(
                format!("step '{}' has an empty command", step),
            )),
            StepCommand::Shell(_) => Ok(()),
        }
    }
}

impl fmt::Display for StepCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepCommand::Argv(parts) => f.write_str(&parts.join(" ")),
            StepCommand::Shell(line) => f.write_str(line),
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// One named unit of work in a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Step {
    /// Unique step name.
    pub name: String,

    /// Command to execute.
    pub command: StepCommand,

    /// Variables layered over the inherited environment for this step only.
    #[serde(default, rename = "env", skip_serializing_if = "BTreeMap::is_empty")]
    pub env_overrides: BTreeMap<String, String>,

    /// Failure escalation policy.
    #[serde(default)]
    pub on_failure: FailurePolicy,

    /// Wall-clock limit in seconds. Expiry counts as a failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Glob patterns, relative to the working directory, naming the files
    /// this step produces.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,

    /// Disabled steps are never invoked and are reported as skipped.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Step {
    /// A fatal, enabled step with no overrides.
    pub fn new(name: impl Into<String>, command: StepCommand) -> Self {
        Self {
            name: name.into(),
            command,
            env_overrides: BTreeMap::new(),
            on_failure: FailurePolicy::Fatal,
            timeout_secs: None,
            outputs: Vec::new(),
            enabled: true,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_overrides.insert(key.into(), value.into());
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }

    /// Shorthand for [`FailurePolicy::Warn`].
    pub fn warn_only(self) -> Self {
        self.with_policy(FailurePolicy::Warn)
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_output(mut self, pattern: impl Into<String>) -> Self {
        self.outputs.push(pattern.into());
        self
    }

    /// Disable this step.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Check that the step can be executed as written.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::config("step name must not be empty"));
        }
        self.command.validate(&self.name)?;
        if self.timeout_secs == Some(0) {
            return Err(PipelineError::config(format!(
                "step '{}' has timeout_secs = 0",
                self.name
            )));
        }
        for key in self.env_overrides.keys() {
            if key.is_empty() || key.contains('=') || key.contains('\0') {
                return Err(PipelineError::config(format!(
                    "step '{}' has invalid environment variable name '{}'",
                    self.name, key
                )));
            }
        }
        for pattern in &self.outputs {
            glob::Pattern::new(pattern).map_err(|e| {
                PipelineError::config(format!(
                    "step '{}' has invalid output pattern '{}': {}",
                    self.name, pattern, e
                ))
            })?;
        }
        Ok(())
    }
}

/// Steps of the stock desktop-application build.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinStep {
    /// npm ci
    Install,

    /// npm run build
    Build,

    /// npx electron-builder --win --publish never
    Package,
}

impl BuiltinStep {
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinStep::Install => "install",
            BuiltinStep::Build => "build",
            BuiltinStep::Package => "package",
        }
    }

    pub fn command(&self) -> StepCommand {
        match self {
            BuiltinStep::Install => StepCommand::argv(["npm", "ci"]),
            BuiltinStep::Build => StepCommand::argv(["npm", "run", "build"]),
            BuiltinStep::Package => {
                StepCommand::argv(["npx", "electron-builder", "--win", "--publish", "never"])
            }
        }
    }

    /// Environment the step needs on a hosted Windows runner.
    pub fn env(&self) -> Vec<(&'static str, &'static str)> {
        match self {
            // node-gyp picks the interpreter for native modules from here
            BuiltinStep::Install => vec![("PYTHON", "python3")],
            BuiltinStep::Build => vec![],
            // unsigned build; don't go looking for a certificate
            BuiltinStep::Package => vec![("CSC_IDENTITY_AUTO_DISCOVERY", "false")],
        }
    }

    pub fn to_step(&self, timeout_secs: u64) -> Step {
        let mut step = Step::new(self.name(), self.command()).with_timeout(timeout_secs);
        for (k, v) in self.env() {
            step = step.with_env(k, v);
        }
        if *self == BuiltinStep::Package {
            step = step.with_output("dist/*.exe");
        }
        step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_step_names() {
        assert_eq!(BuiltinStep::Install.name(), "install");
        assert_eq!(BuiltinStep::Build.name(), "build");
        assert_eq!(BuiltinStep::Package.name(), "package");
    }

    #[test]
    fn test_builtin_step_env() {
        let install = BuiltinStep::Install.to_step(900);
        assert_eq!(install.env_overrides["PYTHON"], "python3");
        assert_eq!(install.timeout_secs, Some(900));

        let package = BuiltinStep::Package.to_step(1800);
        assert_eq!(package.env_overrides["CSC_IDENTITY_AUTO_DISCOVERY"], "false");
        assert_eq!(package.outputs, vec!["dist/*.exe".to_string()]);
        assert!(package.validate().is_ok());
    }

    #[test]
    fn test_shell_command_argv() {
        let argv = StepCommand::shell("npm run build").to_argv();
        assert_eq!(argv.len(), 3);
        assert_eq!(argv[2], "npm run build");
    }

    #[test]
    fn test_empty_argv_rejected() {
        let step = Step::new("install", StepCommand::Argv(vec![]));
        let err = step.validate().unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert!(err.to_string().contains("install"));
    }

    #[test]
    fn test_blank_shell_rejected() {
        let step = Step::new("build", StepCommand::shell("   "));
        assert!(step.validate().is_err());
    }

    #[test]
    fn test_blank_executable_rejected() {
        let step = Step::new("build", StepCommand::argv(["", "run"]));
        assert!(step.validate().is_err());
    }

    #[test]
    fn test_empty_name_rejected() {
        let step = Step::new("", StepCommand::argv(["true"]));
        assert!(step.validate().is_err());
    }

    #[test]
    fn test_invalid_output_pattern_rejected() {
        let step = Step::new("package", StepCommand::argv(["true"])).with_output("dist/[.exe");
        let err = step.validate().unwrap_err();
        assert!(err.to_string().contains("invalid output pattern"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let step = Step::new("download", StepCommand::argv(["true"])).with_timeout(0);
        assert!(step.validate().is_err());
    }

    #[test]
    fn test_step_builders() {
        let step = Step::new("lint", StepCommand::argv(["npm", "run", "lint"]))
            .warn_only()
            .disabled();
        assert_eq!(step.on_failure, FailurePolicy::Warn);
        assert!(!step.enabled);
    }

    #[test]
    fn test_failure_policy_aliases() {
        #[derive(Deserialize)]
        struct Wrapper {
            on_failure: FailurePolicy,
        }
        let w: Wrapper = toml::from_str(r#"on_failure = "warn-only""#).unwrap();
        assert_eq!(w.on_failure, FailurePolicy::Warn);
        let w: Wrapper = toml::from_str(r#"on_failure = "fatal""#).unwrap();
        assert_eq!(w.on_failure, FailurePolicy::Fatal);
    }
}
