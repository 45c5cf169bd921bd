//! buildpipe - sequential build pipeline CLI
//!
//! ## Commands
//!
//! - `run`: execute a pipeline file, validate artifacts, exit with the gate verdict
//! - `check`: parse and validate a pipeline file without running it
//! - `artifacts`: validate artifact expectations against a directory
//! - `init`: write the stock desktop-build pipeline file
//! - `retry`: run a command with retries, for use inside a flaky step

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use buildpipe_ci::{
    ArtifactValidator, PipelineConfig, PipelineReport, PipelineRunner, ProcessExecutor,
    RetryPolicy, StepStatus, ValidationReport,
};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "buildpipe")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sequential, fail-fast build pipeline runner", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline file and validate its artifacts
    Run {
        /// Pipeline file
        #[arg(short, long, env = "BUILDPIPE_FILE", default_value = "pipeline.toml")]
        file: PathBuf,

        /// Working directory (default: from the pipeline file)
        #[arg(short, long, env = "BUILDPIPE_WORKING_DIR")]
        working_dir: Option<PathBuf>,

        /// Write a JSON report to this path
        #[arg(short, long, env = "BUILDPIPE_REPORT")]
        report: Option<PathBuf>,

        /// Capture step output instead of streaming it
        #[arg(short, long)]
        quiet: bool,
    },

    /// Parse and validate a pipeline file without running it
    Check {
        /// Pipeline file
        #[arg(short, long, env = "BUILDPIPE_FILE", default_value = "pipeline.toml")]
        file: PathBuf,
    },

    /// Validate the pipeline's artifact expectations only
    Artifacts {
        /// Pipeline file
        #[arg(short, long, env = "BUILDPIPE_FILE", default_value = "pipeline.toml")]
        file: PathBuf,

        /// Working directory (default: from the pipeline file)
        #[arg(short, long, env = "BUILDPIPE_WORKING_DIR")]
        working_dir: Option<PathBuf>,
    },

    /// Write the desktop-application pipeline template
    Init {
        /// Output path
        #[arg(short, long, default_value = "pipeline.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Run a command, retrying with exponential backoff on failure
    Retry {
        /// Total attempts
        #[arg(short, long, default_value = "3")]
        attempts: u32,

        /// Delay before the first retry in milliseconds (doubles each time)
        #[arg(short, long, default_value = "1000")]
        backoff_ms: u64,

        /// Command and arguments
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    buildpipe_ci::init_tracing(cli.json, level);

    let result = match cli.command {
        Commands::Run {
            file,
            working_dir,
            report,
            quiet,
        } => cmd_run(&file, working_dir.as_deref(), report.as_deref(), quiet).await,
        Commands::Check { file } => cmd_check(&file),
        Commands::Artifacts { file, working_dir } => cmd_artifacts(&file, working_dir.as_deref()),
        Commands::Init { output, force } => cmd_init(&output, force),
        Commands::Retry {
            attempts,
            backoff_ms,
            command,
        } => cmd_retry(attempts, backoff_ms, &command).await,
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load(file: &Path) -> Result<PipelineConfig> {
    PipelineConfig::load(file).with_context(|| format!("Failed to load pipeline file {:?}", file))
}

/// Run a pipeline and exit with the gate verdict
async fn cmd_run(
    file: &Path,
    working_dir: Option<&Path>,
    report_path: Option<&Path>,
    quiet: bool,
) -> Result<u8> {
    let config = load(file)?;
    let working_dir = config.resolve_working_dir(working_dir);

    println!("Pipeline: {}", config.pipeline.name);
    println!("Working directory: {:?}", working_dir);
    println!();

    let executor = if quiet {
        ProcessExecutor::new()
    } else {
        ProcessExecutor::streaming()
    };
    let run = PipelineRunner::new(&working_dir)
        .with_name(config.pipeline.name.clone())
        .with_executor(Arc::new(executor))
        .run(config.steps.clone())
        .await
        .context("Pipeline failed to start")?;

    let validation = ArtifactValidator::validate(&config.artifacts, &working_dir);
    let report = PipelineReport::new(run, validation);

    print_report(&report);

    if let Some(path) = report_path {
        report
            .write_to(path)
            .with_context(|| format!("Failed to write report to {:?}", path))?;
        info!(path = %path.display(), "Wrote report");
    }

    Ok(report.exit_code() as u8)
}

fn print_report(report: &PipelineReport) {
    let run = &report.run;
    println!();
    println!("Run ID: {}", run.run_id);
    println!("Status: {:?}", run.status);
    println!("Duration: {}ms", run.duration_ms);
    println!();

    for result in &run.results {
        let mark = match result.status {
            StepStatus::Success => "✓",
            StepStatus::Failed => "✗",
            StepStatus::Skipped => "-",
        };
        let exit = result
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none".to_string());
        println!(
            "  {} {} [{:?}, {}] ({}ms, exit code: {})",
            mark, result.step_name, result.status, result.on_failure, result.duration_ms, exit
        );
        if let Some(error) = &result.error {
            println!("      {}", error);
        }
        for path in &result.produced_paths {
            println!("      -> {}", path);
        }
    }

    println!();
    println!(
        "Summary: {} passed, {} failed, {} skipped of {} steps",
        run.passed_count(),
        run.failed_count(),
        run.skipped_count(),
        run.steps.len()
    );

    print_validation(&report.validation);

    let verdict = &report.verdict;
    println!();
    println!("Gate: {}", if verdict.passed { "✓ PASSED" } else { "✗ FAILED" });
    if !verdict.violations.is_empty() {
        println!("Violations:");
        for violation in &verdict.violations {
            println!("  - {}", violation);
        }
    }
    if !verdict.warnings.is_empty() {
        println!("Warnings:");
        for warning in &verdict.warnings {
            println!("  - {}", warning);
        }
    }
}

fn print_validation(validation: &ValidationReport) {
    if validation.matched.is_empty() {
        return;
    }
    println!();
    println!("Artifacts:");
    for (pattern, paths) in &validation.matched {
        println!("  {} ({} file(s))", pattern, paths.len());
        for path in paths {
            println!("    {}", path);
        }
    }
}

/// Validate a pipeline file
fn cmd_check(file: &Path) -> Result<u8> {
    let config = load(file)?;
    println!(
        "✓ {:?} is valid: pipeline '{}', {} step(s), {} artifact expectation(s)",
        file,
        config.pipeline.name,
        config.steps.len(),
        config.artifacts.len()
    );
    for step in &config.steps {
        println!("  {} [{}] {}", step.name, step.on_failure, step.command);
    }
    Ok(0)
}

/// Validate artifacts without running any step
fn cmd_artifacts(file: &Path, working_dir: Option<&Path>) -> Result<u8> {
    let config = load(file)?;
    let working_dir = config.resolve_working_dir(working_dir);
    let validation = ArtifactValidator::validate(&config.artifacts, &working_dir);

    print_validation(&validation);
    for warning in &validation.warnings {
        println!("warning: {}", warning);
    }
    for error in &validation.errors {
        println!("error: {}", error);
    }

    validation
        .ensure_complete()
        .context("Artifact validation failed")?;
    println!("✓ All required artifacts present");
    Ok(0)
}

/// Write the desktop template
fn cmd_init(output: &Path, force: bool) -> Result<u8> {
    if output.exists() && !force {
        anyhow::bail!("{:?} already exists (use --force to overwrite)", output);
    }
    let rendered = PipelineConfig::desktop_template().to_toml()?;
    std::fs::write(output, rendered).with_context(|| format!("Failed to write {:?}", output))?;
    println!("Wrote desktop pipeline to {:?}", output);
    Ok(0)
}

/// Run a command with retries; exit with its final exit code
async fn cmd_retry(attempts: u32, backoff_ms: u64, command: &[String]) -> Result<u8> {
    let policy = RetryPolicy::new(attempts, backoff_ms)?;
    let outcome = policy.run_command(command).await?;

    if let Some(error) = &outcome.error {
        eprintln!("{}", error);
    }
    info!(attempts = outcome.attempts, exit_code = ?outcome.exit_code, "Retry finished");

    Ok(match outcome.exit_code {
        Some(code) if (0..=255).contains(&code) => code as u8,
        _ => 1,
    })
}
