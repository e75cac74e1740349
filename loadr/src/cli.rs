use clap::{Args, Parser, Subcommand};
use loadr_core::Stage;
use std::path::PathBuf;
use std::time::Duration;

fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 30s, 250ms, 1m30s)".to_string());
    }
    humantime::parse_duration(s)
        .map_err(|e| format!("invalid duration '{s}' (expected e.g. 30s, 250ms, 1m30s): {e}"))
}

/// Parses `DURATION:TARGET`, e.g. `30s:1000`.
fn parse_stage(input: &str) -> Result<Stage, String> {
    let (duration, target) = input
        .rsplit_once(':')
        .ok_or_else(|| format!("invalid stage '{input}' (expected DURATION:TARGET, e.g. 30s:1000)"))?;

    let duration = parse_duration(duration)?;
    if duration.is_zero() {
        return Err(format!("invalid stage '{input}': duration must be greater than zero"));
    }
    let target = target
        .trim()
        .parse::<u64>()
        .map_err(|_| format!("invalid stage '{input}': target must be a non-negative integer"))?;

    Ok(Stage::new(duration, target))
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Progress bar on stderr and a text summary on stdout.
    HumanReadable,
    /// A single JSON summary document on stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "loadr",
    author,
    version,
    about = "Stage-driven HTTP load generator with threshold verdicts",
    long_about = "loadr ramps a pool of virtual users through a list of stages, runs an HTTP request per iteration, aggregates metrics and checks them against thresholds.\n\nA test is described by a YAML file. `${VAR}` and `${VAR:-default}` are expanded from the process environment; use `--env KEY=VALUE` to add/override values.",
    after_help = "Examples:\n  loadr init\n  loadr run loadr.yaml\n  loadr run loadr.yaml --stage 10s:50 --stage 20s:50 --stage 5s:0\n  loadr run loadr.yaml --env BASE_URL=http://127.0.0.1:8000 --output json\n\nExit codes: 0 thresholds passed, 11 thresholds failed, 30 invalid input, 40 runtime error."
)]
pub struct Cli {
    /// Log filter for stderr diagnostics (e.g. warn, debug, loadr_core=trace). Overrides RUST_LOG.
    #[arg(long, global = true, value_name = "LEVEL", env = "LOADR_LOG")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a load test described by a YAML file
    #[command(
        long_about = "Run a load test described by a YAML file.\n\n`--stage` flags replace the file's stages."
    )]
    Run(RunArgs),

    /// Scaffold a loadr.yaml test file
    Init(InitArgs),
}

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Target directory to initialize (created if missing)
    #[arg(default_value = ".")]
    pub dir: PathBuf,

    /// Overwrite existing files
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the test file (.yaml)
    pub test: PathBuf,

    /// Replace the file's stages (repeatable, DURATION:TARGET, e.g. 30s:1000)
    #[arg(long = "stage", value_name = "DURATION:TARGET", value_parser = parse_stage)]
    pub stages: Vec<Stage>,

    /// Add/override env vars used for `${VAR}` expansion (repeatable, KEY=VALUE).
    /// CLI-provided vars override the current process env.
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}
