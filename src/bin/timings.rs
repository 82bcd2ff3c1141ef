//! Timings CLI - Command-line interface for page load timings
//!
//! Commands:
//! - compute: Classify page loads and compute per-page timings for every run
//! - check: Only classify page loads (success_or_fail.log)
//! - validate: Validate object sizes against the packet trace
//! - har: Normalize a single HAR file into a HAR timing log

use clap::{Args, Parser, Subcommand};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pageload_timings::config::DEFAULT_DATA_DIR;
use pageload_timings::{
    normalize_har_file, ExternalTools, HarDocument, RunConfig, RunProcessor, TimingsError,
    TIMINGS_VERSION,
};

/// Timings - Reconcile Navigation Timing, Resource Timing, HAR and packet traces
#[derive(Parser)]
#[command(name = "timings")]
#[command(version = TIMINGS_VERSION)]
#[command(about = "Compute per-page load timings from measurement runs", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Directory holding the run-* directories
    #[arg(long, global = true, default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Only process runs whose path contains this substring
    #[arg(long, global = true)]
    run_filter: Option<String>,

    /// Only process pages whose URL contains one of these substrings
    #[arg(long, global = true, value_delimiter = ',')]
    workload: Vec<String>,

    /// Policies the runs were measured with (recorded only)
    #[arg(long, global = true, value_delimiter = ',')]
    policy: Vec<String>,

    /// Log level, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Never spawn the packet dump, start-times or tshark helpers
    #[arg(long, global = true)]
    no_external_tools: bool,

    /// Pretty-print the JSON report
    #[arg(long, global = true)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify page loads and compute per-page timings
    Compute,

    /// Classify page loads without computing timings
    Check,

    /// Validate object sizes against the packet trace
    Validate,

    /// Normalize a HAR file into a HAR timing log
    Har {
        /// HAR file to normalize
        input: PathBuf,

        /// Scenario recorded with every entry
        #[arg(long, default_value = "default")]
        scenario: String,

        /// Output log (defaults to <input>.log)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.global.log_level);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn config(global: &GlobalArgs) -> RunConfig {
    let tools = if global.no_external_tools {
        ExternalTools::disabled()
    } else {
        ExternalTools::default()
    };
    RunConfig::new()
        .with_data_dir(&global.data_dir)
        .with_run_filter(global.run_filter.clone())
        .with_workloads(&global.workload)
        .with_policies(global.policy.clone())
        .with_tools(tools)
}

fn run(cli: Cli) -> Result<(), TimingsCliError> {
    let processor = RunProcessor::new(config(&cli.global))?;
    match cli.command {
        Commands::Compute => cmd_compute(&processor, cli.global.pretty),
        Commands::Check => cmd_check(&processor, cli.global.pretty),
        Commands::Validate => cmd_validate(&processor, cli.global.pretty),
        Commands::Har {
            input,
            scenario,
            output,
        } => cmd_har(&input, &scenario, output.as_deref(), cli.global.pretty),
    }
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<(), TimingsCliError> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{json}");
    Ok(())
}

fn cmd_compute(processor: &RunProcessor, pretty: bool) -> Result<(), TimingsCliError> {
    let reports = processor.process_all()?;
    if reports.is_empty() {
        return Err(TimingsCliError::NoRuns(processor.config().data_dir.clone()));
    }
    print_json(&reports, pretty)
}

#[derive(serde::Serialize)]
struct CheckReport {
    run: String,
    attempted: usize,
    successful: usize,
}

fn cmd_check(processor: &RunProcessor, pretty: bool) -> Result<(), TimingsCliError> {
    let runs = processor.runs()?;
    if runs.is_empty() {
        return Err(TimingsCliError::NoRuns(processor.config().data_dir.clone()));
    }
    let mut reports = Vec::with_capacity(runs.len());
    for run in &runs {
        let mut navtimings = run.read_navtimings().unwrap_or_default();
        navtimings.retain(|n| processor.config().matches_workload(&n.page));
        let rows = processor.check_success(run, &navtimings)?;
        reports.push(CheckReport {
            run: run.name(),
            attempted: rows.len(),
            successful: rows.iter().filter(|r| r.is_success()).count(),
        });
    }
    print_json(&reports, pretty)
}

#[derive(serde::Serialize)]
struct ValidateReport {
    run: String,
    objects: usize,
}

fn cmd_validate(processor: &RunProcessor, pretty: bool) -> Result<(), TimingsCliError> {
    let runs = processor.runs()?;
    if runs.is_empty() {
        return Err(TimingsCliError::NoRuns(processor.config().data_dir.clone()));
    }
    let mut reports = Vec::with_capacity(runs.len());
    for run in &runs {
        reports.push(ValidateReport {
            run: run.name(),
            objects: processor.validate_run(run)?,
        });
    }
    print_json(&reports, pretty)
}

#[derive(serde::Serialize)]
struct HarReport {
    output: PathBuf,
    entries: usize,
    body_size: i64,
}

fn cmd_har(
    input: &Path,
    scenario: &str,
    output: Option<&Path>,
    pretty: bool,
) -> Result<(), TimingsCliError> {
    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(format!("{}.log", input.display())));
    let timings = normalize_har_file(input, &output, scenario)?;
    let (entries, body_size) = HarDocument::from_path(input)?.object_count_and_body_size();
    info!(timings = timings.len(), output = %output.display(), "wrote HAR timings");
    print_json(
        &HarReport {
            output,
            entries,
            body_size,
        },
        pretty,
    )
}

// Error types

#[derive(Debug)]
enum TimingsCliError {
    Timings(TimingsError),
    Json(serde_json::Error),
    NoRuns(PathBuf),
}

impl From<TimingsError> for TimingsCliError {
    fn from(e: TimingsError) -> Self {
        TimingsCliError::Timings(e)
    }
}

impl From<serde_json::Error> for TimingsCliError {
    fn from(e: serde_json::Error) -> Self {
        TimingsCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<TimingsCliError> for CliError {
    fn from(e: TimingsCliError) -> Self {
        match e {
            TimingsCliError::Timings(TimingsError::Io(e)) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check the data directory and file permissions".to_string()),
            },
            TimingsCliError::Timings(TimingsError::JsonError(e)) => CliError {
                code: "HAR_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check that the input is a valid HAR file".to_string()),
            },
            TimingsCliError::Timings(e) => CliError {
                code: "TIMINGS_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            TimingsCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            TimingsCliError::NoRuns(dir) => CliError {
                code: "NO_RUNS".to_string(),
                message: format!("No run-* directories found in {}", dir.display()),
                hint: Some("Pass --data-dir or relax --run-filter".to_string()),
            },
        }
    }
}
