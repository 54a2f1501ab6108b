use clap::{ArgAction, Parser, ValueEnum};
use specrun::harness::{self, RunOptions};
use specrun::reporter::ReportFormat;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    /// Live progress and a failure digest on stderr
    #[default]
    Human,
    /// A single JSON report on stdout
    Json,
}

impl From<OutputFormat> for ReportFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Human => ReportFormat::Human,
            OutputFormat::Json => ReportFormat::Json,
        }
    }
}

#[derive(Parser)]
#[command(name = "specrun")]
#[command(about = "Run golden-output tests against a command-line program")]
#[command(version)]
struct Cli {
    /// Glob patterns selecting tests by name (default: all tests)
    patterns: Vec<String>,
    /// More output; repeat for debug logging
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    /// List selected tests and exit
    #[arg(short, long)]
    list: bool,
    /// List the executables the selected tests run and exit
    #[arg(long)]
    list_exes: bool,
    /// Rewrite expectations from the current output
    #[arg(short, long)]
    rebase: bool,
    /// Include tests marked slow
    #[arg(short, long)]
    slow: bool,
    /// Run every test with this executable
    #[arg(short, long, value_name = "PATH")]
    exe: Option<PathBuf>,
    /// Number of workers (default: available parallelism)
    #[arg(short, long)]
    jobs: Option<usize>,
    /// Directory containing the tests
    #[arg(long, value_name = "DIR", default_value = ".")]
    root: PathBuf,
    /// Format of the final report
    #[arg(short, long, default_value = "human")]
    output: OutputFormat,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .try_init();

    let options = RunOptions {
        root: cli.root,
        patterns: cli.patterns,
        list: cli.list,
        list_exes: cli.list_exes,
        rebase: cli.rebase,
        slow: cli.slow,
        exe: cli.exe,
        jobs: cli.jobs,
        verbose: cli.verbose > 0,
        format: cli.output.into(),
    };

    match harness::run(&options) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
