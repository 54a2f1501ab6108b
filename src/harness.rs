//! One invocation of the harness: discover, select, run and report.

use crate::command::CommandSettings;
use crate::compare::{self, Verdict};
use crate::errors::{HarnessError, LoadError};
use crate::loader::{self, SpecPath};
use crate::pool::{self, JobOutcome, PoolEvent, WorkerPool};
use crate::reporter::{ReportFormat, ReporterOptions, StatusReporter};
use crate::runner::Runner;
use crate::schema::{SuiteConfig, TestSpec};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::{debug, info, warn};

/// Name used when printing commands that re-run a single test.
const PROGRAM_NAME: &str = "specrun";

/// What to do in this invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Directory searched for specs; children run here.
    pub root: PathBuf,
    /// Glob patterns selecting tests by name. Empty selects everything.
    pub patterns: Vec<String>,
    /// Print the selected test names and stop.
    pub list: bool,
    /// Print the distinct executables the selected tests would run and stop.
    pub list_exes: bool,
    /// Rewrite expectations instead of comparing.
    pub rebase: bool,
    /// Run tests marked `slow`.
    pub slow: bool,
    /// Executable used for every test.
    pub exe: Option<PathBuf>,
    /// Worker count; defaults to the suite config, then to host parallelism.
    pub jobs: Option<usize>,
    pub verbose: bool,
    pub format: ReportFormat,
}

/// Run the harness. Returns whether every selected test passed or was skipped.
pub fn run(options: &RunOptions) -> Result<bool, HarnessError> {
    let root = std::path::absolute(&options.root).map_err(|source| HarnessError::TestRoot {
        path: options.root.clone(),
        source,
    })?;
    let config = loader::load_suite_config(&root).map_err(HarnessError::Config)?;
    let override_executable = options.exe.as_deref().map(resolve_override).transpose()?;

    let discovered = loader::find_specs(&root, config.extension()).map_err(|source| {
        HarnessError::TestRoot {
            path: root.clone(),
            source,
        }
    })?;
    let filter = build_filter(&options.patterns)?;
    let selected: Vec<SpecPath> = discovered
        .iter()
        .filter(|spec| filter.as_ref().is_none_or(|set| set.is_match(&spec.name)))
        .cloned()
        .collect();
    info!(
        discovered = discovered.len(),
        selected = selected.len(),
        root = %root.display(),
        "found tests"
    );

    if options.list {
        let mut stdout = io::stdout().lock();
        for spec in &selected {
            writeln!(stdout, "{}", spec.name).map_err(HarnessError::Report)?;
        }
        return Ok(true);
    }

    let settings = command_settings(&root, &config, override_executable.clone());
    let cancel = Arc::new(AtomicBool::new(false));
    let runner = Runner::new(settings, Arc::clone(&cancel));
    let loaded: Vec<(String, Result<TestSpec, LoadError>)> = selected
        .iter()
        .map(|spec| (spec.name.clone(), loader::load_spec(spec)))
        .collect();

    if options.list_exes {
        return list_executables(&runner, &loaded);
    }

    pool::install_interrupt_handler(&cancel).map_err(HarnessError::Signal)?;

    let include_slow = options.slow || config.slow;
    let mut reporter = StatusReporter::new(
        report_writer(options.format),
        loaded.len(),
        ReporterOptions {
            format: options.format,
            verbose: options.verbose,
            live: options.format == ReportFormat::Human && io::stderr().is_terminal(),
            rerun_prefix: rerun_prefix(&root, override_executable.as_deref(), include_slow),
        },
    );

    let mut jobs = Vec::with_capacity(loaded.len());
    for (name, spec) in loaded {
        match spec {
            Err(e) => {
                warn!(test = %name, error = %e, "failed to load test");
                reporter
                    .record(&name, &Verdict::failed(e.to_string()), None)
                    .map_err(HarnessError::Report)?;
            }
            Ok(spec) if spec.slow && !include_slow => {
                debug!(test = %name, "skipping slow test");
                reporter
                    .record(&name, &Verdict::Skipped, None)
                    .map_err(HarnessError::Report)?;
            }
            Ok(spec) => jobs.push(spec),
        }
    }

    let pool = options
        .jobs
        .or(config.jobs)
        .map(WorkerPool::new)
        .unwrap_or_else(WorkerPool::with_host_parallelism);
    info!(jobs = jobs.len(), workers = pool.workers(), rebase = options.rebase, "running tests");

    let executed = pool.execute(&runner, jobs, |event| match event {
        PoolEvent::Idle => reporter.tick().map_err(HarnessError::Report),
        PoolEvent::Finished(outcome) => {
            handle_outcome(&runner, &mut reporter, *outcome, options.rebase)
                .map_err(HarnessError::Report)
        }
    });
    reporter.finish().map_err(HarnessError::Report)?;
    executed?;

    Ok(reporter.status().is_success())
}

/// Turn one finished job into a verdict, rewriting the spec in rebase mode.
fn handle_outcome<W: Write>(
    runner: &Runner,
    reporter: &mut StatusReporter<W>,
    outcome: JobOutcome,
    rebase: bool,
) -> io::Result<()> {
    let JobOutcome { spec, result } = outcome;
    let command = runner.command(&spec).display();

    let result = match result {
        Ok(result) => result,
        Err(e) => {
            return reporter.record(&spec.name, &Verdict::failed(e.to_string()), Some(&command));
        }
    };

    if !rebase {
        let verdict = compare::diff(&spec, &result);
        return reporter.record(&spec.name, &verdict, Some(&command));
    }

    if result.exit_code != spec.expected_exit_code {
        warn!(
            test = %spec.name,
            expected = spec.expected_exit_code,
            actual = result.exit_code,
            "exit code differs; `error` directive is not rewritten"
        );
    }
    match compare::rebase(&spec, &result) {
        Ok(()) => reporter.record_rebased(&spec.name, result.duration),
        Err(e) => reporter.record(&spec.name, &Verdict::failed(e.to_string()), Some(&command)),
    }
}

/// Make the `--exe` override absolute and check that it exists.
fn resolve_override(exe: &Path) -> Result<PathBuf, HarnessError> {
    let path = std::path::absolute(exe).map_err(|_| HarnessError::MissingExecutable {
        path: exe.to_path_buf(),
    })?;
    if !path.exists() {
        return Err(HarnessError::MissingExecutable { path });
    }
    Ok(path)
}

fn build_filter(patterns: &[String]) -> Result<Option<GlobSet>, HarnessError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| HarnessError::Pattern {
            pattern: pattern.clone(),
            source,
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map(Some)
        .map_err(|source| HarnessError::Pattern {
            pattern: patterns.join(" "),
            source,
        })
}

fn command_settings(
    root: &Path,
    config: &SuiteConfig,
    override_executable: Option<PathBuf>,
) -> CommandSettings {
    CommandSettings {
        test_root: root.to_path_buf(),
        default_executable: config.executable().to_string(),
        override_executable,
        argv0: config.argv0().to_string(),
        env: config.env.clone(),
    }
}

fn list_executables(
    runner: &Runner,
    loaded: &[(String, Result<TestSpec, LoadError>)],
) -> Result<bool, HarnessError> {
    let mut programs = BTreeSet::new();
    let mut ok = true;
    for (name, spec) in loaded {
        match spec {
            Ok(spec) => {
                programs.insert(runner.command(spec).program);
            }
            Err(e) => {
                warn!(test = %name, error = %e, "failed to load test");
                ok = false;
            }
        }
    }
    let mut stdout = io::stdout().lock();
    for program in programs {
        writeln!(stdout, "{}", program.display()).map_err(HarnessError::Report)?;
    }
    Ok(ok)
}

fn report_writer(format: ReportFormat) -> Box<dyn Write> {
    match format {
        ReportFormat::Human => Box::new(io::stderr()),
        ReportFormat::Json => Box::new(io::stdout()),
    }
}

fn rerun_prefix(root: &Path, exe: Option<&Path>, slow: bool) -> Vec<String> {
    let mut words = vec![
        PROGRAM_NAME.to_string(),
        "--root".to_string(),
        root.display().to_string(),
    ];
    if let Some(exe) = exe {
        words.push("--exe".to_string());
        words.push(exe.display().to_string());
    }
    if slow {
        words.push("--slow".to_string());
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn filter_matches_full_names_across_directories() {
        let filter = build_filter(&["*bar*".to_string()]).unwrap().unwrap();
        assert!(filter.is_match("foo/bar.txt"));
        assert!(filter.is_match("bar.txt"));
        assert!(!filter.is_match("foo/baz.txt"));
    }

    #[test]
    fn any_pattern_selects() {
        let filter = build_filter(&["a.txt".to_string(), "dir/*".to_string()])
            .unwrap()
            .unwrap();
        assert!(filter.is_match("a.txt"));
        assert!(filter.is_match("dir/b.txt"));
        assert!(!filter.is_match("b.txt"));
    }

    #[test]
    fn no_patterns_select_everything() {
        assert!(build_filter(&[]).unwrap().is_none());
    }

    #[test]
    fn invalid_pattern_is_fatal() {
        let err = build_filter(&["a[".to_string()]).unwrap_err();
        assert!(matches!(err, HarnessError::Pattern { ref pattern, .. } if pattern == "a["));
    }

    #[test]
    fn override_must_exist() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            resolve_override(&missing),
            Err(HarnessError::MissingExecutable { .. })
        ));
        let present = dir.path().join("tool");
        std::fs::write(&present, "").unwrap();
        assert_eq!(resolve_override(&present).unwrap(), present);
    }

    #[test]
    fn rerun_prefix_carries_overrides() {
        let words = rerun_prefix(Path::new("/t"), Some(Path::new("/bin/x")), true);
        assert_eq!(words, vec!["specrun", "--root", "/t", "--exe", "/bin/x", "--slow"]);
        assert_eq!(rerun_prefix(Path::new("/t"), None, false), vec!["specrun", "--root", "/t"]);
    }

    #[test]
    fn missing_root_is_fatal() {
        let dir = tempdir().unwrap();
        let options = RunOptions {
            root: dir.path().join("absent"),
            list: true,
            ..RunOptions::default()
        };
        assert!(matches!(run(&options), Err(HarnessError::TestRoot { .. })));
    }
}
