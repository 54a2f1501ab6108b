//! Live progress and the end-of-run report.
//!
//! [`StatusReporter`] owns the [`RunStatus`] for one invocation. The coordinator feeds it one
//! verdict per test; it keeps the counts, redraws a one-line status indicator when attached to a
//! terminal, and prints a failure digest at the end.

use crate::compare::Verdict;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt::Write as _;
use std::io::{self, Write};
use std::time::{Duration, Instant};

const BORDER_WIDTH: usize = 78;

/// Number of tests listed as slowest in the summary.
const SLOWEST_COUNT: usize = 5;

/// Format of the end-of-run report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportFormat {
    /// Progress and digest as human-readable text.
    #[default]
    Human,
    /// A single JSON object at the end; no progress output.
    Json,
}

/// One failed test, as kept in the run status and printed in the digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub name: String,
    pub reason: String,
    /// Diff or other supplementary text; may be empty.
    pub detail: String,
    /// Command line of the program under test, if one was built.
    pub command: Option<String>,
    /// Command that re-runs just this test.
    pub rerun: String,
}

/// Aggregate state of one invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub started_at: DateTime<Local>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub rebased: usize,
    #[serde(skip)]
    pub durations: Vec<(String, Duration)>,
    pub failures: Vec<FailureRecord>,
    #[serde(skip)]
    start: Instant,
}

impl RunStatus {
    pub fn new(total: usize) -> Self {
        Self {
            started_at: Local::now(),
            total,
            passed: 0,
            failed: 0,
            skipped: 0,
            rebased: 0,
            durations: Vec::new(),
            failures: Vec::new(),
            start: Instant::now(),
        }
    }

    pub fn completed(&self) -> usize {
        self.passed + self.failed + self.skipped
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Whether every test produced a verdict and none failed.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.completed() == self.total
    }

    /// The `count` longest-running tests that produced output, slowest first.
    pub fn slowest(&self, count: usize) -> Vec<(&str, Duration)> {
        let mut timed: Vec<_> = self
            .durations
            .iter()
            .map(|(name, duration)| (name.as_str(), *duration))
            .collect();
        timed.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        timed.truncate(count);
        timed
    }

    fn percent(&self) -> usize {
        if self.total == 0 {
            100
        } else {
            self.completed() * 100 / self.total
        }
    }

    fn counts(&self) -> String {
        format!("[+{}|-{}|~{}]", self.passed, self.failed, self.skipped)
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    #[serde(flatten)]
    status: &'a RunStatus,
    elapsed_secs: f64,
    slowest: Vec<TimedTest<'a>>,
}

#[derive(Serialize)]
struct TimedTest<'a> {
    name: &'a str,
    secs: f64,
}

/// Settings for a [`StatusReporter`].
#[derive(Debug, Clone, Default)]
pub struct ReporterOptions {
    pub format: ReportFormat,
    /// Print every test as it completes, plus diffs and command lines for failures.
    pub verbose: bool,
    /// Redraw a status line in place. Only sensible on a terminal.
    pub live: bool,
    /// Words that re-run the harness with the current settings; the test name is appended.
    pub rerun_prefix: Vec<String>,
}

/// Tracks verdicts and renders progress to `out`.
pub struct StatusReporter<W: Write> {
    out: W,
    status: RunStatus,
    options: ReporterOptions,
    /// Length of the status line currently on screen, 0 if none.
    line_len: usize,
}

impl<W: Write> StatusReporter<W> {
    pub fn new(out: W, total: usize, options: ReporterOptions) -> Self {
        Self {
            out,
            status: RunStatus::new(total),
            options,
            line_len: 0,
        }
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    fn human(&self) -> bool {
        self.options.format == ReportFormat::Human
    }

    /// Record the verdict of one test.
    ///
    /// `command` is the display form of the command that was run, if any.
    pub fn record(
        &mut self,
        name: &str,
        verdict: &Verdict,
        command: Option<&str>,
    ) -> io::Result<()> {
        match verdict {
            Verdict::Passed { duration } => {
                self.status.passed += 1;
                self.status.durations.push((name.to_string(), *duration));
                if self.options.verbose && self.human() {
                    self.clear_line()?;
                    writeln!(self.out, "+ {name} ({:.3}s)", duration.as_secs_f64())?;
                }
            }
            Verdict::Skipped => {
                self.status.skipped += 1;
                if self.options.verbose && self.human() {
                    self.clear_line()?;
                    writeln!(self.out, "~ {name} (slow, skipped)")?;
                }
            }
            Verdict::Failed { reason, diff } => {
                self.status.failed += 1;
                let record = FailureRecord {
                    name: name.to_string(),
                    reason: reason.clone(),
                    detail: diff.clone(),
                    command: command.map(str::to_string),
                    rerun: self.rerun_command(name),
                };
                if self.human() {
                    self.clear_line()?;
                    self.print_failure(&record)?;
                }
                self.status.failures.push(record);
            }
        }
        self.redraw()
    }

    /// Record a test whose expectations were rewritten.
    pub fn record_rebased(&mut self, name: &str, duration: Duration) -> io::Result<()> {
        self.status.rebased += 1;
        self.status.passed += 1;
        self.status.durations.push((name.to_string(), duration));
        if self.options.verbose && self.human() {
            self.clear_line()?;
            writeln!(self.out, "r {name} ({:.3}s)", duration.as_secs_f64())?;
        }
        self.redraw()
    }

    /// Refresh the status line while no verdict is arriving.
    pub fn tick(&mut self) -> io::Result<()> {
        self.redraw()
    }

    /// Print the final counts and, if anything failed, the failure digest.
    pub fn finish(&mut self) -> io::Result<()> {
        if !self.human() {
            let report = JsonReport {
                status: &self.status,
                elapsed_secs: self.status.elapsed().as_secs_f64(),
                slowest: self
                    .status
                    .slowest(SLOWEST_COUNT)
                    .into_iter()
                    .map(|(name, duration)| TimedTest {
                        name,
                        secs: duration.as_secs_f64(),
                    })
                    .collect(),
            };
            serde_json::to_writer_pretty(&mut self.out, &report)?;
            writeln!(self.out)?;
            return self.out.flush();
        }

        self.clear_line()?;
        writeln!(
            self.out,
            "{} ({:.2}s)",
            self.status.counts(),
            self.status.elapsed().as_secs_f64()
        )?;

        if self.options.verbose {
            let slowest = self.status.slowest(SLOWEST_COUNT);
            if !slowest.is_empty() {
                writeln!(self.out, "slowest:")?;
                for (name, duration) in slowest {
                    writeln!(self.out, "  {name} ({:.3}s)", duration.as_secs_f64())?;
                }
            }
        }

        if !self.status.failures.is_empty() {
            let border = "=".repeat(BORDER_WIDTH);
            writeln!(self.out, "{border}")?;
            writeln!(self.out, "FAILED TESTS ({}):", self.status.failures.len())?;
            for failure in &self.status.failures {
                writeln!(self.out, "- {}", failure.name)?;
                writeln!(self.out, "    reason:  {}", failure.reason)?;
                if let Some(command) = &failure.command {
                    writeln!(self.out, "    command: {command}")?;
                }
                writeln!(self.out, "    rerun:   {}", failure.rerun)?;
            }
            writeln!(self.out, "{border}")?;
        }
        self.out.flush()
    }

    fn print_failure(&mut self, failure: &FailureRecord) -> io::Result<()> {
        writeln!(self.out, "- {}: {}", failure.name, failure.reason)?;
        if self.options.verbose {
            if !failure.detail.is_empty() {
                write!(self.out, "{}", indent(&failure.detail, 4))?;
            }
            if let Some(command) = &failure.command {
                writeln!(self.out, "    cmd = {command}")?;
            }
        }
        Ok(())
    }

    fn rerun_command(&self, name: &str) -> String {
        shell_words::join(
            self.options
                .rerun_prefix
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(name)),
        )
    }

    fn redraw(&mut self) -> io::Result<()> {
        if !self.options.live || !self.human() {
            return Ok(());
        }
        let line = format!(
            "{} {}% ({:.2}s)",
            self.status.counts(),
            self.status.percent(),
            self.status.elapsed().as_secs_f64()
        );
        let pad = self.line_len.saturating_sub(line.len());
        write!(self.out, "\r{line}{}", " ".repeat(pad))?;
        self.line_len = line.len();
        self.out.flush()
    }

    fn clear_line(&mut self) -> io::Result<()> {
        if self.line_len > 0 {
            write!(self.out, "\r{}\r", " ".repeat(self.line_len))?;
            self.line_len = 0;
        }
        Ok(())
    }
}

/// Indent every line of `text` by `width` spaces, ending with a newline.
fn indent(text: &str, width: usize) -> String {
    let prefix = " ".repeat(width);
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let _ = writeln!(out, "{prefix}{line}");
    }
    out
}
