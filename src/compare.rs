//! Comparing captured output against a spec, and rewriting specs in rebase mode.

use crate::errors::RebaseError;
use crate::parser::render_spec;
use crate::runner::ExecutionResult;
use crate::schema::{ExpectedStdout, TestSpec};
use serde::Serialize;
use similar::TextDiff;
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Lines of context around each hunk.
const DIFF_CONTEXT: usize = 3;

/// Outcome of one test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Passed {
        #[serde(serialize_with = "serialize_duration")]
        duration: Duration,
    },
    Failed {
        /// Primary cause, on one line.
        reason: String,
        /// Supplementary diff text; may be empty.
        diff: String,
    },
    Skipped,
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

impl Verdict {
    pub fn failed(reason: impl Into<String>) -> Self {
        Verdict::Failed {
            reason: reason.into(),
            diff: String::new(),
        }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, Verdict::Passed { .. })
    }

    /// The reason followed by the diff, if any.
    pub fn message(&self) -> Option<String> {
        match self {
            Verdict::Failed { reason, diff } if diff.is_empty() => Some(reason.clone()),
            Verdict::Failed { reason, diff } => Some(format!("{reason}\n{diff}")),
            _ => None,
        }
    }
}

/// Compare a run against its spec.
///
/// An exit-code mismatch is always the primary reason; any body mismatch is still rendered and
/// attached as the diff.
pub fn diff(spec: &TestSpec, result: &ExecutionResult) -> Verdict {
    let mut mismatches = Vec::new();

    if result.stderr != spec.expected_stderr {
        mismatches.push((
            "stderr mismatch".to_string(),
            unified_diff(&spec.expected_stderr, &result.stderr),
        ));
    }

    if result.stdout != spec.expected_stdout.bytes() {
        match &spec.expected_stdout {
            ExpectedStdout::File { .. } => {
                mismatches.push(("stdout binary mismatch".to_string(), String::new()));
            }
            ExpectedStdout::Inline(expected) => {
                mismatches.push((
                    "stdout mismatch".to_string(),
                    unified_diff(expected, &result.stdout),
                ));
            }
        }
    }

    let exit_mismatch = (result.exit_code != spec.expected_exit_code).then(|| {
        let mut reason = format!(
            "expected error code {}, got {}.",
            spec.expected_exit_code, result.exit_code
        );
        if let Some(signal) = result.signal {
            let _ = write!(reason, " (terminated by signal {signal})");
        }
        reason
    });

    if exit_mismatch.is_none() && mismatches.is_empty() {
        return Verdict::Passed {
            duration: result.duration,
        };
    }

    let (reason, details) = match exit_mismatch {
        Some(reason) => (reason, mismatches.as_slice()),
        None => {
            let (first, _) = &mismatches[0];
            (first.clone(), mismatches.as_slice())
        }
    };

    let mut diff = String::new();
    for (label, body) in details {
        let primary = diff.is_empty() && *label == reason;
        match (primary, body.is_empty()) {
            (true, true) => {}
            (true, false) => diff.push_str(body),
            (false, true) => {
                let _ = writeln!(diff, "{label}");
            }
            (false, false) => {
                let _ = write!(diff, "{label}:\n{body}");
            }
        }
    }

    Verdict::Failed { reason, diff }
}

/// Render two bodies as a unified diff between `expected` and `actual`.
pub fn unified_diff(expected: &[u8], actual: &[u8]) -> String {
    let expected = String::from_utf8_lossy(expected);
    let actual = String::from_utf8_lossy(actual);
    TextDiff::from_lines(expected.as_ref(), actual.as_ref())
        .unified_diff()
        .context_radius(DIFF_CONTEXT)
        .header("expected", "actual")
        .to_string()
}

/// Overwrite the spec's backing file with the run's output as the new expectations.
///
/// Header directives are kept verbatim. With `stdout_file`, the external file receives stdout
/// instead of the spec.
pub fn rebase(spec: &TestSpec, result: &ExecutionResult) -> Result<(), RebaseError> {
    let contents = match &spec.expected_stdout {
        ExpectedStdout::File { path, .. } => {
            write(path, &result.stdout)?;
            render_spec(&spec.header, &result.stderr, None)
        }
        ExpectedStdout::Inline(_) => {
            if !result.stdout.is_empty()
                && !result.stderr.is_empty()
                && !result.stderr.ends_with(b"\n")
            {
                warn!(
                    test = %spec.name,
                    "stderr has no trailing newline; the rebased spec will expect one"
                );
            }
            render_spec(&spec.header, &result.stderr, Some(&result.stdout))
        }
    };
    write(&spec.path, &contents)?;
    info!(test = %spec.name, path = %spec.path.display(), "rebased");
    Ok(())
}

fn write(path: &Path, contents: &[u8]) -> Result<(), RebaseError> {
    std::fs::write(path, contents).map_err(|source| RebaseError {
        path: path.to_path_buf(),
        source,
    })
}
