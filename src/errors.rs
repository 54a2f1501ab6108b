//! Error types for every stage of a harness run.
//!
//! Per-test errors ([`ParseError`], [`LoadError`], [`ExecutionError`], [`RebaseError`]) are turned
//! into verdicts by the coordinator. Only [`HarnessError`] aborts the whole invocation.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A malformed spec file.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{name}: empty test file")]
    Empty { name: String },

    #[error("{name}:{line}: unknown directive `{key}` in `{text}`")]
    UnknownDirective {
        name: String,
        line: usize,
        key: String,
        text: String,
    },

    #[error("{name}:{line}: `{key}` already set (`{text}`)")]
    DuplicateDirective {
        name: String,
        line: usize,
        key: String,
        text: String,
    },

    #[error("{name}:{line}: `{key}` requires a value (`{text}`)")]
    MissingValue {
        name: String,
        line: usize,
        key: String,
        text: String,
    },

    #[error("{name}:{line}: `slow` takes no value (`{text}`)")]
    UnexpectedValue {
        name: String,
        line: usize,
        text: String,
    },

    #[error("{name}:{line}: invalid error code in `{text}`: {source}")]
    InvalidErrorCode {
        name: String,
        line: usize,
        text: String,
        source: std::num::ParseIntError,
    },

    #[error("{name}:{line}: cannot split `{text}` into words: {source}")]
    ShellWords {
        name: String,
        line: usize,
        text: String,
        source: shell_words::ParseError,
    },

    #[error("{name}:{line}: directive `{text}` inside STDOUT block")]
    DirectiveInStdout {
        name: String,
        line: usize,
        text: String,
    },

    #[error("{name}:{line}: header line is not valid UTF-8")]
    NonUtf8Header { name: String, line: usize },

    #[error("{name}: `stdout_file` cannot be combined with a STDOUT block")]
    ConflictingStdout { name: String },

    #[error("{name}: failed to read stdout file {}: {source}", .path.display())]
    StdoutFile {
        name: String,
        path: PathBuf,
        source: io::Error,
    },
}

impl ParseError {
    /// The name of the spec that failed to parse.
    pub fn spec_name(&self) -> &str {
        match self {
            ParseError::Empty { name }
            | ParseError::UnknownDirective { name, .. }
            | ParseError::DuplicateDirective { name, .. }
            | ParseError::MissingValue { name, .. }
            | ParseError::UnexpectedValue { name, .. }
            | ParseError::InvalidErrorCode { name, .. }
            | ParseError::ShellWords { name, .. }
            | ParseError::DirectiveInStdout { name, .. }
            | ParseError::NonUtf8Header { name, .. }
            | ParseError::ConflictingStdout { name }
            | ParseError::StdoutFile { name, .. } => name,
        }
    }
}

/// Failure to load a spec or the suite configuration from disk.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("invalid YAML in {}: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid TOML in {}: {source}", .path.display())]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("{field}: {message}")]
    Interpolation { field: String, message: String },
}

/// The program under test could not be run to completion.
///
/// A non-zero exit code is not an execution error; it is compared like any other output.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("{command}: failed to launch: {source}")]
    Spawn { command: String, source: io::Error },

    #[error("{command}: failed to wait for process: {source}")]
    Wait { command: String, source: io::Error },

    #[error("{command}: failed to capture {stream}: {source}")]
    Capture {
        command: String,
        stream: &'static str,
        source: io::Error,
    },

    #[error("{command}: interrupted")]
    Cancelled { command: String },
}

/// Failure to rewrite expectations in rebase mode.
#[derive(Debug, Error)]
#[error("failed to write {}: {source}", .path.display())]
pub struct RebaseError {
    pub path: PathBuf,
    pub source: io::Error,
}

/// An error that aborts the whole invocation.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("cannot read test root {}: {source}", .path.display())]
    TestRoot { path: PathBuf, source: io::Error },

    #[error("executable {} does not exist", .path.display())]
    MissingExecutable { path: PathBuf },

    #[error("invalid test pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        source: globset::Error,
    },

    #[error("invalid suite configuration: {0}")]
    Config(#[source] LoadError),

    #[error("failed to install signal handler: {0}")]
    Signal(#[source] io::Error),

    #[error("failed to write report: {0}")]
    Report(#[source] io::Error),

    #[error("run interrupted; {received} of {expected} results collected")]
    Interrupted { received: usize, expected: usize },

    #[error("worker pool finished with {received} of {expected} results")]
    LostResults { received: usize, expected: usize },
}
