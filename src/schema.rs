//! Data model for spec files and the suite configuration.
//!
//! A spec file is plain text: a header of `# key: value` directives, then the literal expected
//! stderr, then an optional `# STDOUT:` marker followed by the literal expected stdout.
//! The suite configuration lives next to the specs as `specrun.yaml` or `specrun.toml`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// Default executable used when neither the spec nor the command line names one.
pub const DEFAULT_EXECUTABLE: &str = "../out/pnacl";

/// Name presented to the child as argv[0].
pub const DEFAULT_ARGV0: &str = "pnacl";

/// Extension of spec files, without the dot.
pub const DEFAULT_EXTENSION: &str = "txt";

/// Marker line separating the stderr block from the stdout block.
pub const STDOUT_MARKER: &str = "# STDOUT:";

/// One header directive kind.
///
/// Keys are matched case-insensitively. Anything else is a parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Directive {
    Exe,
    Flags,
    File,
    Error,
    Args,
    StdoutFile,
    Slow,
}

impl Directive {
    pub const ALL: [Directive; 7] = [
        Directive::Exe,
        Directive::Flags,
        Directive::File,
        Directive::Error,
        Directive::Args,
        Directive::StdoutFile,
        Directive::Slow,
    ];

    /// Look up a directive by key, ignoring ASCII case.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|d| d.key().eq_ignore_ascii_case(key))
    }

    pub fn key(self) -> &'static str {
        match self {
            Directive::Exe => "exe",
            Directive::Flags => "flags",
            Directive::File => "file",
            Directive::Error => "error",
            Directive::Args => "args",
            Directive::StdoutFile => "stdout_file",
            Directive::Slow => "slow",
        }
    }

    /// Whether the directive is a bare flag with no value.
    pub fn is_flag(self) -> bool {
        matches!(self, Directive::Slow)
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Where the expected stdout comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedStdout {
    /// Literal text following the `# STDOUT:` marker (empty when there is no marker).
    Inline(Vec<u8>),
    /// An external file named by `stdout_file`, compared byte for byte.
    File {
        /// The path as written in the directive.
        declared: String,
        /// The path resolved against the spec file's directory.
        path: PathBuf,
        contents: Vec<u8>,
    },
}

impl ExpectedStdout {
    pub fn bytes(&self) -> &[u8] {
        match self {
            ExpectedStdout::Inline(bytes) => bytes,
            ExpectedStdout::File { contents, .. } => contents,
        }
    }
}

impl Default for ExpectedStdout {
    fn default() -> Self {
        ExpectedStdout::Inline(Vec::new())
    }
}

/// One parsed spec file.
///
/// Immutable once parsed. Rebase rewrites the backing file, never this value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSpec {
    /// Path of the spec relative to the test root, with `/` separators.
    pub name: String,

    /// Path of the backing file on disk.
    pub path: PathBuf,

    /// Explicit program under test (`exe`).
    pub executable: Option<String>,

    /// Arguments inserted before the input file (`flags`).
    pub flags: Vec<String>,

    /// Positional input file (`file`).
    pub input_file: Option<String>,

    /// Arguments appended after a `--` separator (`args`).
    pub args: Vec<String>,

    /// Expected exit code (`error`, default 0).
    pub expected_exit_code: i32,

    /// Expected stderr, byte for byte.
    pub expected_stderr: Vec<u8>,

    /// Expected stdout.
    pub expected_stdout: ExpectedStdout,

    /// Skipped unless slow tests are requested (`slow`).
    pub slow: bool,

    /// Raw header text, reproduced verbatim on rebase.
    pub header: String,
}

/// Suite-level configuration loaded from the test root.
///
/// Every field is optional; command-line flags take precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuiteConfig {
    /// Default executable for specs without an `exe` directive.
    /// Supports `${VAR}` interpolation.
    #[serde(default)]
    pub exe: Option<String>,

    /// Name the child sees as argv[0].
    #[serde(default)]
    pub argv0: Option<String>,

    /// Spec file extension, without the dot.
    #[serde(default)]
    pub extension: Option<String>,

    /// Number of workers.
    #[serde(default)]
    pub jobs: Option<usize>,

    /// Include slow tests by default.
    #[serde(default)]
    pub slow: bool,

    /// Extra environment variables for every child process.
    /// Values support `${VAR}` interpolation.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl SuiteConfig {
    pub fn extension(&self) -> &str {
        self.extension.as_deref().unwrap_or(DEFAULT_EXTENSION)
    }

    pub fn executable(&self) -> &str {
        self.exe.as_deref().unwrap_or(DEFAULT_EXECUTABLE)
    }

    pub fn argv0(&self) -> &str {
        self.argv0.as_deref().unwrap_or(DEFAULT_ARGV0)
    }
}
