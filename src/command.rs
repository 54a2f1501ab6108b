//! Building the command line for a spec.

use crate::schema::TestSpec;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Harness-wide settings that affect how every spec's command is built.
#[derive(Debug, Clone)]
pub struct CommandSettings {
    /// Working directory for children; relative paths in specs are resolved against it.
    pub test_root: PathBuf,
    /// Executable used when a spec has no `exe` directive.
    pub default_executable: String,
    /// Executable used for every spec, regardless of `exe`. Must already be absolute.
    pub override_executable: Option<PathBuf>,
    /// Name the child sees as argv[0].
    pub argv0: String,
    /// Extra environment for every child.
    pub env: HashMap<String, String>,
}

/// A fully resolved command for one spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecCommand {
    /// The program image to launch.
    pub program: PathBuf,
    /// Logical argv[0] presented to the child.
    pub argv0: String,
    /// Arguments after argv[0].
    pub args: Vec<String>,
    /// Working directory of the child.
    pub cwd: PathBuf,
}

impl SpecCommand {
    /// A shell-quoted command line using the resolved program path.
    pub fn display(&self) -> String {
        let program = self.program.to_string_lossy();
        shell_words::join(
            std::iter::once(program.as_ref()).chain(self.args.iter().map(String::as_str)),
        )
    }

    /// A [`Command`] with no stdin and piped stdout/stderr.
    pub fn to_command(&self, env: &HashMap<String, String>) -> Command {
        let mut cmd = Command::new(&self.program);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.arg0(&self.argv0);
        }
        cmd.args(&self.args)
            .current_dir(&self.cwd)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

/// Build the command for a spec.
///
/// The program is the override executable if set, else the spec's `exe`, else the default.
/// Arguments are the flags, then the input file, then `--` and the args if there are any.
pub fn build_command(spec: &TestSpec, settings: &CommandSettings) -> SpecCommand {
    let program = match &settings.override_executable {
        Some(path) => path.clone(),
        None => resolve_program(
            &settings.test_root,
            spec.executable
                .as_deref()
                .unwrap_or(&settings.default_executable),
        ),
    };

    let mut args = spec.flags.clone();
    if let Some(file) = spec.input_file.as_deref().filter(|f| !f.is_empty()) {
        args.push(file.to_string());
    }
    if !spec.args.is_empty() {
        args.push("--".to_string());
        args.extend(spec.args.iter().cloned());
    }

    SpecCommand {
        program,
        argv0: settings.argv0.clone(),
        args,
        cwd: settings.test_root.clone(),
    }
}

/// Resolve a program path against the test root.
///
/// Bare names are left alone so they are looked up on `PATH`.
pub fn resolve_program(test_root: &Path, program: &str) -> PathBuf {
    let path = Path::new(program);
    if path.is_absolute() || path.components().count() == 1 {
        path.to_path_buf()
    } else {
        test_root.join(path)
    }
}
