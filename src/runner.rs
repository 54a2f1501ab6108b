//! Runs one spec as a subprocess and captures what it did.

use crate::command::{CommandSettings, SpecCommand, build_command};
use crate::errors::ExecutionError;
use crate::schema::TestSpec;
use serde::{Deserialize, Serialize};
use std::io::{self, Read};
use std::process::ExitStatus;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How often a running child is checked for exit or cancellation.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Captured outcome of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Exit code; `128 + signal` if the process was killed by a signal.
    pub exit_code: i32,
    /// Signal that terminated the process, if any.
    pub signal: Option<i32>,
    #[serde(serialize_with = "serialize_duration", deserialize_with = "deserialize_duration")]
    pub duration: Duration,
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

/// Runs specs with a fixed set of [`CommandSettings`].
///
/// Cheap to share between workers. Setting the cancel flag makes every in-flight [`Runner::run`]
/// kill its child and return [`ExecutionError::Cancelled`].
#[derive(Debug, Clone)]
pub struct Runner {
    settings: Arc<CommandSettings>,
    cancel: Arc<AtomicBool>,
}

impl Runner {
    pub fn new(settings: CommandSettings, cancel: Arc<AtomicBool>) -> Self {
        Self {
            settings: Arc::new(settings),
            cancel,
        }
    }

    /// The command that [`Runner::run`] would launch for `spec`.
    pub fn command(&self, spec: &TestSpec) -> SpecCommand {
        build_command(spec, &self.settings)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Ask every in-flight and future run to stop.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Run `spec` to completion.
    ///
    /// A non-zero exit is a normal result. Errors are reserved for failing to launch, wait on or
    /// read from the child, and for cancellation.
    pub fn run(&self, spec: &TestSpec) -> Result<ExecutionResult, ExecutionError> {
        let command = self.command(spec);
        let command_line = command.display();
        debug!(test = %spec.name, cmd = %command_line, "launching");

        let start = Instant::now();
        let mut child = command
            .to_command(&self.settings.env)
            .spawn()
            .map_err(|source| ExecutionError::Spawn {
                command: command_line.clone(),
                source,
            })?;
        let stdout_reader = spawn_reader(child.stdout.take());
        let stderr_reader = spawn_reader(child.stderr.take());

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if self.is_cancelled() => {
                    warn!(test = %spec.name, "killing child after interrupt");
                    let _ = child.kill();
                    let _ = child.wait();
                    // Grandchildren may still hold the pipes open; leave the readers detached.
                    drop((stdout_reader, stderr_reader));
                    return Err(ExecutionError::Cancelled { command: command_line });
                }
                Ok(None) => thread::sleep(WAIT_POLL_INTERVAL),
                Err(source) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ExecutionError::Wait {
                        command: command_line,
                        source,
                    });
                }
            }
        };
        let duration = start.elapsed();

        let stdout = collect(stdout_reader, "stdout", &command_line)?;
        let stderr = collect(stderr_reader, "stderr", &command_line)?;
        let (exit_code, signal) = exit_code(status);
        debug!(test = %spec.name, exit_code, ?signal, ?duration, "finished");

        Ok(ExecutionResult {
            stdout,
            stderr,
            exit_code,
            signal,
            duration,
        })
    }
}

/// Drain a pipe on its own thread so a chatty child never blocks on a full pipe.
fn spawn_reader<R>(pipe: Option<R>) -> JoinHandle<io::Result<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn collect(
    reader: JoinHandle<io::Result<Vec<u8>>>,
    stream: &'static str,
    command: &str,
) -> Result<Vec<u8>, ExecutionError> {
    let capture_error = |source| ExecutionError::Capture {
        command: command.to_string(),
        stream,
        source,
    };
    reader
        .join()
        .map_err(|_| capture_error(io::Error::other("reader thread panicked")))?
        .map_err(capture_error)
}

fn exit_code(status: ExitStatus) -> (i32, Option<i32>) {
    if let Some(code) = status.code() {
        return (code, None);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return (128 + signal, Some(signal));
        }
    }
    (-1, None)
}
