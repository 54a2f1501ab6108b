//! Worker pool that runs specs concurrently.
//!
//! Every selected spec is queued up front. Each worker repeatedly takes one spec without
//! blocking, runs it, and sends the outcome back on a shared result channel; it exits as soon as
//! the job queue is empty. The coordinator drains the result channel with a short timeout so it
//! can keep a status line alive while long tests run.
//!
//! Specs and results cross the channels by value. The only other shared state is the runner's
//! cancel flag.

use crate::errors::{ExecutionError, HarnessError};
use crate::runner::{ExecutionResult, Runner};
use crate::schema::TestSpec;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::io;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, warn};

/// How long the coordinator waits for a result before emitting [`PoolEvent::Idle`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A finished job: the spec and what running it produced.
#[derive(Debug)]
pub struct JobOutcome {
    pub spec: TestSpec,
    pub result: Result<ExecutionResult, ExecutionError>,
}

/// Events delivered to the coordinator's callback.
#[derive(Debug)]
pub enum PoolEvent {
    /// One job finished. Delivered exactly once per queued spec.
    Finished(Box<JobOutcome>),
    /// No result arrived within the poll interval.
    Idle,
}

/// A fixed-size pool of workers.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: usize,
    poll_interval: Duration,
}

impl WorkerPool {
    /// A pool with `workers` workers (at least one).
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// A pool sized to the host's parallelism.
    pub fn with_host_parallelism() -> Self {
        Self::new(num_cpus::get())
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run every spec and feed each outcome to `on_event`.
    ///
    /// Returns once every spec has produced exactly one [`PoolEvent::Finished`], the runner is
    /// cancelled, or `on_event` fails. In every case all workers are joined before returning.
    pub fn execute<F>(
        &self,
        runner: &Runner,
        specs: Vec<TestSpec>,
        mut on_event: F,
    ) -> Result<(), HarnessError>
    where
        F: FnMut(PoolEvent) -> Result<(), HarnessError>,
    {
        let expected = specs.len();
        if expected == 0 {
            return Ok(());
        }

        let (job_tx, job_rx) = crossbeam_channel::unbounded();
        for spec in specs {
            // The receiving end is alive until the end of this function.
            let _ = job_tx.send(spec);
        }
        drop(job_tx);

        let (result_tx, result_rx) = crossbeam_channel::unbounded();
        let workers = self.workers.min(expected);
        debug!(workers, jobs = expected, "starting worker pool");

        thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|id| {
                    let job_rx = job_rx.clone();
                    let result_tx = result_tx.clone();
                    scope.spawn(move || worker_loop(id, runner, job_rx, result_tx))
                })
                .collect();
            drop(result_tx);

            let outcome = self.collect(runner, &result_rx, expected, &mut on_event);
            if outcome.is_err() {
                runner.cancel();
            }

            for (id, handle) in handles.into_iter().enumerate() {
                if handle.join().is_err() {
                    error!(worker = id, "worker panicked");
                }
            }
            outcome
        })
    }

    fn collect<F>(
        &self,
        runner: &Runner,
        results: &Receiver<Box<JobOutcome>>,
        expected: usize,
        on_event: &mut F,
    ) -> Result<(), HarnessError>
    where
        F: FnMut(PoolEvent) -> Result<(), HarnessError>,
    {
        let mut received = 0;
        while received < expected {
            if runner.is_cancelled() {
                warn!(received, expected, "run cancelled");
                return Err(HarnessError::Interrupted { received, expected });
            }
            match results.recv_timeout(self.poll_interval) {
                Ok(outcome) => {
                    received += 1;
                    on_event(PoolEvent::Finished(outcome))?;
                }
                Err(RecvTimeoutError::Timeout) => on_event(PoolEvent::Idle)?,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(HarnessError::LostResults { received, expected });
                }
            }
        }
        Ok(())
    }
}

fn worker_loop(
    id: usize,
    runner: &Runner,
    jobs: Receiver<TestSpec>,
    results: Sender<Box<JobOutcome>>,
) {
    debug!(worker = id, "worker started");
    let mut ran = 0usize;
    while !runner.is_cancelled() {
        let Ok(spec) = jobs.try_recv() else {
            break;
        };
        let result = runner.run(&spec);
        ran += 1;
        if results.send(Box::new(JobOutcome { spec, result })).is_err() {
            break;
        }
    }
    debug!(worker = id, ran, "worker exiting");
}

/// Set `cancel` on SIGINT, SIGTERM or SIGQUIT.
///
/// A second signal after the flag is set exits the process immediately.
pub fn install_interrupt_handler(cancel: &Arc<AtomicBool>) -> io::Result<()> {
    for &signal in signal_hook::consts::TERM_SIGNALS {
        signal_hook::flag::register_conditional_shutdown(signal, 1, Arc::clone(cancel))?;
        signal_hook::flag::register(signal, Arc::clone(cancel))?;
    }
    Ok(())
}
