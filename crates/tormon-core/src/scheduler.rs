//! Scheduler: run every job forever, each on its own task.
//!
//! Each job gets a dedicated tokio task that alternates between running a
//! tick and sleeping for the job's interval. The next sleep starts only after
//! the tick finished, so a slow tick pushes the following one back instead of
//! causing a burst of catch-up ticks, and a job never overlaps itself.
//!
//! A tick's `produce` future runs on a task of its own so that a panic is
//! contained to that tick. Errors and panics are logged and the loop carries
//! on; nothing a single tick does can stop the job or affect other jobs.

use std::any::Any;

use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::job::Job;
use crate::normalize::Fields;
use crate::publish::Publisher;

/// What happened during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Fields produced and accepted by the sink.
    Published,
    /// Fields produced but the sink write failed.
    Dropped,
    /// Producing fields failed; nothing was published.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    publisher: Publisher,
}

impl Scheduler {
    #[must_use]
    pub fn new(publisher: Publisher) -> Self {
        Self { publisher }
    }

    /// Start one task per job. Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(&self, jobs: Vec<Job>) -> SchedulerHandle {
        let mut tasks = JoinSet::new();
        let mut names = Vec::with_capacity(jobs.len());
        for job in jobs {
            names.push(job.name().to_string());
            let scheduler = self.clone();
            tasks.spawn(async move { scheduler.run(job).await });
        }
        info!(jobs = ?names, "Scheduler started");
        SchedulerHandle { tasks, names }
    }

    /// Run `job` forever: tick, then sleep for its interval.
    pub async fn run(&self, job: Job) {
        let mut ticks: u64 = 0;
        loop {
            ticks += 1;
            let started = Instant::now();
            let outcome = self.run_tick(&job).await;
            debug!(
                job = job.name(),
                tick = ticks,
                outcome = ?outcome,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Tick finished"
            );
            sleep(job.interval()).await;
        }
    }

    /// Run a single tick: produce, then publish on success.
    pub async fn run_tick(&self, job: &Job) -> TickOutcome {
        match produce_isolated(job).await {
            Ok(fields) => {
                if self.publisher.publish(job.measurement(), fields).await {
                    TickOutcome::Published
                } else {
                    TickOutcome::Dropped
                }
            }
            Err(err) if err.is_tick_recoverable() => {
                warn!(job = job.name(), error = %err, "Skipping tick");
                TickOutcome::Skipped
            }
            Err(err) => {
                error!(job = job.name(), error = %err, "Skipping tick after unexpected error");
                TickOutcome::Skipped
            }
        }
    }
}

/// Aborts the tick task when the job loop is dropped mid-tick.
struct TickTask(JoinHandle<Result<Fields, Error>>);

impl Drop for TickTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn produce_isolated(job: &Job) -> Result<Fields, Error> {
    let mut task = TickTask(tokio::spawn(job.produce()));
    match (&mut task.0).await {
        Ok(result) => result,
        Err(join) => Err(Error::Panicked(join_error_message(join))),
    }
}

fn join_error_message(err: JoinError) -> String {
    if err.is_cancelled() {
        return "tick was cancelled".to_string();
    }
    panic_message(err.into_panic().as_ref())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Handle to the running job tasks.
#[derive(Debug)]
pub struct SchedulerHandle {
    tasks: JoinSet<()>,
    names: Vec<String>,
}

impl SchedulerHandle {
    /// Names of the scheduled jobs, in spawn order.
    #[must_use]
    pub fn job_names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Abort every job task and wait for them to stop.
    pub async fn shutdown(mut self) {
        self.tasks.abort_all();
        while let Some(result) = self.tasks.join_next().await {
            if let Err(err) = result {
                if !err.is_cancelled() {
                    warn!(error = %err, "Job task ended abnormally");
                }
            }
        }
        debug!(jobs = ?self.names, "Scheduler stopped");
    }

    /// Wait for every job task. Job loops do not return, so this only
    /// completes if a task is aborted or the runtime shuts down.
    pub async fn join(mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(err) = result {
                warn!(error = %err, "Job task ended");
            }
        }
    }
}
