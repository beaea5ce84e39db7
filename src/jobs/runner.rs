use std::path::PathBuf;
use std::process::Command;

use tracing::{info, warn};

use super::entry::JobEntry;
use super::queue::JobQueue;
use crate::error::{Result, StabilizerError};
use crate::pipeline::{CancelFlag, EventSink, ProjectRunner, RunOutcome};

/// Runs one job to completion
pub trait JobExecutor {
    fn execute(&mut self, job: &JobEntry, cancel: &CancelFlag) -> Result<RunOutcome>;
}

/// Executes jobs through the frame pipeline and encoder
pub struct PipelineExecutor<S: EventSink> {
    runner: ProjectRunner,
    sink: S,
}

impl<S: EventSink> PipelineExecutor<S> {
    pub fn new(runner: ProjectRunner, sink: S) -> Self {
        Self { runner, sink }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

impl<S: EventSink> JobExecutor for PipelineExecutor<S> {
    fn execute(&mut self, job: &JobEntry, cancel: &CancelFlag) -> Result<RunOutcome> {
        let report = self.runner.run(job.project(), cancel.clone(), &mut self.sink)?;
        Ok(report.outcome)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Done,
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub index: usize,
    pub label: String,
    pub status: JobStatus,
}

/// What a batch did, job by job
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub results: Vec<JobResult>,
    /// The batch stopped on a cancel, whether or not a job was interrupted
    pub cancelled: bool,
}

impl BatchReport {
    pub fn completed(&self) -> usize {
        self.count(|s| matches!(s, JobStatus::Done))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, JobStatus::Failed(_)))
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    fn count(&self, pred: impl Fn(&JobStatus) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.status)).count()
    }
}

/// Works through a queue in insertion order, skipping finished jobs
///
/// A failed job stays pending so it can be rerun; the batch moves on to
/// the next one. A cancel stops the batch after the current job.
pub struct JobRunner<E: JobExecutor> {
    executor: E,
    persist: Option<PathBuf>,
}

impl<E: JobExecutor> JobRunner<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            persist: None,
        }
    }

    /// Save the queue to `path` whenever a job is marked done
    pub fn persist_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.persist = Some(path.into());
        self
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn run(&mut self, queue: &mut JobQueue, cancel: &CancelFlag) -> BatchReport {
        let mut report = BatchReport::default();
        info!("🎞️  Batch started, {} of {} jobs pending", queue.pending(), queue.len());

        for index in 0..queue.len() {
            let job = match queue.get(index) {
                Some(job) if !job.is_done() => job.clone(),
                _ => continue,
            };
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            info!("▶️  Job {}: {}", index + 1, job.label());
            let status = match self.executor.execute(&job, cancel) {
                Ok(RunOutcome::Completed) => JobStatus::Done,
                Ok(RunOutcome::Cancelled) => JobStatus::Cancelled,
                Ok(RunOutcome::Failed(reason)) => JobStatus::Failed(reason),
                Err(e) => JobStatus::Failed(e.user_message()),
            };

            match &status {
                JobStatus::Done => {
                    if let Err(e) = queue.mark_done(index) {
                        warn!("Could not mark job {} done: {}", index + 1, e);
                    }
                    self.save(queue);
                }
                JobStatus::Failed(reason) => warn!("Job '{}' failed: {}", job.label(), reason),
                JobStatus::Cancelled => warn!("Job '{}' cancelled", job.label()),
            }

            let stop = status == JobStatus::Cancelled;
            if stop {
                report.cancelled = true;
            }
            report.results.push(JobResult {
                index,
                label: job.label().to_string(),
                status,
            });
            if stop {
                break;
            }
        }

        info!(
            "Batch finished: {} done, {} failed{}",
            report.completed(),
            report.failed(),
            if report.was_cancelled() { ", cancelled" } else { "" }
        );
        report
    }

    fn save(&self, queue: &JobQueue) {
        if let Some(path) = &self.persist {
            if let Err(e) = queue.save(path) {
                warn!("Could not save job list to {}: {}", path.display(), e);
            }
        }
    }
}

/// Run the configured suspend command through the system shell
///
/// Kept apart from [`JobRunner::run`] so batch completion can be observed
/// without suspending the machine.
pub fn run_suspend_command(command: &str) -> Result<()> {
    info!("Suspending system: {}", command);
    let status = if cfg!(windows) {
        Command::new("cmd").args(["/C", command]).status()?
    } else {
        Command::new("sh").args(["-c", command]).status()?
    };
    if status.success() {
        Ok(())
    } else {
        Err(StabilizerError::generic(format!(
            "suspend command exited with {}",
            status
        )))
    }
}
