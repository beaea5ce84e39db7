//! Unattended batch processing of queued projects

pub mod entry;
pub mod queue;
pub mod runner;

pub use entry::{job_label, JobEntry};
pub use queue::JobQueue;
pub use runner::{run_suspend_command, BatchReport, JobExecutor, JobResult, JobRunner, JobStatus, PipelineExecutor};
