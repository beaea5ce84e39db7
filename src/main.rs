use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use reel_stabilizer::{
    analysis::{summarize, AlignmentLog},
    config::{Config, ProjectConfig},
    encoder::{probe_encoder, SystemLauncher},
    frames::FrameSequence,
    jobs::{run_suspend_command, JobEntry, JobQueue, JobRunner, JobStatus, PipelineExecutor},
    pipeline::{CancelFlag, ProjectRunner, RunOutcome, TracingSink},
    templates::verify_integrity,
};

#[derive(Parser)]
#[command(
    name = "reel-stabilizer",
    version,
    about = "Stabilize, crop and encode scanned 8mm film frames",
    long_about = "Reel-Stabilizer aligns every scanned frame on its sprocket hole, crops and renumbers the frames, and turns the sequence into a video with an external encoder."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (optional)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Process one project
    Process {
        /// Project file (TOML, or legacy JSON)
        #[arg(short, long)]
        project: PathBuf,

        /// Append alignment records to this CSV file
        #[arg(long)]
        log: Option<PathBuf>,
    },

    /// Run every pending job in a job list
    Batch {
        /// Job list file
        #[arg(short, long)]
        jobs: PathBuf,

        /// Run the configured suspend command when the batch completes
        #[arg(long)]
        suspend: bool,

        /// Append alignment records to this CSV file
        #[arg(long)]
        log: Option<PathBuf>,
    },

    /// Edit a job list
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// Check the stock pattern files
    VerifyTemplates,

    /// Summarize out-of-bounds frames in an alignment log
    Analyze {
        #[arg(short, long)]
        log: PathBuf,
    },

    /// Convert a legacy JSON project to the current format
    Migrate {
        #[arg(long)]
        legacy: PathBuf,

        #[arg(short, long)]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Snapshot a project into the job list
    Add {
        #[arg(short, long)]
        jobs: PathBuf,

        #[arg(short, long)]
        project: PathBuf,
    },

    /// Show jobs with their position
    List {
        #[arg(short, long)]
        jobs: PathBuf,
    },

    /// Queue a finished job again
    Rerun {
        #[arg(short, long)]
        jobs: PathBuf,

        /// Position as shown by `queue list`
        position: usize,
    },

    /// Delete a job
    Remove {
        #[arg(short, long)]
        jobs: PathBuf,

        /// Position as shown by `queue list`
        position: usize,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting Reel-Stabilizer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = match &cli.config {
        Some(config_path) => {
            info!("Loading configuration from {:?}", config_path);
            Config::from_file(config_path)?
        }
        None => {
            info!("Using default configuration");
            Config::default()
        }
    };
    config.validate()?;

    match cli.command {
        Command::Process { project, log } => process(config, &project, log).await,
        Command::Batch { jobs, suspend, log } => batch(config, &jobs, suspend, log).await,
        Command::Queue { action } => queue(action),
        Command::VerifyTemplates => Ok(check_templates(&config)),
        Command::Analyze { log } => analyze(&log),
        Command::Migrate { legacy, out } => migrate(&legacy, &out),
    }
}

/// Template check and encoder probe shared by `process` and `batch`
fn startup(config: &Config) -> Result<bool> {
    if config.templates.verify_integrity {
        verify_integrity(&config.templates.dir).map_err(|e| anyhow::anyhow!(e.user_message()))?;
        info!("🔒 Template integrity verified");
    }
    Ok(probe_encoder(&config.encoder.binary).is_ok())
}

/// Cancel flag tripped by Ctrl-C
fn cancel_on_ctrl_c() -> CancelFlag {
    let cancel = CancelFlag::new();
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling after the current step");
            flag.cancel();
        }
    });
    cancel
}

fn open_log(path: Option<PathBuf>) -> Result<Option<AlignmentLog>> {
    path.map(|p| AlignmentLog::create(&p).with_context(|| format!("cannot open alignment log {:?}", p)))
        .transpose()
}

async fn process(config: Config, project_path: &Path, log: Option<PathBuf>) -> Result<ExitCode> {
    let encoder_available = startup(&config)?;
    let project = ProjectConfig::load(project_path)?;
    let log = open_log(log)?;
    let cancel = cancel_on_ctrl_c();

    info!("🎬 Processing project {}", project.name());
    let result = tokio::task::spawn_blocking(move || {
        let runner = ProjectRunner::new(config, Arc::new(SystemLauncher)).with_encoder_available(encoder_available);
        let mut sink = (TracingSink::new(project.name()), log);
        runner.run(&project, cancel, &mut sink)
    })
    .await?;

    let outcome = match result {
        Ok(report) => report.outcome,
        Err(e) => RunOutcome::Failed(e.user_message()),
    };
    Ok(print_outcome("Project", &outcome))
}

async fn batch(config: Config, jobs_path: &Path, suspend: bool, log: Option<PathBuf>) -> Result<ExitCode> {
    let encoder_available = startup(&config)?;
    let mut jobs = JobQueue::load(jobs_path)?;
    if jobs.pending() == 0 {
        println!("Nothing to do: no pending jobs in {}", jobs_path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let log = open_log(log)?;
    let cancel = cancel_on_ctrl_c();
    let suspend_command = config.batch.suspend_command.clone();
    let persist = jobs_path.to_path_buf();

    let report = tokio::task::spawn_blocking(move || {
        let runner = ProjectRunner::new(config, Arc::new(SystemLauncher)).with_encoder_available(encoder_available);
        let executor = PipelineExecutor::new(runner, (TracingSink::new(""), log));
        let mut job_runner = JobRunner::new(executor).persist_to(persist);
        job_runner.run(&mut jobs, &cancel)
    })
    .await?;

    for result in &report.results {
        let outcome = match &result.status {
            JobStatus::Done => RunOutcome::Completed,
            JobStatus::Cancelled => RunOutcome::Cancelled,
            JobStatus::Failed(reason) => RunOutcome::Failed(reason.clone()),
        };
        print_outcome(&format!("Job {} ({})", result.index + 1, result.label), &outcome);
    }

    if report.was_cancelled() {
        print_outcome("Batch", &RunOutcome::Cancelled);
        return Ok(ExitCode::FAILURE);
    }
    if suspend {
        match suspend_command {
            Some(command) => run_suspend_command(&command)?,
            None => warn!("Suspend requested but no batch.suspend_command is configured"),
        }
    }
    let outcome = if report.failed() == 0 {
        RunOutcome::Completed
    } else {
        RunOutcome::Failed(format!("{} of {} jobs failed", report.failed(), report.results.len()))
    };
    Ok(print_outcome("Batch", &outcome))
}

fn queue(action: QueueAction) -> Result<ExitCode> {
    match action {
        QueueAction::Add { jobs, project } => {
            let mut queue = JobQueue::load(&jobs)?;
            let project = ProjectConfig::load(&project)?;
            let available = match FrameSequence::discover(&project.source_dir, &project.file_pattern) {
                Ok(sequence) => sequence.len(),
                Err(e) => {
                    warn!("Cannot count frames in {:?}: {}", project.source_dir, e);
                    0
                }
            };
            let index = queue.add(JobEntry::new(project, available))?;
            queue.save(&jobs)?;
            println!("Added job {}", index + 1);
        }
        QueueAction::List { jobs } => {
            let queue = JobQueue::load(&jobs)?;
            for (i, job) in queue.jobs().iter().enumerate() {
                let mark = if job.is_done() { "done" } else { "pending" };
                println!("{:>3}  [{}] {}", i + 1, mark, job.label());
            }
            println!("{} jobs, {} pending", queue.len(), queue.pending());
        }
        QueueAction::Rerun { jobs, position } => {
            let mut queue = JobQueue::load(&jobs)?;
            queue.rerun(zero_based(position)?)?;
            queue.save(&jobs)?;
            println!("Job {} queued again", position);
        }
        QueueAction::Remove { jobs, position } => {
            let mut queue = JobQueue::load(&jobs)?;
            let removed = queue.remove(zero_based(position)?)?;
            queue.save(&jobs)?;
            println!("Removed job: {}", removed.label());
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn zero_based(position: usize) -> Result<usize> {
    position
        .checked_sub(1)
        .ok_or_else(|| anyhow::anyhow!("job positions start at 1"))
}

fn check_templates(config: &Config) -> ExitCode {
    match verify_integrity(&config.templates.dir) {
        Ok(()) => {
            println!("✅ Templates in {} are intact", config.templates.dir.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("❌ {}", e.user_message());
            ExitCode::FAILURE
        }
    }
}

fn analyze(log: &Path) -> Result<ExitCode> {
    let runs = summarize(log).with_context(|| format!("cannot read alignment log {:?}", log))?;
    if runs.is_empty() {
        println!("No alignment records in {}", log.display());
    }
    for run in &runs {
        let header = match (run.first_frame, run.frame_count) {
            (Some(first), Some(count)) => format!(" (from frame {}, {} frames)", first, count),
            _ => String::new(),
        };
        println!(
            "{} run {}{}: {} of {} frames out of bounds",
            run.project,
            run.run + 1,
            header,
            run.out_of_bounds,
            run.aligned
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn migrate(legacy: &Path, out: &Path) -> Result<ExitCode> {
    let project = ProjectConfig::load(legacy)?;
    project.save_to_file(out)?;
    println!("✅ {} migrated to {}", project.name(), out.display());
    Ok(ExitCode::SUCCESS)
}

/// One line per terminal state
fn print_outcome(what: &str, outcome: &RunOutcome) -> ExitCode {
    match outcome {
        RunOutcome::Completed => {
            println!("✅ {} completed", what);
            ExitCode::SUCCESS
        }
        RunOutcome::Cancelled => {
            println!("⏹️  {} cancelled", what);
            ExitCode::FAILURE
        }
        RunOutcome::Failed(reason) => {
            println!("❌ {} failed: {}", what, reason);
            ExitCode::FAILURE
        }
    }
}
