//! Drives one encode from precondition checks to a terminal state
//!
//! States move strictly `Pending -> Running -> Completed`. A failed
//! precondition goes from `Pending` straight to `Completed { success: false }`
//! without ever starting the encoder.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::command::{EncoderCommand, FillBorders};
use super::process::{EncoderLauncher, EncoderProcess, LinePoll};
use super::progress::{parse_progress_line, ProgressLine};
use crate::error::{EncoderError, Result, StabilizerError};
use crate::frames::OutputNaming;
use crate::pipeline::{CancelFlag, EventSink, PipelineEvent, RunOutcome, Step};

const STAGE: &str = "video";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingState {
    Pending,
    Running,
    Completed { success: bool },
}

/// What to encode and how
#[derive(Debug, Clone)]
pub struct EncodeJob {
    pub binary: String,
    /// Directory holding the stabilized frames
    pub target_dir: PathBuf,
    pub naming: OutputNaming,
    /// Absolute number of the first frame to encode
    pub first_frame: u32,
    pub frame_count: usize,
    pub framerate: u32,
    pub input_size: Option<(u32, u32)>,
    pub scale: Option<String>,
    pub fill_borders: Option<FillBorders>,
    pub preset: String,
    pub crf: u8,
    pub output: PathBuf,
}

impl EncodeJob {
    pub fn command(&self) -> EncoderCommand {
        EncoderCommand {
            binary: self.binary.clone(),
            start_number: self.first_frame,
            framerate: self.framerate,
            input_pattern: self.target_dir.join(self.naming.encoder_pattern()),
            input_size: self.input_size,
            frame_count: Some(self.frame_count),
            fill_borders: self.fill_borders.clone(),
            scale: self.scale.clone(),
            preset: self.preset.clone(),
            crf: self.crf,
            output: self.output.clone(),
        }
    }

    /// Every numbered input the encoder will read must exist
    pub fn check_inputs(&self) -> Result<()> {
        if self.frame_count == 0 {
            return Err(EncoderError::RangeEmpty.into());
        }
        let missing: Vec<PathBuf> = (0..self.frame_count as u32)
            .map(|offset| self.naming.path_in(&self.target_dir, self.first_frame + offset))
            .filter(|path| !path.is_file())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(EncoderError::FramesMissing {
                expected: self.frame_count,
                missing,
            }
            .into())
        }
    }
}

/// Summary of a finished encode
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeReport {
    pub outcome: RunOutcome,
    pub frames_encoded: u64,
    pub desyncs: usize,
    pub output: PathBuf,
}

pub struct EncoderOrchestrator {
    launcher: Arc<dyn EncoderLauncher>,
    job: EncodeJob,
    poll_interval: Duration,
    state: EncodingState,
    process: Option<Box<dyn EncoderProcess>>,
    frames_encoded: u64,
    desyncs: usize,
    outcome: Option<RunOutcome>,
}

impl std::fmt::Debug for EncoderOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderOrchestrator")
            .field("job", &self.job)
            .field("state", &self.state)
            .field("frames_encoded", &self.frames_encoded)
            .finish()
    }
}

impl EncoderOrchestrator {
    pub fn new(launcher: Arc<dyn EncoderLauncher>, job: EncodeJob, poll_interval: Duration) -> Self {
        Self {
            launcher,
            job,
            poll_interval,
            state: EncodingState::Pending,
            process: None,
            frames_encoded: 0,
            desyncs: 0,
            outcome: None,
        }
    }

    pub fn state(&self) -> EncodingState {
        self.state
    }

    pub fn job(&self) -> &EncodeJob {
        &self.job
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }

    /// Advance by one tick, never blocking longer than the poll interval
    /// except while reaping an exited process
    pub fn step(&mut self, cancel: &CancelFlag, sink: &mut dyn EventSink) -> Step {
        match self.state {
            EncodingState::Pending => self.start(sink),
            EncodingState::Running => self.poll(cancel, sink),
            EncodingState::Completed { success: true } => Step::Done,
            EncodingState::Completed { success: false } => Step::Failed,
        }
    }

    /// Step until a terminal state
    pub fn run(&mut self, cancel: &CancelFlag, sink: &mut dyn EventSink) -> EncodeReport {
        while self.step(cancel, sink) == Step::Continue {}
        self.report()
    }

    pub fn report(&self) -> EncodeReport {
        EncodeReport {
            outcome: self
                .outcome
                .clone()
                .unwrap_or_else(|| RunOutcome::Failed("encode not finished".to_string())),
            frames_encoded: self.frames_encoded,
            desyncs: self.desyncs,
            output: self.job.output.clone(),
        }
    }

    fn start(&mut self, sink: &mut dyn EventSink) -> Step {
        if let Err(e) = self.job.check_inputs() {
            return self.fail(e, sink);
        }

        let command = self.job.command();
        match self.launcher.launch(&command) {
            Ok(process) => {
                info!(
                    "🎬 Encoding {} frames from {} into {}",
                    self.job.frame_count,
                    self.job.first_frame,
                    self.job.output.display()
                );
                self.process = Some(process);
                self.state = EncodingState::Running;
                Step::Continue
            }
            Err(e) => self.fail(e, sink),
        }
    }

    fn poll(&mut self, cancel: &CancelFlag, sink: &mut dyn EventSink) -> Step {
        let process = match self.process.as_mut() {
            Some(process) => process,
            None => return self.fail(StabilizerError::generic("encoder process lost"), sink),
        };

        if cancel.is_cancelled() {
            if let Err(e) = process.terminate() {
                warn!("Failed to stop encoder: {}", e);
            }
            self.process = None;
            remove_partial_output(&self.job.output);
            return self.finish(RunOutcome::Cancelled, sink);
        }

        match process.poll_line(self.poll_interval) {
            LinePoll::Line(line) => {
                match parse_progress_line(&line) {
                    ProgressLine::Frame(frame) => {
                        self.frames_encoded = frame;
                        sink.emit(&PipelineEvent::EncoderProgress {
                            frames_encoded: frame,
                            total: self.job.frame_count,
                        });
                    }
                    ProgressLine::Desync(line) => {
                        self.desyncs += 1;
                        sink.emit(&PipelineEvent::Desync { line });
                    }
                    ProgressLine::Empty => {}
                }
                Step::Continue
            }
            LinePoll::Idle => Step::Continue,
            LinePoll::Closed => {
                let exit = process.wait();
                self.process = None;
                match exit {
                    Ok(exit) if exit.success => {
                        debug!("Encoder exited cleanly after {} frames", self.frames_encoded);
                        self.finish(RunOutcome::Completed, sink)
                    }
                    Ok(exit) => self.fail(EncoderError::ProcessFailure { code: exit.code }.into(), sink),
                    Err(e) => self.fail(e, sink),
                }
            }
        }
    }

    fn fail(&mut self, error: StabilizerError, sink: &mut dyn EventSink) -> Step {
        self.finish(RunOutcome::Failed(error.user_message()), sink)
    }

    fn finish(&mut self, outcome: RunOutcome, sink: &mut dyn EventSink) -> Step {
        let success = outcome.is_completed();
        self.state = EncodingState::Completed { success };
        sink.emit(&PipelineEvent::Status {
            stage: STAGE,
            outcome: outcome.clone(),
        });
        self.outcome = Some(outcome);
        if success {
            Step::Done
        } else {
            Step::Failed
        }
    }
}

fn remove_partial_output(path: &Path) {
    if path.exists() {
        match std::fs::remove_file(path) {
            Ok(()) => info!("Removed partial video {}", path.display()),
            Err(e) => warn!("Could not remove partial video {}: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::process::ProcessExit;
    use crate::pipeline::CollectingSink;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct ScriptedProcess {
        lines: VecDeque<String>,
        exit: ProcessExit,
        terminated: Arc<AtomicUsize>,
    }

    impl EncoderProcess for ScriptedProcess {
        fn poll_line(&mut self, _wait: Duration) -> LinePoll {
            match self.lines.pop_front() {
                Some(line) => LinePoll::Line(line),
                None => LinePoll::Closed,
            }
        }

        fn wait(&mut self) -> Result<ProcessExit> {
            Ok(self.exit)
        }

        fn terminate(&mut self) -> Result<()> {
            self.terminated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeLauncher {
        spawns: AtomicUsize,
        terminated: Arc<AtomicUsize>,
        lines: Vec<String>,
        exit: ProcessExit,
        last_command: Mutex<Option<EncoderCommand>>,
    }

    impl FakeLauncher {
        fn new(lines: &[&str], success: bool) -> Arc<Self> {
            Arc::new(Self {
                spawns: AtomicUsize::new(0),
                terminated: Arc::new(AtomicUsize::new(0)),
                lines: lines.iter().map(|l| l.to_string()).collect(),
                exit: ProcessExit {
                    success,
                    code: Some(if success { 0 } else { 1 }),
                },
                last_command: Mutex::new(None),
            })
        }
    }

    impl EncoderLauncher for FakeLauncher {
        fn launch(&self, command: &EncoderCommand) -> Result<Box<dyn EncoderProcess>> {
            self.spawns.fetch_add(1, Ordering::SeqCst);
            *self.last_command.lock().unwrap() = Some(command.clone());
            Ok(Box::new(ScriptedProcess {
                lines: self.lines.iter().cloned().collect(),
                exit: self.exit,
                terminated: self.terminated.clone(),
            }))
        }
    }

    fn job(dir: &TempDir, first: u32, count: usize) -> EncodeJob {
        EncodeJob {
            binary: "ffmpeg".to_string(),
            target_dir: dir.path().to_path_buf(),
            naming: OutputNaming::default(),
            first_frame: first,
            frame_count: count,
            framerate: 18,
            input_size: Some((320, 240)),
            scale: None,
            fill_borders: None,
            preset: "veryfast".to_string(),
            crf: 18,
            output: dir.path().join("out.mp4"),
        }
    }

    fn write_frames(dir: &TempDir, first: u32, count: u32) {
        let naming = OutputNaming::default();
        for n in first..first + count {
            std::fs::write(naming.path_in(dir.path(), n), b"jpg").unwrap();
        }
    }

    #[test]
    fn test_empty_range_never_spawns() {
        let dir = TempDir::new().unwrap();
        let launcher = FakeLauncher::new(&[], true);
        let mut orchestrator =
            EncoderOrchestrator::new(launcher.clone(), job(&dir, 100, 0), Duration::from_millis(1));
        let mut sink = CollectingSink::new();

        assert_eq!(orchestrator.step(&CancelFlag::new(), &mut sink), Step::Failed);
        assert_eq!(orchestrator.state(), EncodingState::Completed { success: false });
        assert_eq!(launcher.spawns.load(Ordering::SeqCst), 0);
        assert_eq!(sink.statuses().len(), 1);
    }

    #[test]
    fn test_missing_frames_never_spawn() {
        let dir = TempDir::new().unwrap();
        write_frames(&dir, 100, 4);
        let launcher = FakeLauncher::new(&[], true);
        let encode = job(&dir, 100, 5);

        match encode.check_inputs() {
            Err(StabilizerError::Encoder(EncoderError::FramesMissing { expected, missing })) => {
                assert_eq!(expected, 5);
                assert_eq!(missing, vec![dir.path().join("picture_out-00104.jpg")]);
            }
            other => panic!("unexpected {:?}", other),
        }

        let mut orchestrator = EncoderOrchestrator::new(launcher.clone(), encode, Duration::from_millis(1));
        let report = orchestrator.run(&CancelFlag::new(), &mut CollectingSink::new());
        assert!(matches!(report.outcome, RunOutcome::Failed(_)));
        assert_eq!(launcher.spawns.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_successful_encode_reports_progress() {
        let dir = TempDir::new().unwrap();
        write_frames(&dir, 100, 3);
        let launcher = FakeLauncher::new(&["frame=    1 fps=0.0", "frame=    3 fps=2.1 q=-1.0"], true);
        let mut orchestrator =
            EncoderOrchestrator::new(launcher.clone(), job(&dir, 100, 3), Duration::from_millis(1));
        let mut sink = CollectingSink::new();

        let report = orchestrator.run(&CancelFlag::new(), &mut sink);
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.frames_encoded, 3);
        assert_eq!(orchestrator.state(), EncodingState::Completed { success: true });
        assert_eq!(launcher.spawns.load(Ordering::SeqCst), 1);
        assert_eq!(sink.statuses(), vec![("video", RunOutcome::Completed)]);

        let command = launcher.last_command.lock().unwrap().clone().unwrap();
        assert_eq!(command.start_number, 100);
        assert_eq!(command.frame_count, Some(3));
        assert_eq!(command.input_pattern, dir.path().join("picture_out-%05d.jpg"));
    }

    #[test]
    fn test_desync_line_does_not_stop_encode() {
        let dir = TempDir::new().unwrap();
        write_frames(&dir, 1, 2);
        let launcher = FakeLauncher::new(&["frame=    1", "fr@me garbage", "frame=    2"], true);
        let mut orchestrator = EncoderOrchestrator::new(launcher, job(&dir, 1, 2), Duration::from_millis(1));
        let mut sink = CollectingSink::new();

        let report = orchestrator.run(&CancelFlag::new(), &mut sink);
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.desyncs, 1);
        assert_eq!(report.frames_encoded, 2);
        assert!(sink
            .events
            .iter()
            .any(|e| matches!(e, PipelineEvent::Desync { line } if line == "fr@me garbage")));
    }

    #[test]
    fn test_nonzero_exit_is_failure() {
        let dir = TempDir::new().unwrap();
        write_frames(&dir, 1, 2);
        let launcher = FakeLauncher::new(&["frame=    1"], false);
        let mut orchestrator = EncoderOrchestrator::new(launcher, job(&dir, 1, 2), Duration::from_millis(1));

        let report = orchestrator.run(&CancelFlag::new(), &mut CollectingSink::new());
        assert!(matches!(report.outcome, RunOutcome::Failed(_)));
        assert_eq!(orchestrator.state(), EncodingState::Completed { success: false });
    }

    #[test]
    fn test_cancel_terminates_and_removes_output() {
        let dir = TempDir::new().unwrap();
        write_frames(&dir, 1, 2);
        let launcher = FakeLauncher::new(&["frame=    1", "frame=    2"], true);
        let encode = job(&dir, 1, 2);
        let output = encode.output.clone();
        let mut orchestrator = EncoderOrchestrator::new(launcher.clone(), encode, Duration::from_millis(1));
        let cancel = CancelFlag::new();
        let mut sink = CollectingSink::new();

        assert_eq!(orchestrator.step(&cancel, &mut sink), Step::Continue);
        assert_eq!(orchestrator.state(), EncodingState::Running);
        std::fs::write(&output, b"partial").unwrap();

        cancel.cancel();
        assert_eq!(orchestrator.step(&cancel, &mut sink), Step::Failed);
        assert_eq!(orchestrator.report().outcome, RunOutcome::Cancelled);
        assert_eq!(launcher.terminated.load(Ordering::SeqCst), 1);
        assert!(!output.exists());
    }
}
