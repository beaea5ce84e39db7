use tracing::{debug, error, info};

use super::context::{PipelineContext, Step};
use super::events::{AlignmentEvent, EventSink, PipelineEvent, RunOutcome};
use crate::error::{FrameError, StabilizerError};
use crate::frames::Frame;
use crate::transform::{AlignmentStatus, TransformStage};

const STAGE: &str = "frames";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Running,
    /// Stop requested, finishing on the next step
    Cancelling,
    Done,
    Failed,
}

/// Counters for one frame run
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunStats {
    pub processed: usize,
    pub skipped: usize,
    pub no_match: usize,
    pub out_of_bounds: usize,
    /// Size of the written frames
    pub output_size: Option<(u32, u32)>,
    pub outcome: Option<RunOutcome>,
}

/// Runs the transform stage over a frame range, one frame per step
///
/// Decode failures skip the frame. An odd output size ends the run as
/// failed, since the encoder would reject it.
#[derive(Debug)]
pub struct FrameController {
    stage: TransformStage,
    state: ControllerState,
    end: usize,
    stats: RunStats,
}

impl FrameController {
    pub fn new(stage: TransformStage) -> Self {
        Self {
            stage,
            state: ControllerState::Idle,
            end: 0,
            stats: RunStats::default(),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn stage(&self) -> &TransformStage {
        &self.stage
    }

    /// Reset counters and move to the start of the range
    pub fn start(&mut self, ctx: &mut PipelineContext, sink: &mut dyn EventSink) {
        self.end = ctx.range.end().min(ctx.sequence.len());
        ctx.current_frame = ctx.range.start;
        self.stats = RunStats::default();
        self.state = ControllerState::Running;
        sink.emit(&PipelineEvent::RunStarted {
            project: ctx.project_name.clone(),
            start: ctx.range.start,
            first_frame: ctx.absolute_frame(ctx.range.start),
            count: self.end.saturating_sub(ctx.range.start),
        });
    }

    /// Handle at most one frame
    pub fn step(&mut self, ctx: &mut PipelineContext, sink: &mut dyn EventSink) -> Step {
        match self.state {
            ControllerState::Idle => {
                self.start(ctx, sink);
                Step::Continue
            }
            ControllerState::Running => self.process_next(ctx, sink),
            ControllerState::Cancelling => {
                info!("Frame processing stopped at index {}", ctx.current_frame);
                self.finish(ControllerState::Done, RunOutcome::Cancelled, sink);
                Step::Done
            }
            ControllerState::Done => Step::Done,
            ControllerState::Failed => Step::Failed,
        }
    }

    /// Step until the run ends
    pub fn run(&mut self, ctx: &mut PipelineContext, sink: &mut dyn EventSink) -> RunStats {
        while self.step(ctx, sink) == Step::Continue {}
        self.stats.clone()
    }

    fn process_next(&mut self, ctx: &mut PipelineContext, sink: &mut dyn EventSink) -> Step {
        if ctx.cancel.is_cancelled() {
            self.state = ControllerState::Cancelling;
            return Step::Continue;
        }

        let index = ctx.current_frame;
        if index >= self.end {
            info!(
                "Processed {} frames ({} skipped, {} out of bounds)",
                self.stats.processed, self.stats.skipped, self.stats.out_of_bounds
            );
            self.finish(ControllerState::Done, RunOutcome::Completed, sink);
            return Step::Done;
        }

        let absolute = ctx.absolute_frame(index);
        let source = match ctx.sequence.path(index) {
            Some(path) => path.to_path_buf(),
            None => return self.fail(StabilizerError::generic("frame index past sequence end"), sink),
        };

        let frame = match Frame::open(&source) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.skipped += 1;
                let error = FrameError::DecodeFailed {
                    index: absolute as usize,
                    path: source.clone(),
                };
                sink.emit(&PipelineEvent::FrameSkipped {
                    frame_index: absolute,
                    reason: format!("{} ({})", error, e),
                });
                sink.emit(&PipelineEvent::FrameProgress {
                    frame_index: absolute,
                    fraction: ctx.progress(index),
                });
                ctx.current_frame += 1;
                return Step::Continue;
            }
        };

        let output = self.stage.apply(frame);
        match output.alignment {
            AlignmentStatus::Aligned(result) => {
                let event = AlignmentEvent::from_result(absolute, &result);
                if event.is_out_of_bounds() {
                    self.stats.out_of_bounds += 1;
                }
                sink.emit(&PipelineEvent::Alignment(event));
            }
            AlignmentStatus::NoMatch => {
                self.stats.no_match += 1;
                sink.emit(&PipelineEvent::NoMatch { frame_index: absolute });
            }
            AlignmentStatus::Skipped => {}
        }

        let (width, height) = (output.frame.width(), output.frame.height());
        if !output.frame.has_even_dimensions() {
            // Nothing past this frame is processed
            self.end = index;
            return self.fail(
                FrameError::OddDimension {
                    index: absolute as usize,
                    width,
                    height,
                }
                .into(),
                sink,
            );
        }

        let target = ctx.naming.path_in(&ctx.target_dir, absolute);
        if let Err(e) = output.frame.save_synced(&target, ctx.jpeg_quality) {
            self.end = index;
            return self.fail(
                FrameError::WriteFailed {
                    path: target.clone(),
                    reason: e.to_string(),
                }
                .into(),
                sink,
            );
        }
        debug!("Wrote {}", target.display());

        self.stats.processed += 1;
        self.stats.output_size = Some((width, height));
        sink.emit(&PipelineEvent::FrameProgress {
            frame_index: absolute,
            fraction: ctx.progress(index),
        });
        ctx.current_frame += 1;
        Step::Continue
    }

    fn fail(&mut self, error: StabilizerError, sink: &mut dyn EventSink) -> Step {
        error!("Frame run aborted: {}", error);
        self.finish(ControllerState::Failed, RunOutcome::Failed(error.user_message()), sink);
        Step::Failed
    }

    fn finish(&mut self, state: ControllerState, outcome: RunOutcome, sink: &mut dyn EventSink) {
        self.state = state;
        sink.emit(&PipelineEvent::Status {
            stage: STAGE,
            outcome: outcome.clone(),
        });
        self.stats.outcome = Some(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{FrameRange, FrameSequence, OutputNaming, Point, Rect};
    use crate::pipeline::{CancelFlag, CollectingSink};
    use crate::transform::TransformSettings;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    fn write_frames(dir: &Path, first: u32, count: u32, width: u32, height: u32) {
        for n in first..first + count {
            Frame::new_filled(width, height, [90, 90, 90])
                .save_png(dir.join(format!("picture-{:05}.png", n)))
                .unwrap();
        }
    }

    fn context(source: &TempDir, target: &TempDir, range: FrameRange) -> PipelineContext {
        let sequence = FrameSequence::discover(source.path(), "picture-*.png").unwrap();
        PipelineContext::new(
            "test-reel",
            sequence,
            range,
            target.path(),
            OutputNaming::new("picture_out-", 5, "png"),
            CancelFlag::new(),
        )
    }

    #[test]
    fn test_run_writes_absolute_numbered_frames() {
        let source = tempdir().unwrap();
        let target = tempdir().unwrap();
        write_frames(source.path(), 120, 6, 41, 30);

        let mut ctx = context(&source, &target, FrameRange::new(2, 3));
        let mut controller = FrameController::new(TransformStage::new(TransformSettings::default(), None));
        let mut sink = CollectingSink::new();
        let stats = controller.run(&mut ctx, &mut sink);

        assert_eq!(controller.state(), ControllerState::Done);
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.output_size, Some((40, 30)));
        assert_eq!(stats.outcome, Some(RunOutcome::Completed));
        for n in 122..125 {
            assert!(target.path().join(format!("picture_out-{:05}.png", n)).is_file());
        }
        assert!(!target.path().join("picture_out-00125.png").exists());

        let fractions: Vec<f64> = sink
            .events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::FrameProgress { fraction, .. } => Some(*fraction),
                _ => None,
            })
            .collect();
        assert_eq!(fractions.len(), 3);
        assert_eq!(fractions.last(), Some(&1.0));
        assert_eq!(sink.statuses(), vec![("frames", RunOutcome::Completed)]);
    }

    #[test]
    fn test_unreadable_frame_is_skipped() {
        let source = tempdir().unwrap();
        let target = tempdir().unwrap();
        write_frames(source.path(), 1, 3, 20, 20);
        std::fs::write(source.path().join("picture-00002.png"), b"not an image").unwrap();

        let mut ctx = context(&source, &target, FrameRange::new(0, 3));
        let mut controller = FrameController::new(TransformStage::new(TransformSettings::default(), None));
        let mut sink = CollectingSink::new();
        let stats = controller.run(&mut ctx, &mut sink);

        assert_eq!(stats.processed, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.outcome, Some(RunOutcome::Completed));
        assert!(sink
            .events
            .iter()
            .any(|e| matches!(e, PipelineEvent::FrameSkipped { frame_index: 2, .. })));

        // Progress still advances over the skipped frame
        let progressed: Vec<u32> = sink
            .events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::FrameProgress { frame_index, .. } => Some(*frame_index),
                _ => None,
            })
            .collect();
        assert_eq!(progressed, vec![1, 2, 3]);
    }

    #[test]
    fn test_odd_crop_is_evened_before_write() {
        let source = tempdir().unwrap();
        let target = tempdir().unwrap();
        write_frames(source.path(), 1, 2, 40, 40);

        let settings = TransformSettings {
            crop: Some(Rect::new(Point::new(0, 0), Point::new(21, 19))),
            ..TransformSettings::default()
        };
        let mut ctx = context(&source, &target, FrameRange::new(0, 2));
        let mut controller = FrameController::new(TransformStage::new(settings, None));
        let stats = controller.run(&mut ctx, &mut CollectingSink::new());

        assert_eq!(stats.processed, 2);
        assert_eq!(stats.output_size, Some((20, 18)));
        assert_eq!(controller.state(), ControllerState::Done);
    }

    #[test]
    fn test_cancel_applies_before_next_frame() {
        let source = tempdir().unwrap();
        let target = tempdir().unwrap();
        write_frames(source.path(), 1, 5, 20, 20);

        let mut ctx = context(&source, &target, FrameRange::new(0, 5));
        let cancel = ctx.cancel.clone();
        let mut controller = FrameController::new(TransformStage::new(TransformSettings::default(), None));
        let mut sink = CollectingSink::new();

        controller.step(&mut ctx, &mut sink);
        controller.step(&mut ctx, &mut sink);
        controller.step(&mut ctx, &mut sink);
        cancel.cancel();

        assert_eq!(controller.step(&mut ctx, &mut sink), Step::Continue);
        assert_eq!(controller.state(), ControllerState::Cancelling);
        assert_eq!(controller.step(&mut ctx, &mut sink), Step::Done);
        assert_eq!(controller.stats().processed, 2);
        assert_eq!(controller.stats().outcome, Some(RunOutcome::Cancelled));
        assert_eq!(sink.statuses(), vec![("frames", RunOutcome::Cancelled)]);
    }
}
