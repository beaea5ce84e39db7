use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::frames::{FrameRange, FrameSequence, OutputNaming};

/// Shared stop request
///
/// Setting it is the whole interface for stopping a run. The frame
/// controller checks it before every frame and the encoder orchestrator
/// before every progress poll.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Result of one cooperative scheduling tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Done,
    Failed,
}

/// Everything a running job needs to know about its frames
///
/// Owned by whoever drives the run and lent to the controller for each
/// step; `current_frame` is only advanced by the controller.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub project_name: String,
    pub sequence: FrameSequence,
    pub range: FrameRange,
    pub target_dir: PathBuf,
    pub naming: OutputNaming,
    pub jpeg_quality: u8,
    pub cancel: CancelFlag,
    pub current_frame: usize,
}

impl PipelineContext {
    pub fn new(
        project_name: impl Into<String>,
        sequence: FrameSequence,
        range: FrameRange,
        target_dir: impl Into<PathBuf>,
        naming: OutputNaming,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            project_name: project_name.into(),
            sequence,
            current_frame: range.start,
            range,
            target_dir: target_dir.into(),
            naming,
            jpeg_quality: 95,
            cancel,
        }
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    /// Absolute number of the frame at sequence index `index`
    pub fn absolute_frame(&self, index: usize) -> u32 {
        self.sequence.absolute_index(index)
    }

    /// Share of the range done once `index` has been handled
    pub fn progress(&self, index: usize) -> f64 {
        if self.range.count == 0 {
            return 1.0;
        }
        (index + 1 - self.range.start) as f64 / self.range.count as f64
    }
}
