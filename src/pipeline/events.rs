use tracing::{debug, info, warn};

use crate::alignment::AlignmentResult;

/// Per-frame alignment record for analysis tools
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignmentEvent {
    /// Absolute frame number
    pub frame_index: u32,
    /// Signed uncovered rows, see [`AlignmentResult::missing_rows`]
    pub missing_rows: i32,
    pub move_x: i32,
    pub move_y: i32,
}

impl AlignmentEvent {
    pub fn from_result(frame_index: u32, result: &AlignmentResult) -> Self {
        Self {
            frame_index,
            missing_rows: result.missing_rows(),
            move_x: result.move_x,
            move_y: result.move_y,
        }
    }

    pub fn is_out_of_bounds(&self) -> bool {
        self.missing_rows != 0
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Everything the pipeline reports while running
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// A run over `count` frames starting at sequence index `start`,
    /// absolute frame `first_frame`
    RunStarted {
        project: String,
        start: usize,
        first_frame: u32,
        count: usize,
    },
    FrameProgress { frame_index: u32, fraction: f64 },
    Alignment(AlignmentEvent),
    NoMatch { frame_index: u32 },
    FrameSkipped { frame_index: u32, reason: String },
    EncoderProgress { frames_encoded: u64, total: usize },
    /// Encoder output line without a readable frame counter
    Desync { line: String },
    /// One per terminal state of a frame run or an encode
    Status { stage: &'static str, outcome: RunOutcome },
}

/// Receiver of pipeline events
pub trait EventSink {
    fn emit(&mut self, event: &PipelineEvent);
}

/// Forwards to both sinks
impl<A: EventSink, B: EventSink> EventSink for (A, B) {
    fn emit(&mut self, event: &PipelineEvent) {
        self.0.emit(event);
        self.1.emit(event);
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn emit(&mut self, event: &PipelineEvent) {
        (**self).emit(event);
    }
}

impl<S: EventSink> EventSink for Option<S> {
    fn emit(&mut self, event: &PipelineEvent) {
        if let Some(sink) = self {
            sink.emit(event);
        }
    }
}

/// Turns events into log lines
///
/// Out-of-bounds alignments are logged at WARN with the `frame_align` tag,
/// in the field order the analysis log uses.
#[derive(Debug, Clone, Default)]
pub struct TracingSink {
    project: String,
}

impl TracingSink {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
        }
    }
}

impl EventSink for TracingSink {
    fn emit(&mut self, event: &PipelineEvent) {
        match event {
            PipelineEvent::RunStarted { project, start, count, .. } => {
                self.project = project.clone();
                info!("🎞️  {}: processing {} frames from index {}", project, count, start);
            }
            PipelineEvent::FrameProgress { frame_index, fraction } => {
                debug!("Frame {} done ({:.1}%)", frame_index, fraction * 100.0);
            }
            PipelineEvent::Alignment(a) if a.is_out_of_bounds() => {
                warn!(
                    tag = "frame_align",
                    project = %self.project,
                    frame = a.frame_index,
                    missing_rows = a.missing_rows,
                    move_y = a.move_y,
                    move_x = a.move_x,
                    "frame_align, {}, {}, {}, {}, {}",
                    self.project,
                    a.frame_index,
                    a.missing_rows,
                    a.move_y,
                    a.move_x
                );
            }
            PipelineEvent::Alignment(a) => {
                debug!(frame = a.frame_index, move_x = a.move_x, move_y = a.move_y, "Frame stabilized");
            }
            PipelineEvent::NoMatch { frame_index } => {
                warn!("Hole pattern not found in frame {}, left unstabilized", frame_index);
            }
            PipelineEvent::FrameSkipped { frame_index, reason } => {
                warn!("Skipping frame {}: {}", frame_index, reason);
            }
            PipelineEvent::EncoderProgress { frames_encoded, total } => {
                let percent = if *total > 0 {
                    *frames_encoded as f64 * 100.0 / *total as f64
                } else {
                    0.0
                };
                debug!("Generating video {:.1}%", percent);
            }
            PipelineEvent::Desync { line } => {
                warn!("Encoder sync lost, line parsed: {}", line);
            }
            PipelineEvent::Status { stage, outcome } => match outcome {
                RunOutcome::Completed => info!("✅ {}: {} completed", self.project, stage),
                RunOutcome::Cancelled => warn!("{}: {} cancelled by user", self.project, stage),
                RunOutcome::Failed(reason) => warn!("{}: {} failed: {}", self.project, stage, reason),
            },
        }
    }
}

/// Keeps every event, for callers that inspect a run afterwards
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    pub events: Vec<PipelineEvent>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alignments(&self) -> impl Iterator<Item = &AlignmentEvent> {
        self.events.iter().filter_map(|e| match e {
            PipelineEvent::Alignment(a) => Some(a),
            _ => None,
        })
    }

    pub fn out_of_bounds_count(&self) -> usize {
        self.alignments().filter(|a| a.is_out_of_bounds()).count()
    }

    pub fn statuses(&self) -> Vec<(&'static str, RunOutcome)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::Status { stage, outcome } => Some((*stage, outcome.clone())),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for CollectingSink {
    fn emit(&mut self, event: &PipelineEvent) {
        self.events.push(event.clone());
    }
}
