//! Cooperative frame processing
//!
//! A run is a [`FrameController`] stepped one frame at a time over a
//! [`PipelineContext`], reporting through an [`EventSink`]. The caller owns
//! the loop, so it decides how steps are scheduled.

pub mod context;
pub mod controller;
pub mod events;
pub mod project;

pub use context::{CancelFlag, PipelineContext, Step};
pub use controller::{ControllerState, FrameController, RunStats};
pub use events::{AlignmentEvent, CollectingSink, EventSink, PipelineEvent, RunOutcome, TracingSink};
pub use project::{PreparedRun, ProjectReport, ProjectRunner};
