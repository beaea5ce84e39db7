//! # Reel-Stabilizer
//!
//! Stabilize, crop and encode scanned Super 8 / Regular 8 film frame sequences.
//!
//! Each scanned frame shows a sprocket hole in its left margin. The library
//! finds that hole with normalized cross-correlation against a reference
//! pattern, shifts the frame so the hole always lands at the same place,
//! crops it, writes it out with absolute frame numbering and finally hands
//! the numbered sequence to an external encoder.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use reel_stabilizer::{
//!     config::{Config, ProjectConfig},
//!     encoder::SystemLauncher,
//!     pipeline::{CancelFlag, ProjectRunner, TracingSink},
//! };
//!
//! # fn main() -> anyhow::Result<()> {
//! let project = ProjectConfig::load("holiday-1974.toml")?;
//! let runner = ProjectRunner::new(Config::default(), Arc::new(SystemLauncher));
//!
//! let mut sink = TracingSink::new(project.name());
//! let report = runner.run(&project, CancelFlag::new(), &mut sink)?;
//! println!("{:?}", report.outcome);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several key modules:
//!
//! - [`frames`] - Frame pixels, sequence discovery and output naming
//! - [`templates`] - Reference patterns, integrity check and custom capture
//! - [`alignment`] - Pattern matching and per-frame displacement
//! - [`transform`] - Rotate, translate, crop and the per-frame transform stage
//! - [`pipeline`] - Cooperative frame controller, events and project runs
//! - [`encoder`] - Encoder command line, progress parsing and process supervision
//! - [`jobs`] - Persisted job queue and unattended batch runs
//! - [`analysis`] - Alignment CSV log and out-of-bounds summaries
//! - [`config`] - Application and project configuration
//!
//! ## Cooperative scheduling
//!
//! Long-running work never blocks a caller's loop. [`FrameController`] and
//! [`EncoderOrchestrator`](encoder::EncoderOrchestrator) both advance one
//! unit per `step()` call and return a [`Step`](pipeline::Step); `run()`
//! simply loops over `step()`. Cancellation goes through a shared
//! [`CancelFlag`](pipeline::CancelFlag) that is checked between units.
//!
//! ## Receiving events
//!
//! Progress, alignment records and terminal status are pushed to an
//! [`EventSink`](pipeline::EventSink):
//!
//! ```rust
//! use reel_stabilizer::pipeline::{EventSink, PipelineEvent};
//!
//! struct CountingSink(usize);
//!
//! impl EventSink for CountingSink {
//!     fn emit(&mut self, event: &PipelineEvent) {
//!         if let PipelineEvent::Alignment(a) = event {
//!             if a.is_out_of_bounds() {
//!                 self.0 += 1;
//!             }
//!         }
//!     }
//! }
//! ```

pub mod alignment;
pub mod analysis;
pub mod config;
pub mod encoder;
pub mod error;
pub mod frames;
pub mod jobs;
pub mod pipeline;
pub mod templates;
pub mod transform;

// Re-export commonly used types for convenience
pub use crate::{
    alignment::{AlignmentEngine, TemplateMatcher},
    config::{Config, ProjectConfig},
    error::{Result, StabilizerError},
    jobs::{JobQueue, JobRunner},
    pipeline::{FrameController, ProjectRunner},
    templates::{FilmType, TemplateRegistry},
};
