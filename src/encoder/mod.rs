//! Video encoding through an external encoder process

pub mod command;
pub mod orchestrator;
pub mod process;
pub mod progress;

pub use command::{
    default_video_filename, probe_encoder, resolution_scale, resolve_video_filename, EncoderCommand,
    FillBorders, RESOLUTIONS,
};
pub use orchestrator::{EncodeJob, EncodeReport, EncoderOrchestrator, EncodingState};
pub use process::{EncoderLauncher, EncoderProcess, LinePoll, ProcessExit, SystemLauncher};
pub use progress::{parse_progress_line, LineSplitter, ProgressLine};
