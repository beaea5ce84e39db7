//! Frame buffers and frame sequences
//!
//! A scan is an ordered directory of still images. [`FrameSequence`] lists
//! them, [`Frame`] holds one decoded image, and [`OutputNaming`] decides what
//! the processed copies are called.

pub mod sequence;
pub mod synthetic;
pub mod types;

pub use sequence::{extract_frame_number, glob_to_regex, FrameRange, FrameSequence, OutputNaming};
pub use synthetic::SyntheticReel;
pub use types::{Frame, Point, Rect};
