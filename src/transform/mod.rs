//! Per-frame geometric transforms
//!
//! Rotation, translation, cropping and even-size normalisation as pure
//! functions, plus the [`TransformStage`] that chains them in the order a
//! processing run needs.

pub mod aspect;
pub mod ops;
pub mod stage;

pub use aspect::AspectLock;
pub use ops::{crop, even_frame, normalize_crop, rotate, translate};
pub use stage::{AlignmentStatus, StageOutput, TransformSettings, TransformStage};
