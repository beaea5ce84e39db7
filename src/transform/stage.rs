use tracing::debug;

use super::ops::{crop, even_frame, rotate};
use crate::alignment::{AlignmentEngine, AlignmentResult};
use crate::frames::{Frame, Rect};

/// Which transforms a run applies
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TransformSettings {
    /// Rotation in degrees, counter-clockwise
    pub rotation: Option<f64>,
    pub stabilize: bool,
    pub crop: Option<Rect>,
}

/// What alignment did for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentStatus {
    /// Stabilization is off for this run
    Skipped,
    /// The pattern was not found; the frame went through unaligned
    NoMatch,
    Aligned(AlignmentResult),
}

#[derive(Debug, Clone)]
pub struct StageOutput {
    pub frame: Frame,
    pub alignment: AlignmentStatus,
}

/// The fixed rotate -> stabilize -> crop-or-even sequence
#[derive(Debug, Clone)]
pub struct TransformStage {
    settings: TransformSettings,
    engine: Option<AlignmentEngine>,
}

impl TransformStage {
    /// `engine` is only consulted when `settings.stabilize` is set
    pub fn new(settings: TransformSettings, engine: Option<AlignmentEngine>) -> Self {
        Self { settings, engine }
    }

    pub fn settings(&self) -> &TransformSettings {
        &self.settings
    }

    pub fn engine(&self) -> Option<&AlignmentEngine> {
        self.engine.as_ref()
    }

    /// Window the output is cut to: the crop rectangle, or the whole frame
    pub fn crop_window(&self, width: u32, height: u32) -> Rect {
        self.settings.crop.unwrap_or_else(|| Rect::full(width, height))
    }

    pub fn apply(&self, frame: Frame) -> StageOutput {
        let frame = match self.settings.rotation {
            Some(angle) if angle != 0.0 => rotate(&frame, angle),
            _ => frame,
        };

        let (frame, alignment) = match (&self.engine, self.settings.stabilize) {
            (Some(engine), true) => {
                let window = self.crop_window(frame.width(), frame.height());
                match engine.stabilize(frame, window) {
                    (frame, Some(result)) => (frame, AlignmentStatus::Aligned(result)),
                    (frame, None) => (frame, AlignmentStatus::NoMatch),
                }
            }
            _ => (frame, AlignmentStatus::Skipped),
        };

        let frame = match self.settings.crop {
            Some(rect) => crop(&frame, rect),
            None => even_frame(frame),
        };
        debug!("Frame transformed to {}x{}", frame.width(), frame.height());

        StageOutput { frame, alignment }
    }
}
