use serde::{Deserialize, Serialize};

use crate::frames::{Point, Rect};

/// Aspect ratio constraint for drawing a crop rectangle
///
/// Only used while a rectangle is being drawn. A committed crop rectangle
/// is taken as-is during processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AspectLock {
    #[default]
    Free,
    FourThree,
    SixteenNine,
}

impl AspectLock {
    pub fn ratio(self) -> Option<f64> {
        match self {
            Self::Free => None,
            Self::FourThree => Some(1.33),
            Self::SixteenNine => Some(1.78),
        }
    }

    /// Build from the two legacy checkbox flags; 4:3 wins if both are set
    pub fn from_flags(force_4_3: bool, force_16_9: bool) -> Self {
        if force_4_3 {
            Self::FourThree
        } else if force_16_9 {
            Self::SixteenNine
        } else {
            Self::Free
        }
    }

    /// (4:3, 16:9) checkbox states
    pub fn flags(self) -> (bool, bool) {
        (self == Self::FourThree, self == Self::SixteenNine)
    }

    /// Switch `lock` on or off; switching one ratio on clears the other
    pub fn toggle(self, lock: AspectLock, enabled: bool) -> Self {
        if enabled {
            lock
        } else if self == lock {
            Self::Free
        } else {
            self
        }
    }

    /// Adjust the dragged corner so the rectangle from `anchor` keeps the
    /// ratio, growing whichever side is too short
    pub fn constrain(self, anchor: Point, corner: Point) -> Point {
        let Some(ratio) = self.ratio() else {
            return corner;
        };
        let w = (corner.x - anchor.x).abs() as f64;
        let h = (corner.y - anchor.y).abs() as f64;
        let sign_x = if corner.x < anchor.x { -1 } else { 1 };
        let sign_y = if corner.y < anchor.y { -1 } else { 1 };

        if h * ratio > w {
            Point::new(anchor.x + sign_x * (h * ratio) as i32, corner.y)
        } else {
            Point::new(corner.x, anchor.y + sign_y * (w / ratio) as i32)
        }
    }

    /// Rectangle spanned by a drag, constrained and clamped to the frame
    pub fn rect_from_drag(self, anchor: Point, corner: Point, width: u32, height: u32) -> Rect {
        let corner = self.constrain(anchor, corner);
        Rect::new(
            Point::new(anchor.x.min(corner.x).max(0), anchor.y.min(corner.y).max(0)),
            Point::new(
                anchor.x.max(corner.x).min(width as i32),
                anchor.y.max(corner.y).min(height as i32),
            ),
        )
    }
}
