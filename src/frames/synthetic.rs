//! Synthetic scanned frames
//!
//! Renders frames that look enough like a film scan for the alignment code
//! to work on them: a dark film base, one bright sprocket hole in the left
//! margin and some picture content on the right. The hole can be placed at
//! any offset, which lets tests inject a known jitter and check that
//! stabilization removes it.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::sequence::OutputNaming;
use super::types::{Frame, Point, Rect};
use crate::error::{FrameError, Result};

/// Film base and hole colors
pub const FILM_BASE: [u8; 3] = [40, 40, 40];
pub const HOLE_COLOR: [u8; 3] = [250, 250, 250];

/// Geometry of a synthetic reel
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticReel {
    pub width: u32,
    pub height: u32,
    pub hole_width: u32,
    pub hole_height: u32,

    /// Where the hole's top-left corner sits in an unjittered frame
    pub hole_origin: Point,
}

impl Default for SyntheticReel {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            hole_width: 18,
            hole_height: 30,
            hole_origin: Point::new(20, 90),
        }
    }
}

impl SyntheticReel {
    /// Rectangle around the unjittered hole with `margin` pixels of film base
    /// on every side; capturing it gives a usable custom template
    pub fn hole_region(&self, margin: i32) -> Rect {
        let origin = self.hole_origin;
        Rect::new(
            Point::new(origin.x - margin, origin.y - margin),
            Point::new(
                origin.x + self.hole_width as i32 + margin,
                origin.y + self.hole_height as i32 + margin,
            ),
        )
    }

    /// Render one frame with the hole (and picture) shifted by `jitter`
    pub fn render(&self, jitter: Point) -> Frame {
        let mut frame = Frame::new_filled(self.width, self.height, FILM_BASE);

        let picture_left = (self.width as f32 * 0.3) as i32 + jitter.x;
        let picture_top = (self.height as f32 * 0.1) as i32 + jitter.y;
        let picture_right = (self.width as f32 * 0.95) as i32 + jitter.x;
        let picture_bottom = (self.height as f32 * 0.9) as i32 + jitter.y;
        for y in picture_top.max(0)..picture_bottom.min(self.height as i32) {
            for x in picture_left.max(0)..picture_right.min(self.width as i32) {
                let r = ((x - picture_left) * 255 / (picture_right - picture_left).max(1)) as u8;
                let g = ((y - picture_top) * 255 / (picture_bottom - picture_top).max(1)) as u8;
                frame.set_pixel(x as u32, y as u32, [r, g, 128]);
            }
        }

        let hole = Point::new(self.hole_origin.x + jitter.x, self.hole_origin.y + jitter.y);
        stamp_rect(&mut frame, hole, self.hole_width, self.hole_height, HOLE_COLOR);
        frame
    }

    /// Render one frame per jitter value into `dir` as lossless PNGs
    pub fn write_sequence(&self, dir: &Path, naming: &OutputNaming, first: u32, jitters: &[Point]) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::with_capacity(jitters.len());
        for (i, jitter) in jitters.iter().enumerate() {
            let path = naming.path_in(dir, first + i as u32);
            self.render(*jitter)
                .save_synced(&path, 100)
                .map_err(|e| FrameError::WriteFailed {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
            paths.push(path);
        }
        debug!("Wrote {} synthetic frames to {:?}", paths.len(), dir);
        Ok(paths)
    }
}

/// Fill a rectangle, clipped to the frame
pub fn stamp_rect(frame: &mut Frame, top_left: Point, width: u32, height: u32, color: [u8; 3]) {
    let x_end = (top_left.x + width as i32).min(frame.width() as i32);
    let y_end = (top_left.y + height as i32).min(frame.height() as i32);
    for y in top_left.y.max(0)..y_end {
        for x in top_left.x.max(0)..x_end {
            frame.set_pixel(x as u32, y as u32, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hole_follows_jitter() {
        let reel = SyntheticReel::default();
        let frame = reel.render(Point::new(3, -5));
        let hole = reel.hole_origin;

        assert_eq!(frame.get_pixel((hole.x + 3) as u32, (hole.y - 5) as u32), HOLE_COLOR);
        assert_eq!(frame.get_pixel((hole.x + 2) as u32, (hole.y - 5) as u32), FILM_BASE);
        assert_eq!(frame.get_pixel(5, 5), FILM_BASE);
    }

    #[test]
    fn test_hole_region_has_margin() {
        let reel = SyntheticReel::default();
        let region = reel.hole_region(6);
        assert_eq!(region.width(), reel.hole_width as i32 + 12);
        assert_eq!(region.top_left, Point::new(14, 84));
    }
}
