//! Geometric frame operations
//!
//! All functions are pure: they take a frame and return a new one. Areas
//! uncovered by a rotation or translation are filled with black.

use image::{ImageBuffer, Rgb};

use crate::frames::{Frame, Point, Rect};

/// Rotate about the frame centre, keeping the frame size
///
/// Positive angles turn the picture counter-clockwise. Corners that leave
/// the frame are clipped. Sampling is bilinear.
pub fn rotate(frame: &Frame, angle_degrees: f64) -> Frame {
    if angle_degrees == 0.0 {
        return frame.clone();
    }

    let (w, h) = (frame.width(), frame.height());
    let cx = (w / 2) as f64;
    let cy = (h / 2) as f64;
    let (sin, cos) = angle_degrees.to_radians().sin_cos();
    let source = frame.as_image();

    let buffer = ImageBuffer::from_fn(w, h, |x, y| {
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        let sx = cos * dx - sin * dy + cx;
        let sy = sin * dx + cos * dy + cy;
        Rgb(sample_bilinear(source, sx, sy))
    });
    Frame::new(buffer)
}

fn sample_bilinear(image: &image::RgbImage, x: f64, y: f64) -> [u8; 3] {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let pixel = |px: i64, py: i64| -> [f64; 3] {
        if px < 0 || py < 0 || px >= w || py >= h {
            [0.0; 3]
        } else {
            let p = image.get_pixel(px as u32, py as u32).0;
            [p[0] as f64, p[1] as f64, p[2] as f64]
        }
    };

    let p00 = pixel(x0, y0);
    let p10 = pixel(x0 + 1, y0);
    let p01 = pixel(x0, y0 + 1);
    let p11 = pixel(x0 + 1, y0 + 1);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] * (1.0 - fx) + p10[c] * fx;
        let bottom = p01[c] * (1.0 - fx) + p11[c] * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Shift the whole picture by (`dx`, `dy`) pixels, keeping the frame size
pub fn translate(frame: &Frame, dx: i32, dy: i32) -> Frame {
    if dx == 0 && dy == 0 {
        return frame.clone();
    }

    let (w, h) = (frame.width() as i64, frame.height() as i64);
    let mut out = Frame::new_black(w as u32, h as u32);

    let x_start = (dx as i64).max(0);
    let x_end = (w + dx as i64).min(w);
    if x_start >= x_end {
        return out;
    }

    let src = frame.as_image().as_raw();
    let row_bytes = (w * 3) as usize;
    let span = ((x_end - x_start) * 3) as usize;
    let dst = out.as_image_mut();
    let dst_raw: &mut [u8] = &mut *dst;

    for y in 0..h {
        let sy = y - dy as i64;
        if sy < 0 || sy >= h {
            continue;
        }
        let src_off = sy as usize * row_bytes + ((x_start - dx as i64) * 3) as usize;
        let dst_off = y as usize * row_bytes + (x_start * 3) as usize;
        dst_raw[dst_off..dst_off + span].copy_from_slice(&src[src_off..src_off + span]);
    }
    out
}

/// Clamp `rect` to the frame and trim one pixel off any odd extent
pub fn normalize_crop(rect: Rect, width: u32, height: u32) -> Rect {
    let x0 = rect.top_left.x.clamp(0, width as i32);
    let y0 = rect.top_left.y.clamp(0, height as i32);
    let mut x1 = rect.bottom_right.x.clamp(x0, width as i32);
    let mut y1 = rect.bottom_right.y.clamp(y0, height as i32);

    // Encoders reject odd dimensions
    if (x1 - x0) % 2 == 1 {
        x1 -= 1;
    }
    if (y1 - y0) % 2 == 1 {
        y1 -= 1;
    }
    Rect::new(Point::new(x0, y0), Point::new(x1, y1))
}

/// Cut `rect` out of the frame; output dimensions are always even
pub fn crop(frame: &Frame, rect: Rect) -> Frame {
    let r = normalize_crop(rect, frame.width(), frame.height());
    frame.view_rect(
        r.top_left.x as u32,
        r.top_left.y as u32,
        r.width() as u32,
        r.height() as u32,
    )
}

/// Drop the last row and/or column when a dimension is odd
pub fn even_frame(frame: Frame) -> Frame {
    if frame.has_even_dimensions() {
        return frame;
    }
    let rect = Rect::full(frame.width(), frame.height());
    crop(&frame, rect)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Frame {
        Frame::new(ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        }))
    }

    #[test]
    fn test_translate_moves_content_and_fills_black() {
        let frame = gradient(20, 10);
        let moved = translate(&frame, 3, -2);

        assert_eq!((moved.width(), moved.height()), (20, 10));
        assert_eq!(moved.get_pixel(5, 2), frame.get_pixel(2, 4));
        // Uncovered left columns and bottom rows
        assert_eq!(moved.get_pixel(0, 0), [0, 0, 0]);
        assert_eq!(moved.get_pixel(10, 9), [0, 0, 0]);
    }

    #[test]
    fn test_translate_past_frame_is_black() {
        let frame = gradient(8, 8);
        let moved = translate(&frame, 9, 0);
        assert!(moved.as_image().pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn test_crop_output_is_even_and_idempotent() {
        let frame = gradient(101, 77);
        let rects = [
            Rect::new(Point::new(3, 5), Point::new(50, 40)),
            Rect::new(Point::new(0, 0), Point::new(101, 77)),
            Rect::new(Point::new(10, 10), Point::new(500, 500)),
            Rect::new(Point::new(-4, -4), Point::new(11, 12)),
        ];
        for rect in rects {
            let once = crop(&frame, rect);
            assert!(once.has_even_dimensions(), "{:?}", rect);

            let full = Rect::full(once.width(), once.height());
            let twice = crop(&once, full);
            assert_eq!(once.as_image(), twice.as_image());
        }
    }

    #[test]
    fn test_crop_keeps_top_left() {
        let frame = gradient(40, 40);
        let cropped = crop(&frame, Rect::new(Point::new(5, 7), Point::new(16, 20)));
        assert_eq!((cropped.width(), cropped.height()), (10, 12));
        assert_eq!(cropped.get_pixel(0, 0), frame.get_pixel(5, 7));
    }

    #[test]
    fn test_even_frame() {
        for (w, h) in [(9, 7), (10, 7), (9, 10), (10, 10), (1, 1)] {
            let once = even_frame(gradient(w, h));
            assert!(once.has_even_dimensions());
            assert_eq!((once.width(), once.height()), (w - w % 2, h - h % 2));
            let twice = even_frame(once.clone());
            assert_eq!(once.as_image(), twice.as_image());
        }
    }

    #[test]
    fn test_rotate_keeps_size_and_centre() {
        let frame = gradient(41, 31);
        let rotated = rotate(&frame, 90.0);
        assert_eq!((rotated.width(), rotated.height()), (41, 31));
        assert_eq!(rotated.get_pixel(20, 15), frame.get_pixel(20, 15));
    }

    #[test]
    fn test_rotate_quarter_turn_mapping() {
        let mut frame = Frame::new_black(21, 21);
        frame.set_pixel(15, 10, [255, 0, 0]);
        // Counter-clockwise: a point right of centre ends up above it
        let rotated = rotate(&frame, 90.0);
        assert_eq!(rotated.get_pixel(10, 5), [255, 0, 0]);
        assert_eq!(rotated.get_pixel(15, 10), [0, 0, 0]);
    }
}
