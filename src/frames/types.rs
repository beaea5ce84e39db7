use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use image::{DynamicImage, GrayImage, ImageBuffer, ImageOutputFormat, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

/// Integer pixel coordinate, x to the right and y downwards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl From<(i32, i32)> for Point {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle given by two corners, `bottom_right` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub top_left: Point,
    pub bottom_right: Point,
}

impl Rect {
    pub const fn new(top_left: Point, bottom_right: Point) -> Self {
        Self { top_left, bottom_right }
    }

    /// Rectangle covering a whole `width` x `height` frame
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(Point::new(0, 0), Point::new(width as i32, height as i32))
    }

    pub fn width(&self) -> i32 {
        self.bottom_right.x - self.top_left.x
    }

    pub fn height(&self) -> i32 {
        self.bottom_right.y - self.top_left.y
    }

    /// A rectangle with both corners at the origin counts as "never defined"
    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }
}

/// A single scanned film frame
///
/// Thin wrapper around an RGB buffer with the pixel helpers the
/// alignment and transform code needs.
#[derive(Clone, Debug)]
pub struct Frame {
    buffer: RgbImage,
}

impl Frame {
    /// Create a new frame from an RGB image buffer
    pub fn new(buffer: RgbImage) -> Self {
        Self { buffer }
    }

    /// Create a new frame with the given dimensions filled with black
    pub fn new_black(width: u32, height: u32) -> Self {
        Self { buffer: ImageBuffer::new(width, height) }
    }

    /// Create a new frame with the given dimensions filled with the specified color
    pub fn new_filled(width: u32, height: u32, color: [u8; 3]) -> Self {
        let buffer = ImageBuffer::from_fn(width, height, |_, _| Rgb(color));
        Self { buffer }
    }

    /// Decode a frame from disk, whatever its on-disk color layout
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, image::ImageError> {
        let image = image::open(path)?;
        let rgb_image = match image {
            DynamicImage::ImageRgb8(img) => img,
            _ => image.to_rgb8(),
        };
        Ok(Self::new(rgb_image))
    }

    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.buffer.height()
    }

    /// True when both dimensions are multiples of two
    pub fn has_even_dimensions(&self) -> bool {
        self.width() % 2 == 0 && self.height() % 2 == 0
    }

    /// Get a pixel at the given coordinates (returns RGB array)
    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 3] {
        self.buffer.get_pixel(x, y).0
    }

    /// Set a pixel at the given coordinates
    pub fn set_pixel(&mut self, x: u32, y: u32, color: [u8; 3]) {
        self.buffer.put_pixel(x, y, Rgb(color));
    }

    /// Get the underlying image buffer
    pub fn as_image(&self) -> &RgbImage {
        &self.buffer
    }

    /// Get a mutable reference to the underlying image buffer
    pub fn as_image_mut(&mut self) -> &mut RgbImage {
        &mut self.buffer
    }

    pub fn into_image(self) -> RgbImage {
        self.buffer
    }

    /// Luma conversion used by the pattern matcher
    pub fn to_gray(&self) -> GrayImage {
        image::imageops::grayscale(&self.buffer)
    }

    /// Copy out a sub-rectangle; the caller guarantees it lies inside the frame
    pub fn view_rect(&self, x: u32, y: u32, width: u32, height: u32) -> Frame {
        let sub = image::imageops::crop_imm(&self.buffer, x, y, width, height).to_image();
        Frame::new(sub)
    }

    /// Encode to `path` (format from extension) and flush it to stable storage
    ///
    /// `jpeg_quality` only applies to `.jpg`/`.jpeg` targets.
    pub fn save_synced<P: AsRef<Path>>(&self, path: P, jpeg_quality: u8) -> std::io::Result<()> {
        let path = path.as_ref();
        let format = match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .as_deref()
        {
            Some("png") => ImageOutputFormat::Png,
            _ => ImageOutputFormat::Jpeg(jpeg_quality),
        };

        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        DynamicImage::ImageRgb8(self.buffer.clone())
            .write_to(&mut writer, format)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()
    }

    /// Save the frame as a PNG file
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<(), image::ImageError> {
        self.buffer.save(path)
    }
}
