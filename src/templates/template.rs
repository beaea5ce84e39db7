use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::imageops::FilterType;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, Result, StabilizerError, TemplateError};
use crate::frames::Point;

/// Width of the scans the stock patterns were cut from
pub const REFERENCE_WIDTH: u32 = 2028;

/// Height of the same reference scans
pub const REFERENCE_HEIGHT: u32 = 1520;

/// Film gauge being scanned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FilmType {
    #[default]
    S8,
    R8,
}

impl FilmType {
    pub fn other(self) -> Self {
        match self {
            Self::S8 => Self::R8,
            Self::R8 => Self::S8,
        }
    }

    /// Stock pattern used to stabilize this gauge
    pub fn template_kind(self) -> TemplateKind {
        match self {
            Self::S8 => TemplateKind::S8,
            Self::R8 => TemplateKind::R8,
        }
    }

    /// Hole-height probe patterns as (active, inactive)
    pub fn probe_kinds(self) -> (TemplateKind, TemplateKind) {
        match self {
            Self::S8 => (TemplateKind::HoleBlackOnWhite, TemplateKind::HoleWhiteOnBlack),
            Self::R8 => (TemplateKind::HoleWhiteOnBlack, TemplateKind::HoleBlackOnWhite),
        }
    }

    /// Distance in reference pixels the probe measures for this gauge: the
    /// hole itself on Super 8, hole to hole on Regular 8
    pub fn reference_hole_height(self) -> u32 {
        match self {
            Self::S8 => 344,
            Self::R8 => 808,
        }
    }

    /// Expected pattern location as a percentage of frame width/height
    pub fn expected_percent(self) -> (f64, f64) {
        match self {
            Self::S8 => (6.5, 34.0),
            Self::R8 => (4.0, 11.0),
        }
    }
}

impl fmt::Display for FilmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::S8 => write!(f, "S8"),
            Self::R8 => write!(f, "R8"),
        }
    }
}

impl FromStr for FilmType {
    type Err = StabilizerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "S8" => Ok(Self::S8),
            "R8" => Ok(Self::R8),
            _ => Err(ConfigError::InvalidValue {
                key: "film_type".to_string(),
                value: s.to_string(),
            }
            .into()),
        }
    }
}

/// Logical role of a reference pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemplateKind {
    S8,
    R8,
    HoleBlackOnWhite,
    HoleWhiteOnBlack,
    Custom,
}

impl TemplateKind {
    /// File name of the stock pattern, `None` for custom templates
    pub fn file_name(self) -> Option<&'static str> {
        match self {
            Self::S8 => Some("Pattern.S8.jpg"),
            Self::R8 => Some("Pattern.R8.jpg"),
            Self::HoleBlackOnWhite => Some("Pattern_BW.jpg"),
            Self::HoleWhiteOnBlack => Some("Pattern_WB.jpg"),
            Self::Custom => None,
        }
    }

    pub fn is_custom(self) -> bool {
        matches!(self, Self::Custom)
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::S8 => "S8",
            Self::R8 => "R8",
            Self::HoleBlackOnWhite => "BW",
            Self::HoleWhiteOnBlack => "WB",
            Self::Custom => "custom",
        };
        write!(f, "{}", name)
    }
}

/// Where a matched pattern should end up after stabilization
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ExpectedPosition {
    /// Percentages of frame width and height
    Percent { x: f64, y: f64 },

    /// Absolute pixel coordinates in the working image
    Absolute(Point),
}

impl ExpectedPosition {
    /// Resolve to pixel coordinates for a `width` x `height` frame
    pub fn resolve(&self, width: u32, height: u32) -> Point {
        match *self {
            Self::Percent { x, y } => Point::new(
                (x * width as f64 / 100.0).round() as i32,
                (y * height as f64 / 100.0).round() as i32,
            ),
            Self::Absolute(point) => point,
        }
    }
}

/// A reference pattern, in both its stored and its working-resolution form
///
/// `position` is the pattern location in reference coordinates. Every
/// `scaled_*` field is derived from it and `scale` by [`Template::refresh`],
/// so they can never be stale relative to each other.
#[derive(Debug, Clone)]
pub struct Template {
    kind: TemplateKind,
    path: PathBuf,
    position: Point,
    expected: ExpectedPosition,
    scale: f64,
    image: GrayImage,
    scaled_image: GrayImage,
    scaled_position: Point,
    white_proportion: f64,
}

impl Template {
    /// Read the pattern from `path` and size it for `width`-wide frames
    pub fn load<P: AsRef<Path>>(
        kind: TemplateKind,
        path: P,
        position: Point,
        expected: ExpectedPosition,
        width: u32,
    ) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(TemplateError::Missing { path: path.to_path_buf() }.into());
        }
        let image = image::open(path)
            .map_err(|_| TemplateError::DecodeFailed { path: path.to_path_buf() })?
            .to_luma8();
        Ok(Self::from_image(kind, path, image, position, expected, width))
    }

    /// Build a template around an image already in memory
    pub fn from_image<P: AsRef<Path>>(
        kind: TemplateKind,
        path: P,
        image: GrayImage,
        position: Point,
        expected: ExpectedPosition,
        width: u32,
    ) -> Self {
        let mut template = Self {
            kind,
            path: path.as_ref().to_path_buf(),
            position,
            expected,
            scale: 1.0,
            image,
            scaled_image: GrayImage::new(0, 0),
            scaled_position: position,
            white_proportion: 0.5,
        };
        template.refresh(width);
        template
    }

    /// Template whose backing file is missing: usable as metadata only,
    /// every image field is empty
    pub fn metadata_only<P: AsRef<Path>>(
        kind: TemplateKind,
        path: P,
        position: Point,
        expected: ExpectedPosition,
        width: u32,
    ) -> Self {
        Self::from_image(kind, path, GrayImage::new(0, 0), position, expected, width)
    }

    /// Scale factor for a given working width; custom patterns were cut
    /// from the working images themselves and are never rescaled
    pub fn scale_for(kind: TemplateKind, width: u32) -> f64 {
        if kind.is_custom() {
            1.0
        } else {
            width as f64 / REFERENCE_WIDTH as f64
        }
    }

    /// Recompute scale and every derived field for a new working width
    pub fn refresh(&mut self, width: u32) {
        self.scale = Self::scale_for(self.kind, width);
        self.scaled_position = Point::new(
            (self.position.x as f64 * self.scale).round() as i32,
            (self.position.y as f64 * self.scale).round() as i32,
        );

        if self.is_loaded() {
            let (w, h) = self.scaled_size();
            self.scaled_image = if (w, h) == self.image.dimensions() {
                self.image.clone()
            } else {
                image::imageops::resize(&self.image, w.max(1), h.max(1), FilterType::Triangle)
            };
            self.white_proportion = white_proportion(&self.scaled_image);
        } else {
            self.scaled_image = GrayImage::new(0, 0);
            self.white_proportion = 0.5;
        }

        debug!(
            "Template {} scale {:.3}, size {:?} -> {:?}",
            self.kind,
            self.scale,
            self.size(),
            self.scaled_size()
        );
    }

    pub fn kind(&self) -> TemplateKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn position(&self) -> Point {
        self.position
    }

    pub fn expected(&self) -> ExpectedPosition {
        self.expected
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Whether the template has pixel data to match with
    pub fn is_loaded(&self) -> bool {
        self.image.width() > 0 && self.image.height() > 0
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn scaled_image(&self) -> &GrayImage {
        &self.scaled_image
    }

    pub fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn scaled_size(&self) -> (u32, u32) {
        let (w, h) = self.size();
        (
            (w as f64 * self.scale).round() as u32,
            (h as f64 * self.scale).round() as u32,
        )
    }

    pub fn scaled_position(&self) -> Point {
        self.scaled_position
    }

    /// Share of non-zero pixels in the scaled pattern
    pub fn white_proportion(&self) -> f64 {
        self.white_proportion
    }
}

fn white_proportion(image: &GrayImage) -> f64 {
    let total = image.width() as usize * image.height() as usize;
    if total == 0 {
        return 0.5;
    }
    let white = image.pixels().filter(|p| p.0[0] != 0).count();
    white as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn half_white(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, _| if x < width / 2 { Luma([255]) } else { Luma([0]) })
    }

    #[test]
    fn test_scaled_fields_follow_width() {
        let mut template = Template::from_image(
            TemplateKind::S8,
            "Pattern.S8.jpg",
            half_white(60, 340),
            Point::new(132, 517),
            ExpectedPosition::Percent { x: 6.5, y: 34.0 },
            REFERENCE_WIDTH,
        );
        assert_eq!(template.scale(), 1.0);
        assert_eq!(template.scaled_size(), (60, 340));

        for width in [1014u32, 1600, 3000, 4056] {
            template.refresh(width);
            let scale = width as f64 / REFERENCE_WIDTH as f64;
            assert_eq!(template.scale(), scale);
            assert_eq!(template.scaled_position().x, (132.0 * scale).round() as i32);
            assert_eq!(template.scaled_position().y, (517.0 * scale).round() as i32);
            assert_eq!(template.scaled_image().dimensions(), template.scaled_size());
        }
    }

    #[test]
    fn test_custom_template_is_never_rescaled() {
        let template = Template::from_image(
            TemplateKind::Custom,
            "custom.png",
            half_white(20, 30),
            Point::new(14, 84),
            ExpectedPosition::Absolute(Point::new(14, 84)),
            4056,
        );
        assert_eq!(template.scale(), 1.0);
        assert_eq!(template.scaled_position(), Point::new(14, 84));
        assert!((template.white_proportion() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_missing_file_is_reported() {
        let result = Template::load(
            TemplateKind::R8,
            "/nonexistent/Pattern.R8.jpg",
            Point::new(81, 167),
            ExpectedPosition::Percent { x: 4.0, y: 11.0 },
            2028,
        );
        assert!(matches!(
            result,
            Err(StabilizerError::Template(TemplateError::Missing { .. }))
        ));

        let placeholder = Template::metadata_only(
            TemplateKind::R8,
            "/nonexistent/Pattern.R8.jpg",
            Point::new(81, 167),
            ExpectedPosition::Percent { x: 4.0, y: 11.0 },
            2028,
        );
        assert!(!placeholder.is_loaded());
        assert_eq!(placeholder.scaled_size(), (0, 0));
    }

    #[test]
    fn test_expected_position_resolution() {
        let percent = ExpectedPosition::Percent { x: 6.5, y: 34.0 };
        assert_eq!(percent.resolve(2028, 1520), Point::new(132, 517));
        let absolute = ExpectedPosition::Absolute(Point::new(7, 9));
        assert_eq!(absolute.resolve(100, 100), Point::new(7, 9));
    }

    #[test]
    fn test_film_type_parsing() {
        assert_eq!("s8".parse::<FilmType>().unwrap(), FilmType::S8);
        assert_eq!("R8".parse::<FilmType>().unwrap(), FilmType::R8);
        assert!("16mm".parse::<FilmType>().is_err());
        assert_eq!(FilmType::S8.other(), FilmType::R8);
    }
}
