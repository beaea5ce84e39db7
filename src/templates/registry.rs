use std::collections::HashMap;
use std::path::{Path, PathBuf};

use image::{GrayImage, Luma};
use tracing::{info, warn};

use super::template::{
    ExpectedPosition, FilmType, Template, TemplateKind, REFERENCE_HEIGHT, REFERENCE_WIDTH,
};
use crate::error::{Result, StabilizerError, TemplateError};
use crate::frames::{Frame, Point, Rect};

/// Owner of every reference pattern in a project
///
/// The registry is the single source of truth for which pattern is active
/// and how big it is at the current working width. The alignment engine
/// takes copies out of it and never writes back.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    dir: PathBuf,
    templates: HashMap<TemplateKind, Template>,
    film_type: FilmType,
    width: u32,
}

impl TemplateRegistry {
    /// Create an empty registry for patterns stored in `dir`
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            templates: HashMap::new(),
            film_type: FilmType::default(),
            width: REFERENCE_WIDTH,
        }
    }

    /// Create a registry and load all stock patterns from `dir`
    ///
    /// Missing files are kept as metadata-only entries and logged; run
    /// [`super::verify_integrity`] first to turn that into a hard error.
    pub fn with_stock_templates<P: AsRef<Path>>(dir: P) -> Self {
        let mut registry = Self::new(dir);
        for kind in [
            TemplateKind::S8,
            TemplateKind::R8,
            TemplateKind::HoleBlackOnWhite,
            TemplateKind::HoleWhiteOnBlack,
        ] {
            if let Err(e) = registry.load_stock(kind) {
                warn!("Stock template {} unavailable: {}", kind, e);
            }
        }
        registry
    }

    fn load_stock(&mut self, kind: TemplateKind) -> Result<&Template> {
        let file_name = kind.file_name().ok_or_else(|| TemplateError::NotRegistered {
            kind: kind.to_string(),
        })?;
        let path = self.dir.join(file_name);
        let (position, expected) = stock_placement(kind);
        self.load(kind, path, position, expected)
    }

    /// Load a pattern file and register it under `kind`
    ///
    /// When the file does not exist the entry is still registered without
    /// pixel data and `TemplateError::Missing` is returned.
    pub fn load<P: AsRef<Path>>(
        &mut self,
        kind: TemplateKind,
        path: P,
        position: Point,
        expected: ExpectedPosition,
    ) -> Result<&Template> {
        let path = path.as_ref();
        let outcome = Template::load(kind, path, position, expected, self.width);
        let (template, failure) = match outcome {
            Ok(template) => (template, None),
            Err(e @ StabilizerError::Template(TemplateError::Missing { .. })) => (
                Template::metadata_only(kind, path, position, expected, self.width),
                Some(e),
            ),
            Err(e) => return Err(e),
        };

        self.templates.insert(kind, template);
        match failure {
            Some(e) => Err(e),
            None => self.get_or_err(kind),
        }
    }

    /// Register an already built template, replacing any of the same kind
    pub fn insert(&mut self, mut template: Template) {
        template.refresh(self.width);
        self.templates.insert(template.kind(), template);
    }

    /// Rescale every managed template for frames `width` pixels wide
    pub fn refresh(&mut self, width: u32) {
        if width == 0 {
            return;
        }
        self.width = width;
        for template in self.templates.values_mut() {
            template.refresh(width);
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get(&self, kind: TemplateKind) -> Option<&Template> {
        self.templates.get(&kind)
    }

    fn get_or_err(&self, kind: TemplateKind) -> Result<&Template> {
        self.templates
            .get(&kind)
            .ok_or_else(|| TemplateError::NotRegistered { kind: kind.to_string() }.into())
    }

    pub fn film_type(&self) -> FilmType {
        self.film_type
    }

    pub fn set_film_type(&mut self, film_type: FilmType) {
        if film_type != self.film_type {
            info!("Film type set to {}", film_type);
        }
        self.film_type = film_type;
    }

    /// A loaded custom pattern wins over the stock one for the film type
    pub fn active_kind(&self) -> TemplateKind {
        match self.templates.get(&TemplateKind::Custom) {
            Some(custom) if custom.is_loaded() => TemplateKind::Custom,
            _ => self.film_type.template_kind(),
        }
    }

    pub fn active(&self) -> Result<&Template> {
        self.get_or_err(self.active_kind())
    }

    pub fn has_custom(&self) -> bool {
        self.active_kind().is_custom()
    }

    /// Cut a custom pattern out of `frame`
    ///
    /// The rectangle is converted to gray, binarised at `threshold`, written
    /// to `path` and registered with its top-left corner as the position
    /// every frame is aligned to.
    pub fn capture_custom<P: AsRef<Path>>(
        &mut self,
        frame: &Frame,
        rect: Rect,
        threshold: u8,
        path: P,
    ) -> Result<&Template> {
        let path = path.as_ref();
        let inside = rect.top_left.x >= 0
            && rect.top_left.y >= 0
            && rect.bottom_right.x <= frame.width() as i32
            && rect.bottom_right.y <= frame.height() as i32;
        if rect.is_empty() || !inside {
            return Err(TemplateError::InvalidRegion {
                details: format!(
                    "{:?} does not fit a {}x{} frame",
                    rect,
                    frame.width(),
                    frame.height()
                ),
            }
            .into());
        }

        let region = frame.view_rect(
            rect.top_left.x as u32,
            rect.top_left.y as u32,
            rect.width() as u32,
            rect.height() as u32,
        );
        let gray = region.to_gray();
        let binary = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
            if gray.get_pixel(x, y).0[0] > threshold {
                Luma([255])
            } else {
                Luma([0])
            }
        });
        binary
            .save(path)
            .map_err(|e| StabilizerError::generic(format!("Failed to save custom template {:?}: {}", path, e)))?;

        let template = Template::from_image(
            TemplateKind::Custom,
            path,
            binary,
            rect.top_left,
            ExpectedPosition::Absolute(rect.top_left),
            self.width,
        );
        info!(
            "Custom template captured at ({}, {}), {}x{}",
            rect.top_left.x,
            rect.top_left.y,
            rect.width(),
            rect.height()
        );
        self.templates.insert(TemplateKind::Custom, template);
        self.get_or_err(TemplateKind::Custom)
    }

    /// Load a previously captured custom pattern
    pub fn load_custom<P: AsRef<Path>>(&mut self, path: P, expected: Point) -> Result<&Template> {
        self.load(TemplateKind::Custom, path, expected, ExpectedPosition::Absolute(expected))
    }

    /// Forget the custom pattern and delete its file
    pub fn clear_custom(&mut self) -> Result<()> {
        if let Some(custom) = self.templates.remove(&TemplateKind::Custom) {
            if custom.path().is_file() {
                std::fs::remove_file(custom.path())?;
            }
            info!("Custom template cleared, back to {} pattern", self.film_type);
        }
        Ok(())
    }
}

/// Position (reference coordinates) and target of each stock pattern
fn stock_placement(kind: TemplateKind) -> (Point, ExpectedPosition) {
    let percent = match kind {
        TemplateKind::S8 => FilmType::S8.expected_percent(),
        TemplateKind::R8 => FilmType::R8.expected_percent(),
        _ => (0.0, 0.0),
    };
    let expected = ExpectedPosition::Percent {
        x: percent.0,
        y: percent.1,
    };
    (expected.resolve(REFERENCE_WIDTH, REFERENCE_HEIGHT), expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::SyntheticReel;
    use tempfile::tempdir;

    fn write_pattern(dir: &Path, name: &str, width: u32, height: u32) {
        let image = GrayImage::from_fn(width, height, |x, _| if x % 2 == 0 { Luma([255]) } else { Luma([0]) });
        image.save(dir.join(name)).unwrap();
    }

    #[test]
    fn test_missing_stock_files_become_metadata() {
        let dir = tempdir().unwrap();
        let registry = TemplateRegistry::with_stock_templates(dir.path());

        let s8 = registry.get(TemplateKind::S8).unwrap();
        assert!(!s8.is_loaded());
        assert_eq!(s8.position(), Point::new(132, 517));
        assert_eq!(registry.active_kind(), TemplateKind::S8);
    }

    #[test]
    fn test_refresh_rescales_all_templates() {
        let dir = tempdir().unwrap();
        let mut registry = TemplateRegistry::new(dir.path());
        write_pattern(dir.path(), "s8.png", 40, 200);
        write_pattern(dir.path(), "bw.png", 30, 300);

        let (position, expected) = stock_placement(TemplateKind::S8);
        registry
            .load(TemplateKind::S8, dir.path().join("s8.png"), position, expected)
            .unwrap();
        registry
            .load(
                TemplateKind::HoleBlackOnWhite,
                dir.path().join("bw.png"),
                Point::new(0, 0),
                ExpectedPosition::Percent { x: 0.0, y: 0.0 },
            )
            .unwrap();

        registry.refresh(1014);
        let s8 = registry.get(TemplateKind::S8).unwrap();
        assert_eq!(s8.scale(), 0.5);
        assert_eq!(s8.scaled_size(), (20, 100));
        assert_eq!(s8.scaled_position(), Point::new(66, 259));
        assert_eq!(registry.get(TemplateKind::HoleBlackOnWhite).unwrap().scaled_size(), (15, 150));
    }

    #[test]
    fn test_capture_and_clear_custom() {
        let dir = tempdir().unwrap();
        let mut registry = TemplateRegistry::new(dir.path());
        let reel = SyntheticReel::default();
        let frame = reel.render(Point::new(0, 0));
        let region = reel.hole_region(6);
        let path = dir.path().join("custom.png");

        let template = registry.capture_custom(&frame, region, 200, &path).unwrap();
        assert_eq!(template.expected(), ExpectedPosition::Absolute(region.top_left));
        assert_eq!(template.scale(), 1.0);
        assert_eq!(template.scaled_size(), (region.width() as u32, region.height() as u32));
        // The hole is white, the film base around it black
        assert_eq!(template.image().get_pixel(6, 6).0[0], 255);
        assert_eq!(template.image().get_pixel(0, 0).0[0], 0);
        assert!(path.is_file());
        assert_eq!(registry.active_kind(), TemplateKind::Custom);

        registry.clear_custom().unwrap();
        assert!(!path.exists());
        assert_eq!(registry.active_kind(), TemplateKind::S8);
    }

    #[test]
    fn test_capture_rejects_region_outside_frame() {
        let dir = tempdir().unwrap();
        let mut registry = TemplateRegistry::new(dir.path());
        let frame = Frame::new_black(50, 50);
        let rect = Rect::new(Point::new(40, 40), Point::new(60, 60));
        assert!(registry.capture_custom(&frame, rect, 200, dir.path().join("c.png")).is_err());
    }

    #[test]
    fn test_film_type_selects_active_pattern() {
        let dir = tempdir().unwrap();
        let mut registry = TemplateRegistry::with_stock_templates(dir.path());
        registry.set_film_type(FilmType::R8);
        assert_eq!(registry.active_kind(), TemplateKind::R8);
        assert_eq!(registry.active().unwrap().kind(), TemplateKind::R8);
    }
}
