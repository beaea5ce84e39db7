use image::imageops::FilterType;
use image::GrayImage;
use tracing::{debug, info, warn};

use super::matcher::{MatchOutcome, TemplateMatcher};
use crate::error::{AlignmentError, Result};
use crate::frames::{Frame, Point, Rect};
use crate::templates::{ExpectedPosition, FilmType, Template, TemplateKind, TemplateRegistry};
use crate::transform::ops::translate;

/// Per-frame alignment measurement
///
/// `missing_top` / `missing_bottom` count the pixel rows left between the
/// shifted picture and the crop window. A negative value means the shift
/// pulled black fill into the crop window on that side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignmentResult {
    pub matched: Point,
    pub move_x: i32,
    pub move_y: i32,
    pub missing_top: i32,
    pub missing_bottom: i32,
}

impl AlignmentResult {
    pub fn is_out_of_bounds(&self) -> bool {
        self.missing_top < 0 || self.missing_bottom < 0
    }

    /// Signed count of uncovered rows: positive at the bottom, negative at
    /// the top, zero when the crop window is fully covered
    pub fn missing_rows(&self) -> i32 {
        if self.missing_top < 0 {
            self.missing_top
        } else if self.missing_bottom < 0 {
            -self.missing_bottom
        } else {
            0
        }
    }
}

/// A probe result suggesting the project has the wrong gauge set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilmTypeSuggestion {
    pub configured: FilmType,
    pub detected: FilmType,
}

/// Outcome of the hole-height probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoleProbe {
    /// Vertical distance between the two probe matches; negative when the
    /// scan cannot be calibrated
    pub hole_height: i32,
    pub suggestion: Option<FilmTypeSuggestion>,
}

/// Pattern the engine aligns to, a private copy taken from the registry
#[derive(Debug, Clone)]
struct ActivePattern {
    kind: TemplateKind,
    image: GrayImage,
    expected: ExpectedPosition,
}

/// Sprocket-hole detection and frame correction
#[derive(Debug, Clone)]
pub struct AlignmentEngine {
    matcher: TemplateMatcher,
    stripe_proportion: f64,
    sensitivity: i32,
    pattern: Option<ActivePattern>,
}

impl AlignmentEngine {
    /// `stripe_proportion` is the share of frame width searched from the
    /// left edge; `sensitivity` is how many pixels higher the inactive
    /// probe pattern must match before a film type change is suggested
    pub fn new(matcher: TemplateMatcher, stripe_proportion: f64, sensitivity: i32) -> Self {
        Self {
            matcher,
            stripe_proportion,
            sensitivity,
            pattern: None,
        }
    }

    /// Take a copy of `template` (at its scaled size) as the alignment pattern
    pub fn use_template(&mut self, template: &Template) -> Result<()> {
        if !template.is_loaded() {
            return Err(AlignmentError::TemplateNotLoaded {
                kind: template.kind().to_string(),
            }
            .into());
        }
        self.pattern = Some(ActivePattern {
            kind: template.kind(),
            image: template.scaled_image().clone(),
            expected: template.expected(),
        });
        Ok(())
    }

    pub fn pattern_size(&self) -> Option<(u32, u32)> {
        self.pattern.as_ref().map(|p| p.image.dimensions())
    }

    pub fn matcher(&self) -> &TemplateMatcher {
        &self.matcher
    }

    /// Search area: the full-height stripe along the left edge
    pub fn left_stripe(&self, width: u32, height: u32) -> Rect {
        let stripe_width = (width as f64 * self.stripe_proportion).round() as i32;
        Rect::new(
            Point::new(0, 0),
            Point::new(stripe_width.clamp(0, width as i32), height as i32),
        )
    }

    /// Check once, before a run, that the pattern fits the search stripe
    pub fn validate_template_size(&self, width: u32, height: u32) -> Result<()> {
        let pattern = self.pattern.as_ref().ok_or_else(|| AlignmentError::TemplateNotLoaded {
            kind: "none".to_string(),
        })?;
        let stripe = self.left_stripe(width, height);
        let (tw, th) = pattern.image.dimensions();
        let (sw, sh) = (stripe.width() as u32, stripe.height() as u32);
        if tw >= sw || th >= sh {
            warn!("Template ({}x{}) bigger than search area ({}x{})", tw, th, sw, sh);
            return Err(AlignmentError::TemplateTooLarge {
                template_width: tw,
                template_height: th,
                region_width: sw,
                region_height: sh,
            }
            .into());
        }
        Ok(())
    }

    /// Locate `template` in the left stripe of `frame`, in frame coordinates
    pub fn locate(&self, frame: &Frame, template: &GrayImage) -> MatchOutcome {
        let stripe = self.left_stripe(frame.width(), frame.height());
        if stripe.is_empty() {
            return MatchOutcome::NoMatch;
        }
        let search = frame
            .view_rect(
                stripe.top_left.x as u32,
                stripe.top_left.y as u32,
                stripe.width() as u32,
                stripe.height() as u32,
            )
            .to_gray();

        match self.matcher.locate(&search, template) {
            MatchOutcome::Found { location, score } => MatchOutcome::Found {
                location: Point::new(location.x + stripe.top_left.x, location.y + stripe.top_left.y),
                score,
            },
            MatchOutcome::NoMatch => MatchOutcome::NoMatch,
        }
    }

    /// Detect the pattern and work out the correction, without touching pixels
    pub fn measure(&self, frame: &Frame, crop: Rect) -> Option<AlignmentResult> {
        let pattern = self.pattern.as_ref()?;
        let matched = self.locate(frame, &pattern.image).location()?;

        let target = pattern.expected.resolve(frame.width(), frame.height());
        let move_x = target.x - matched.x;
        let move_y = target.y - matched.y;

        let missing_bottom = frame.height() as i32 - crop.bottom_right.y + move_y;
        let missing_top = crop.top_left.y - move_y;

        Some(AlignmentResult {
            matched,
            move_x,
            move_y,
            missing_top,
            missing_bottom,
        })
    }

    /// Align `frame` so the pattern lands on its expected position
    ///
    /// `crop` is the window the frame will later be cut to (the full frame
    /// when cropping is off). When the pattern is not found the frame is
    /// returned unchanged with no result.
    pub fn stabilize(&self, frame: Frame, crop: Rect) -> (Frame, Option<AlignmentResult>) {
        match self.measure(&frame, crop) {
            Some(result) => {
                let corrected = translate(&frame, result.move_x, result.move_y);
                (corrected, Some(result))
            }
            None => (frame, None),
        }
    }

    /// Measure hole height with the two probe patterns
    ///
    /// For the configured gauge one probe pattern should match first (top
    /// most). If the other one sits higher by more than the sensitivity the
    /// gauge is probably wrong, which is reported as a suggestion only.
    pub fn probe_hole(&self, frame: &Frame, registry: &TemplateRegistry, film_type: FilmType) -> Result<HoleProbe> {
        let (active_kind, other_kind) = film_type.probe_kinds();
        let active = probe_pattern(registry, active_kind)?;
        let other = probe_pattern(registry, other_kind)?;

        let (first, second) = match (
            self.locate(frame, active.scaled_image()).location(),
            self.locate(frame, other.scaled_image()).location(),
        ) {
            (Some(first), Some(second)) => (first, second),
            _ => {
                warn!("Hole probe patterns not found, stabilization cannot be calibrated");
                return Ok(HoleProbe {
                    hole_height: -1,
                    suggestion: None,
                });
            }
        };

        let suggestion = if first.y - second.y > self.sensitivity {
            Some(FilmTypeSuggestion {
                configured: film_type,
                detected: film_type.other(),
            })
        } else {
            None
        };

        let hole_height = second.y - first.y;
        debug!("Hole height: {}", hole_height);
        Ok(HoleProbe { hole_height, suggestion })
    }

    /// Resize the stock pattern to the measured hole height
    ///
    /// Works on the engine's own copy, starting from the stored pattern
    /// image. Custom patterns and non-positive heights leave the pattern
    /// untouched. Returns whether the pattern was resized.
    pub fn calibrate(&mut self, hole_height: i32, film_type: FilmType, registry: &TemplateRegistry) -> Result<bool> {
        if hole_height <= 0 || registry.has_custom() {
            return Ok(false);
        }
        let template = probe_pattern(registry, film_type.template_kind())?;
        let ratio = hole_height as f64 / film_type.reference_hole_height() as f64;
        let (w, h) = template.image().dimensions();
        let width = ((w as f64 * ratio) as u32).max(1);
        let height = ((h as f64 * ratio) as u32).max(1);

        let image = image::imageops::resize(template.image(), width, height, FilterType::Triangle);
        info!(
            "Hole pattern {} calibrated, ratio {:.2}, {}x{}",
            template.kind(),
            ratio,
            width,
            height
        );
        self.pattern = Some(ActivePattern {
            kind: template.kind(),
            image,
            expected: template.expected(),
        });
        Ok(true)
    }

    pub fn pattern_kind(&self) -> Option<TemplateKind> {
        self.pattern.as_ref().map(|p| p.kind)
    }
}

fn probe_pattern(registry: &TemplateRegistry, kind: TemplateKind) -> Result<&Template> {
    match registry.get(kind) {
        Some(template) if template.is_loaded() => Ok(template),
        _ => Err(AlignmentError::TemplateNotLoaded { kind: kind.to_string() }.into()),
    }
}
