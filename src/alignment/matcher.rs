//! Normalized cross-correlation template matching
//!
//! Scores follow the zero-mean normalized correlation coefficient: 1.0 for a
//! perfect match, 0.0 where the search window is flat. Window sums come from
//! integral images, so the only per-position work is the template dot
//! product.
//!
//! Large templates are matched coarse to fine. Both images are halved with a
//! 2x2 box filter until the template's shorter side would drop below
//! [`MIN_PYRAMID_SIDE`]; the coarsest level is searched exhaustively and the
//! peak is then refined within a few pixels at every finer level. Rows are
//! scored in parallel on a dedicated rayon pool.

use std::sync::Arc;

use image::GrayImage;
use rayon::prelude::*;
use rayon::ThreadPool;

use crate::error::{Result, StabilizerError};
use crate::frames::Point;

/// Smallest template side kept when building the pyramid
pub const MIN_PYRAMID_SIDE: usize = 8;

/// Maximum number of pyramid levels, full resolution included
pub const MAX_PYRAMID_LEVELS: usize = 4;

/// Search radius (in pixels of the finer level) around an upsampled peak
const REFINE_RADIUS: usize = 3;

const EPSILON: f64 = 1e-6;

/// Result of a pattern search
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchOutcome {
    /// Top-left corner of the best window and its correlation score
    Found { location: Point, score: f32 },

    /// The template does not fit the search area or carries no contrast
    NoMatch,
}

impl MatchOutcome {
    pub fn location(&self) -> Option<Point> {
        match self {
            Self::Found { location, .. } => Some(*location),
            Self::NoMatch => None,
        }
    }
}

/// Template matcher bound to a thread pool
#[derive(Clone)]
pub struct TemplateMatcher {
    pool: Arc<ThreadPool>,
    blur: bool,
}

impl std::fmt::Debug for TemplateMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateMatcher")
            .field("threads", &self.pool.current_num_threads())
            .field("blur", &self.blur)
            .finish()
    }
}

impl TemplateMatcher {
    /// Create a matcher using `threads` workers; `blur` applies a 3x3
    /// Gaussian to the search image to suppress film grain
    pub fn new(threads: usize, blur: bool) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("matcher-{}", i))
            .build()
            .map_err(|e| StabilizerError::generic(format!("Failed to build matcher pool: {}", e)))?;
        Ok(Self {
            pool: Arc::new(pool),
            blur,
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Find `template` inside `search`
    ///
    /// Returns `NoMatch` when the template is as large as or larger than the
    /// search image in either dimension.
    pub fn locate(&self, search: &GrayImage, template: &GrayImage) -> MatchOutcome {
        let (sw, sh) = search.dimensions();
        let (tw, th) = template.dimensions();
        if tw == 0 || th == 0 || tw >= sw || th >= sh {
            return MatchOutcome::NoMatch;
        }

        let mut image = Plane::from_gray(search);
        if self.blur {
            image = image.gaussian_3x3();
        }
        let pattern = Plane::from_gray(template);

        let levels = pyramid_depth(&image, &pattern);
        let mut images = vec![image];
        let mut patterns = vec![pattern];
        for _ in 1..levels {
            let (Some(img), Some(pat)) = (images.last(), patterns.last()) else {
                break;
            };
            let next_img = img.downsample();
            let next_pat = pat.downsample();
            images.push(next_img);
            patterns.push(next_pat);
        }

        let mut best: Option<(usize, usize, f32)> = None;
        for level in (0..images.len()).rev() {
            let image = &images[level];
            let prepared = match PreparedTemplate::new(&patterns[level]) {
                Some(prepared) => prepared,
                None => return MatchOutcome::NoMatch,
            };
            let integral = Integral::new(image);
            let max_x = image.width - prepared.plane.width;
            let max_y = image.height - prepared.plane.height;

            let (x_range, y_range) = match best {
                None => ((0, max_x), (0, max_y)),
                Some((x, y, _)) => (refine_range(x * 2, max_x), refine_range(y * 2, max_y)),
            };

            best = self.search_window(image, &integral, &prepared, x_range, y_range);
            if best.is_none() {
                return MatchOutcome::NoMatch;
            }
        }

        match best {
            Some((x, y, score)) => MatchOutcome::Found {
                location: Point::new(x as i32, y as i32),
                score,
            },
            None => MatchOutcome::NoMatch,
        }
    }

    /// Exhaustive search over an inclusive window of candidate positions
    ///
    /// Ties resolve to the first position in row-major order.
    fn search_window(
        &self,
        image: &Plane,
        integral: &Integral,
        template: &PreparedTemplate,
        (x0, x1): (usize, usize),
        (y0, y1): (usize, usize),
    ) -> Option<(usize, usize, f32)> {
        self.pool.install(|| {
            (y0..=y1)
                .into_par_iter()
                .filter_map(|y| {
                    let mut row_best: Option<(usize, usize, f32)> = None;
                    for x in x0..=x1 {
                        let score = score_at(image, integral, template, x, y);
                        if row_best.map_or(true, |(_, _, s)| score > s) {
                            row_best = Some((x, y, score));
                        }
                    }
                    row_best
                })
                .reduce_with(|a, b| {
                    if b.2 > a.2 || (b.2 == a.2 && (b.1, b.0) < (a.1, a.0)) {
                        b
                    } else {
                        a
                    }
                })
        })
    }
}

fn refine_range(center: usize, max: usize) -> (usize, usize) {
    let low = center.saturating_sub(REFINE_RADIUS).min(max);
    let high = (center + REFINE_RADIUS).min(max);
    (low, high)
}

/// Number of pyramid levels (at least one) usable for this pair of images
fn pyramid_depth(image: &Plane, template: &Plane) -> usize {
    let mut levels = 1;
    while levels < MAX_PYRAMID_LEVELS {
        let factor = 1 << levels;
        let tw = template.width / factor;
        let th = template.height / factor;
        let iw = image.width / factor;
        let ih = image.height / factor;
        if tw.min(th) < MIN_PYRAMID_SIDE || tw >= iw || th >= ih {
            break;
        }
        levels += 1;
    }
    levels
}

/// Correlation coefficient of the template placed at (x, y)
fn score_at(image: &Plane, integral: &Integral, template: &PreparedTemplate, x: usize, y: usize) -> f32 {
    let tw = template.plane.width;
    let th = template.plane.height;
    let n = (tw * th) as f64;

    let (sum, sq_sum) = integral.window(x, y, tw, th);
    let variance = sq_sum - sum * sum / n;
    if variance <= EPSILON {
        return 0.0;
    }

    // The template is zero-mean, so correlating with the raw window equals
    // correlating with the mean-subtracted one
    let mut numerator = 0.0f64;
    for ty in 0..th {
        let start = (y + ty) * image.width + x;
        let row = &image.data[start..start + tw];
        let t_row = &template.zero_mean[ty * tw..(ty + 1) * tw];
        let dot: f32 = row.iter().zip(t_row).map(|(a, b)| a * b).sum();
        numerator += dot as f64;
    }

    (numerator / (template.norm * variance.sqrt())) as f32
}

/// Single-channel f32 image
#[derive(Debug, Clone)]
struct Plane {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Plane {
    fn from_gray(image: &GrayImage) -> Self {
        Self {
            width: image.width() as usize,
            height: image.height() as usize,
            data: image.as_raw().iter().map(|&v| v as f32).collect(),
        }
    }

    fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    /// 2x2 box average, odd trailing row/column dropped
    fn downsample(&self) -> Self {
        let width = self.width / 2;
        let height = self.height / 2;
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                let (sx, sy) = (x * 2, y * 2);
                let total = self.at(sx, sy) + self.at(sx + 1, sy) + self.at(sx, sy + 1) + self.at(sx + 1, sy + 1);
                data.push(total / 4.0);
            }
        }
        Self { width, height, data }
    }

    /// Separable [1 2 1] / 4 kernel, edges replicated
    fn gaussian_3x3(&self) -> Self {
        if self.width < 2 || self.height < 2 {
            return self.clone();
        }
        let (w, h) = (self.width, self.height);
        let mut horizontal = vec![0.0f32; w * h];
        for y in 0..h {
            for x in 0..w {
                let left = self.at(x.saturating_sub(1), y);
                let right = self.at((x + 1).min(w - 1), y);
                horizontal[y * w + x] = (left + 2.0 * self.at(x, y) + right) / 4.0;
            }
        }
        let mut data = vec![0.0f32; w * h];
        for y in 0..h {
            let up = y.saturating_sub(1);
            let down = (y + 1).min(h - 1);
            for x in 0..w {
                data[y * w + x] = (horizontal[up * w + x] + 2.0 * horizontal[y * w + x] + horizontal[down * w + x]) / 4.0;
            }
        }
        Self { width: w, height: h, data }
    }
}

/// Template with its mean removed and its L2 norm precomputed
struct PreparedTemplate<'a> {
    plane: &'a Plane,
    zero_mean: Vec<f32>,
    norm: f64,
}

impl<'a> PreparedTemplate<'a> {
    /// `None` for a flat template, which correlates with nothing
    fn new(plane: &'a Plane) -> Option<Self> {
        if plane.data.is_empty() {
            return None;
        }
        let mean = plane.data.iter().map(|&v| v as f64).sum::<f64>() / plane.data.len() as f64;
        let zero_mean: Vec<f32> = plane.data.iter().map(|&v| (v as f64 - mean) as f32).collect();
        let norm = zero_mean.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>().sqrt();
        if norm <= EPSILON {
            return None;
        }
        Some(Self { plane, zero_mean, norm })
    }
}

/// Summed-area tables of values and squared values
struct Integral {
    stride: usize,
    sum: Vec<f64>,
    sq_sum: Vec<f64>,
}

impl Integral {
    fn new(plane: &Plane) -> Self {
        let stride = plane.width + 1;
        let mut sum = vec![0.0f64; stride * (plane.height + 1)];
        let mut sq_sum = vec![0.0f64; stride * (plane.height + 1)];
        for y in 0..plane.height {
            let mut row_sum = 0.0f64;
            let mut row_sq = 0.0f64;
            for x in 0..plane.width {
                let v = plane.at(x, y) as f64;
                row_sum += v;
                row_sq += v * v;
                let idx = (y + 1) * stride + x + 1;
                sum[idx] = sum[idx - stride] + row_sum;
                sq_sum[idx] = sq_sum[idx - stride] + row_sq;
            }
        }
        Self { stride, sum, sq_sum }
    }

    fn window(&self, x: usize, y: usize, w: usize, h: usize) -> (f64, f64) {
        let a = y * self.stride + x;
        let b = y * self.stride + x + w;
        let c = (y + h) * self.stride + x;
        let d = (y + h) * self.stride + x + w;
        (
            self.sum[d] - self.sum[b] - self.sum[c] + self.sum[a],
            self.sq_sum[d] - self.sq_sum[b] - self.sq_sum[c] + self.sq_sum[a],
        )
    }
}
