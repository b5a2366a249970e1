//! Grayscale template matching.
//!
//! `CcoeffMatcher` scores a window by mean-subtracted normalized
//! cross-correlation, so 1.0 is a pixel-exact match and uniform
//! brightness/contrast shifts do not change the score.

use image::imageops::{self, FilterType};
use image::GrayImage;

use crate::library::ReferenceTemplate;
use crate::types::Point;

/// Best location of a template on a screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchLocation {
    pub top_left: Point,
    pub confidence: f32,
}

pub trait ImageMatcher: Send + Sync {
    /// Best-scoring location, or `None` when the template cannot be
    /// scored against this screen (larger than the screen, or flat).
    fn find(&self, screen: &GrayImage, template: &ReferenceTemplate) -> Option<MatchLocation>;
}

/// Templates smaller than this (after downscaling) are searched at full
/// resolution only.
const MIN_COARSE_SIDE: u32 = 6;
/// Share of the template's pixel spread the downscaled copy must keep for
/// the coarse pass to be trusted. Stripes, text and noise fall below it.
const MIN_DETAIL_KEPT: f64 = 0.6;
/// A coarse peak at least this strong means the template is probably on
/// screen, so a weak refinement triggers a full search.
const COARSE_PLAUSIBLE: f32 = 0.7;
const EPS: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct CcoeffMatcher {
    /// Coarse pass scale divisor; 1 disables the pyramid.
    pub downscale: u32,
    /// Separate coarse peaks refined at full resolution.
    pub candidates: usize,
    /// Refined scores below this, after a plausible coarse peak, are
    /// re-checked with a full-resolution search.
    pub rescan_below: f32,
}

impl Default for CcoeffMatcher {
    fn default() -> Self {
        Self { downscale: 4, candidates: 5, rescan_below: 0.90 }
    }
}

impl ImageMatcher for CcoeffMatcher {
    fn find(&self, screen: &GrayImage, template: &ReferenceTemplate) -> Option<MatchLocation> {
        self.locate(screen, &template.image)
    }
}

impl CcoeffMatcher {
    /// Full-resolution search over every position.
    pub fn exhaustive() -> Self {
        Self { downscale: 1, candidates: 1, rescan_below: 0.0 }
    }

    pub fn locate(&self, screen: &GrayImage, template: &GrayImage) -> Option<MatchLocation> {
        let (sw, sh) = screen.dimensions();
        let (tw, th) = template.dimensions();
        if tw == 0 || th == 0 || tw > sw || th > sh {
            return None;
        }
        let full = Scorer::new(screen, template)?;
        let everywhere = move || (0..=sw - tw).flat_map(move |x| (0..=sh - th).map(move |y| (x, y)));

        let f = self.downscale.max(1);
        if f == 1 || tw / f < MIN_COARSE_SIDE || th / f < MIN_COARSE_SIDE {
            return full.best(everywhere());
        }

        let small_tpl = imageops::resize(template, tw / f, th / f, FilterType::Triangle);
        if pixel_spread(&small_tpl) < MIN_DETAIL_KEPT * pixel_spread(template) {
            return full.best(everywhere());
        }
        let small_screen = imageops::resize(screen, sw / f, sh / f, FilterType::Triangle);
        let Some(coarse) = Scorer::new(&small_screen, &small_tpl) else {
            return full.best(everywhere());
        };

        let (ctw, cth) = small_tpl.dimensions();
        let (cw, ch) = (small_screen.width() - ctw, small_screen.height() - cth);
        let mut scored: Vec<(f32, u32, u32)> = (0..=cw)
            .flat_map(|x| (0..=ch).map(move |y| (x, y)))
            .map(|(x, y)| (coarse.score(x, y), x, y))
            .collect();
        scored.sort_unstable_by(|a, b| b.0.total_cmp(&a.0));
        let peaks = suppress(&scored, self.candidates.max(1), (ctw / 2).max(1), (cth / 2).max(1));
        let coarse_best = peaks.first().map_or(0.0, |p| p.0);

        let radius = 2 * f;
        let (max_x, max_y) = (sw - tw, sh - th);
        let refine = peaks.into_iter().flat_map(|(_, cx, cy)| {
            let (x0, y0) = ((cx * f).saturating_sub(radius), (cy * f).saturating_sub(radius));
            let (x1, y1) = ((cx * f + radius).min(max_x), (cy * f + radius).min(max_y));
            (x0..=x1).flat_map(move |x| (y0..=y1).map(move |y| (x, y)))
        });
        let best = full.best(refine)?;
        if best.confidence < self.rescan_below && coarse_best >= COARSE_PLAUSIBLE {
            return full.best(everywhere());
        }
        Some(best)
    }
}

/// Greedy non-maximum suppression over peaks sorted best-first: keep at
/// most `keep`, none within `gap_x` by `gap_y` of a stronger one.
fn suppress(sorted: &[(f32, u32, u32)], keep: usize, gap_x: u32, gap_y: u32) -> Vec<(f32, u32, u32)> {
    let mut kept: Vec<(f32, u32, u32)> = Vec::with_capacity(keep);
    for &(score, x, y) in sorted {
        if kept.len() == keep {
            break;
        }
        if kept.iter().all(|&(_, kx, ky)| kx.abs_diff(x) >= gap_x || ky.abs_diff(y) >= gap_y) {
            kept.push((score, x, y));
        }
    }
    kept
}

/// Standard deviation of the pixel values.
fn pixel_spread(img: &GrayImage) -> f64 {
    let n = img.as_raw().len().max(1) as f64;
    let mean = img.as_raw().iter().map(|&p| p as f64).sum::<f64>() / n;
    (img.as_raw().iter().map(|&p| (p as f64 - mean).powi(2)).sum::<f64>() / n).sqrt()
}

/// Summed-area tables over the screen plus the zero-mean template.
struct Scorer<'a> {
    screen: &'a GrayImage,
    sum: Vec<f64>,
    sq: Vec<f64>,
    stride: usize,
    tpl: Vec<f64>,
    tpl_var: f64,
    tw: u32,
    th: u32,
}

impl<'a> Scorer<'a> {
    fn new(screen: &'a GrayImage, template: &GrayImage) -> Option<Self> {
        let (tw, th) = template.dimensions();
        let n = (tw * th) as f64;
        let mean = template.as_raw().iter().map(|&p| p as f64).sum::<f64>() / n;
        let tpl: Vec<f64> = template.as_raw().iter().map(|&p| p as f64 - mean).collect();
        let tpl_var: f64 = tpl.iter().map(|v| v * v).sum();
        if tpl_var < EPS {
            return None;
        }

        let (w, h) = (screen.width() as usize, screen.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0.0; stride * (h + 1)];
        let mut sq = vec![0.0; stride * (h + 1)];
        let raw = screen.as_raw();
        for y in 0..h {
            let (mut row_sum, mut row_sq) = (0.0, 0.0);
            for x in 0..w {
                let v = raw[y * w + x] as f64;
                row_sum += v;
                row_sq += v * v;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row_sum;
                sq[(y + 1) * stride + x + 1] = sq[y * stride + x + 1] + row_sq;
            }
        }

        Some(Self { screen, sum, sq, stride, tpl, tpl_var, tw, th })
    }

    fn window(table: &[f64], stride: usize, x: usize, y: usize, w: usize, h: usize) -> f64 {
        table[(y + h) * stride + x + w] - table[y * stride + x + w] - table[(y + h) * stride + x]
            + table[y * stride + x]
    }

    fn score(&self, x: u32, y: u32) -> f32 {
        let (x, y, tw, th) = (x as usize, y as usize, self.tw as usize, self.th as usize);
        let n = (tw * th) as f64;
        let s_sum = Self::window(&self.sum, self.stride, x, y, tw, th);
        let s_sq = Self::window(&self.sq, self.stride, x, y, tw, th);
        let s_var = s_sq - s_sum * s_sum / n;
        if s_var < EPS {
            return 0.0;
        }

        let raw = self.screen.as_raw();
        let w = self.screen.width() as usize;
        let mut cross = 0.0;
        for ty in 0..th {
            let row = &raw[(y + ty) * w + x..(y + ty) * w + x + tw];
            let t_row = &self.tpl[ty * tw..(ty + 1) * tw];
            cross += row.iter().zip(t_row).map(|(&s, &t)| s as f64 * t).sum::<f64>();
        }
        (cross / (self.tpl_var * s_var).sqrt()).clamp(-1.0, 1.0) as f32
    }

    fn best(&self, positions: impl Iterator<Item = (u32, u32)>) -> Option<MatchLocation> {
        positions
            .map(|(x, y)| MatchLocation { top_left: Point { x, y }, confidence: self.score(x, y) })
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }
}
