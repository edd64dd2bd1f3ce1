//! Branding and watermark detection with content-aware removal.
//!
//! Detection is a best-effort heuristic, not a compliance tool. Two passes
//! run over every image:
//!
//! 1. **Text/logo pass**: threshold the intensity image, merge nearby
//!    strokes with a morphological closing, extract contours, and keep
//!    blob-sized bounding boxes whose contrast and edge proximity look like
//!    an overlaid mark.
//! 2. **Watermark pass**: score the four 1/3 x 1/3 corner quadrants for the
//!    low-variance / moderate-edge-density signature of a repeated overlay.
//!
//! Removal unions all region boxes into one binary mask and reconstructs
//! the masked pixels by propagating nearby known content inward.

use crate::config::DetectorConfig;
use crate::error::Result;
use crate::types::{DetectedRegion, RegionKind};
use crate::util::{mean_stddev, restore_color_mode};
use image::{DynamicImage, GenericImageView, GrayImage, Rgba, RgbaImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::morphology::close;
use imageproc::point::Point;
use log::debug;

/// Weight of the contrast term in text/logo confidence
const CONTRAST_WEIGHT: f32 = 0.5;
/// Weight of the edge-proximity term in text/logo confidence
const EDGE_PROXIMITY_WEIGHT: f32 = 0.3;
/// Bonus when a region's mean intensity is extreme (flat dark/light panel)
const EXTREME_MEAN_BONUS: f32 = 0.2;
/// Means below this (or above 255 minus this) earn the extreme bonus
const EXTREME_MEAN_MARGIN: f32 = 50.0;
/// Stddev that saturates the normalized contrast score
const CONTRAST_NORM: f32 = 64.0;
/// Weight of the low-variance term in the quadrant watermark score
const LOW_VARIANCE_WEIGHT: f32 = 0.6;
/// Weight of the edge-density term in the quadrant watermark score
const EDGE_DENSITY_WEIGHT: f32 = 0.4;
/// Edge density that saturates the normalized edge score
const EDGE_DENSITY_NORM: f32 = 0.15;
/// Canny thresholds tuned for faint overlay edges
const CANNY_LOW: f32 = 10.0;
const CANNY_HIGH: f32 = 30.0;

/// Heuristic branding/watermark detector and remover
#[derive(Debug, Clone)]
pub struct BrandingDetector {
    config: DetectorConfig,
}

impl BrandingDetector {
    /// Create a detector with the given tunables
    #[must_use]
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Find candidate branding regions in `image`.
    ///
    /// Returns the merged output of the text/logo and watermark heuristics;
    /// an empty list means nothing scored above the configured thresholds.
    #[must_use]
    pub fn detect(&self, image: &DynamicImage) -> Vec<DetectedRegion> {
        let gray = image.to_luma8();
        let (width, height) = gray.dimensions();
        // Too small to host anything but noise-sized candidates
        if width < 12 || height < 12 {
            return Vec::new();
        }

        let mut regions = self.detect_text_logo(&gray);
        regions.extend(self.detect_watermark_quadrants(&gray));
        debug!(
            "detected {} branding region(s) in {}x{} image",
            regions.len(),
            width,
            height
        );
        regions
    }

    /// Remove `regions` from `image` via content-aware fill.
    ///
    /// An empty region list returns the input unchanged, byte-identical.
    /// Overlapping boxes merge implicitly through the union mask so shared
    /// boundaries leave no seams.
    pub fn remove(&self, image: &DynamicImage, regions: &[DetectedRegion]) -> Result<DynamicImage> {
        if regions.is_empty() {
            return Ok(image.clone());
        }

        let (width, height) = image.dimensions();
        let mut mask = vec![false; (width as usize) * (height as usize)];
        for region in regions {
            let x0 = region.x.min(width);
            let y0 = region.y.min(height);
            let x1 = region.x.saturating_add(region.width).min(width);
            let y1 = region.y.saturating_add(region.height).min(height);
            for y in y0..y1 {
                for x in x0..x1 {
                    mask[(y * width + x) as usize] = true;
                }
            }
        }

        let rgba = image.to_rgba8();
        let filled = inpaint(&rgba, &mask, self.config.inpaint_radius);
        Ok(restore_color_mode(image, filled))
    }

    fn detect_text_logo(&self, gray: &GrayImage) -> Vec<DetectedRegion> {
        let (width, height) = gray.dimensions();
        let image_area = u64::from(width) * u64::from(height);
        let max_area =
            (image_area as f64 * f64::from(self.config.max_region_area_fraction)) as u64;
        let level = otsu_level(gray);

        let mut regions: Vec<DetectedRegion> = Vec::new();
        // Dark marks on light backgrounds and the reverse both matter, so
        // contour both polarities of the thresholded image.
        for threshold_type in [ThresholdType::BinaryInverted, ThresholdType::Binary] {
            let binary = threshold(gray, level, threshold_type);
            let closed = close(&binary, Norm::LInf, self.config.closing_radius);

            for contour in find_contours::<i32>(&closed) {
                if contour.border_type != BorderType::Outer {
                    continue;
                }
                let Some((x, y, bw, bh)) = bounding_box(&contour.points) else {
                    continue;
                };
                let aspect = bw as f32 / bh.max(1) as f32;
                if aspect < self.config.min_aspect || aspect > self.config.max_aspect {
                    continue;
                }
                let area = u64::from(bw) * u64::from(bh);
                if area <= u64::from(self.config.min_region_area) || area >= max_area {
                    continue;
                }
                let confidence = self.text_logo_confidence(gray, x, y, bw, bh);
                if confidence < self.config.text_logo_threshold {
                    continue;
                }
                let candidate = DetectedRegion {
                    x,
                    y,
                    width: bw,
                    height: bh,
                    confidence,
                    kind: RegionKind::TextLogo,
                };
                if !regions.iter().any(|existing| mostly_overlaps(existing, &candidate)) {
                    regions.push(candidate);
                }
            }
        }
        regions
    }

    /// Confidence for a text/logo candidate: normalized contrast of the
    /// surrounding box, proximity to the image edges (branding gravitates
    /// to corners and borders), and a bonus for flat dark/light panels.
    fn text_logo_confidence(&self, gray: &GrayImage, x: u32, y: u32, bw: u32, bh: u32) -> f32 {
        let (width, height) = gray.dimensions();

        // Expand the box slightly so the mark's contrast against its
        // backdrop is part of the statistics.
        let pad = (bw.min(bh) / 4).max(2);
        let ex0 = x.saturating_sub(pad);
        let ey0 = y.saturating_sub(pad);
        let ex1 = (x + bw + pad).min(width);
        let ey1 = (y + bh + pad).min(height);

        let mut values = Vec::with_capacity(((ex1 - ex0) * (ey1 - ey0)) as usize);
        for py in ey0..ey1 {
            for px in ex0..ex1 {
                values.push(f32::from(gray.get_pixel(px, py).0[0]));
            }
        }
        let (mean, stddev) = mean_stddev(&values);
        let contrast_score = (stddev / CONTRAST_NORM).min(1.0);

        let cx = (x + bw / 2) as f32;
        let cy = (y + bh / 2) as f32;
        let border_distance = cx
            .min(width as f32 - cx)
            .min(cy)
            .min(height as f32 - cy)
            .max(0.0);
        let half_min_dim = (width.min(height) as f32 / 2.0).max(1.0);
        let edge_score = (1.0 - border_distance / half_min_dim).clamp(0.0, 1.0);

        let bonus = if mean < EXTREME_MEAN_MARGIN || mean > 255.0 - EXTREME_MEAN_MARGIN {
            EXTREME_MEAN_BONUS
        } else {
            0.0
        };

        (CONTRAST_WEIGHT * contrast_score + EDGE_PROXIMITY_WEIGHT * edge_score + bonus)
            .clamp(0.0, 1.0)
    }

    fn detect_watermark_quadrants(&self, gray: &GrayImage) -> Vec<DetectedRegion> {
        let (width, height) = gray.dimensions();
        let qw = width / 3;
        let qh = height / 3;
        if qw < 8 || qh < 8 {
            return Vec::new();
        }

        let corners = [
            (0, 0),
            (width - qw, 0),
            (0, height - qh),
            (width - qw, height - qh),
        ];

        let mut regions = Vec::new();
        for (qx, qy) in corners {
            let quadrant = image::imageops::crop_imm(gray, qx, qy, qw, qh).to_image();

            let values: Vec<f32> = quadrant.pixels().map(|p| f32::from(p.0[0])).collect();
            let (_, stddev) = mean_stddev(&values);
            let low_variance_score = (1.0 - stddev / CONTRAST_NORM).clamp(0.0, 1.0);

            let edges = canny(&quadrant, CANNY_LOW, CANNY_HIGH);
            let edge_pixels = edges.pixels().filter(|p| p.0[0] > 0).count();
            if edge_pixels == 0 {
                // A perfectly flat corner is plain background, not an overlay
                continue;
            }
            let density = edge_pixels as f32 / (qw * qh) as f32;
            let edge_score = (density / EDGE_DENSITY_NORM).min(1.0);

            let score =
                LOW_VARIANCE_WEIGHT * low_variance_score + EDGE_DENSITY_WEIGHT * edge_score;
            if score >= self.config.watermark_threshold {
                regions.push(DetectedRegion {
                    x: qx,
                    y: qy,
                    width: qw,
                    height: qh,
                    confidence: score.clamp(0.0, 1.0),
                    kind: RegionKind::WatermarkPattern,
                });
            }
        }
        regions
    }
}

/// Axis-aligned bounding box of a contour, `(x, y, width, height)`
fn bounding_box(points: &[Point<i32>]) -> Option<(u32, u32, u32, u32)> {
    let first = points.first()?;
    let (mut min_x, mut max_x) = (first.x, first.x);
    let (mut min_y, mut max_y) = (first.y, first.y);
    for p in points {
        min_x = min_x.min(p.x);
        max_x = max_x.max(p.x);
        min_y = min_y.min(p.y);
        max_y = max_y.max(p.y);
    }
    Some((
        min_x.max(0) as u32,
        min_y.max(0) as u32,
        (max_x - min_x + 1).max(1) as u32,
        (max_y - min_y + 1).max(1) as u32,
    ))
}

/// True when the intersection covers most of the smaller box
fn mostly_overlaps(a: &DetectedRegion, b: &DetectedRegion) -> bool {
    let ix0 = a.x.max(b.x);
    let iy0 = a.y.max(b.y);
    let ix1 = (a.x + a.width).min(b.x + b.width);
    let iy1 = (a.y + a.height).min(b.y + b.height);
    if ix1 <= ix0 || iy1 <= iy0 {
        return false;
    }
    let intersection = u64::from(ix1 - ix0) * u64::from(iy1 - iy0);
    let smaller = a.area().min(b.area()).max(1);
    intersection * 2 > smaller
}

/// Propagate known pixel content into masked pixels, one neighborhood band
/// per pass, until the mask is exhausted.
fn inpaint(image: &RgbaImage, mask: &[bool], radius: u32) -> RgbaImage {
    let (width, height) = image.dimensions();
    let mut out = image.clone();
    let mut known: Vec<bool> = mask.iter().map(|m| !m).collect();
    let mut unknown: Vec<u32> = (0..width * height).filter(|&i| mask[i as usize]).collect();
    let r = radius as i64;

    while !unknown.is_empty() {
        let mut updates: Vec<(u32, Rgba<u8>)> = Vec::new();
        for &idx in &unknown {
            let x = i64::from(idx % width);
            let y = i64::from(idx / width);
            let mut sums = [0u64; 4];
            let mut count = 0u64;
            for ny in (y - r).max(0)..=(y + r).min(i64::from(height) - 1) {
                for nx in (x - r).max(0)..=(x + r).min(i64::from(width) - 1) {
                    let nidx = (ny as u32) * width + nx as u32;
                    if known[nidx as usize] {
                        let px = out.get_pixel(nx as u32, ny as u32);
                        for c in 0..4 {
                            sums[c] += u64::from(px.0[c]);
                        }
                        count += 1;
                    }
                }
            }
            if count > 0 {
                let avg = Rgba([
                    (sums[0] / count) as u8,
                    (sums[1] / count) as u8,
                    (sums[2] / count) as u8,
                    (sums[3] / count) as u8,
                ]);
                updates.push((idx, avg));
            }
        }
        if updates.is_empty() {
            // Nothing known to propagate from; leave remaining pixels as-is
            break;
        }
        for &(idx, px) in &updates {
            out.put_pixel(idx % width, idx / width, px);
            known[idx as usize] = true;
        }
        unknown.retain(|&i| !known[i as usize]);
    }
    out
}
