//! Variant generation and size-targeted encoding.
//!
//! Variants are produced by a smart resize that center-crops toward the
//! target aspect ratio before resampling, so renditions are never
//! stretched. Encoding runs each variant through a per-format baseline
//! preset and, when a byte budget is set, a bounded quality/scale search:
//! quality drops in fixed steps to a floor, then the image shrinks 10% per
//! step to a scale floor, then one final fallback encode is returned
//! regardless of size. Lossless formats skip the quality steps and their
//! fallback reuses the last scaled encode. The search can never loop: its
//! attempt count is structurally capped.

use crate::config::SizeSearchConfig;
use crate::error::{PipelineError, Result};
use crate::types::{EncodeFormat, VariantSpec};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use log::debug;
use std::collections::BTreeMap;

/// Aspect ratios closer than this are treated as equal (no crop)
const ASPECT_EPSILON: f32 = 0.01;

/// Statistics for one encoded rendition
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeStats {
    /// Final pixel width after any size-search downscaling
    pub width: u32,
    /// Final pixel height after any size-search downscaling
    pub height: u32,
    /// Encoded byte size
    pub byte_size: u64,
    /// Total encode attempts, baseline included
    pub attempts: u32,
    /// Quality setting of the returned encode (100 for lossless)
    pub quality: u8,
    /// Scale of the returned encode relative to the input
    pub scale: f32,
    /// Coarse 0-100 score for reporting: quality discounted by scale
    pub quality_score: u8,
}

/// Produces aspect-correct variants and encodes them under size budgets
#[derive(Debug, Clone)]
pub struct Optimizer {
    config: SizeSearchConfig,
}

impl Optimizer {
    /// Create an optimizer with the given search parameters
    #[must_use]
    pub fn new(config: SizeSearchConfig) -> Self {
        Self { config }
    }

    /// Produce one aspect-correct rendition per variant spec.
    ///
    /// Every produced image has exactly its variant's pixel dimensions.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidConfig` when a variant spec has a
    /// zero dimension.
    pub fn create_variants(
        &self,
        image: &DynamicImage,
        specs: &[VariantSpec],
    ) -> Result<BTreeMap<String, DynamicImage>> {
        let mut variants = BTreeMap::new();
        for spec in specs {
            if spec.width == 0 || spec.height == 0 {
                return Err(PipelineError::invalid_config(format!(
                    "variant '{}' has a zero dimension",
                    spec.name
                )));
            }
            let resized = smart_resize(image, spec);
            debug_assert_eq!(resized.dimensions(), (spec.width, spec.height));
            variants.insert(spec.name.clone(), resized);
        }
        Ok(variants)
    }

    /// Encode `image` into `format`, searching below `target_size_kb` when
    /// one is given.
    ///
    /// Never returns larger pixel dimensions than its input. When the
    /// budget cannot be met the final fallback encode is returned anyway;
    /// callers can see this in [`EncodeStats::byte_size`].
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Encoding` when the codec rejects the image.
    pub fn optimize_for_web(
        &self,
        image: &DynamicImage,
        format: EncodeFormat,
        target_size_kb: Option<u32>,
    ) -> Result<(Vec<u8>, EncodeStats)> {
        let cfg = &self.config;
        let prepared = if image.color().has_alpha() && !format.supports_transparency() {
            flatten_onto_white(image)
        } else {
            image.clone()
        };
        let (width, height) = prepared.dimensions();

        let baseline_quality = match format {
            EncodeFormat::Jpeg => cfg.jpeg_quality,
            EncodeFormat::WebP => cfg.webp_quality,
            EncodeFormat::Png => 100,
        };

        let mut attempts = 0u32;
        let mut bytes = encode(&prepared, format, baseline_quality)?;
        attempts += 1;

        let budget = target_size_kb.map(|kb| u64::from(kb) * 1024);
        let Some(budget) = budget else {
            let stats = stats_for(width, height, &bytes, attempts, baseline_quality, 1.0);
            return Ok((bytes, stats));
        };
        if bytes.len() as u64 <= budget {
            let stats = stats_for(width, height, &bytes, attempts, baseline_quality, 1.0);
            return Ok((bytes, stats));
        }

        // A lossless format cannot trade quality for size; only the scale
        // descent can shrink it
        let lossless = format == EncodeFormat::Png;

        // Quality descent at full resolution
        if !lossless {
            let mut quality = baseline_quality;
            while quality > cfg.quality_floor {
                quality = quality.saturating_sub(cfg.quality_step).max(cfg.quality_floor);
                bytes = encode(&prepared, format, quality)?;
                attempts += 1;
                if bytes.len() as u64 <= budget {
                    let stats = stats_for(width, height, &bytes, attempts, quality, 1.0);
                    return Ok((bytes, stats));
                }
            }
        }

        // Progressive downscale at a fixed mid quality
        let scale_quality = if lossless { 100 } else { cfg.scale_quality };
        let mut scale = 1.0_f32;
        let mut scaled = prepared.clone();
        while scale - cfg.scale_step >= cfg.scale_floor - 1e-6 {
            scale = ((scale - cfg.scale_step) * 100.0).round() / 100.0;
            scaled = resize_to_scale(&prepared, scale);
            bytes = encode(&scaled, format, scale_quality)?;
            attempts += 1;
            if bytes.len() as u64 <= budget {
                let (sw, sh) = scaled.dimensions();
                let stats = stats_for(sw, sh, &bytes, attempts, scale_quality, scale);
                return Ok((bytes, stats));
            }
        }

        // Give up: one last fallback encode, returned regardless of size.
        // For a lossless format the fallback would be byte-identical to the
        // last scaled encode, so that encode is reused as-is.
        let fallback_quality = if lossless {
            scale_quality
        } else {
            bytes = encode(&scaled, format, cfg.fallback_quality)?;
            attempts += 1;
            cfg.fallback_quality
        };
        let (sw, sh) = scaled.dimensions();
        debug!(
            "size budget {}KB unreachable for {}x{} {}; returning fallback of {} bytes after {} attempts",
            target_size_kb.unwrap_or(0),
            width,
            height,
            format,
            bytes.len(),
            attempts
        );
        let stats = stats_for(sw, sh, &bytes, attempts, fallback_quality, scale);
        Ok((bytes, stats))
    }
}

/// Centered crop box `(x, y, width, height)` that matches `target_aspect`
/// exactly; the full frame when the aspect is already close enough.
pub(crate) fn crop_box(width: u32, height: u32, target_aspect: f32) -> (u32, u32, u32, u32) {
    let current_aspect = width as f32 / height.max(1) as f32;
    if (current_aspect - target_aspect).abs() < ASPECT_EPSILON {
        return (0, 0, width, height);
    }
    if current_aspect > target_aspect {
        // Too wide: trim the sides
        let crop_width = ((height as f32 * target_aspect).round() as u32).clamp(1, width);
        ((width - crop_width) / 2, 0, crop_width, height)
    } else {
        // Too tall: trim top and bottom
        let crop_height = ((width as f32 / target_aspect).round() as u32).clamp(1, height);
        (0, (height - crop_height) / 2, width, crop_height)
    }
}

/// Crop toward the target aspect, centered, then resample to the exact
/// target dimensions. Never stretches.
fn smart_resize(image: &DynamicImage, spec: &VariantSpec) -> DynamicImage {
    let (width, height) = image.dimensions();
    let (x, y, cw, ch) = crop_box(width, height, spec.aspect());
    let cropped = if (x, y, cw, ch) == (0, 0, width, height) {
        image.clone()
    } else {
        image.crop_imm(x, y, cw, ch)
    };
    cropped.resize_exact(spec.width, spec.height, FilterType::Lanczos3)
}

fn resize_to_scale(image: &DynamicImage, scale: f32) -> DynamicImage {
    let (width, height) = image.dimensions();
    let w = ((width as f32 * scale).round() as u32).max(1);
    let h = ((height as f32 * scale).round() as u32).max(1);
    image.resize_exact(w, h, FilterType::Lanczos3)
}

/// Composite a transparent image onto a white background for opaque-only
/// formats
fn flatten_onto_white(image: &DynamicImage) -> DynamicImage {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut out = RgbImage::new(width, height);
    for (x, y, px) in rgba.enumerate_pixels() {
        let alpha = f32::from(px.0[3]) / 255.0;
        let blend = |c: u8| (f32::from(c) * alpha + 255.0 * (1.0 - alpha)).round() as u8;
        out.put_pixel(x, y, Rgb([blend(px.0[0]), blend(px.0[1]), blend(px.0[2])]));
    }
    DynamicImage::ImageRgb8(out)
}

fn encode(image: &DynamicImage, format: EncodeFormat, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    match format {
        EncodeFormat::Jpeg => {
            let rgb = image.to_rgb8();
            let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
            rgb.write_with_encoder(encoder)
                .map_err(|e| PipelineError::encoding(format!("jpeg encode failed: {}", e)))?;
        }
        EncodeFormat::Png => {
            // Lossless; quality has no effect, compression effort is maxed
            let encoder = PngEncoder::new_with_quality(
                &mut buffer,
                CompressionType::Best,
                PngFilterType::Adaptive,
            );
            image
                .write_with_encoder(encoder)
                .map_err(|e| PipelineError::encoding(format!("png encode failed: {}", e)))?;
        }
        EncodeFormat::WebP => {
            let rgba = image.to_rgba8();
            let encoder = webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height());
            buffer = encoder.encode(f32::from(quality)).to_vec();
        }
    }
    Ok(buffer)
}

fn stats_for(
    width: u32,
    height: u32,
    bytes: &[u8],
    attempts: u32,
    quality: u8,
    scale: f32,
) -> EncodeStats {
    EncodeStats {
        width,
        height,
        byte_size: bytes.len() as u64,
        attempts,
        quality,
        scale,
        quality_score: (f32::from(quality) * scale).round().clamp(0.0, 100.0) as u8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn optimizer() -> Optimizer {
        Optimizer::new(SizeSearchConfig::default())
    }

    fn spec(name: &str, width: u32, height: u32) -> VariantSpec {
        VariantSpec {
            name: name.to_string(),
            width,
            height,
        }
    }

    /// Deterministic noisy image that resists compression
    fn noise(width: u32, height: u32) -> DynamicImage {
        let mut state = 0x2545_f491_u32;
        let mut img = RgbImage::new(width, height);
        for px in img.pixels_mut() {
            // xorshift32
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let b = state.to_le_bytes();
            *px = Rgb([b[0], b[1], b[2]]);
        }
        DynamicImage::ImageRgb8(img)
    }

    fn gradient(width: u32, height: u32) -> DynamicImage {
        let mut img = RgbImage::new(width, height);
        for (x, y, px) in img.enumerate_pixels_mut() {
            *px = Rgb([(x % 256) as u8, (y % 256) as u8, 60]);
        }
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn variants_match_requested_dimensions_exactly() {
        let image = gradient(640, 480);
        let specs = vec![
            spec("thumbnail", 150, 150),
            spec("mobile", 360, 640),
            spec("main", 800, 600),
        ];
        let variants = optimizer().create_variants(&image, &specs).unwrap();
        assert_eq!(variants.len(), 3);
        assert_eq!(variants["thumbnail"].dimensions(), (150, 150));
        assert_eq!(variants["mobile"].dimensions(), (360, 640));
        assert_eq!(variants["main"].dimensions(), (800, 600));
    }

    #[test]
    fn crop_box_is_full_frame_when_aspects_match() {
        // 640x480 is 4:3; a 4:3 target within epsilon means no crop
        assert_eq!(crop_box(640, 480, 4.0 / 3.0), (0, 0, 640, 480));
        assert_eq!(crop_box(640, 480, 4.0 / 3.0 + 0.009), (0, 0, 640, 480));
    }

    #[test]
    fn crop_box_trims_excess_width_centered() {
        let (x, y, w, h) = crop_box(640, 480, 1.0);
        assert_eq!((y, h), (0, 480));
        assert_eq!(w, 480);
        assert_eq!(x, 80); // (640 - 480) / 2
    }

    #[test]
    fn crop_box_trims_excess_height_centered() {
        let (x, y, w, h) = crop_box(480, 640, 1.0);
        assert_eq!((x, w), (0, 480));
        assert_eq!(h, 480);
        assert_eq!(y, 80);
    }

    #[test]
    fn crop_box_aspect_matches_target_exactly() {
        let target = 16.0 / 9.0;
        let (_, _, w, h) = crop_box(1000, 800, target);
        assert!((w as f32 / h as f32 - target).abs() < ASPECT_EPSILON);
    }

    #[test]
    fn create_variants_rejects_zero_dimension() {
        let image = gradient(100, 100);
        let err = optimizer()
            .create_variants(&image, &[spec("broken", 0, 100)])
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn encode_without_budget_is_single_attempt() {
        let image = gradient(64, 64);
        let (bytes, stats) = optimizer()
            .optimize_for_web(&image, EncodeFormat::Jpeg, None)
            .unwrap();
        assert!(!bytes.is_empty());
        assert_eq!(stats.attempts, 1);
        assert_eq!((stats.width, stats.height), (64, 64));
        assert!((stats.scale - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn generous_budget_met_at_baseline() {
        let image = gradient(64, 64);
        let (bytes, stats) = optimizer()
            .optimize_for_web(&image, EncodeFormat::Jpeg, Some(10_000))
            .unwrap();
        assert!(bytes.len() as u64 <= 10_000 * 1024);
        assert_eq!(stats.attempts, 1);
        assert_eq!(stats.quality, 85);
    }

    #[test]
    fn impossible_budget_terminates_within_attempt_bound() {
        let image = noise(256, 256);
        let (bytes, stats) = optimizer()
            .optimize_for_web(&image, EncodeFormat::Jpeg, Some(1))
            .unwrap();
        // Baseline + 6 quality steps + 5 scale steps + 1 fallback
        assert!(stats.attempts <= 13, "attempts = {}", stats.attempts);
        assert!(!bytes.is_empty());
        assert_eq!(stats.quality, 50);
        assert!((stats.scale - 0.5).abs() < 0.01);
        // Fallback output is halved, never enlarged
        assert_eq!((stats.width, stats.height), (128, 128));
    }

    #[test]
    fn png_search_skips_quality_descent() {
        let image = noise(256, 256);
        let (bytes, stats) = optimizer()
            .optimize_for_web(&image, EncodeFormat::Png, Some(1))
            .unwrap();
        // Baseline + 5 scale steps; quality steps are no-ops for a lossless
        // format and the fallback reuses the last scaled encode
        assert_eq!(stats.attempts, 6, "attempts = {}", stats.attempts);
        assert_eq!(stats.quality, 100);
        assert!((stats.scale - 0.5).abs() < 0.01);
        assert_eq!((stats.width, stats.height), (128, 128));
        assert!(!bytes.is_empty());
    }

    #[test]
    fn webp_search_stays_within_attempt_bound() {
        let image = noise(256, 256);
        let (_, stats) = optimizer()
            .optimize_for_web(&image, EncodeFormat::WebP, Some(1))
            .unwrap();
        assert!(stats.attempts <= 13, "attempts = {}", stats.attempts);
        assert_eq!(stats.quality, 50);
    }

    #[test]
    fn tight_budget_met_by_quality_descent() {
        let image = noise(128, 128);
        let opt = optimizer();
        let (baseline, _) = opt
            .optimize_for_web(&image, EncodeFormat::Jpeg, None)
            .unwrap();
        // Budget between the floor-quality size and the baseline size forces
        // the quality loop to do the work without downscaling
        let budget_kb = (baseline.len() as u32 / 1024).max(2) - 1;
        let (bytes, stats) = opt
            .optimize_for_web(&image, EncodeFormat::Jpeg, Some(budget_kb))
            .unwrap();
        if bytes.len() as u64 <= u64::from(budget_kb) * 1024 {
            assert!(stats.quality < 85 || stats.scale < 1.0 || stats.attempts == 1);
        } else {
            assert_eq!(stats.quality, 50);
        }
        assert!(stats.attempts <= 13);
    }

    #[test]
    fn never_returns_larger_dimensions_than_input() {
        let image = noise(200, 150);
        for format in [EncodeFormat::Jpeg, EncodeFormat::WebP, EncodeFormat::Png] {
            let (_, stats) = optimizer()
                .optimize_for_web(&image, format, Some(1))
                .unwrap();
            assert!(stats.width <= 200 && stats.height <= 150);
        }
    }

    #[test]
    fn transparency_flattened_for_jpeg() {
        let mut rgba = image::RgbaImage::new(32, 32);
        for px in rgba.pixels_mut() {
            *px = image::Rgba([255, 0, 0, 0]); // fully transparent red
        }
        let image = DynamicImage::ImageRgba8(rgba);
        let (bytes, _) = optimizer()
            .optimize_for_web(&image, EncodeFormat::Jpeg, None)
            .unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
        // Fully transparent pixels flatten onto white, not red
        let px = decoded.get_pixel(16, 16);
        assert!(px.0[0] > 200 && px.0[1] > 200 && px.0[2] > 200, "{:?}", px);
    }

    #[test]
    fn webp_and_png_round_trip() {
        let image = gradient(48, 48);
        for format in [EncodeFormat::WebP, EncodeFormat::Png] {
            let (bytes, stats) = optimizer()
                .optimize_for_web(&image, format, None)
                .unwrap();
            let decoded = image::load_from_memory(&bytes).unwrap();
            assert_eq!(decoded.dimensions(), (48, 48), "{:?}", format);
            assert_eq!(stats.byte_size, bytes.len() as u64);
        }
    }

    #[test]
    fn quality_score_discounted_by_scale() {
        let stats = stats_for(10, 10, &[0u8; 4], 3, 80, 0.5);
        assert_eq!(stats.quality_score, 40);
    }
}
