//! Cosmetic quality enhancement: sharpening, tone adjustments, color
//! correction, and upscaling.
//!
//! All adjustments are multiplicative factors around `1.0` so a default
//! settings struct close to identity stays close to identity.

use crate::config::EnhancerSettings;
use crate::error::{PipelineError, Result};
use crate::util::{luminance, restore_color_mode};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage, Rgba, RgbaImage};
use imageproc::contrast::equalize_histogram;
use log::debug;

/// Strength of the secondary sharpening applied after upscaling, to
/// counteract interpolation blur
const POST_UPSCALE_SHARPNESS: f32 = 1.1;
/// Sigma of the blur used as the unsharp-mask base
const UNSHARP_SIGMA: f32 = 1.0;
/// Blend weight of the equalized image in color correction; full
/// equalization is visually harsh
const EQUALIZE_BLEND: f32 = 0.3;

/// Applies the cosmetic enhancement operations of the pipeline
#[derive(Debug, Clone)]
pub struct QualityEnhancer {
    settings: EnhancerSettings,
}

impl QualityEnhancer {
    /// Create an enhancer with the given factors
    #[must_use]
    pub fn new(settings: EnhancerSettings) -> Self {
        Self { settings }
    }

    /// Sharpening, contrast, brightness and saturation in fixed order,
    /// followed by a light smoothing pass that damps sharpening artifacts.
    /// The result keeps the source's color mode.
    #[must_use]
    pub fn enhance_quality(&self, image: &DynamicImage) -> DynamicImage {
        let s = &self.settings;
        let sharpened = sharpen(image, s.sharpness);

        let contrast = s.contrast;
        let brightness = s.brightness;
        let saturation = s.saturation;
        let adjusted = map_pixels(&sharpened, |[r, g, b]| {
            let tone = |v: f32| ((v - 128.0) * contrast + 128.0) * brightness;
            let (r, g, b) = (tone(r), tone(g), tone(b));
            let luma = luminance(
                r.clamp(0.0, 255.0) as u8,
                g.clamp(0.0, 255.0) as u8,
                b.clamp(0.0, 255.0) as u8,
            );
            [
                luma + (r - luma) * saturation,
                luma + (g - luma) * saturation,
                luma + (b - luma) * saturation,
            ]
        });

        let result = if s.smoothing_sigma > 0.0 {
            adjusted.blur(s.smoothing_sigma)
        } else {
            adjusted
        };
        restore_color_mode(image, result.to_rgba8())
    }

    /// Resample to `factor` times the current size with a high-quality
    /// kernel, then re-sharpen mildly.
    ///
    /// # Errors
    ///
    /// Returns an operation error when `factor` is not in `1.0..=4.0`.
    pub fn upscale(&self, image: &DynamicImage, factor: f32) -> Result<DynamicImage> {
        if !(1.0..=4.0).contains(&factor) || !factor.is_finite() {
            return Err(PipelineError::operation(
                "upscale",
                format!("factor {} outside 1.0-4.0", factor),
            ));
        }
        let (width, height) = image.dimensions();
        let new_width = ((width as f32 * factor).round() as u32).max(1);
        let new_height = ((height as f32 * factor).round() as u32).max(1);
        debug!(
            "upscaling {}x{} -> {}x{} (factor {})",
            width, height, new_width, new_height, factor
        );

        let resampled = image.resize_exact(new_width, new_height, FilterType::Lanczos3);
        let resharpened = sharpen(&resampled, POST_UPSCALE_SHARPNESS);
        Ok(restore_color_mode(image, resharpened.to_rgba8()))
    }

    /// Blend a per-channel histogram-equalized version into the original at
    /// 30% strength, lifting contrast while keeping natural tone.
    #[must_use]
    pub fn correct_colors(&self, image: &DynamicImage) -> DynamicImage {
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();

        let mut channels: Vec<GrayImage> = Vec::with_capacity(3);
        for c in 0..3 {
            let mut chan = GrayImage::new(width, height);
            for (x, y, px) in rgba.enumerate_pixels() {
                chan.put_pixel(x, y, image::Luma([px.0[c]]));
            }
            channels.push(equalize_histogram(&chan));
        }

        let mut out = RgbaImage::new(width, height);
        for (x, y, px) in rgba.enumerate_pixels() {
            let mut blended = [0u8; 4];
            for c in 0..3 {
                let original = f32::from(px.0[c]);
                let equalized = f32::from(channels[c].get_pixel(x, y).0[0]);
                blended[c] = ((1.0 - EQUALIZE_BLEND) * original + EQUALIZE_BLEND * equalized)
                    .clamp(0.0, 255.0) as u8;
            }
            blended[3] = px.0[3];
            out.put_pixel(x, y, Rgba(blended));
        }
        restore_color_mode(image, out)
    }
}

/// Unsharp mask: `out = original + (original - blurred) * (strength - 1)`.
/// A strength of `1.0` is the identity.
fn sharpen(image: &DynamicImage, strength: f32) -> DynamicImage {
    if (strength - 1.0).abs() < f32::EPSILON {
        return image.clone();
    }
    let amount = strength - 1.0;
    let blurred = image.blur(UNSHARP_SIGMA).to_rgba8();
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();

    let mut out = RgbaImage::new(width, height);
    for (x, y, px) in rgba.enumerate_pixels() {
        let soft = blurred.get_pixel(x, y);
        let mut sharpened = [0u8; 4];
        for c in 0..3 {
            let v = f32::from(px.0[c]);
            let b = f32::from(soft.0[c]);
            sharpened[c] = (v + (v - b) * amount).clamp(0.0, 255.0) as u8;
        }
        sharpened[3] = px.0[3];
        out.put_pixel(x, y, Rgba(sharpened));
    }
    DynamicImage::ImageRgba8(out)
}

/// Apply `f` to the RGB channels of every pixel, leaving alpha untouched
fn map_pixels<F: Fn([f32; 3]) -> [f32; 3]>(image: &DynamicImage, f: F) -> DynamicImage {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut out = RgbaImage::new(width, height);
    for (x, y, px) in rgba.enumerate_pixels() {
        let [r, g, b] = f([f32::from(px.0[0]), f32::from(px.0[1]), f32::from(px.0[2])]);
        out.put_pixel(
            x,
            y,
            Rgba([
                r.clamp(0.0, 255.0) as u8,
                g.clamp(0.0, 255.0) as u8,
                b.clamp(0.0, 255.0) as u8,
                px.0[3],
            ]),
        );
    }
    DynamicImage::ImageRgba8(out)
}
