//! Text watermark stamping.
//!
//! Renders the configured text with a scaled 8x8 bitmap font and alpha
//! blends it over one of five anchor positions. Output dimensions always
//! equal input dimensions.

use crate::error::{PipelineError, Result};
use crate::types::{WatermarkAnchor, WatermarkConfig};
use crate::util::restore_color_mode;
use font8x8::legacy::BASIC_LEGACY;
use image::{DynamicImage, GenericImageView};

/// Pixels kept between the stamp and the image border
const MARGIN: u32 = 20;
/// Native glyph size of the bitmap font
const GLYPH_PX: u32 = 8;

/// Stamps configured watermark text onto images
#[derive(Debug, Clone)]
pub struct Watermarker {
    config: WatermarkConfig,
}

impl Watermarker {
    /// Create a watermarker for the given text and placement.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidConfig` when the text is empty or
    /// the opacity is outside `0.0..=1.0`.
    pub fn new(config: WatermarkConfig) -> Result<Self> {
        if config.text.trim().is_empty() {
            return Err(PipelineError::invalid_config("watermark text is empty"));
        }
        if !(0.0..=1.0).contains(&config.opacity) {
            return Err(PipelineError::invalid_config(format!(
                "watermark opacity {} outside 0.0..=1.0",
                config.opacity
            )));
        }
        if config.font_px == 0 {
            return Err(PipelineError::invalid_config("watermark font size is zero"));
        }
        Ok(Self { config })
    }

    /// Stamp the watermark onto a copy of `image`.
    ///
    /// Glyphs that would not fit inside the frame are clipped at the
    /// border; a frame too small for any glyph is returned unchanged. The
    /// result keeps the source's color mode, so a grayscale source gets a
    /// grayscale stamp.
    #[must_use]
    pub fn apply(&self, image: &DynamicImage) -> DynamicImage {
        let (width, height) = image.dimensions();
        let scale = glyph_scale(self.config.font_px);
        let text_width = text_width_px(&self.config.text, scale);
        let text_height = GLYPH_PX * scale;
        let (origin_x, origin_y) =
            anchor_position(self.config.anchor, width, height, text_width, text_height);

        let mut canvas = image.to_rgba8();
        let opacity = self.config.opacity;
        let color = self.config.color;
        let mut pen_x = origin_x;
        for ch in self.config.text.chars() {
            let glyph = glyph_rows(ch);
            for (row, bits) in glyph.iter().enumerate() {
                for col in 0..GLYPH_PX {
                    if bits & (1 << col) == 0 {
                        continue;
                    }
                    // One font pixel covers a scale x scale block
                    for dy in 0..scale {
                        for dx in 0..scale {
                            let px = pen_x + col * scale + dx;
                            let py = origin_y + row as u32 * scale + dy;
                            if px >= width || py >= height {
                                continue;
                            }
                            let dst = canvas.get_pixel_mut(px, py);
                            let alpha = opacity * f32::from(color[3]) / 255.0;
                            for c in 0..3 {
                                let blended = f32::from(color[c]) * alpha
                                    + f32::from(dst.0[c]) * (1.0 - alpha);
                                dst.0[c] = blended.round().clamp(0.0, 255.0) as u8;
                            }
                        }
                    }
                }
            }
            pen_x += GLYPH_PX * scale;
        }
        restore_color_mode(image, canvas)
    }
}

/// Integer upscaling factor from the native 8px glyphs to the configured
/// font size
fn glyph_scale(font_px: u32) -> u32 {
    (font_px / GLYPH_PX).max(1)
}

fn text_width_px(text: &str, scale: u32) -> u32 {
    text.chars().count() as u32 * GLYPH_PX * scale
}

/// Bit rows for one glyph; unknown characters render as a space
fn glyph_rows(ch: char) -> [u8; 8] {
    let idx = ch as usize;
    if idx < BASIC_LEGACY.len() {
        BASIC_LEGACY[idx]
    } else {
        BASIC_LEGACY[b' ' as usize]
    }
}

/// Top-left stamp origin for an anchor, clamped so the margin never pushes
/// the stamp out of a small frame
pub(crate) fn anchor_position(
    anchor: WatermarkAnchor,
    width: u32,
    height: u32,
    text_width: u32,
    text_height: u32,
) -> (u32, u32) {
    let right = width.saturating_sub(text_width + MARGIN);
    let bottom = height.saturating_sub(text_height + MARGIN);
    let center_x = width.saturating_sub(text_width) / 2;
    let center_y = height.saturating_sub(text_height) / 2;
    match anchor {
        WatermarkAnchor::TopLeft => (MARGIN.min(right), MARGIN.min(bottom)),
        WatermarkAnchor::TopRight => (right, MARGIN.min(bottom)),
        WatermarkAnchor::BottomLeft => (MARGIN.min(right), bottom),
        WatermarkAnchor::BottomRight => (right, bottom),
        WatermarkAnchor::Center => (center_x, center_y),
    }
}
