//! Small shared pixel helpers used across the processing modules

use image::{DynamicImage, RgbaImage};

/// Rec. 601 luminance of an RGB triple, in `[0, 255]`
#[must_use]
pub(crate) fn luminance(r: u8, g: u8, b: u8) -> f32 {
    0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b)
}

/// Mean and standard deviation of a slice of intensity values
#[must_use]
pub(crate) fn mean_stddev(values: &[f32]) -> (f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    (mean, variance.sqrt())
}

/// Return RGBA pixels in the color mode of `original`.
///
/// Processing happens in RGBA; the result is converted back so downstream
/// encoding sees the mode the source started from. Grayscale sources stay
/// grayscale and alpha is kept only where the source carried it.
#[must_use]
pub(crate) fn restore_color_mode(original: &DynamicImage, processed: RgbaImage) -> DynamicImage {
    let color = original.color();
    let processed = DynamicImage::ImageRgba8(processed);
    match (color.has_color(), color.has_alpha()) {
        (false, false) => DynamicImage::ImageLuma8(processed.to_luma8()),
        (false, true) => DynamicImage::ImageLumaA8(processed.to_luma_alpha8()),
        (true, false) => DynamicImage::ImageRgb8(processed.to_rgb8()),
        (true, true) => processed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn luminance_of_white_is_full() {
        assert!((luminance(255, 255, 255) - 255.0).abs() < 0.01);
    }

    #[test]
    fn mean_stddev_of_constant_slice() {
        let (mean, sd) = mean_stddev(&[42.0; 10]);
        assert!((mean - 42.0).abs() < 1e-6);
        assert!(sd.abs() < 1e-6);
    }

    #[test]
    fn mean_stddev_of_known_values() {
        let (mean, sd) = mean_stddev(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!((mean - 3.0).abs() < 1e-6);
        assert!((sd - 2.0_f32.sqrt()).abs() < 1e-5);
    }

    #[test]
    fn restore_mode_keeps_rgb_for_rgb_source() {
        let original = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        let processed = RgbaImage::new(4, 4);
        let restored = restore_color_mode(&original, processed);
        assert!(!restored.color().has_alpha());
    }

    #[test]
    fn restore_mode_keeps_alpha_for_rgba_source() {
        let original = DynamicImage::ImageRgba8(RgbaImage::new(4, 4));
        let processed = RgbaImage::new(4, 4);
        let restored = restore_color_mode(&original, processed);
        assert!(restored.color().has_alpha());
    }

    #[test]
    fn restore_mode_keeps_luma_for_grayscale_source() {
        let original = DynamicImage::ImageLuma8(image::GrayImage::new(4, 4));
        let restored = restore_color_mode(&original, RgbaImage::new(4, 4));
        assert_eq!(restored.color(), image::ColorType::L8);
    }

    #[test]
    fn restore_mode_keeps_luma_alpha_for_grayscale_alpha_source() {
        let original = DynamicImage::ImageLumaA8(image::GrayAlphaImage::new(4, 4));
        let restored = restore_color_mode(&original, RgbaImage::new(4, 4));
        assert_eq!(restored.color(), image::ColorType::La8);
    }
}
