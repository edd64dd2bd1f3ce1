//! Configuration for the enhancement pipeline.
//!
//! Every tunable the pipeline consumes is an explicit, documented field with
//! a default and a valid range; nothing is passed around as loose maps.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Multiplicative adjustment factors for the quality-enhancement pass.
///
/// All factors sit around `1.0` (no change); validation accepts `0.0..=3.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnhancerSettings {
    /// Unsharp-mask strength. Default 1.2, range 0.0-3.0.
    pub sharpness: f32,
    /// Contrast around the midpoint. Default 1.1, range 0.0-3.0.
    pub contrast: f32,
    /// Linear brightness. Default 1.05, range 0.0-3.0.
    pub brightness: f32,
    /// Saturation relative to luminance. Default 1.1, range 0.0-3.0.
    pub saturation: f32,
    /// Sigma of the final smoothing pass that damps sharpening artifacts.
    /// Default 0.6, range 0.0-3.0 (0 disables smoothing).
    pub smoothing_sigma: f32,
}

impl Default for EnhancerSettings {
    fn default() -> Self {
        Self {
            sharpness: 1.2,
            contrast: 1.1,
            brightness: 1.05,
            saturation: 1.1,
            smoothing_sigma: 0.6,
        }
    }
}

impl EnhancerSettings {
    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("sharpness", self.sharpness),
            ("contrast", self.contrast),
            ("brightness", self.brightness),
            ("saturation", self.saturation),
            ("smoothing_sigma", self.smoothing_sigma),
        ] {
            if !(0.0..=3.0).contains(&value) || !value.is_finite() {
                return Err(PipelineError::config_value_error(name, value, "0.0-3.0"));
            }
        }
        Ok(())
    }
}

/// Tunables for the branding/watermark detector.
///
/// The confidence thresholds are heuristic defaults, not invariants; callers
/// with labelled data are expected to tune them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Minimum confidence to classify a blob as a text/logo mark.
    /// Default 0.7, range 0.0-1.0.
    pub text_logo_threshold: f32,
    /// Minimum score to classify a corner quadrant as a watermark pattern.
    /// Default 0.6, range 0.0-1.0.
    pub watermark_threshold: f32,
    /// Minimum candidate bounding-box area in px². Default 100.
    pub min_region_area: u32,
    /// Maximum candidate area as a fraction of the image. Default 0.30,
    /// range 0.0-1.0.
    pub max_region_area_fraction: f32,
    /// Minimum bounding-box aspect ratio (w/h). Default 0.2.
    pub min_aspect: f32,
    /// Maximum bounding-box aspect ratio (w/h). Default 10.0.
    pub max_aspect: f32,
    /// Radius of the morphological closing that merges nearby strokes.
    /// Default 3, range 1-16.
    pub closing_radius: u8,
    /// Neighborhood radius for the inpainting fill. Default 3, range 1-16.
    pub inpaint_radius: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            text_logo_threshold: 0.7,
            watermark_threshold: 0.6,
            min_region_area: 100,
            max_region_area_fraction: 0.30,
            min_aspect: 0.2,
            max_aspect: 10.0,
            closing_radius: 3,
            inpaint_radius: 3,
        }
    }
}

impl DetectorConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.text_logo_threshold) {
            return Err(PipelineError::config_value_error(
                "text_logo_threshold",
                self.text_logo_threshold,
                "0.0-1.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.watermark_threshold) {
            return Err(PipelineError::config_value_error(
                "watermark_threshold",
                self.watermark_threshold,
                "0.0-1.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.max_region_area_fraction) {
            return Err(PipelineError::config_value_error(
                "max_region_area_fraction",
                self.max_region_area_fraction,
                "0.0-1.0",
            ));
        }
        if self.min_aspect <= 0.0 || self.max_aspect < self.min_aspect {
            return Err(PipelineError::invalid_config(
                "aspect range must satisfy 0 < min_aspect <= max_aspect",
            ));
        }
        if self.closing_radius == 0 || self.closing_radius > 16 {
            return Err(PipelineError::config_value_error(
                "closing_radius",
                self.closing_radius,
                "1-16",
            ));
        }
        if self.inpaint_radius == 0 || self.inpaint_radius > 16 {
            return Err(PipelineError::config_value_error(
                "inpaint_radius",
                self.inpaint_radius,
                "1-16",
            ));
        }
        Ok(())
    }
}

/// Parameters of the bounded size-targeted encoding search.
///
/// The search is baseline encode, then quality reduction in `quality_step`
/// decrements down to `quality_floor`, then 10% downscales to `scale_floor`
/// at `scale_quality`, then one final fallback encode. Termination is
/// structural: the attempt count can never exceed
/// `1 + quality steps + scale steps + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeSearchConfig {
    /// Baseline JPEG quality. Default 85, range 1-100.
    pub jpeg_quality: u8,
    /// Baseline lossy WebP quality. Default 80, range 1-100.
    pub webp_quality: u8,
    /// Quality decrement per search step. Default 10, range 1-50.
    pub quality_step: u8,
    /// Lowest quality the search will try. Default 30, range 1-100.
    pub quality_floor: u8,
    /// Relative downscale per step. Default 0.1, range 0.01-0.5.
    pub scale_step: f32,
    /// Smallest scale the search will try. Default 0.5, range 0.1-1.0.
    pub scale_floor: f32,
    /// Fixed quality used during the downscale steps. Default 75.
    pub scale_quality: u8,
    /// Quality of the final give-up encode. Default 50.
    pub fallback_quality: u8,
}

impl Default for SizeSearchConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: 85,
            webp_quality: 80,
            quality_step: 10,
            quality_floor: 30,
            scale_step: 0.1,
            scale_floor: 0.5,
            scale_quality: 75,
            fallback_quality: 50,
        }
    }
}

impl SizeSearchConfig {
    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("jpeg_quality", self.jpeg_quality),
            ("webp_quality", self.webp_quality),
            ("quality_floor", self.quality_floor),
            ("scale_quality", self.scale_quality),
            ("fallback_quality", self.fallback_quality),
        ] {
            if value == 0 || value > 100 {
                return Err(PipelineError::config_value_error(name, value, "1-100"));
            }
        }
        if self.quality_step == 0 || self.quality_step > 50 {
            return Err(PipelineError::config_value_error(
                "quality_step",
                self.quality_step,
                "1-50",
            ));
        }
        if !(0.01..=0.5).contains(&self.scale_step) {
            return Err(PipelineError::config_value_error(
                "scale_step",
                self.scale_step,
                "0.01-0.5",
            ));
        }
        if !(0.1..=1.0).contains(&self.scale_floor) {
            return Err(PipelineError::config_value_error(
                "scale_floor",
                self.scale_floor,
                "0.1-1.0",
            ));
        }
        Ok(())
    }
}

/// Pluggable cost constants for job-level cost estimation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    /// Flat cost per successfully processed image. Default 0.004.
    pub per_image: f64,
    /// Cost per encoded megabyte. Default 0.0002.
    pub per_megabyte: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            per_image: 0.004,
            per_megabyte: 0.0002,
        }
    }
}

impl CostModel {
    /// Estimated cost for `images` successful images and `encoded_bytes`
    /// total output
    #[must_use]
    pub fn estimate(&self, images: usize, encoded_bytes: u64) -> f64 {
        let megabytes = encoded_bytes as f64 / 1_048_576.0;
        images as f64 * self.per_image + megabytes * self.per_megabyte
    }
}

/// Top-level pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Quality-enhancement factors
    pub enhancer: EnhancerSettings,
    /// Branding detector tunables
    pub detector: DetectorConfig,
    /// Size-targeted encoding search parameters
    pub size_search: SizeSearchConfig,
    /// Cost constants for reporting
    pub cost: CostModel,
    /// Factor used when a job requests the upscale operation.
    /// Default 2.0, range 1.0-4.0.
    pub upscale_factor: f32,
    /// Timeout applied to each boundary call (fetch, matting, delivery).
    /// Default 30s.
    #[serde(with = "duration_secs")]
    pub boundary_timeout: Duration,
    /// Bounded worker count across images within one job. Default 1, which
    /// is the reference sequential behavior. Range 1-64.
    pub max_concurrent_images: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enhancer: EnhancerSettings::default(),
            detector: DetectorConfig::default(),
            size_search: SizeSearchConfig::default(),
            cost: CostModel::default(),
            upscale_factor: 2.0,
            boundary_timeout: Duration::from_secs(30),
            max_concurrent_images: 1,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::new()
    }

    /// Validate all nested sections
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidConfig` naming the first offending
    /// field and its valid range.
    pub fn validate(&self) -> Result<()> {
        self.enhancer.validate()?;
        self.detector.validate()?;
        self.size_search.validate()?;
        if !(1.0..=4.0).contains(&self.upscale_factor) {
            return Err(PipelineError::config_value_error(
                "upscale_factor",
                self.upscale_factor,
                "1.0-4.0",
            ));
        }
        if self.boundary_timeout.is_zero() {
            return Err(PipelineError::invalid_config(
                "boundary_timeout must be non-zero",
            ));
        }
        if self.max_concurrent_images == 0 || self.max_concurrent_images > 64 {
            return Err(PipelineError::config_value_error(
                "max_concurrent_images",
                self.max_concurrent_images,
                "1-64",
            ));
        }
        Ok(())
    }
}

/// Builder for [`PipelineConfig`]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
        }
    }

    #[must_use]
    pub fn enhancer(mut self, settings: EnhancerSettings) -> Self {
        self.config.enhancer = settings;
        self
    }

    #[must_use]
    pub fn detector(mut self, detector: DetectorConfig) -> Self {
        self.config.detector = detector;
        self
    }

    #[must_use]
    pub fn size_search(mut self, search: SizeSearchConfig) -> Self {
        self.config.size_search = search;
        self
    }

    #[must_use]
    pub fn cost(mut self, cost: CostModel) -> Self {
        self.config.cost = cost;
        self
    }

    #[must_use]
    pub fn upscale_factor(mut self, factor: f32) -> Self {
        self.config.upscale_factor = factor;
        self
    }

    #[must_use]
    pub fn boundary_timeout(mut self, timeout: Duration) -> Self {
        self.config.boundary_timeout = timeout;
        self
    }

    #[must_use]
    pub fn max_concurrent_images(mut self, workers: usize) -> Self {
        self.config.max_concurrent_images = workers;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidConfig` for out-of-range fields.
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for PipelineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn builder_rejects_out_of_range_upscale_factor() {
        let err = PipelineConfigBuilder::new()
            .upscale_factor(8.0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("upscale_factor"));
    }

    #[test]
    fn builder_rejects_bad_enhancer_factor() {
        let settings = EnhancerSettings {
            contrast: -0.5,
            ..EnhancerSettings::default()
        };
        let err = PipelineConfigBuilder::new()
            .enhancer(settings)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("contrast"));
    }

    #[test]
    fn builder_rejects_zero_quality() {
        let search = SizeSearchConfig {
            quality_floor: 0,
            ..SizeSearchConfig::default()
        };
        assert!(PipelineConfigBuilder::new()
            .size_search(search)
            .build()
            .is_err());
    }

    #[test]
    fn builder_chain_applies_fields() {
        let config = PipelineConfigBuilder::new()
            .upscale_factor(3.0)
            .max_concurrent_images(4)
            .boundary_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        assert!((config.upscale_factor - 3.0).abs() < f32::EPSILON);
        assert_eq!(config.max_concurrent_images, 4);
        assert_eq!(config.boundary_timeout, Duration::from_secs(5));
    }

    #[test]
    fn cost_model_estimate() {
        let cost = CostModel {
            per_image: 0.01,
            per_megabyte: 0.001,
        };
        let estimate = cost.estimate(3, 2 * 1_048_576);
        assert!((estimate - 0.032).abs() < 1e-9);
    }
}
