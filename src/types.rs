//! Data model exchanged with the external scheduler: jobs going in,
//! per-image artifacts produced along the way, and the aggregated result
//! handed back when a job completes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Enhancement operation kinds a job may request.
///
/// The order operations appear in a request is advisory only; the
/// orchestrator always applies them in [`OperationKind::CANONICAL_ORDER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    /// Detect and inpaint third-party branding/watermarks
    BrandingRemoval,
    /// Isolate the product from its background (delegated capability)
    BackgroundRemoval,
    /// Histogram-based color correction
    ColorCorrection,
    /// High-quality upscaling
    Upscale,
    /// Sharpening/contrast/brightness/saturation pass
    QualityEnhancement,
    /// Stamp the pipeline's own output-side watermark
    Watermark,
}

impl OperationKind {
    /// Canonical application order: structural corrections before cosmetic
    /// ones, and the output watermark last so later steps cannot blur or
    /// crop it out.
    pub const CANONICAL_ORDER: [OperationKind; 6] = [
        OperationKind::BrandingRemoval,
        OperationKind::BackgroundRemoval,
        OperationKind::ColorCorrection,
        OperationKind::Upscale,
        OperationKind::QualityEnhancement,
        OperationKind::Watermark,
    ];

    /// Reorder a requested operation set into canonical order, dropping
    /// duplicates.
    #[must_use]
    pub fn canonicalize(requested: &[OperationKind]) -> Vec<OperationKind> {
        Self::CANONICAL_ORDER
            .iter()
            .copied()
            .filter(|op| requested.contains(op))
            .collect()
    }

    /// Stable name used in logs and error messages
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BrandingRemoval => "branding-removal",
            Self::BackgroundRemoval => "background-removal",
            Self::ColorCorrection => "color-correction",
            Self::Upscale => "upscale",
            Self::QualityEnhancement => "quality-enhancement",
            Self::Watermark => "watermark",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output encoding formats
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EncodeFormat {
    /// Moderate-quality lossy baseline
    Jpeg,
    /// Higher-quality modern lossy format
    WebP,
    /// Lossless with best-effort compression
    Png,
}

impl EncodeFormat {
    /// File extension without the dot
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::WebP => "webp",
            Self::Png => "png",
        }
    }

    /// Whether the format can carry an alpha channel
    #[must_use]
    pub fn supports_transparency(self) -> bool {
        match self {
            Self::Png | Self::WebP => true,
            Self::Jpeg => false,
        }
    }
}

impl std::fmt::Display for EncodeFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Anchor positions for the output-side watermark stamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WatermarkAnchor {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Center,
}

impl Default for WatermarkAnchor {
    fn default() -> Self {
        Self::BottomRight
    }
}

/// Configuration for the pipeline's own watermark stamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatermarkConfig {
    /// Text to render
    pub text: String,
    /// Placement anchor (four corners or center)
    pub anchor: WatermarkAnchor,
    /// Stamp opacity in `[0.0, 1.0]`
    pub opacity: f32,
    /// Glyph height in pixels (rounded down to a multiple of 8)
    pub font_px: u32,
    /// RGBA text color
    pub color: [u8; 4],
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            text: String::new(),
            anchor: WatermarkAnchor::default(),
            opacity: 0.5,
            font_px: 24,
            color: [255, 255, 255, 255],
        }
    }
}

/// A job handed to the pipeline by the external scheduler.
///
/// Immutable once accepted; the pipeline never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancementJob {
    /// Product identifier, echoed into the result and the asset sink
    pub product_id: String,
    /// Ordered source image references
    pub source_urls: Vec<String>,
    /// Requested enhancement operations (order advisory)
    pub operations: Vec<OperationKind>,
    /// Variant name to target (width, height) in pixels
    pub variants: BTreeMap<String, (u32, u32)>,
    /// Requested output formats per variant
    pub formats: Vec<EncodeFormat>,
    /// Optional per-format size budgets in kilobytes
    #[serde(default)]
    pub size_budgets_kb: BTreeMap<EncodeFormat, u32>,
    /// Output-side watermark configuration, required when
    /// [`OperationKind::Watermark`] is requested
    #[serde(default)]
    pub watermark: Option<WatermarkConfig>,
}

impl EnhancementJob {
    /// Materialize the variant map into specs
    #[must_use]
    pub fn variant_specs(&self) -> Vec<VariantSpec> {
        self.variants
            .iter()
            .map(|(name, &(width, height))| VariantSpec {
                name: name.clone(),
                width,
                height,
            })
            .collect()
    }
}

/// A resized rendition target for one display context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantSpec {
    /// Variant name (e.g. "thumbnail", "mobile", "main")
    pub name: String,
    /// Target width in pixels
    pub width: u32,
    /// Target height in pixels
    pub height: u32,
}

impl VariantSpec {
    /// Target aspect ratio, width over height
    #[must_use]
    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

/// Classification of a detected branding region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegionKind {
    /// High-contrast text or logo mark
    TextLogo,
    /// Low-contrast repeated overlay, typically in a corner
    WatermarkPattern,
}

/// A candidate branding region in source-image pixel space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedRegion {
    /// Left edge of the bounding box
    pub x: u32,
    /// Top edge of the bounding box
    pub y: u32,
    /// Bounding box width
    pub width: u32,
    /// Bounding box height
    pub height: u32,
    /// Detector confidence in `[0.0, 1.0]`
    pub confidence: f32,
    /// Heuristic classification
    pub kind: RegionKind,
}

impl DetectedRegion {
    /// Bounding box area in pixels
    #[must_use]
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Stage of the per-image state machine, used to classify warnings.
///
/// Images advance `Fetch -> Decode -> Enhance -> Variant -> Encode ->
/// Deliver`; a failure exits into a recorded warning at the stage it
/// occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStage {
    Fetch,
    Decode,
    Enhance,
    Variant,
    Encode,
    Deliver,
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Fetch => "fetch",
            Self::Decode => "decode",
            Self::Enhance => "enhance",
            Self::Variant => "variant",
            Self::Encode => "encode",
            Self::Deliver => "deliver",
        };
        f.write_str(s)
    }
}

/// A non-fatal problem recorded while processing one source image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageWarning {
    /// Source reference the warning applies to
    pub source_url: String,
    /// Stage at which the problem occurred
    pub stage: ProcessingStage,
    /// Human-readable description
    pub message: String,
}

/// One encoded variant/format rendition of a processed source image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedAsset {
    /// Variant name this asset belongs to
    pub variant: String,
    /// Encoding format
    pub format: EncodeFormat,
    /// Final pixel width after any size-search downscaling
    pub width: u32,
    /// Final pixel height after any size-search downscaling
    pub height: u32,
    /// Encoded byte size
    pub byte_size: u64,
    /// Operations actually applied to the source, in canonical order
    pub enhancements_applied: Vec<OperationKind>,
    /// Number of encode attempts the size search performed
    pub encode_attempts: u32,
    /// Coarse 0-100 quality score, for reporting only
    pub quality_score: u8,
    /// Reference returned by the asset sink, absent when delivery failed
    pub delivered_url: Option<String>,
}

/// Overall outcome of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Every image produced assets without warnings
    Completed,
    /// At least one image succeeded, but warnings were recorded
    CompletedWithWarnings,
    /// No image produced a single encoded asset
    Failed,
}

/// Aggregate statistics for a finished job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStats {
    /// Number of source images the job listed
    pub images_attempted: usize,
    /// Number of images that produced at least one encoded asset
    pub images_succeeded: usize,
    /// Per-image warnings accumulated along the way
    pub warnings: Vec<ImageWarning>,
    /// Sum of fetched source byte sizes
    pub total_original_bytes: u64,
    /// Sum of encoded asset byte sizes
    pub total_encoded_bytes: u64,
    /// `(1 - encoded/original) * 100`; negative when variants outgrow sources
    pub size_reduction_pct: f32,
    /// Mean of all asset quality scores
    pub average_quality_score: f32,
    /// Wall-clock duration of the job in milliseconds
    pub duration_ms: u64,
    /// Estimated cost from the configured cost model
    pub estimated_cost: f64,
}

impl Default for JobStats {
    fn default() -> Self {
        Self {
            images_attempted: 0,
            images_succeeded: 0,
            warnings: Vec::new(),
            total_original_bytes: 0,
            total_encoded_bytes: 0,
            size_reduction_pct: 0.0,
            average_quality_score: 0.0,
            duration_ms: 0,
            estimated_cost: 0.0,
        }
    }
}

/// Result handed back to the caller once a job finishes.
///
/// Created once per job and populated incrementally as images complete;
/// persistence is the caller's responsibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Product identifier echoed from the job
    pub job_id: String,
    /// Source references echoed from the job
    pub source_urls: Vec<String>,
    /// Variant name to the assets encoded for it
    pub variants: BTreeMap<String, Vec<EncodedAsset>>,
    /// Aggregate statistics
    pub stats: JobStats,
    /// Overall job outcome
    pub status: JobStatus,
}
