//! Image enhancement pipeline for republishing third-party product photos.
//!
//! The crate takes raw supplier imagery and produces web-ready renditions:
//! detected branding is inpainted away, an optional matting capability
//! strips the background, colors and sharpness are corrected, variants are
//! cut to exact aspect ratios, and outputs are encoded under per-format
//! size budgets before an optional watermark marks them as yours.
//!
//! # Example
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use imagery_pipeline::{
//!     EncodeFormat, EnhancementJob, EnhancementPipeline, MemorySink, OperationKind,
//!     PassthroughMatting, PipelineConfig, StaticImageSource,
//! };
//!
//! # async fn run() -> anyhow::Result<()> {
//! let source = StaticImageSource::new()
//!     .with_image("supplier://cam-123/front.png", std::fs::read("front.png")?);
//! let pipeline = EnhancementPipeline::new(
//!     PipelineConfig::default(),
//!     Arc::new(source),
//!     Arc::new(PassthroughMatting),
//!     Arc::new(MemorySink::new()),
//! )?;
//!
//! let job = EnhancementJob {
//!     product_id: "cam-123".into(),
//!     source_urls: vec!["supplier://cam-123/front.png".into()],
//!     operations: vec![
//!         OperationKind::BrandingRemoval,
//!         OperationKind::QualityEnhancement,
//!     ],
//!     variants: BTreeMap::from([("main".into(), (800, 800))]),
//!     formats: vec![EncodeFormat::WebP],
//!     size_budgets_kb: BTreeMap::from([(EncodeFormat::WebP, 200)]),
//!     watermark: None,
//! };
//! let result = pipeline.process_job(&job).await?;
//! println!("{:?}", result.status);
//! # Ok(())
//! # }
//! ```

pub mod capabilities;
pub mod config;
pub mod detector;
pub mod enhancer;
pub mod error;
pub mod optimizer;
pub mod pipeline;
pub mod types;
pub mod watermarker;

mod util;

pub use capabilities::{
    AssetSink, ImageSource, MattingCapability, MemorySink, PassthroughMatting, StaticImageSource,
};
pub use config::{
    CostModel, DetectorConfig, EnhancerSettings, PipelineConfig, PipelineConfigBuilder,
    SizeSearchConfig,
};
pub use detector::BrandingDetector;
pub use enhancer::QualityEnhancer;
pub use error::{PipelineError, Result};
pub use optimizer::{EncodeStats, Optimizer};
pub use pipeline::EnhancementPipeline;
pub use types::{
    DetectedRegion, EncodeFormat, EncodedAsset, EnhancementJob, ImageWarning, JobStats, JobStatus,
    OperationKind, PipelineResult, ProcessingStage, RegionKind, VariantSpec, WatermarkAnchor,
    WatermarkConfig,
};
pub use watermarker::Watermarker;

use std::sync::Arc;

/// Run one job with default configuration and the given capabilities.
///
/// Convenience for callers that do not need to hold a pipeline between
/// jobs.
///
/// # Errors
///
/// Returns `PipelineError::InvalidConfig` when the job is malformed;
/// per-image failures are reported through the result's status and
/// warnings instead.
pub async fn process_job(
    job: &EnhancementJob,
    source: Arc<dyn ImageSource>,
    matting: Arc<dyn MattingCapability>,
    sink: Arc<dyn AssetSink>,
) -> Result<PipelineResult> {
    EnhancementPipeline::new(PipelineConfig::default(), source, matting, sink)?
        .process_job(job)
        .await
}
