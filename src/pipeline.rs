//! Job orchestration.
//!
//! [`EnhancementPipeline`] drives a full enhancement job: fetch each
//! source image, run the requested operations in canonical order, cut the
//! configured variants, encode them under their size budgets, and hand
//! the results to the asset sink. Failures are isolated at three levels:
//! a failing operation is skipped with a warning, a failing encode drops
//! only that rendition, and a failing image never takes down the job.
//! External calls (fetch, matting, delivery) each run under the
//! configured boundary timeout, and cancellation is honoured between
//! images.

use crate::capabilities::{AssetSink, ImageSource, MattingCapability};
use crate::config::PipelineConfig;
use crate::detector::BrandingDetector;
use crate::enhancer::QualityEnhancer;
use crate::error::{PipelineError, Result};
use crate::optimizer::Optimizer;
use crate::types::{
    EncodedAsset, EnhancementJob, ImageWarning, JobStats, JobStatus, OperationKind,
    PipelineResult, ProcessingStage, VariantSpec,
};
use crate::watermarker::Watermarker;
use futures::stream::{self, StreamExt};
use image::DynamicImage;
use instant::Instant;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Orchestrates enhancement jobs over pluggable source, matting, and sink
/// capabilities
pub struct EnhancementPipeline {
    config: PipelineConfig,
    source: Arc<dyn ImageSource>,
    matting: Arc<dyn MattingCapability>,
    sink: Arc<dyn AssetSink>,
    detector: BrandingDetector,
    enhancer: QualityEnhancer,
    optimizer: Optimizer,
}

/// Everything one source image produced, success or not
struct ImageOutcome {
    warnings: Vec<ImageWarning>,
    assets: Vec<EncodedAsset>,
    original_bytes: u64,
    succeeded: bool,
}

impl ImageOutcome {
    fn failed(url: &str, stage: ProcessingStage, message: String) -> Self {
        Self {
            warnings: vec![ImageWarning {
                source_url: url.to_string(),
                stage,
                message,
            }],
            assets: Vec::new(),
            original_bytes: 0,
            succeeded: false,
        }
    }
}

/// Per-image state carried through the blocking processing passes
struct ProcessedImage {
    image: DynamicImage,
    applied: Vec<OperationKind>,
    warnings: Vec<ImageWarning>,
}

impl EnhancementPipeline {
    /// Build a pipeline from a validated configuration and its three
    /// external capabilities.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidConfig` when the configuration fails
    /// validation.
    pub fn new(
        config: PipelineConfig,
        source: Arc<dyn ImageSource>,
        matting: Arc<dyn MattingCapability>,
        sink: Arc<dyn AssetSink>,
    ) -> Result<Self> {
        config.validate()?;
        let detector = BrandingDetector::new(config.detector.clone());
        let enhancer = QualityEnhancer::new(config.enhancer.clone());
        let optimizer = Optimizer::new(config.size_search.clone());
        Ok(Self {
            config,
            source,
            matting,
            sink,
            detector,
            enhancer,
            optimizer,
        })
    }

    /// Run a job to completion.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidConfig` when the job itself is
    /// malformed (no sources, no variants, no formats, or a watermark
    /// operation without watermark settings). Per-image and per-operation
    /// failures never surface as errors; they land in the result's
    /// warnings and status.
    pub async fn process_job(&self, job: &EnhancementJob) -> Result<PipelineResult> {
        self.process_job_with_cancellation(job, &CancellationToken::new())
            .await
    }

    /// Run a job, stopping at the next image boundary once `cancel` fires.
    ///
    /// Images not yet started when cancellation is observed are reported
    /// as failed with a warning; images already finished keep their
    /// assets.
    ///
    /// # Errors
    ///
    /// Same contract as [`process_job`](Self::process_job).
    #[instrument(skip_all, fields(job_id = %job.product_id, images = job.source_urls.len()))]
    pub async fn process_job_with_cancellation(
        &self,
        job: &EnhancementJob,
        cancel: &CancellationToken,
    ) -> Result<PipelineResult> {
        validate_job(job)?;
        let started = Instant::now();
        let operations = OperationKind::canonicalize(&job.operations);
        let specs = job.variant_specs();
        let watermarker = match (&job.watermark, operations.contains(&OperationKind::Watermark)) {
            (Some(cfg), true) => Some(Watermarker::new(cfg.clone())?),
            _ => None,
        };

        info!(operations = ?operations, variants = specs.len(), "starting enhancement job");

        let outcomes: Vec<ImageOutcome> = stream::iter(job.source_urls.iter())
            .map(|url| self.process_image(url, job, &operations, &specs, &watermarker, cancel))
            .buffered(self.config.max_concurrent_images)
            .collect()
            .await;

        Ok(self.assemble_result(job, outcomes, started.elapsed()))
    }

    async fn process_image(
        &self,
        url: &str,
        job: &EnhancementJob,
        operations: &[OperationKind],
        specs: &[VariantSpec],
        watermarker: &Option<Watermarker>,
        cancel: &CancellationToken,
    ) -> ImageOutcome {
        if cancel.is_cancelled() {
            return ImageOutcome::failed(
                url,
                ProcessingStage::Fetch,
                "job cancelled before this image was processed".to_string(),
            );
        }
        let image_started = Instant::now();

        let bytes = match self.fetch_with_timeout(url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(url, error = %e, "source fetch failed");
                return ImageOutcome::failed(url, ProcessingStage::Fetch, e.to_string());
            }
        };
        let original_bytes = bytes.len() as u64;

        let decoded = match run_blocking(move || {
            image::load_from_memory(&bytes)
                .map_err(|e| PipelineError::decode(format!("image decode failed: {}", e)))
        })
        .await
        {
            Ok(image) => image,
            Err(e) => {
                warn!(url, error = %e, "source decode failed");
                return ImageOutcome::failed(url, ProcessingStage::Decode, e.to_string());
            }
        };

        // Branding removal runs before matting so detected marks cannot
        // leak into the matted subject
        let mut state = match self.pre_matting_pass(url, decoded, operations).await {
            Ok(state) => state,
            Err(e) => {
                warn!(url, error = %e, "branding pass aborted");
                return ImageOutcome::failed(url, ProcessingStage::Enhance, e.to_string());
            }
        };

        if operations.contains(&OperationKind::BackgroundRemoval) {
            match self.run_matting(&state.image).await {
                Ok(matted) => {
                    state.image = matted;
                    state.applied.push(OperationKind::BackgroundRemoval);
                }
                Err(e) => {
                    warn!(url, error = %e, "matting failed, continuing without");
                    state.warnings.push(ImageWarning {
                        source_url: url.to_string(),
                        stage: ProcessingStage::Enhance,
                        message: format!("background-removal skipped: {}", e),
                    });
                }
            }
        }

        let encoded = match self
            .finishing_pass(url, state, operations, specs, job, watermarker)
            .await
        {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(url, error = %e, "finishing pass aborted");
                return ImageOutcome::failed(url, ProcessingStage::Enhance, e.to_string());
            }
        };

        let mut outcome = ImageOutcome {
            warnings: encoded.warnings,
            assets: Vec::with_capacity(encoded.pending.len()),
            original_bytes,
            succeeded: false,
        };
        for (mut asset, bytes) in encoded.pending {
            match self.deliver_with_timeout(&bytes, job, &asset).await {
                Ok(delivered_url) => asset.delivered_url = Some(delivered_url),
                Err(e) => {
                    warn!(url, variant = %asset.variant, error = %e, "delivery failed");
                    outcome.warnings.push(ImageWarning {
                        source_url: url.to_string(),
                        stage: ProcessingStage::Deliver,
                        message: format!(
                            "delivery of {}/{} failed: {}",
                            asset.variant, asset.format, e
                        ),
                    });
                }
            }
            outcome.assets.push(asset);
        }
        outcome.succeeded = !outcome.assets.is_empty();
        debug!(
            url,
            assets = outcome.assets.len(),
            elapsed_ms = image_started.elapsed().as_millis() as u64,
            "image processed"
        );
        outcome
    }

    /// Branding detection and removal on the decoded source
    async fn pre_matting_pass(
        &self,
        url: &str,
        image: DynamicImage,
        operations: &[OperationKind],
    ) -> Result<ProcessedImage> {
        if !operations.contains(&OperationKind::BrandingRemoval) {
            return Ok(ProcessedImage {
                image,
                applied: Vec::new(),
                warnings: Vec::new(),
            });
        }
        let detector = self.detector.clone();
        let url = url.to_string();
        run_blocking(move || {
            let regions = detector.detect(&image);
            match detector.remove(&image, &regions) {
                Ok(cleaned) => Ok(ProcessedImage {
                    image: cleaned,
                    applied: vec![OperationKind::BrandingRemoval],
                    warnings: Vec::new(),
                }),
                Err(e) => Ok(ProcessedImage {
                    image,
                    applied: Vec::new(),
                    warnings: vec![ImageWarning {
                        source_url: url,
                        stage: ProcessingStage::Enhance,
                        message: format!("branding-removal skipped: {}", e),
                    }],
                }),
            }
        })
        .await
    }

    /// Matting crosses the async boundary on PNG bytes so the capability
    /// stays codec-agnostic
    async fn run_matting(&self, image: &DynamicImage) -> Result<DynamicImage> {
        let input = {
            let image = image.clone();
            run_blocking(move || {
                let mut buf = Vec::new();
                image
                    .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
                    .map_err(|e| PipelineError::encoding(format!("png encode failed: {}", e)))?;
                Ok(buf)
            })
            .await?
        };
        let output = timeout(self.config.boundary_timeout, self.matting.remove_background(&input))
            .await
            .map_err(|_| timeout_error("matting", self.config.boundary_timeout))??;
        run_blocking(move || {
            image::load_from_memory(&output)
                .map_err(|e| PipelineError::decode(format!("matting output decode failed: {}", e)))
        })
        .await
    }

    /// Remaining enhancement operations, variant cuts, watermarking, and
    /// size-targeted encoding, all in one blocking pass
    async fn finishing_pass(
        &self,
        url: &str,
        state: ProcessedImage,
        operations: &[OperationKind],
        specs: &[VariantSpec],
        job: &EnhancementJob,
        watermarker: &Option<Watermarker>,
    ) -> Result<EncodedImage> {
        let enhancer = self.enhancer.clone();
        let optimizer = self.optimizer.clone();
        let watermarker = watermarker.clone();
        let upscale_factor = self.config.upscale_factor;
        let operations = operations.to_vec();
        let specs = specs.to_vec();
        let formats = job.formats.clone();
        let budgets = job.size_budgets_kb.clone();
        let url = url.to_string();

        run_blocking(move || {
            let ProcessedImage {
                mut image,
                mut applied,
                mut warnings,
            } = state;

            if operations.contains(&OperationKind::ColorCorrection) {
                image = enhancer.correct_colors(&image);
                applied.push(OperationKind::ColorCorrection);
            }
            if operations.contains(&OperationKind::Upscale) {
                match enhancer.upscale(&image, upscale_factor) {
                    Ok(upscaled) => {
                        image = upscaled;
                        applied.push(OperationKind::Upscale);
                    }
                    Err(e) => warnings.push(ImageWarning {
                        source_url: url.clone(),
                        stage: ProcessingStage::Enhance,
                        message: format!("upscale skipped: {}", e),
                    }),
                }
            }
            if operations.contains(&OperationKind::QualityEnhancement) {
                image = enhancer.enhance_quality(&image);
                applied.push(OperationKind::QualityEnhancement);
            }

            let mut variants = match optimizer.create_variants(&image, &specs) {
                Ok(v) => v,
                Err(e) => {
                    warnings.push(ImageWarning {
                        source_url: url.clone(),
                        stage: ProcessingStage::Variant,
                        message: format!("variant generation failed: {}", e),
                    });
                    // No renditions; the image is reported as failed upstream
                    return Ok(EncodedImage {
                        pending: Vec::new(),
                        warnings,
                    });
                }
            };
            if let Some(stamper) = &watermarker {
                for variant in variants.values_mut() {
                    *variant = stamper.apply(variant);
                }
                applied.push(OperationKind::Watermark);
            }
            let applied = OperationKind::canonicalize(&applied);

            let mut pending = Vec::new();
            for (name, variant) in &variants {
                for format in &formats {
                    let budget = budgets.get(format).copied();
                    match optimizer.optimize_for_web(variant, *format, budget) {
                        Ok((bytes, stats)) => {
                            pending.push((
                                EncodedAsset {
                                    variant: name.clone(),
                                    format: *format,
                                    width: stats.width,
                                    height: stats.height,
                                    byte_size: stats.byte_size,
                                    enhancements_applied: applied.clone(),
                                    encode_attempts: stats.attempts,
                                    quality_score: stats.quality_score,
                                    delivered_url: None,
                                },
                                bytes,
                            ));
                        }
                        Err(e) => warnings.push(ImageWarning {
                            source_url: url.clone(),
                            stage: ProcessingStage::Encode,
                            message: format!("encode of {}/{} failed: {}", name, format, e),
                        }),
                    }
                }
            }
            Ok(EncodedImage { pending, warnings })
        })
        .await
    }

    async fn fetch_with_timeout(&self, url: &str) -> Result<Vec<u8>> {
        timeout(self.config.boundary_timeout, self.source.fetch(url))
            .await
            .map_err(|_| timeout_error("fetch", self.config.boundary_timeout))?
    }

    async fn deliver_with_timeout(
        &self,
        bytes: &[u8],
        job: &EnhancementJob,
        asset: &EncodedAsset,
    ) -> Result<String> {
        timeout(
            self.config.boundary_timeout,
            self.sink
                .store(bytes, &job.product_id, &asset.variant, asset.format),
        )
        .await
        .map_err(|_| timeout_error("deliver", self.config.boundary_timeout))?
    }

    fn assemble_result(
        &self,
        job: &EnhancementJob,
        outcomes: Vec<ImageOutcome>,
        elapsed: Duration,
    ) -> PipelineResult {
        let mut variants: BTreeMap<String, Vec<EncodedAsset>> = BTreeMap::new();
        let mut stats = JobStats {
            images_attempted: job.source_urls.len(),
            ..JobStats::default()
        };
        let mut score_sum = 0.0_f32;
        let mut score_count = 0u32;

        for outcome in outcomes {
            stats.warnings.extend(outcome.warnings);
            stats.total_original_bytes += outcome.original_bytes;
            if outcome.succeeded {
                stats.images_succeeded += 1;
            }
            for asset in outcome.assets {
                stats.total_encoded_bytes += asset.byte_size;
                score_sum += f32::from(asset.quality_score);
                score_count += 1;
                variants.entry(asset.variant.clone()).or_default().push(asset);
            }
        }

        if stats.total_original_bytes > 0 {
            stats.size_reduction_pct = (1.0
                - stats.total_encoded_bytes as f32 / stats.total_original_bytes as f32)
                * 100.0;
        }
        if score_count > 0 {
            stats.average_quality_score = score_sum / score_count as f32;
        }
        stats.duration_ms = elapsed.as_millis() as u64;
        stats.estimated_cost = self
            .config
            .cost
            .estimate(stats.images_succeeded, stats.total_encoded_bytes);

        let status = if stats.images_succeeded == 0 {
            JobStatus::Failed
        } else if stats.warnings.is_empty() {
            JobStatus::Completed
        } else {
            JobStatus::CompletedWithWarnings
        };

        info!(
            status = ?status,
            succeeded = stats.images_succeeded,
            warnings = stats.warnings.len(),
            duration_ms = stats.duration_ms,
            "job finished"
        );

        PipelineResult {
            job_id: job.product_id.clone(),
            source_urls: job.source_urls.clone(),
            variants,
            stats,
            status,
        }
    }
}

/// Encoded renditions awaiting delivery
struct EncodedImage {
    pending: Vec<(EncodedAsset, Vec<u8>)>,
    warnings: Vec<ImageWarning>,
}

fn validate_job(job: &EnhancementJob) -> Result<()> {
    if job.product_id.trim().is_empty() {
        return Err(PipelineError::invalid_config("job has no product_id"));
    }
    if job.source_urls.is_empty() {
        return Err(PipelineError::invalid_config("job has no source images"));
    }
    if job.variants.is_empty() {
        return Err(PipelineError::invalid_config("job has no variants"));
    }
    if job.formats.is_empty() {
        return Err(PipelineError::invalid_config("job has no output formats"));
    }
    if job.operations.contains(&OperationKind::Watermark) && job.watermark.is_none() {
        return Err(PipelineError::invalid_config(
            "watermark operation requested without watermark settings",
        ));
    }
    Ok(())
}

fn timeout_error(boundary: &str, limit: Duration) -> PipelineError {
    PipelineError::boundary_timeout(boundary, limit.as_secs())
}

/// CPU-bound image work stays off the async runtime
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PipelineError::internal(format!("blocking task panicked: {}", e)))?
}
