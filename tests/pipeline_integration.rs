//! End-to-end pipeline runs against the in-memory capability stubs.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use imagery_pipeline::{
    AssetSink, EncodeFormat, EnhancementJob, EnhancementPipeline, ImageSource, JobStatus,
    MattingCapability, MemorySink, OperationKind, PassthroughMatting, PipelineConfig,
    PipelineError, ProcessingStage, Result, StaticImageSource, WatermarkAnchor, WatermarkConfig,
};

fn product_photo(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (40 + x * 7 % 180) as u8,
            (60 + y * 3 % 160) as u8,
            (30 + (x + y) % 200) as u8,
        ])
    });
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn pipeline(source: StaticImageSource) -> (EnhancementPipeline, Arc<MemorySink>) {
    init_tracing();
    let sink = Arc::new(MemorySink::new());
    let pipeline = EnhancementPipeline::new(
        PipelineConfig::default(),
        Arc::new(source),
        Arc::new(PassthroughMatting),
        sink.clone(),
    )
    .unwrap();
    (pipeline, sink)
}

fn base_job() -> EnhancementJob {
    EnhancementJob {
        product_id: "sku-900".to_string(),
        source_urls: vec!["supplier://sku-900/a.png".to_string()],
        operations: vec![OperationKind::QualityEnhancement],
        variants: BTreeMap::from([
            ("thumbnail".to_string(), (150, 150)),
            ("main".to_string(), (400, 300)),
        ]),
        formats: vec![EncodeFormat::Jpeg, EncodeFormat::WebP],
        size_budgets_kb: BTreeMap::new(),
        watermark: None,
    }
}

#[tokio::test]
async fn mixed_fetch_results_complete_with_warnings() {
    let source = StaticImageSource::new()
        .with_image("supplier://sku-900/a.png", product_photo(320, 240))
        .with_image("supplier://sku-900/b.png", product_photo(300, 300));
    let (pipeline, sink) = pipeline(source);

    let mut job = base_job();
    job.source_urls = vec![
        "supplier://sku-900/a.png".to_string(),
        "supplier://sku-900/gone.png".to_string(),
        "supplier://sku-900/b.png".to_string(),
    ];

    let result = pipeline.process_job(&job).await.unwrap();
    assert_eq!(result.status, JobStatus::CompletedWithWarnings);
    assert_eq!(result.stats.images_attempted, 3);
    assert_eq!(result.stats.images_succeeded, 2);
    assert_eq!(result.stats.warnings.len(), 1);
    assert_eq!(result.stats.warnings[0].stage, ProcessingStage::Fetch);
    assert_eq!(
        result.stats.warnings[0].source_url,
        "supplier://sku-900/gone.png"
    );

    // 2 images x 2 variants x 2 formats
    let total_assets: usize = result.variants.values().map(Vec::len).sum();
    assert_eq!(total_assets, 8);
    assert_eq!(sink.stored().len(), 8);
}

#[tokio::test]
async fn all_sources_unreachable_fails_without_assets() {
    let (pipeline, sink) = pipeline(StaticImageSource::new());
    let mut job = base_job();
    job.source_urls = vec!["supplier://a".to_string(), "supplier://b".to_string()];

    let result = pipeline.process_job(&job).await.unwrap();
    assert_eq!(result.status, JobStatus::Failed);
    assert_eq!(result.stats.images_succeeded, 0);
    assert_eq!(result.stats.warnings.len(), 2);
    assert!(result.variants.is_empty());
    assert!(sink.stored().is_empty());
}

#[tokio::test]
async fn requested_operations_are_applied_in_canonical_order() {
    let source =
        StaticImageSource::new().with_image("supplier://sku-900/a.png", product_photo(240, 240));
    let (pipeline, _) = pipeline(source);

    let mut job = base_job();
    // Deliberately reversed request order
    job.operations = vec![
        OperationKind::Watermark,
        OperationKind::QualityEnhancement,
        OperationKind::ColorCorrection,
        OperationKind::BrandingRemoval,
    ];
    job.watermark = Some(WatermarkConfig {
        text: "example.shop".to_string(),
        anchor: WatermarkAnchor::BottomRight,
        opacity: 0.5,
        font_px: 16,
        color: [255, 255, 255, 255],
    });

    let result = pipeline.process_job(&job).await.unwrap();
    assert_eq!(result.status, JobStatus::Completed);
    let asset = &result.variants["main"][0];
    assert_eq!(
        asset.enhancements_applied,
        vec![
            OperationKind::BrandingRemoval,
            OperationKind::ColorCorrection,
            OperationKind::QualityEnhancement,
            OperationKind::Watermark,
        ]
    );
}

struct BrokenMatting;

#[async_trait]
impl MattingCapability for BrokenMatting {
    async fn remove_background(&self, _bytes: &[u8]) -> Result<Vec<u8>> {
        Err(PipelineError::operation(
            "background-removal",
            "model unavailable",
        ))
    }
}

#[tokio::test]
async fn failing_matting_degrades_to_warning() {
    let source =
        StaticImageSource::new().with_image("supplier://sku-900/a.png", product_photo(200, 200));
    let sink = Arc::new(MemorySink::new());
    let pipeline = EnhancementPipeline::new(
        PipelineConfig::default(),
        Arc::new(source),
        Arc::new(BrokenMatting),
        sink.clone(),
    )
    .unwrap();

    let mut job = base_job();
    job.operations = vec![
        OperationKind::BackgroundRemoval,
        OperationKind::QualityEnhancement,
    ];

    let result = pipeline.process_job(&job).await.unwrap();
    assert_eq!(result.status, JobStatus::CompletedWithWarnings);
    assert_eq!(result.stats.images_succeeded, 1);
    assert!(result.stats.warnings[0]
        .message
        .contains("background-removal skipped"));
    // The skipped operation never appears in the applied list
    let asset = &result.variants["main"][0];
    assert_eq!(
        asset.enhancements_applied,
        vec![OperationKind::QualityEnhancement]
    );
    assert!(!sink.stored().is_empty());
}

struct RefusingSink;

#[async_trait]
impl AssetSink for RefusingSink {
    async fn store(
        &self,
        _bytes: &[u8],
        _product_id: &str,
        _variant_name: &str,
        _format: EncodeFormat,
    ) -> Result<String> {
        Err(PipelineError::delivery("bucket rejected upload"))
    }
}

#[tokio::test]
async fn delivery_failure_keeps_asset_without_url() {
    let source =
        StaticImageSource::new().with_image("supplier://sku-900/a.png", product_photo(200, 200));
    let pipeline = EnhancementPipeline::new(
        PipelineConfig::default(),
        Arc::new(source),
        Arc::new(PassthroughMatting),
        Arc::new(RefusingSink),
    )
    .unwrap();

    let result = pipeline.process_job(&base_job()).await.unwrap();
    assert_eq!(result.status, JobStatus::CompletedWithWarnings);
    assert_eq!(result.stats.images_succeeded, 1);
    for assets in result.variants.values() {
        for asset in assets {
            assert!(asset.delivered_url.is_none());
        }
    }
    assert!(result
        .stats
        .warnings
        .iter()
        .all(|w| w.stage == ProcessingStage::Deliver));
}

#[tokio::test]
async fn size_budget_bounds_encode_attempts() {
    let source =
        StaticImageSource::new().with_image("supplier://sku-900/a.png", product_photo(512, 512));
    let (pipeline, _) = pipeline(source);

    let mut job = base_job();
    job.formats = vec![EncodeFormat::Jpeg, EncodeFormat::WebP, EncodeFormat::Png];
    job.size_budgets_kb = BTreeMap::from([
        (EncodeFormat::Jpeg, 1),
        (EncodeFormat::WebP, 1),
        (EncodeFormat::Png, 1),
    ]);

    let result = pipeline.process_job(&job).await.unwrap();
    assert_eq!(result.stats.images_succeeded, 1);
    for assets in result.variants.values() {
        for asset in assets {
            assert!(asset.encode_attempts >= 1);
            assert!(
                asset.encode_attempts <= 13,
                "{} attempts for {}/{}",
                asset.encode_attempts,
                asset.variant,
                asset.format
            );
            assert!(asset.byte_size > 0);
        }
    }
}

#[tokio::test]
async fn watermarked_variants_keep_exact_dimensions() {
    let source =
        StaticImageSource::new().with_image("supplier://sku-900/a.png", product_photo(640, 480));
    let (pipeline, sink) = pipeline(source);

    let mut job = base_job();
    job.operations = vec![OperationKind::Watermark];
    job.watermark = Some(WatermarkConfig {
        text: "example.shop".to_string(),
        anchor: WatermarkAnchor::BottomRight,
        opacity: 0.5,
        font_px: 16,
        color: [255, 255, 255, 255],
    });
    job.formats = vec![EncodeFormat::Png];

    let result = pipeline.process_job(&job).await.unwrap();
    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(sink.stored().len(), 2);
    for (name, assets) in &result.variants {
        let expected = job.variants[name];
        for asset in assets {
            assert_eq!((asset.width, asset.height), expected);
        }
    }
}

#[tokio::test]
async fn job_parsed_from_json_round_trips_through_the_pipeline() {
    let job: EnhancementJob = serde_json::from_str(
        r#"{
            "product_id": "sku-42",
            "source_urls": ["supplier://sku-42/front.png"],
            "operations": ["color-correction", "quality-enhancement"],
            "variants": {"main": [320, 240]},
            "formats": ["jpeg"],
            "size_budgets_kb": {"jpeg": 500}
        }"#,
    )
    .unwrap();
    assert_eq!(job.watermark, None);

    let source =
        StaticImageSource::new().with_image("supplier://sku-42/front.png", product_photo(320, 240));
    let (pipeline, _) = pipeline(source);
    let result = pipeline.process_job(&job).await.unwrap();
    assert_eq!(result.status, JobStatus::Completed);

    let serialized = serde_json::to_value(&result).unwrap();
    assert_eq!(serialized["status"], "completed");
    assert_eq!(serialized["job_id"], "sku-42");
}

#[tokio::test]
async fn convenience_entry_point_runs_a_job() {
    let source =
        StaticImageSource::new().with_image("supplier://sku-900/a.png", product_photo(128, 128));
    let sink = Arc::new(MemorySink::new());
    let result = imagery_pipeline::process_job(
        &base_job(),
        Arc::new(source),
        Arc::new(PassthroughMatting),
        sink.clone(),
    )
    .await
    .unwrap();
    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(sink.stored().len(), 4);
}
