//! Boundary contracts consumed by the pipeline.
//!
//! The pipeline is a library; everything that crosses a process or network
//! boundary is expressed as a small capability trait with a production
//! implementation owned by the caller and in-memory stubs shipped in
//! [`stub`] for tests and offline runs.

pub mod stub;

use crate::error::Result;
use crate::types::EncodeFormat;
use async_trait::async_trait;

pub use stub::{MemorySink, PassthroughMatting, StaticImageSource};

/// Fetches source image bytes by reference.
///
/// Failures are classified as `PipelineError::Fetch` and cause the affected
/// image to be skipped with a warning, never a fatal job error.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Fetch the raw bytes behind `url`
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Pretrained background-segmentation model, consumed as an opaque
/// bytes-to-bytes operation.
///
/// A failure or timeout here is non-fatal: the pipeline proceeds without
/// background removal for that image.
#[async_trait]
pub trait MattingCapability: Send + Sync {
    /// Return `bytes` re-encoded with the background removed
    async fn remove_background(&self, bytes: &[u8]) -> Result<Vec<u8>>;
}

/// Persistent asset store / CDN that receives encoded bytes.
///
/// Called once per encoded asset; delivery failures are surfaced in the
/// job result and never retried by this crate.
#[async_trait]
pub trait AssetSink: Send + Sync {
    /// Store one encoded asset and return its public reference
    async fn store(
        &self,
        bytes: &[u8],
        product_id: &str,
        variant_name: &str,
        format: EncodeFormat,
    ) -> Result<String>;
}
