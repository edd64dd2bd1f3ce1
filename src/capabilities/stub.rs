//! In-memory capability implementations for tests and offline runs

use super::{AssetSink, ImageSource, MattingCapability};
use crate::error::{PipelineError, Result};
use crate::types::EncodeFormat;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Image source backed by a static in-memory map of URL to bytes
#[derive(Debug, Default)]
pub struct StaticImageSource {
    images: HashMap<String, Vec<u8>>,
}

impl StaticImageSource {
    /// Create an empty source; every fetch will fail
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register bytes behind a URL
    #[must_use]
    pub fn with_image<S: Into<String>>(mut self, url: S, bytes: Vec<u8>) -> Self {
        self.images.insert(url.into(), bytes);
        self
    }
}

#[async_trait]
impl ImageSource for StaticImageSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.images
            .get(url)
            .cloned()
            .ok_or_else(|| PipelineError::fetch(format!("unknown source '{}'", url)))
    }
}

/// Matting stub that returns its input unchanged
#[derive(Debug, Default)]
pub struct PassthroughMatting;

#[async_trait]
impl MattingCapability for PassthroughMatting {
    async fn remove_background(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// One asset recorded by [`MemorySink`]
#[derive(Debug, Clone)]
pub struct StoredAsset {
    /// Product the asset belongs to
    pub product_id: String,
    /// Variant name
    pub variant_name: String,
    /// Encoding format
    pub format: EncodeFormat,
    /// Encoded byte size
    pub byte_size: usize,
    /// Reference handed back to the pipeline
    pub url: String,
}

/// Asset sink that records deliveries in memory and hands back
/// `memory://` references
#[derive(Debug, Default)]
pub struct MemorySink {
    stored: Mutex<Vec<StoredAsset>>,
}

impl MemorySink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything stored so far
    pub fn stored(&self) -> Vec<StoredAsset> {
        self.stored.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AssetSink for MemorySink {
    async fn store(
        &self,
        bytes: &[u8],
        product_id: &str,
        variant_name: &str,
        format: EncodeFormat,
    ) -> Result<String> {
        let url = format!(
            "memory://{}/{}.{}",
            product_id,
            variant_name,
            format.extension()
        );
        let asset = StoredAsset {
            product_id: product_id.to_string(),
            variant_name: variant_name.to_string(),
            format,
            byte_size: bytes.len(),
            url: url.clone(),
        };
        self.stored
            .lock()
            .map_err(|_| PipelineError::internal("memory sink poisoned"))?
            .push(asset);
        Ok(url)
    }
}
