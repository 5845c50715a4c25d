//! Aspect-preserving photo resizing
//!
//! Photos are clamped into a bounding box in two steps (width first, then
//! height) and re-encoded as JPEG at a fixed quality. Resizes run on tokio's
//! blocking pool behind a semaphore so a commit of many photos never
//! saturates the runtime.

use crate::{BoundingBox, InventoryError, Metrics, Photo};
use futures::future::join_all;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Dimensions of `(width, height)` clamped into `bbox`, aspect ratio kept.
///
/// Scales by `max_width / width` when too wide, then by
/// `max_height / height` when the result is still too tall. The second step
/// only shrinks, so the width constraint stays satisfied. Rounding happens
/// once at the end.
///
/// # Examples
/// ```
/// use equipment_checklist::{fit_within, BoundingBox};
///
/// assert_eq!(fit_within((1280, 720), BoundingBox::new(400, 300)), (400, 225));
/// assert_eq!(fit_within((720, 1280), BoundingBox::new(400, 300)), (169, 300));
/// assert_eq!(fit_within((320, 240), BoundingBox::new(400, 300)), (320, 240));
/// ```
pub fn fit_within(source: (u32, u32), bbox: BoundingBox) -> (u32, u32) {
    let (src_w, src_h) = source;
    let mut width = src_w as f64;
    let mut height = src_h as f64;
    let max_w = bbox.width as f64;
    let max_h = bbox.height as f64;

    if width > max_w {
        height *= max_w / width;
        width = max_w;
    }
    if height > max_h {
        width *= max_h / height;
        height = max_h;
    }

    let w = (width.round() as u32).clamp(1, bbox.width.max(1));
    let h = (height.round() as u32).clamp(1, bbox.height.max(1));
    (w, h)
}

/// Encodes `image` as baseline JPEG at `quality` (1-100).
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, InventoryError> {
    let rgb = image.to_rgb8();
    let mut buffer = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
        encoder
            .encode_image(&rgb)
            .map_err(|e| InventoryError::CaptureFailed(format!("JPEG encoding failed: {e}")))?;
    }
    Ok(buffer)
}

#[derive(Clone)]
pub struct ImageResizer {
    quality: u8,
    limiter: Arc<Semaphore>,
    metrics: Arc<Metrics>,
}

impl ImageResizer {
    pub fn new(quality: u8, max_concurrent: usize) -> Self {
        Self {
            quality,
            limiter: Arc::new(Semaphore::new(max_concurrent.max(1))),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Synchronous resize; decodes, scales and re-encodes on the calling thread.
    ///
    /// A JPEG source that already fits is returned untouched, which keeps
    /// repeated application with the same box a no-op.
    pub fn resize_blocking(&self, source: &Photo, bbox: BoundingBox) -> Result<Photo, InventoryError> {
        let image = image::load_from_memory(source.as_bytes())
            .map_err(|e| InventoryError::ImageDecode(e.to_string()))?;

        let source_dims = (image.width(), image.height());
        let (width, height) = fit_within(source_dims, bbox);

        if (width, height) == source_dims && source.format() == Some(ImageFormat::Jpeg) {
            debug!("Photo already fits {}x{}, keeping original encoding", bbox.width, bbox.height);
            return Ok(source.clone());
        }

        let scaled = if (width, height) == source_dims {
            image
        } else {
            image.resize_exact(width, height, FilterType::Triangle)
        };

        debug!(
            "Resized photo {}x{} -> {}x{}",
            source_dims.0, source_dims.1, width, height
        );
        encode_jpeg(&scaled, self.quality).map(Photo::from_bytes)
    }

    pub async fn resize(&self, source: Photo, bbox: BoundingBox) -> Result<Photo, InventoryError> {
        let _permit = self.limiter.acquire().await?;
        let resizer = self.clone();

        let result = tokio::task::spawn_blocking(move || resizer.resize_blocking(&source, bbox))
            .await
            .map_err(|e| InventoryError::ImageDecode(format!("resize task failed: {e}")))?;

        if let Err(e) = &result {
            warn!("Photo resize failed: {}", e);
            self.metrics.record_resize_failure();
        }
        result
    }

    /// Resizes every photo concurrently. Results line up with the input
    /// order; each entry fails or succeeds on its own.
    pub async fn resize_all(
        &self,
        photos: Vec<Photo>,
        bbox: BoundingBox,
    ) -> Vec<Result<Photo, InventoryError>> {
        join_all(photos.into_iter().map(|photo| self.resize(photo, bbox))).await
    }
}
