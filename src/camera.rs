//! Video capture devices
//!
//! A [`CameraDevice`] hands out [`VideoStream`]s for a facing mode. Two
//! devices ship with the crate: a synthetic test-pattern camera and a
//! camera that replays image files from a folder.

use crate::{BoundingBox, InventoryError};
use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

/// Which way the camera points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Front camera, facing the operator
    User,
    /// Rear camera, facing the equipment (default)
    Environment,
}

impl FacingMode {
    pub fn opposite(self) -> Self {
        match self {
            FacingMode::User => FacingMode::Environment,
            FacingMode::Environment => FacingMode::User,
        }
    }
}

impl Default for FacingMode {
    fn default() -> Self {
        Self::Environment
    }
}

#[async_trait]
pub trait CameraDevice: Send + Sync {
    /// Requests access to the camera facing `facing`, asking for roughly
    /// `ideal` resolution.
    async fn open(
        &self,
        facing: FacingMode,
        ideal: BoundingBox,
    ) -> Result<Box<dyn VideoStream>, InventoryError>;
}

#[async_trait]
pub trait VideoStream: Send {
    fn facing(&self) -> FacingMode;

    /// The current frame.
    async fn next_frame(&mut self) -> Result<DynamicImage, InventoryError>;

    /// Releases the device. Further frames fail.
    fn stop(&mut self);
}

/// Camera that renders a gradient test pattern.
///
/// Each frame differs from the previous one, and the two facing modes use
/// different tints. Access denial and per-facing acquisition latency can be
/// configured, which makes it useful for exercising capture sessions.
#[derive(Debug, Clone, Default)]
pub struct SyntheticCamera {
    resolution: Option<BoundingBox>,
    user_delay: Duration,
    environment_delay: Duration,
    deny_access: bool,
    opened: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
}

impl SyntheticCamera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame size; defaults to the requested ideal resolution
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.resolution = Some(BoundingBox::new(width, height));
        self
    }

    pub fn with_open_delay(mut self, facing: FacingMode, delay: Duration) -> Self {
        match facing {
            FacingMode::User => self.user_delay = delay,
            FacingMode::Environment => self.environment_delay = delay,
        }
        self
    }

    pub fn denying_access(mut self) -> Self {
        self.deny_access = true;
        self
    }

    /// Streams opened so far
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Streams opened and not yet stopped
    pub fn active_streams(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CameraDevice for SyntheticCamera {
    async fn open(
        &self,
        facing: FacingMode,
        ideal: BoundingBox,
    ) -> Result<Box<dyn VideoStream>, InventoryError> {
        let delay = match facing {
            FacingMode::User => self.user_delay,
            FacingMode::Environment => self.environment_delay,
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.deny_access {
            return Err(InventoryError::DeviceAccess("permission denied".to_string()));
        }

        let resolution = self.resolution.unwrap_or(ideal);
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_add(1, Ordering::SeqCst);
        debug!("Synthetic camera opened ({:?}, {}x{})", facing, resolution.width, resolution.height);

        Ok(Box::new(SyntheticStream {
            facing,
            resolution,
            sequence: 0,
            active: self.active.clone(),
            stopped: false,
        }))
    }
}

struct SyntheticStream {
    facing: FacingMode,
    resolution: BoundingBox,
    sequence: u32,
    active: Arc<AtomicUsize>,
    stopped: bool,
}

#[async_trait]
impl VideoStream for SyntheticStream {
    fn facing(&self) -> FacingMode {
        self.facing
    }

    async fn next_frame(&mut self) -> Result<DynamicImage, InventoryError> {
        if self.stopped {
            return Err(InventoryError::CaptureFailed("stream stopped".to_string()));
        }

        let BoundingBox { width, height } = self.resolution;
        let tint = match self.facing {
            FacingMode::User => 200u8,
            FacingMode::Environment => 40u8,
        };
        let step = (self.sequence.wrapping_mul(37) % 256) as u8;
        self.sequence = self.sequence.wrapping_add(1);

        let frame = RgbImage::from_fn(width, height, |x, y| {
            Rgb([
                (x * 255 / width.max(1)) as u8,
                (y * 255 / height.max(1)) as u8,
                tint.wrapping_add(step),
            ])
        });
        Ok(DynamicImage::ImageRgb8(frame))
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Camera that replays the image files of a folder, in name order, looping.
#[derive(Debug, Clone)]
pub struct ImageFolderCamera {
    dir: PathBuf,
}

const FRAME_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp"];

impl ImageFolderCamera {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn list_frames(&self) -> Result<Vec<PathBuf>, InventoryError> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| InventoryError::DeviceAccess(format!("{}: {e}", self.dir.display())))?;

        let mut frames = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| InventoryError::DeviceAccess(e.to_string()))?
        {
            let path = entry.path();
            let is_frame = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false);
            if is_frame {
                frames.push(path);
            }
        }
        frames.sort();
        Ok(frames)
    }
}

#[async_trait]
impl CameraDevice for ImageFolderCamera {
    async fn open(
        &self,
        facing: FacingMode,
        _ideal: BoundingBox,
    ) -> Result<Box<dyn VideoStream>, InventoryError> {
        let frames = self.list_frames().await?;
        if frames.is_empty() {
            return Err(InventoryError::DeviceAccess(format!(
                "no image files in {}",
                self.dir.display()
            )));
        }

        info!("Replaying {} frames from {}", frames.len(), self.dir.display());
        Ok(Box::new(FolderStream {
            facing,
            frames,
            position: 0,
            stopped: false,
        }))
    }
}

struct FolderStream {
    facing: FacingMode,
    frames: Vec<PathBuf>,
    position: usize,
    stopped: bool,
}

#[async_trait]
impl VideoStream for FolderStream {
    fn facing(&self) -> FacingMode {
        self.facing
    }

    async fn next_frame(&mut self) -> Result<DynamicImage, InventoryError> {
        if self.stopped {
            return Err(InventoryError::CaptureFailed("stream stopped".to_string()));
        }

        let path = &self.frames[self.position % self.frames.len()];
        self.position += 1;

        let bytes = fs::read(path)
            .await
            .map_err(|e| InventoryError::CaptureFailed(format!("{}: {e}", path.display())))?;
        image::load_from_memory(&bytes)
            .map_err(|e| InventoryError::CaptureFailed(format!("{}: {e}", path.display())))
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}
