//! Photo capture sessions
//!
//! [`CapturePipeline`] owns a single capture session: a live stream from a
//! [`CameraDevice`] plus the ordered candidate frames taken from it. The
//! session moves through
//!
//! ```text
//! Idle -> Acquiring -> Streaming <-> Capturing
//!   ^         |            |
//!   +- error -+            +-> Closed -> (open) -> Acquiring
//! ```
//!
//! Device acquisition runs without holding the session lock. Every request
//! takes a generation ticket first; when an acquisition resolves after a
//! newer request (or a close) bumped the generation, its stream is stopped
//! and dropped.

use crate::camera::{CameraDevice, FacingMode, VideoStream};
use crate::resizer::encode_jpeg;
use crate::{
    CaptureConfig, Config, EquipmentStore, ImageResizer, InventoryError, Metrics,
    Photo, PhotoSizes, SizePreset,
};
use chrono::{DateTime, Utc};
use image::imageops::FilterType;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    Idle,
    Acquiring,
    Streaming,
    Capturing,
    Closed,
}

/// Read-only description of a candidate frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateView {
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub bytes: usize,
    pub used: bool,
    pub captured_at: DateTime<Utc>,
}

/// A candidate's encoded bytes with a suggested download name.
#[derive(Debug, Clone)]
pub struct ExportedPhoto {
    pub file_name: String,
    pub photo: Photo,
}

/// A used candidate that could not be resized.
#[derive(Debug, Clone)]
pub struct PhotoFailure {
    /// Candidate index in capture order
    pub position: usize,
    pub error: InventoryError,
}

/// Outcome of [`CapturePipeline::commit`].
#[derive(Debug, Clone)]
pub struct CommitReport {
    pub record_id: u64,
    pub appended: usize,
    pub failures: Vec<PhotoFailure>,
}

impl CommitReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

struct Candidate {
    photo: Photo,
    width: u32,
    height: u32,
    used: bool,
    captured_at: DateTime<Utc>,
}

impl Candidate {
    fn view(&self, index: usize) -> CandidateView {
        CandidateView {
            index,
            width: self.width,
            height: self.height,
            bytes: self.photo.len(),
            used: self.used,
            captured_at: self.captured_at,
        }
    }
}

struct Session {
    state: CaptureState,
    facing: FacingMode,
    stream: Option<Box<dyn VideoStream>>,
    candidates: Vec<Candidate>,
}

impl Session {
    fn stop_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
    }
}

/// Snapshot size for a frame of `frame` dimensions.
///
/// With only a target width (or height) the other side follows the frame
/// aspect ratio. When both are given but their ratio is more than 0.01 off
/// the frame's, the height is derived from the width. Without targets the
/// frame size is used.
pub fn snapshot_dimensions(
    frame: (u32, u32),
    target_width: Option<u32>,
    target_height: Option<u32>,
) -> (u32, u32) {
    let (frame_w, frame_h) = frame;
    if frame_w == 0 || frame_h == 0 {
        return frame;
    }
    let aspect = frame_w as f64 / frame_h as f64;

    let (width, height) = match (target_width, target_height) {
        (None, None) => return frame,
        (Some(w), None) => (w as f64, w as f64 / aspect),
        (None, Some(h)) => (h as f64 * aspect, h as f64),
        (Some(w), Some(h)) => {
            if h == 0 || ((w as f64 / h as f64) - aspect).abs() > 0.01 {
                (w as f64, w as f64 / aspect)
            } else {
                (w as f64, h as f64)
            }
        }
    };

    ((width.round() as u32).max(1), (height.round() as u32).max(1))
}

pub struct CapturePipeline {
    device: Arc<dyn CameraDevice>,
    session: Mutex<Session>,
    generation: AtomicU64,
    resizer: ImageResizer,
    photo_sizes: PhotoSizes,
    config: CaptureConfig,
    metrics: Arc<Metrics>,
}

impl CapturePipeline {
    pub fn new(device: Arc<dyn CameraDevice>, config: &Config) -> Self {
        Self {
            device,
            session: Mutex::new(Session {
                state: CaptureState::Idle,
                facing: FacingMode::default(),
                stream: None,
                candidates: Vec::new(),
            }),
            generation: AtomicU64::new(0),
            resizer: ImageResizer::new(config.resize_quality, config.max_concurrent_resizes),
            photo_sizes: config.photo_sizes.clone(),
            config: config.capture.clone(),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.resizer = self.resizer.with_metrics(metrics.clone());
        self.metrics = metrics;
        self
    }

    pub async fn state(&self) -> CaptureState {
        self.session.lock().await.state
    }

    pub async fn facing(&self) -> FacingMode {
        self.session.lock().await.facing
    }

    /// Starts streaming from the device.
    ///
    /// Does nothing while a stream is active or being acquired. Opening a
    /// closed pipeline starts a fresh session. On device failure the
    /// pipeline returns to `Idle` and `open` may simply be called again.
    pub async fn open(&self) -> Result<CaptureState, InventoryError> {
        let (ticket, facing) = {
            let mut session = self.session.lock().await;
            match session.state {
                CaptureState::Acquiring | CaptureState::Streaming | CaptureState::Capturing => {
                    return Ok(session.state);
                }
                CaptureState::Closed => session.candidates.clear(),
                CaptureState::Idle => {}
            }
            session.state = CaptureState::Acquiring;
            (self.next_ticket(), session.facing)
        };

        self.acquire(ticket, facing).await
    }

    /// Toggles between the rear and front camera.
    ///
    /// An active or pending stream is torn down and re-requested with the new
    /// facing; candidates are kept. When idle or closed only the facing used
    /// by the next `open` changes.
    pub async fn switch_camera(&self) -> Result<CaptureState, InventoryError> {
        let (ticket, facing) = {
            let mut session = self.session.lock().await;
            session.facing = session.facing.opposite();
            info!("Switching camera to {:?}", session.facing);

            match session.state {
                CaptureState::Streaming | CaptureState::Acquiring | CaptureState::Capturing => {
                    session.stop_stream();
                    session.state = CaptureState::Acquiring;
                    (self.next_ticket(), session.facing)
                }
                CaptureState::Idle | CaptureState::Closed => return Ok(session.state),
            }
        };

        self.acquire(ticket, facing).await
    }

    /// Snapshots the current frame into a new candidate.
    pub async fn capture(&self) -> Result<CandidateView, InventoryError> {
        let mut session = self.session.lock().await;
        if session.state != CaptureState::Streaming {
            return Err(InventoryError::InvalidState(format!(
                "cannot capture while {:?}",
                session.state
            )));
        }

        session.state = CaptureState::Capturing;
        let result = self.snapshot(&mut session).await;
        session.state = CaptureState::Streaming;

        match result {
            Ok(candidate) => {
                self.metrics.record_capture(true);
                let index = session.candidates.len();
                let view = candidate.view(index);
                debug!("Captured candidate {} ({}x{})", index, view.width, view.height);
                session.candidates.push(candidate);
                Ok(view)
            }
            Err(e) => {
                self.metrics.record_capture(false);
                warn!("Frame capture failed: {}", e);
                Err(e)
            }
        }
    }

    /// Marks a candidate for commit. Marking twice has no further effect.
    pub async fn mark_used(&self, index: usize) -> Result<CandidateView, InventoryError> {
        let mut session = self.session.lock().await;
        let len = session.candidates.len();
        let candidate = session
            .candidates
            .get_mut(index)
            .ok_or_else(|| InventoryError::Validation(format!("no candidate {index} (have {len})")))?;
        candidate.used = true;
        Ok(candidate.view(index))
    }

    /// Drops the most recent candidate, used or not.
    pub async fn retake(&self) -> Option<CandidateView> {
        let mut session = self.session.lock().await;
        let candidate = session.candidates.pop()?;
        let index = session.candidates.len();
        debug!("Discarded candidate {}", index);
        Some(candidate.view(index))
    }

    pub async fn candidates(&self) -> Vec<CandidateView> {
        let session = self.session.lock().await;
        session
            .candidates
            .iter()
            .enumerate()
            .map(|(index, c)| c.view(index))
            .collect()
    }

    pub async fn export_candidate(&self, index: usize) -> Result<ExportedPhoto, InventoryError> {
        let session = self.session.lock().await;
        let candidate = session
            .candidates
            .get(index)
            .ok_or_else(|| InventoryError::Validation(format!("no candidate {index}")))?;

        Ok(ExportedPhoto {
            file_name: format!("equipment-{}.jpg", candidate.captured_at.timestamp_millis()),
            photo: candidate.photo.clone(),
        })
    }

    /// Stops the stream, discards candidates and invalidates any pending
    /// acquisition.
    pub async fn close(&self) {
        let mut session = self.session.lock().await;
        self.shutdown(&mut session);
    }

    /// Resizes the used candidates and appends them to record `id`.
    ///
    /// The session is closed once the used photos are taken. Photos that fail
    /// to resize are reported individually; the others are still appended in
    /// capture order.
    pub async fn commit(
        &self,
        store: &EquipmentStore,
        id: u64,
        preset: SizePreset,
    ) -> Result<CommitReport, InventoryError> {
        if store.get(id).await.is_none() {
            return Err(InventoryError::NotFound(id));
        }

        let (positions, photos): (Vec<usize>, Vec<Photo>) = {
            let mut session = self.session.lock().await;
            let used: (Vec<usize>, Vec<Photo>) = session
                .candidates
                .iter()
                .enumerate()
                .filter(|(_, c)| c.used)
                .map(|(index, c)| (index, c.photo.clone()))
                .unzip();
            if used.0.is_empty() {
                return Err(InventoryError::Validation(
                    "no photos marked as used".to_string(),
                ));
            }
            self.shutdown(&mut session);
            used
        };

        let bbox = self.photo_sizes.bounding_box(preset);
        info!(
            "Committing {} photos to equipment {} at {}x{}",
            photos.len(),
            id,
            bbox.width,
            bbox.height
        );

        let results = self.resizer.resize_all(photos, bbox).await;
        let mut resized = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for (position, result) in positions.into_iter().zip(results) {
            match result {
                Ok(photo) => resized.push(photo),
                Err(error) => failures.push(PhotoFailure { position, error }),
            }
        }

        let appended = resized.len();
        if appended > 0 {
            store.append_photos(id, resized).await?;
        }
        self.metrics.record_commit(appended);

        if !failures.is_empty() {
            warn!("{} photos could not be processed for equipment {}", failures.len(), id);
        }
        Ok(CommitReport {
            record_id: id,
            appended,
            failures,
        })
    }

    fn next_ticket(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn shutdown(&self, session: &mut Session) {
        session.stop_stream();
        session.candidates.clear();
        session.state = CaptureState::Closed;
        self.next_ticket();
        debug!("Capture session closed");
    }

    async fn acquire(&self, ticket: u64, facing: FacingMode) -> Result<CaptureState, InventoryError> {
        debug!("Requesting {:?} camera (request {})", facing, ticket);
        let limit = self.config.device_timeout;
        let result = match timeout(limit, self.device.open(facing, self.config.ideal_resolution)).await {
            Ok(result) => result,
            Err(_) => Err(InventoryError::DeviceAccess(format!(
                "camera did not respond within {:?}",
                limit
            ))),
        };

        let mut session = self.session.lock().await;
        if self.generation.load(Ordering::SeqCst) != ticket || session.state != CaptureState::Acquiring {
            if let Ok(mut stream) = result {
                stream.stop();
            }
            debug!("Discarded stale camera request {}", ticket);
            return Ok(session.state);
        }

        match result {
            Ok(stream) => {
                info!("Camera streaming ({:?})", stream.facing());
                session.stream = Some(stream);
                session.state = CaptureState::Streaming;
                Ok(CaptureState::Streaming)
            }
            Err(e) => {
                self.metrics.record_device_failure();
                warn!("Camera unavailable: {}", e);
                session.state = CaptureState::Idle;
                Err(e)
            }
        }
    }

    async fn snapshot(&self, session: &mut Session) -> Result<Candidate, InventoryError> {
        let stream = session
            .stream
            .as_mut()
            .ok_or_else(|| InventoryError::InvalidState("no active stream".to_string()))?;
        let frame = stream.next_frame().await?;

        let source = (frame.width(), frame.height());
        let (width, height) =
            snapshot_dimensions(source, self.config.target_width, self.config.target_height);
        let quality = self.config.snapshot_quality;

        let bytes = tokio::task::spawn_blocking(move || {
            let frame = if (width, height) == source {
                frame
            } else {
                frame.resize_exact(width, height, FilterType::Triangle)
            };
            encode_jpeg(&frame, quality)
        })
        .await
        .map_err(|e| InventoryError::CaptureFailed(format!("snapshot task failed: {e}")))??;

        Ok(Candidate {
            photo: Photo::from_bytes(bytes),
            width,
            height,
            used: false,
            captured_at: Utc::now(),
        })
    }
}

impl std::fmt::Debug for CapturePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturePipeline")
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::SyntheticCamera;
    use crate::{BoundingBox, MemorySnapshot, NewEquipment};
    use std::time::Duration;

    fn config() -> Config {
        let mut config = Config::default();
        config.capture.ideal_resolution = BoundingBox::new(160, 120);
        config
    }

    fn pipeline(camera: &SyntheticCamera) -> CapturePipeline {
        CapturePipeline::new(Arc::new(camera.clone()), &config())
    }

    async fn store_with_record() -> (EquipmentStore, u64) {
        let store = EquipmentStore::open(Arc::new(MemorySnapshot::new()), Vec::new())
            .await
            .unwrap();
        let record = store
            .add(NewEquipment {
                name: "Switch Cisco".to_string(),
                location: "Olinda".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        (store, record.id)
    }

    #[test]
    fn test_snapshot_dimensions() {
        assert_eq!(snapshot_dimensions((1280, 720), None, None), (1280, 720));
        assert_eq!(snapshot_dimensions((1280, 720), Some(640), None), (640, 360));
        assert_eq!(snapshot_dimensions((1280, 720), None, Some(360)), (640, 360));
        assert_eq!(snapshot_dimensions((1280, 720), Some(640), Some(360)), (640, 360));
        // 4:3 request against a 16:9 frame follows the width
        assert_eq!(snapshot_dimensions((1280, 720), Some(640), Some(480)), (640, 360));
    }

    #[tokio::test]
    async fn test_capture_requires_stream() {
        let camera = SyntheticCamera::new();
        let pipeline = pipeline(&camera);
        let result = pipeline.capture().await;
        assert!(matches!(result, Err(InventoryError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_open_capture_commit() {
        let camera = SyntheticCamera::new();
        let pipeline = pipeline(&camera);
        let (store, id) = store_with_record().await;

        assert_eq!(pipeline.open().await.unwrap(), CaptureState::Streaming);
        for _ in 0..3 {
            pipeline.capture().await.unwrap();
        }
        pipeline.mark_used(0).await.unwrap();
        pipeline.mark_used(2).await.unwrap();
        pipeline.mark_used(2).await.unwrap();

        let report = pipeline.commit(&store, id, SizePreset::Small).await.unwrap();
        assert_eq!(report.appended, 2);
        assert!(report.is_complete());

        let record = store.get(id).await.unwrap();
        assert_eq!(record.photos.len(), 2);
        assert_eq!(pipeline.state().await, CaptureState::Closed);
        assert!(pipeline.candidates().await.is_empty());
        assert_eq!(camera.active_streams(), 0);
    }

    #[tokio::test]
    async fn test_commit_without_used_candidates() {
        let camera = SyntheticCamera::new();
        let pipeline = pipeline(&camera);
        let (store, id) = store_with_record().await;

        pipeline.open().await.unwrap();
        pipeline.capture().await.unwrap();

        let result = pipeline.commit(&store, id, SizePreset::Medium).await;
        assert!(matches!(result, Err(InventoryError::Validation(_))));
        // Session untouched
        assert_eq!(pipeline.state().await, CaptureState::Streaming);
        assert_eq!(pipeline.candidates().await.len(), 1);
    }

    #[tokio::test]
    async fn test_commit_to_missing_record() {
        let camera = SyntheticCamera::new();
        let pipeline = pipeline(&camera);
        let (store, _) = store_with_record().await;

        pipeline.open().await.unwrap();
        pipeline.capture().await.unwrap();
        pipeline.mark_used(0).await.unwrap();

        let result = pipeline.commit(&store, 42, SizePreset::Medium).await;
        assert!(matches!(result, Err(InventoryError::NotFound(42))));
    }

    #[tokio::test]
    async fn test_retake_removes_latest_only() {
        let camera = SyntheticCamera::new();
        let pipeline = pipeline(&camera);
        pipeline.open().await.unwrap();

        pipeline.capture().await.unwrap();
        pipeline.capture().await.unwrap();
        pipeline.mark_used(1).await.unwrap();

        let removed = pipeline.retake().await.unwrap();
        assert_eq!(removed.index, 1);
        assert!(removed.used);

        let remaining = pipeline.candidates().await;
        assert_eq!(remaining.len(), 1);
        assert!(!remaining[0].used);
        assert!(matches!(pipeline.mark_used(1).await, Err(InventoryError::Validation(_))));
    }

    #[tokio::test]
    async fn test_denied_device_returns_to_idle() {
        let camera = SyntheticCamera::new().denying_access();
        let pipeline = pipeline(&camera);

        let result = pipeline.open().await;
        assert!(matches!(result, Err(InventoryError::DeviceAccess(_))));
        assert_eq!(pipeline.state().await, CaptureState::Idle);
    }

    #[tokio::test]
    async fn test_device_timeout() {
        let camera = SyntheticCamera::new().with_open_delay(FacingMode::Environment, Duration::from_secs(5));
        let mut config = config();
        config.capture.device_timeout = Duration::from_millis(50);
        let pipeline = CapturePipeline::new(Arc::new(camera), &config);

        let result = pipeline.open().await;
        assert!(matches!(result, Err(InventoryError::DeviceAccess(_))));
        assert_eq!(pipeline.state().await, CaptureState::Idle);
    }

    #[tokio::test]
    async fn test_switch_camera_keeps_candidates() {
        let camera = SyntheticCamera::new();
        let pipeline = pipeline(&camera);
        pipeline.open().await.unwrap();
        pipeline.capture().await.unwrap();

        assert_eq!(pipeline.switch_camera().await.unwrap(), CaptureState::Streaming);
        assert_eq!(pipeline.facing().await, FacingMode::User);
        assert_eq!(pipeline.candidates().await.len(), 1);
        assert_eq!(camera.active_streams(), 1);
        assert_eq!(camera.open_count(), 2);
    }

    #[tokio::test]
    async fn test_switch_while_idle_only_changes_facing() {
        let camera = SyntheticCamera::new();
        let pipeline = pipeline(&camera);
        assert_eq!(pipeline.switch_camera().await.unwrap(), CaptureState::Idle);
        assert_eq!(camera.open_count(), 0);

        pipeline.open().await.unwrap();
        assert_eq!(pipeline.facing().await, FacingMode::User);
    }

    #[tokio::test]
    async fn test_stale_acquisition_is_discarded() {
        let camera = SyntheticCamera::new()
            .with_open_delay(FacingMode::Environment, Duration::from_millis(300));
        let pipeline = pipeline(&camera);

        let (first, second) = tokio::join!(pipeline.open(), async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            pipeline.switch_camera().await
        });

        // The slow rear-camera request resolved last but lost
        assert_eq!(first.unwrap(), CaptureState::Streaming);
        assert_eq!(second.unwrap(), CaptureState::Streaming);
        assert_eq!(pipeline.facing().await, FacingMode::User);
        assert_eq!(camera.open_count(), 2);
        assert_eq!(camera.active_streams(), 1);

        let view = pipeline.capture().await.unwrap();
        assert_eq!((view.width, view.height), (160, 120));
    }

    #[tokio::test]
    async fn test_close_invalidates_pending_acquisition() {
        let camera = SyntheticCamera::new()
            .with_open_delay(FacingMode::Environment, Duration::from_millis(200));
        let pipeline = pipeline(&camera);

        let (opened, _) = tokio::join!(pipeline.open(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            pipeline.close().await
        });

        assert_eq!(opened.unwrap(), CaptureState::Closed);
        assert_eq!(camera.active_streams(), 0);

        // Reopening starts a fresh session
        assert_eq!(pipeline.open().await.unwrap(), CaptureState::Streaming);
        assert!(pipeline.candidates().await.is_empty());
    }

    #[tokio::test]
    async fn test_export_candidate() {
        let camera = SyntheticCamera::new();
        let pipeline = pipeline(&camera);
        pipeline.open().await.unwrap();
        pipeline.capture().await.unwrap();

        let exported = pipeline.export_candidate(0).await.unwrap();
        assert!(exported.file_name.starts_with("equipment-"));
        assert!(exported.file_name.ends_with(".jpg"));
        assert_eq!(exported.photo.format(), Some(image::ImageFormat::Jpeg));
        assert!(pipeline.export_candidate(1).await.is_err());
    }
}
