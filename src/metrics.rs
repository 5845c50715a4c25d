use metrics::{Counter, Histogram};
use std::time::Duration;

/// Handles for the tool's counters and timings.
///
/// Every handle is a no-op until a recorder is wired in, so components can
/// record unconditionally.
pub struct Metrics {
    pub frames_captured: Counter,
    pub capture_failures: Counter,
    pub device_failures: Counter,
    pub photos_committed: Counter,
    pub resize_failures: Counter,
    pub snapshot_writes: Counter,
    pub snapshot_failures: Counter,
    pub reports_generated: Counter,
    pub report_duration: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            frames_captured: Counter::noop(),
            capture_failures: Counter::noop(),
            device_failures: Counter::noop(),
            photos_committed: Counter::noop(),
            resize_failures: Counter::noop(),
            snapshot_writes: Counter::noop(),
            snapshot_failures: Counter::noop(),
            reports_generated: Counter::noop(),
            report_duration: Histogram::noop(),
        }
    }

    pub fn record_capture(&self, success: bool) {
        if success {
            self.frames_captured.increment(1);
        } else {
            self.capture_failures.increment(1);
        }
    }

    pub fn record_device_failure(&self) {
        self.device_failures.increment(1);
    }

    pub fn record_commit(&self, photos: usize) {
        self.photos_committed.increment(photos as u64);
    }

    pub fn record_resize_failure(&self) {
        self.resize_failures.increment(1);
    }

    pub fn record_snapshot_write(&self, success: bool) {
        if success {
            self.snapshot_writes.increment(1);
        } else {
            self.snapshot_failures.increment(1);
        }
    }

    pub fn record_report(&self, duration: Duration) {
        self.reports_generated.increment(1);
        self.report_duration.record(duration.as_secs_f64());
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}
