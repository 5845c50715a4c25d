//! Configuration management with serde serialization/deserialization
//!
//! This module provides all configuration structures for the checklist tool,
//! including photo size presets, capture device settings and report page
//! geometry.

use crate::InventoryError;
use chrono::{FixedOffset, Local, Offset};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Locations offered by default when recording equipment.
///
/// Records may still carry any free-text location; those show up as
/// "other" locations next to this list.
pub const DEFAULT_LOCATIONS: &[&str] = &[
    "Fábrica Jaboatão",
    "Fábrica Raposo",
    "Fábrica Mogi das Cruzes",
    "Fábrica Rio de Janeiro",
    "Fábrica Jaguariúna",
    "Fábrica Osasco",
    "Fábrica Juiz de Fora",
    "Fábrica Pouso Alegre",
    "QSR Jaguaré",
    "Fábrica Inhaúma",
    "Fábrica Gravataí",
    "CV João Pessoa",
    "CV Igarassu",
    "CV Natal",
    "CV Guarulhos",
    "CV Santo André",
    "CV Sorocaba",
    "CV São Pedro da Aldeia",
    "CV Campo Grande",
    "CV São Gonçalo",
    "CV Mega Rio",
    "CV Caruaru",
    "CV Brasília",
    "CV Anhanguera",
];

/// Main configuration structure for the checklist tool
///
/// # Examples
///
/// ```rust
/// use equipment_checklist::{Config, SizePreset};
///
/// let config = Config {
///     default_photo_size: SizePreset::Large,
///     ..Default::default()
/// };
/// assert_eq!(config.photo_sizes.bounding_box(config.default_photo_size).width, 1200);
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Snapshot file holding the whole equipment collection (default: equipments.json)
    pub data_file: PathBuf,

    /// Predefined equipment locations
    pub locations: Vec<String>,

    /// Bounding boxes for the small/medium/large photo presets
    pub photo_sizes: PhotoSizes,

    /// Preset applied when committing captured photos (default: medium)
    pub default_photo_size: SizePreset,

    /// JPEG quality used when re-encoding resized photos (default: 70)
    pub resize_quality: u8,

    /// Upper bound on photos resized in parallel (default: CPU count)
    pub max_concurrent_resizes: usize,

    /// Camera and frame snapshot settings
    pub capture: CaptureConfig,

    /// Report title, naming and page layout
    pub report: ReportConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("equipments.json"),
            locations: DEFAULT_LOCATIONS.iter().map(|l| l.to_string()).collect(),
            photo_sizes: PhotoSizes::default(),
            default_photo_size: SizePreset::Medium,
            resize_quality: 70,
            max_concurrent_resizes: num_cpus::get(),
            capture: CaptureConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

/// Maximum width/height pair constraining a resized image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct BoundingBox {
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Named photo sizes the user picks from before committing a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SizePreset {
    Small,
    Medium,
    Large,
}

impl Default for SizePreset {
    fn default() -> Self {
        Self::Medium
    }
}

impl FromStr for SizePreset {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "small" => Ok(SizePreset::Small),
            "medium" => Ok(SizePreset::Medium),
            "large" => Ok(SizePreset::Large),
            other => Err(InventoryError::ConfigurationError(format!(
                "unknown photo size '{other}' (expected small, medium or large)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PhotoSizes {
    pub small: BoundingBox,
    pub medium: BoundingBox,
    pub large: BoundingBox,
}

impl PhotoSizes {
    pub fn bounding_box(&self, preset: SizePreset) -> BoundingBox {
        match preset {
            SizePreset::Small => self.small,
            SizePreset::Medium => self.medium,
            SizePreset::Large => self.large,
        }
    }
}

impl Default for PhotoSizes {
    fn default() -> Self {
        Self {
            small: BoundingBox::new(400, 300),
            medium: BoundingBox::new(800, 600),
            large: BoundingBox::new(1200, 900),
        }
    }
}

/// Camera acquisition and frame snapshot settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Resolution requested from the device (default: 1280x720)
    pub ideal_resolution: BoundingBox,

    /// JPEG quality of captured candidate frames (default: 80)
    pub snapshot_quality: u8,

    /// Snapshot width; when only one of width/height is set the other
    /// follows the frame aspect ratio
    pub target_width: Option<u32>,

    /// Snapshot height
    pub target_height: Option<u32>,

    /// How long to wait for the device before giving up (default: 10 seconds)
    pub device_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            ideal_resolution: BoundingBox::new(1280, 720),
            snapshot_quality: 80,
            target_width: None,
            target_height: None,
            device_timeout: Duration::from_secs(10),
        }
    }
}

/// Report naming and layout settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Title printed at the top of the first page (default: CHECK LIST)
    pub title: String,

    /// File name prefix, followed by `_YYYYMMDD_HHMM` (default: CHECK LIST)
    pub file_prefix: String,

    /// Offset used for day bounds and printed timestamps.
    ///
    /// When unset the host's current local offset is used.
    pub utc_offset_minutes: Option<i32>,

    pub page: PageGeometry,
}

impl ReportConfig {
    pub fn offset(&self) -> FixedOffset {
        self.utc_offset_minutes
            .and_then(|minutes| minutes.checked_mul(60))
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Local::now().offset().fix())
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            title: "CHECK LIST".to_string(),
            file_prefix: "CHECK LIST".to_string(),
            utc_offset_minutes: None,
            page: PageGeometry::default(),
        }
    }
}

/// Page geometry for the report, in millimetres (A4 portrait by default)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PageGeometry {
    pub width: f64,
    pub height: f64,
    pub margin_left: f64,
    pub margin_right: f64,
    pub margin_bottom: f64,
    /// Where content resumes on pages after the first
    pub continuation_top: f64,
    /// Baseline of the title on the first page
    pub title_y: f64,
    /// Side of the square photo cell in the appendix
    pub photo_cell: f64,
    /// Gap between photo cells, horizontally and vertically
    pub photo_spacing: f64,
}

impl PageGeometry {
    pub fn content_width(&self) -> f64 {
        self.width - self.margin_left - self.margin_right
    }

    /// Lowest y coordinate content may reach
    pub fn content_bottom(&self) -> f64 {
        self.height - self.margin_bottom
    }

    /// Photos that fit on one appendix row
    pub fn photos_per_row(&self) -> usize {
        let per_row = (self.content_width() / (self.photo_cell + self.photo_spacing)).floor();
        (per_row as usize).max(1)
    }
}

impl Default for PageGeometry {
    fn default() -> Self {
        Self {
            width: 210.0,
            height: 297.0,
            margin_left: 15.0,
            margin_right: 15.0,
            margin_bottom: 10.0,
            continuation_top: 20.0,
            title_y: 30.0,
            photo_cell: 40.0,
            photo_spacing: 5.0,
        }
    }
}

pub fn validate_config(config: &Config) -> Result<(), InventoryError> {
    let invalid = |msg: &str| Err(InventoryError::ConfigurationError(msg.to_string()));

    for (name, bbox) in [
        ("small", config.photo_sizes.small),
        ("medium", config.photo_sizes.medium),
        ("large", config.photo_sizes.large),
    ] {
        if bbox.width == 0 || bbox.height == 0 {
            return Err(InventoryError::ConfigurationError(format!(
                "photo size '{name}' must have non-zero dimensions"
            )));
        }
    }

    if config.resize_quality == 0 || config.resize_quality > 100 {
        return invalid("Resize quality must be between 1 and 100");
    }

    if config.capture.snapshot_quality == 0 || config.capture.snapshot_quality > 100 {
        return invalid("Snapshot quality must be between 1 and 100");
    }

    if config.max_concurrent_resizes == 0 {
        return invalid("Max concurrent resizes must be greater than 0");
    }

    if config.capture.device_timeout.is_zero() {
        return invalid("Device timeout must be greater than 0");
    }

    if config.capture.target_width == Some(0) || config.capture.target_height == Some(0) {
        return invalid("Capture target dimensions must be greater than 0");
    }

    let page = &config.report.page;
    if page.content_width() < page.photo_cell {
        return invalid("Page content width must hold at least one photo cell");
    }

    if page.content_bottom() <= page.continuation_top + page.photo_cell {
        return invalid("Page height must hold at least one row of photos");
    }

    if let Some(minutes) = config.report.utc_offset_minutes {
        if minutes.checked_mul(60).and_then(FixedOffset::east_opt).is_none() {
            return invalid("UTC offset is out of range");
        }
    }

    Ok(())
}
