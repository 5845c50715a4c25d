//! # Equipment Checklist
//!
//! Inventory and inspection tool for equipment spread across many sites.
//! Each record carries a status, a checked flag with its last check time,
//! notes, and an ordered list of photos taken on site. The collection can be
//! filtered, summarised and exported as a paginated PDF checklist with a
//! photo appendix.
//!
//! ## Components
//!
//! | Component | Role |
//! |-----------|------|
//! | [`CapturePipeline`] | Camera session state machine: open, capture, select, commit |
//! | [`ImageResizer`] | Aspect-preserving resize to a size preset, re-encoded as JPEG |
//! | [`EquipmentStore`] | Source of truth for records, write-through snapshots |
//! | [`ReportEngine`] | Date/location selection and page-aware flow layout |
//! | [`render_pdf`] | Turns a laid-out [`Document`] into PDF bytes |
//!
//! Data only flows one way: captured photos are resized and appended to a
//! record in the store, and reports read a point-in-time copy of the store.
//!
//! ### Capture session
//! ```text
//! Idle -> Acquiring -> Streaming <-> Capturing
//!                          |
//!                          +-> Closed (close / commit)
//! ```
//! Switching cameras while a request is pending re-requests the device; the
//! last request wins and stale streams are stopped.
//!
//! ### Photo sizes
//! | Preset | Bounding box |
//! |--------|--------------|
//! | small | 400 x 300 |
//! | **medium** (default) | 800 x 600 |
//! | large | 1200 x 900 |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use equipment_checklist::{
//!     render_pdf, CapturePipeline, Config, EquipmentStore, JsonFileSnapshot, NewEquipment,
//!     ReportEngine, ReportRequest, SizePreset, SyntheticCamera,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let snapshots = Arc::new(JsonFileSnapshot::new(&config.data_file));
//!     let store = EquipmentStore::open(snapshots, config.locations.clone()).await?;
//!
//!     let record = store
//!         .add(NewEquipment {
//!             name: "TV Samsung 55\"".into(),
//!             location: "Olinda".into(),
//!             ..Default::default()
//!         })
//!         .await?;
//!
//!     let pipeline = CapturePipeline::new(Arc::new(SyntheticCamera::new()), &config);
//!     pipeline.open().await?;
//!     let candidate = pipeline.capture().await?;
//!     pipeline.mark_used(candidate.index).await?;
//!     let outcome = pipeline.commit(&store, record.id, SizePreset::Medium).await?;
//!     println!("Attached {} photos", outcome.appended);
//!
//!     let engine = ReportEngine::new(config.report.clone());
//!     let document = engine.generate(&store.snapshot().await, &ReportRequest::default())?;
//!     let pdf = render_pdf(&document)?;
//!     println!("{}: {} bytes", document.file_name(), pdf.len());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ### Register and inspect
//! ```bash
//! checklist add --name "Switch Cisco" --type Switch --location Olinda
//! checklist list --status broken
//! checklist toggle 1704412800000
//! ```
//!
//! ### Photos and reports
//! ```bash
//! checklist capture 1704412800000 --take 3 --use 0,2 --size small
//! checklist report --from 2024-01-01 --to 2024-01-31 --output reports/
//! ```

/// Configuration and settings
pub mod config;

/// Error types and error handling utilities
pub mod error;

/// Equipment records, photos and query types
pub mod model;

/// Snapshot storage port and its JSON file / in-memory adapters
pub mod persistence;

/// In-memory equipment collection with write-through persistence
pub mod store;

/// Aspect-preserving photo resizing
pub mod resizer;

/// Camera devices and video streams
pub mod camera;

/// Capture session state machine
pub mod capture;

/// Page-aware document model and text measurement
pub mod layout;

/// Report selection and flow layout
pub mod report;

/// PDF rendering of laid-out documents
pub mod pdf;

/// Command-line interface implementation
pub mod cli;

/// Counters and timings
pub mod metrics;

/// Utility functions and helpers
pub mod utils;

#[cfg(test)]
mod tests;

pub use self::camera::*;
pub use self::capture::*;
pub use self::cli::*;
pub use self::config::*;
pub use self::error::*;
pub use self::layout::*;
pub use self::metrics::*;
pub use self::model::*;
pub use self::pdf::*;
pub use self::persistence::*;
pub use self::report::*;
pub use self::resizer::*;
pub use self::store::*;
pub use self::utils::*;
