//! Whole-collection snapshot storage
//!
//! The store never persists individual records. Every mutation hands the
//! full collection to a [`SnapshotStore`], which replaces whatever it held.

use crate::{EquipmentRecord, InventoryError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Reads the last written snapshot, `None` when nothing was written yet.
    async fn read(&self) -> Result<Option<Vec<EquipmentRecord>>, InventoryError>;

    /// Replaces the stored snapshot with `records`.
    async fn write(&self, records: &[EquipmentRecord]) -> Result<(), InventoryError>;
}

/// Snapshot kept as a pretty-printed JSON array on disk.
///
/// Writes go to a sibling temporary file that is then renamed over the
/// target, so readers never observe a half-written snapshot.
#[derive(Debug, Clone)]
pub struct JsonFileSnapshot {
    path: PathBuf,
}

impl JsonFileSnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "snapshot".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotStore for JsonFileSnapshot {
    async fn read(&self) -> Result<Option<Vec<EquipmentRecord>>, InventoryError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No snapshot at {}, starting empty", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        let records: Vec<EquipmentRecord> = serde_json::from_str(&content)?;
        info!("Loaded {} records from {}", records.len(), self.path.display());
        Ok(Some(records))
    }

    async fn write(&self, records: &[EquipmentRecord]) -> Result<(), InventoryError> {
        let data = serde_json::to_vec_pretty(records)
            .map_err(|e| InventoryError::PersistenceWrite(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| InventoryError::PersistenceWrite(e.to_string()))?;
        }

        let temp = self.temp_path();
        fs::write(&temp, &data)
            .await
            .map_err(|e| InventoryError::PersistenceWrite(e.to_string()))?;
        fs::rename(&temp, &self.path)
            .await
            .map_err(|e| InventoryError::PersistenceWrite(e.to_string()))?;

        debug!("Wrote snapshot of {} records ({} bytes)", records.len(), data.len());
        Ok(())
    }
}

/// Snapshot held in memory; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemorySnapshot {
    records: Mutex<Option<Vec<EquipmentRecord>>>,
}

impl MemorySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<EquipmentRecord>) -> Self {
        Self {
            records: Mutex::new(Some(records)),
        }
    }

    pub async fn stored(&self) -> Option<Vec<EquipmentRecord>> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshot {
    async fn read(&self) -> Result<Option<Vec<EquipmentRecord>>, InventoryError> {
        Ok(self.records.lock().await.clone())
    }

    async fn write(&self, records: &[EquipmentRecord]) -> Result<(), InventoryError> {
        *self.records.lock().await = Some(records.to_vec());
        Ok(())
    }
}
