//! In-memory equipment collection with write-through snapshots
//!
//! `EquipmentStore` is the single source of truth for records and their
//! photos. Each mutation validates first, applies in memory, then writes the
//! whole collection through the injected [`SnapshotStore`]. A failed write
//! leaves the in-memory state applied; it stays authoritative and the error
//! is handed back to the caller.

use crate::{
    iso_timestamp, EquipmentPatch, EquipmentRecord, FilterCriteria, InventoryError, Metrics,
    NewEquipment, Photo, SnapshotStore, Status, StatusCounts,
};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// A location choice offered to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationOption {
    pub name: String,
    /// Free-text location found on a record but not in the configured list
    pub other: bool,
}

pub struct EquipmentStore {
    records: RwLock<Vec<EquipmentRecord>>,
    snapshots: Arc<dyn SnapshotStore>,
    known_locations: Vec<String>,
    last_id: AtomicU64,
    metrics: Arc<Metrics>,
}

impl EquipmentStore {
    /// Loads the initial collection from `snapshots`.
    pub async fn open(
        snapshots: Arc<dyn SnapshotStore>,
        known_locations: Vec<String>,
    ) -> Result<Self, InventoryError> {
        let records = snapshots.read().await?.unwrap_or_default();
        let last_id = records.iter().map(|r| r.id).max().unwrap_or(0);
        info!("Equipment store opened with {} records", records.len());

        Ok(Self {
            records: RwLock::new(records),
            snapshots,
            known_locations,
            last_id: AtomicU64::new(last_id),
            metrics: Arc::new(Metrics::new()),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub async fn add(&self, new: NewEquipment) -> Result<EquipmentRecord, InventoryError> {
        new.validate()?;

        self.mutate(|records| {
            let now = Utc::now();
            let record = EquipmentRecord {
                id: self.next_id(now),
                name: new.name.trim().to_string(),
                kind: new.kind.trim().to_string(),
                location: new.location.trim().to_string(),
                status: new.status,
                notes: new.notes.filter(|n| !n.trim().is_empty()),
                checked: new.checked,
                last_check: Some(iso_timestamp(now)),
                photos: Vec::new(),
                user_id: new.user_id,
            };
            info!("Adding equipment {} ({})", record.id, record.name);
            records.push(record.clone());
            Ok(record)
        })
        .await
    }

    pub async fn delete(&self, id: u64) -> Result<EquipmentRecord, InventoryError> {
        self.mutate(|records| {
            let position = records
                .iter()
                .position(|r| r.id == id)
                .ok_or(InventoryError::NotFound(id))?;
            info!("Removing equipment {}", id);
            Ok(records.remove(position))
        })
        .await
    }

    /// Applies `patch`; a change of the `checked` flag stamps `lastCheck`.
    pub async fn update(
        &self,
        id: u64,
        patch: EquipmentPatch,
    ) -> Result<EquipmentRecord, InventoryError> {
        patch.validate()?;

        self.mutate(|records| {
            let record = find_mut(records, id)?;
            if let Some(name) = patch.name {
                record.name = name.trim().to_string();
            }
            if let Some(kind) = patch.kind {
                record.kind = kind.trim().to_string();
            }
            if let Some(location) = patch.location {
                record.location = location.trim().to_string();
            }
            if let Some(status) = patch.status {
                record.status = status;
            }
            if let Some(notes) = patch.notes {
                record.notes = notes.filter(|n| !n.trim().is_empty());
            }
            if let Some(checked) = patch.checked {
                if checked != record.checked {
                    record.checked = checked;
                    record.last_check = Some(iso_timestamp(Utc::now()));
                }
            }
            debug!("Updated equipment {}", id);
            Ok(record.clone())
        })
        .await
    }

    pub async fn toggle_checked(&self, id: u64) -> Result<EquipmentRecord, InventoryError> {
        self.mutate(|records| {
            let record = find_mut(records, id)?;
            record.checked = !record.checked;
            record.last_check = Some(iso_timestamp(Utc::now()));
            debug!("Equipment {} checked={}", id, record.checked);
            Ok(record.clone())
        })
        .await
    }

    /// Appends photos after the record's existing ones, keeping their order.
    pub async fn append_photos(
        &self,
        id: u64,
        photos: Vec<Photo>,
    ) -> Result<EquipmentRecord, InventoryError> {
        if photos.is_empty() {
            return Err(InventoryError::Validation("no photos to append".to_string()));
        }

        self.mutate(|records| {
            let record = find_mut(records, id)?;
            info!("Attaching {} photos to equipment {}", photos.len(), id);
            record.photos.extend(photos);
            record.last_check = Some(iso_timestamp(Utc::now()));
            Ok(record.clone())
        })
        .await
    }

    /// Removes the photo at `index`; the remaining photos keep their order.
    pub async fn remove_photo(&self, id: u64, index: usize) -> Result<Photo, InventoryError> {
        self.mutate(|records| {
            let record = find_mut(records, id)?;
            let len = record.photos.len();
            if index >= len {
                return Err(InventoryError::PhotoIndexOutOfRange { id, index, len });
            }
            debug!("Removing photo {} from equipment {}", index, id);
            Ok(record.photos.remove(index))
        })
        .await
    }

    /// Rewrites the current collection; used to retry after a failed write.
    pub async fn flush(&self) -> Result<(), InventoryError> {
        let records = self.records.read().await;
        self.persist(&records).await
    }

    pub async fn get(&self, id: u64) -> Option<EquipmentRecord> {
        self.records.read().await.iter().find(|r| r.id == id).cloned()
    }

    /// Point-in-time copy of the whole collection, in insertion order.
    pub async fn snapshot(&self) -> Vec<EquipmentRecord> {
        self.records.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Records matching `criteria`, most recently checked first.
    pub async fn filter(&self, criteria: &FilterCriteria) -> Vec<EquipmentRecord> {
        let mut matching: Vec<EquipmentRecord> = self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.matches(criteria))
            .cloned()
            .collect();
        matching.sort_by_key(|r| std::cmp::Reverse(r.recency_key()));
        matching
    }

    pub async fn aggregate(&self) -> StatusCounts {
        let records = self.records.read().await;
        let count = |status: Status| records.iter().filter(|r| r.status == status).count();

        StatusCounts {
            total: records.len(),
            functioning: count(Status::Functioning),
            maintenance: count(Status::Maintenance),
            broken: count(Status::Broken),
        }
    }

    /// Distinct non-empty equipment types, in first-seen order.
    pub async fn unique_types(&self) -> Vec<String> {
        let records = self.records.read().await;
        let mut seen = HashSet::new();
        records
            .iter()
            .map(|r| r.kind.clone())
            .filter(|kind| !kind.is_empty() && seen.insert(kind.clone()))
            .collect()
    }

    /// Configured locations, then free-text locations in use.
    pub async fn location_options(&self) -> Vec<LocationOption> {
        let records = self.records.read().await;
        let mut seen: HashSet<&str> = self.known_locations.iter().map(String::as_str).collect();

        let mut options: Vec<LocationOption> = self
            .known_locations
            .iter()
            .map(|name| LocationOption { name: name.clone(), other: false })
            .collect();

        for record in records.iter() {
            if !record.location.is_empty() && seen.insert(record.location.as_str()) {
                options.push(LocationOption { name: record.location.clone(), other: true });
            }
        }
        options
    }

    async fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut Vec<EquipmentRecord>) -> Result<T, InventoryError>,
    ) -> Result<T, InventoryError> {
        let mut records = self.records.write().await;
        let value = apply(&mut records)?;
        self.persist(&records).await?;
        Ok(value)
    }

    async fn persist(&self, records: &[EquipmentRecord]) -> Result<(), InventoryError> {
        match self.snapshots.write(records).await {
            Ok(()) => {
                self.metrics.record_snapshot_write(true);
                Ok(())
            }
            Err(e) => {
                self.metrics.record_snapshot_write(false);
                error!("Snapshot write failed, keeping in-memory state: {}", e);
                Err(match e {
                    InventoryError::PersistenceWrite(_) => e,
                    other => InventoryError::PersistenceWrite(other.to_string()),
                })
            }
        }
    }

    /// Millisecond timestamp, bumped past the previous id when the clock
    /// has not moved on.
    fn next_id(&self, now: DateTime<Utc>) -> u64 {
        let candidate = now.timestamp_millis().max(0) as u64;
        let id = candidate.max(self.last_id.load(Ordering::SeqCst) + 1);
        self.last_id.store(id, Ordering::SeqCst);
        id
    }
}

fn find_mut(records: &mut [EquipmentRecord], id: u64) -> Result<&mut EquipmentRecord, InventoryError> {
    records
        .iter_mut()
        .find(|r| r.id == id)
        .ok_or(InventoryError::NotFound(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MockSnapshotStore;
    use crate::{MemorySnapshot, Selection};

    fn new_equipment(name: &str, kind: &str, location: &str, status: Status) -> NewEquipment {
        NewEquipment {
            name: name.to_string(),
            kind: kind.to_string(),
            location: location.to_string(),
            status,
            ..Default::default()
        }
    }

    async fn store_with(records: Vec<EquipmentRecord>) -> (EquipmentStore, Arc<MemorySnapshot>) {
        let snapshot = Arc::new(MemorySnapshot::with_records(records));
        let store = EquipmentStore::open(snapshot.clone(), vec!["CV Natal".to_string()])
            .await
            .unwrap();
        (store, snapshot)
    }

    fn record(id: u64, last_check: Option<&str>, photos: usize) -> EquipmentRecord {
        EquipmentRecord {
            id,
            name: format!("Item {id}"),
            kind: "TV".to_string(),
            location: "CV Natal".to_string(),
            status: Status::Functioning,
            notes: None,
            checked: false,
            last_check: last_check.map(str::to_string),
            photos: (0..photos).map(|i| Photo::from_bytes(vec![i as u8])).collect(),
            user_id: None,
        }
    }

    #[tokio::test]
    async fn test_add_assigns_id_and_persists() {
        let (store, snapshot) = store_with(Vec::new()).await;

        let first = store.add(new_equipment("TV", "TV", "CV Natal", Status::Functioning)).await.unwrap();
        let second = store.add(new_equipment("Switch", "Switch", "CV Natal", Status::Broken)).await.unwrap();

        assert!(second.id > first.id);
        assert!(first.photos.is_empty());
        assert!(first.last_check_at().is_some());
        assert_eq!(snapshot.stored().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_add_rejects_missing_fields_without_writing() {
        let mut mock = MockSnapshotStore::new();
        mock.expect_read().returning(|| Ok(None));
        mock.expect_write().never();

        let store = EquipmentStore::open(Arc::new(mock), Vec::new()).await.unwrap();
        let result = store.add(new_equipment("", "TV", "CV Natal", Status::Functioning)).await;

        assert!(matches!(result, Err(InventoryError::Validation(_))));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_memory_state() {
        let mut mock = MockSnapshotStore::new();
        mock.expect_read().returning(|| Ok(None));
        mock.expect_write()
            .times(1)
            .returning(|_| Err(InventoryError::IoError("disk full".to_string())));

        let store = EquipmentStore::open(Arc::new(mock), Vec::new()).await.unwrap();
        let result = store.add(new_equipment("TV", "TV", "CV Natal", Status::Functioning)).await;

        assert!(matches!(result, Err(InventoryError::PersistenceWrite(_))));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_delete_unknown_id() {
        let (store, _) = store_with(vec![record(1, None, 0)]).await;
        assert!(matches!(store.delete(99).await, Err(InventoryError::NotFound(99))));
        assert_eq!(store.delete(1).await.unwrap().id, 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_remove_photo_preserves_order() {
        let (store, _) = store_with(vec![record(1, None, 5)]).await;

        let removed = store.remove_photo(1, 2).await.unwrap();
        assert_eq!(removed.as_bytes(), &[2]);

        let photos: Vec<u8> = store.get(1).await.unwrap().photos.iter().map(|p| p.as_bytes()[0]).collect();
        assert_eq!(photos, vec![0, 1, 3, 4]);

        assert!(matches!(
            store.remove_photo(1, 4).await,
            Err(InventoryError::PhotoIndexOutOfRange { index: 4, len: 4, .. })
        ));
    }

    #[tokio::test]
    async fn test_append_photos_stamps_last_check() {
        let (store, _) = store_with(vec![record(1, Some("2020-01-01T00:00:00.000Z"), 1)]).await;

        let updated = store
            .append_photos(1, vec![Photo::from_bytes(vec![7]), Photo::from_bytes(vec![8])])
            .await
            .unwrap();

        let photos: Vec<u8> = updated.photos.iter().map(|p| p.as_bytes()[0]).collect();
        assert_eq!(photos, vec![0, 7, 8]);
        assert!(updated.last_check_at().unwrap().timestamp() > 1_600_000_000);

        assert!(matches!(store.append_photos(1, Vec::new()).await, Err(InventoryError::Validation(_))));
    }

    #[tokio::test]
    async fn test_update_only_stamps_on_checked_change() {
        let original = record(1, Some("2020-01-01T00:00:00.000Z"), 0);
        let (store, _) = store_with(vec![original.clone()]).await;

        let renamed = store
            .update(1, EquipmentPatch { name: Some("Projector".to_string()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(renamed.name, "Projector");
        assert_eq!(renamed.last_check, original.last_check);

        let checked = store
            .update(1, EquipmentPatch { checked: Some(true), ..Default::default() })
            .await
            .unwrap();
        assert!(checked.checked);
        assert_ne!(checked.last_check, original.last_check);
    }

    #[tokio::test]
    async fn test_filter_default_returns_everything_most_recent_first() {
        let (store, _) = store_with(vec![
            record(1_000, Some("2024-01-03T00:00:00.000Z"), 0),
            record(2_000, None, 0),
            record(3_000, Some("2024-01-05T00:00:00.000Z"), 0),
            record(4_000, Some("garbage"), 0),
        ])
        .await;

        let ids: Vec<u64> = store.filter(&FilterCriteria::default()).await.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3_000, 1_000, 4_000, 2_000]);
    }

    #[tokio::test]
    async fn test_filter_is_subset() {
        let (store, _) = store_with(Vec::new()).await;
        store.add(new_equipment("TV Samsung", "TV", "CV Natal", Status::Functioning)).await.unwrap();
        store.add(new_equipment("Switch Cisco", "Switch", "Fábrica Raposo", Status::Maintenance)).await.unwrap();
        store.add(new_equipment("Router", "Switch", "CV Natal", Status::Broken)).await.unwrap();

        let criteria = [
            FilterCriteria::default(),
            FilterCriteria { search: "cisco".to_string(), ..Default::default() },
            FilterCriteria { kind: Selection::Only("Switch".to_string()), ..Default::default() },
            FilterCriteria { status: Selection::Only(Status::Broken), ..Default::default() },
            FilterCriteria { location: Selection::Only("Nowhere".to_string()), ..Default::default() },
        ];
        let total = store.len().await;
        let counts: Vec<usize> = {
            let mut counts = Vec::new();
            for c in &criteria {
                let found = store.filter(c).await.len();
                assert!(found <= total);
                counts.push(found);
            }
            counts
        };
        assert_eq!(counts, vec![3, 1, 2, 1, 0]);
    }

    #[tokio::test]
    async fn test_aggregate_and_options() {
        let (store, _) = store_with(Vec::new()).await;
        store.add(new_equipment("TV", "TV", "CV Natal", Status::Functioning)).await.unwrap();
        store.add(new_equipment("Switch", "Switch", "Depósito", Status::Maintenance)).await.unwrap();
        store.add(new_equipment("Router", "Switch", "CV Natal", Status::Broken)).await.unwrap();
        store.add(new_equipment("Camera", "", "CV Natal", Status::Broken)).await.unwrap();

        assert_eq!(
            store.aggregate().await,
            StatusCounts { total: 4, functioning: 1, maintenance: 1, broken: 2 }
        );
        assert_eq!(store.unique_types().await, vec!["TV".to_string(), "Switch".to_string()]);
        assert_eq!(
            store.location_options().await,
            vec![
                LocationOption { name: "CV Natal".to_string(), other: false },
                LocationOption { name: "Depósito".to_string(), other: true },
            ]
        );
    }
}
