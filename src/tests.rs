#[cfg(test)]
mod integration_tests {
    use crate::{
        render_pdf, CapturePipeline, CaptureState, Config, Element, EquipmentStore,
        FilterCriteria, InventoryError, JsonFileSnapshot, MemorySnapshot, NewEquipment, Photo,
        ReportConfig, ReportEngine, ReportRequest, SizePreset, SnapshotStore, Status,
        SyntheticCamera, BoundingBox,
    };
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::sync::Arc;
    use std::time::Duration;

    fn config() -> Config {
        let mut config = Config::default();
        config.capture.ideal_resolution = BoundingBox::new(640, 480);
        config.report.utc_offset_minutes = Some(0);
        config
    }

    fn new_equipment(name: &str, location: &str) -> NewEquipment {
        NewEquipment {
            name: name.to_string(),
            kind: "TV".to_string(),
            location: location.to_string(),
            ..Default::default()
        }
    }

    async fn memory_store() -> EquipmentStore {
        EquipmentStore::open(Arc::new(MemorySnapshot::new()), Config::default().locations)
            .await
            .unwrap()
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.resize_quality, 70);
        assert_eq!(config.default_photo_size, SizePreset::Medium);
        assert_eq!(config.photo_sizes.bounding_box(SizePreset::Small), BoundingBox::new(400, 300));
        assert_eq!(config.capture.ideal_resolution, BoundingBox::new(1280, 720));
        assert_eq!(config.capture.snapshot_quality, 80);
        assert_eq!(config.report.title, "CHECK LIST");
        assert!(config.max_concurrent_resizes >= 1);
    }

    #[test]
    fn test_ids_are_strictly_increasing() {
        tokio_test::block_on(async {
            let store = memory_store().await;
            let mut last = 0;
            for i in 0..20 {
                let record = store.add(new_equipment(&format!("Item {i}"), "Olinda")).await.unwrap();
                assert!(record.id > last);
                last = record.id;
            }
        });
    }

    #[tokio::test]
    async fn test_toggle_only_touches_the_toggled_record() {
        let store = memory_store().await;
        let first = store
            .add(NewEquipment {
                status: Status::Maintenance,
                notes: Some("Fan noisy".to_string()),
                user_id: Some("tech-7".to_string()),
                ..new_equipment("TV Sala", "Olinda")
            })
            .await
            .unwrap();
        let second = store.add(new_equipment("TV Recepção", "Olinda")).await.unwrap();
        store
            .append_photos(first.id, vec![Photo::from_bytes(vec![0xFF, 0xD8, 0x01])])
            .await
            .unwrap();
        let original = store.get(first.id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let before = Utc::now();
        let toggled = store.toggle_checked(first.id).await.unwrap();

        assert_eq!(toggled.checked, !original.checked);
        assert!(toggled.last_check_at().unwrap() >= before - chrono::Duration::milliseconds(1));
        assert_eq!(toggled.id, original.id);
        assert_eq!(toggled.name, original.name);
        assert_eq!(toggled.kind, original.kind);
        assert_eq!(toggled.location, original.location);
        assert_eq!(toggled.status, original.status);
        assert_eq!(toggled.notes, original.notes);
        assert_eq!(toggled.photos, original.photos);
        assert_eq!(toggled.user_id, original.user_id);
        assert_eq!(store.get(second.id).await.unwrap(), second);

        // Toggled record now sorts first
        let ordered = store.filter(&FilterCriteria::default()).await;
        assert_eq!(ordered[0].id, first.id);
    }

    #[tokio::test]
    async fn test_capture_commit_report_flow() {
        let config = config();
        let store = memory_store().await;
        let record = store.add(new_equipment("Rack Principal", "Fábrica Jaboatão")).await.unwrap();
        let other = store.add(new_equipment("Switch", "Olinda")).await.unwrap();

        let camera = SyntheticCamera::new();
        let pipeline = CapturePipeline::new(Arc::new(camera.clone()), &config);
        pipeline.open().await.unwrap();
        for _ in 0..5 {
            pipeline.capture().await.unwrap();
        }
        for index in [0, 1, 3, 4] {
            pipeline.mark_used(index).await.unwrap();
        }

        let outcome = pipeline.commit(&store, record.id, SizePreset::Small).await.unwrap();
        assert_eq!(outcome.appended, 4);
        assert!(outcome.is_complete());
        assert_eq!(pipeline.state().await, CaptureState::Closed);
        assert_eq!(camera.active_streams(), 0);

        let stored = store.get(record.id).await.unwrap();
        for photo in &stored.photos {
            let decoded = image::load_from_memory(photo.as_bytes()).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (400, 300));
        }

        let engine = ReportEngine::new(config.report.clone());
        let request = ReportRequest {
            location: "Fábrica Jaboatão".parse().unwrap(),
            ..ReportRequest::default()
        };
        let document = engine.generate(&store.snapshot().await, &request).unwrap();
        assert_eq!(document.record_ids, vec![record.id]);
        assert!(!document.record_ids.contains(&other.id));
        assert_eq!(
            document
                .photo_cells()
                .filter(|(_, e)| matches!(e, Element::Photo { .. }))
                .count(),
            4
        );

        let pdf = render_pdf(&document).unwrap();
        assert!(pdf.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("equipments.json");
        let config = config();

        let (id, photos) = {
            let store = EquipmentStore::open(Arc::new(JsonFileSnapshot::new(&path)), Vec::new())
                .await
                .unwrap();
            let record = store.add(new_equipment("Câmera Portaria", "Olinda")).await.unwrap();

            let pipeline = CapturePipeline::new(Arc::new(SyntheticCamera::new()), &config);
            pipeline.open().await.unwrap();
            pipeline.capture().await.unwrap();
            pipeline.mark_used(0).await.unwrap();
            pipeline.commit(&store, record.id, SizePreset::Medium).await.unwrap();

            let stored = store.get(record.id).await.unwrap();
            (stored.id, stored.photos)
        };

        let reopened = EquipmentStore::open(Arc::new(JsonFileSnapshot::new(&path)), Vec::new())
            .await
            .unwrap();
        let record = reopened.get(id).await.unwrap();
        assert_eq!(record.name, "Câmera Portaria");
        assert_eq!(record.photos, photos);
    }

    #[tokio::test]
    async fn test_legacy_snapshot_loads_and_reports() {
        let snapshot = r#"[
            {
                "id": 1704412800000,
                "name": "Nobreak SMS",
                "type": "Nobreak",
                "location": "Olinda",
                "status": "defeito",
                "checked": true,
                "lastCheck": "2024-01-05T12:00:00.000Z",
                "photos": null
            },
            {
                "id": 1704240000000,
                "name": "Roteador",
                "location": "Recife",
                "status": "manutencao",
                "checked": false,
                "lastCheck": "not a date"
            }
        ]"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("equipments.json");
        std::fs::write(&path, snapshot).unwrap();

        let store = EquipmentStore::open(Arc::new(JsonFileSnapshot::new(&path)), Vec::new())
            .await
            .unwrap();
        let counts = store.aggregate().await;
        assert_eq!((counts.total, counts.broken, counts.maintenance), (2, 1, 1));

        let engine = ReportEngine::new(ReportConfig {
            utc_offset_minutes: Some(0),
            ..ReportConfig::default()
        });
        let records = store.snapshot().await;
        let now = Utc.with_ymd_and_hms(2024, 1, 20, 8, 0, 0).unwrap();

        let all = engine.generate_at(&records, &ReportRequest::default(), now).unwrap();
        assert_eq!(all.table_row_count(), 2);

        let january = ReportRequest {
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 10),
            ..ReportRequest::default()
        };
        let bounded = engine.generate_at(&records, &january, now).unwrap();
        assert_eq!(bounded.record_ids, vec![1704412800000]);
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_record_untouched() {
        let config = config();
        let store = memory_store().await;
        let record = store.add(new_equipment("TV", "Olinda")).await.unwrap();

        let pipeline = CapturePipeline::new(Arc::new(SyntheticCamera::new()), &config);
        pipeline.open().await.unwrap();
        pipeline.capture().await.unwrap();

        let result = pipeline.commit(&store, record.id, SizePreset::Large).await;
        assert!(matches!(result, Err(InventoryError::Validation(_))));
        assert!(store.get(record.id).await.unwrap().photos.is_empty());
        assert_eq!(store.get(record.id).await.unwrap().last_check, record.last_check);
    }

    #[tokio::test]
    async fn test_remove_photo_through_store() {
        let snapshots = Arc::new(MemorySnapshot::new());
        let store = EquipmentStore::open(snapshots.clone(), Vec::new()).await.unwrap();
        let record = store.add(new_equipment("TV", "Olinda")).await.unwrap();

        let photos: Vec<Photo> = (0u8..3).map(|i| Photo::from_bytes(vec![0xFF, 0xD8, i])).collect();
        store.append_photos(record.id, photos.clone()).await.unwrap();
        store.remove_photo(record.id, 1).await.unwrap();

        let persisted = snapshots.read().await.unwrap().unwrap();
        assert_eq!(persisted[0].photos, vec![photos[0].clone(), photos[2].clone()]);
        assert!(matches!(
            store.remove_photo(record.id, 5).await,
            Err(InventoryError::PhotoIndexOutOfRange { index: 5, len: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_status_update_moves_aggregates() {
        let store = memory_store().await;
        let record = store.add(new_equipment("TV", "Olinda")).await.unwrap();
        assert_eq!(store.aggregate().await.functioning, 1);

        store
            .update(
                record.id,
                crate::EquipmentPatch {
                    status: Some(Status::Broken),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let counts = store.aggregate().await;
        assert_eq!((counts.functioning, counts.broken), (0, 1));
    }
}
