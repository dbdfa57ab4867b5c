//! # Validation Tier Tests (T0-T3)
//!
//! If ANY tier fails, the system is INVALID.
//!
//! ## Tiers
//! - T0: Derivation Rule
//! - T1: Update Discipline
//! - T2: Store Parity (memory vs redb)
//! - T3: Tracker and Snapshot Round Trip

use stagetrack_core::{
    Barcode, DerivedState, ItemRecord, Stage, StageTimestamps, StageUpdate, Status, Timestamp,
    TrackError, derive,
};

const T: Timestamp = Timestamp(1_721_520_000_000);

fn at(offset: i64) -> Timestamp {
    T.offset(offset)
}

fn barcode(code: &str) -> Barcode {
    Barcode::new(code).expect("barcode")
}

// =============================================================================
// TIER T0: DERIVATION RULE
// =============================================================================

mod t0_derivation_rule {
    use super::*;

    /// T0.1: Nothing observed gives unknown and no activity.
    #[test]
    fn all_absent() {
        assert_eq!(derive(&StageTimestamps::new()), DerivedState::default());
    }

    /// T0.2: A single stage is its own status.
    #[test]
    fn single_stage() {
        let derived = derive(&StageTimestamps::new().with(Stage::Cleaned, T));
        assert_eq!(derived.current_status, Status::Cleaned);
        assert_eq!(derived.last_activity, Some(T));
    }

    /// T0.3: Equal timestamps resolve to the higher stage.
    #[test]
    fn tie_goes_to_higher_stage() {
        let stages = StageTimestamps::new()
            .with(Stage::Cut, T)
            .with(Stage::Stored, T);
        let derived = derive(&stages);
        assert_eq!(derived.current_status, Status::Stored);
        assert_eq!(derived.last_activity, Some(T));
    }

    /// T0.4: A later lower stage demotes a higher one.
    #[test]
    fn recency_overrides_index() {
        let stages = StageTimestamps::new()
            .with(Stage::Scheduled, at(10))
            .with(Stage::Stored, T);
        let derived = derive(&stages);
        assert_eq!(derived.current_status, Status::Scheduled);
        assert_eq!(derived.last_activity, Some(at(10)));
    }

    /// T0.5: All six in order gives shipped.
    #[test]
    fn monotonic_pipeline_is_shipped() {
        let mut stages = StageTimestamps::new();
        for (i, stage) in Stage::ALL.into_iter().enumerate() {
            stages.set(stage, Some(at(i as i64 * 60_000)));
        }
        let derived = derive(&stages);
        assert_eq!(derived.current_status, Status::Shipped);
        assert_eq!(derived.last_activity, Some(at(5 * 60_000)));
    }

    /// T0.6: All six present with scheduled latest gives scheduled.
    #[test]
    fn scheduled_latest_demotes_everything() {
        let mut stages = StageTimestamps::new();
        for (i, stage) in Stage::ALL.into_iter().enumerate() {
            stages.set(stage, Some(at(i as i64)));
        }
        stages.set(Stage::Scheduled, Some(at(100)));
        assert_eq!(derive(&stages).current_status, Status::Scheduled);
    }

    /// T0.7: Gaps in the pipeline do not block a stage.
    #[test]
    fn missing_intermediate_stages() {
        let stages = StageTimestamps::new()
            .with(Stage::Scheduled, T)
            .with(Stage::Shipped, at(1));
        assert_eq!(derive(&stages).current_status, Status::Shipped);
    }

    /// T0.8: Every one of the 64 presence patterns derives without failing.
    #[test]
    fn total_over_presence_patterns() {
        for mask in 0u8..64 {
            let mut stages = StageTimestamps::new();
            for (bit, stage) in Stage::ALL.into_iter().enumerate() {
                if mask & (1 << bit) != 0 {
                    stages.set(stage, Some(at(bit as i64)));
                }
            }
            let derived = derive(&stages);
            assert_eq!(derived.last_activity.is_none(), mask == 0);
            if mask != 0 {
                // ascending times: the highest present stage wins
                let highest = Stage::ALL
                    .into_iter()
                    .rev()
                    .find(|s| stages.get(*s).is_some())
                    .expect("present");
                assert_eq!(derived.current_status, Status::from(highest));
            }
        }
    }
}

// =============================================================================
// TIER T1: UPDATE DISCIPLINE
// =============================================================================

mod t1_update_discipline {
    use super::*;
    use stagetrack_core::parse_scan;

    /// T1.1: Later writes per stage win, even when backdated.
    #[test]
    fn latest_write_per_stage_wins() {
        let code = barcode("Rich-07212025-05");
        let mut record = ItemRecord::new(code.clone());
        record.apply(&StageUpdate::new(code.clone(), Stage::Stored, at(100)));
        record.apply(&StageUpdate::new(code, Stage::Stored, at(50)));

        assert_eq!(record.stages.stored, Some(at(50)));
        assert_eq!(record.derived.last_activity, Some(at(50)));
    }

    /// T1.2: Derived fields always match the stages after a mutation.
    #[test]
    fn derived_tracks_stages() {
        let code = barcode("A");
        let mut record = ItemRecord::new(code.clone());
        for (i, stage) in Stage::ALL.into_iter().enumerate() {
            record.apply(&StageUpdate::new(code.clone(), stage, at(i as i64)));
            assert!(record.is_consistent());
            assert_eq!(record.derived.current_status, Status::from(stage));
        }
    }

    /// T1.3: Label prefixes map to stages.
    #[test]
    fn label_prefixes() {
        let update = parse_scan("0@Rich-07212025-03", T, None).expect("parse");
        assert_eq!(update.stage, Stage::Scheduled);
        let update = parse_scan("5@Rich-07212025-03", T, None).expect("parse");
        assert_eq!(update.stage, Stage::Shipped);
    }

    /// T1.4: Unprefixed labels are rejected.
    #[test]
    fn unprefixed_label_rejected() {
        assert!(matches!(
            parse_scan("Rich-07212025-03", T, None),
            Err(TrackError::InvalidScan(_))
        ));
    }
}

// =============================================================================
// TIER T2: STORE PARITY
// =============================================================================

mod t2_store_parity {
    use super::*;
    use stagetrack_core::{MemoryStore, RecordStore, RedbStore};
    use tempfile::tempdir;

    fn fixtures() -> Vec<ItemRecord> {
        let rows = [
            ("A", Stage::Cut, 1),
            ("B", Stage::Stored, 2),
            ("C", Stage::Cut, 3),
            ("D", Stage::Shipped, 4),
        ];
        rows.into_iter()
            .map(|(code, stage, offset)| {
                let code = barcode(code);
                let mut record = ItemRecord::new(code.clone());
                record.apply(&StageUpdate::new(code, stage, at(offset)));
                record
            })
            .collect()
    }

    fn fill(store: &mut dyn RecordStore) {
        for record in fixtures() {
            store.put(&record).expect("put");
        }
    }

    /// T2.1: Both backends answer every query identically.
    #[test]
    fn backends_agree() {
        let temp = tempdir().expect("temp dir");
        let mut redb = RedbStore::open(temp.path().join("parity.redb")).expect("open");
        let mut memory = MemoryStore::new();
        fill(&mut redb);
        fill(&mut memory);

        assert_eq!(redb.records().expect("redb"), memory.records().expect("memory"));
        assert_eq!(
            redb.record_count().expect("redb"),
            memory.record_count().expect("memory")
        );
        for status in Status::ALL {
            assert_eq!(
                redb.records_with_status(status).expect("redb"),
                memory.records_with_status(status).expect("memory"),
                "status {}",
                status
            );
        }
    }

    /// T2.2: redb keeps records across reopen.
    #[test]
    fn redb_survives_reopen() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("reopen.redb");
        {
            let mut store = RedbStore::open(&path).expect("open");
            fill(&mut store);
        }
        let store = RedbStore::open(&path).expect("reopen");
        assert_eq!(store.records().expect("records"), fixtures());
        assert_eq!(store.records_with_status(Status::Cut).expect("cut").len(), 2);
    }
}

// =============================================================================
// TIER T3: TRACKER AND SNAPSHOT
// =============================================================================

mod t3_tracker_snapshot {
    use super::*;
    use stagetrack_core::{Tracker, export_snapshot, import_snapshot, snapshot_checksum};
    use tempfile::tempdir;

    fn scan_all(tracker: &mut Tracker) {
        let scans = [
            ("0@Rich-07212025-03", 0),
            ("1@Rich-07212025-03", 60_000),
            ("3@Rich-07212025-05", 120_000),
            ("2@Rich-07212025-03", 180_000),
            ("5@Rich-07212025-05", 240_000),
        ];
        for (raw, offset) in scans {
            tracker.record_raw(raw, at(offset), Some("COM3")).expect("scan");
        }
    }

    /// T3.1: Persistent and in-memory trackers export identical snapshots.
    #[test]
    fn snapshots_match_across_backends() {
        let temp = tempdir().expect("temp dir");
        let mut persistent = Tracker::with_redb(temp.path().join("t.redb")).expect("open");
        let mut memory = Tracker::new();
        scan_all(&mut persistent);
        scan_all(&mut memory);

        let a = export_snapshot(&persistent.records().expect("records")).expect("export");
        let b = export_snapshot(&memory.records().expect("records")).expect("export");
        assert_eq!(a, b);
    }

    /// T3.2: A snapshot imported into a fresh redb tracker reproduces the state.
    #[test]
    fn import_into_persistent() {
        let mut source = Tracker::new();
        scan_all(&mut source);
        let records = source.records().expect("records");
        let bytes = export_snapshot(&records).expect("export");

        let temp = tempdir().expect("temp dir");
        let mut target = Tracker::with_redb(temp.path().join("import.redb")).expect("open");
        let imported = import_snapshot(&bytes).expect("import");
        assert_eq!(target.import_records(&imported).expect("write"), 2);

        let restored = target.records().expect("records");
        assert_eq!(snapshot_checksum(&restored), snapshot_checksum(&records));
        assert_eq!(target.summary().expect("summary"), source.summary().expect("summary"));
    }

    /// T3.3: Final statuses after a day of scans.
    #[test]
    fn statuses_after_scans() {
        let mut tracker = Tracker::new();
        scan_all(&mut tracker);

        let a = tracker
            .record(&barcode("Rich-07212025-03"))
            .expect("get")
            .expect("present");
        assert_eq!(a.derived.current_status, Status::Cleaned);
        assert_eq!(a.last_device.as_deref(), Some("COM3"));

        let b = tracker
            .record(&barcode("Rich-07212025-05"))
            .expect("get")
            .expect("present");
        assert_eq!(b.derived.current_status, Status::Shipped);
        assert_eq!(b.derived.last_activity, Some(at(240_000)));
    }
}
