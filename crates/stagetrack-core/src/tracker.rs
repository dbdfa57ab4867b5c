//! # Tracker Module
//!
//! The facade the app layer talks to: a record store plus the duplicate
//! scan filter.
//!
//! ## Storage Backends
//!
//! Tracker supports two storage backends:
//! - `InMemory`: Uses a `MemoryStore` (fast, volatile unless explicitly saved)
//! - `Persistent`: Uses `RedbStore` for disk-backed ACID storage
//!
//! Every write goes through [`ItemRecord::apply`] (or `clear_stage`), so the
//! derived fields are recomputed from a single consistent snapshot of the
//! record before it reaches the store.

use crate::report::{self, StatusSummary};
use crate::scan::{format_scan, parse_scan, validate_batch_len};
use crate::storage::RedbStore;
use crate::store::{MemoryStore, RecordStore};
use crate::{
    Barcode, DerivedState, DuplicateFilter, ItemRecord, Stage, StageUpdate, Status, Timestamp,
    TrackError,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Storage backend for a Tracker.
#[derive(Debug)]
pub enum StorageBackend {
    /// In-memory store (fast, volatile).
    InMemory(MemoryStore),
    /// Disk-backed store using redb (ACID, persistent).
    Persistent(RedbStore),
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::InMemory(MemoryStore::new())
    }
}

/// What a single scan did to its record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub barcode: Barcode,
    pub stage: Stage,
    /// The record did not exist before this scan.
    pub created: bool,
    /// The derived status differs from before.
    pub status_changed: bool,
    pub previous: DerivedState,
    pub current: DerivedState,
    /// The scan was a re-read inside the duplicate window and was not applied.
    pub duplicate: bool,
}

/// Record store plus ingestion discipline.
#[derive(Debug, Default)]
pub struct Tracker {
    backend: StorageBackend,
    filter: DuplicateFilter,
}

impl Tracker {
    /// Create an empty tracker with in-memory storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tracker over an existing in-memory store.
    #[must_use]
    pub fn with_store(store: MemoryStore) -> Self {
        Self {
            backend: StorageBackend::InMemory(store),
            filter: DuplicateFilter::default(),
        }
    }

    /// Create a tracker with persistent redb storage.
    ///
    /// Opens or creates a redb database at the given path.
    pub fn with_redb(path: impl AsRef<Path>) -> Result<Self, TrackError> {
        Ok(Self::with_redb_store(RedbStore::open(path)?))
    }

    /// Create a tracker with an existing RedbStore.
    #[must_use]
    pub fn with_redb_store(store: RedbStore) -> Self {
        Self {
            backend: StorageBackend::Persistent(store),
            filter: DuplicateFilter::default(),
        }
    }

    /// Replace the duplicate window (milliseconds, `0` disables it).
    #[must_use]
    pub fn with_duplicate_window(mut self, window_ms: i64) -> Self {
        self.filter = DuplicateFilter::new(window_ms);
        self
    }

    /// Check if using persistent storage.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, StorageBackend::Persistent(_))
    }

    /// Get a reference to the storage backend.
    #[must_use]
    pub fn backend(&self) -> &StorageBackend {
        &self.backend
    }

    /// The duplicate window in milliseconds.
    #[must_use]
    pub fn duplicate_window_ms(&self) -> i64 {
        self.filter.window_ms()
    }

    fn store(&self) -> &dyn RecordStore {
        match &self.backend {
            StorageBackend::InMemory(store) => store,
            StorageBackend::Persistent(store) => store,
        }
    }

    fn store_mut(&mut self) -> &mut dyn RecordStore {
        match &mut self.backend {
            StorageBackend::InMemory(store) => store,
            StorageBackend::Persistent(store) => store,
        }
    }

    // =========================================================================
    // INGESTION
    // =========================================================================

    /// Merge one stage update into its record and persist it.
    ///
    /// Creates the record on first sight of the barcode.
    pub fn record_scan(&mut self, update: &StageUpdate) -> Result<ScanOutcome, TrackError> {
        let existing = self.store().get(&update.barcode)?;
        let created = existing.is_none();
        let mut record = existing.unwrap_or_else(|| ItemRecord::new(update.barcode.clone()));

        let previous = record.derived;
        record.apply(update);
        self.store_mut().put(&record)?;

        Ok(ScanOutcome {
            barcode: update.barcode.clone(),
            stage: update.stage,
            created,
            status_changed: previous.current_status != record.derived.current_status,
            previous,
            current: record.derived,
            duplicate: false,
        })
    }

    /// Parse a raw label scan, drop re-reads, and record the rest.
    ///
    /// A scan only enters the duplicate window once it has been written, so
    /// a failed write can be retried straight away.
    pub fn record_raw(
        &mut self,
        raw: &str,
        at: Timestamp,
        device: Option<&str>,
    ) -> Result<ScanOutcome, TrackError> {
        let update = parse_scan(raw, at, device)?;
        let scan = format_scan(&update);

        if self
            .filter
            .is_duplicate(update.device.as_deref(), &scan, at)
        {
            let current = self
                .store()
                .get(&update.barcode)?
                .map(|record| record.derived)
                .unwrap_or_default();
            return Ok(ScanOutcome {
                barcode: update.barcode,
                stage: update.stage,
                created: false,
                status_changed: false,
                previous: current,
                current,
                duplicate: true,
            });
        }

        let outcome = self.record_scan(&update)?;
        self.filter.remember(update.device.as_deref(), &scan, at);
        Ok(outcome)
    }

    /// Take a raw scan back out of the duplicate window.
    ///
    /// For callers whose own persistence failed after [`record_raw`]
    /// succeeded, so that a retry is applied instead of suppressed.
    ///
    /// [`record_raw`]: Self::record_raw
    pub fn forget_raw(&mut self, raw: &str, device: Option<&str>) {
        if let Ok(update) = parse_scan(raw, Timestamp(0), device) {
            self.filter
                .forget(update.device.as_deref(), &format_scan(&update));
        }
    }

    /// Apply a batch of updates in order.
    ///
    /// Stops at the first failing update; earlier updates stay applied.
    pub fn record_batch(
        &mut self,
        updates: &[StageUpdate],
    ) -> Result<Vec<ScanOutcome>, TrackError> {
        validate_batch_len(updates.len())?;
        updates
            .iter()
            .map(|update| self.record_scan(update))
            .collect()
    }

    /// Remove one stage observation from a record and re-derive it.
    pub fn clear_stage(
        &mut self,
        barcode: &Barcode,
        stage: Stage,
    ) -> Result<ItemRecord, TrackError> {
        let mut record = self
            .store()
            .get(barcode)?
            .ok_or_else(|| TrackError::RecordNotFound(barcode.clone()))?;
        record.clear_stage(stage);
        self.store_mut().put(&record)?;
        Ok(record)
    }

    /// Delete a record. Returns whether it existed.
    pub fn remove(&mut self, barcode: &Barcode) -> Result<bool, TrackError> {
        self.store_mut().remove(barcode)
    }

    /// Write already-built records, replacing any with the same barcode.
    ///
    /// Used by snapshot import. Returns the number of records written.
    pub fn import_records(&mut self, records: &[ItemRecord]) -> Result<usize, TrackError> {
        match &mut self.backend {
            StorageBackend::InMemory(store) => {
                for record in records {
                    store.put(record)?;
                }
            }
            StorageBackend::Persistent(store) => store.put_all(records)?,
        }
        Ok(records.len())
    }

    /// Recompute derived fields for every stored record.
    ///
    /// Returns the number of records whose stored fields were stale.
    pub fn rederive_all(&mut self) -> Result<usize, TrackError> {
        let mut stale: Vec<ItemRecord> = self
            .store()
            .records()?
            .into_iter()
            .filter(|record| !record.is_consistent())
            .collect();

        for record in &mut stale {
            record.rederive();
        }
        self.import_records(&stale)
    }

    // =========================================================================
    // LOOKUP
    // =========================================================================

    /// Fetch one record.
    pub fn record(&self, barcode: &Barcode) -> Result<Option<ItemRecord>, TrackError> {
        self.store().get(barcode)
    }

    /// All records, ordered by barcode.
    pub fn records(&self) -> Result<Vec<ItemRecord>, TrackError> {
        self.store().records()
    }

    /// Records currently at `status`, ordered by barcode.
    pub fn records_with_status(&self, status: Status) -> Result<Vec<ItemRecord>, TrackError> {
        self.store().records_with_status(status)
    }

    /// Number of records.
    pub fn record_count(&self) -> Result<usize, TrackError> {
        self.store().record_count()
    }

    // =========================================================================
    // REPORTING
    // =========================================================================

    /// Per-status counts over every record.
    pub fn summary(&self) -> Result<StatusSummary, TrackError> {
        Ok(StatusSummary::from_records(&self.records()?))
    }

    /// Most recently active records, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<ItemRecord>, TrackError> {
        Ok(report::recent_activity(self.records()?, limit))
    }

    /// Number of records active at or after `since`.
    pub fn active_since(&self, since: Timestamp) -> Result<usize, TrackError> {
        Ok(report::active_since(&self.records()?, since))
    }

    // =========================================================================
    // EXPORT SUPPORT
    // =========================================================================

    /// Build an in-memory copy of every record, for either backend.
    pub fn to_memory_store(&self) -> Result<MemoryStore, TrackError> {
        match &self.backend {
            StorageBackend::InMemory(store) => Ok(store.clone()),
            StorageBackend::Persistent(store) => Ok(store.records()?.into_iter().collect()),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
