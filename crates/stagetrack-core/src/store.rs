//! # Record Store
//!
//! The `RecordStore` trait and its in-memory implementation.
//!
//! A store holds exactly one [`ItemRecord`] per barcode. Every `put`
//! re-derives the record before writing it, so a stored record never
//! carries derived fields that disagree with its stages.
//! All listings come back ordered by barcode.

use crate::{Barcode, ItemRecord, Status, TrackError};
use std::collections::BTreeMap;

// =============================================================================
// RECORDSTORE TRAIT
// =============================================================================

/// Storage operations shared by the in-memory and redb backends.
///
/// All operations return `Result<T, TrackError>` so both backends can be
/// driven uniformly.
pub trait RecordStore {
    /// Fetch the record for a barcode.
    fn get(&self, barcode: &Barcode) -> Result<Option<ItemRecord>, TrackError>;

    /// Insert or replace the record for `record.barcode`.
    fn put(&mut self, record: &ItemRecord) -> Result<(), TrackError>;

    /// Delete a record. Returns whether it existed.
    fn remove(&mut self, barcode: &Barcode) -> Result<bool, TrackError>;

    /// All records, ordered by barcode.
    fn records(&self) -> Result<Vec<ItemRecord>, TrackError>;

    /// Number of records.
    fn record_count(&self) -> Result<usize, TrackError>;

    /// Records whose current status equals `status`, ordered by barcode.
    fn records_with_status(&self, status: Status) -> Result<Vec<ItemRecord>, TrackError> {
        Ok(self
            .records()?
            .into_iter()
            .filter(|record| record.derived.current_status == status)
            .collect())
    }
}

// =============================================================================
// MEMORY STORE
// =============================================================================

/// Volatile store backed by a `BTreeMap`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStore {
    records: BTreeMap<Barcode, ItemRecord>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Iterate records in barcode order without cloning.
    pub fn iter(&self) -> impl Iterator<Item = &ItemRecord> {
        self.records.values()
    }

    /// Number of records (infallible form).
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<ItemRecord> for MemoryStore {
    fn from_iter<I: IntoIterator<Item = ItemRecord>>(iter: I) -> Self {
        Self {
            records: iter
                .into_iter()
                .map(|record| (record.barcode.clone(), record))
                .collect(),
        }
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, barcode: &Barcode) -> Result<Option<ItemRecord>, TrackError> {
        Ok(self.records.get(barcode).cloned())
    }

    fn put(&mut self, record: &ItemRecord) -> Result<(), TrackError> {
        let mut record = record.clone();
        record.rederive();
        self.records.insert(record.barcode.clone(), record);
        Ok(())
    }

    fn remove(&mut self, barcode: &Barcode) -> Result<bool, TrackError> {
        Ok(self.records.remove(barcode).is_some())
    }

    fn records(&self) -> Result<Vec<ItemRecord>, TrackError> {
        Ok(self.records.values().cloned().collect())
    }

    fn record_count(&self) -> Result<usize, TrackError> {
        Ok(self.records.len())
    }
}

// =============================================================================
// TESTS
// =============================================================================
