//! # redb-backed Record Storage
//!
//! A disk-backed record store using the redb embedded database:
//! - ACID transactions
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//!
//! ## Layout
//!
//! | Table | Key | Value |
//! |-------|-----|-------|
//! | `records` | barcode | postcard-encoded [`ItemRecord`] |
//! | `status_index` (multimap) | status code | barcode |
//!
//! The index entry for a barcode is rewritten in the same transaction as the
//! record, and every record is re-derived before it is written, so the index
//! always reflects the stored stages.

use crate::store::RecordStore;
use crate::{Barcode, ItemRecord, Status, TrackError};
use redb::{
    Database, MultimapTableDefinition, ReadableDatabase, ReadableMultimapTable, ReadableTable,
    ReadableTableMetadata, TableDefinition,
};
use std::path::Path;

/// Table for records: barcode -> serialized ItemRecord bytes
const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

/// Index from status code to the barcodes currently carrying it.
const STATUS_INDEX: MultimapTableDefinition<u8, &str> =
    MultimapTableDefinition::new("status_index");

fn storage_err(e: impl std::fmt::Display) -> TrackError {
    TrackError::IoError(e.to_string())
}

fn encode(record: &ItemRecord) -> Result<Vec<u8>, TrackError> {
    postcard::to_allocvec(record).map_err(|e| TrackError::SerializationError(e.to_string()))
}

fn decode(bytes: &[u8]) -> Result<ItemRecord, TrackError> {
    postcard::from_bytes(bytes).map_err(|e| TrackError::DeserializationError(e.to_string()))
}

/// A disk-backed record store.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a record database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TrackError> {
        let db = Database::create(path.as_ref()).map_err(storage_err)?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(storage_err)?;
            let _ = write_txn.open_table(RECORDS).map_err(storage_err)?;
            let _ = write_txn
                .open_multimap_table(STATUS_INDEX)
                .map_err(storage_err)?;
            write_txn.commit().map_err(storage_err)?;
        }

        Ok(Self { db })
    }

    /// Write many records in a single transaction.
    pub fn put_all(&mut self, records: &[ItemRecord]) -> Result<(), TrackError> {
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut records_table = write_txn.open_table(RECORDS).map_err(storage_err)?;
            let mut index = write_txn
                .open_multimap_table(STATUS_INDEX)
                .map_err(storage_err)?;

            for record in records {
                let mut record = record.clone();
                record.rederive();
                let key = record.barcode.as_str();

                let previous = records_table
                    .get(key)
                    .map_err(storage_err)?
                    .map(|guard| decode(guard.value()))
                    .transpose()?;
                if let Some(previous) = previous {
                    index
                        .remove(previous.derived.current_status.code(), key)
                        .map_err(storage_err)?;
                }

                let bytes = encode(&record)?;
                records_table
                    .insert(key, bytes.as_slice())
                    .map_err(storage_err)?;
                index
                    .insert(record.derived.current_status.code(), key)
                    .map_err(storage_err)?;
            }
        }
        write_txn.commit().map_err(storage_err)
    }
}

impl RecordStore for RedbStore {
    fn get(&self, barcode: &Barcode) -> Result<Option<ItemRecord>, TrackError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(RECORDS).map_err(storage_err)?;
        table
            .get(barcode.as_str())
            .map_err(storage_err)?
            .map(|guard| decode(guard.value()))
            .transpose()
    }

    fn put(&mut self, record: &ItemRecord) -> Result<(), TrackError> {
        self.put_all(std::slice::from_ref(record))
    }

    fn remove(&mut self, barcode: &Barcode) -> Result<bool, TrackError> {
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        let existed = {
            let mut records_table = write_txn.open_table(RECORDS).map_err(storage_err)?;
            let mut index = write_txn
                .open_multimap_table(STATUS_INDEX)
                .map_err(storage_err)?;

            let removed = records_table
                .remove(barcode.as_str())
                .map_err(storage_err)?
                .map(|guard| decode(guard.value()))
                .transpose()?;

            match removed {
                Some(record) => {
                    index
                        .remove(record.derived.current_status.code(), barcode.as_str())
                        .map_err(storage_err)?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit().map_err(storage_err)?;
        Ok(existed)
    }

    fn records(&self) -> Result<Vec<ItemRecord>, TrackError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(RECORDS).map_err(storage_err)?;

        let mut records = Vec::new();
        for entry in table.iter().map_err(storage_err)? {
            let (_, value) = entry.map_err(storage_err)?;
            records.push(decode(value.value())?);
        }
        Ok(records)
    }

    fn record_count(&self) -> Result<usize, TrackError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(RECORDS).map_err(storage_err)?;
        let count = table.len().map_err(storage_err)?;
        Ok(count as usize)
    }

    fn records_with_status(&self, status: Status) -> Result<Vec<ItemRecord>, TrackError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let records_table = read_txn.open_table(RECORDS).map_err(storage_err)?;
        let index = read_txn
            .open_multimap_table(STATUS_INDEX)
            .map_err(storage_err)?;

        // multimap values come back sorted, so barcode order is preserved
        let mut records = Vec::new();
        for entry in index.get(status.code()).map_err(storage_err)? {
            let barcode = entry.map_err(storage_err)?;
            if let Some(value) = records_table.get(barcode.value()).map_err(storage_err)? {
                records.push(decode(value.value())?);
            }
        }
        Ok(records)
    }
}

// =============================================================================
// TESTS
// =============================================================================
