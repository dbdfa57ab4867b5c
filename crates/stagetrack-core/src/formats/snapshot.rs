//! # Snapshot Format
//!
//! Deterministic, bit-exact export of a record set. redb files are not
//! bit-identical across runs, so the snapshot is what gets compared, hashed
//! and moved between machines.
//!
//! Layout:
//! ```text
//! [magic: 4] [version: 1] [record_count: u64 LE] [checksum: u64 LE] [payload]
//! ```
//! The payload is a postcard-encoded `Vec<ItemRecord>` sorted by barcode.
//!
//! Import validates the header and the size limits before decoding the
//! payload, then re-derives every record so a snapshot can never smuggle in
//! derived fields that disagree with its stages.

use crate::primitives::{FORMAT_VERSION, MAGIC_BYTES};
use crate::{ItemRecord, Stage, TrackError};
use std::collections::BTreeSet;

/// Maximum accepted snapshot size in bytes (256 MiB).
pub const MAX_SNAPSHOT_SIZE: usize = 256 * 1024 * 1024;

/// Maximum record count accepted in a snapshot header.
pub const MAX_SNAPSHOT_RECORDS: u64 = 10_000_000;

/// Encoded header length.
pub const HEADER_LEN: usize = 21;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

// =============================================================================
// HEADER
// =============================================================================

/// Fixed-size header preceding the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub magic: [u8; 4],
    pub version: u8,
    pub record_count: u64,
    pub checksum: u64,
}

impl SnapshotHeader {
    /// Create a header with the current format version.
    #[must_use]
    pub fn new(record_count: u64, checksum: u64) -> Self {
        Self {
            magic: *MAGIC_BYTES,
            version: FORMAT_VERSION,
            record_count,
            checksum,
        }
    }

    /// Validate magic, version and record count.
    pub fn validate(&self) -> Result<(), TrackError> {
        if &self.magic != MAGIC_BYTES {
            return Err(TrackError::DeserializationError(
                "Invalid snapshot format".to_string(),
            ));
        }
        if self.version != FORMAT_VERSION {
            return Err(TrackError::DeserializationError(format!(
                "Unsupported snapshot version: {} (expected {})",
                self.version, FORMAT_VERSION
            )));
        }
        if self.record_count > MAX_SNAPSHOT_RECORDS {
            return Err(TrackError::DeserializationError(format!(
                "Record count {} exceeds maximum allowed {}",
                self.record_count, MAX_SNAPSHOT_RECORDS
            )));
        }
        Ok(())
    }

    /// Write header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes[5..13].copy_from_slice(&self.record_count.to_le_bytes());
        bytes[13..21].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Read header from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TrackError> {
        let header = bytes.get(..HEADER_LEN).ok_or_else(|| {
            TrackError::DeserializationError("Snapshot header too short".to_string())
        })?;

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&header[0..4]);
        let mut count = [0u8; 8];
        count.copy_from_slice(&header[5..13]);
        let mut checksum = [0u8; 8];
        checksum.copy_from_slice(&header[13..21]);

        Ok(Self {
            magic,
            version: header[4],
            record_count: u64::from_le_bytes(count),
            checksum: u64::from_le_bytes(checksum),
        })
    }
}

// =============================================================================
// CHECKSUM
// =============================================================================

fn fnv1a(hash: u64, bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(hash, |h, &b| (h ^ u64::from(b)).wrapping_mul(FNV_PRIME))
}

/// FNV-1a checksum over barcodes and stage slots, in barcode order.
///
/// Derived fields are not hashed; they are a function of the stages.
///
/// This is not a cryptographic hash. It detects accidental corruption only;
/// use `snapshot_crypto_hash` where tampering matters.
#[must_use]
pub fn snapshot_checksum(records: &[ItemRecord]) -> u64 {
    let mut sorted: Vec<&ItemRecord> = records.iter().collect();
    sorted.sort_by(|a, b| a.barcode.cmp(&b.barcode));

    sorted.into_iter().fold(FNV_OFFSET_BASIS, |hash, record| {
        let mut hash = fnv1a(hash, record.barcode.as_str().as_bytes());
        hash = fnv1a(hash, &[0]);
        for stage in Stage::ALL {
            match record.stages.get(stage) {
                Some(at) => {
                    hash = fnv1a(hash, &[1]);
                    hash = fnv1a(hash, &at.as_millis().to_le_bytes());
                }
                None => hash = fnv1a(hash, &[0]),
            }
        }
        hash
    })
}

// =============================================================================
// EXPORT / IMPORT
// =============================================================================

/// Serialize records to the snapshot format.
///
/// Output depends only on the record contents, never on input order.
pub fn export_snapshot(records: &[ItemRecord]) -> Result<Vec<u8>, TrackError> {
    let mut sorted = records.to_vec();
    sorted.sort_by(|a, b| a.barcode.cmp(&b.barcode));

    let header = SnapshotHeader::new(sorted.len() as u64, snapshot_checksum(&sorted));
    let payload = postcard::to_allocvec(&sorted)
        .map_err(|e| TrackError::SerializationError(format!("Snapshot payload: {}", e)))?;

    let mut result = Vec::with_capacity(HEADER_LEN + payload.len());
    result.extend_from_slice(&header.to_bytes());
    result.extend_from_slice(&payload);
    Ok(result)
}

/// Parse a snapshot back into records, sorted by barcode.
///
/// Every record is re-derived from its stages on the way in.
pub fn import_snapshot(bytes: &[u8]) -> Result<Vec<ItemRecord>, TrackError> {
    if bytes.len() > MAX_SNAPSHOT_SIZE {
        return Err(TrackError::DeserializationError(format!(
            "Snapshot size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_SNAPSHOT_SIZE
        )));
    }

    let header = SnapshotHeader::from_bytes(bytes)?;
    header.validate()?;

    let mut records: Vec<ItemRecord> = postcard::from_bytes(&bytes[HEADER_LEN..])
        .map_err(|e| TrackError::DeserializationError(format!("Snapshot payload: {}", e)))?;

    if records.len() as u64 != header.record_count {
        return Err(TrackError::DeserializationError(format!(
            "Record count mismatch: header says {}, payload has {}",
            header.record_count,
            records.len()
        )));
    }

    let mut seen = BTreeSet::new();
    for record in &records {
        if !seen.insert(record.barcode.as_str()) {
            return Err(TrackError::DeserializationError(format!(
                "Duplicate barcode in snapshot: {}",
                record.barcode
            )));
        }
    }

    let computed = snapshot_checksum(&records);
    if computed != header.checksum {
        return Err(TrackError::DeserializationError(format!(
            "Checksum mismatch: expected {}, got {}",
            header.checksum, computed
        )));
    }

    for record in &mut records {
        record.rederive();
    }
    records.sort_by(|a, b| a.barcode.cmp(&b.barcode));
    Ok(records)
}

/// BLAKE3 hex digest of the snapshot bytes.
///
/// Only available with the `crypto-hash` feature.
#[cfg(feature = "crypto-hash")]
pub fn snapshot_crypto_hash(records: &[ItemRecord]) -> Result<String, TrackError> {
    let data = export_snapshot(records)?;
    Ok(blake3::hash(&data).to_hex().to_string())
}

// =============================================================================
// TESTS
// =============================================================================
