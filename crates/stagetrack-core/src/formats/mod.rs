//! # Formats Module
//!
//! Byte-level formats. File I/O lives in the app layer.

pub mod snapshot;

#[cfg(feature = "crypto-hash")]
pub use snapshot::snapshot_crypto_hash;
pub use snapshot::{
    MAX_SNAPSHOT_SIZE, SnapshotHeader, export_snapshot, import_snapshot, snapshot_checksum,
};
