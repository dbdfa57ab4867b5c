//! # stagetrack-core
//!
//! The status derivation engine for stagetrack, plus the thin record-keeping
//! layers around it.
//!
//! Items move through a fixed six-stage pipeline (scheduled, cut, cleaned,
//! stored, partially shipped, shipped). Each stage is an optional timestamp.
//! [`derive`] turns those six slots into one current status and one last
//! activity time; everything else in this crate exists to feed it consistent
//! input and keep its output next to the raw stages.
//!
//! ## Architectural Constraints
//!
//! - `derive` is pure and total: every combination of present and absent
//!   stages maps to a defined output
//! - Derived fields are recomputed on every write and never set on their own
//! - Integer time only (milliseconds since the Unix epoch)
//! - NO async, NO network dependencies, NO logging (the app layer logs)

// =============================================================================
// MODULES
// =============================================================================

pub mod dedup;
pub mod derive;
pub mod formats;
pub mod primitives;
pub mod record;
pub mod report;
pub mod scan;
pub mod storage;
pub mod store;
pub mod tracker;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    Barcode, DerivedState, Stage, StageTimestamps, StageUpdate, Status, Timestamp, TrackError,
};

// =============================================================================
// RE-EXPORTS: Engine and Records
// =============================================================================

pub use dedup::DuplicateFilter;
pub use derive::{current_status, derive, dominates, last_activity};
pub use record::ItemRecord;
pub use report::{StatusSummary, active_since, recent_activity};
pub use scan::{format_scan, parse_scan, validate_barcode};
pub use storage::RedbStore;
pub use store::{MemoryStore, RecordStore};
pub use tracker::{ScanOutcome, StorageBackend, Tracker};

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

#[cfg(feature = "crypto-hash")]
pub use formats::snapshot_crypto_hash;
pub use formats::{
    MAX_SNAPSHOT_SIZE, SnapshotHeader, export_snapshot, import_snapshot, snapshot_checksum,
};
