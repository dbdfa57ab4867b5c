//! # Fixed Primitives
//!
//! Compile-time constants shared by the engine, the stores and the app layer.
//!
//! The pipeline shape is fixed: six stages, one optional timestamp each.
//! Everything here is immutable at runtime.

/// Number of pipeline stages tracked per item.
pub const STAGE_COUNT: usize = 6;

/// Separator between the stage digit and the barcode on printed labels.
///
/// `3@Rich-07212025-05` is the label for barcode `Rich-07212025-05` at the
/// `stored` stage.
pub const SCAN_PREFIX_SEPARATOR: char = '@';

/// Magic bytes for the snapshot header.
pub const MAGIC_BYTES: &[u8; 4] = b"STGT";

/// Current snapshot format version.
///
/// Increment this when making breaking changes to the snapshot layout.
pub const FORMAT_VERSION: u8 = 1;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length of a barcode in bytes.
pub const MAX_BARCODE_LENGTH: usize = 128;

/// Maximum length of a device identifier (serial port name, reader id).
pub const MAX_DEVICE_LENGTH: usize = 64;

/// Maximum number of updates accepted in one batch.
pub const MAX_BATCH_LENGTH: usize = 10_000;

/// Maximum number of records returned by a single report listing.
pub const MAX_REPORT_LIMIT: usize = 1_000;

/// Default window in which an identical raw scan is treated as a re-read of
/// the same label (5 seconds).
pub const DEFAULT_DUPLICATE_WINDOW_MS: i64 = 5_000;
