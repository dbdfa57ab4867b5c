//! # Core Type Definitions
//!
//! This module contains all core types for the stagetrack engine:
//! - Time and identity (`Timestamp`, `Barcode`)
//! - The fixed pipeline (`Stage`) and the derived label (`Status`)
//! - Engine input and output (`StageTimestamps`, `DerivedState`)
//! - Ingestion events (`StageUpdate`)
//! - Error types (`TrackError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Use integer time only (milliseconds since the Unix epoch, UTC)
//! - Implement `Ord` where they are used as keys in `BTreeMap`/`BTreeSet`

use crate::primitives::{MAX_BARCODE_LENGTH, SCAN_PREFIX_SEPARATOR, STAGE_COUNT};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// TIMESTAMP
// =============================================================================

/// An absolute instant, in milliseconds since the Unix epoch (UTC).
///
/// Stage timestamps live on one global timeline; there is no timezone
/// component to disagree about.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Create a timestamp from milliseconds since the epoch.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Milliseconds since the epoch.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Shift by a signed number of milliseconds, saturating at the bounds.
    #[must_use]
    pub const fn offset(self, millis: i64) -> Self {
        Self(self.0.saturating_add(millis))
    }
}

// =============================================================================
// STAGE
// =============================================================================

/// One of the six fixed pipeline milestones.
///
/// Ordering follows the stage index: `Scheduled < Cut < ... < Shipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// 1: item entered production scheduling
    Scheduled,
    /// 2: cutting operation completed
    Cut,
    /// 3: edge-cleaning operation completed
    Cleaned,
    /// 4: item placed into inventory
    Stored,
    /// 5: part of the quantity has left inventory
    PartiallyShipped,
    /// 6: item fully shipped
    Shipped,
}

impl Stage {
    /// All stages in index order.
    pub const ALL: [Stage; STAGE_COUNT] = [
        Stage::Scheduled,
        Stage::Cut,
        Stage::Cleaned,
        Stage::Stored,
        Stage::PartiallyShipped,
        Stage::Shipped,
    ];

    /// The 1-based stage index.
    #[must_use]
    pub const fn index(self) -> u8 {
        match self {
            Stage::Scheduled => 1,
            Stage::Cut => 2,
            Stage::Cleaned => 3,
            Stage::Stored => 4,
            Stage::PartiallyShipped => 5,
            Stage::Shipped => 6,
        }
    }

    /// Look up a stage by its 1-based index.
    #[must_use]
    pub const fn from_index(index: u8) -> Option<Stage> {
        match index {
            1 => Some(Stage::Scheduled),
            2 => Some(Stage::Cut),
            3 => Some(Stage::Cleaned),
            4 => Some(Stage::Stored),
            5 => Some(Stage::PartiallyShipped),
            6 => Some(Stage::Shipped),
            _ => None,
        }
    }

    /// The snake_case label used in storage, JSON and the CLI.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Stage::Scheduled => "scheduled",
            Stage::Cut => "cut",
            Stage::Cleaned => "cleaned",
            Stage::Stored => "stored",
            Stage::PartiallyShipped => "partially_shipped",
            Stage::Shipped => "shipped",
        }
    }

    /// The digit printed in front of the `@` on a stage label.
    ///
    /// Labels are numbered from zero, so the digit is `index() - 1`.
    #[must_use]
    pub const fn scan_prefix(self) -> char {
        match self {
            Stage::Scheduled => '0',
            Stage::Cut => '1',
            Stage::Cleaned => '2',
            Stage::Stored => '3',
            Stage::PartiallyShipped => '4',
            Stage::Shipped => '5',
        }
    }

    /// Inverse of [`Stage::scan_prefix`].
    #[must_use]
    pub const fn from_scan_prefix(prefix: char) -> Option<Stage> {
        match prefix {
            '0' => Some(Stage::Scheduled),
            '1' => Some(Stage::Cut),
            '2' => Some(Stage::Cleaned),
            '3' => Some(Stage::Stored),
            '4' => Some(Stage::PartiallyShipped),
            '5' => Some(Stage::Shipped),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.name() == s)
            .ok_or_else(|| TrackError::InvalidScan(format!("unknown stage '{}'", s)))
    }
}

// =============================================================================
// STATUS
// =============================================================================

/// The single canonical label summarising an item's position in the pipeline.
///
/// `Unknown` means no stage has ever been observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Unknown,
    Scheduled,
    Cut,
    Cleaned,
    Stored,
    PartiallyShipped,
    Shipped,
}

impl Status {
    /// All seven labels, `Unknown` first.
    pub const ALL: [Status; STAGE_COUNT + 1] = [
        Status::Unknown,
        Status::Scheduled,
        Status::Cut,
        Status::Cleaned,
        Status::Stored,
        Status::PartiallyShipped,
        Status::Shipped,
    ];

    /// The snake_case label.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self.stage() {
            Some(stage) => stage.name(),
            None => "unknown",
        }
    }

    /// The stage this status names, if any.
    #[must_use]
    pub const fn stage(self) -> Option<Stage> {
        match self {
            Status::Unknown => None,
            Status::Scheduled => Some(Stage::Scheduled),
            Status::Cut => Some(Stage::Cut),
            Status::Cleaned => Some(Stage::Cleaned),
            Status::Stored => Some(Stage::Stored),
            Status::PartiallyShipped => Some(Stage::PartiallyShipped),
            Status::Shipped => Some(Stage::Shipped),
        }
    }

    /// Compact code used by the persistent status index (0 = unknown, else stage index).
    #[must_use]
    pub const fn code(self) -> u8 {
        match self.stage() {
            Some(stage) => stage.index(),
            None => 0,
        }
    }
}

impl From<Stage> for Status {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Scheduled => Status::Scheduled,
            Stage::Cut => Status::Cut,
            Stage::Cleaned => Status::Cleaned,
            Stage::Stored => Status::Stored,
            Stage::PartiallyShipped => Status::PartiallyShipped,
            Stage::Shipped => Status::Shipped,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Status {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "unknown" {
            return Ok(Status::Unknown);
        }
        s.parse::<Stage>()
            .map(Status::from)
            .map_err(|_| TrackError::InvalidScan(format!("unknown status '{}'", s)))
    }
}

// =============================================================================
// STAGE TIMESTAMPS (engine input)
// =============================================================================

/// Six optional stage timestamps, one slot per pipeline stage.
///
/// No ordering between slots is assumed: any subset may be present, values
/// may tie, and a lower stage may carry a later time than a higher one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct StageTimestamps {
    #[serde(default)]
    pub scheduled: Option<Timestamp>,
    #[serde(default)]
    pub cut: Option<Timestamp>,
    #[serde(default)]
    pub cleaned: Option<Timestamp>,
    #[serde(default)]
    pub stored: Option<Timestamp>,
    #[serde(default)]
    pub partially_shipped: Option<Timestamp>,
    #[serde(default)]
    pub shipped: Option<Timestamp>,
}

impl StageTimestamps {
    /// All six slots absent.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    #[must_use]
    pub fn with(mut self, stage: Stage, at: Timestamp) -> Self {
        self.set(stage, Some(at));
        self
    }

    /// Read one slot.
    #[must_use]
    pub const fn get(&self, stage: Stage) -> Option<Timestamp> {
        match stage {
            Stage::Scheduled => self.scheduled,
            Stage::Cut => self.cut,
            Stage::Cleaned => self.cleaned,
            Stage::Stored => self.stored,
            Stage::PartiallyShipped => self.partially_shipped,
            Stage::Shipped => self.shipped,
        }
    }

    /// Overwrite one slot.
    pub fn set(&mut self, stage: Stage, at: Option<Timestamp>) {
        let slot = match stage {
            Stage::Scheduled => &mut self.scheduled,
            Stage::Cut => &mut self.cut,
            Stage::Cleaned => &mut self.cleaned,
            Stage::Stored => &mut self.stored,
            Stage::PartiallyShipped => &mut self.partially_shipped,
            Stage::Shipped => &mut self.shipped,
        };
        *slot = at;
    }

    /// Mark one stage as never observed.
    pub fn clear(&mut self, stage: Stage) {
        self.set(stage, None);
    }

    /// Present slots in stage order.
    pub fn iter(&self) -> impl Iterator<Item = (Stage, Timestamp)> + '_ {
        Stage::ALL
            .into_iter()
            .filter_map(|stage| self.get(stage).map(|at| (stage, at)))
    }

    /// True when no stage has been observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Number of observed stages.
    #[must_use]
    pub fn present_count(&self) -> usize {
        self.iter().count()
    }
}

// =============================================================================
// DERIVED STATE (engine output)
// =============================================================================

/// The engine's output: current status plus the latest activity time.
///
/// `last_activity` is `None` exactly when no stage timestamp is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DerivedState {
    pub current_status: Status,
    pub last_activity: Option<Timestamp>,
}

impl Default for DerivedState {
    fn default() -> Self {
        Self {
            current_status: Status::Unknown,
            last_activity: None,
        }
    }
}

// =============================================================================
// BARCODE
// =============================================================================

/// Unique identifier of a physical item, as printed on its label.
///
/// Serialized as a plain string. Deserializing only accepts text that
/// `Barcode::new` would leave unchanged.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Barcode(String);

impl Barcode {
    /// Validate and wrap a barcode.
    ///
    /// Surrounding whitespace is trimmed. Rejects empty input, input longer
    /// than `MAX_BARCODE_LENGTH`, control characters, and text that still
    /// carries a stage prefix (`3@...`).
    pub fn new(raw: impl AsRef<str>) -> Result<Self, TrackError> {
        let trimmed = raw.as_ref().trim();

        if trimmed.is_empty() {
            return Err(TrackError::InvalidBarcode("empty barcode".to_string()));
        }
        if trimmed.len() > MAX_BARCODE_LENGTH {
            return Err(TrackError::InvalidBarcode(format!(
                "barcode length {} exceeds maximum {} bytes",
                trimmed.len(),
                MAX_BARCODE_LENGTH
            )));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(TrackError::InvalidBarcode(
                "barcode contains control characters".to_string(),
            ));
        }
        if has_stage_prefix(trimmed) {
            return Err(TrackError::InvalidBarcode(format!(
                "barcode '{}' still carries a stage prefix",
                trimmed
            )));
        }

        Ok(Self(trimmed.to_string()))
    }

    /// The barcode text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Barcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Barcode {
    type Error = TrackError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        let barcode = Self::new(&text)?;
        if barcode.as_str() != text {
            return Err(TrackError::InvalidBarcode(format!(
                "barcode '{}' has surrounding whitespace",
                text.escape_debug()
            )));
        }
        Ok(barcode)
    }
}

impl From<Barcode> for String {
    fn from(barcode: Barcode) -> Self {
        barcode.0
    }
}

/// True when `text` starts with `<stage digit>@`.
pub(crate) fn has_stage_prefix(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(digit), Some(SCAN_PREFIX_SEPARATOR)) if Stage::from_scan_prefix(digit).is_some()
    )
}

// =============================================================================
// STAGE UPDATE (ingestion event)
// =============================================================================

/// One observation: `barcode` reached `stage` at `at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageUpdate {
    pub barcode: Barcode,
    pub stage: Stage,
    pub at: Timestamp,
    /// Reader that produced the scan, when known.
    #[serde(default)]
    pub device: Option<String>,
}

impl StageUpdate {
    /// Create an update without device information.
    #[must_use]
    pub fn new(barcode: Barcode, stage: Stage, at: Timestamp) -> Self {
        Self {
            barcode,
            stage,
            at,
            device: None,
        }
    }

    /// Attach the reader id.
    #[must_use]
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors raised around the engine.
///
/// The derivation itself is total and never returns one of these; they come
/// from parsing, validation, storage and the snapshot format.
#[derive(Debug, Error)]
pub enum TrackError {
    /// A raw scan could not be turned into a stage update.
    #[error("Invalid scan: {0}")]
    InvalidScan(String),

    /// The barcode failed validation.
    #[error("Invalid barcode: {0}")]
    InvalidBarcode(String),

    /// No record exists for the barcode.
    #[error("Record not found: {0}")]
    RecordNotFound(Barcode),

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// An I/O or storage error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

// =============================================================================
// TESTS
// =============================================================================
