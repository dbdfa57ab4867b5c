//! # Item Records
//!
//! One record per barcode: the six raw stage timestamps plus the derived
//! fields computed from them.
//!
//! - Derived fields are recomputed after every mutation
//! - They are never set independently of the stages
//! - Later writes to the same stage replace earlier ones (corrections may backdate)

use crate::derive::derive;
use crate::{Barcode, DerivedState, Stage, StageTimestamps, StageUpdate};
use serde::{Deserialize, Serialize};

/// The persisted row for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub barcode: Barcode,
    pub stages: StageTimestamps,
    pub derived: DerivedState,
    /// Reader that produced the most recent update.
    pub last_device: Option<String>,
    /// Number of updates applied since the record was created.
    pub update_count: u64,
}

impl ItemRecord {
    /// Create a record with no stages observed.
    #[must_use]
    pub fn new(barcode: Barcode) -> Self {
        let stages = StageTimestamps::new();
        Self {
            barcode,
            derived: derive(&stages),
            stages,
            last_device: None,
            update_count: 0,
        }
    }

    /// Build a record from already-known stages.
    #[must_use]
    pub fn from_stages(barcode: Barcode, stages: StageTimestamps) -> Self {
        Self {
            barcode,
            derived: derive(&stages),
            stages,
            last_device: None,
            update_count: 0,
        }
    }

    /// Apply one stage update and re-derive.
    ///
    /// The update's timestamp overwrites the slot for its stage.
    /// Returns `true` if the derived state changed.
    pub fn apply(&mut self, update: &StageUpdate) -> bool {
        self.stages.set(update.stage, Some(update.at));
        if update.device.is_some() {
            self.last_device.clone_from(&update.device);
        }
        self.update_count = self.update_count.saturating_add(1);
        self.rederive()
    }

    /// Remove one stage observation and re-derive.
    ///
    /// Returns `true` if the derived state changed.
    pub fn clear_stage(&mut self, stage: Stage) -> bool {
        self.stages.clear(stage);
        self.update_count = self.update_count.saturating_add(1);
        self.rederive()
    }

    /// Recompute derived fields from the stages.
    ///
    /// Returns `true` if they differed from the stored values.
    pub fn rederive(&mut self) -> bool {
        let fresh = derive(&self.stages);
        let changed = fresh != self.derived;
        self.derived = fresh;
        changed
    }

    /// True when the stored derived fields match the stages.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.derived == derive(&self.stages)
    }
}

// =============================================================================
// TESTS
// =============================================================================
