//! # Status Derivation
//!
//! Maps six optional stage timestamps to a current status and a last
//! activity time.
//!
//! ## Rule
//!
//! Stages are examined from `shipped` down to `scheduled`; the first stage
//! that is present and whose timestamp is `>=` every present lower-stage
//! timestamp wins. Absent slots never block a stage.
//!
//! | Candidate | Condition |
//! |-----------|-----------|
//! | shipped | present, >= stages 1-5 |
//! | partially_shipped | present, >= stages 1-4 |
//! | stored | present, >= stages 1-3 |
//! | cleaned | present, >= stages 1-2 |
//! | cut | present, >= stage 1 |
//! | scheduled | present |
//! | unknown | nothing present |
//!
//! Because the comparison is `>=`, equal timestamps resolve to the more
//! advanced stage. A lower stage carrying the latest time demotes every
//! stage above it: the most recent observation governs.
//!
//! The functions here are total, allocation-free and deterministic.

use crate::{DerivedState, Stage, StageTimestamps, Status, Timestamp};

/// Derive the current status and last activity time.
#[must_use]
pub fn derive(stages: &StageTimestamps) -> DerivedState {
    DerivedState {
        current_status: current_status(stages),
        last_activity: last_activity(stages),
    }
}

/// The most advanced stage whose timestamp is not dominated by a lower stage.
#[must_use]
pub fn current_status(stages: &StageTimestamps) -> Status {
    Stage::ALL
        .into_iter()
        .rev()
        .find(|&stage| dominates(stages, stage))
        .map_or(Status::Unknown, Status::from)
}

/// True when `stage` is present and its timestamp is `>=` every present
/// timestamp of a lower-indexed stage.
#[must_use]
pub fn dominates(stages: &StageTimestamps, stage: Stage) -> bool {
    let Some(at) = stages.get(stage) else {
        return false;
    };

    stages
        .iter()
        .take_while(|(lower, _)| *lower < stage)
        .all(|(_, earlier)| at >= earlier)
}

/// Latest present timestamp, or `None` when nothing has been observed.
#[must_use]
pub fn last_activity(stages: &StageTimestamps) -> Option<Timestamp> {
    stages.iter().map(|(_, at)| at).max()
}

// =============================================================================
// TESTS
// =============================================================================
