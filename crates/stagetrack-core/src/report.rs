//! # Reporting
//!
//! Read-only consumers of derived state: status counts, activity windows and
//! the recent-activity listing. Nothing here computes status; it only reads
//! the `derived` fields the store keeps current.

use crate::primitives::MAX_REPORT_LIMIT;
use crate::{ItemRecord, Status, Timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeMap;

/// Record counts per status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    /// Total number of records.
    pub total: usize,
    /// Count for every one of the seven statuses (zero when absent).
    pub counts: BTreeMap<Status, usize>,
    /// Latest activity across all records.
    pub last_activity: Option<Timestamp>,
}

impl Default for StatusSummary {
    fn default() -> Self {
        Self {
            total: 0,
            counts: Status::ALL.into_iter().map(|status| (status, 0)).collect(),
            last_activity: None,
        }
    }
}

impl StatusSummary {
    /// Summarise a set of records.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ItemRecord>) -> Self {
        let mut summary = Self::default();
        for record in records {
            summary.total += 1;
            *summary
                .counts
                .entry(record.derived.current_status)
                .or_insert(0) += 1;
            summary.last_activity = summary.last_activity.max(record.derived.last_activity);
        }
        summary
    }

    /// Count for one status.
    #[must_use]
    pub fn count(&self, status: Status) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }
}

/// Number of records whose last activity is at or after `since`.
pub fn active_since<'a>(
    records: impl IntoIterator<Item = &'a ItemRecord>,
    since: Timestamp,
) -> usize {
    records
        .into_iter()
        .filter(|record| record.derived.last_activity.is_some_and(|at| at >= since))
        .count()
}

/// Records ordered by last activity, newest first.
///
/// Ties are broken by barcode; records with no activity come last.
/// `limit` is clamped to `MAX_REPORT_LIMIT`.
#[must_use]
pub fn recent_activity(mut records: Vec<ItemRecord>, limit: usize) -> Vec<ItemRecord> {
    // None < Some(_), so Reverse puts missing activity at the end
    records.sort_by(|a, b| {
        Reverse(a.derived.last_activity)
            .cmp(&Reverse(b.derived.last_activity))
            .then_with(|| a.barcode.cmp(&b.barcode))
    });
    records.truncate(limit.min(MAX_REPORT_LIMIT));
    records
}

// =============================================================================
// TESTS
// =============================================================================
