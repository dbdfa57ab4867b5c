//! # Duplicate Scan Filter
//!
//! Readers often report the same label several times while it sits under
//! the beam. The filter suppresses an identical raw scan seen again from the
//! same reader within a short window so that re-reads do not count as
//! corrections. Two readers scanning the same label are independent.
//!
//! Checking and remembering are separate steps: a scan is only remembered
//! once it has actually been written, so a failed write can be retried.

use crate::primitives::DEFAULT_DUPLICATE_WINDOW_MS;
use crate::Timestamp;
use std::collections::BTreeMap;

/// `(device, scan text)`. Scans without a device share the `None` reader.
type ScanKey = (Option<String>, String);

fn scan_key(device: Option<&str>, scan: &str) -> ScanKey {
    (device.map(str::to_string), scan.trim().to_string())
}

/// Remembers when each reader last had each raw scan accepted.
#[derive(Debug, Clone)]
pub struct DuplicateFilter {
    window_ms: i64,
    recent: BTreeMap<ScanKey, Timestamp>,
}

impl Default for DuplicateFilter {
    fn default() -> Self {
        Self::new(DEFAULT_DUPLICATE_WINDOW_MS)
    }
}

impl DuplicateFilter {
    /// Create a filter with the given window. A window `<= 0` disables it.
    #[must_use]
    pub fn new(window_ms: i64) -> Self {
        Self {
            window_ms: window_ms.max(0),
            recent: BTreeMap::new(),
        }
    }

    /// The configured window in milliseconds.
    #[must_use]
    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    /// Returns `true` if `scan` from `device` is a re-read within the window.
    ///
    /// Entries that fell out of the window relative to `at` are pruned
    /// first. Nothing new is remembered.
    pub fn is_duplicate(&mut self, device: Option<&str>, scan: &str, at: Timestamp) -> bool {
        if self.window_ms == 0 {
            return false;
        }

        let cutoff = at.offset(-self.window_ms);
        self.recent.retain(|_, seen| *seen >= cutoff);

        // the window only looks backwards in time
        self.recent
            .get(&scan_key(device, scan))
            .is_some_and(|seen| *seen <= at)
    }

    /// Remember an accepted scan.
    pub fn remember(&mut self, device: Option<&str>, scan: &str, at: Timestamp) {
        if self.window_ms > 0 {
            self.recent.insert(scan_key(device, scan), at);
        }
    }

    /// Drop a remembered scan so the next identical read is applied.
    pub fn forget(&mut self, device: Option<&str>, scan: &str) {
        self.recent.remove(&scan_key(device, scan));
    }

    /// [`is_duplicate`](Self::is_duplicate), remembering the scan when it
    /// is not one.
    pub fn check(&mut self, device: Option<&str>, scan: &str, at: Timestamp) -> bool {
        if self.is_duplicate(device, scan, at) {
            return true;
        }
        self.remember(device, scan, at);
        false
    }

    /// Number of scans currently remembered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.recent.len()
    }

    /// True when nothing is remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.recent.clear();
    }
}
