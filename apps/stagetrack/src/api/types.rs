//! # API Request/Response Types
//!
//! JSON shapes for the HTTP API. Times go out as RFC 3339 strings (UTC) and
//! come in as RFC 3339 or integer milliseconds.

use crate::timefmt::{format_timestamp, parse_or_now, parse_timestamp};
use serde::{Deserialize, Serialize};
use stagetrack_core::{
    ItemRecord, ScanOutcome, Stage, StageTimestamps, StatusSummary, Timestamp, TrackError,
};
use std::collections::BTreeMap;

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// SUMMARY RESPONSE
// =============================================================================

/// Per-status counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub total: usize,
    /// Every status label, zero included.
    pub counts: BTreeMap<String, usize>,
    pub last_activity: Option<String>,
    /// Records active since midnight UTC.
    pub active_today: usize,
}

impl SummaryResponse {
    #[must_use]
    pub fn new(summary: &StatusSummary, active_today: usize) -> Self {
        Self {
            total: summary.total,
            counts: summary
                .counts
                .iter()
                .map(|(status, count)| (status.name().to_string(), *count))
                .collect(),
            last_activity: summary.last_activity.map(format_timestamp),
            active_today,
        }
    }
}

// =============================================================================
// SCAN REQUEST/RESPONSE
// =============================================================================

/// One raw scan, as a reader produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Label text including the stage prefix, e.g. `3@Rich-07212025-05`.
    pub raw: String,
    /// Scan time. Defaults to the time the server received it.
    #[serde(default)]
    pub at: Option<String>,
    #[serde(default)]
    pub device: Option<String>,
}

impl ScanRequest {
    /// Resolve the scan time.
    pub fn timestamp(&self) -> Result<Timestamp, TrackError> {
        parse_or_now(self.at.as_deref())
    }
}

/// Result of one scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResponse {
    pub success: bool,
    pub barcode: Option<String>,
    pub stage: Option<String>,
    pub status: Option<String>,
    pub previous_status: Option<String>,
    pub last_activity: Option<String>,
    #[serde(default)]
    pub created: bool,
    #[serde(default)]
    pub status_changed: bool,
    #[serde(default)]
    pub duplicate: bool,
    pub error: Option<String>,
}

impl ScanResponse {
    pub fn success(outcome: &ScanOutcome) -> Self {
        Self {
            success: true,
            barcode: Some(outcome.barcode.to_string()),
            stage: Some(outcome.stage.name().to_string()),
            status: Some(outcome.current.current_status.name().to_string()),
            previous_status: Some(outcome.previous.current_status.name().to_string()),
            last_activity: outcome.current.last_activity.map(format_timestamp),
            created: outcome.created,
            status_changed: outcome.status_changed,
            duplicate: outcome.duplicate,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            barcode: None,
            stage: None,
            status: None,
            previous_status: None,
            last_activity: None,
            created: false,
            status_changed: false,
            duplicate: false,
            error: Some(msg.into()),
        }
    }
}

/// Several scans applied in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchScanRequest {
    pub scans: Vec<ScanRequest>,
}

/// Per-scan results plus totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchScanResponse {
    pub success: bool,
    pub accepted: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub results: Vec<ScanResponse>,
    pub error: Option<String>,
}

impl BatchScanResponse {
    pub fn from_results(results: Vec<ScanResponse>) -> Self {
        let rejected = results.iter().filter(|r| !r.success).count();
        let duplicates = results.iter().filter(|r| r.duplicate).count();
        Self {
            success: true,
            accepted: results.len() - rejected - duplicates,
            duplicates,
            rejected,
            results,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            accepted: 0,
            duplicates: 0,
            rejected: 0,
            results: vec![],
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// RECORDS
// =============================================================================

/// Stage slots as RFC 3339 strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagesJson {
    pub scheduled: Option<String>,
    pub cut: Option<String>,
    pub cleaned: Option<String>,
    pub stored: Option<String>,
    pub partially_shipped: Option<String>,
    pub shipped: Option<String>,
}

impl From<&StageTimestamps> for StagesJson {
    fn from(stages: &StageTimestamps) -> Self {
        let fmt = |stage: Stage| stages.get(stage).map(format_timestamp);
        Self {
            scheduled: fmt(Stage::Scheduled),
            cut: fmt(Stage::Cut),
            cleaned: fmt(Stage::Cleaned),
            stored: fmt(Stage::Stored),
            partially_shipped: fmt(Stage::PartiallyShipped),
            shipped: fmt(Stage::Shipped),
        }
    }
}

/// Record JSON representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordJson {
    pub barcode: String,
    pub current_status: String,
    pub last_activity: Option<String>,
    pub stages: StagesJson,
    pub last_device: Option<String>,
    pub update_count: u64,
}

impl From<&ItemRecord> for RecordJson {
    fn from(record: &ItemRecord) -> Self {
        Self {
            barcode: record.barcode.to_string(),
            current_status: record.derived.current_status.name().to_string(),
            last_activity: record.derived.last_activity.map(format_timestamp),
            stages: StagesJson::from(&record.stages),
            last_device: record.last_device.clone(),
            update_count: record.update_count,
        }
    }
}

/// Query string for `GET /records`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordsQuery {
    /// Only records at this status, in barcode order.
    pub status: Option<String>,
    pub limit: Option<usize>,
}

/// Record listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordsResponse {
    pub success: bool,
    pub count: usize,
    pub records: Vec<RecordJson>,
    pub error: Option<String>,
}

impl RecordsResponse {
    pub fn success(records: &[ItemRecord]) -> Self {
        Self {
            success: true,
            count: records.len(),
            records: records.iter().map(RecordJson::from).collect(),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            count: 0,
            records: vec![],
            error: Some(msg.into()),
        }
    }
}

/// Single record lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordResponse {
    pub success: bool,
    pub found: bool,
    pub record: Option<RecordJson>,
    pub error: Option<String>,
}

impl RecordResponse {
    pub fn found(record: &ItemRecord) -> Self {
        Self {
            success: true,
            found: true,
            record: Some(RecordJson::from(record)),
            error: None,
        }
    }

    pub fn not_found() -> Self {
        Self {
            success: true,
            found: false,
            record: None,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            found: false,
            record: None,
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// DERIVE REQUEST/RESPONSE
// =============================================================================

/// Ad-hoc engine input: any subset of the six stage times.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeriveRequest {
    #[serde(default)]
    pub scheduled: Option<String>,
    #[serde(default)]
    pub cut: Option<String>,
    #[serde(default)]
    pub cleaned: Option<String>,
    #[serde(default)]
    pub stored: Option<String>,
    #[serde(default)]
    pub partially_shipped: Option<String>,
    #[serde(default)]
    pub shipped: Option<String>,
}

impl DeriveRequest {
    /// Parse every present slot.
    pub fn to_stages(&self) -> Result<StageTimestamps, TrackError> {
        let slots = [
            (Stage::Scheduled, &self.scheduled),
            (Stage::Cut, &self.cut),
            (Stage::Cleaned, &self.cleaned),
            (Stage::Stored, &self.stored),
            (Stage::PartiallyShipped, &self.partially_shipped),
            (Stage::Shipped, &self.shipped),
        ];

        let mut stages = StageTimestamps::new();
        for (stage, slot) in slots {
            if let Some(text) = slot {
                let at = parse_timestamp(text)
                    .map_err(|e| TrackError::InvalidScan(format!("{}: {}", stage, e)))?;
                stages.set(stage, Some(at));
            }
        }
        Ok(stages)
    }
}

/// Engine output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeriveResponse {
    pub success: bool,
    pub current_status: Option<String>,
    pub last_activity: Option<String>,
    pub error: Option<String>,
}

impl DeriveResponse {
    pub fn success(stages: &StageTimestamps) -> Self {
        let derived = stagetrack_core::derive(stages);
        Self {
            success: true,
            current_status: Some(derived.current_status.name().to_string()),
            last_activity: derived.last_activity.map(format_timestamp),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            current_status: None,
            last_activity: None,
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// MAINTENANCE RESPONSES
// =============================================================================

/// Bulk re-derivation result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RederiveResponse {
    pub success: bool,
    pub repaired: usize,
    pub error: Option<String>,
}

/// Export response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResponse {
    pub success: bool,
    pub data: Option<String>, // Base64 encoded snapshot
    pub checksum: Option<u64>,
    pub record_count: usize,
    pub error: Option<String>,
}

impl ExportResponse {
    pub fn success(data: Vec<u8>, checksum: u64, record_count: usize) -> Self {
        Self {
            success: true,
            data: Some(base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                &data,
            )),
            checksum: Some(checksum),
            record_count,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            checksum: None,
            record_count: 0,
            error: Some(msg.into()),
        }
    }
}

/// BLAKE3 digest of the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashResponse {
    pub success: bool,
    pub algorithm: String,
    pub hash: Option<String>,
    pub record_count: usize,
    pub error: Option<String>,
}

impl HashResponse {
    pub fn success(hash: String, record_count: usize) -> Self {
        Self {
            success: true,
            algorithm: "blake3".to_string(),
            hash: Some(hash),
            record_count,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            algorithm: "blake3".to_string(),
            hash: None,
            record_count: 0,
            error: Some(msg.into()),
        }
    }
}
