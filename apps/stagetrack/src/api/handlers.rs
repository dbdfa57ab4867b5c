//! # API Endpoint Handlers
//!
//! Read-only endpoints take the tracker read lock; anything that writes
//! takes the write lock for the whole request so each scan sees one
//! consistent record.

use super::{
    AppState,
    types::{
        BatchScanRequest, BatchScanResponse, DeriveRequest, DeriveResponse, ExportResponse,
        HashResponse, HealthResponse, RecordResponse, RecordsQuery, RecordsResponse,
        RederiveResponse, ScanRequest, ScanResponse, SummaryResponse,
    },
};
use crate::timefmt::{now, start_of_day};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use stagetrack_core::{
    ScanOutcome, Status, Timestamp, TrackError, Tracker, export_snapshot,
    primitives::MAX_REPORT_LIMIT,
    scan::validate_batch_len,
    snapshot_checksum, snapshot_crypto_hash, validate_barcode,
};

/// HTTP status for an error coming out of the core.
fn error_status(e: &TrackError) -> StatusCode {
    match e {
        TrackError::InvalidScan(_)
        | TrackError::InvalidBarcode(_)
        | TrackError::DeserializationError(_) => StatusCode::BAD_REQUEST,
        TrackError::RecordNotFound(_) => StatusCode::NOT_FOUND,
        TrackError::SerializationError(_) | TrackError::IoError(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

// =============================================================================
// HEALTH HANDLER
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

// =============================================================================
// SUMMARY HANDLER
// =============================================================================

/// Per-status counts plus today's activity.
pub async fn summary_handler(State(state): State<AppState>) -> impl IntoResponse {
    let tracker = state.tracker.read().await;

    let summary = match tracker.summary() {
        Ok(summary) => summary,
        Err(e) => {
            tracing::error!(error = %e, "Summary failed");
            return (
                error_status(&e),
                Json(serde_json::json!({ "success": false, "error": e.to_string() })),
            )
                .into_response();
        }
    };
    let active_today = start_of_day(now())
        .and_then(|midnight| tracker.active_since(midnight))
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Could not count today's activity");
            0
        });

    (
        StatusCode::OK,
        Json(SummaryResponse::new(&summary, active_today)),
    )
        .into_response()
}

// =============================================================================
// SCAN HANDLERS
// =============================================================================

/// Scan time plus the tracker's answer for one request.
type Applied = (Option<Timestamp>, Result<ScanOutcome, TrackError>);

/// Record one scan under an already-held write lock. Nothing is persisted.
fn record_request(tracker: &mut Tracker, request: &ScanRequest) -> Applied {
    match request.timestamp() {
        Ok(at) => (
            Some(at),
            tracker.record_raw(&request.raw, at, request.device.as_deref()),
        ),
        Err(e) => (None, Err(e)),
    }
}

/// Write the snapshot once for everything just recorded.
///
/// When the write fails, every applied scan is reported as failed and taken
/// back out of the duplicate window so the reader can retry it.
fn persist_applied(
    state: &AppState,
    tracker: &mut Tracker,
    requests: &[ScanRequest],
    applied: &mut [Applied],
) {
    let wrote = applied
        .iter()
        .any(|(_, result)| matches!(result, Ok(outcome) if !outcome.duplicate));
    if !wrote {
        return;
    }

    let Err(e) = state.persist(tracker) else {
        return;
    };
    tracing::error!(error = %e, "Snapshot write failed");

    for (request, (_, result)) in requests.iter().zip(applied.iter_mut()) {
        if matches!(result, Ok(outcome) if !outcome.duplicate) {
            tracker.forget_raw(&request.raw, request.device.as_deref());
            *result = Err(TrackError::IoError(format!("snapshot not saved: {}", e)));
        }
    }
}

/// Journal and log the final result of one scan.
fn finish_scan(
    state: &AppState,
    request: &ScanRequest,
    at: Option<Timestamp>,
    result: &Result<ScanOutcome, TrackError>,
) {
    let device = request.device.as_deref();

    if let (Some(journal), Some(at)) = (&state.journal, at) {
        if let Err(e) = journal.note_outcome(&request.raw, at, device, result) {
            tracing::error!(raw = %request.raw, error = %e, "Journal write failed");
        }
    }

    match result {
        Ok(outcome) if outcome.duplicate => {
            tracing::debug!(raw = %request.raw, device, "Duplicate scan suppressed");
        }
        Ok(outcome) => {
            tracing::info!(
                barcode = %outcome.barcode,
                stage = %outcome.stage,
                status = %outcome.current.current_status,
                created = outcome.created,
                status_changed = outcome.status_changed,
                "Scan recorded"
            );
        }
        Err(e) => {
            tracing::warn!(raw = %request.raw, error = %e, "Scan rejected");
        }
    }
}

fn scan_response(result: Result<ScanOutcome, TrackError>) -> (StatusCode, ScanResponse) {
    match result {
        Ok(outcome) => (StatusCode::OK, ScanResponse::success(&outcome)),
        Err(e) => (
            error_status(&e),
            ScanResponse::error(format!("Scan failed: {}", e)),
        ),
    }
}

/// Record one raw scan.
pub async fn scan_handler(
    State(state): State<AppState>,
    Json(request): Json<ScanRequest>,
) -> impl IntoResponse {
    let mut tracker = state.tracker.write().await;

    let mut applied = [record_request(&mut tracker, &request)];
    persist_applied(
        &state,
        &mut tracker,
        std::slice::from_ref(&request),
        &mut applied,
    );
    let [(at, result)] = applied;
    finish_scan(&state, &request, at, &result);

    let (status, body) = scan_response(result);
    (status, Json(body))
}

/// Record several raw scans in order. A bad scan does not stop the batch.
///
/// The snapshot file, if any, is written once for the whole batch.
pub async fn batch_scan_handler(
    State(state): State<AppState>,
    Json(request): Json<BatchScanRequest>,
) -> impl IntoResponse {
    if let Err(e) = validate_batch_len(request.scans.len()) {
        return (
            StatusCode::BAD_REQUEST,
            Json(BatchScanResponse::error(e.to_string())),
        );
    }

    let mut tracker = state.tracker.write().await;
    let mut applied: Vec<Applied> = request
        .scans
        .iter()
        .map(|scan| record_request(&mut tracker, scan))
        .collect();
    persist_applied(&state, &mut tracker, &request.scans, &mut applied);

    let results = request
        .scans
        .iter()
        .zip(applied)
        .map(|(scan, (at, result))| {
            finish_scan(&state, scan, at, &result);
            scan_response(result).1
        })
        .collect();

    (StatusCode::OK, Json(BatchScanResponse::from_results(results)))
}

// =============================================================================
// RECORD HANDLERS
// =============================================================================

/// List records.
///
/// With `status`, records at that status in barcode order. Without it, the
/// most recently active records first. `limit` is clamped to the report cap.
pub async fn records_handler(
    State(state): State<AppState>,
    Query(query): Query<RecordsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(MAX_REPORT_LIMIT).min(MAX_REPORT_LIMIT);
    let tracker = state.tracker.read().await;

    let result = match query.status.as_deref() {
        Some(text) => text.parse::<Status>().and_then(|status| {
            let mut records = tracker.records_with_status(status)?;
            records.truncate(limit);
            Ok(records)
        }),
        None => tracker.recent(limit),
    };

    match result {
        Ok(records) => (StatusCode::OK, Json(RecordsResponse::success(&records))),
        Err(e) => (error_status(&e), Json(RecordsResponse::error(e.to_string()))),
    }
}

/// Look up one record by barcode.
pub async fn record_handler(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
) -> impl IntoResponse {
    let barcode = match validate_barcode(&barcode) {
        Ok(barcode) => barcode,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(RecordResponse::error(e.to_string())),
            );
        }
    };

    let tracker = state.tracker.read().await;
    match tracker.record(&barcode) {
        Ok(Some(record)) => (StatusCode::OK, Json(RecordResponse::found(&record))),
        Ok(None) => (StatusCode::NOT_FOUND, Json(RecordResponse::not_found())),
        Err(e) => (error_status(&e), Json(RecordResponse::error(e.to_string()))),
    }
}

// =============================================================================
// ENGINE HANDLERS
// =============================================================================

/// Evaluate the engine on ad-hoc stage times. Touches no records.
pub async fn derive_handler(Json(request): Json<DeriveRequest>) -> impl IntoResponse {
    match request.to_stages() {
        Ok(stages) => (StatusCode::OK, Json(DeriveResponse::success(&stages))),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(DeriveResponse::error(e.to_string())),
        ),
    }
}

/// Repair stored rows whose derived fields disagree with their stages.
pub async fn rederive_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut tracker = state.tracker.write().await;
    let result = tracker
        .rederive_all()
        .and_then(|repaired| state.persist(&tracker).map(|()| repaired));

    match result {
        Ok(repaired) => {
            tracing::info!(repaired, "Rederive complete");
            (
                StatusCode::OK,
                Json(RederiveResponse {
                    success: true,
                    repaired,
                    error: None,
                }),
            )
        }
        Err(e) => (
            error_status(&e),
            Json(RederiveResponse {
                success: false,
                repaired: 0,
                error: Some(e.to_string()),
            }),
        ),
    }
}

// =============================================================================
// EXPORT / HASH / METRICS HANDLERS
// =============================================================================

/// Export every record as a base64 snapshot.
pub async fn export_handler(State(state): State<AppState>) -> impl IntoResponse {
    let tracker = state.tracker.read().await;

    let records = match tracker.records() {
        Ok(records) => records,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ExportResponse::error(format!("Failed to read records: {}", e))),
            );
        }
    };

    match export_snapshot(&records) {
        Ok(data) => {
            let checksum = snapshot_checksum(&records);
            (
                StatusCode::OK,
                Json(ExportResponse::success(data, checksum, records.len())),
            )
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ExportResponse::error(format!("Export failed: {}", e))),
        ),
    }
}

/// BLAKE3 hash of the snapshot.
pub async fn hash_handler(State(state): State<AppState>) -> impl IntoResponse {
    let tracker = state.tracker.read().await;

    let result = tracker.records().and_then(|records| {
        let hash = snapshot_crypto_hash(&records)?;
        Ok((hash, records.len()))
    });

    match result {
        Ok((hash, count)) => (StatusCode::OK, Json(HashResponse::success(hash, count))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(HashResponse::error(e.to_string())),
        ),
    }
}

/// Render the Prometheus text exposition.
pub fn render_metrics(tracker: &Tracker) -> Result<String, TrackError> {
    let summary = tracker.summary()?;
    let mut out = String::new();

    out.push_str("# HELP stagetrack_records_total Number of tracked items.\n");
    out.push_str("# TYPE stagetrack_records_total gauge\n");
    out.push_str(&format!("stagetrack_records_total {}\n", summary.total));

    out.push_str("# HELP stagetrack_records Tracked items by current status.\n");
    out.push_str("# TYPE stagetrack_records gauge\n");
    for (status, count) in &summary.counts {
        out.push_str(&format!(
            "stagetrack_records{{status=\"{}\"}} {}\n",
            status, count
        ));
    }

    out.push_str("# HELP stagetrack_last_activity_ms Latest stage timestamp, ms since epoch.\n");
    out.push_str("# TYPE stagetrack_last_activity_ms gauge\n");
    out.push_str(&format!(
        "stagetrack_last_activity_ms {}\n",
        summary.last_activity.map_or(0, |at| at.as_millis())
    ));

    out.push_str("# HELP stagetrack_persistent Whether the store is redb-backed.\n");
    out.push_str("# TYPE stagetrack_persistent gauge\n");
    out.push_str(&format!(
        "stagetrack_persistent {}\n",
        u8::from(tracker.is_persistent())
    ));

    Ok(out)
}

/// Prometheus metrics.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let tracker = state.tracker.read().await;

    match render_metrics(&tracker) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!("metrics unavailable: {}", e),
        ),
    }
}
