//! Integration tests for the stagetrack HTTP API.
//!
//! Uses axum-test to exercise the router without binding a socket.

// Allow unwrap and panic in tests - these are standard for test code
// Allow holding MutexGuard across await in auth tests - tests are serialized
// intentionally to avoid env var conflicts
#![allow(clippy::unwrap_used, clippy::panic, clippy::await_holding_lock)]

use axum::http::{HeaderValue, StatusCode};
use axum_test::TestServer;
use base64::Engine;
use serde_json::json;
use stagetrack::api::{
    AppState, BatchScanResponse, DeriveResponse, ExportResponse, HealthResponse, RecordResponse,
    RecordsResponse, RederiveResponse, ScanRequest, ScanResponse, SummaryResponse, create_router,
};
use stagetrack::journal::Journal;
use stagetrack_core::{Timestamp, Tracker, import_snapshot};
use std::sync::Mutex;

/// Mutex to serialize tests since some of them modify env vars.
static AUTH_TEST_MUTEX: Mutex<()> = Mutex::new(());

// 2025-07-21T00:00:00Z
const T: Timestamp = Timestamp(1_753_056_000_000);

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Holds the mutex and clears the API key on drop.
struct TestGuard {
    _guard: std::sync::MutexGuard<'static, ()>,
}

impl Drop for TestGuard {
    fn drop(&mut self) {
        // SAFETY: Tests run sequentially under AUTH_TEST_MUTEX, so no concurrent env access.
        unsafe { std::env::remove_var("STAGETRACK_API_KEY") };
    }
}

fn lock() -> TestGuard {
    let guard = AUTH_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    // SAFETY: Tests run sequentially under AUTH_TEST_MUTEX, so no concurrent env access.
    unsafe { std::env::remove_var("STAGETRACK_API_KEY") };
    TestGuard { _guard: guard }
}

fn server_for(state: AppState) -> TestServer {
    TestServer::new(create_router(state)).unwrap()
}

/// A test server over an empty in-memory tracker.
fn create_test_server() -> (TestServer, TestGuard) {
    let guard = lock();
    (server_for(AppState::new(Tracker::new())), guard)
}

/// Three items: one cleaned, one shipped, one scheduled.
fn populated_tracker() -> Tracker {
    let mut tracker = Tracker::new();
    let scans = [
        ("0@Rich-07212025-03", 0),
        ("1@Rich-07212025-03", 60_000),
        ("2@Rich-07212025-03", 120_000),
        ("3@Rich-07212025-05", 0),
        ("5@Rich-07212025-05", 60_000),
        ("0@Rich-052125-16-17", 30_000),
    ];
    for (raw, offset) in scans {
        tracker.record_raw(raw, T.offset(offset), Some("COM3")).unwrap();
    }
    tracker
}

fn create_populated_test_server() -> (TestServer, TestGuard) {
    let guard = lock();
    (server_for(AppState::new(populated_tracker())), guard)
}

fn scan(raw: &str, at: &str) -> ScanRequest {
    ScanRequest {
        raw: raw.to_string(),
        at: Some(at.to_string()),
        device: None,
    }
}

// =============================================================================
// HEALTH ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let (server, _guard) = create_test_server();

    let response = server.get("/health").await;

    response.assert_status_ok();
    let health: HealthResponse = response.json();
    assert_eq!(health.status, "ok");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
}

// =============================================================================
// SUMMARY ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_summary_empty() {
    let (server, _guard) = create_test_server();

    let response = server.get("/summary").await;

    response.assert_status_ok();
    let summary: SummaryResponse = response.json();
    assert_eq!(summary.total, 0);
    assert_eq!(summary.counts.len(), 7);
    assert!(summary.counts.values().all(|c| *c == 0));
    assert!(summary.last_activity.is_none());
    assert_eq!(summary.active_today, 0);
}

#[tokio::test]
async fn test_summary_populated() {
    let (server, _guard) = create_populated_test_server();

    let summary: SummaryResponse = server.get("/summary").await.json();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.counts["cleaned"], 1);
    assert_eq!(summary.counts["shipped"], 1);
    assert_eq!(summary.counts["scheduled"], 1);
    assert_eq!(summary.counts["unknown"], 0);
    assert_eq!(
        summary.last_activity.as_deref(),
        Some("2025-07-21T00:02:00Z")
    );
}

// =============================================================================
// SCAN ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_scan_creates_record() {
    let (server, _guard) = create_test_server();

    let response = server
        .post("/scan")
        .json(&json!({ "raw": "0@Rich-07212025-03", "device": "COM3" }))
        .await;

    response.assert_status_ok();
    let result: ScanResponse = response.json();
    assert!(result.success);
    assert!(result.created);
    assert!(result.status_changed);
    assert!(!result.duplicate);
    assert_eq!(result.barcode.as_deref(), Some("Rich-07212025-03"));
    assert_eq!(result.stage.as_deref(), Some("scheduled"));
    assert_eq!(result.status.as_deref(), Some("scheduled"));
    assert_eq!(result.previous_status.as_deref(), Some("unknown"));
    assert!(result.error.is_none());
}

#[tokio::test]
async fn test_scan_with_explicit_time() {
    let (server, _guard) = create_test_server();

    let result: ScanResponse = server
        .post("/scan")
        .json(&scan("3@Rich-07212025-05", "2025-07-21T08:00:00Z"))
        .await
        .json();
    assert_eq!(result.status.as_deref(), Some("stored"));
    assert_eq!(
        result.last_activity.as_deref(),
        Some("2025-07-21T08:00:00Z")
    );
}

#[tokio::test]
async fn test_scan_later_lower_stage_wins() {
    let (server, _guard) = create_test_server();

    server
        .post("/scan")
        .json(&scan("3@X-1", "2025-07-21T08:00:00Z"))
        .await
        .assert_status_ok();
    let result: ScanResponse = server
        .post("/scan")
        .json(&scan("0@X-1", "2025-07-21T08:00:10Z"))
        .await
        .json();

    assert!(!result.created);
    assert!(result.status_changed);
    assert_eq!(result.previous_status.as_deref(), Some("stored"));
    assert_eq!(result.status.as_deref(), Some("scheduled"));
}

#[tokio::test]
async fn test_scan_duplicate_suppressed() {
    let (server, _guard) = create_test_server();

    let first: ScanResponse = server
        .post("/scan")
        .json(&scan("1@Y-2", "2025-07-21T08:00:00Z"))
        .await
        .json();
    let second: ScanResponse = server
        .post("/scan")
        .json(&scan("1@Y-2", "2025-07-21T08:00:02Z"))
        .await
        .json();

    assert!(!first.duplicate);
    assert!(second.success);
    assert!(second.duplicate);
    assert_eq!(second.status.as_deref(), Some("cut"));
    assert_eq!(
        second.last_activity.as_deref(),
        Some("2025-07-21T08:00:00Z")
    );
}

#[tokio::test]
async fn test_scan_without_prefix_rejected() {
    let (server, _guard) = create_test_server();

    let response = server
        .post("/scan")
        .json(&json!({ "raw": "Rich-07212025-03" }))
        .await;

    response.assert_status_bad_request();
    let result: ScanResponse = response.json();
    assert!(!result.success);
    assert!(result.error.is_some());

    let summary: SummaryResponse = server.get("/summary").await.json();
    assert_eq!(summary.total, 0);
}

#[tokio::test]
async fn test_scan_bad_timestamp_rejected() {
    let (server, _guard) = create_test_server();

    let response = server.post("/scan").json(&scan("0@Z", "yesterday")).await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn test_batch_scan_counts() {
    let (server, _guard) = create_test_server();

    let response = server
        .post("/scan/batch")
        .json(&json!({
            "scans": [
                { "raw": "0@N-1", "at": "1000" },
                { "raw": "0@N-1", "at": "1001" },
                { "raw": "bad" },
                { "raw": "4@N-1", "at": "9000" }
            ]
        }))
        .await;

    response.assert_status_ok();
    let result: BatchScanResponse = response.json();
    assert!(result.success);
    assert_eq!(result.results.len(), 4);
    assert_eq!(result.accepted, 2);
    assert_eq!(result.duplicates, 1);
    assert_eq!(result.rejected, 1);
    assert_eq!(
        result.results[3].status.as_deref(),
        Some("partially_shipped")
    );
}

// =============================================================================
// RECORD ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_records_most_recent_first() {
    let (server, _guard) = create_populated_test_server();

    let result: RecordsResponse = server.get("/records").await.json();
    assert!(result.success);
    assert_eq!(result.count, 3);
    let codes: Vec<&str> = result.records.iter().map(|r| r.barcode.as_str()).collect();
    assert_eq!(
        codes,
        vec!["Rich-07212025-03", "Rich-07212025-05", "Rich-052125-16-17"]
    );
}

#[tokio::test]
async fn test_records_limit() {
    let (server, _guard) = create_populated_test_server();

    let result: RecordsResponse = server.get("/records?limit=2").await.json();
    assert_eq!(result.count, 2);
}

#[tokio::test]
async fn test_records_by_status() {
    let (server, _guard) = create_populated_test_server();

    let result: RecordsResponse = server.get("/records?status=shipped").await.json();
    assert_eq!(result.count, 1);
    assert_eq!(result.records[0].barcode, "Rich-07212025-05");
    assert_eq!(result.records[0].current_status, "shipped");

    let none: RecordsResponse = server.get("/records?status=unknown").await.json();
    assert_eq!(none.count, 0);
}

#[tokio::test]
async fn test_records_bad_status() {
    let (server, _guard) = create_populated_test_server();

    let response = server.get("/records?status=lost").await;
    response.assert_status_bad_request();
}

#[tokio::test]
async fn test_record_found() {
    let (server, _guard) = create_populated_test_server();

    let response = server.get("/records/Rich-07212025-03").await;

    response.assert_status_ok();
    let result: RecordResponse = response.json();
    assert!(result.found);
    let record = result.record.unwrap();
    assert_eq!(record.current_status, "cleaned");
    assert_eq!(record.update_count, 3);
    assert_eq!(record.last_device.as_deref(), Some("COM3"));
    assert_eq!(
        record.stages.scheduled.as_deref(),
        Some("2025-07-21T00:00:00Z")
    );
    assert!(record.stages.stored.is_none());
}

#[tokio::test]
async fn test_record_not_found() {
    let (server, _guard) = create_populated_test_server();

    let response = server.get("/records/NOPE").await;

    response.assert_status_not_found();
    let result: RecordResponse = response.json();
    assert!(result.success);
    assert!(!result.found);
}

#[tokio::test]
async fn test_record_prefixed_barcode_rejected() {
    let (server, _guard) = create_populated_test_server();

    let response = server.get("/records/3@Rich-07212025-05").await;
    response.assert_status_bad_request();
}

// =============================================================================
// DERIVE / REDERIVE ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_derive_recency_rule() {
    let (server, _guard) = create_test_server();

    let result: DeriveResponse = server
        .post("/derive")
        .json(&json!({
            "scheduled": "2025-07-21T00:00:10Z",
            "stored": "2025-07-21T00:00:00Z"
        }))
        .await
        .json();

    assert!(result.success);
    assert_eq!(result.current_status.as_deref(), Some("scheduled"));
    assert_eq!(
        result.last_activity.as_deref(),
        Some("2025-07-21T00:00:10Z")
    );
}

#[tokio::test]
async fn test_derive_tie_goes_to_higher_stage() {
    let (server, _guard) = create_test_server();

    let result: DeriveResponse = server
        .post("/derive")
        .json(&json!({ "cut": "5000", "shipped": "5000" }))
        .await
        .json();
    assert_eq!(result.current_status.as_deref(), Some("shipped"));
}

#[tokio::test]
async fn test_derive_empty_is_unknown() {
    let (server, _guard) = create_test_server();

    let result: DeriveResponse = server.post("/derive").json(&json!({})).await.json();
    assert_eq!(result.current_status.as_deref(), Some("unknown"));
    assert!(result.last_activity.is_none());
}

#[tokio::test]
async fn test_derive_rejects_bad_input() {
    let (server, _guard) = create_test_server();

    let response = server
        .post("/derive")
        .json(&json!({ "cut": "not-a-time" }))
        .await;
    response.assert_status_bad_request();

    let response = server
        .post("/derive")
        .json(&json!({ "polished": "5000" }))
        .await;
    assert!(response.status_code().is_client_error());
}

#[tokio::test]
async fn test_rederive_on_consistent_store() {
    let (server, _guard) = create_populated_test_server();

    let result: RederiveResponse = server.post("/rederive").await.json();
    assert!(result.success);
    assert_eq!(result.repaired, 0);
}

// =============================================================================
// EXPORT / HASH / METRICS ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_export_round_trips() {
    let (server, _guard) = create_populated_test_server();

    let response = server.post("/export").await;

    response.assert_status_ok();
    let result: ExportResponse = response.json();
    assert!(result.success);
    assert_eq!(result.record_count, 3);

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(result.data.unwrap())
        .unwrap();
    let records = import_snapshot(&bytes).unwrap();
    assert_eq!(records, populated_tracker().records().unwrap());
}

#[tokio::test]
async fn test_hash_changes_with_content() {
    let (server, _guard) = create_test_server();

    let before: serde_json::Value = server.get("/hash").await.json();
    assert_eq!(before["success"], true);
    assert_eq!(before["algorithm"], "blake3");
    let empty_hash = before["hash"].as_str().unwrap().to_string();
    assert_eq!(empty_hash.len(), 64);
    assert!(empty_hash.chars().all(|c| c.is_ascii_hexdigit()));

    server
        .post("/scan")
        .json(&scan("2@H-1", "1000"))
        .await
        .assert_status_ok();

    let after: serde_json::Value = server.get("/hash").await.json();
    assert_ne!(after["hash"].as_str().unwrap(), empty_hash);
}

#[tokio::test]
async fn test_metrics_content_type() {
    let (server, _guard) = create_test_server();

    let response = server.get("/metrics").await;

    response.assert_status_ok();
    let content_type = response
        .headers()
        .get("content-type")
        .expect("content-type header must be present")
        .to_str()
        .expect("content-type must be valid utf8");
    assert_eq!(content_type, "text/plain; version=0.0.4");
}

#[tokio::test]
async fn test_metrics_contains_status_counts() {
    let (server, _guard) = create_populated_test_server();

    let body = server.get("/metrics").await.text();
    assert!(body.contains("stagetrack_records_total 3"));
    assert!(body.contains("stagetrack_records{status=\"shipped\"} 1"));
    assert!(body.contains("stagetrack_records{status=\"stored\"} 0"));
    assert!(body.contains("stagetrack_persistent 0"));
}

// =============================================================================
// PERSISTENCE AND JOURNAL TESTS
// =============================================================================

#[tokio::test]
async fn test_snapshot_file_written_after_scan() {
    let _guard = lock();
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("stagetrack.snap");
    let server = server_for(AppState::new(Tracker::new()).with_snapshot_file(&path));

    server
        .post("/scan")
        .json(&scan("1@F-1", "2025-07-21T08:00:00Z"))
        .await
        .assert_status_ok();

    let records = import_snapshot(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].barcode.as_str(), "F-1");
}

#[tokio::test]
async fn test_redb_backed_server() {
    let _guard = lock();
    let temp = tempfile::tempdir().unwrap();
    let tracker = Tracker::with_redb(temp.path().join("api.redb")).unwrap();
    let server = server_for(AppState::new(tracker));

    server
        .post("/scan")
        .json(&scan("5@R-1", "1000"))
        .await
        .assert_status_ok();

    let result: RecordsResponse = server.get("/records?status=shipped").await.json();
    assert_eq!(result.count, 1);
    let body = server.get("/metrics").await.text();
    assert!(body.contains("stagetrack_persistent 1"));
}

#[tokio::test]
async fn test_scans_journaled() {
    let _guard = lock();
    let temp = tempfile::tempdir().unwrap();
    let journal = Journal::open(temp.path()).unwrap();
    let server = server_for(AppState::new(Tracker::new()).with_journal(journal.clone()));

    server
        .post("/scan")
        .json(&scan("0@J-1", "2025-07-21T08:00:00Z"))
        .await
        .assert_status_ok();
    server
        .post("/scan")
        .json(&scan("0@J-1", "2025-07-21T08:00:01Z"))
        .await
        .assert_status_ok();
    server
        .post("/scan")
        .json(&scan("J-1", "2025-07-21T08:00:02Z"))
        .await
        .assert_status_bad_request();

    let files = journal.files().unwrap();
    assert_eq!(files.len(), 1);
    assert!(files[0].ends_with("scans_2025-07-21.jsonl"));
    let entries = journal.read(&files[0]).unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].synced);
    assert_eq!(journal.pending().unwrap(), 0);
}

#[tokio::test]
async fn test_failed_snapshot_write_allows_retry() {
    let _guard = lock();
    let temp = tempfile::tempdir().unwrap();
    let dir = temp.path().join("data");
    let path = dir.join("stagetrack.snap");
    let journal = Journal::open(temp.path().join("journal")).unwrap();
    let server = server_for(
        AppState::new(Tracker::new())
            .with_snapshot_file(&path)
            .with_journal(journal.clone()),
    );

    let response = server
        .post("/scan")
        .json(&scan("2@W-1", "2025-07-21T08:00:00Z"))
        .await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let failed: ScanResponse = response.json();
    assert!(!failed.success);

    std::fs::create_dir(&dir).unwrap();

    let retry: ScanResponse = server
        .post("/scan")
        .json(&scan("2@W-1", "2025-07-21T08:00:01Z"))
        .await
        .json();
    assert!(retry.success);
    assert!(!retry.duplicate);

    let records = import_snapshot(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].barcode.as_str(), "W-1");

    let files = journal.files().unwrap();
    let entries = journal.read(&files[0]).unwrap();
    assert_eq!(entries.len(), 2);
    assert!(!entries[0].synced);
    assert!(entries[1].synced);
}

#[tokio::test]
async fn test_batch_snapshot_written_once_for_all_scans() {
    let _guard = lock();
    let temp = tempfile::tempdir().unwrap();
    let dir = temp.path().join("data");
    let path = dir.join("stagetrack.snap");
    let server = server_for(AppState::new(Tracker::new()).with_snapshot_file(&path));
    let batch = json!({
        "scans": [
            { "raw": "0@V-1", "at": "1000" },
            { "raw": "1@V-2", "at": "1000" },
            { "raw": "bad" }
        ]
    });

    let failed: BatchScanResponse = server.post("/scan/batch").json(&batch).await.json();
    assert_eq!(failed.accepted, 0);
    assert_eq!(failed.rejected, 3);
    assert!(!path.exists());

    std::fs::create_dir(&dir).unwrap();

    let retried: BatchScanResponse = server.post("/scan/batch").json(&batch).await.json();
    assert_eq!(retried.accepted, 2);
    assert_eq!(retried.duplicates, 0);
    assert_eq!(retried.rejected, 1);

    let records = import_snapshot(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn test_same_label_on_two_readers_both_applied() {
    let (server, _guard) = create_test_server();
    let mut from_com3 = scan("3@U-1", "2025-07-21T08:00:00Z");
    from_com3.device = Some("COM3".to_string());
    let mut from_com7 = scan("3@U-1", "2025-07-21T08:00:01Z");
    from_com7.device = Some("COM7".to_string());

    let first: ScanResponse = server.post("/scan").json(&from_com3).await.json();
    let second: ScanResponse = server.post("/scan").json(&from_com7).await.json();

    assert!(!first.duplicate);
    assert!(second.success);
    assert!(!second.duplicate);
    assert_eq!(
        second.last_activity.as_deref(),
        Some("2025-07-21T08:00:01Z")
    );
}

// =============================================================================
// ERROR HANDLING TESTS
// =============================================================================

#[tokio::test]
async fn test_404_on_unknown_endpoint() {
    let (server, _guard) = create_test_server();

    server.get("/unknown").await.assert_status_not_found();
}

#[tokio::test]
async fn test_method_not_allowed() {
    let (server, _guard) = create_test_server();

    let response = server.post("/health").await;
    assert_eq!(response.status_code().as_u16(), 405);
}

#[tokio::test]
async fn test_invalid_json_body() {
    let (server, _guard) = create_test_server();

    let response = server
        .post("/scan")
        .bytes(bytes::Bytes::from("not valid json"))
        .content_type("application/json")
        .await;

    assert!(response.status_code().is_client_error());
}

// =============================================================================
// AUTHENTICATION MIDDLEWARE TESTS
// =============================================================================

/// Must be called while holding AUTH_TEST_MUTEX.
fn create_auth_test_server(api_key: &str) -> TestServer {
    // SAFETY: Tests run sequentially under AUTH_TEST_MUTEX, so no concurrent env access.
    unsafe { std::env::set_var("STAGETRACK_API_KEY", api_key) };
    server_for(AppState::new(Tracker::new()))
}

#[tokio::test]
async fn test_auth_valid_bearer_token() {
    let _guard = lock();
    let api_key = "test-secret-key-12345";
    let server = create_auth_test_server(api_key);

    let response = server
        .get("/summary")
        .add_header(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {}", api_key)
                .parse::<HeaderValue>()
                .unwrap(),
        )
        .await;

    response.assert_status_ok();
}

#[tokio::test]
async fn test_auth_valid_raw_token() {
    let _guard = lock();
    let api_key = "test-raw-key-67890";
    let server = create_auth_test_server(api_key);

    let response = server
        .get("/summary")
        .add_header(
            axum::http::header::AUTHORIZATION,
            api_key.parse::<HeaderValue>().unwrap(),
        )
        .await;

    response.assert_status_ok();
}

#[tokio::test]
async fn test_auth_invalid_token_rejected() {
    let _guard = lock();
    let server = create_auth_test_server("correct-key");

    let response = server
        .post("/scan")
        .add_header(
            axum::http::header::AUTHORIZATION,
            "Bearer wrong-key".parse::<HeaderValue>().unwrap(),
        )
        .json(&scan("0@A-1", "1000"))
        .await;

    assert_eq!(response.status_code().as_u16(), 401);
}

#[tokio::test]
async fn test_auth_missing_header_rejected() {
    let _guard = lock();
    let server = create_auth_test_server("required-key");

    let response = server.get("/records").await;

    assert_eq!(response.status_code().as_u16(), 401);
}

#[tokio::test]
async fn test_auth_bearer_prefix_only_rejected() {
    let _guard = lock();
    let server = create_auth_test_server("actual-key");

    let response = server
        .get("/summary")
        .add_header(
            axum::http::header::AUTHORIZATION,
            "Bearer ".parse::<HeaderValue>().unwrap(),
        )
        .await;

    assert_eq!(response.status_code().as_u16(), 401);
}

#[tokio::test]
async fn test_auth_health_endpoint_bypasses_auth() {
    let _guard = lock();
    let server = create_auth_test_server("secret-key-for-bypass-test");

    let response = server.get("/health").await;

    response.assert_status_ok();
    let health: HealthResponse = response.json();
    assert_eq!(health.status, "ok");
}
