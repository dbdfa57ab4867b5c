//! # stagetrack HTTP API
//!
//! REST API over a shared [`Tracker`], built on axum.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /summary` - Per-status counts
//! - `POST /scan` - Record one raw scan
//! - `POST /scan/batch` - Record several raw scans in order
//! - `GET /records` - List records (`?status=`, `?limit=`)
//! - `GET /records/{barcode}` - One record
//! - `POST /derive` - Evaluate the engine on ad-hoc stage times
//! - `POST /rederive` - Repair stale derived fields
//! - `POST /export` - Snapshot export (base64)
//! - `GET /hash` - BLAKE3 hash of the snapshot
//! - `GET /metrics` - Prometheus metrics
//!
//! ## Security Configuration (Environment Variables)
//!
//! - `STAGETRACK_CORS_ORIGINS`: Comma-separated list of allowed origins, or "*" for all (default: localhost only)
//! - `STAGETRACK_RATE_LIMIT`: Requests per second (default: 100, 0 to disable)
//! - `STAGETRACK_API_KEY`: If set, requires Bearer token authentication

mod auth;
mod handlers;
mod middleware;
mod types;

pub use auth::{API_KEY_ENV, get_api_key_from_env};
pub use handlers::render_metrics;
pub use middleware::{
    DEFAULT_RATE_LIMIT, RATE_LIMIT_ENV, create_rate_limiter, get_rate_limit_from_env,
};
pub use types::{
    BatchScanRequest, BatchScanResponse, DeriveRequest, DeriveResponse, ExportResponse,
    HashResponse, HealthResponse, RecordJson, RecordResponse, RecordsQuery, RecordsResponse,
    RederiveResponse, ScanRequest, ScanResponse, StagesJson, SummaryResponse,
};

use crate::journal::Journal;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use stagetrack_core::{TrackError, Tracker};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Maximum request body size (2 MiB).
pub const MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

/// Environment variable holding allowed CORS origins.
pub const CORS_ORIGINS_ENV: &str = "STAGETRACK_CORS_ORIGINS";

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    /// Writers hold the write lock for the whole request.
    pub tracker: Arc<RwLock<Tracker>>,
    /// Scan journal, when configured.
    pub journal: Option<Journal>,
    /// Snapshot file rewritten after each change (file backend only).
    pub snapshot_file: Option<PathBuf>,
}

impl AppState {
    #[must_use]
    pub fn new(tracker: Tracker) -> Self {
        Self {
            tracker: Arc::new(RwLock::new(tracker)),
            journal: None,
            snapshot_file: None,
        }
    }

    #[must_use]
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    #[must_use]
    pub fn with_snapshot_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_file = Some(path.into());
        self
    }

    /// Write the snapshot file after a change. redb trackers persist on
    /// their own and are skipped.
    pub fn persist(&self, tracker: &Tracker) -> Result<(), TrackError> {
        match &self.snapshot_file {
            Some(path) if !tracker.is_persistent() => crate::cli::save_tracker(tracker, path),
            _ => Ok(()),
        }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Build the CORS layer from `STAGETRACK_CORS_ORIGINS`.
///
/// `*` allows everything, a comma-separated list allows those origins, and
/// an unset or entirely invalid value falls back to localhost only.
fn build_cors_layer() -> CorsLayer {
    let origins_env = std::env::var(CORS_ORIGINS_ENV).ok();

    match origins_env.as_deref() {
        Some("*") => {
            tracing::warn!(
                "CORS: Allowing ALL origins (STAGETRACK_CORS_ORIGINS=*). Do not use this in production"
            );
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .filter_map(|s| match s.parse::<HeaderValue>() {
                    Ok(hv) => {
                        tracing::info!(origin = s, "CORS: Allowing origin");
                        Some(hv)
                    }
                    Err(e) => {
                        tracing::warn!(origin = s, error = %e, "CORS: Invalid origin");
                        None
                    }
                })
                .collect();

            if allowed.is_empty() {
                tracing::warn!("CORS: No valid origins configured, defaulting to localhost only");
                build_localhost_cors()
            } else {
                restricted_cors(allowed)
            }
        }
        None => {
            tracing::info!("CORS: No STAGETRACK_CORS_ORIGINS set, defaulting to localhost only");
            build_localhost_cors()
        }
    }
}

fn restricted_cors(origins: Vec<HeaderValue>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

fn build_localhost_cors() -> CorsLayer {
    let origins = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .into_iter()
    .filter_map(|s| s.parse::<HeaderValue>().ok())
    .collect();

    restricted_cors(origins)
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the router with every endpoint and the middleware stack.
///
/// Middleware (outer to inner): tracing, CORS, body limit, rate limiting,
/// authentication.
pub fn create_router(state: AppState) -> Router {
    let rate_limit = get_rate_limit_from_env();
    let rate_limiter = if rate_limit > 0 {
        tracing::info!(rate_limit, "Rate limiting enabled");
        Some(create_rate_limiter(rate_limit))
    } else {
        tracing::info!("Rate limiting disabled");
        None
    };

    let has_auth = get_api_key_from_env().is_some();
    if has_auth {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::warn!(
            "API key authentication DISABLED, every endpoint is public. \
             Set STAGETRACK_API_KEY to enable it."
        );
    }

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/summary", get(handlers::summary_handler))
        .route("/scan", post(handlers::scan_handler))
        .route("/scan/batch", post(handlers::batch_scan_handler))
        .route("/records", get(handlers::records_handler))
        .route("/records/{barcode}", get(handlers::record_handler))
        .route("/derive", post(handlers::derive_handler))
        .route("/rederive", post(handlers::rederive_handler))
        .route("/export", post(handlers::export_handler))
        .route("/hash", get(handlers::hash_handler))
        .route("/metrics", get(handlers::metrics_handler));

    if has_auth {
        router = router.layer(axum_middleware::from_fn(auth::api_key_auth_middleware));
    }

    if let Some(limiter) = rate_limiter {
        router = router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors_layer())
                .layer(DefaultBodyLimit::max(MAX_BODY_SIZE)),
        )
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Bind and serve until the process is stopped.
pub async fn run_server(addr: &str, state: AppState) -> Result<(), TrackError> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| TrackError::IoError(format!("Bind failed: {}", e)))?;

    tracing::info!(%addr, "stagetrack HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| TrackError::IoError(format!("Server error: {}", e)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Could not listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
