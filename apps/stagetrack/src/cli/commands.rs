//! # CLI Command Implementations
//!
//! Every command opens the configured store, does its work, and writes the
//! snapshot file back when the file backend is in use.

use super::IngestFormat;
use crate::api::{self, AppState, DeriveRequest, DeriveResponse, RecordJson, ScanRequest};
use crate::config::{Backend, Config};
use crate::journal::Journal;
use crate::timefmt::{format_timestamp, now, parse_or_now, parse_timestamp, start_of_day};
use serde::Serialize;
use stagetrack_core::{
    ItemRecord, MAX_SNAPSHOT_SIZE, ScanOutcome, Stage, StageUpdate, Status, TrackError, Tracker,
    export_snapshot, import_snapshot, parse_scan,
    primitives::{MAX_BATCH_LENGTH, MAX_REPORT_LIMIT},
    scan::validate_batch_len,
    snapshot_checksum, snapshot_crypto_hash, validate_barcode,
};
use std::path::{Path, PathBuf};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum file size for ingestion (100 MB).
const MAX_INGEST_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), TrackError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| TrackError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(TrackError::IoError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Resolve an input path: canonical, existing, and a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, TrackError> {
    let canonical = path.canonicalize().map_err(|e| {
        TrackError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(TrackError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Resolve an output path: the parent must be an existing directory.
fn validate_output_path(path: &Path) -> Result<PathBuf, TrackError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        TrackError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(TrackError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| TrackError::IoError("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

fn print_json(value: &impl Serialize) -> Result<(), TrackError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| TrackError::SerializationError(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

fn read_snapshot_file(path: &Path) -> Result<Vec<ItemRecord>, TrackError> {
    validate_file_size(path, MAX_SNAPSHOT_SIZE as u64)?;
    let data = std::fs::read(path)
        .map_err(|e| TrackError::IoError(format!("Read '{}': {}", path.display(), e)))?;
    import_snapshot(&data)
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<(), TrackError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, data)
        .map_err(|e| TrackError::IoError(format!("Write '{}': {}", tmp.display(), e)))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| TrackError::IoError(format!("Replace '{}': {}", path.display(), e)))
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_server(
    config: &Config,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), TrackError> {
    let host = host.unwrap_or_else(|| config.host.clone());
    let port = port.unwrap_or(config.port);
    let tracker = load_or_create_tracker(config)?;

    let mut state = AppState::new(tracker);
    if config.backend == Backend::File {
        state = state.with_snapshot_file(&config.database);
    }
    if let Some(dir) = &config.journal_dir {
        state = state.with_journal(Journal::open(dir)?);
    }

    println!("stagetrack server starting...");
    println!();
    println!("Configuration:");
    println!("  Host:      {}", host);
    println!("  Port:      {}", port);
    println!("  Backend:   {}", config.backend);
    println!("  Database:  {:?}", config.database);
    println!("  Dedup:     {} ms", config.duplicate_window_ms);
    match &config.journal_dir {
        Some(dir) => println!("  Journal:   {:?}", dir),
        None => println!("  Journal:   disabled"),
    }
    println!();
    println!("Endpoints:");
    println!("  POST /scan          - Record a raw scan");
    println!("  POST /scan/batch    - Record several scans");
    println!("  GET  /records       - List records");
    println!("  GET  /records/{{bc}}  - Show one record");
    println!("  GET  /summary       - Per-status counts");
    println!("  POST /derive        - Evaluate stage times");
    println!("  POST /export        - Export snapshot");
    println!("  GET  /health        - Health check");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let addr = format!("{}:{}", host, port);
    api::run_server(&addr, state).await
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize a new database.
pub fn cmd_init(config: &Config, force: bool) -> Result<(), TrackError> {
    let db_path = &config.database;
    if db_path.exists() {
        if !force {
            return Err(TrackError::IoError(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(db_path)
            .map_err(|e| TrackError::IoError(format!("Remove old database: {}", e)))?;
    }

    match config.backend {
        Backend::Redb => {
            let _tracker = Tracker::with_redb(db_path)?;
            println!("Initialized new redb database at {:?}", db_path);
        }
        Backend::File => {
            save_tracker(&Tracker::new(), db_path)?;
            println!("Initialized new snapshot file at {:?}", db_path);
        }
    }

    Ok(())
}

// =============================================================================
// SCAN COMMANDS
// =============================================================================

/// Record raw scans given on the command line.
pub fn cmd_scan(
    config: &Config,
    json_mode: bool,
    raws: &[String],
    at: Option<&str>,
    device: Option<&str>,
) -> Result<(), TrackError> {
    let at = parse_or_now(at)?;
    let journal = config.journal_dir.as_ref().map(Journal::open).transpose()?;
    let mut tracker = load_or_create_tracker(config)?;

    let mut responses = Vec::with_capacity(raws.len());
    let mut failures = 0;

    for raw in raws {
        let result = tracker.record_raw(raw, at, device);
        if let Some(journal) = &journal {
            journal.note_outcome(raw, at, device, &result)?;
        }

        match result {
            Ok(outcome) => {
                log_outcome(&outcome);
                if !json_mode {
                    print_outcome(raw, &outcome);
                }
                responses.push(api::ScanResponse::success(&outcome));
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(raw = %raw, error = %e, "Scan rejected");
                if !json_mode {
                    println!("{:<32} REJECTED  {}", raw, e);
                }
                responses.push(api::ScanResponse::error(e.to_string()));
            }
        }
    }

    save_tracker(&tracker, &config.database)?;

    if json_mode {
        print_json(&responses)?;
    }
    if failures > 0 {
        return Err(TrackError::InvalidScan(format!(
            "{} of {} scans rejected",
            failures,
            raws.len()
        )));
    }
    Ok(())
}

fn log_outcome(outcome: &ScanOutcome) {
    if outcome.duplicate {
        tracing::debug!(barcode = %outcome.barcode, stage = %outcome.stage, "Duplicate scan suppressed");
    } else {
        tracing::info!(
            barcode = %outcome.barcode,
            stage = %outcome.stage,
            status = %outcome.current.current_status,
            created = outcome.created,
            status_changed = outcome.status_changed,
            "Scan recorded"
        );
    }
}

fn print_outcome(raw: &str, outcome: &ScanOutcome) {
    if outcome.duplicate {
        println!("{:<32} duplicate (ignored)", raw);
    } else if outcome.status_changed {
        println!(
            "{:<32} {} -> {}",
            raw, outcome.previous.current_status, outcome.current.current_status
        );
    } else {
        println!("{:<32} {} (unchanged)", raw, outcome.current.current_status);
    }
}

/// Parse an ingest file into stage updates.
///
/// Text lines that cannot be parsed are skipped and counted; JSON entries
/// must all be valid.
pub fn parse_ingest(
    contents: &[u8],
    format: IngestFormat,
) -> Result<(Vec<StageUpdate>, usize), TrackError> {
    match format {
        IngestFormat::Json => {
            let requests: Vec<ScanRequest> = serde_json::from_slice(contents)
                .map_err(|e| TrackError::DeserializationError(format!("Ingest JSON: {}", e)))?;
            validate_batch_len(requests.len())?;

            let updates = requests
                .iter()
                .map(|request| {
                    parse_scan(&request.raw, request.timestamp()?, request.device.as_deref())
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok((updates, 0))
        }
        IngestFormat::Text => {
            let text = String::from_utf8_lossy(contents);
            let mut updates = Vec::new();
            let mut skipped = 0;

            for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
                let mut parts = line.split_whitespace();
                let raw = parts.next().unwrap_or_default();
                let parsed = parts
                    .next()
                    .map_or_else(|| Ok(now()), parse_timestamp)
                    .and_then(|at| parse_scan(raw, at, None));

                match parsed {
                    Ok(update) => updates.push(update),
                    Err(e) => {
                        tracing::warn!(line, error = %e, "Skipping unparsable line");
                        skipped += 1;
                    }
                }
            }
            Ok((updates, skipped))
        }
    }
}

/// Record scans from a file.
///
/// Updates are applied in file order without duplicate suppression.
pub fn cmd_ingest(
    config: &Config,
    json_mode: bool,
    file: &Path,
    format: IngestFormat,
) -> Result<(), TrackError> {
    tracing::info!(file = %file.display(), ?format, "Ingesting scans");

    let validated_path = validate_file_path(file)?;
    validate_file_size(&validated_path, MAX_INGEST_FILE_SIZE)?;
    let contents = std::fs::read(&validated_path)
        .map_err(|e| TrackError::IoError(format!("Read file: {}", e)))?;

    let (updates, skipped) = parse_ingest(&contents, format)?;

    let mut tracker = load_or_create_tracker(config)?;
    let mut changed = 0;
    for chunk in updates.chunks(MAX_BATCH_LENGTH) {
        let outcomes = tracker.record_batch(chunk)?;
        changed += outcomes.iter().filter(|o| o.status_changed).count();
    }
    save_tracker(&tracker, &config.database)?;

    let total = tracker.record_count()?;
    if json_mode {
        print_json(&serde_json::json!({
            "ingested": updates.len(),
            "skipped": skipped,
            "status_changes": changed,
            "record_count": total,
        }))?;
    } else {
        println!("Ingested {} scans ({} skipped)", updates.len(), skipped);
        println!("{} status changes, {} records tracked", changed, total);
    }
    Ok(())
}

// =============================================================================
// QUERY COMMANDS
// =============================================================================

fn print_record(record: &ItemRecord) {
    println!("Barcode:       {}", record.barcode);
    println!("Status:        {}", record.derived.current_status);
    println!(
        "Last activity: {}",
        record
            .derived
            .last_activity
            .map_or_else(|| "-".to_string(), format_timestamp)
    );
    if let Some(device) = &record.last_device {
        println!("Last device:   {}", device);
    }
    println!("Updates:       {}", record.update_count);
    println!();
    for stage in Stage::ALL {
        let at = record
            .stages
            .get(stage)
            .map_or_else(|| "-".to_string(), format_timestamp);
        println!("  {}@ {:<18} {}", stage.scan_prefix(), stage.name(), at);
    }
}

/// Show one record.
pub fn cmd_show(config: &Config, json_mode: bool, barcode: &str) -> Result<(), TrackError> {
    let barcode = validate_barcode(barcode)?;
    let tracker = load_or_create_tracker(config)?;
    let record = tracker
        .record(&barcode)?
        .ok_or(TrackError::RecordNotFound(barcode))?;

    if json_mode {
        print_json(&RecordJson::from(&record))
    } else {
        print_record(&record);
        Ok(())
    }
}

/// List records.
pub fn cmd_list(
    config: &Config,
    json_mode: bool,
    status: Option<&str>,
    limit: usize,
) -> Result<(), TrackError> {
    let limit = limit.min(MAX_REPORT_LIMIT);
    let tracker = load_or_create_tracker(config)?;

    let records = match status {
        Some(text) => {
            let mut records = tracker.records_with_status(text.parse::<Status>()?)?;
            records.truncate(limit);
            records
        }
        None => tracker.recent(limit)?,
    };

    if json_mode {
        let json: Vec<RecordJson> = records.iter().map(RecordJson::from).collect();
        return print_json(&json);
    }

    if records.is_empty() {
        println!("No records");
        return Ok(());
    }
    println!("{:<32} {:<18} LAST ACTIVITY", "BARCODE", "STATUS");
    for record in &records {
        println!(
            "{:<32} {:<18} {}",
            record.barcode.as_str(),
            record.derived.current_status.name(),
            record
                .derived
                .last_activity
                .map_or_else(|| "-".to_string(), format_timestamp)
        );
    }
    Ok(())
}

/// Per-status counts.
pub fn cmd_summary(config: &Config, json_mode: bool) -> Result<(), TrackError> {
    let tracker = load_or_create_tracker(config)?;
    let summary = tracker.summary()?;
    let active_today = tracker.active_since(start_of_day(now())?)?;

    if json_mode {
        let mut value = serde_json::to_value(api::SummaryResponse::new(&summary, active_today))
            .map_err(|e| TrackError::SerializationError(e.to_string()))?;
        value["database"] = serde_json::json!(config.database.to_string_lossy());
        value["backend"] = serde_json::json!(config.backend.as_str());
        return print_json(&value);
    }

    println!("stagetrack summary");
    println!("==================");
    println!("Database: {:?}", config.database);
    println!("Backend:  {}", config.backend);
    println!();
    for (status, count) in &summary.counts {
        println!("  {:<18} {}", status.name(), count);
    }
    println!("  {:<18} {}", "total", summary.total);
    println!();
    println!("Active today:  {}", active_today);
    println!(
        "Last activity: {}",
        summary
            .last_activity
            .map_or_else(|| "-".to_string(), format_timestamp)
    );
    Ok(())
}

// =============================================================================
// ENGINE COMMANDS
// =============================================================================

/// Evaluate the engine on stage times given as flags.
pub fn cmd_derive(json_mode: bool, request: &DeriveRequest) -> Result<(), TrackError> {
    let stages = request.to_stages()?;
    let response = DeriveResponse::success(&stages);

    if json_mode {
        return print_json(&response);
    }
    println!(
        "Status:        {}",
        response.current_status.as_deref().unwrap_or("unknown")
    );
    println!(
        "Last activity: {}",
        response.last_activity.as_deref().unwrap_or("-")
    );
    Ok(())
}

/// Repair stale derived fields.
pub fn cmd_rederive(config: &Config, json_mode: bool) -> Result<(), TrackError> {
    let mut tracker = load_or_create_tracker(config)?;
    let repaired = tracker.rederive_all()?;
    save_tracker(&tracker, &config.database)?;

    tracing::info!(repaired, "Rederive complete");
    if json_mode {
        print_json(&serde_json::json!({ "repaired": repaired }))
    } else {
        println!("Repaired {} records", repaired);
        Ok(())
    }
}

/// Clear one stage, or remove the record entirely.
pub fn cmd_clear(
    config: &Config,
    json_mode: bool,
    barcode: &str,
    stage: Option<&str>,
) -> Result<(), TrackError> {
    let barcode = validate_barcode(barcode)?;
    let mut tracker = load_or_create_tracker(config)?;

    match stage {
        Some(stage) => {
            let stage: Stage = stage.parse()?;
            let record = tracker.clear_stage(&barcode, stage)?;
            save_tracker(&tracker, &config.database)?;
            tracing::info!(barcode = %barcode, %stage, status = %record.derived.current_status, "Stage cleared");

            if json_mode {
                print_json(&RecordJson::from(&record))
            } else {
                println!(
                    "Cleared {} on {}; status is now {}",
                    stage, barcode, record.derived.current_status
                );
                Ok(())
            }
        }
        None => {
            if !tracker.remove(&barcode)? {
                return Err(TrackError::RecordNotFound(barcode));
            }
            save_tracker(&tracker, &config.database)?;
            tracing::info!(barcode = %barcode, "Record removed");

            if json_mode {
                print_json(&serde_json::json!({ "removed": barcode.as_str() }))
            } else {
                println!("Removed {}", barcode);
                Ok(())
            }
        }
    }
}

// =============================================================================
// EXPORT / IMPORT / HASH COMMANDS
// =============================================================================

/// Export every record to a snapshot file.
pub fn cmd_export(config: &Config, output: &Path) -> Result<(), TrackError> {
    let validated_output = validate_output_path(output)?;

    let tracker = load_or_create_tracker(config)?;
    let records = tracker.records()?;
    let data = export_snapshot(&records)?;

    std::fs::write(&validated_output, &data)
        .map_err(|e| TrackError::IoError(format!("Write file: {}", e)))?;

    println!("Checksum: {}", snapshot_checksum(&records));
    println!(
        "Exported {} records ({} bytes) to {:?}",
        records.len(),
        data.len(),
        validated_output
    );
    Ok(())
}

/// Import a snapshot file into the configured store.
pub fn cmd_import(config: &Config, input: &Path) -> Result<(), TrackError> {
    let validated_path = validate_file_path(input)?;
    let records = read_snapshot_file(&validated_path)?;

    let mut tracker = load_or_create_tracker(config)?;
    let written = tracker.import_records(&records)?;
    save_tracker(&tracker, &config.database)?;

    println!(
        "Imported {} records; {} tracked in total",
        written,
        tracker.record_count()?
    );
    Ok(())
}

/// BLAKE3 hash of the snapshot.
pub fn cmd_hash(config: &Config, json_mode: bool) -> Result<(), TrackError> {
    let tracker = load_or_create_tracker(config)?;
    let records = tracker.records()?;
    let hash = snapshot_crypto_hash(&records)?;

    if json_mode {
        print_json(&api::HashResponse::success(hash, records.len()))
    } else {
        println!("BLAKE3: {}", hash);
        println!("Records: {}", records.len());
        Ok(())
    }
}

// =============================================================================
// REPLAY COMMAND
// =============================================================================

/// Apply unsynced journal entries.
pub fn cmd_replay(
    config: &Config,
    json_mode: bool,
    dir: Option<PathBuf>,
) -> Result<(), TrackError> {
    let dir = dir.or_else(|| config.journal_dir.clone()).ok_or_else(|| {
        TrackError::IoError(
            "No journal directory: pass --dir or set journal_dir / STAGETRACK_JOURNAL_DIR"
                .to_string(),
        )
    })?;

    let journal = Journal::open(dir)?;
    let mut tracker = load_or_create_tracker(config)?;
    let report = journal.replay(&mut tracker)?;
    save_tracker(&tracker, &config.database)?;

    tracing::info!(
        files = report.files,
        applied = report.applied,
        failed = report.failed,
        "Journal replay complete"
    );

    if json_mode {
        print_json(&report)
    } else {
        println!("Journal files:  {}", report.files);
        println!("Applied:        {}", report.applied);
        println!("Already synced: {}", report.already_synced);
        println!("Failed:         {}", report.failed);
        Ok(())
    }
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Open the configured store.
///
/// The file backend reads the snapshot at `database` into memory, or starts
/// empty when the file does not exist yet.
pub fn load_or_create_tracker(config: &Config) -> Result<Tracker, TrackError> {
    let tracker = match config.backend {
        Backend::Redb => Tracker::with_redb(&config.database)?,
        Backend::File => {
            if config.database.exists() {
                let records = read_snapshot_file(&config.database)?;
                Tracker::with_store(records.into_iter().collect())
            } else {
                Tracker::new()
            }
        }
    };
    Ok(tracker.with_duplicate_window(config.duplicate_window_ms))
}

/// Write an in-memory tracker to its snapshot file. redb trackers are
/// already durable.
pub fn save_tracker(tracker: &Tracker, path: &Path) -> Result<(), TrackError> {
    if tracker.is_persistent() {
        return Ok(());
    }
    let data = export_snapshot(&tracker.records()?)?;
    write_atomic(path, &data)
}

// =============================================================================
// TESTS
// =============================================================================
