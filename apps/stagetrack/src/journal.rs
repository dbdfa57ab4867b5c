//! # Scan Journal
//!
//! Append-only JSON-lines backup of raw scans, one file per UTC day
//! (`scans_YYYY-MM-DD.jsonl`).
//!
//! Scans that reached the store are written with `synced: true`. Scans whose
//! store write failed are written with `synced: false` and picked up later by
//! [`Journal::replay`], which applies them and flips the flag in place.

use crate::timefmt::{day_stamp, format_timestamp, parse_timestamp};
use serde::{Deserialize, Serialize};
use stagetrack_core::{ScanOutcome, Timestamp, TrackError, Tracker, parse_scan};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

const FILE_PREFIX: &str = "scans_";
const FILE_SUFFIX: &str = ".jsonl";

/// One journaled scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Raw label text, prefix included.
    pub raw: String,
    /// RFC 3339 time of the scan.
    pub scanned_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default)]
    pub synced: bool,
}

/// Totals from a replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub files: usize,
    pub applied: usize,
    pub failed: usize,
    pub already_synced: usize,
}

/// Journal directory handle.
#[derive(Debug, Clone)]
pub struct Journal {
    dir: PathBuf,
}

fn io_err(context: &str, path: &Path, e: std::io::Error) -> TrackError {
    TrackError::IoError(format!("{} '{}': {}", context, path.display(), e))
}

impl Journal {
    /// Open a journal directory, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, TrackError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| io_err("Create journal dir", &dir, e))?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Journal file holding scans from the day of `at`.
    pub fn path_for(&self, at: Timestamp) -> Result<PathBuf, TrackError> {
        Ok(self
            .dir
            .join(format!("{}{}{}", FILE_PREFIX, day_stamp(at)?, FILE_SUFFIX)))
    }

    /// Append one scan.
    pub fn append(
        &self,
        raw: &str,
        at: Timestamp,
        device: Option<&str>,
        synced: bool,
    ) -> Result<PathBuf, TrackError> {
        let entry = JournalEntry {
            raw: raw.trim().to_string(),
            scanned_at: format_timestamp(at),
            device: device.map(str::to_string),
            synced,
        };
        let mut line = serde_json::to_string(&entry)
            .map_err(|e| TrackError::SerializationError(e.to_string()))?;
        line.push('\n');

        let path = self.path_for(at)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_err("Open journal", &path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| io_err("Write journal", &path, e))?;
        Ok(path)
    }

    /// Journal the result of a raw scan.
    ///
    /// Applied scans are written as synced, store failures as unsynced.
    /// Duplicates and rejected labels are not journaled.
    pub fn note_outcome(
        &self,
        raw: &str,
        at: Timestamp,
        device: Option<&str>,
        result: &Result<ScanOutcome, TrackError>,
    ) -> Result<(), TrackError> {
        match result {
            Ok(outcome) if !outcome.duplicate => {
                self.append(raw, at, device, true)?;
            }
            Err(TrackError::IoError(_)) => {
                self.append(raw, at, device, false)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Journal files, oldest day first.
    pub fn files(&self) -> Result<Vec<PathBuf>, TrackError> {
        let entries =
            std::fs::read_dir(&self.dir).map_err(|e| io_err("Read journal dir", &self.dir, e))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| {
                            name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX)
                        })
            })
            .collect();
        files.sort();
        Ok(files)
    }

    /// Parse every well-formed entry of one file.
    pub fn read(&self, path: &Path) -> Result<Vec<JournalEntry>, TrackError> {
        let text = std::fs::read_to_string(path).map_err(|e| io_err("Read journal", path, e))?;
        Ok(text
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }

    /// Number of entries still waiting for replay.
    pub fn pending(&self) -> Result<usize, TrackError> {
        let mut pending = 0;
        for path in self.files()? {
            pending += self.read(&path)?.iter().filter(|e| !e.synced).count();
        }
        Ok(pending)
    }

    /// Apply every unsynced entry to `tracker` and mark it synced.
    ///
    /// Entries that fail to parse or apply stay as they are. Files are
    /// rewritten through a temporary file and a rename.
    pub fn replay(&self, tracker: &mut Tracker) -> Result<ReplayReport, TrackError> {
        let mut report = ReplayReport::default();

        for path in self.files()? {
            report.files += 1;
            let text =
                std::fs::read_to_string(&path).map_err(|e| io_err("Read journal", &path, e))?;

            let mut changed = false;
            let mut output = String::with_capacity(text.len());

            for line in text.lines().filter(|line| !line.trim().is_empty()) {
                let Ok(mut entry) = serde_json::from_str::<JournalEntry>(line) else {
                    tracing::warn!(file = %path.display(), "Skipping unreadable journal line");
                    report.failed += 1;
                    output.push_str(line);
                    output.push('\n');
                    continue;
                };

                if entry.synced {
                    report.already_synced += 1;
                } else {
                    match apply_entry(tracker, &entry) {
                        Ok(()) => {
                            entry.synced = true;
                            changed = true;
                            report.applied += 1;
                        }
                        Err(e) => {
                            tracing::warn!(raw = %entry.raw, error = %e, "Journal entry not applied");
                            report.failed += 1;
                        }
                    }
                }

                let line = serde_json::to_string(&entry)
                    .map_err(|e| TrackError::SerializationError(e.to_string()))?;
                output.push_str(&line);
                output.push('\n');
            }

            if changed {
                rewrite(&path, &output)?;
            }
        }

        Ok(report)
    }
}

fn apply_entry(tracker: &mut Tracker, entry: &JournalEntry) -> Result<(), TrackError> {
    let at = parse_timestamp(&entry.scanned_at)?;
    let update = parse_scan(&entry.raw, at, entry.device.as_deref())?;
    tracker.record_scan(&update)?;
    Ok(())
}

fn rewrite(path: &Path, contents: &str) -> Result<(), TrackError> {
    let tmp = path.with_extension("jsonl.tmp");
    std::fs::write(&tmp, contents).map_err(|e| io_err("Write journal", &tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_err("Replace journal", path, e))
}

// =============================================================================
// TESTS
// =============================================================================
