//! # Configuration
//!
//! Settings are layered, later layers winning:
//!
//! 1. Built-in defaults
//! 2. A TOML file (`--config`, or `./stagetrack.toml` when present)
//! 3. `STAGETRACK_*` environment variables
//! 4. CLI flags
//!
//! Security settings (API key, rate limit, CORS origins) are not part of
//! this struct; the router reads them from the environment when it is built.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use stagetrack_core::TrackError;
use stagetrack_core::primitives::DEFAULT_DUPLICATE_WINDOW_MS;
use std::fmt;
use std::path::{Path, PathBuf};

/// File looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "stagetrack.toml";

/// Maximum accepted config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// ACID redb database
    #[default]
    Redb,
    /// Snapshot file rewritten after every change
    File,
}

impl Backend {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Backend::Redb => "redb",
            Backend::File => "file",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Backend {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redb" => Ok(Backend::Redb),
            "file" => Ok(Backend::File),
            other => Err(TrackError::DeserializationError(format!(
                "unknown backend '{}' (expected redb or file)",
                other
            ))),
        }
    }
}

/// Resolved application settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: PathBuf,
    pub backend: Backend,
    pub host: String,
    pub port: u16,
    /// `0` disables duplicate suppression.
    pub duplicate_window_ms: i64,
    /// Where accepted scans are journaled. `None` disables the journal.
    pub journal_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: PathBuf::from("stagetrack.db"),
            backend: Backend::default(),
            host: "127.0.0.1".to_string(),
            port: 8080,
            duplicate_window_ms: DEFAULT_DUPLICATE_WINDOW_MS,
            journal_dir: None,
        }
    }
}

impl Config {
    /// Load defaults plus the TOML file layer.
    ///
    /// An explicit path must exist. Without one, `./stagetrack.toml` is used
    /// if present.
    pub fn load(path: Option<&Path>) -> Result<Self, TrackError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.is_file() {
                    Self::from_file(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, TrackError> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            TrackError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(TrackError::IoError(format!(
                "Config file size {} bytes exceeds maximum allowed {} bytes",
                metadata.len(),
                MAX_CONFIG_FILE_SIZE
            )));
        }

        let text = std::fs::read_to_string(path).map_err(|e| {
            TrackError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }

    /// Parse TOML text. Missing keys keep their defaults.
    pub fn from_toml(text: &str) -> Result<Self, TrackError> {
        let config: Self = toml::from_str(text)
            .map_err(|e| TrackError::DeserializationError(format!("Config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `STAGETRACK_*` variables from the process environment.
    pub fn apply_env(self) -> Result<Self, TrackError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply `STAGETRACK_*` variables from an arbitrary lookup.
    pub fn apply_env_from<F>(mut self, lookup: F) -> Result<Self, TrackError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("STAGETRACK_DATABASE") {
            self.database = PathBuf::from(value);
        }
        if let Some(value) = lookup("STAGETRACK_BACKEND") {
            self.backend = value.parse()?;
        }
        if let Some(value) = lookup("STAGETRACK_HOST") {
            self.host = value;
        }
        if let Some(value) = lookup("STAGETRACK_PORT") {
            self.port = parse_env("STAGETRACK_PORT", &value)?;
        }
        if let Some(value) = lookup("STAGETRACK_DUPLICATE_WINDOW_MS") {
            self.duplicate_window_ms = parse_env("STAGETRACK_DUPLICATE_WINDOW_MS", &value)?;
        }
        if let Some(value) = lookup("STAGETRACK_JOURNAL_DIR") {
            self.journal_dir = if value.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(value))
            };
        }
        self.validate()?;
        Ok(self)
    }

    /// Apply CLI flags that were actually given.
    #[must_use]
    pub fn with_overrides(mut self, database: Option<PathBuf>, backend: Option<Backend>) -> Self {
        if let Some(database) = database {
            self.database = database;
        }
        if let Some(backend) = backend {
            self.backend = backend;
        }
        self
    }

    fn validate(&self) -> Result<(), TrackError> {
        if self.duplicate_window_ms < 0 {
            return Err(TrackError::DeserializationError(format!(
                "duplicate_window_ms must be >= 0, got {}",
                self.duplicate_window_ms
            )));
        }
        if self.host.trim().is_empty() {
            return Err(TrackError::DeserializationError(
                "host must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, TrackError>
where
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| TrackError::DeserializationError(format!("{}='{}': {}", key, value, e)))
}

// =============================================================================
// TESTS
// =============================================================================
