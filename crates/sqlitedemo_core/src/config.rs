//! Application settings loaded from `appsettings.json`.
//!
//! # Responsibility
//! - Deserialize the PascalCase settings document.
//! - Resolve the database path of the active stage.
//!
//! # Invariants
//! - Unknown keys are ignored.
//! - Relative paths resolve against the directory of the settings file.

use crate::logging::default_log_level;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Operation timeout used when the settings omit `DefaultTimeoutSeconds`.
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 20;

#[derive(Debug)]
pub enum SettingsError {
    Read { path: PathBuf, source: std::io::Error },
    Parse(serde_json::Error),
    /// Structurally valid document with unusable values.
    Invalid(String),
}

impl Display for SettingsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "failed to read settings `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid settings document: {err}"),
            Self::Invalid(message) => write!(f, "invalid settings: {message}"),
        }
    }
}

impl Error for SettingsError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for SettingsError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Database location of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DatabaseSettings {
    pub path: PathBuf,
}

/// File logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoggingSettings {
    #[serde(default = "default_level")]
    pub level: String,
    pub directory: PathBuf,
}

fn default_level() -> String {
    default_log_level().to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_OPERATION_TIMEOUT_SECS
}

/// Root of `appsettings.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AppSettings {
    pub stage: String,
    pub sqlite_database: BTreeMap<String, DatabaseSettings>,
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_seconds: u64,
    #[serde(default)]
    pub logging: Option<LoggingSettings>,
    /// Directory relative paths resolve against; unset for in-memory documents.
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl AppSettings {
    /// Reads, parses and validates a settings file.
    ///
    /// Relative `Path`/`Directory` values are resolved against the file's
    /// directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut settings = Self::from_json_str(&raw)?;
        settings.base_dir = path.parent().map(Path::to_path_buf);
        if let Some(logging) = settings.logging.as_mut() {
            logging.directory = settings_relative(settings.base_dir.as_deref(), &logging.directory);
        }
        Ok(settings)
    }

    /// Parses and validates a settings document.
    pub fn from_json_str(raw: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks that the active stage has a usable database entry.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.stage.trim().is_empty() {
            return Err(SettingsError::Invalid("Stage is null or empty.".to_string()));
        }
        let database = self.stage_database()?;
        if database.path.as_os_str().is_empty() {
            return Err(SettingsError::Invalid(format!(
                "SqliteDatabase.{}.Path is null or empty.",
                self.stage
            )));
        }
        if self.default_timeout_seconds == 0 {
            return Err(SettingsError::Invalid(
                "DefaultTimeoutSeconds must be greater than zero.".to_string(),
            ));
        }
        Ok(())
    }

    /// Database file of the active stage.
    pub fn database_path(&self) -> Result<PathBuf, SettingsError> {
        let database = self.stage_database()?;
        Ok(settings_relative(self.base_dir.as_deref(), &database.path))
    }

    /// Timeout applied to every operation transaction.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_seconds)
    }

    fn stage_database(&self) -> Result<&DatabaseSettings, SettingsError> {
        self.sqlite_database.get(&self.stage).ok_or_else(|| {
            SettingsError::Invalid(format!(
                "SqliteDatabase has no entry for stage `{}`.",
                self.stage
            ))
        })
    }
}

fn settings_relative(base_dir: Option<&Path>, path: &Path) -> PathBuf {
    match base_dir {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_path_buf(),
    }
}
