//! Application settings and standard paths.
//!
//! Settings are stored as pretty JSON in `<config_dir>/brisket/config.json`.
//! Every field has a default, so a missing or partial file is fine. A handful
//! of environment variables override the file:
//!
//! | Variable | Field |
//! |---|---|
//! | `BRISKET_HOME` | `home` |
//! | `BRISKET_CREATED_BY` | `created_by` |
//! | `BRISKET_LOCK_WAIT` | `lock.wait` (`true`/`false`) |
//! | `BRISKET_PARQUET_ROW_GROUP_SIZE` | `execution.parquet_row_group_size` |

use crate::error::{Error, IoResultExt as _, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "brisket";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root directory for datasets, published snapshots and the spec library
    pub home: PathBuf,
    /// Recorded as `created_by` on every new version
    pub created_by: String,
    pub lock: LockSettings,
    pub ingest: IngestSettings,
    pub execution: ExecutionSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            home: default_home(),
            created_by: "system".to_owned(),
            lock: LockSettings::default(),
            ingest: IngestSettings::default(),
            execution: ExecutionSettings::default(),
        }
    }
}

/// How a second execution on a busy dataset is treated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// Block until the running execution finishes instead of failing fast
    pub wait: bool,
    /// Upper bound on blocking when `wait` is set
    pub timeout_secs: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            wait: false,
            timeout_secs: 300,
        }
    }
}

impl LockSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Copy the source file into the store when a dataset is created.
    /// When false the raw version references the source file in place.
    pub copy_raw: bool,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self { copy_raw: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Emit a warning when one-hot encoding creates more columns than this
    pub one_hot_warn_threshold: usize,
    /// Row group size for parquet output; `None` picks one from the column count
    pub parquet_row_group_size: Option<usize>,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            one_hot_warn_threshold: 50,
            parquet_row_group_size: None,
        }
    }
}

/// Directories derived from [`Settings::home`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardPaths {
    pub home: PathBuf,
    pub datasets_dir: PathBuf,
    pub published_dir: PathBuf,
    pub pipelines_dir: PathBuf,
    /// One advisory lock file per dataset
    pub locks_dir: PathBuf,
}

impl StandardPaths {
    pub fn new(home: &Path) -> Self {
        Self {
            home: home.to_path_buf(),
            datasets_dir: home.join("datasets"),
            published_dir: home.join("published"),
            pipelines_dir: home.join("pipelines"),
            locks_dir: home.join("locks"),
        }
    }
}

impl Settings {
    /// Settings rooted at `home`, everything else default. Used by tests and embedders.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            ..Self::default()
        }
    }

    pub fn paths(&self) -> StandardPaths {
        StandardPaths::new(&self.home)
    }

    /// Load from the default config file, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut settings = match config_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings {}", path.display()))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write settings {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(home) = std::env::var("BRISKET_HOME")
            && !home.is_empty()
        {
            self.home = PathBuf::from(home);
        }

        if let Ok(user) = std::env::var("BRISKET_CREATED_BY")
            && !user.is_empty()
        {
            self.created_by = user;
        }

        if let Ok(wait) = std::env::var("BRISKET_LOCK_WAIT")
            && let Ok(parsed) = wait.parse::<bool>()
        {
            self.lock.wait = parsed;
        }

        if let Ok(size) = std::env::var("BRISKET_PARQUET_ROW_GROUP_SIZE")
            && let Ok(parsed) = size.parse::<usize>()
        {
            self.execution.parquet_row_group_size = Some(parsed);
        }
    }
}

/// Location of the settings file, if the platform has a config directory.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.json"))
}

fn default_home() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(".brisket"))
}
