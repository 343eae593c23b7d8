//! Runtime settings. Defaults live under the user's home directory, and every
//! path or retry knob can be overridden through `MORTALITY_*` environment
//! variables so several dashboard instances can point at the same store.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::BaseDirs;

use crate::db::RetryPolicy;
use crate::error::{DashboardError, Result};
use crate::population::PopulationPaths;

/// Folder name used beneath the user's home directory for application data.
const DATA_DIR_NAME: &str = ".mortality-dashboard";
/// SQLite file name stored inside the application data directory.
const DB_FILE_NAME: &str = "mortality.sqlite";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub population: PopulationPaths,
    pub retry: RetryPolicy,
}

impl Settings {
    /// Default layout inside `data_dir`.
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            db_path: data_dir.join(DB_FILE_NAME),
            population: PopulationPaths::in_dir(&data_dir),
            retry: RetryPolicy::default(),
            data_dir,
        }
    }

    pub fn from_env() -> Result<Self> {
        let data_dir = match env::var_os("MORTALITY_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir()?,
        };

        let mut settings = Self::in_dir(data_dir);
        if let Some(db_path) = env::var_os("MORTALITY_DB_PATH") {
            settings.db_path = PathBuf::from(db_path);
        }
        settings.retry = RetryPolicy::new(
            env_usize("MORTALITY_RETRY_ATTEMPTS", settings.retry.max_retries)?,
            Duration::from_millis(env_u64(
                "MORTALITY_RETRY_BASE_MS",
                settings.retry.base_delay.as_millis() as u64,
            )?),
        );
        Ok(settings)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

/// Resolve the application data directory inside the user's home.
fn default_data_dir() -> Result<PathBuf> {
    let base_dirs = BaseDirs::new().ok_or_else(|| DashboardError::Config {
        name: "MORTALITY_DATA_DIR",
        detail: "unset and no home directory found".to_string(),
    })?;
    Ok(base_dirs.home_dir().join(DATA_DIR_NAME))
}

fn env_u64(name: &'static str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| DashboardError::Config {
                name,
                detail: format!("expected an integer, got `{raw}`"),
            }),
        Err(_) => Ok(default),
    }
}

fn env_usize(name: &'static str, default: usize) -> Result<usize> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| DashboardError::Config {
                name,
                detail: format!("expected an integer, got `{raw}`"),
            }),
        Err(_) => Ok(default),
    }
}
