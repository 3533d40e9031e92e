use anyhow::{bail, Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

use crate::grid::{DEFAULT_MAX_SEGMENT_COUNT, DEFAULT_SEGMENT_WIDTH_SECS, MAX_SEGMENT_COUNT};

pub const CONFIG_PATH_ENV: &str = "WATCHTRAIL_CONFIG";
pub const DB_PATH_ENV: &str = "WATCHTRAIL_DB";
const DEFAULT_CONFIG_PATH: &str = "watchtrail.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    /// Width used for timelines registered without an explicit one.
    /// Timelines keep the width they were registered with.
    pub segment_width_secs: f64,
    /// Timelines with more segments than this are rejected at registration.
    pub max_segment_count: u32,
    pub max_batch_size: usize,
    pub lock_timeout_ms: u64,
    pub max_conflict_retries: u32,
    pub database_path: PathBuf,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            segment_width_secs: DEFAULT_SEGMENT_WIDTH_SECS,
            max_segment_count: DEFAULT_MAX_SEGMENT_COUNT,
            max_batch_size: 512,
            lock_timeout_ms: 2_000,
            max_conflict_retries: 5,
            database_path: PathBuf::from("watchtrail.sqlite3"),
        }
    }
}

impl TrackerSettings {
    pub fn validate(&self) -> Result<()> {
        if !self.segment_width_secs.is_finite() || self.segment_width_secs <= 0.0 {
            bail!(
                "segment_width_secs must be a positive number, got {}",
                self.segment_width_secs
            );
        }
        if self.max_segment_count == 0 || self.max_segment_count > MAX_SEGMENT_COUNT {
            bail!(
                "max_segment_count must be between 1 and {MAX_SEGMENT_COUNT}, got {}",
                self.max_segment_count
            );
        }
        if self.max_batch_size == 0 {
            bail!("max_batch_size must be at least 1");
        }
        if self.lock_timeout_ms == 0 {
            bail!("lock_timeout_ms must be at least 1");
        }
        Ok(())
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<TrackerSettings>,
}

impl SettingsStore {
    /// Missing file means defaults. A file that does not parse or validate
    /// is an error.
    pub fn load(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse settings in {}", path.display()))?
        } else {
            TrackerSettings::default()
        };
        data.validate()?;

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Settings path from `WATCHTRAIL_CONFIG`, database path override from `WATCHTRAIL_DB`.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        let store = Self::load(path)?;

        if let Some(db_path) = std::env::var_os(DB_PATH_ENV) {
            store.data.write().database_path = PathBuf::from(db_path);
        }

        Ok(store)
    }

    pub fn current(&self) -> TrackerSettings {
        self.data.read().clone()
    }

    pub fn update(&self, settings: TrackerSettings) -> Result<()> {
        settings.validate()?;
        let mut guard = self.data.write();
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    fn persist(&self, data: &TrackerSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
