use anyhow::{Context, Result};
use directories::ProjectDirs;
use log::info;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::prefs::{keys, FilePrefs, PreferenceStore, SharedPrefs};

pub const NATIVE_PREFS_NAME: &str = "jadwalsholat_prefs";
pub const APP_PREFS_NAME: &str = "FlutterSharedPreferences";

pub const DEFAULT_WATCHDOG_INTERVAL_MINUTES: i64 = 1;
pub const DEFAULT_STALE_THRESHOLD_MINUTES: i64 = 5;
pub const DEFAULT_JOB_INTERVAL_MINUTES: i64 = 30;
pub const DEFAULT_CLEANER_INTERVAL_MINUTES: i64 = 10;

/// Upper bound for every interval read from a store or a bridge call: one week.
pub const MAX_INTERVAL_MINUTES: i64 = 7 * 24 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub config_dir: PathBuf,
    pub native_prefs_file: PathBuf,
    pub app_prefs_file: PathBuf,
}

impl Config {
    pub fn new() -> Result<Self> {
        let proj_dirs = ProjectDirs::from("com", "jadwalsholat", "jadwal")
            .context("Failed to get project directories")?;
        Self::with_dir(proj_dirs.config_dir())
    }

    pub fn with_dir(config_dir: &Path) -> Result<Self> {
        let config_dir = config_dir.to_path_buf();
        let native_prefs_file = config_dir.join(format!("{}.json", NATIVE_PREFS_NAME));
        let app_prefs_file = config_dir.join(format!("{}.json", APP_PREFS_NAME));

        // Create directories if they don't exist
        fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create {}", config_dir.display()))?;

        info!("Using config dir {:?}", config_dir);

        Ok(Config {
            config_dir,
            native_prefs_file,
            app_prefs_file,
        })
    }

    /// Opens the native store and the application store, in that order.
    pub fn open_stores(&self) -> Result<(SharedPrefs, SharedPrefs)> {
        let native: SharedPrefs = Arc::new(FilePrefs::open(&self.native_prefs_file)?);
        let app: SharedPrefs = Arc::new(FilePrefs::open(&self.app_prefs_file)?);
        Ok((native, app))
    }
}

/// Clamps a stored or requested interval into `1..=MAX_INTERVAL_MINUTES`.
pub fn clamp_minutes(value: i64) -> i64 {
    value.clamp(1, MAX_INTERVAL_MINUTES)
}

pub fn minutes(value: i64) -> Duration {
    Duration::from_secs(clamp_minutes(value).unsigned_abs() * 60)
}

/// Read fresh from the store on every tick so configuration calls take
/// effect without a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WatchdogConfig {
    pub interval_minutes: i64,
    pub stale_threshold_minutes: i64,
}

impl WatchdogConfig {
    pub fn load(prefs: &dyn PreferenceStore) -> Self {
        Self {
            interval_minutes: clamp_minutes(
                prefs.get_long(keys::WATCHDOG_INTERVAL_MINUTES, DEFAULT_WATCHDOG_INTERVAL_MINUTES),
            ),
            stale_threshold_minutes: clamp_minutes(
                prefs.get_long(keys::STALE_THRESHOLD_MINUTES, DEFAULT_STALE_THRESHOLD_MINUTES),
            ),
        }
    }

    pub fn interval(&self) -> Duration {
        minutes(self.interval_minutes)
    }

    pub fn stale_threshold(&self) -> Duration {
        minutes(self.stale_threshold_minutes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobConfig {
    pub interval_minutes: i64,
    pub require_battery_not_low: bool,
}

impl JobConfig {
    pub fn load(prefs: &dyn PreferenceStore) -> Self {
        Self {
            interval_minutes: clamp_minutes(
                prefs.get_long(keys::JOB_INTERVAL_MINUTES, DEFAULT_JOB_INTERVAL_MINUTES),
            ),
            require_battery_not_low: prefs.get_bool(keys::JOB_REQUIRE_BATTERY_NOT_LOW, false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CleanerConfig {
    pub interval_minutes: i64,
}

impl CleanerConfig {
    pub fn load(prefs: &dyn PreferenceStore) -> Self {
        Self {
            interval_minutes: clamp_minutes(
                prefs.get_long(keys::AUTO_CLEAN_INTERVAL_MINUTES, DEFAULT_CLEANER_INTERVAL_MINUTES),
            ),
        }
    }
}
