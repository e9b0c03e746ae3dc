use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Key names shared with the application layer. Renaming any of these breaks
/// the contract with already-installed apps.
pub mod keys {
    use super::ValueKind;

    pub const WATCHDOG_INTERVAL_MINUTES: &str = "watchdog_interval_minutes";
    pub const STALE_THRESHOLD_MINUTES: &str = "stale_threshold_minutes";
    pub const JOB_INTERVAL_MINUTES: &str = "workmanager_interval_minutes";
    pub const JOB_REQUIRE_BATTERY_NOT_LOW: &str = "workmanager_require_battery_not_low";
    pub const AUTO_CLEAN_INTERVAL_MINUTES: &str = "auto_clean_interval_minutes";
    pub const LAST_HEARTBEAT_MS: &str = "flutter_last_heartbeat_ms";
    pub const BOOT_RECEIVED_TS: &str = "boot_received_ts";

    pub const LOOP_ADHAN_AUDIO: &str = "flutter.loop_adhan_audio";

    pub const LAST_PLACE_NAME: &str = "last_place_name";
    pub const NEXT_PRAYER_NAME: &str = "next_prayer_name";
    pub const NEXT_PRAYER_TIME: &str = "next_prayer_time";
    pub const PRAYER_TIME_PREFIX: &str = "prayer_time_";
    pub const PRAYER_TIMES_CACHE_PREFIX: &str = "prayer_times_cache";
    pub const FLUTTER_PREFIX: &str = "flutter.";

    pub const WIDGET_LOCATION: &str = "widget_location";
    pub const WIDGET_LAST_UPDATE_MS: &str = "widget_last_update_ms";

    /// Keys with a fixed value type. Anything not listed is free-form.
    pub const SCHEMA: &[(&str, ValueKind)] = &[
        (WATCHDOG_INTERVAL_MINUTES, ValueKind::Long),
        (STALE_THRESHOLD_MINUTES, ValueKind::Long),
        (JOB_INTERVAL_MINUTES, ValueKind::Long),
        (JOB_REQUIRE_BATTERY_NOT_LOW, ValueKind::Bool),
        (AUTO_CLEAN_INTERVAL_MINUTES, ValueKind::Long),
        (LAST_HEARTBEAT_MS, ValueKind::Long),
        (BOOT_RECEIVED_TS, ValueKind::Long),
        (WIDGET_LAST_UPDATE_MS, ValueKind::Long),
    ];

    pub fn expected_kind(key: &str) -> Option<ValueKind> {
        SCHEMA
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, kind)| *kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Long,
    Str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrefValue {
    Bool(bool),
    Long(i64),
    Str(String),
}

impl PrefValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            PrefValue::Bool(_) => ValueKind::Bool,
            PrefValue::Long(_) => ValueKind::Long,
            PrefValue::Str(_) => ValueKind::Str,
        }
    }
}

impl fmt::Display for PrefValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrefValue::Bool(b) => write!(f, "{}", b),
            PrefValue::Long(v) => write!(f, "{}", v),
            PrefValue::Str(s) => f.write_str(s),
        }
    }
}

/// Flat key-value store shared between the application layer and the
/// native components. Every read and write touches a single key; callers
/// must not assume two keys were written together.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Option<PrefValue>;

    fn put(&self, key: &str, value: PrefValue) -> Result<()>;

    /// Snapshot of all entries, used by renderers that scan for key patterns.
    fn entries(&self) -> Vec<(String, PrefValue)>;

    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// A value of the wrong type reads as `default`.
    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(PrefValue::Bool(b)) => b,
            _ => default,
        }
    }

    fn get_long(&self, key: &str, default: i64) -> i64 {
        match self.get(key) {
            Some(PrefValue::Long(v)) => v,
            _ => default,
        }
    }

    fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key) {
            Some(PrefValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    fn put_bool(&self, key: &str, value: bool) -> Result<()> {
        self.put(key, PrefValue::Bool(value))
    }

    fn put_long(&self, key: &str, value: i64) -> Result<()> {
        self.put(key, PrefValue::Long(value))
    }

    fn put_string(&self, key: &str, value: &str) -> Result<()> {
        self.put(key, PrefValue::Str(value.to_string()))
    }

    /// Writes each pair on its own; a failure part-way leaves earlier pairs written.
    fn put_strings(&self, values: &BTreeMap<String, String>) -> Result<()> {
        for (key, value) in values {
            self.put_string(key, value)?;
        }
        Ok(())
    }
}

pub type SharedPrefs = Arc<dyn PreferenceStore>;

fn check_schema(key: &str, value: &PrefValue) -> Result<()> {
    if let Some(expected) = keys::expected_kind(key) {
        if expected != value.kind() {
            bail!(
                "preference {} expects {:?} but got {:?}",
                key,
                expected,
                value.kind()
            );
        }
    }
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-process store. Lives as long as the value does.
#[derive(Debug, Default)]
pub struct MemoryPrefs {
    values: Mutex<BTreeMap<String, PrefValue>>,
}

impl MemoryPrefs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedPrefs {
        Arc::new(Self::new())
    }
}

impl PreferenceStore for MemoryPrefs {
    fn get(&self, key: &str) -> Option<PrefValue> {
        lock(&self.values).get(key).cloned()
    }

    fn put(&self, key: &str, value: PrefValue) -> Result<()> {
        check_schema(key, &value)?;
        lock(&self.values).insert(key.to_string(), value);
        Ok(())
    }

    fn entries(&self) -> Vec<(String, PrefValue)> {
        lock(&self.values)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// JSON-file backed store. The whole file is rewritten on every put through a
/// temporary sibling and a rename, so readers never see a half-written file.
#[derive(Debug)]
pub struct FilePrefs {
    path: PathBuf,
    values: Mutex<BTreeMap<String, PrefValue>>,
}

impl FilePrefs {
    pub fn open(path: &Path) -> Result<Self> {
        let values = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read preferences from {}", path.display()))?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                match serde_json::from_str::<BTreeMap<String, PrefValue>>(&content) {
                    Ok(values) => values,
                    Err(e) => {
                        warn!(
                            "Preferences file {} is corrupt ({}), starting empty",
                            path.display(),
                            e
                        );
                        BTreeMap::new()
                    }
                }
            }
        } else {
            info!("Preferences file {} not found, starting empty", path.display());
            BTreeMap::new()
        };

        debug!("Loaded {} preferences from {}", values.len(), path.display());
        Ok(Self {
            path: path.to_path_buf(),
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, values: &BTreeMap<String, PrefValue>) -> Result<()> {
        let content = serde_json::to_string_pretty(values)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .with_context(|| format!("Failed to write preferences to {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

impl PreferenceStore for FilePrefs {
    fn get(&self, key: &str) -> Option<PrefValue> {
        lock(&self.values).get(key).cloned()
    }

    fn put(&self, key: &str, value: PrefValue) -> Result<()> {
        check_schema(key, &value)?;
        let mut values = lock(&self.values);
        values.insert(key.to_string(), value);
        self.flush(&values)
    }

    fn entries(&self) -> Vec<(String, PrefValue)> {
        lock(&self.values)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_type_reads_default() {
        let prefs = MemoryPrefs::new();
        prefs.put_string("some_flag", "yes").unwrap();
        assert!(!prefs.get_bool("some_flag", false));
        assert_eq!(prefs.get_long("some_flag", 7), 7);
        assert_eq!(prefs.get_string("some_flag").as_deref(), Some("yes"));
    }

    #[test]
    fn schema_rejects_mismatched_type() {
        let prefs = MemoryPrefs::new();
        assert!(prefs.put_string(keys::WATCHDOG_INTERVAL_MINUTES, "5").is_err());
        assert!(prefs.put_long(keys::WATCHDOG_INTERVAL_MINUTES, 5).is_ok());
        assert_eq!(prefs.get_long(keys::WATCHDOG_INTERVAL_MINUTES, 1), 5);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");

        let prefs = FilePrefs::open(&path).unwrap();
        prefs.put_long(keys::LAST_HEARTBEAT_MS, 1_700_000_000_000).unwrap();
        prefs.put_string("last_place_name", "Bandung").unwrap();
        prefs.put_bool(keys::JOB_REQUIRE_BATTERY_NOT_LOW, true).unwrap();
        drop(prefs);

        let reopened = FilePrefs::open(&path).unwrap();
        assert_eq!(reopened.get_long(keys::LAST_HEARTBEAT_MS, 0), 1_700_000_000_000);
        assert_eq!(reopened.get_string("last_place_name").as_deref(), Some("Bandung"));
        assert!(reopened.get_bool(keys::JOB_REQUIRE_BATTERY_NOT_LOW, false));
    }

    #[test]
    fn corrupt_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        fs::write(&path, "{not json").unwrap();

        let prefs = FilePrefs::open(&path).unwrap();
        assert!(prefs.entries().is_empty());
        assert_eq!(prefs.get_long(keys::LAST_HEARTBEAT_MS, 0), 0);
    }
}
