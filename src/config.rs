use std::path::PathBuf;

use crate::limits::MAX_HORIZON_DAYS;

/// Runtime settings, read from `SLOTBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// Journal appends that trigger a background compaction.
    pub compact_threshold: u64,
    /// Longest date range a single pattern may be expanded over.
    pub horizon_days: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            horizon_days: MAX_HORIZON_DAYS,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unparsable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: lookup("SLOTBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: lookup("SLOTBOOK_METRICS_PORT").and_then(|s| s.parse().ok()),
            compact_threshold: lookup("SLOTBOOK_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.compact_threshold),
            horizon_days: lookup("SLOTBOOK_HORIZON_DAYS")
                .and_then(|s| s.parse::<i64>().ok())
                .filter(|d| *d > 0)
                .map(|d| d.min(MAX_HORIZON_DAYS))
                .unwrap_or(defaults.horizon_days),
        }
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("slotbook.wal")
    }
}
