use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use revtrace_engine::DetectorConfig;

use crate::Result;

/// Runtime configuration: TOML file plus environment overrides.
/// `REVTRACE_CONFIG` points at the file; `REVTRACE_DATABASE_PATH` and
/// `REVTRACE_BIND_ADDR` override individual knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    pub bind_addr: String,
    /// Ingest worker pool size; work is partitioned by (org, source)
    pub worker_count: usize,
    /// Scheduler wakeup cadence, seconds (per-detector intervals gate actual scans)
    pub scheduler_tick_secs: u64,
    pub raw_log_retention_days: i64,
    /// Unresolved access checks older than this are dropped
    pub access_check_ttl_hours: i64,
    /// Per-event processing deadline, seconds
    pub event_timeout_secs: u64,
    /// Scheduled-scan deadline, seconds
    pub scan_timeout_secs: u64,
    /// Transient-failure retry budget per delivery
    pub max_delivery_attempts: i64,
    pub detectors: DetectorTuning,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorTuning {
    /// product_id → family overrides for cross-platform matching
    pub product_aliases: HashMap<String, String>,
    pub grace_window_hours: Option<i64>,
    /// Per-source grace overrides, keyed by source string
    pub grace_window_overrides: HashMap<String, i64>,
    pub tier2_auto_resolve_hours: Option<i64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("revtrace.db"),
            bind_addr: "127.0.0.1:8080".to_string(),
            worker_count: 4,
            scheduler_tick_secs: 30,
            raw_log_retention_days: 30,
            access_check_ttl_hours: 72,
            event_timeout_secs: 30,
            scan_timeout_secs: 300,
            max_delivery_attempts: 5,
            detectors: DetectorTuning::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = std::env::var("REVTRACE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("revtrace.toml"));
        let mut config = Self::load_from(&path)?;
        config.apply_env();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("REVTRACE_DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Ok(addr) = std::env::var("REVTRACE_BIND_ADDR") {
            self.bind_addr = addr;
        }
    }

    /// Fold file-level tuning into the engine's detector config
    pub fn detector_config(&self) -> DetectorConfig {
        let mut config = DetectorConfig {
            product_aliases: self.detectors.product_aliases.clone(),
            grace_window_overrides: self.detectors.grace_window_overrides.clone(),
            ..DetectorConfig::default()
        };
        if let Some(hours) = self.detectors.grace_window_hours {
            config.grace_window_hours = hours;
        }
        if let Some(hours) = self.detectors.tier2_auto_resolve_hours {
            config.tier2_auto_resolve_hours = hours;
        }
        config
    }
}
