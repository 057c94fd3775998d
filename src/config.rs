use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::correction::CorrectionMode;
use crate::error::AcquisitionError;
use crate::store::StoreBackend;

/// Correction settings applied to every incoming frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    pub mode: CorrectionMode,
    /// Smallest ratio allowed into the absorbance logarithm
    pub absorbance_floor: f64,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            mode: CorrectionMode::None,
            absorbance_floor: 0.001,
        }
    }
}

/// Run configuration for an acquisition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Frames buffered in memory before a flush is posted
    pub flush_threshold: usize,
    /// Values kept per parameter series
    pub history_capacity: usize,
    /// Latest values emitted to the live display on each update
    pub display_window: usize,
    pub backend: StoreBackend,
    /// Working store location, without extension
    pub temp_store_path: PathBuf,
    pub output_dir: PathBuf,
    pub correction: CorrectionConfig,
    pub save_timeout_ms: u64,
    /// Columns gathered per pass when transposing a tabular store
    pub transpose_batch: usize,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            flush_threshold: 50,
            history_capacity: 100_000,
            display_window: 1000,
            backend: StoreBackend::Structured,
            temp_store_path: std::env::temp_dir().join("spectrostore_working"),
            output_dir: PathBuf::from("."),
            correction: CorrectionConfig::default(),
            save_timeout_ms: 10_000,
            transpose_batch: 256,
        }
    }
}

impl AcquisitionConfig {
    pub fn from_json(config: Value) -> Result<Self> {
        let config: Self =
            serde_json::from_value(config).context("Failed to parse acquisition config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .context(format!("Failed to read config from {:?}", path))?;
        let value: Value = serde_json::from_str(&json).context("Config is not valid JSON")?;
        Self::from_json(value)
    }

    pub fn validate(&self) -> Result<(), AcquisitionError> {
        if self.flush_threshold == 0 {
            return Err(AcquisitionError::InvalidConfig(
                "flush_threshold must be at least 1".to_string(),
            ));
        }
        if self.history_capacity == 0 {
            return Err(AcquisitionError::InvalidConfig(
                "history_capacity must be at least 1".to_string(),
            ));
        }
        if self.transpose_batch == 0 {
            return Err(AcquisitionError::InvalidConfig(
                "transpose_batch must be at least 1".to_string(),
            ));
        }
        if !(self.correction.absorbance_floor > 0.0) {
            return Err(AcquisitionError::InvalidConfig(
                "absorbance_floor must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Working store path including the backend's extension
    pub fn temp_store_file(&self) -> PathBuf {
        self.temp_store_path.with_extension(self.backend.extension())
    }

    pub fn save_timeout(&self) -> Duration {
        Duration::from_millis(self.save_timeout_ms)
    }
}
