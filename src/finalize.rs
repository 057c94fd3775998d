use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::AcquisitionError;
use crate::history::{HistoryDump, ParameterHistory};
use crate::persist::PersistHandle;

/// Files produced by a successful save
#[derive(Debug, Clone, PartialEq)]
pub struct SaveReport {
    pub store_path: PathBuf,
    pub parameters_csv: PathBuf,
    pub parameters_json: PathBuf,
    pub frames: usize,
}

/// `HH_MM_SS` suffix shared by every file of one save
pub fn timestamp_suffix(now: DateTime<Local>) -> String {
    now.format("%H_%M_%S").to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputNames {
    pub store: PathBuf,
    pub parameters_csv: PathBuf,
    pub parameters_json: PathBuf,
}

pub fn output_names(dir: &Path, base: &str, stamp: &str, extension: &str) -> OutputNames {
    OutputNames {
        store: dir.join(format!("{}_{}.{}", base, stamp, extension)),
        parameters_csv: dir.join(format!("{}_{}_parameters.csv", base, stamp)),
        parameters_json: dir.join(format!("{}_{}_parameters.json", base, stamp)),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SeriesRecord {
    name: String,
    values: Vec<f64>,
}

/// Structured parameter dump
#[derive(Debug, Serialize, Deserialize)]
struct ParameterFile {
    parameter_keys: Vec<String>,
    series: Vec<SeriesRecord>,
}

/// One column per series; shorter series leave trailing cells blank
pub fn write_parameter_table(path: &Path, dump: &HistoryDump) -> Result<()> {
    let file = File::create(path).context(format!("Failed to create {:?}", path))?;
    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(&dump.names)?;

    let rows = dump.series.iter().map(|s| s.len()).max().unwrap_or(0);
    for i in 0..rows {
        let record = dump
            .series
            .iter()
            .map(|s| s.get(i).map(|v| v.to_string()).unwrap_or_default());
        writer.write_record(record)?;
    }
    writer
        .flush()
        .context(format!("Failed to write {:?}", path))?;
    Ok(())
}

pub fn write_parameter_json(path: &Path, dump: &HistoryDump) -> Result<()> {
    let file = ParameterFile {
        parameter_keys: dump.parameter_keys().to_vec(),
        series: dump
            .names
            .iter()
            .zip(&dump.series)
            .map(|(name, values)| SeriesRecord {
                name: name.clone(),
                values: values.clone(),
            })
            .collect(),
    };
    let json = serde_json::to_string(&file).context("Failed to serialize parameter dump")?;
    fs::write(path, json).context(format!("Failed to write {:?}", path))?;
    Ok(())
}

pub fn read_parameter_json(path: &Path) -> Result<HistoryDump> {
    let json = fs::read_to_string(path).context(format!("Failed to read {:?}", path))?;
    let file: ParameterFile =
        serde_json::from_str(&json).context("Failed to deserialize parameter dump")?;
    let (names, series): (Vec<String>, Vec<Vec<f64>>) = file
        .series
        .into_iter()
        .map(|record| (record.name, record.values))
        .unzip();
    Ok(HistoryDump { names, series })
}

/// Turns the working store into the named output files
pub struct Finalizer<'a> {
    pub persist: &'a PersistHandle,
    pub history: &'a ParameterHistory,
    pub output_dir: &'a Path,
    pub extension: &'static str,
    pub timeout: Duration,
}

impl Finalizer<'_> {
    /// Expects the caller to have posted its partial block already.
    /// The working store is never removed, so a failed save can be retried.
    pub fn finalize(&self, base: &str, comments: &str) -> Result<SaveReport, AcquisitionError> {
        fs::create_dir_all(self.output_dir).map_err(|e| {
            AcquisitionError::PersistFailure(format!(
                "failed to create output directory {:?}: {}",
                self.output_dir, e
            ))
        })?;

        let stamp = timestamp_suffix(Local::now());
        let names = output_names(self.output_dir, base, &stamp, self.extension);

        // the worker applies every earlier flush before answering
        let frames = self
            .persist
            .finalize(comments.to_string(), names.store.clone(), self.timeout)?;

        let dump = self.history.dump();
        write_parameter_table(&names.parameters_csv, &dump)
            .map_err(|e| AcquisitionError::persist(&e))?;
        write_parameter_json(&names.parameters_json, &dump)
            .map_err(|e| AcquisitionError::persist(&e))?;

        info!(store = ?names.store, frames, "run saved");
        Ok(SaveReport {
            store_path: names.store,
            parameters_csv: names.parameters_csv,
            parameters_json: names.parameters_json,
            frames,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dump() -> HistoryDump {
        HistoryDump {
            names: vec!["time".into(), "absolute_time".into(), "temp".into()],
            series: vec![vec![0.0, 1.0], vec![100.0, 101.0], vec![21.5]],
        }
    }

    #[test]
    fn test_output_names() {
        let now = Local.with_ymd_and_hms(2024, 3, 1, 9, 5, 7).unwrap();
        let stamp = timestamp_suffix(now);
        assert_eq!(stamp, "09_05_07");

        let names = output_names(Path::new("/data"), "sample", &stamp, "sps");
        assert_eq!(names.store, PathBuf::from("/data/sample_09_05_07.sps"));
        assert_eq!(
            names.parameters_csv,
            PathBuf::from("/data/sample_09_05_07_parameters.csv")
        );
        assert_eq!(
            names.parameters_json,
            PathBuf::from("/data/sample_09_05_07_parameters.json")
        );
    }

    #[test]
    fn test_parameter_table_ragged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.csv");
        write_parameter_table(&path, &dump()).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "time,absolute_time,temp");
        assert_eq!(lines[1], "0,100,21.5");
        assert_eq!(lines[2], "1,101,");
    }

    #[test]
    fn test_parameter_json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.json");
        write_parameter_json(&path, &dump()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["parameter_keys"], serde_json::json!(["temp"]));

        assert_eq!(read_parameter_json(&path).unwrap(), dump());
    }
}
