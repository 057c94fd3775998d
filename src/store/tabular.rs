//! CSV frame store.
//!
//! The working file is row-major: one row per frame, the snapshot values
//! first, then the frame's pixels. The exported file is column-major: one
//! row per working-file column, labelled with the series name or axis value.
//! The transpose reads the working file once per batch of columns so memory
//! stays bounded by `transpose_batch * frame_count`.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{check_block, PersistentStore, StoreLayout};
use crate::core::{Block, FrameShape, ABSOLUTE_TIME_SERIES, TIME_SERIES};

pub const EXTENSION: &str = "csv";
const KEYS_PREFIX: &str = "# parameter_keys: ";
const COMMENT_PREFIX: &str = "# ";

/// Tabular backend
pub struct TabularStore {
    path: PathBuf,
    shape: FrameShape,
    parameter_keys: Vec<String>,
    axis: Vec<f64>,
    comments: String,
    frame_count: usize,
    transpose_batch: usize,
}

impl TabularStore {
    pub fn create(path: &Path, layout: &StoreLayout, transpose_batch: usize) -> Result<Self> {
        let file = File::create(path).context(format!("Failed to create store at {:?}", path))?;
        let mut writer = csv::Writer::from_writer(file);

        let mut header = vec![TIME_SERIES.to_string(), ABSOLUTE_TIME_SERIES.to_string()];
        header.extend(layout.parameter_keys.iter().cloned());
        for row in 0..layout.shape.rows() {
            for px in 0..layout.shape.len() {
                header.push(format!("r{}_px{}", row, px));
            }
        }
        writer.write_record(&header)?;
        writer.flush()?;
        debug!(path = ?path, shape = %layout.shape, "created tabular store");

        Ok(Self {
            path: path.to_path_buf(),
            shape: layout.shape,
            parameter_keys: layout.parameter_keys.clone(),
            axis: layout.axis.clone(),
            comments: String::new(),
            frame_count: 0,
            transpose_batch: transpose_batch.max(1),
        })
    }

    fn column_count(&self) -> usize {
        self.parameter_keys.len() + 2 + self.shape.size()
    }

    /// Label of each working-file column in the exported file
    fn column_labels(&self) -> Vec<String> {
        let mut labels = vec![TIME_SERIES.to_string(), ABSOLUTE_TIME_SERIES.to_string()];
        labels.extend(self.parameter_keys.iter().cloned());
        let len = self.shape.len();
        for row in 0..self.shape.rows() {
            for px in 0..len {
                let position = if self.axis.len() == len {
                    self.axis[px].to_string()
                } else {
                    px.to_string()
                };
                labels.push(match self.shape {
                    FrameShape::Spectrum { .. } => position,
                    FrameShape::Image { .. } => format!("{}:{}", row, position),
                });
            }
        }
        labels
    }
}

impl PersistentStore for TabularStore {
    fn path(&self) -> &Path {
        &self.path
    }

    fn frame_count(&self) -> usize {
        self.frame_count
    }

    fn append(&mut self, block: &Block) -> Result<()> {
        check_block(&self.path, self.shape, self.parameter_keys.len() + 2, block)?;

        let count = block.frame_count();
        append_or_rollback(&self.path, |file| write_rows(file, block))
            .context(format!("Failed to append {} frames", count))?;
        self.frame_count += count;
        Ok(())
    }

    fn set_axis(&mut self, axis: &[f64]) -> Result<()> {
        self.axis = axis.to_vec();
        Ok(())
    }

    fn set_comments(&mut self, comments: &str) -> Result<()> {
        self.comments = comments.to_string();
        Ok(())
    }

    fn export(&mut self, destination: &Path) -> Result<()> {
        let out = File::create(destination)
            .context(format!("Failed to create {:?}", destination))?;
        let mut out = BufWriter::new(out);
        writeln!(out, "{}{}", KEYS_PREFIX, self.parameter_keys.join(";"))?;
        for line in self.comments.lines() {
            writeln!(out, "{}{}", COMMENT_PREFIX, line)?;
        }

        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(out);
        let labels = self.column_labels();
        let columns = self.column_count();

        let mut start = 0;
        while start < columns {
            let end = (start + self.transpose_batch).min(columns);
            let mut batch: Vec<Vec<String>> = vec![Vec::with_capacity(self.frame_count); end - start];

            let mut reader = csv::Reader::from_path(&self.path)
                .context(format!("Failed to read {:?}", self.path))?;
            for record in reader.records() {
                let record = record?;
                for (column, values) in (start..end).zip(batch.iter_mut()) {
                    values.push(record.get(column).unwrap_or("").to_string());
                }
            }

            for (label, values) in labels[start..end].iter().zip(batch) {
                writer.write_record(std::iter::once(label.clone()).chain(values))?;
            }
            start = end;
        }

        writer
            .flush()
            .context(format!("Failed to write {:?}", destination))?;
        Ok(())
    }
}

/// Runs `write` on the working file opened for append. On failure the file
/// is cut back to its previous length so a retried block is not duplicated.
fn append_or_rollback(path: &Path, write: impl FnOnce(&mut File) -> Result<()>) -> Result<()> {
    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .context(format!("Failed to open {:?} for append", path))?;
    let committed = file.metadata()?.len();

    if let Err(e) = write(&mut file) {
        if let Err(truncate) = file.set_len(committed) {
            warn!(path = ?path, error = %truncate, "partial rows left in working store");
        }
        return Err(e);
    }
    Ok(())
}

fn write_rows(file: &mut File, block: &Block) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    for i in 0..block.frame_count() {
        let record = block
            .snapshot(i)
            .into_iter()
            .chain(block.frame(i).iter().copied())
            .map(|v| v.to_string());
        writer.write_record(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Contents of an exported tabular file
#[derive(Debug, Clone, PartialEq)]
pub struct TabularTable {
    pub parameter_keys: Vec<String>,
    pub comments: String,
    /// `(label, values across frames)` in column order of the working file
    pub columns: Vec<(String, Vec<f64>)>,
}

pub fn read_table(path: impl AsRef<Path>) -> Result<TabularTable> {
    let path = path.as_ref();
    let file = File::open(path).context(format!("Failed to open {:?}", path))?;

    let mut parameter_keys = Vec::new();
    let mut comments = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if let Some(keys) = line.strip_prefix(KEYS_PREFIX) {
            parameter_keys = keys
                .split(';')
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect();
        } else if let Some(comment) = line.strip_prefix(COMMENT_PREFIX) {
            comments.push(comment.to_string());
        } else {
            break;
        }
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_path(path)?;
    let mut columns = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut fields = record.iter();
        let label = fields.next().unwrap_or("").to_string();
        let values = fields
            .map(|f| f.parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .context(format!("Non-numeric value in column {}", label))?;
        columns.push((label, values));
    }

    Ok(TabularTable {
        parameter_keys,
        comments: comments.join("\n"),
        columns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> StoreLayout {
        StoreLayout {
            shape: FrameShape::Spectrum { len: 3 },
            parameter_keys: vec!["temp".into()],
            axis: vec![400.0, 450.0, 500.0],
        }
    }

    fn block(offset: f64) -> Block {
        Block {
            shape: FrameShape::Spectrum { len: 3 },
            frames: vec![offset, offset + 1.0, offset + 2.0],
            parameters: vec![vec![offset], vec![1000.0 + offset], vec![20.0]],
        }
    }

    #[test]
    fn test_export_transposes_in_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");
        // batch of 2 forces three passes over six columns
        let mut store = TabularStore::create(&path, &layout(), 2).unwrap();
        store.append(&block(0.0)).unwrap();
        store.append(&block(10.0)).unwrap();
        store.set_comments("line one\nline two").unwrap();

        let out = dir.path().join("final.csv");
        store.export(&out).unwrap();

        let table = read_table(&out).unwrap();
        assert_eq!(table.parameter_keys, vec!["temp".to_string()]);
        assert_eq!(table.comments, "line one\nline two");
        assert_eq!(table.columns.len(), 6);
        assert_eq!(table.columns[0], ("time".to_string(), vec![0.0, 10.0]));
        assert_eq!(table.columns[2], ("temp".to_string(), vec![20.0, 20.0]));
        assert_eq!(table.columns[4], ("450".to_string(), vec![1.0, 11.0]));

        // working file is untouched and still appendable
        store.append(&block(20.0)).unwrap();
        assert_eq!(store.frame_count(), 3);
    }

    #[test]
    fn test_append_after_delete_is_not_initialized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");
        let mut store = TabularStore::create(&path, &layout(), 16).unwrap();
        std::fs::remove_file(&path).unwrap();

        let err = store.append(&block(0.0)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<crate::error::AcquisitionError>(),
            Some(crate::error::AcquisitionError::StoreNotInitialized(_))
        ));
    }

    #[test]
    fn test_failed_append_leaves_no_partial_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");
        let mut store = TabularStore::create(&path, &layout(), 16).unwrap();
        store.append(&block(0.0)).unwrap();
        let committed = std::fs::read_to_string(&path).unwrap();

        // rows reach the file, then the write reports an error
        let err = append_or_rollback(&path, |file| {
            write_rows(file, &block(10.0))?;
            anyhow::bail!("no space left on device")
        });
        assert!(err.is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), committed);

        // the retried block is written exactly once
        store.append(&block(10.0)).unwrap();
        let out = dir.path().join("final.csv");
        store.export(&out).unwrap();
        let table = read_table(&out).unwrap();
        assert_eq!(store.frame_count(), 2);
        assert_eq!(table.columns[0], ("time".to_string(), vec![0.0, 10.0]));
    }
}
