pub mod reader;
pub mod structured;
pub mod tabular;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::{Block, FrameShape};

pub use reader::StoreReader;
pub use structured::StructuredStore;
pub use tabular::{read_table, TabularStore, TabularTable};

/// Everything a store needs to know before the first block arrives
#[derive(Debug, Clone, PartialEq)]
pub struct StoreLayout {
    pub shape: FrameShape,
    /// Tracked parameter names; `time` and `absolute_time` are implicit
    pub parameter_keys: Vec<String>,
    pub axis: Vec<f64>,
}

impl StoreLayout {
    /// Rows of the snapshot matrix
    pub fn parameter_rows(&self) -> usize {
        self.parameter_keys.len() + 2
    }
}

/// Growable on-disk container for one run.
///
/// Only the frame-count dimension grows; the per-frame shape and the
/// snapshot width are fixed when the store is created.
pub trait PersistentStore: Send {
    fn path(&self) -> &Path;

    fn frame_count(&self) -> usize;

    /// Appends a block at the tail of both datasets
    fn append(&mut self, block: &Block) -> Result<()>;

    /// Replaces the stored axis; only the latest axis is kept
    fn set_axis(&mut self, axis: &[f64]) -> Result<()>;

    fn set_comments(&mut self, comments: &str) -> Result<()>;

    /// Writes the final output to `destination`, leaving the working store usable
    fn export(&mut self, destination: &Path) -> Result<()>;
}

/// On-disk format selected at run configuration time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Structured,
    Tabular,
}

impl StoreBackend {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Structured => structured::EXTENSION,
            Self::Tabular => tabular::EXTENSION,
        }
    }

    /// Creates an empty store at `path`, truncating anything already there
    pub fn create(
        &self,
        path: &Path,
        layout: &StoreLayout,
        transpose_batch: usize,
    ) -> Result<Box<dyn PersistentStore>> {
        Ok(match self {
            Self::Structured => Box::new(StructuredStore::create(path, layout)?),
            Self::Tabular => Box::new(TabularStore::create(path, layout, transpose_batch)?),
        })
    }
}

/// Error raised when a store is used without being (re)created
pub(crate) fn not_initialized(reason: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(crate::error::AcquisitionError::StoreNotInitialized(
        reason.into(),
    ))
}

/// Rejects blocks that would change the per-frame shape or snapshot width
pub(crate) fn check_block(
    path: &Path,
    shape: FrameShape,
    parameter_rows: usize,
    block: &Block,
) -> Result<()> {
    if !path.exists() {
        return Err(not_initialized(format!("{:?} does not exist", path)));
    }
    if block.shape != shape {
        return Err(not_initialized(format!(
            "block shape {} does not match store shape {}",
            block.shape, shape
        )));
    }
    if block.parameter_rows() != parameter_rows {
        return Err(not_initialized(format!(
            "block carries {} parameter rows, store has {}",
            block.parameter_rows(),
            parameter_rows
        )));
    }
    Ok(())
}
