use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::core::FrameShape;

/// Failure conditions raised by the acquisition pipeline.
///
/// None of these are fatal to the process; everything is scoped to the
/// current run.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("parameter vector has {actual} values, expected {expected}")]
    InvalidParameterVector { expected: usize, actual: usize },

    #[error("unknown parameter series: {0}")]
    UnknownParameter(String),

    #[error("reference shape {expected} does not match frame shape {actual}")]
    IncompatibleReferenceShape {
        expected: FrameShape,
        actual: FrameShape,
    },

    #[error("correction mode requires a reference frame but none is loaded")]
    MissingReference,

    #[error("frame shape {actual} does not match run shape {expected}")]
    FrameShapeMismatch {
        expected: FrameShape,
        actual: FrameShape,
    },

    #[error("axis has {actual} points, expected {expected}")]
    AxisLengthMismatch { expected: usize, actual: usize },

    #[error("store not initialized: {0}")]
    StoreNotInitialized(String),

    #[error("persist failure: {0}")]
    PersistFailure(String),

    #[error("stale temporary store {path:?} could not be removed: {reason}")]
    StaleTempFile { path: PathBuf, reason: String },

    #[error("persist worker is not running")]
    WorkerUnavailable,

    #[error("persist worker did not acknowledge within {0:?}")]
    SaveTimeout(Duration),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AcquisitionError {
    /// Wraps any error chain as a `PersistFailure`, keeping the full context.
    pub fn persist(err: &anyhow::Error) -> Self {
        Self::PersistFailure(format!("{:#}", err))
    }
}
