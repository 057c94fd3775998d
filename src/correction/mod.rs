use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::core::Frame;
use crate::error::AcquisitionError;

/// Per-frame transform applied before a frame enters the working set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionMode {
    #[default]
    None,
    /// `frame - reference`
    SubtractReference,
    /// `frame / reference` (ratio, transmission)
    DivideByReference,
    /// `-log10(frame / reference)` with the ratio floored
    Absorbance,
}

impl CorrectionMode {
    pub fn needs_reference(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Holds the run's reference frame and applies the selected correction.
///
/// A failing correction degrades to pass-through: the active mode drops to
/// `None` until a new mode or reference is supplied.
#[derive(Debug, Clone)]
pub struct CorrectionPipeline {
    requested: CorrectionMode,
    active: CorrectionMode,
    reference: Option<Frame>,
    floor: f64,
}

impl CorrectionPipeline {
    pub fn new(mode: CorrectionMode, absorbance_floor: f64) -> Self {
        Self {
            requested: mode,
            active: mode,
            reference: None,
            floor: absorbance_floor,
        }
    }

    /// Mode currently applied to frames
    pub fn mode(&self) -> CorrectionMode {
        self.active
    }

    pub fn requested_mode(&self) -> CorrectionMode {
        self.requested
    }

    pub fn set_mode(&mut self, mode: CorrectionMode) {
        self.requested = mode;
        self.active = mode;
    }

    pub fn reference(&self) -> Option<&Frame> {
        self.reference.as_ref()
    }

    /// Installs a reference and re-arms the requested mode
    pub fn set_reference(&mut self, reference: Frame) {
        self.reference = Some(reference);
        self.active = self.requested;
    }

    pub fn clear_reference(&mut self) {
        self.reference = None;
    }

    /// Reads a reference from a headerless CSV file and installs it
    pub fn load_reference(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let reference = read_reference(path.as_ref())?;
        info!(shape = %reference.shape(), path = ?path.as_ref(), "loaded reference frame");
        self.set_reference(reference);
        Ok(())
    }

    /// Corrects a frame, falling back to pass-through on failure
    pub fn apply(&mut self, frame: Frame) -> Frame {
        match self.try_apply(&frame) {
            Ok(Some(corrected)) => corrected,
            Ok(None) => frame,
            Err(e) => {
                warn!(error = %e, mode = ?self.active, "correction disabled, passing frames through");
                self.active = CorrectionMode::None;
                frame
            }
        }
    }

    /// Corrected frame, or `None` when the active mode is pass-through
    pub fn try_apply(&self, frame: &Frame) -> Result<Option<Frame>, AcquisitionError> {
        if self.active == CorrectionMode::None {
            return Ok(None);
        }
        let reference = self
            .reference
            .as_ref()
            .ok_or(AcquisitionError::MissingReference)?;
        let mismatch = || AcquisitionError::IncompatibleReferenceShape {
            expected: reference.shape(),
            actual: frame.shape(),
        };

        let floor = self.floor;
        let corrected = match self.active {
            CorrectionMode::None => None,
            CorrectionMode::SubtractReference => frame.zip_map(reference, |f, r| f - r),
            CorrectionMode::DivideByReference => frame.zip_map(reference, |f, r| f / r),
            CorrectionMode::Absorbance => frame.zip_map(reference, |f, r| {
                let ratio = f / r;
                // NaN compares false, so 0/0 is floored too
                let ratio = if ratio > 0.0 { ratio } else { floor };
                -ratio.log10()
            }),
        };
        corrected.ok_or_else(mismatch).map(Some)
    }
}

/// One CSV row gives a spectrum, several rows give an image
pub fn read_reference(path: &Path) -> Result<Frame> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .context(format!("Failed to open reference {:?}", path))?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.context("Malformed reference row")?;
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }
        let row = record
            .iter()
            .map(|field| field.parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Reference contains a non-numeric value")?;
        rows.push(row);
    }

    match rows.len() {
        0 => anyhow::bail!("reference file {:?} is empty", path),
        1 => Ok(Frame::spectrum(rows.remove(0))),
        _ => Frame::from_rows(rows),
    }
}
