use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shape family of a detector, fixed for the whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameShape {
    /// Point detector: one spectrum of `len` pixels
    Spectrum { len: usize },
    /// Multi-track or imaging detector: `rows` tracks of `len` pixels
    Image { rows: usize, len: usize },
}

impl FrameShape {
    pub fn rows(&self) -> usize {
        match self {
            Self::Spectrum { .. } => 1,
            Self::Image { rows, .. } => *rows,
        }
    }

    /// Pixels along the axis dimension
    pub fn len(&self) -> usize {
        match self {
            Self::Spectrum { len } | Self::Image { len, .. } => *len,
        }
    }

    /// Total number of values in one frame
    pub fn size(&self) -> usize {
        self.rows() * self.len()
    }

    pub fn ndim(&self) -> usize {
        match self {
            Self::Spectrum { .. } => 1,
            Self::Image { .. } => 2,
        }
    }

    pub fn dims(&self) -> Vec<usize> {
        match self {
            Self::Spectrum { len } => vec![*len],
            Self::Image { rows, len } => vec![*rows, *len],
        }
    }

    pub fn from_dims(dims: &[usize]) -> Result<Self> {
        match dims {
            [len] => Ok(Self::Spectrum { len: *len }),
            [rows, len] => Ok(Self::Image {
                rows: *rows,
                len: *len,
            }),
            other => bail!("unsupported frame rank {}", other.len()),
        }
    }
}

impl fmt::Display for FrameShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spectrum { len } => write!(f, "[{}]", len),
            Self::Image { rows, len } => write!(f, "[{}, {}]", rows, len),
        }
    }
}

/// One acquired measurement, stored row-major
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    shape: FrameShape,
    data: Vec<f64>,
}

impl Frame {
    pub fn spectrum(data: Vec<f64>) -> Self {
        Self {
            shape: FrameShape::Spectrum { len: data.len() },
            data,
        }
    }

    pub fn image(rows: usize, len: usize, data: Vec<f64>) -> Result<Self> {
        Self::with_shape(FrameShape::Image { rows, len }, data)
    }

    pub fn with_shape(shape: FrameShape, data: Vec<f64>) -> Result<Self> {
        if data.len() != shape.size() {
            bail!(
                "frame of shape {} needs {} values, got {}",
                shape,
                shape.size(),
                data.len()
            );
        }
        Ok(Self { shape, data })
    }

    /// Builds an image from equally sized rows
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let len = rows.first().map(|r| r.len()).unwrap_or(0);
        if rows.iter().any(|r| r.len() != len) {
            bail!("rows have differing lengths");
        }
        let count = rows.len();
        Self::image(count, len, rows.into_iter().flatten().collect())
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    /// Element-wise combination with a frame of identical shape
    pub fn zip_map(&self, other: &Frame, f: impl Fn(f64, f64) -> f64) -> Option<Frame> {
        if self.shape != other.shape {
            return None;
        }
        let data = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(&a, &b)| f(a, b))
            .collect();
        Some(Frame {
            shape: self.shape,
            data,
        })
    }

    /// Index and value of the largest element over the flattened frame.
    /// First occurrence wins on ties; NaN values are ignored.
    pub fn argmax(&self) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (i, &v) in self.data.iter().enumerate() {
            if v.is_nan() {
                continue;
            }
            match best {
                Some((_, b)) if v <= b => {}
                _ => best = Some((i, v)),
            }
        }
        best
    }
}
