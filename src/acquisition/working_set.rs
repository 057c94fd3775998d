use std::mem;

use crate::core::{Block, Frame, FrameShape};
use crate::error::AcquisitionError;

/// Frames acquired since the last flush, with their parameter snapshots.
///
/// The snapshot matrix has one row per series and one column per frame;
/// its column count always equals the number of buffered frames.
pub struct WorkingSet {
    shape: FrameShape,
    frames: Vec<f64>,
    parameters: Vec<Vec<f64>>,
}

impl WorkingSet {
    pub fn new(shape: FrameShape, parameter_rows: usize) -> Self {
        Self {
            shape,
            frames: Vec::new(),
            parameters: vec![Vec::new(); parameter_rows],
        }
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.parameters.first().map(|row| row.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&mut self, frame: &Frame, snapshot: &[f64]) -> Result<(), AcquisitionError> {
        if frame.shape() != self.shape {
            return Err(AcquisitionError::FrameShapeMismatch {
                expected: self.shape,
                actual: frame.shape(),
            });
        }
        if snapshot.len() != self.parameters.len() {
            return Err(AcquisitionError::InvalidParameterVector {
                expected: self.parameters.len(),
                actual: snapshot.len(),
            });
        }

        self.frames.extend_from_slice(frame.data());
        for (row, &value) in self.parameters.iter_mut().zip(snapshot) {
            row.push(value);
        }
        Ok(())
    }

    /// Hands the buffered frames over as a block and leaves the set empty
    pub fn take_block(&mut self) -> Block {
        let rows = self.parameters.len();
        Block {
            shape: self.shape,
            frames: mem::take(&mut self.frames),
            parameters: mem::replace(&mut self.parameters, vec![Vec::new(); rows]),
        }
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        for row in self.parameters.iter_mut() {
            row.clear();
        }
    }
}

/// Maximum of a frame and its axis position.
///
/// For images the flattened index is mapped back through its column.
/// Falls back to the column index when the axis is shorter than the frame.
pub fn frame_maximum(frame: &Frame, axis: &[f64]) -> Option<(f64, f64)> {
    let (index, value) = frame.argmax()?;
    let column = index % frame.shape().len();
    let position = axis.get(column).copied().unwrap_or(column as f64);
    Some((value, position))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maximum_spectrum() {
        let frame = Frame::spectrum(vec![1.0, 5.0, 3.0]);
        assert_eq!(
            frame_maximum(&frame, &[100.0, 200.0, 300.0]),
            Some((5.0, 200.0))
        );
    }

    #[test]
    fn test_maximum_image_uses_column() {
        let frame = Frame::image(2, 3, vec![0.0, 1.0, 2.0, 3.0, 9.0, 4.0]).unwrap();
        assert_eq!(
            frame_maximum(&frame, &[10.0, 20.0, 30.0]),
            Some((9.0, 20.0))
        );
    }

    #[test]
    fn test_push_keeps_columns_aligned() {
        let mut set = WorkingSet::new(FrameShape::Spectrum { len: 2 }, 3);
        set.push(&Frame::spectrum(vec![1.0, 2.0]), &[0.0, 1.0, 2.0]).unwrap();
        set.push(&Frame::spectrum(vec![3.0, 4.0]), &[0.1, 1.1, 2.1]).unwrap();

        assert!(set.push(&Frame::spectrum(vec![1.0]), &[0.0, 0.0, 0.0]).is_err());
        assert!(set.push(&Frame::spectrum(vec![1.0, 2.0]), &[0.0]).is_err());
        assert_eq!(set.len(), 2);

        let block = set.take_block();
        assert_eq!(block.frame_count(), 2);
        assert_eq!(block.parameters[2], vec![2.0, 2.1]);
        assert!(set.is_empty());
        assert_eq!(set.take_block().parameter_rows(), 3);
    }
}
