use super::FrameShape;

/// A run of consecutive frames handed from the working set to the persist worker.
///
/// `parameters` is the snapshot matrix: one row per series (`time`,
/// `absolute_time`, then the tracked parameters), one column per frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub shape: FrameShape,
    pub frames: Vec<f64>,
    pub parameters: Vec<Vec<f64>>,
}

impl Block {
    pub fn frame_count(&self) -> usize {
        let size = self.shape.size();
        if size == 0 {
            return self.parameters.first().map(|r| r.len()).unwrap_or(0);
        }
        self.frames.len() / size
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count() == 0
    }

    pub fn parameter_rows(&self) -> usize {
        self.parameters.len()
    }

    pub fn frame(&self, index: usize) -> &[f64] {
        let size = self.shape.size();
        &self.frames[index * size..(index + 1) * size]
    }

    /// Column `index` of the snapshot matrix
    pub fn snapshot(&self, index: usize) -> Vec<f64> {
        self.parameters.iter().map(|row| row[index]).collect()
    }
}
