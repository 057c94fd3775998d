use anyhow::{bail, Context, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

use super::structured::{
    read_u64, Header, StoreAttributes, ATTRS_RECORD, BLOCK_RECORD, HEADER_SIZE, RECORD_PREFIX,
};
use crate::core::{Frame, FrameShape};

/// Read-only view of a structured store, memory-mapped
pub struct StoreReader {
    mmap: Mmap,
    header: Header,
    attrs: StoreAttributes,
}

impl StoreReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).context(format!("Failed to open store {:?}", path))?;
        let mmap = unsafe { Mmap::map(&file)? };

        let header = Header::decode(&mmap)?;
        let data_end = header.data_end as usize;
        let attrs_start = header.attrs_offset as usize;
        let attrs_end = attrs_start + header.attrs_len as usize;
        if data_end > mmap.len() {
            bail!("store {:?} is truncated", path);
        }
        if attrs_start < HEADER_SIZE + RECORD_PREFIX || attrs_end > data_end {
            bail!("store {:?} has no valid attribute record", path);
        }
        let attrs: StoreAttributes = serde_json::from_slice(&mmap[attrs_start..attrs_end])
            .context("Failed to decode store attributes")?;

        Ok(Self {
            mmap,
            header,
            attrs,
        })
    }

    pub fn shape(&self) -> FrameShape {
        self.header.shape
    }

    pub fn frame_count(&self) -> usize {
        self.header.frame_count
    }

    pub fn axis(&self) -> &[f64] {
        &self.attrs.xaxis
    }

    pub fn parameter_keys(&self) -> &[String] {
        &self.attrs.parameter_keys
    }

    pub fn comments(&self) -> &str {
        &self.attrs.comments
    }

    /// Frames in append order
    pub fn frames(&self) -> Result<Vec<Frame>> {
        let mut frames = Vec::with_capacity(self.frame_count());
        self.walk(|values, _| {
            frames.push(Frame::with_shape(self.header.shape, values)?);
            Ok(())
        })?;
        Ok(frames)
    }

    /// Snapshot matrix, `[parameter_rows][frame_count]`
    pub fn parameters(&self) -> Result<Vec<Vec<f64>>> {
        let mut rows = vec![Vec::with_capacity(self.frame_count()); self.header.parameter_rows];
        self.walk(|_, snapshot| {
            for (row, value) in rows.iter_mut().zip(snapshot) {
                row.push(value);
            }
            Ok(())
        })?;
        Ok(rows)
    }

    fn walk(&self, mut visit: impl FnMut(Vec<f64>, Vec<f64>) -> Result<()>) -> Result<()> {
        let size = self.header.shape.size();
        let width = self.header.parameter_rows;
        let end = self.header.data_end as usize;
        let mut offset = HEADER_SIZE;
        let mut seen = 0usize;

        while offset < end {
            if offset + RECORD_PREFIX > end {
                bail!("record at offset {} runs past the data region", offset);
            }
            let tag = read_u64(&self.mmap, offset);
            let len = read_u64(&self.mmap, offset + 8) as usize;
            let body = offset + RECORD_PREFIX;

            match tag {
                BLOCK_RECORD => {
                    let frames_end = body + len * size * 8;
                    let block_end = frames_end + len * width * 8;
                    if block_end > end {
                        bail!("block at offset {} runs past the data region", offset);
                    }
                    for i in 0..len {
                        let frame = read_f64s(&self.mmap, body + i * size * 8, size);
                        let snapshot = read_f64s(&self.mmap, frames_end + i * width * 8, width);
                        visit(frame, snapshot)?;
                    }
                    seen += len;
                    offset = block_end;
                }
                ATTRS_RECORD => offset = body + len,
                other => bail!("unknown record tag {} at offset {}", other, offset),
            }
        }

        if seen != self.header.frame_count {
            bail!(
                "store lists {} frames but holds {}",
                self.header.frame_count,
                seen
            );
        }
        Ok(())
    }
}

fn read_f64s(bytes: &[u8], offset: usize, count: usize) -> Vec<f64> {
    bytes[offset..offset + count * 8]
        .chunks_exact(8)
        .map(|chunk| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            f64::from_le_bytes(buf)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Block;
    use crate::store::{PersistentStore, StoreLayout, StructuredStore};

    #[test]
    fn test_reader_sees_appended_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.sps");
        let layout = StoreLayout {
            shape: FrameShape::Image { rows: 2, len: 2 },
            parameter_keys: vec!["temp".into()],
            axis: vec![500.0, 510.0],
        };
        let mut store = StructuredStore::create(&path, &layout).unwrap();

        for start in [0.0, 8.0] {
            store
                .append(&Block {
                    shape: layout.shape,
                    frames: (0..8).map(|i| start + i as f64).collect(),
                    parameters: vec![vec![1.0, 2.0], vec![10.0, 20.0], vec![3.0, 4.0]],
                })
                .unwrap();
        }
        store.set_comments("second pass").unwrap();

        let reader = StoreReader::open(&path).unwrap();
        assert_eq!(reader.frame_count(), 4);
        assert_eq!(reader.comments(), "second pass");
        assert_eq!(reader.axis(), &[500.0, 510.0]);
        assert_eq!(reader.parameter_keys(), &["temp".to_string()]);

        let frames = reader.frames().unwrap();
        assert_eq!(frames[3].data(), &[12.0, 13.0, 14.0, 15.0]);

        let params = reader.parameters().unwrap();
        assert_eq!(params[2], vec![3.0, 4.0, 3.0, 4.0]);
    }

    #[test]
    fn test_open_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.sps");
        let layout = StoreLayout {
            shape: FrameShape::Spectrum { len: 3 },
            parameter_keys: vec![],
            axis: vec![],
        };
        StructuredStore::create(&path, &layout).unwrap();

        let reader = StoreReader::open(&path).unwrap();
        assert_eq!(reader.frame_count(), 0);
        assert!(reader.frames().unwrap().is_empty());
        assert_eq!(reader.parameters().unwrap(), vec![Vec::<f64>::new(); 2]);
    }
}
