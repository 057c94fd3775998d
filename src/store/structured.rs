//! Binary frame store.
//!
//! Layout:
//! - a fixed header page (`HEADER_SIZE` bytes) holding the magic, version,
//!   frame dimensions, snapshot width, frame count, the end of the data
//!   region and the location of the live attribute record
//! - a log of records, each `tag: u64, len: u64` followed by its body:
//!   - block records: `len` frames of little-endian `f64`, then `len`
//!     snapshots of `parameter_rows` values each
//!   - attribute records: `len` bytes of JSON (`xaxis`, `parameter_keys`,
//!     `comments`); only the one the header points at is live
//!
//! A commit only writes past the committed end of the data region, syncs,
//! then rewrites the header. Bytes left by an interrupted commit lie beyond
//! `data_end` and are never read.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{check_block, PersistentStore, StoreLayout};
use crate::core::{Block, FrameShape};

pub const EXTENSION: &str = "sps";
pub(crate) const MAGIC: &[u8; 8] = b"SPECSTOR";
pub(crate) const VERSION: u64 = 1;
pub(crate) const HEADER_SIZE: usize = 4096;
/// `tag` and `len` ahead of every record body
pub(crate) const RECORD_PREFIX: usize = 16;
pub(crate) const BLOCK_RECORD: u64 = 1;
pub(crate) const ATTRS_RECORD: u64 = 2;

/// Store-level attributes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreAttributes {
    pub xaxis: Vec<f64>,
    pub parameter_keys: Vec<String>,
    pub comments: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Header {
    pub shape: FrameShape,
    pub parameter_rows: usize,
    pub frame_count: usize,
    pub data_end: u64,
    pub attrs_offset: u64,
    pub attrs_len: u64,
}

impl Header {
    pub fn encode(&self) -> Vec<u8> {
        let mut page = vec![0u8; HEADER_SIZE];
        let dims = self.shape.dims();
        let (rows, len) = match dims.as_slice() {
            [len] => (1, *len),
            [rows, len] => (*rows, *len),
            _ => (0, 0),
        };
        let fields = [
            VERSION,
            self.shape.ndim() as u64,
            rows as u64,
            len as u64,
            self.parameter_rows as u64,
            self.frame_count as u64,
            self.data_end,
            self.attrs_offset,
            self.attrs_len,
        ];
        page[0..8].copy_from_slice(MAGIC);
        for (i, field) in fields.iter().enumerate() {
            let start = 8 + i * 8;
            page[start..start + 8].copy_from_slice(&field.to_le_bytes());
        }
        page
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            bail!("file is shorter than the store header");
        }
        if &bytes[0..8] != MAGIC {
            bail!("not a frame store (bad magic)");
        }
        let field = |i: usize| read_u64(bytes, 8 + i * 8);
        let version = field(0);
        if version != VERSION {
            bail!("unsupported store version {}", version);
        }
        let shape = match field(1) {
            1 => FrameShape::Spectrum {
                len: field(3) as usize,
            },
            2 => FrameShape::Image {
                rows: field(2) as usize,
                len: field(3) as usize,
            },
            other => bail!("unsupported frame rank {}", other),
        };
        Ok(Self {
            shape,
            parameter_rows: field(4) as usize,
            frame_count: field(5) as usize,
            data_end: field(6),
            attrs_offset: field(7),
            attrs_len: field(8),
        })
    }
}

pub(crate) fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

fn record_prefix(bytes: &mut Vec<u8>, tag: u64, len: usize) {
    bytes.extend_from_slice(&tag.to_le_bytes());
    bytes.extend_from_slice(&(len as u64).to_le_bytes());
}

fn encode_block(block: &Block) -> Vec<u8> {
    let count = block.frame_count();
    let rows = block.parameter_rows();
    let mut bytes = Vec::with_capacity(RECORD_PREFIX + (block.frames.len() + count * rows) * 8);
    record_prefix(&mut bytes, BLOCK_RECORD, count);
    for value in &block.frames {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    for frame in 0..count {
        for row in &block.parameters {
            bytes.extend_from_slice(&row[frame].to_le_bytes());
        }
    }
    bytes
}

/// Structured backend: one growable binary container per run
pub struct StructuredStore {
    path: PathBuf,
    file: File,
    header: Header,
    attrs: StoreAttributes,
}

impl StructuredStore {
    pub fn create(path: &Path, layout: &StoreLayout) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .context(format!("Failed to create store at {:?}", path))?;

        let mut store = Self {
            path: path.to_path_buf(),
            file,
            header: Header {
                shape: layout.shape,
                parameter_rows: layout.parameter_rows(),
                frame_count: 0,
                data_end: HEADER_SIZE as u64,
                attrs_offset: 0,
                attrs_len: 0,
            },
            attrs: StoreAttributes {
                xaxis: layout.axis.clone(),
                parameter_keys: layout.parameter_keys.clone(),
                comments: String::new(),
            },
        };
        store.commit(&[], true)?;
        debug!(path = ?store.path, shape = %layout.shape, "created structured store");
        Ok(store)
    }

    pub fn attributes(&self) -> &StoreAttributes {
        &self.attrs
    }

    /// Appends `payload`, plus a fresh attribute record when `attrs_changed`,
    /// after the committed data, then points the header at it
    fn commit(&mut self, payload: &[u8], attrs_changed: bool) -> Result<()> {
        let mut header = self.header;
        let mut bytes = payload.to_vec();
        if attrs_changed {
            let attrs = serde_json::to_vec(&self.attrs).context("Failed to encode attributes")?;
            header.attrs_offset = header.data_end + (bytes.len() + RECORD_PREFIX) as u64;
            header.attrs_len = attrs.len() as u64;
            record_prefix(&mut bytes, ATTRS_RECORD, attrs.len());
            bytes.extend_from_slice(&attrs);
        }
        header.data_end += bytes.len() as u64;

        self.file.seek(SeekFrom::Start(self.header.data_end))?;
        self.file.write_all(&bytes)?;
        self.file.set_len(header.data_end)?;
        self.file
            .sync_data()
            .context(format!("Failed to sync store {:?}", self.path))?;

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header.encode())?;
        self.file
            .sync_data()
            .context(format!("Failed to sync store header {:?}", self.path))?;

        self.header = header;
        Ok(())
    }
}

impl PersistentStore for StructuredStore {
    fn path(&self) -> &Path {
        &self.path
    }

    fn frame_count(&self) -> usize {
        self.header.frame_count
    }

    fn append(&mut self, block: &Block) -> Result<()> {
        check_block(
            &self.path,
            self.header.shape,
            self.header.parameter_rows,
            block,
        )?;
        let count = block.frame_count();
        self.header.frame_count += count;
        if let Err(e) = self.commit(&encode_block(block), false) {
            self.header.frame_count -= count;
            return Err(e.context(format!("Failed to append {} frames", count)));
        }
        Ok(())
    }

    fn set_axis(&mut self, axis: &[f64]) -> Result<()> {
        self.attrs.xaxis = axis.to_vec();
        self.commit(&[], true)
    }

    fn set_comments(&mut self, comments: &str) -> Result<()> {
        self.attrs.comments = comments.to_string();
        self.commit(&[], true)
    }

    fn export(&mut self, destination: &Path) -> Result<()> {
        self.file.sync_all()?;
        fs::copy(&self.path, destination)
            .context(format!("Failed to copy {:?} to {:?}", self.path, destination))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = Header {
            shape: FrameShape::Image { rows: 4, len: 16 },
            parameter_rows: 5,
            frame_count: 120,
            data_end: 9000,
            attrs_offset: 8900,
            attrs_len: 77,
        };
        let page = header.encode();
        assert_eq!(page.len(), HEADER_SIZE);
        assert_eq!(Header::decode(&page).unwrap(), header);
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let page = vec![0u8; HEADER_SIZE];
        assert!(Header::decode(&page).is_err());
    }

    #[test]
    fn test_append_rejects_shape_change() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout {
            shape: FrameShape::Spectrum { len: 2 },
            parameter_keys: vec![],
            axis: vec![1.0, 2.0],
        };
        let mut store = StructuredStore::create(&dir.path().join("s.sps"), &layout).unwrap();

        let block = Block {
            shape: FrameShape::Spectrum { len: 3 },
            frames: vec![0.0; 3],
            parameters: vec![vec![0.0], vec![0.0]],
        };
        let err = store.append(&block).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<crate::error::AcquisitionError>(),
            Some(crate::error::AcquisitionError::StoreNotInitialized(_))
        ));
        assert_eq!(store.frame_count(), 0);
    }

    fn spectrum_block(values: &[f64]) -> Block {
        Block {
            shape: FrameShape::Spectrum { len: 2 },
            frames: values.iter().flat_map(|v| [*v, *v + 1.0]).collect(),
            parameters: vec![vec![0.0; values.len()], vec![0.0; values.len()]],
        }
    }

    /// Writes `bytes` at the committed data end without touching the header
    fn interrupted_commit(path: &Path, data_end: u64, bytes: &[u8]) {
        let mut file = OpenOptions::new().write(true).open(path).unwrap();
        file.seek(SeekFrom::Start(data_end)).unwrap();
        file.write_all(bytes).unwrap();
    }

    #[test]
    fn test_interrupted_append_keeps_committed_frames() {
        use crate::store::StoreReader;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.sps");
        let layout = StoreLayout {
            shape: FrameShape::Spectrum { len: 2 },
            parameter_keys: vec![],
            axis: vec![1.0, 2.0],
        };
        let mut store = StructuredStore::create(&path, &layout).unwrap();
        store.append(&spectrum_block(&[5.0])).unwrap();
        store.set_comments("first").unwrap();

        // the next block lands on disk but the header is never rewritten
        let data_end = store.header.data_end;
        interrupted_commit(&path, data_end, &encode_block(&spectrum_block(&[7.0, 9.0])));
        drop(store);

        let reader = StoreReader::open(&path).unwrap();
        assert_eq!(reader.frame_count(), 1);
        assert_eq!(reader.frames().unwrap()[0].data(), &[5.0, 6.0]);
        assert_eq!(reader.comments(), "first");
        assert_eq!(reader.axis(), &[1.0, 2.0]);
    }

    #[test]
    fn test_interrupted_attribute_update_keeps_previous_attributes() {
        use crate::store::StoreReader;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.sps");
        let layout = StoreLayout {
            shape: FrameShape::Spectrum { len: 2 },
            parameter_keys: vec!["temp".into()],
            axis: vec![],
        };
        let mut store = StructuredStore::create(&path, &layout).unwrap();
        store.set_axis(&[400.0, 410.0]).unwrap();
        let data_end = store.header.data_end;
        interrupted_commit(&path, data_end, b"{\"xaxis\": [1.0, 2");

        let reader = StoreReader::open(&path).unwrap();
        assert_eq!(reader.axis(), &[400.0, 410.0]);
        assert_eq!(reader.parameter_keys(), &["temp".to_string()]);

        // the store keeps appending over the torn tail
        store.append(&spectrum_block(&[1.0, 3.0])).unwrap();
        let reader = StoreReader::open(&path).unwrap();
        assert_eq!(reader.frame_count(), 2);
        assert_eq!(reader.frames().unwrap()[1].data(), &[3.0, 4.0]);
        assert_eq!(reader.axis(), &[400.0, 410.0]);
    }
}
