use parking_lot::RwLock;

use super::node::{Attributes, NodeKind, FILE_PERM};
use crate::error::{FsError, Result};

/// Largest payload a single file may hold (4 GiB).
pub const MAX_FILE_SIZE: u64 = 1 << 32;

/// Grow or shrink `data` to `len` bytes, zero-filling growth. Allocation
/// failure is reported instead of aborting.
fn resize_payload(data: &mut Vec<u8>, len: usize, inode: u64) -> Result<()> {
    if len > data.len() {
        data.try_reserve_exact(len - data.len())
            .map_err(|_| FsError::NoSpace(inode))?;
    }
    data.resize(len, 0);
    Ok(())
}

/// A file node. The payload is only ever held in memory.
#[derive(Debug)]
pub struct File {
    name: String,
    inode: u64,
    data: RwLock<Vec<u8>>,
}

impl File {
    pub fn new(name: impl Into<String>, inode: u64) -> Self {
        Self {
            name: name.into(),
            inode,
            data: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inode(&self) -> u64 {
        self.inode
    }

    pub fn size(&self) -> u64 {
        self.data.read().len() as u64
    }

    pub fn attributes(&self) -> Attributes {
        Attributes {
            inode: self.inode,
            kind: NodeKind::File,
            perm: FILE_PERM,
            size: self.size(),
        }
    }

    /// A copy of the whole payload.
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Replace the whole payload.
    pub fn set_data(&self, bytes: impl Into<Vec<u8>>) {
        *self.data.write() = bytes.into();
    }

    /// Read up to `size` bytes starting at `offset`. Reads past the end
    /// return an empty buffer.
    pub fn read_at(&self, offset: u64, size: usize) -> Vec<u8> {
        let data = self.data.read();
        let start = offset as usize;
        if start >= data.len() {
            return Vec::new();
        }
        let end = std::cmp::min(start.saturating_add(size), data.len());
        data[start..end].to_vec()
    }

    /// Payload length for a request ending at `end`, or `FileTooLarge` when
    /// that overflows or exceeds [`MAX_FILE_SIZE`].
    fn checked_len(&self, end: Option<u64>) -> Result<usize> {
        end.filter(|end| *end <= MAX_FILE_SIZE)
            .and_then(|end| usize::try_from(end).ok())
            .ok_or(FsError::FileTooLarge(self.inode))
    }

    /// Write `bytes` at `offset`, zero-filling any gap past the current end.
    /// Returns the number of bytes written.
    pub fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<usize> {
        let end = self.checked_len(offset.checked_add(bytes.len() as u64))?;
        let start = end - bytes.len();
        let mut data = self.data.write();
        if end > data.len() {
            resize_payload(&mut data, end, self.inode)?;
        }
        data[start..end].copy_from_slice(bytes);
        Ok(bytes.len())
    }

    /// Append `bytes` at the current end. Returns the offset they landed at.
    pub fn append(&self, bytes: &[u8]) -> Result<u64> {
        let mut data = self.data.write();
        let at = data.len();
        let end = self.checked_len((at as u64).checked_add(bytes.len() as u64))?;
        resize_payload(&mut data, end, self.inode)?;
        data[at..end].copy_from_slice(bytes);
        Ok(at as u64)
    }

    /// Grow with zeros or shrink to exactly `size` bytes.
    pub fn truncate(&self, size: u64) -> Result<()> {
        let len = self.checked_len(Some(size))?;
        resize_payload(&mut self.data.write(), len, self.inode)
    }
}
