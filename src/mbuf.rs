//! In-memory byte buffer with an independent read cursor.
//!
//! Every top-level operation reads from one `MBuf` and appends to another.
//! Once a caller has taken a direct reference to the contents (via
//! [`MBuf::grab`]) or stolen the backing storage, the buffer latches
//! read-only and any further append is an internal error rather than a
//! silent overwrite.

use crate::error::{Error, Result};
use crate::filter::{PullFilter, PushFilter};

#[derive(Debug, Default)]
pub struct MBuf {
    data: Vec<u8>,
    read_pos: usize,
    no_write: bool,
}

impl MBuf {
    pub fn new() -> MBuf {
        MBuf::default()
    }

    pub fn with_capacity(cap: usize) -> MBuf {
        MBuf {
            data: Vec::with_capacity(cap),
            read_pos: 0,
            no_write: false,
        }
    }

    /// Create a buffer holding a copy of `data`, ready for reading.
    pub fn from_slice(data: &[u8]) -> MBuf {
        MBuf {
            data: data.to_vec(),
            read_pos: 0,
            no_write: false,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes left between the read cursor and the end.
    pub fn avail(&self) -> usize {
        self.data.len() - self.read_pos
    }

    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        if self.no_write {
            return Err(Error::Bug);
        }
        self.data.extend_from_slice(data);
        Ok(())
    }

    /// Reset the read cursor to the start.
    pub fn rewind(&mut self) {
        self.read_pos = 0;
    }

    /// Take up to `len` bytes from the read cursor. May return fewer bytes
    /// only at end of data. The buffer is read-only afterwards.
    pub fn grab(&mut self, len: usize) -> &[u8] {
        self.no_write = true;
        let n = len.min(self.avail());
        let out = &self.data[self.read_pos..self.read_pos + n];
        self.read_pos += n;
        out
    }

    /// Everything in the buffer, without moving the read cursor.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Transfer the backing storage out of the buffer.
    pub fn steal(self) -> Vec<u8> {
        self.data
    }
}

impl PullFilter for MBuf {
    fn pull(&mut self, max: usize) -> Result<&[u8]> {
        let n = max.min(self.avail());
        let out = &self.data[self.read_pos..self.read_pos + n];
        self.read_pos += n;
        Ok(out)
    }
}

impl PushFilter for MBuf {
    fn push(&mut self, data: &[u8]) -> Result<()> {
        self.append(data)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
