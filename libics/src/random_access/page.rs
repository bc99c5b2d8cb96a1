use std::io::{Read, Seek, SeekFrom, Write};

use tracing::trace;

use crate::{error::alloc_buffer, Error, Result, MAX_IMEL_SIZE};

/// Largest paging buffer, a whole number of the largest elements
pub const PAGE_SIZE: usize = MAX_IMEL_SIZE * (4 * 1024 * 1024 / MAX_IMEL_SIZE);

/// A window onto the data of an image file
///
/// Offsets are relative to the start of the data. The window is refilled whenever an element
/// outside of it is accessed, writing the old contents back first if they were modified.
pub struct Page<'f, F> {
    file: &'f mut F,
    data_start: u64,
    data_len: u64,
    buf: Vec<u8>,
    position: u64,
    valid: usize,
    dirty: bool,
}

impl<'f, F: Read + Write + Seek> Page<'f, F> {
    /// A page over the `data_len` bytes of data starting at `data_start` in `file`
    pub fn new(file: &'f mut F, data_start: u64, data_len: u64) -> Result<Self> {
        let capacity = usize::try_from(data_len).map_or(PAGE_SIZE, |len| len.min(PAGE_SIZE));
        Ok(Self {
            file,
            data_start,
            data_len,
            buf: alloc_buffer(capacity)?,
            position: 0,
            valid: 0,
            dirty: false,
        })
    }

    fn contains(&self, offset: u64, len: usize) -> bool {
        offset >= self.position && offset + len as u64 <= self.position + self.valid as u64
    }

    fn load(&mut self, offset: u64) -> Result<()> {
        self.flush()?;
        let remaining = self.data_len.saturating_sub(offset);
        let len = usize::try_from(remaining).map_or(self.buf.len(), |r| r.min(self.buf.len()));
        trace!(offset, len, "loading page");
        self.file
            .seek(SeekFrom::Start(self.data_start + offset))
            .map_err(Error::io("seeking in the data"))?;
        self.file
            .read_exact(&mut self.buf[..len])
            .map_err(Error::io("reading a page"))?;
        self.position = offset;
        self.valid = len;
        Ok(())
    }

    fn window(&mut self, offset: u64, len: usize) -> Result<&mut [u8]> {
        if !self.contains(offset, len) {
            self.load(offset)?;
            if !self.contains(offset, len) {
                return Err(Error::EndOfStream);
            }
        }
        // fits in usize, it is inside the buffer
        #[allow(clippy::cast_possible_truncation)]
        let start = (offset - self.position) as usize;
        Ok(&mut self.buf[start..start + len])
    }

    /// Copies the element at `offset` into `dst`, native byte `i` taken from stored byte `map[i]`
    pub fn read_element(&mut self, offset: u64, map: &[u8], dst: &mut [u8]) -> Result<()> {
        let stored = self.window(offset, map.len())?;
        for (d, &s) in dst.iter_mut().zip(map) {
            *d = stored[usize::from(s)];
        }
        Ok(())
    }

    /// Copies `src` into the element at `offset`, native byte `i` stored at byte `map[i]`
    pub fn write_element(&mut self, offset: u64, map: &[u8], src: &[u8]) -> Result<()> {
        let stored = self.window(offset, map.len())?;
        for (&v, &s) in src.iter().zip(map) {
            stored[usize::from(s)] = v;
        }
        self.dirty = true;
        Ok(())
    }

    /// Writes the page back if it was modified
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        trace!(position = self.position, len = self.valid, "flushing page");
        self.file
            .seek(SeekFrom::Start(self.data_start + self.position))
            .map_err(Error::io("seeking in the data"))?;
        self.file
            .write_all(&self.buf[..self.valid])
            .map_err(Error::io("writing a page"))?;
        self.dirty = false;
        Ok(())
    }
}
