//! Gzip container around a raw deflate stream
//!
//! The container is the minimal one gzip itself writes: a 10-byte header (no file name, no
//! modification time), the raw deflate payload and an 8-byte trailer holding the CRC32 and the
//! length (modulo 2^32) of the uncompressed data, both little endian.
//!
//! On reading, the optional header sections (extra field, file name, comment, header CRC) are
//! skipped, so files produced by any gzip implementation can be read.

use std::io::{Read, Write};

use flate2::{
    Compress, Compression as Level, Crc, Decompress, FlushCompress, FlushDecompress, Status,
};
use tracing::{debug, instrument, trace};

use crate::{
    data::plain::gather_row,
    error::alloc_buffer,
    stride::Rows,
    Error, Layout, Result, BUF_SIZE,
};

pub(crate) const MAGIC: [u8; 2] = [0x1f, 0x8b];
const DEFLATED: u8 = 8;
#[cfg(windows)]
const OS_CODE: u8 = 0x0b;
#[cfg(not(windows))]
const OS_CODE: u8 = 0x03;

// header flags
const HEAD_CRC: u8 = 0x02;
const EXTRA_FIELD: u8 = 0x04;
const ORIG_NAME: u8 = 0x08;
const COMMENT: u8 = 0x10;
const RESERVED: u8 = 0xe0;

const TRAILER_LEN: usize = 8;

/// Streaming gzip compressor
///
/// Data is fed with [`GzipWriter::write`] in pieces of any size; [`GzipWriter::finish`] flushes the
/// deflate stream and appends the trailer. A writer dropped without `finish` leaves an incomplete
/// stream behind.
pub struct GzipWriter<W: Write> {
    inner: W,
    deflate: Compress,
    staging: Vec<u8>,
    crc: Crc,
}

impl<W: Write> GzipWriter<W> {
    /// Writes the gzip header to `inner` and prepares a deflate stream at `level` (0-9)
    ///
    /// # Errors
    ///
    /// - [`Error::Alloc`] if the staging buffer cannot be allocated
    /// - [`Error::Io`] if the header cannot be written
    pub fn new(mut inner: W, level: u32) -> Result<Self> {
        let staging = alloc_buffer(BUF_SIZE)?;
        let header = [MAGIC[0], MAGIC[1], DEFLATED, 0, 0, 0, 0, 0, 0, OS_CODE];
        inner
            .write_all(&header)
            .map_err(Error::io("writing gzip header"))?;
        Ok(Self {
            inner,
            deflate: Compress::new(Level::new(level.min(9)), false),
            staging,
            crc: Crc::new(),
        })
    }

    /// Compresses `data`, writing compressed output whenever the staging buffer fills up
    ///
    /// # Errors
    ///
    /// - [`Error::Deflate`] if the compressor fails
    /// - [`Error::Io`] if compressed data cannot be written
    #[allow(clippy::cast_possible_truncation)]
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.crc.update(data);
        let mut input = data;
        while !input.is_empty() {
            let (before_in, before_out) = (self.deflate.total_in(), self.deflate.total_out());
            self.deflate
                .compress(input, &mut self.staging, FlushCompress::None)?;
            let consumed = (self.deflate.total_in() - before_in) as usize;
            let produced = (self.deflate.total_out() - before_out) as usize;
            self.inner
                .write_all(&self.staging[..produced])
                .map_err(Error::io("writing compressed data"))?;
            input = &input[consumed..];
        }
        Ok(())
    }

    /// Finishes the deflate stream, writes the trailer and hands back the sink
    ///
    /// # Errors
    ///
    /// - [`Error::Deflate`] if the compressor fails
    /// - [`Error::Io`] if compressed data or the trailer cannot be written
    #[allow(clippy::cast_possible_truncation)]
    pub fn finish(mut self) -> Result<W> {
        loop {
            let before_out = self.deflate.total_out();
            let status = self
                .deflate
                .compress(&[], &mut self.staging, FlushCompress::Finish)?;
            let produced = (self.deflate.total_out() - before_out) as usize;
            self.inner
                .write_all(&self.staging[..produced])
                .map_err(Error::io("writing compressed data"))?;
            if status == Status::StreamEnd {
                break;
            }
        }
        let mut trailer = [0u8; TRAILER_LEN];
        trailer[..4].copy_from_slice(&self.crc.sum().to_le_bytes());
        trailer[4..].copy_from_slice(&self.crc.amount().to_le_bytes());
        self.inner
            .write_all(&trailer)
            .map_err(Error::io("writing gzip trailer"))?;
        debug!(
            uncompressed = self.deflate.total_in(),
            compressed = self.deflate.total_out(),
            "finished gzip stream"
        );
        Ok(self.inner)
    }
}

/// Compresses the image in `buf` into a gzip stream written to `out`
///
/// Strides follow the same convention as the uncompressed writer. Strided rows are gathered into
/// a staging row before compression.
#[instrument(skip(buf, out), level = "trace")]
pub(crate) fn write_gzip<W: Write>(
    layout: &Layout,
    buf: &[u8],
    strides: Option<&[usize]>,
    out: &mut W,
) -> Result<()> {
    let mut writer = GzipWriter::new(out, layout.compression_level())?;
    match strides {
        None => writer.write(&buf[..layout.data_size()])?,
        Some(strides) => {
            let imel = layout.imel_size();
            let mut row_buf = Vec::new();
            for row in Rows::new(layout.dims(), strides, 0)? {
                if row.is_contiguous() {
                    let start = row.start * imel;
                    writer.write(&buf[start..start + row.len * imel])?;
                } else {
                    if row_buf.is_empty() {
                        row_buf = alloc_buffer(row.len * imel)?;
                    }
                    gather_row(buf, row.offsets(), imel, &mut row_buf);
                    writer.write(&row_buf)?;
                }
            }
        }
    }
    writer.finish()?;
    Ok(())
}

/// Streaming gzip decompressor over any byte source
///
/// The trailer is checked as soon as the end of the deflate stream is reached.
pub struct GzipReader<R: Read> {
    inner: R,
    inflate: Decompress,
    input: Vec<u8>,
    pos: usize,
    end: usize,
    input_done: bool,
    crc: Crc,
    finished: bool,
    carry: Option<u8>,
}

impl<R: Read> GzipReader<R> {
    /// Parses the gzip header from `inner` and prepares the inflate stream
    ///
    /// # Errors
    ///
    /// - [`Error::CorruptedStream`] if the header is not a valid gzip header
    /// - [`Error::Io`] if reading fails
    /// - [`Error::Alloc`] if the input buffer cannot be allocated
    pub fn new(mut inner: R) -> Result<Self> {
        skip_header(&mut inner)?;
        Ok(Self {
            inner,
            inflate: Decompress::new(false),
            input: alloc_buffer(BUF_SIZE)?,
            pos: 0,
            end: 0,
            input_done: false,
            crc: Crc::new(),
            finished: false,
            carry: None,
        })
    }

    /// Total number of uncompressed bytes handed out so far
    #[must_use]
    pub fn position(&self) -> u64 {
        self.inflate.total_out() - u64::from(self.carry.is_some())
    }

    /// Returns `true` once the whole stream, trailer included, has been consumed
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished && self.carry.is_none()
    }

    /// Decompresses into `out`, returning the number of bytes written
    ///
    /// Fewer than `out.len()` bytes are written only when the stream ends (or is truncated). When
    /// `out` is filled, the stream is probed for its end so the trailer is verified by the read
    /// that returns the last byte.
    ///
    /// # Errors
    ///
    /// - [`Error::Inflate`] if the deflate payload is invalid
    /// - [`Error::CorruptedStream`] if the trailer does not match the decompressed data
    /// - [`Error::Io`] if reading fails
    pub fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        let mut filled = 0;
        if let Some(byte) = self.carry.take() {
            out[0] = byte;
            filled = 1;
        }
        filled += self.fill(&mut out[filled..])?;
        if filled == out.len() && !self.finished {
            let mut next = [0u8];
            if self.fill(&mut next)? == 1 {
                self.carry = Some(next[0]);
            }
        }
        Ok(filled)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn fill(&mut self, out: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < out.len() && !self.finished {
            if self.pos == self.end && !self.input_done {
                self.end = self
                    .inner
                    .read(&mut self.input)
                    .map_err(Error::io("reading compressed data"))?;
                self.pos = 0;
                self.input_done = self.end == 0;
            }
            let (before_in, before_out) = (self.inflate.total_in(), self.inflate.total_out());
            let status = self.inflate.decompress(
                &self.input[self.pos..self.end],
                &mut out[filled..],
                FlushDecompress::None,
            )?;
            let consumed = (self.inflate.total_in() - before_in) as usize;
            let produced = (self.inflate.total_out() - before_out) as usize;
            self.crc.update(&out[filled..filled + produced]);
            self.pos += consumed;
            filled += produced;
            if status == Status::StreamEnd {
                self.check_trailer()?;
                self.finished = true;
            } else if consumed == 0 && produced == 0 && (self.input_done || self.pos < self.end) {
                debug!(position = self.position(), "deflate stream ended early");
                break;
            }
        }
        Ok(filled)
    }

    /// Decompresses and throws away `n` bytes, returning how many were actually skipped
    ///
    /// # Errors
    ///
    /// See [`GzipReader::read`]
    pub fn skip(&mut self, n: u64) -> Result<u64> {
        let chunk = usize::try_from(n).map_or(BUF_SIZE, |n| n.min(BUF_SIZE));
        let mut scratch = alloc_buffer(chunk)?;
        let mut left = n;
        while left > 0 {
            let want = usize::try_from(left).map_or(chunk, |l| l.min(chunk));
            let got = self.read(&mut scratch[..want])?;
            left -= got as u64;
            if got < want {
                break;
            }
        }
        trace!(skipped = n - left, "skipped compressed data");
        Ok(n - left)
    }

    /// Releases the inflate state and returns the byte source
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn check_trailer(&mut self) -> Result<()> {
        let mut trailer = [0u8; TRAILER_LEN];
        let buffered = (self.end - self.pos).min(TRAILER_LEN);
        trailer[..buffered].copy_from_slice(&self.input[self.pos..self.pos + buffered]);
        self.pos += buffered;
        if buffered < TRAILER_LEN {
            self.inner
                .read_exact(&mut trailer[buffered..])
                .map_err(|e| match e.kind() {
                    std::io::ErrorKind::UnexpectedEof => {
                        Error::CorruptedStream("truncated gzip trailer")
                    }
                    _ => Error::Io {
                        context: "reading gzip trailer",
                        source: e,
                    },
                })?;
        }
        let crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let len = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);
        if crc != self.crc.sum() {
            return Err(Error::CorruptedStream("gzip CRC32 mismatch"));
        }
        if len != self.crc.amount() {
            return Err(Error::CorruptedStream("gzip length mismatch"));
        }
        Ok(())
    }
}

fn read_byte<R: Read>(inner: &mut R) -> Result<u8> {
    let mut byte = [0u8];
    inner.read_exact(&mut byte).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => Error::CorruptedStream("truncated gzip header"),
        _ => Error::Io {
            context: "reading gzip header",
            source: e,
        },
    })?;
    Ok(byte[0])
}

fn skip_header<R: Read>(inner: &mut R) -> Result<()> {
    let mut fixed = [0u8; 10];
    for slot in &mut fixed {
        *slot = read_byte(inner)?;
    }
    if fixed[..2] != MAGIC {
        return Err(Error::CorruptedStream("bad gzip magic"));
    }
    let (method, flags) = (fixed[2], fixed[3]);
    if method != DEFLATED || flags & RESERVED != 0 {
        return Err(Error::CorruptedStream("unsupported gzip method or flags"));
    }
    if flags & EXTRA_FIELD != 0 {
        let len = u16::from_le_bytes([read_byte(inner)?, read_byte(inner)?]);
        for _ in 0..len {
            read_byte(inner)?;
        }
    }
    for flag in [ORIG_NAME, COMMENT] {
        if flags & flag != 0 {
            while read_byte(inner)? != 0 {}
        }
    }
    if flags & HEAD_CRC != 0 {
        read_byte(inner)?;
        read_byte(inner)?;
    }
    trace!(flags, "parsed gzip header");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn compress(data: &[u8]) -> Result<Vec<u8>> {
        let mut writer = GzipWriter::new(Vec::new(), 6)?;
        for piece in data.chunks(1000) {
            writer.write(piece)?;
        }
        writer.finish()
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| ((i * 7) % 253) as u8).collect()
    }

    #[test]
    fn header_and_trailer_layout() -> Result<()> {
        let data = sample(5000);
        let stream = compress(&data)?;
        assert_eq!(&stream[..4], &[0x1f, 0x8b, 8, 0]);
        assert_eq!(&stream[4..9], &[0; 5]);
        let n = stream.len();
        assert_eq!(stream[n - 4..], 5000u32.to_le_bytes());
        let mut crc = Crc::new();
        crc.update(&data);
        assert_eq!(stream[n - 8..n - 4], crc.sum().to_le_bytes());
        Ok(())
    }

    #[test]
    fn reads_back_in_blocks() -> Result<()> {
        let data = sample(100_000);
        let stream = compress(&data)?;
        let mut reader = GzipReader::new(Cursor::new(stream))?;
        let mut back = Vec::new();
        let mut block = vec![0u8; 777];
        loop {
            let n = reader.read(&mut block)?;
            back.extend_from_slice(&block[..n]);
            if n < block.len() {
                break;
            }
        }
        assert!(reader.is_finished());
        assert_eq!(back, data);
        Ok(())
    }

    #[test]
    fn skips_optional_header_sections() -> Result<()> {
        let data = sample(300);
        let plain = compress(&data)?;
        let flags = EXTRA_FIELD | ORIG_NAME | COMMENT | HEAD_CRC;
        let mut stream = vec![0x1f, 0x8b, 8, flags, 0, 0, 0, 0, 0, 3];
        stream.extend_from_slice(&[3, 0, b'x', b'y', b'z']);
        stream.extend_from_slice(b"name.ids\0");
        stream.extend_from_slice(b"a comment\0");
        stream.extend_from_slice(&[0xab, 0xcd]);
        stream.extend_from_slice(&plain[10..]);
        let mut reader = GzipReader::new(Cursor::new(stream))?;
        let mut back = vec![0u8; 300];
        assert_eq!(reader.read(&mut back)?, 300);
        assert_eq!(back, data);
        Ok(())
    }

    #[test]
    fn rejects_bad_headers() {
        for header in [
            vec![0x1f, 0x8c, 8, 0, 0, 0, 0, 0, 0, 3],
            vec![0x1f, 0x8b, 7, 0, 0, 0, 0, 0, 0, 3],
            vec![0x1f, 0x8b, 8, 0x20, 0, 0, 0, 0, 0, 3],
            vec![0x1f, 0x8b, 8],
        ] {
            assert!(matches!(
                GzipReader::new(Cursor::new(header)),
                Err(Error::CorruptedStream(_))
            ));
        }
    }

    #[test]
    fn every_trailer_byte_is_checked() -> Result<()> {
        let data = sample(2048);
        let stream = compress(&data)?;
        let n = stream.len();
        for i in n - TRAILER_LEN..n {
            let mut corrupted = stream.clone();
            corrupted[i] ^= 0x55;
            let mut reader = GzipReader::new(Cursor::new(corrupted))?;
            let mut back = vec![0u8; data.len()];
            assert!(matches!(
                reader.read(&mut back),
                Err(Error::CorruptedStream(_))
            ));
        }
        Ok(())
    }

    #[test]
    fn truncated_stream_fills_partially() -> Result<()> {
        let data = sample(50_000);
        let stream = compress(&data)?;
        let mut reader = GzipReader::new(Cursor::new(&stream[..stream.len() / 2]))?;
        let mut back = vec![0u8; data.len()];
        let n = reader.read(&mut back)?;
        assert!(n < data.len());
        assert_eq!(back[..n], data[..n]);
        Ok(())
    }

    #[test]
    fn skip_discards_exactly() -> Result<()> {
        let data = sample(40_000);
        let mut reader = GzipReader::new(Cursor::new(compress(&data)?))?;
        assert_eq!(reader.skip(33_333)?, 33_333);
        assert_eq!(reader.position(), 33_333);
        let mut rest = vec![0u8; 100];
        reader.read(&mut rest)?;
        assert_eq!(rest, data[33_333..33_433]);
        Ok(())
    }
}
