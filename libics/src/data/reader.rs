use std::{
    fs::File,
    io::{self, BufReader, Read, Seek, SeekFrom},
    path::PathBuf,
};

use tracing::{debug, info, instrument, trace};

use crate::{
    byte_order::{self, ByteOrder},
    data::{
        gzip::{self, GzipReader},
        lzw,
    },
    error::SoftMismatch,
    Compression, DataSource, DataType, Error, Layout, Outcome, Result, SourceKind,
};

enum Stream<R: Read> {
    Plain(R),
    Gzip(GzipReader<R>),
    // the source is consumed by the one read a compress stream allows
    Compress(Option<R>),
    // left behind when reopening a gzip stream fails
    Broken,
}

/// Block-wise reader of the binary data of an image
///
/// Data is handed out in native byte order, whatever order it is stored in. Reads continue where
/// the previous one stopped; [`DataReader::skip_block`] and [`DataReader::set_block`] move the
/// position without reading.
///
/// Data compressed with `compress` has to be read in one go: the first read succeeds, any later
/// read or seek fails with [`Error::BlockNotAllowed`].
pub struct DataReader<R: Read + Seek> {
    data_type: DataType,
    byte_order: Option<ByteOrder>,
    compression: Compression,
    start: u64,
    stream: Stream<R>,
}

impl DataReader<BufReader<File>> {
    /// Opens the data file of `source` for reading
    ///
    /// A missing version 1 `.ids` file is looked for with a `.gz` and then a `.Z` extension
    /// appended, in which case the data is read as gzip or `compress` data respectively.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the file cannot be opened or positioned
    /// - any error of [`DataReader::new`]
    #[instrument(skip(layout, source), fields(path = %source.path.display()), level = "debug")]
    pub fn open(layout: &Layout, source: &DataSource) -> Result<Self> {
        let (path, compression) = locate(source, layout.compression());
        let file = File::open(&path).map_err(Error::io("opening the data file"))?;
        Self::new(
            &layout.with_compression(compression),
            BufReader::new(file),
            source.offset,
        )
    }
}

fn locate(source: &DataSource, declared: Compression) -> (PathBuf, Compression) {
    if source.kind != SourceKind::Separate || source.path.exists() {
        return (source.path.clone(), declared);
    }
    for (extension, compression) in [(".gz", Compression::Gzip), (".Z", Compression::Compress)] {
        let mut name = source.path.as_os_str().to_owned();
        name.push(extension);
        let candidate = PathBuf::from(name);
        if candidate.exists() {
            info!(path = %candidate.display(), %compression, "using compressed data file");
            return (candidate, compression);
        }
    }
    (source.path.clone(), declared)
}

// data written under a `compress` layout is gzip, see [`Compression::for_writing`]
fn has_gzip_magic<R: Read + Seek>(inner: &mut R, offset: u64) -> Result<bool> {
    let mut magic = [0u8; 2];
    let found = match inner.read_exact(&mut magic) {
        Ok(()) => magic == gzip::MAGIC,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => false,
        Err(e) => {
            return Err(Error::Io {
                context: "reading data",
                source: e,
            })
        }
    };
    inner
        .seek(SeekFrom::Start(offset))
        .map_err(Error::io("seeking to the data"))?;
    Ok(found)
}

impl<R: Read + Seek> DataReader<R> {
    /// Starts reading the data described by `layout` from `inner`, at byte `offset`
    ///
    /// # Errors
    ///
    /// - any error of [`Layout::validate`]
    /// - [`Error::Io`] if `inner` cannot be positioned
    /// - [`Error::CorruptedStream`] if gzip data does not start with a valid header
    ///
    /// Data declared `compress` that starts like gzip data is read as gzip.
    pub fn new(layout: &Layout, mut inner: R, offset: u64) -> Result<Self> {
        layout.validate()?;
        inner
            .seek(SeekFrom::Start(offset))
            .map_err(Error::io("seeking to the data"))?;
        let compression = match layout.compression() {
            Compression::Compress if has_gzip_magic(&mut inner, offset)? => {
                info!("compress data is stored as gzip");
                Compression::Gzip
            }
            declared => declared,
        };
        let stream = match compression {
            Compression::Uncompressed => Stream::Plain(inner),
            Compression::Gzip => Stream::Gzip(GzipReader::new(inner)?),
            Compression::Compress => Stream::Compress(Some(inner)),
        };
        debug!(%compression, offset, "opened data stream");
        Ok(Self {
            data_type: layout.data_type(),
            byte_order: layout.byte_order().copied(),
            compression,
            start: offset,
            stream,
        })
    }

    /// The compression the data is actually read with
    #[must_use]
    pub const fn compression(&self) -> Compression {
        self.compression
    }

    /// Reads the next `buf.len()` bytes of data into `buf`
    ///
    /// # Errors
    ///
    /// - [`Error::EndOfStream`] if uncompressed or gzip data ends before `buf` is full
    /// - [`Error::BlockNotAllowed`] for a second read of `compress` data
    /// - [`Error::BitsVsSizeConflict`] if the data needs reordering and `buf` does not hold a whole
    ///   number of elements
    /// - errors of the underlying stream and decompressor
    pub fn read_block(&mut self, buf: &mut [u8]) -> Result<Outcome> {
        let (filled, outcome) = match &mut self.stream {
            Stream::Plain(inner) => {
                inner.read_exact(buf).map_err(|e| match e.kind() {
                    io::ErrorKind::UnexpectedEof => Error::EndOfStream,
                    _ => Error::Io {
                        context: "reading data",
                        source: e,
                    },
                })?;
                (buf.len(), Outcome::Complete)
            }
            Stream::Gzip(gzip) => {
                if gzip.read(buf)? < buf.len() {
                    return Err(Error::EndOfStream);
                }
                (buf.len(), Outcome::Complete)
            }
            Stream::Compress(inner) => {
                let inner = inner.take().ok_or(Error::BlockNotAllowed)?;
                let filled = lzw::decode(inner, buf)?;
                if filled < buf.len() {
                    let whole = filled - filled % self.data_type.size();
                    let mismatch = SoftMismatch::OutputNotFilled {
                        filled,
                        capacity: buf.len(),
                    };
                    (whole, Outcome::Partial(mismatch))
                } else {
                    (filled, Outcome::Complete)
                }
            }
            Stream::Broken => return Err(Error::IllegalParameter("the data stream is closed")),
        };
        trace!(len = buf.len(), filled, "read data block");
        byte_order::normalize(&mut buf[..filled], self.byte_order.as_ref(), self.data_type)?;
        Ok(outcome)
    }

    /// Skips the next `n` bytes of data
    ///
    /// # Errors
    ///
    /// See [`DataReader::set_block`]
    pub fn skip_block(&mut self, n: u64) -> Result<()> {
        let offset = i64::try_from(n).map_err(|_| Error::IllegalParameter("skip too large"))?;
        self.set_block(SeekFrom::Current(offset))
    }

    /// Moves the read position
    ///
    /// `SeekFrom::Start` is relative to the first data byte. Gzip data is decompressed and thrown
    /// away to move forward, and decompressed again from the start to move backward.
    ///
    /// # Errors
    ///
    /// - [`Error::IllegalParameter`] for `SeekFrom::End` or a position before the data
    /// - [`Error::BlockNotAllowed`] for `compress` data
    /// - [`Error::EndOfStream`] if gzip data ends before the position is reached
    /// - [`Error::Io`] if positioning the stream fails
    pub fn set_block(&mut self, pos: SeekFrom) -> Result<()> {
        match &mut self.stream {
            Stream::Plain(inner) => {
                let target = match pos {
                    SeekFrom::Start(offset) => self.start.checked_add(offset),
                    SeekFrom::Current(delta) => {
                        let current = inner
                            .stream_position()
                            .map_err(Error::io("seeking in the data"))?;
                        current.checked_add_signed(delta).filter(|&p| p >= self.start)
                    }
                    SeekFrom::End(_) => None,
                }
                .ok_or(Error::IllegalParameter("illegal data position"))?;
                inner
                    .seek(SeekFrom::Start(target))
                    .map_err(Error::io("seeking in the data"))?;
                Ok(())
            }
            Stream::Gzip(gzip) => {
                let current = gzip.position();
                let target = match pos {
                    SeekFrom::Start(offset) => Some(offset),
                    SeekFrom::Current(delta) => current.checked_add_signed(delta),
                    SeekFrom::End(_) => None,
                }
                .ok_or(Error::IllegalParameter("illegal data position"))?;
                if target < current {
                    debug!(from = current, to = target, "rewinding gzip stream");
                    self.reopen_gzip()?;
                }
                let Stream::Gzip(gzip) = &mut self.stream else {
                    return Err(Error::IllegalParameter("the data stream is closed"));
                };
                let n = target - gzip.position();
                if gzip.skip(n)? < n {
                    return Err(Error::EndOfStream);
                }
                Ok(())
            }
            Stream::Compress(_) => Err(Error::BlockNotAllowed),
            Stream::Broken => Err(Error::IllegalParameter("the data stream is closed")),
        }
    }

    fn reopen_gzip(&mut self) -> Result<()> {
        let Stream::Gzip(gzip) = std::mem::replace(&mut self.stream, Stream::Broken) else {
            return Ok(());
        };
        let mut inner = gzip.into_inner();
        inner
            .seek(SeekFrom::Start(self.start))
            .map_err(Error::io("seeking to the data"))?;
        self.stream = Stream::Gzip(GzipReader::new(inner)?);
        Ok(())
    }

    /// Ends reading, releasing the decompressor state and the underlying stream
    pub fn close(self) {
        debug!(compression = %self.compression, "closing data stream");
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::data::gzip::GzipWriter;

    fn layout(compression: Compression) -> Layout {
        Layout::builder()
            .data_type(DataType::Uint8)
            .dims(vec![1000])
            .compression(compression)
            .build()
    }

    fn data() -> Vec<u8> {
        (0..1000u32).map(|i| (i % 199) as u8).collect()
    }

    fn gzip(data: &[u8]) -> Result<Vec<u8>> {
        let mut writer = GzipWriter::new(Vec::new(), 6)?;
        writer.write(data)?;
        writer.finish()
    }

    #[test]
    fn plain_blocks_and_seeks() -> Result<()> {
        let mut file = vec![0xee; 16];
        file.extend(data());
        let mut reader =
            DataReader::new(&layout(Compression::Uncompressed), Cursor::new(file), 16)?;
        let mut block = [0u8; 10];
        assert!(reader.read_block(&mut block)?.is_complete());
        assert_eq!(block[..], data()[..10]);
        reader.skip_block(90)?;
        assert!(reader.read_block(&mut block)?.is_complete());
        assert_eq!(block[..], data()[100..110]);
        reader.set_block(SeekFrom::Start(5))?;
        assert!(reader.read_block(&mut block)?.is_complete());
        assert_eq!(block[..], data()[5..15]);
        assert!(matches!(
            reader.set_block(SeekFrom::Current(-100)),
            Err(Error::IllegalParameter(_))
        ));
        assert!(matches!(
            reader.set_block(SeekFrom::End(0)),
            Err(Error::IllegalParameter(_))
        ));
        reader.set_block(SeekFrom::Start(995))?;
        assert!(matches!(
            reader.read_block(&mut block),
            Err(Error::EndOfStream)
        ));
        Ok(())
    }

    #[test]
    fn gzip_seeks_both_ways() -> Result<()> {
        let stream = gzip(&data())?;
        let mut reader = DataReader::new(&layout(Compression::Gzip), Cursor::new(stream), 0)?;
        let mut block = [0u8; 10];
        reader.set_block(SeekFrom::Start(500))?;
        assert!(reader.read_block(&mut block)?.is_complete());
        assert_eq!(block[..], data()[500..510]);
        reader.set_block(SeekFrom::Current(-300))?;
        assert!(reader.read_block(&mut block)?.is_complete());
        assert_eq!(block[..], data()[210..220]);
        reader.set_block(SeekFrom::Start(0))?;
        assert!(reader.read_block(&mut block)?.is_complete());
        assert_eq!(block[..], data()[..10]);
        assert!(matches!(
            reader.skip_block(5000),
            Err(Error::EndOfStream)
        ));
        Ok(())
    }

    #[test]
    fn reorders_declared_big_endian() -> Result<()> {
        let layout = Layout::builder()
            .data_type(DataType::Uint16)
            .dims(vec![3])
            .byte_order(ByteOrder::big_endian(2)?)
            .build();
        let stored: Vec<u8> = [1u16, 2, 0x0304]
            .iter()
            .flat_map(|v| v.to_be_bytes())
            .collect();
        let mut reader = DataReader::new(&layout, Cursor::new(stored), 0)?;
        let mut buf = [0u8; 6];
        assert!(reader.read_block(&mut buf)?.is_complete());
        let values: Vec<u16> = buf
            .chunks_exact(2)
            .map(|c| u16::from_ne_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(values, vec![1, 2, 0x0304]);
        Ok(())
    }

    #[test]
    fn compress_reads_once() -> Result<()> {
        let stream = vec![0x1f, 0x9d, 0x90, 0x41, 0x84, 0x04, 0x1c, 0x28, 0xb0, 0x60, 0x40];
        let mut reader = DataReader::new(&layout(Compression::Compress), Cursor::new(stream), 0)?;
        let mut buf = [0u8; 20];
        assert_eq!(
            reader.read_block(&mut buf)?,
            Outcome::Partial(SoftMismatch::OutputNotFilled {
                filled: 14,
                capacity: 20
            })
        );
        assert_eq!(&buf[..14], b"ABABABABABABAB");
        assert!(matches!(
            reader.read_block(&mut buf),
            Err(Error::BlockNotAllowed)
        ));
        assert!(matches!(
            reader.skip_block(1),
            Err(Error::BlockNotAllowed)
        ));
        Ok(())
    }
}
