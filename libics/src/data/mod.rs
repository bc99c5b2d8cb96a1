use std::io::{Read, Seek, Write};

use tracing::{info, instrument};

use crate::{
    error::{alloc_buffer, SoftMismatch},
    stride::Rows,
    Compression, DataReader, DataSource, Error, Layout, Outcome, Result,
};

/// Appending the data of one file to another
pub mod copy;
/// Gzip container reading and writing
pub mod gzip;
/// Legacy `compress` decoding
pub mod lzw;
mod plain;
/// 8-bit previews of image planes
pub mod preview;
/// Block-wise reading with byte order normalization
pub mod reader;
/// Region of interest extraction
pub mod roi;

pub use plain::WRITE_CHUNK;

/// Index of the last element addressed by `strides` in an image of extent `dims`, plus one
fn strided_len(dims: &[usize], strides: &[usize]) -> Option<usize> {
    dims.iter()
        .zip(strides)
        .try_fold(1usize, |acc, (&dim, &stride)| {
            (dim - 1).checked_mul(stride)?.checked_add(acc)
        })
}

/// Checks `len` bytes hold every element `strides` addresses
fn check_strides(layout: &Layout, strides: &[usize], len: usize) -> Result<()> {
    if strides.len() != layout.ndims() {
        return Err(Error::DimensionalityMismatch {
            expected: layout.ndims(),
            got: strides.len(),
        });
    }
    let needed = strided_len(layout.dims(), strides)
        .and_then(|n| n.checked_mul(layout.imel_size()))
        .ok_or(Error::IllegalParameter("strides overflow"))?;
    if len < needed {
        return Err(Error::BufferTooSmall { needed, got: len });
    }
    Ok(())
}

/// Writes the image in `buf`, stored contiguously, to `out`
///
/// # Errors
///
/// See [`write_data_with_strides`]
pub fn write_data<W: Write>(layout: &Layout, buf: &[u8], out: &mut W) -> Result<Outcome> {
    write_data_with_strides(layout, buf, None, out)
}

/// Writes the image in `buf` to `out`, compressed as `layout` declares
///
/// With `strides`, element `(i0, i1, ...)` is taken from element
/// `i0 * strides[0] + i1 * strides[1] + ...` of `buf`. Data declared as `compress` compressed is
/// written as gzip. The data is written in the byte order it is given in.
///
/// # Errors
///
/// - any error of [`Layout::validate`]
/// - [`Error::BufferTooSmall`] if `buf` does not hold the whole image
/// - [`Error::DimensionalityMismatch`] if `strides` does not have one entry per dimension
/// - [`Error::Io`] or [`Error::Deflate`] while writing
///
/// A contiguous `buf` larger than the image is reported as [`SoftMismatch::SizeConflict`], only
/// the image is written.
#[instrument(skip(buf, out), fields(len = buf.len()), level = "debug")]
pub fn write_data_with_strides<W: Write>(
    layout: &Layout,
    buf: &[u8],
    strides: Option<&[usize]>,
    out: &mut W,
) -> Result<Outcome> {
    layout.validate()?;
    let size = layout.data_size();
    let outcome = match strides {
        Some(strides) => {
            check_strides(layout, strides, buf.len())?;
            Outcome::Complete
        }
        None if buf.len() < size => {
            return Err(Error::BufferTooSmall {
                needed: size,
                got: buf.len(),
            })
        }
        None if buf.len() > size => Outcome::Partial(SoftMismatch::SizeConflict {
            declared: size,
            actual: buf.len(),
        }),
        None => Outcome::Complete,
    };
    let compression = layout.compression().for_writing();
    if compression != layout.compression() {
        info!(%compression, "compress data is written as gzip");
    }
    match compression {
        Compression::Uncompressed => plain::write_plain(layout, buf, strides, out)?,
        Compression::Gzip => gzip::write_gzip(layout, buf, strides, out)?,
        Compression::Compress => return Err(Error::UnknownCompression),
    }
    out.flush().map_err(Error::io("writing data"))?;
    Ok(outcome)
}

/// Reads the data of the image at `source` into `buf`
///
/// `buf` is normally exactly [`Layout::data_size`] bytes. Reading fewer bytes is allowed.
///
/// # Errors
///
/// See [`DataReader::open`] and [`DataReader::read_block`]
#[instrument(skip(layout, buf), fields(len = buf.len()), level = "debug")]
pub fn read_data(layout: &Layout, source: &DataSource, buf: &mut [u8]) -> Result<Outcome> {
    if buf.is_empty() {
        return Ok(Outcome::Complete);
    }
    let mut reader = DataReader::open(layout, source)?;
    let outcome = reader.read_block(buf)?;
    reader.close();
    Ok(outcome)
}

/// Reads the image at `source` into `buf`, placing elements at the given strides
///
/// Without `strides` the image is stored contiguously. With them, element `(i0, i1, ...)` lands
/// at element `i0 * strides[0] + i1 * strides[1] + ...` of `buf`; elements of `buf` not
/// addressed are left untouched.
///
/// # Errors
///
/// - [`Error::DimensionalityMismatch`] if `strides` does not have one entry per dimension
/// - [`Error::BufferTooSmall`] if `buf` does not reach the last element addressed
/// - errors of [`DataReader`]; `compress` data can only be read when the image is a single row
#[instrument(skip(layout, buf), fields(len = buf.len()), level = "debug")]
pub fn read_data_with_strides(
    layout: &Layout,
    source: &DataSource,
    buf: &mut [u8],
    strides: Option<&[usize]>,
) -> Result<Outcome> {
    if buf.is_empty() {
        return Ok(Outcome::Complete);
    }
    layout.validate()?;
    let strides = strides.map_or_else(|| layout.strides(), <[usize]>::to_vec);
    check_strides(layout, &strides, buf.len())?;
    let mut reader = DataReader::open(layout, source)?;
    let outcome = read_strided(layout, &strides, &mut reader, buf)?;
    reader.close();
    Ok(outcome)
}

fn read_strided<R: Read + Seek>(
    layout: &Layout,
    strides: &[usize],
    reader: &mut DataReader<R>,
    buf: &mut [u8],
) -> Result<Outcome> {
    let imel = layout.imel_size();
    let mut staging = Vec::new();
    let mut outcome = Outcome::Complete;
    for row in Rows::new(layout.dims(), strides, 0)? {
        if row.is_contiguous() {
            let start = row.start * imel;
            outcome = outcome.and(reader.read_block(&mut buf[start..start + row.len * imel])?);
        } else {
            if staging.is_empty() {
                staging = alloc_buffer(row.len * imel)?;
            }
            outcome = outcome.and(reader.read_block(&mut staging)?);
            plain::scatter_row(&staging, row.offsets(), imel, buf);
        }
    }
    Ok(outcome)
}
