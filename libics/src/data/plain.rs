//! Uncompressed strided transfer

use std::io::Write;

use tracing::trace;

use crate::{stride::Rows, Error, Layout, Result};

/// Largest single write issued for unstrided data
pub const WRITE_CHUNK: usize = 1 << 30;

/// Writes the image held in `buf` to `out` without compression
///
/// With `strides`, element `(i0, i1, ...)` of the image is taken from element
/// `i0 * strides[0] + i1 * strides[1] + ...` of `buf`. Without, `buf` holds the image
/// contiguously and is written in chunks of at most [`WRITE_CHUNK`] bytes.
///
/// The caller has already checked that `buf` covers every element addressed.
pub(crate) fn write_plain<W: Write>(
    layout: &Layout,
    buf: &[u8],
    strides: Option<&[usize]>,
    out: &mut W,
) -> Result<()> {
    let imel = layout.imel_size();
    let Some(strides) = strides else {
        for chunk in buf[..layout.data_size()].chunks(WRITE_CHUNK) {
            out.write_all(chunk).map_err(Error::io("writing data"))?;
        }
        return Ok(());
    };
    for row in Rows::new(layout.dims(), strides, 0)? {
        if row.is_contiguous() {
            let start = row.start * imel;
            out.write_all(&buf[start..start + row.len * imel])
                .map_err(Error::io("writing data"))?;
        } else {
            trace!(start = row.start, stride = row.stride, "writing strided row");
            for offset in row.offsets() {
                let start = offset * imel;
                out.write_all(&buf[start..start + imel])
                    .map_err(Error::io("writing data"))?;
            }
        }
    }
    Ok(())
}

/// Copies the elements of one strided row into a contiguous staging row
pub(crate) fn gather_row(
    src: &[u8],
    offsets: impl Iterator<Item = usize>,
    imel: usize,
    row: &mut [u8],
) {
    for (dst, offset) in row.chunks_exact_mut(imel).zip(offsets) {
        let start = offset * imel;
        dst.copy_from_slice(&src[start..start + imel]);
    }
}

/// Copies a contiguous staging row into strided positions of `dst`
pub(crate) fn scatter_row(
    row: &[u8],
    offsets: impl Iterator<Item = usize>,
    imel: usize,
    dst: &mut [u8],
) {
    for (src, offset) in row.chunks_exact(imel).zip(offsets) {
        let start = offset * imel;
        dst[start..start + imel].copy_from_slice(src);
    }
}
