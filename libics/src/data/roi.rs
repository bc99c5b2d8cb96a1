use std::io::{Read, Seek};

use bon::Builder;
use tracing::{debug, instrument};

use crate::{
    error::{alloc_buffer, SoftMismatch},
    stride::Odometer,
    DataReader, DataSource, Error, Layout, Outcome, Result, MAX_DIMS,
};

/// A rectangular, optionally subsampled, region of an image
///
/// Every field is optional: the default offset is the origin, the default size runs from the
/// offset to the end of each dimension and the default sampling is 1 (every element). Along
/// dimension `d` the region holds `ceil(size[d] / sampling[d])` elements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Builder)]
pub struct Roi {
    /// First element along each dimension
    #[builder(into)]
    offset: Option<Vec<usize>>,
    /// Extent of the region in image elements along each dimension
    #[builder(into)]
    size: Option<Vec<usize>>,
    /// Distance between the elements taken along each dimension
    #[builder(into)]
    sampling: Option<Vec<usize>>,
}

/// A [`Roi`] checked against and completed for one image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    ndims: usize,
    offset: [usize; MAX_DIMS],
    size: [usize; MAX_DIMS],
    sampling: [usize; MAX_DIMS],
}

impl Roi {
    /// The whole image
    #[must_use]
    pub fn full() -> Self {
        Self::default()
    }

    /// Fills in the defaults and checks the region lies within an image of extent `dims`
    ///
    /// # Errors
    ///
    /// - [`Error::TooManyDims`] if `dims` has more than [`MAX_DIMS`] entries
    /// - [`Error::DimensionalityMismatch`] if a given field does not have one entry per dimension
    /// - [`Error::IllegalRoi`] if a sampling is 0, a size is 0, or the region extends past the
    ///   image
    pub fn resolve(&self, dims: &[usize]) -> Result<Region> {
        let ndims = dims.len();
        if ndims > MAX_DIMS {
            return Err(Error::TooManyDims(ndims));
        }
        for field in [&self.offset, &self.size, &self.sampling].into_iter().flatten() {
            if field.len() != ndims {
                return Err(Error::DimensionalityMismatch {
                    expected: ndims,
                    got: field.len(),
                });
            }
        }
        let mut region = Region {
            ndims,
            offset: [0; MAX_DIMS],
            size: [0; MAX_DIMS],
            sampling: [1; MAX_DIMS],
        };
        for (d, &dim) in dims.iter().enumerate() {
            let offset = self.offset.as_ref().map_or(0, |o| o[d]);
            let size = self
                .size
                .as_ref()
                .map_or(dim.saturating_sub(offset), |s| s[d]);
            let sampling = self.sampling.as_ref().map_or(1, |s| s[d]);
            let end = offset.checked_add(size).ok_or(Error::IllegalRoi)?;
            if sampling == 0 || size == 0 || end > dim {
                return Err(Error::IllegalRoi);
            }
            region.offset[d] = offset;
            region.size[d] = size;
            region.sampling[d] = sampling;
        }
        Ok(region)
    }
}

impl Region {
    /// First element along each dimension
    #[must_use]
    pub fn offset(&self) -> &[usize] {
        &self.offset[..self.ndims]
    }

    /// Extent in image elements along each dimension
    #[must_use]
    pub fn size(&self) -> &[usize] {
        &self.size[..self.ndims]
    }

    /// Sampling interval along each dimension
    #[must_use]
    pub fn sampling(&self) -> &[usize] {
        &self.sampling[..self.ndims]
    }

    /// Number of elements taken along each dimension
    #[must_use]
    pub fn extent(&self) -> Vec<usize> {
        self.size()
            .iter()
            .zip(self.sampling())
            .map(|(size, sampling)| size.div_ceil(*sampling))
            .collect()
    }

    /// Number of elements in the region
    #[must_use]
    pub fn len(&self) -> usize {
        self.extent().iter().product()
    }

    /// Always `false`, a resolved region holds at least one element
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reads a region of interest of the image at `source` into `buf`
///
/// Elements are stored contiguously in `buf`, dimension 0 fastest. The data is read front to
/// back, skipping what lies between the rows of the region.
///
/// # Errors
///
/// - errors of [`Roi::resolve`], raised before the file is opened
/// - [`Error::BufferTooSmall`] if `buf` cannot hold the region
/// - errors of [`DataReader::open`], [`DataReader::read_block`] and [`DataReader::skip_block`]
///
/// A `buf` larger than the region is filled up to the region size and reported as
/// [`SoftMismatch::OutputNotFilled`].
#[instrument(skip(layout, buf), level = "debug")]
pub fn read_roi(
    layout: &Layout,
    source: &DataSource,
    roi: &Roi,
    buf: &mut [u8],
) -> Result<Outcome> {
    if buf.is_empty() {
        return Ok(Outcome::Complete);
    }
    let region = roi.resolve(layout.dims())?;
    let roi_bytes = region.len() * layout.imel_size();
    if buf.len() < roi_bytes {
        return Err(Error::BufferTooSmall {
            needed: roi_bytes,
            got: buf.len(),
        });
    }
    let mut reader = DataReader::open(layout, source)?;
    let outcome = read_region(layout, &region, &mut reader, &mut buf[..roi_bytes])?;
    reader.close();
    if buf.len() > roi_bytes {
        return Ok(outcome.and(Outcome::Partial(SoftMismatch::OutputNotFilled {
            filled: roi_bytes,
            capacity: buf.len(),
        })));
    }
    Ok(outcome)
}

/// Reads `region` from an open reader positioned at the start of the data
///
/// `buf` must hold exactly the region.
pub(crate) fn read_region<R: Read + Seek>(
    layout: &Layout,
    region: &Region,
    reader: &mut DataReader<R>,
    buf: &mut [u8],
) -> Result<Outcome> {
    let imel = layout.imel_size();
    let strides = layout.strides();
    let extent = region.extent();
    let ndims = extent.len();
    let row_len = region.size().first().copied().unwrap_or(1);
    let sampling0 = region.sampling().first().copied().unwrap_or(1);
    let out_row = extent.first().copied().unwrap_or(1) * imel;
    let mut staging = if sampling0 > 1 {
        alloc_buffer(row_len * imel)?
    } else {
        Vec::new()
    };
    debug!(?extent, "reading region");

    // dimension 0 is read a row at a time, so only the outer dimensions are counted
    let mut rows = Odometer::new(extent.get(1..).unwrap_or(&[]))?;
    let mut cursor = 0u64;
    let mut outcome = Outcome::Complete;
    for out in buf.chunks_exact_mut(out_row) {
        if rows.is_exhausted() {
            break;
        }
        let element: usize = (0..ndims)
            .map(|d| {
                let step = if d == 0 { 0 } else { rows.position()[d - 1] };
                (region.offset()[d] + step * region.sampling()[d]) * strides[d]
            })
            .sum();
        let location = (element * imel) as u64;
        if cursor < location {
            reader.skip_block(location - cursor)?;
            cursor = location;
        }
        if sampling0 > 1 {
            outcome = outcome.and(reader.read_block(&mut staging)?);
            for (dst, src) in out
                .chunks_exact_mut(imel)
                .zip(staging.chunks_exact(imel).step_by(sampling0))
            {
                dst.copy_from_slice(src);
            }
            cursor += staging.len() as u64;
        } else {
            outcome = outcome.and(reader.read_block(out)?);
            cursor += out.len() as u64;
        }
        rows.advance();
    }
    Ok(outcome)
}
