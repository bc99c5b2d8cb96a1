use std::{
    fs::{File, OpenOptions},
    io::{self, BufWriter, Seek, Write},
    path::Path,
};

use bon::Builder;
use itertools::Itertools;
use strum::{Display, EnumString};
use tracing::{debug, info, instrument};

use crate::{
    byte_order::ByteOrderMap, contiguous_strides, Compression, DataSource, Error, Layout, Result,
    SourceKind,
};

mod page;

use page::Page;
pub use page::PAGE_SIZE;

/// How a [`RandomAccess`] handle may touch the file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
pub enum AccessMode {
    /// reads only
    #[default]
    #[strum(serialize = "ro")]
    ReadOnly,
    /// reads and writes
    #[strum(serialize = "rw")]
    ReadWrite,
}

/// The part of the stored image a random access transfer touches
///
/// Along dimension `d` the transfer visits `count[d]` elements, starting at `origin[d]` and
/// moving `interval[d]` elements at a time. Intervals may be negative to walk a dimension
/// backwards. Without `count` the whole extent of the image is used, `origin` defaults to the
/// first element and `interval` to 1.
#[derive(Debug, Clone, Default, PartialEq, Eq, Builder)]
pub struct FileRegion {
    /// Number of elements visited along each dimension
    #[builder(into)]
    count: Option<Vec<usize>>,
    /// First element along each dimension
    #[builder(into)]
    origin: Option<Vec<usize>>,
    /// Step between visited elements along each dimension
    #[builder(into)]
    interval: Option<Vec<isize>>,
}

/// Where the elements of a random access transfer live in the caller's buffer
///
/// `strides` gives the distance in elements between neighbours along each dimension and is
/// required. When `dims` is given, origin and interval are checked against it the way the file
/// region is checked against the image.
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct MemoryRegion {
    /// Element strides of the buffer
    #[builder(into)]
    strides: Vec<usize>,
    /// Extent of the buffer, only used for checking
    #[builder(into)]
    dims: Option<Vec<usize>>,
    /// Element of the buffer the first element of the region goes to
    #[builder(into)]
    origin: Option<Vec<usize>>,
    /// Step between elements along each dimension
    #[builder(into)]
    interval: Option<Vec<isize>>,
}

impl MemoryRegion {
    /// A buffer holding an image of extent `dims` contiguously
    #[must_use]
    pub fn contiguous(dims: &[usize]) -> Self {
        Self {
            strides: contiguous_strides(dims),
            dims: Some(dims.to_vec()),
            origin: None,
            interval: None,
        }
    }
}

/// Producer of the header text of an image file
///
/// [`RandomAccess::create`] leaves the header to an implementation of this trait and places the
/// data right after whatever it writes.
pub trait HeaderWriter {
    /// Writes the header of a single-file image with `layout` to `out`
    ///
    /// # Errors
    ///
    /// Any error writing to `out`
    fn write_header(&self, layout: &Layout, out: &mut dyn Write) -> io::Result<()>;
}

/// One dimension of a transfer, steps in bytes
#[derive(Debug, Clone, Copy)]
struct Axis {
    count: usize,
    file_step: i64,
    memory_step: i64,
}

/// A transfer checked against the file and the caller's buffer
#[derive(Debug)]
struct Plan {
    axes: Vec<Axis>,
    file_base: i64,
    memory_base: i64,
}

impl Plan {
    /// Byte offsets in the data and in the buffer of every element, first axis fastest
    fn elements(&self) -> impl Iterator<Item = (u64, usize)> + '_ {
        let counts = self.axes.iter().map(|a| a.count).collect_vec();
        let total: usize = counts.iter().product();
        let mut position = vec![0usize; counts.len()];
        (0..total).map(move |i| {
            if i > 0 {
                for (p, &count) in position.iter_mut().zip(&counts) {
                    *p += 1;
                    if *p < count {
                        break;
                    }
                    *p = 0;
                }
            }
            let (file, memory) = self.axes.iter().zip(&position).fold(
                (self.file_base, self.memory_base),
                |(f, m), (axis, &p)| {
                    let p = p as i64;
                    (f + p * axis.file_step, m + p * axis.memory_step)
                },
            );
            // both were bounds checked when the plan was made
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            (file as u64, memory as usize)
        })
    }
}

const OVERFLOW: Error = Error::IllegalParameter("region offsets overflow");

fn to_i64(value: usize) -> Result<i64> {
    i64::try_from(value).map_err(|_| OVERFLOW)
}

/// Checks the elements `origin + k * interval`, `k < count`, lie in `0..dim` along every axis
fn check_limits(
    dims: &[usize],
    count: &[usize],
    origin: Option<&[usize]>,
    interval: Option<&[isize]>,
) -> Result<()> {
    for (d, (&dim, &n)) in dims.iter().zip(count).enumerate() {
        let low = origin.map_or(0, |o| o[d]);
        let step = interval.map_or(1, |i| i[d]) as i64;
        let high = to_i64(n.checked_sub(1).ok_or(Error::IllegalRoi)?)?
            .checked_mul(step)
            .and_then(|span| span.checked_add(to_i64(low).ok()?))
            .ok_or(OVERFLOW)?;
        if low >= dim || high < 0 || high >= to_i64(dim)? {
            return Err(Error::IllegalRoi);
        }
    }
    Ok(())
}

fn check_rank<T>(field: Option<&[T]>, ndims: usize) -> Result<()> {
    match field {
        Some(field) if field.len() != ndims => Err(Error::DimensionalityMismatch {
            expected: ndims,
            got: field.len(),
        }),
        _ => Ok(()),
    }
}

/// Byte offset of `origin` and the byte step of each axis for the given element strides
fn steps(
    imel: i64,
    strides: &[usize],
    origin: Option<&[usize]>,
    interval: Option<&[isize]>,
) -> Result<(i64, Vec<i64>)> {
    let mut base = 0i64;
    let mut steps = Vec::with_capacity(strides.len());
    for (d, &stride) in strides.iter().enumerate() {
        let stride = to_i64(stride)?.checked_mul(imel).ok_or(OVERFLOW)?;
        let o = to_i64(origin.map_or(0, |o| o[d]))?;
        base = o
            .checked_mul(stride)
            .and_then(|offset| base.checked_add(offset))
            .ok_or(OVERFLOW)?;
        let step = interval.map_or(1, |i| i[d]) as i64;
        steps.push(step.checked_mul(stride).ok_or(OVERFLOW)?);
    }
    Ok((base, steps))
}

/// Handle for in-place reads and writes of regions of an uncompressed single-file image
///
/// Every transfer goes through one paging buffer of at most [`PAGE_SIZE`] bytes, whatever the
/// size of the image. Elements are handed out and taken in native byte order.
#[derive(Debug)]
pub struct RandomAccess {
    file: File,
    layout: Layout,
    data_start: u64,
    map: ByteOrderMap,
    mode: AccessMode,
}

impl RandomAccess {
    /// Opens the image at `source` for random access
    ///
    /// # Errors
    ///
    /// - [`Error::RaOnlySingleFile`] unless the data is embedded in the ICS file
    /// - [`Error::RaOnlyUncompressed`] unless the data is uncompressed
    /// - errors of [`Layout::validate`] and [`ByteOrderMap::for_data_type`]
    /// - [`Error::Io`] if the file cannot be opened
    /// - [`Error::EndOfStream`] if the file is too short to hold the data
    #[instrument(skip(layout, source), fields(path = %source.path.display()), level = "debug")]
    pub fn open(layout: &Layout, source: &DataSource, mode: AccessMode) -> Result<Self> {
        if source.kind != SourceKind::Embedded {
            return Err(Error::RaOnlySingleFile);
        }
        if layout.compression() != Compression::Uncompressed {
            return Err(Error::RaOnlyUncompressed);
        }
        layout.validate()?;
        let map = ByteOrderMap::for_data_type(layout.byte_order(), layout.data_type())?;
        let file = OpenOptions::new()
            .read(true)
            .write(mode == AccessMode::ReadWrite)
            .open(&source.path)
            .map_err(Error::io("opening the image file"))?;
        let len = file
            .metadata()
            .map_err(Error::io("reading the file size"))?
            .len();
        if len < source.offset + layout.data_size() as u64 {
            return Err(Error::EndOfStream);
        }
        debug!(%mode, offset = source.offset, "opened for random access");
        Ok(Self {
            file,
            layout: layout.clone(),
            data_start: source.offset,
            map,
            mode,
        })
    }

    /// Creates a new single-file image at `path` and returns the offset of its data
    ///
    /// The header comes from `header`. The data that follows is zero filled by extending the file
    /// to its final length. The file can then be opened with [`RandomAccess::open`] and
    /// [`DataSource::embedded`] at the returned offset.
    ///
    /// # Errors
    ///
    /// - [`Error::RaOnlyUncompressed`] if `layout` declares compression
    /// - errors of [`Layout::validate`]
    /// - [`Error::Io`] if the file cannot be created or written
    #[instrument(
        skip(path, layout, header),
        fields(path = %path.as_ref().display()),
        level = "debug"
    )]
    pub fn create(
        path: impl AsRef<Path>,
        layout: &Layout,
        header: &impl HeaderWriter,
    ) -> Result<u64> {
        if layout.compression() != Compression::Uncompressed {
            return Err(Error::RaOnlyUncompressed);
        }
        layout.validate()?;
        let file = File::create(path.as_ref()).map_err(Error::io("creating the image file"))?;
        let mut out = BufWriter::new(file);
        header
            .write_header(layout, &mut out)
            .map_err(Error::io("writing the header"))?;
        let offset = out
            .stream_position()
            .map_err(Error::io("writing the header"))?;
        let file = out
            .into_inner()
            .map_err(|e| Error::Io {
                context: "writing the header",
                source: e.into_error(),
            })?;
        file.set_len(offset + layout.data_size() as u64)
            .map_err(Error::io("sizing the image file"))?;
        info!(offset, len = layout.data_size(), "created image file");
        Ok(offset)
    }

    /// Layout of the image
    #[must_use]
    pub const fn layout(&self) -> &Layout {
        &self.layout
    }

    /// The mode the handle was opened in
    #[must_use]
    pub const fn mode(&self) -> AccessMode {
        self.mode
    }

    fn plan(&self, region: &FileRegion, memory: &MemoryRegion, len: usize) -> Result<Plan> {
        let dims = self.layout.dims();
        let ndims = dims.len();
        check_rank(Some(memory.strides.as_slice()), ndims)?;
        check_rank(region.count.as_deref(), ndims)?;
        check_rank(region.origin.as_deref(), ndims)?;
        check_rank(region.interval.as_deref(), ndims)?;
        check_rank(memory.dims.as_deref(), ndims)?;
        check_rank(memory.origin.as_deref(), ndims)?;
        check_rank(memory.interval.as_deref(), ndims)?;

        let count = region.count.as_deref().unwrap_or(dims);
        check_limits(dims, count, region.origin.as_deref(), region.interval.as_deref())?;
        if let Some(memory_dims) = &memory.dims {
            check_limits(
                memory_dims,
                count,
                memory.origin.as_deref(),
                memory.interval.as_deref(),
            )?;
        }

        let imel = to_i64(self.layout.imel_size())?;
        let (mut file_base, file_steps) = steps(
            imel,
            &self.layout.strides(),
            region.origin.as_deref(),
            region.interval.as_deref(),
        )?;
        let (mut memory_base, memory_steps) = steps(
            imel,
            &memory.strides,
            memory.origin.as_deref(),
            memory.interval.as_deref(),
        )?;

        let mut axes = Vec::with_capacity(ndims);
        for ((&n, file_step), memory_step) in count.iter().zip(file_steps).zip(memory_steps) {
            let mut axis = Axis {
                count: n,
                file_step,
                memory_step,
            };
            if axis.file_step < 0 {
                let span = to_i64(n - 1)?;
                axis.file_step = axis.file_step.checked_neg().ok_or(OVERFLOW)?;
                axis.memory_step = axis.memory_step.checked_neg().ok_or(OVERFLOW)?;
                file_base = axis
                    .file_step
                    .checked_mul(span)
                    .and_then(|d| file_base.checked_sub(d))
                    .ok_or(OVERFLOW)?;
                memory_base = axis
                    .memory_step
                    .checked_mul(span)
                    .and_then(|d| memory_base.checked_sub(d))
                    .ok_or(OVERFLOW)?;
            }
            axes.push(axis);
        }

        let (low, high) = axes.iter().try_fold((memory_base, memory_base), |(lo, hi), a| {
            let span = to_i64(a.count - 1)?
                .checked_mul(a.memory_step)
                .ok_or(OVERFLOW)?;
            let lo = lo.checked_add(span.min(0)).ok_or(OVERFLOW)?;
            let hi = hi.checked_add(span.max(0)).ok_or(OVERFLOW)?;
            Ok::<_, Error>((lo, hi))
        })?;
        if low < 0 {
            return Err(Error::IllegalRoi);
        }
        let needed = high
            .checked_add(imel)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or(OVERFLOW)?;
        if needed > len {
            return Err(Error::BufferTooSmall { needed, got: len });
        }

        if !axes
            .iter()
            .tuple_windows()
            .all(|(a, b)| a.file_step <= b.file_step)
        {
            axes = axes.into_iter().sorted_by_key(|a| a.file_step).collect();
            debug!(?axes, "reordered axes by file stride");
        }
        Ok(Plan {
            axes,
            file_base,
            memory_base,
        })
    }

    fn page(&mut self) -> Result<Page<'_, File>> {
        let data_len = self.layout.data_size() as u64;
        Page::new(&mut self.file, self.data_start, data_len)
    }

    /// Reads the elements `region` selects into `buf`, placed as `memory` describes
    ///
    /// # Errors
    ///
    /// - [`Error::DimensionalityMismatch`] if a region field does not have one entry per
    ///   dimension of the image
    /// - [`Error::IllegalRoi`] if the region leaves the image, or the memory region leaves
    ///   `memory.dims` or the start of `buf`
    /// - [`Error::BufferTooSmall`] if the memory region extends past the end of `buf`
    /// - [`Error::Io`] on any read failure
    #[instrument(skip(self, buf), fields(len = buf.len()), level = "debug")]
    pub fn read(
        &mut self,
        region: &FileRegion,
        buf: &mut [u8],
        memory: &MemoryRegion,
    ) -> Result<()> {
        let plan = self.plan(region, memory, buf.len())?;
        let map = self.map;
        let imel = map.as_slice().len();
        let mut page = self.page()?;
        for (file, at) in plan.elements() {
            page.read_element(file, map.as_slice(), &mut buf[at..at + imel])?;
        }
        Ok(())
    }

    /// Writes the elements of `buf`, placed as `memory` describes, to the part `region` selects
    ///
    /// Elements outside the region are left as they are on disk.
    ///
    /// # Errors
    ///
    /// - [`Error::ReadOnly`] if the handle was opened [`AccessMode::ReadOnly`]
    /// - the errors of [`RandomAccess::read`]
    /// - [`Error::Io`] on any write failure
    #[instrument(skip(self, buf), fields(len = buf.len()), level = "debug")]
    pub fn write(
        &mut self,
        region: &FileRegion,
        buf: &[u8],
        memory: &MemoryRegion,
    ) -> Result<()> {
        if self.mode == AccessMode::ReadOnly {
            return Err(Error::ReadOnly);
        }
        let plan = self.plan(region, memory, buf.len())?;
        let map = self.map;
        let imel = map.as_slice().len();
        let mut page = self.page()?;
        for (file, at) in plan.elements() {
            page.write_element(file, map.as_slice(), &buf[at..at + imel])?;
        }
        page.flush()
    }

    /// Closes the handle, making sure written data reached the disk
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if syncing the file fails
    pub fn close(self) -> Result<()> {
        if self.mode == AccessMode::ReadWrite {
            self.file.sync_all().map_err(Error::io("closing the image file"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn limits_follow_the_interval() {
        let dims = [10, 4];
        assert!(check_limits(&dims, &[5, 4], Some(&[0, 0]), Some(&[2, 1])).is_ok());
        assert!(check_limits(&dims, &[5, 4], Some(&[9, 3]), Some(&[-2, -1])).is_ok());
        assert!(matches!(
            check_limits(&dims, &[6, 4], None, Some(&[2, 1])),
            Err(Error::IllegalRoi)
        ));
        assert!(matches!(
            check_limits(&dims, &[2, 1], Some(&[0, 0]), Some(&[-1, 1])),
            Err(Error::IllegalRoi)
        ));
        assert!(matches!(
            check_limits(&dims, &[1, 1], Some(&[10, 0]), None),
            Err(Error::IllegalRoi)
        ));
        assert!(matches!(
            check_limits(&dims, &[0, 1], None, None),
            Err(Error::IllegalRoi)
        ));
    }

    #[test]
    fn byte_steps_follow_origin_and_interval() -> Result<()> {
        let dims = [4, 3];
        let (base, file) = steps(2, &contiguous_strides(&dims), Some(&[3, 0]), Some(&[-1, 1]))?;
        assert_eq!((base, file.clone()), (6, vec![-2, 8]));
        let (_, memory) = steps(2, &[3, 1], None, None)?;
        assert_eq!(memory, vec![6, 2]);
        Ok(())
    }

    #[test]
    fn elements_visit_every_offset() {
        let plan = Plan {
            axes: vec![
                Axis {
                    count: 2,
                    file_step: 2,
                    memory_step: 4,
                },
                Axis {
                    count: 3,
                    file_step: 10,
                    memory_step: -8,
                },
            ],
            file_base: 1,
            memory_base: 16,
        };
        let visited = plan.elements().collect_vec();
        assert_eq!(
            visited,
            vec![(1, 16), (3, 20), (11, 8), (13, 12), (21, 0), (23, 4)]
        );
    }

    #[test]
    fn rank_is_checked() {
        assert!(check_rank(Some(&[1usize, 2][..]), 2).is_ok());
        assert!(check_rank::<usize>(None, 3).is_ok());
        assert!(matches!(
            check_rank(Some(&[1usize][..]), 2),
            Err(Error::DimensionalityMismatch {
                expected: 2,
                got: 1
            })
        ));
    }

    #[test]
    fn access_mode_tokens() {
        assert_eq!("ro".parse::<AccessMode>(), Ok(AccessMode::ReadOnly));
        assert_eq!(AccessMode::ReadWrite.to_string(), "rw");
    }
}
