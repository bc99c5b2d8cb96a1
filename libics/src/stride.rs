//! N-dimensional iteration over rectangular index regions
//!
//! Dimension 0 is always the innermost (fastest varying) one. Iterators are plain values owned by
//! the caller, there is no shared cursor state.

use crate::{Error, Result, MAX_DIMS};

/// Carry-propagating counter over the index space `0..extent[0] x 0..extent[1] x ...`
#[derive(Debug, Clone)]
pub struct Odometer {
    extent: [usize; MAX_DIMS],
    position: [usize; MAX_DIMS],
    ndims: usize,
    exhausted: bool,
}

impl Odometer {
    /// Creates an odometer positioned at the origin
    ///
    /// An odometer over zero dimensions visits a single point. One with a zero extent visits none.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyDims`] if `extent` has more than [`MAX_DIMS`] entries
    pub fn new(extent: &[usize]) -> Result<Self> {
        if extent.len() > MAX_DIMS {
            return Err(Error::TooManyDims(extent.len()));
        }
        let mut array = [0; MAX_DIMS];
        array[..extent.len()].copy_from_slice(extent);
        Ok(Self {
            extent: array,
            position: [0; MAX_DIMS],
            ndims: extent.len(),
            exhausted: extent.contains(&0),
        })
    }

    /// Current index
    #[must_use]
    pub fn position(&self) -> &[usize] {
        &self.position[..self.ndims]
    }

    /// Returns `true` once every index has been visited
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Steps to the next index, starting the carry at dimension `from`
    ///
    /// Lower dimensions are left untouched. Returns the dimension that was incremented without
    /// wrapping, or `None` when the outermost dimension wrapped and iteration is over.
    fn step_from(&mut self, from: usize) -> Option<usize> {
        if self.exhausted {
            return None;
        }
        for d in from..self.ndims {
            self.position[d] += 1;
            if self.position[d] < self.extent[d] {
                return Some(d);
            }
            self.position[d] = 0;
        }
        self.exhausted = true;
        None
    }

    /// Steps to the next element, dimension 0 fastest
    pub fn advance(&mut self) -> Option<usize> {
        self.step_from(0)
    }

    /// Steps to the start of the next dimension-0 run (dimensions 1 and up)
    pub fn advance_row(&mut self) -> Option<usize> {
        self.step_from(1)
    }

    /// Linear offset of the current position for the given strides
    #[must_use]
    pub fn offset(&self, strides: &[usize]) -> usize {
        self.position()
            .iter()
            .zip(strides)
            .map(|(p, s)| p * s)
            .sum()
    }
}

/// One contiguous-index run along dimension 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Row {
    /// Element offset of the first element of the run
    pub start: usize,
    /// Number of elements in the run
    pub len: usize,
    /// Element distance between consecutive elements of the run
    pub stride: usize,
}

impl Row {
    /// Returns `true` if the run occupies consecutive elements and can be moved in one piece
    #[must_use]
    pub const fn is_contiguous(&self) -> bool {
        self.stride == 1 || self.len <= 1
    }

    /// Element offsets of the run
    pub fn offsets(&self) -> impl Iterator<Item = usize> {
        let (start, stride) = (self.start, self.stride);
        (0..self.len).map(move |i| start + i * stride)
    }
}

/// Iterator over the dimension-0 runs of a strided region
///
/// Every element of the region is covered exactly once, in file order (dimension 0 innermost).
#[derive(Debug, Clone)]
pub struct Rows {
    odometer: Odometer,
    strides: [usize; MAX_DIMS],
    base: usize,
    first: bool,
}

impl Rows {
    /// Runs over a region of the given extent, elements `strides[d]` apart along dimension `d`,
    /// starting at element offset `base`
    ///
    /// # Errors
    ///
    /// - [`Error::TooManyDims`] if there are more than [`MAX_DIMS`] dimensions
    /// - [`Error::DimensionalityMismatch`] if `extent` and `strides` differ in length
    pub fn new(extent: &[usize], strides: &[usize], base: usize) -> Result<Self> {
        if strides.len() != extent.len() {
            return Err(Error::DimensionalityMismatch {
                expected: extent.len(),
                got: strides.len(),
            });
        }
        let odometer = Odometer::new(extent)?;
        let mut array = [0; MAX_DIMS];
        array[..strides.len()].copy_from_slice(strides);
        Ok(Self {
            odometer,
            strides: array,
            base,
            first: true,
        })
    }

    /// Runs over a full contiguous array of the given extent
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyDims`] if there are more than [`MAX_DIMS`] dimensions
    pub fn contiguous(extent: &[usize]) -> Result<Self> {
        Self::new(extent, &crate::contiguous_strides(extent), 0)
    }

    fn ndims(&self) -> usize {
        self.odometer.ndims
    }
}

impl Iterator for Rows {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        if self.first {
            self.first = false;
        } else {
            self.odometer.advance_row()?;
        }
        if self.odometer.is_exhausted() {
            return None;
        }
        let ndims = self.ndims();
        let (len, stride) = if ndims == 0 {
            (1, 1)
        } else {
            (self.odometer.extent[0], self.strides[0])
        };
        Some(Row {
            start: self.base + self.odometer.offset(&self.strides[..ndims]),
            len,
            stride,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_dims_is_one_element() -> Result<()> {
        let rows: Vec<_> = Rows::contiguous(&[])?.collect();
        assert_eq!(
            rows,
            vec![Row {
                start: 0,
                len: 1,
                stride: 1
            }]
        );
        Ok(())
    }

    #[test]
    fn zero_extent_is_empty() -> Result<()> {
        assert_eq!(Rows::contiguous(&[3, 0, 2])?.count(), 0);
        Ok(())
    }

    #[test]
    fn contiguous_rows_cover_everything_once() -> Result<()> {
        let extent = [3, 4, 2];
        let mut seen = vec![0; 24];
        let mut count = 0;
        for row in Rows::contiguous(&extent)? {
            assert!(row.is_contiguous());
            assert_eq!(row.len, 3);
            for offset in row.offsets() {
                seen[offset] += 1;
            }
            count += 1;
        }
        assert_eq!(count, 8);
        assert!(seen.iter().all(|&n| n == 1));
        Ok(())
    }

    #[test]
    fn transposed_strides_visit_in_file_order() -> Result<()> {
        // a 2x3 array stored row-major in memory, walked column-major
        let rows: Vec<_> = Rows::new(&[2, 3], &[3, 1], 0)?.collect();
        assert_eq!(rows.len(), 3);
        assert!(!rows[0].is_contiguous());
        let offsets: Vec<_> = rows.iter().flat_map(Row::offsets).collect();
        assert_eq!(offsets, vec![0, 3, 1, 4, 2, 5]);
        Ok(())
    }

    #[test]
    fn odometer_reports_carried_dimension() -> Result<()> {
        let mut odo = Odometer::new(&[2, 2])?;
        assert_eq!(odo.advance(), Some(0));
        assert_eq!(odo.position(), &[1, 0]);
        assert_eq!(odo.advance(), Some(1));
        assert_eq!(odo.position(), &[0, 1]);
        assert_eq!(odo.advance(), Some(0));
        assert_eq!(odo.advance(), None);
        assert!(odo.is_exhausted());
        Ok(())
    }

    #[test]
    fn mismatched_strides_are_rejected() {
        assert!(matches!(
            Rows::new(&[2, 2], &[1], 0),
            Err(Error::DimensionalityMismatch { .. })
        ));
        assert!(matches!(
            Odometer::new(&[1; 11]),
            Err(Error::TooManyDims(11))
        ));
    }
}
