use std::io;

use thiserror::Error;

use crate::MAX_DIMS;

/// Result type used throughout `libics`
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
#[non_exhaustive]
/// Possible `libics` errors
pub enum Error {
    /// An OS-level open, seek, read or write failed
    #[error("i/o error while {context}")]
    Io {
        /// What was being done when the error occurred
        context: &'static str,
        /// The underlying error
        #[source]
        source: io::Error,
    },
    /// The data stream ended before the requested amount of data was read
    #[error("unexpected end of the data stream")]
    EndOfStream,
    /// The compressed input stream is corrupted
    #[error("corrupted stream: {0}")]
    CorruptedStream(&'static str),
    /// The deflate engine refused the input
    #[error("deflate stream error")]
    Inflate(#[from] flate2::DecompressError),
    /// The deflate engine failed while compressing
    #[error("compression failed")]
    Deflate(#[from] flate2::CompressError),
    /// Data has more dimensions than [`MAX_DIMS`]
    #[error("too many dimensions: {0} (at most {} are supported)", MAX_DIMS)]
    TooManyDims(usize),
    /// A layout extent that must be at least 1 is zero
    #[error("dimension {0} has zero extent")]
    EmptyDimension(usize),
    /// The buffer given is too small for the requested transfer
    #[error("buffer too small: {needed} bytes needed, {got} available")]
    BufferTooSmall {
        /// bytes required
        needed: usize,
        /// bytes provided
        got: usize,
    },
    /// The region of interest extends outside the image
    #[error("the region of interest extends outside the image")]
    IllegalRoi,
    /// The caller's dimensionality does not match the layout
    #[error("dimensionality mismatch: layout has {expected} dimensions, got {got}")]
    DimensionalityMismatch {
        /// dimensionality of the layout
        expected: usize,
        /// dimensionality given by the caller
        got: usize,
    },
    /// A parameter is not legal or does not match a value previously given
    #[error("illegal parameter: {0}")]
    IllegalParameter(&'static str),
    /// A buffer length is not a whole number of image elements
    #[error("length {length} is not a multiple of the element size {size}")]
    BitsVsSizeConflict {
        /// length of the buffer in bytes
        length: usize,
        /// element size in bytes
        size: usize,
    },
    /// A byte order is not a permutation of the element's byte positions
    #[error("invalid byte order: {0}")]
    InvalidByteOrder(&'static str),
    /// A staging or paging buffer could not be allocated
    #[error("failed to allocate {0} bytes")]
    Alloc(usize),
    /// The declared compression cannot be used for this operation
    #[error("unknown or unsupported compression")]
    UnknownCompression,
    /// `compress` data can only be read once, in a single block
    #[error("compress-compressed data cannot be read in blocks")]
    BlockNotAllowed,
    /// Random access was requested on compressed data
    #[error("random access only supports uncompressed data")]
    RaOnlyUncompressed,
    /// Random access was requested on data that is not embedded in the ICS file
    #[error("random access only supports single-file (header + data) images")]
    RaOnlySingleFile,
    /// A write was requested on a handle opened read-only
    #[error("the file was opened read-only")]
    ReadOnly,
}

/// Broad classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// OS-level open/seek/read/write failure
    Io,
    /// Bad magic, bad trailer, invalid code
    CorruptedStream,
    /// Oversized dimensionality, buffer too small, illegal ROI, rank mismatch
    Config,
    /// Allocation failure
    Resource,
    /// Unknown compression or unusable codec
    Unsupported,
}

impl Error {
    /// Returns the broad class this error belongs to
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } | Self::EndOfStream => ErrorKind::Io,
            Self::CorruptedStream(_) | Self::Inflate(_) => ErrorKind::CorruptedStream,
            Self::TooManyDims(_)
            | Self::EmptyDimension(_)
            | Self::BufferTooSmall { .. }
            | Self::IllegalRoi
            | Self::DimensionalityMismatch { .. }
            | Self::IllegalParameter(_)
            | Self::BitsVsSizeConflict { .. }
            | Self::InvalidByteOrder(_)
            | Self::ReadOnly => ErrorKind::Config,
            Self::Alloc(_) => ErrorKind::Resource,
            Self::Deflate(_)
            | Self::UnknownCompression
            | Self::BlockNotAllowed
            | Self::RaOnlyUncompressed
            | Self::RaOnlySingleFile => ErrorKind::Unsupported,
        }
    }

    pub(crate) fn io(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Io { context, source }
    }
}

/// A non-fatal mismatch between what was asked for and what was transferred
///
/// The data already transferred remains valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftMismatch {
    /// The output buffer is larger than the data available for it
    OutputNotFilled {
        /// bytes written into the output buffer
        filled: usize,
        /// size of the output buffer
        capacity: usize,
    },
    /// The buffer size does not match the size declared by the layout
    SizeConflict {
        /// size declared by the layout
        declared: usize,
        /// size of the buffer
        actual: usize,
    },
}

/// Result of a transfer that may only partially fill its destination
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Everything requested was transferred
    Complete,
    /// The transfer succeeded with a soft mismatch
    Partial(SoftMismatch),
}

impl Outcome {
    /// Returns `true` if no soft mismatch was reported
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Keeps the first soft mismatch of two outcomes
    pub(crate) const fn and(self, other: Self) -> Self {
        match self {
            Self::Complete => other,
            Self::Partial(_) => self,
        }
    }
}

/// Allocates a zeroed buffer, reporting failure instead of aborting
pub(crate) fn alloc_buffer(len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| Error::Alloc(len))?;
    buf.resize(len, 0);
    Ok(buf)
}
