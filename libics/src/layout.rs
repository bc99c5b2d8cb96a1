use std::path::{Path, PathBuf};

use bon::Builder;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{byte_order::ByteOrder, Error, Result, MAX_DIMS};

/// The numeric representation of an image element (imel)
///
/// The string forms match the tokens used in ICS headers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, IntoStaticStr, Display, EnumIter,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DataType {
    /// integer, unsigned, 8 bits
    Uint8,
    /// integer, signed, 8 bits
    Sint8,
    /// integer, unsigned, 16 bits
    Uint16,
    /// integer, signed, 16 bits
    Sint16,
    /// integer, unsigned, 32 bits
    Uint32,
    /// integer, signed, 32 bits
    Sint32,
    /// real, 32 bits
    Real32,
    /// real, 64 bits
    Real64,
    /// complex, 2 x 32 bits
    Complex32,
    /// complex, 2 x 64 bits
    Complex64,
}

impl DataType {
    /// Size of one element in bytes
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::Uint8 | Self::Sint8 => 1,
            Self::Uint16 | Self::Sint16 => 2,
            Self::Uint32 | Self::Sint32 | Self::Real32 => 4,
            Self::Real64 | Self::Complex32 => 8,
            Self::Complex64 => 16,
        }
    }

    /// Number of scalar components per element (2 for complex types)
    #[must_use]
    pub const fn components(self) -> usize {
        match self {
            Self::Complex32 | Self::Complex64 => 2,
            _ => 1,
        }
    }
}

/// How the image data is compressed on disk
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, EnumString, IntoStaticStr, Display,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Compression {
    /// No compression
    #[default]
    Uncompressed,
    /// Legacy `compress` (LZW, `.Z`). Read-only: writing produces gzip instead.
    Compress,
    /// Gzip container around a raw deflate stream
    Gzip,
}

impl Compression {
    /// The compression actually used when writing data declared with `self`
    #[must_use]
    pub const fn for_writing(self) -> Self {
        match self {
            Self::Compress => Self::Gzip,
            other => other,
        }
    }
}

/// Layout of the binary image data, as declared by the ICS header
///
/// A layout is immutable for the duration of a transfer. Use [`Layout::builder`] to create one and
/// [`Layout::validate`] (called by every transfer) to check it.
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct Layout {
    /// Element representation
    data_type: DataType,
    /// Extent of each dimension, dimension 0 varies fastest
    #[builder(into)]
    dims: Vec<usize>,
    /// Declared storage order of the bytes of each element. `None` means native order.
    byte_order: Option<ByteOrder>,
    /// Declared compression
    #[builder(default)]
    compression: Compression,
    /// Compression level used when writing gzip data (0-9)
    #[builder(default = 6)]
    compression_level: u32,
}

impl Layout {
    /// Element representation
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Extent of each dimension
    #[must_use]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Number of dimensions
    #[must_use]
    pub fn ndims(&self) -> usize {
        self.dims.len()
    }

    /// Bytes per image element
    #[must_use]
    pub const fn imel_size(&self) -> usize {
        self.data_type.size()
    }

    /// Declared byte order of the stored data
    #[must_use]
    pub const fn byte_order(&self) -> Option<&ByteOrder> {
        self.byte_order.as_ref()
    }

    /// Declared compression
    #[must_use]
    pub const fn compression(&self) -> Compression {
        self.compression
    }

    /// Gzip compression level
    #[must_use]
    pub const fn compression_level(&self) -> u32 {
        self.compression_level
    }

    /// Returns a copy of this layout with a different compression
    #[must_use]
    pub fn with_compression(&self, compression: Compression) -> Self {
        Self {
            compression,
            ..self.clone()
        }
    }

    /// Number of elements in the image
    #[must_use]
    pub fn image_size(&self) -> usize {
        self.dims.iter().product()
    }

    /// Size of the image data in bytes
    #[must_use]
    pub fn data_size(&self) -> usize {
        self.image_size() * self.imel_size()
    }

    /// Element strides of the image as stored on disk (dimension 0 contiguous)
    #[must_use]
    pub fn strides(&self) -> Vec<usize> {
        contiguous_strides(&self.dims)
    }

    /// Checks the invariants of the layout
    ///
    /// # Errors
    ///
    /// - [`Error::TooManyDims`] if there are more than [`MAX_DIMS`] dimensions
    /// - [`Error::EmptyDimension`] if an extent is zero
    /// - [`Error::InvalidByteOrder`] if the byte order does not cover the element size
    pub fn validate(&self) -> Result<()> {
        if self.dims.len() > MAX_DIMS {
            return Err(Error::TooManyDims(self.dims.len()));
        }
        if let Some(i) = self.dims.iter().position(|&d| d == 0) {
            return Err(Error::EmptyDimension(i));
        }
        if let Some(order) = &self.byte_order {
            if order.len() != self.imel_size() {
                return Err(Error::InvalidByteOrder(
                    "byte order length differs from the element size",
                ));
            }
        }
        Ok(())
    }
}

/// Element strides of a contiguous array with the given extents, dimension 0 fastest
#[must_use]
pub fn contiguous_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = Vec::with_capacity(dims.len());
    let mut acc = 1;
    for &d in dims {
        strides.push(acc);
        acc *= d;
    }
    strides
}

/// Where the binary data of an ICS image is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Version 1: a separate `.ids` file next to the `.ics` header
    Separate,
    /// Version 2: the data follows the header in the same `.ics` file
    Embedded,
    /// Version 2: the header refers to a data file by name
    External,
}

/// Location of the binary image data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSource {
    /// File holding the data
    pub path: PathBuf,
    /// Byte offset of the first data byte in the file
    pub offset: u64,
    /// How the file relates to the ICS header
    pub kind: SourceKind,
}

impl DataSource {
    /// A version 1 `.ids` data file belonging to the header at `ics_path`
    #[must_use]
    pub fn separate(ics_path: impl AsRef<Path>) -> Self {
        Self {
            path: Self::ids_path(ics_path),
            offset: 0,
            kind: SourceKind::Separate,
        }
    }

    /// Data embedded in a version 2 `.ics` file, starting at `offset`
    #[must_use]
    pub fn embedded(path: impl Into<PathBuf>, offset: u64) -> Self {
        Self {
            path: path.into(),
            offset,
            kind: SourceKind::Embedded,
        }
    }

    /// Data in an arbitrary file referenced by a version 2 header
    #[must_use]
    pub fn external(path: impl Into<PathBuf>, offset: u64) -> Self {
        Self {
            path: path.into(),
            offset,
            kind: SourceKind::External,
        }
    }

    /// Returns `true` if header and data share one file
    #[must_use]
    pub const fn is_single_file(&self) -> bool {
        matches!(self.kind, SourceKind::Embedded)
    }

    /// Derives the `.ids` file name from an ICS file name
    ///
    /// An `.ics` extension is replaced, any other name gets `.ids` appended.
    #[must_use]
    pub fn ids_path(ics_path: impl AsRef<Path>) -> PathBuf {
        let path = ics_path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("ics") || ext.eq_ignore_ascii_case("ids") => {
                path.with_extension("ids")
            }
            _ => {
                let mut name = path.as_os_str().to_owned();
                name.push(".ids");
                PathBuf::from(name)
            }
        }
    }
}
