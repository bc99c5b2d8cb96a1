//! Per-element byte order normalization
//!
//! A [`ByteOrder`] lists, for each byte of an element from least to most significant, the
//! (1-based) position at which that byte is stored. This is the same notation the ICS header
//! uses in its `byte_order` field: a little endian `uint32` is `1 2 3 4`, a big endian one
//! `4 3 2 1`.

use std::fmt;

use tracing::trace;

use crate::{DataType, Error, Result, MAX_IMEL_SIZE};

const LITTLE_ENDIAN_MACHINE: bool = cfg!(target_endian = "little");

/// Storage order of the bytes within one image element
///
/// Always a permutation of `1..=len`, checked on construction.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteOrder {
    order: [u8; MAX_IMEL_SIZE],
    len: u8,
}

impl ByteOrder {
    /// Creates a byte order from its ICS notation
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidByteOrder`] if `order` is empty, longer than [`MAX_IMEL_SIZE`] or
    /// not a permutation of `1..=order.len()`
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(order: &[u8]) -> Result<Self> {
        if order.is_empty() {
            return Err(Error::InvalidByteOrder("empty byte order"));
        }
        if order.len() > MAX_IMEL_SIZE {
            return Err(Error::InvalidByteOrder("byte order longer than 16 bytes"));
        }
        let mut seen = [false; MAX_IMEL_SIZE];
        for &position in order {
            let index = usize::from(position).wrapping_sub(1);
            if index >= order.len() {
                return Err(Error::InvalidByteOrder("byte position out of range"));
            }
            if seen[index] {
                return Err(Error::InvalidByteOrder("byte position repeated"));
            }
            seen[index] = true;
        }
        let mut array = [0; MAX_IMEL_SIZE];
        array[..order.len()].copy_from_slice(order);
        Ok(Self {
            order: array,
            len: order.len() as u8,
        })
    }

    /// Little endian order for elements of `bytes` bytes
    ///
    /// # Errors
    ///
    /// Fails if `bytes` is 0 or larger than [`MAX_IMEL_SIZE`]
    pub fn little_endian(bytes: usize) -> Result<Self> {
        Self::sequence(bytes, 1, |i, _| i + 1)
    }

    /// Big endian order for elements of `bytes` bytes
    ///
    /// # Errors
    ///
    /// Fails if `bytes` is 0 or larger than [`MAX_IMEL_SIZE`]
    pub fn big_endian(bytes: usize) -> Result<Self> {
        Self::sequence(bytes, 1, |i, n| n - i)
    }

    /// The order in which this machine stores elements of `data_type`
    ///
    /// Complex types are stored as two scalars, each in native order.
    #[must_use]
    pub fn native(data_type: DataType) -> Self {
        let components = data_type.components();
        let result = if LITTLE_ENDIAN_MACHINE {
            Self::sequence(data_type.size(), components, |i, _| i + 1)
        } else {
            Self::sequence(data_type.size(), components, |i, n| n - i)
        };
        // every data type size is in 1..=MAX_IMEL_SIZE
        result.unwrap_or(Self {
            order: [0; MAX_IMEL_SIZE],
            len: 0,
        })
    }

    #[allow(clippy::cast_possible_truncation)]
    fn sequence(
        bytes: usize,
        components: usize,
        f: impl Fn(usize, usize) -> usize,
    ) -> Result<Self> {
        if bytes == 0 || bytes > MAX_IMEL_SIZE {
            return Err(Error::InvalidByteOrder("element size out of range"));
        }
        let per_component = bytes / components;
        let mut order = [0u8; MAX_IMEL_SIZE];
        for (i, slot) in order.iter_mut().take(bytes).enumerate() {
            let base = (i / per_component) * per_component;
            *slot = (base + f(i - base, per_component)) as u8;
        }
        Self::new(&order[..bytes])
    }

    /// Number of bytes per element
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    /// Always `false`: a byte order covers at least one byte
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The order in ICS notation
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.order[..self.len()]
    }

    /// Returns `true` if this is the native order for `data_type`
    #[must_use]
    pub fn is_native(&self, data_type: DataType) -> bool {
        *self == Self::native(data_type)
    }
}

impl fmt::Debug for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ByteOrder").field(&self.as_slice()).finish()
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, p) in self.as_slice().iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{p}")?;
        }
        Ok(())
    }
}

/// Maps each native byte position of an element to the position it is stored at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteOrderMap {
    native_to_stored: [u8; MAX_IMEL_SIZE],
    len: u8,
    identity: bool,
}

impl ByteOrderMap {
    /// Builds the map between data stored in `source` order and `native` order
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidByteOrder`] if the two orders have different lengths
    pub fn new(source: &ByteOrder, native: &ByteOrder) -> Result<Self> {
        if source.len() != native.len() {
            return Err(Error::InvalidByteOrder(
                "source and destination byte orders differ in length",
            ));
        }
        let mut native_to_stored = [0u8; MAX_IMEL_SIZE];
        for (&stored, &position) in source.as_slice().iter().zip(native.as_slice()) {
            native_to_stored[usize::from(position) - 1] = stored - 1;
        }
        let identity = source == native;
        Ok(Self {
            native_to_stored,
            len: source.len,
            identity,
        })
    }

    /// Map for elements of `data_type` stored in `source` order (native when `None`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidByteOrder`] if `source` does not match the element size
    pub fn for_data_type(source: Option<&ByteOrder>, data_type: DataType) -> Result<Self> {
        let native = ByteOrder::native(data_type);
        Self::new(source.unwrap_or(&native), &native)
    }

    /// Returns `true` if stored and native orders are the same
    #[must_use]
    pub const fn is_identity(&self) -> bool {
        self.identity
    }

    /// For native byte `i`, the offset of the stored byte within the element
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.native_to_stored[..usize::from(self.len)]
    }
}

/// Reorders every element of `buf` from `from` order into `to` order, in place
///
/// # Errors
///
/// - [`Error::BitsVsSizeConflict`] if `buf` is not a whole number of elements
/// - [`Error::InvalidByteOrder`] if the orders differ in length
pub fn reorder(buf: &mut [u8], from: &ByteOrder, to: &ByteOrder) -> Result<()> {
    let bytes = from.len();
    if bytes != to.len() {
        return Err(Error::InvalidByteOrder(
            "source and destination byte orders differ in length",
        ));
    }
    if buf.len() % bytes != 0 {
        return Err(Error::BitsVsSizeConflict {
            length: buf.len(),
            size: bytes,
        });
    }
    if from == to {
        return Ok(());
    }
    trace!(%from, %to, len = buf.len(), "reordering bytes");
    let mut imel = [0u8; MAX_IMEL_SIZE];
    for element in buf.chunks_exact_mut(bytes) {
        for (slot, &p) in imel.iter_mut().zip(from.as_slice()) {
            *slot = element[usize::from(p) - 1];
        }
        for (&value, &p) in imel.iter().zip(to.as_slice()) {
            element[usize::from(p) - 1] = value;
        }
    }
    Ok(())
}

/// Converts elements stored in `source` order to native order, in place
///
/// When `source` is `None` the data is assumed to be native already and left untouched (the
/// length is not checked either).
///
/// # Errors
///
/// See [`reorder`]
pub fn normalize(buf: &mut [u8], source: Option<&ByteOrder>, data_type: DataType) -> Result<()> {
    let Some(source) = source else {
        return Ok(());
    };
    reorder(buf, source, &ByteOrder::native(data_type))
}
