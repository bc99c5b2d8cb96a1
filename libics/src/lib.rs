//! # libics
//!
//!
//! This library provides the binary data engine for the ICS (Image Cytometry Standard) file
//! format, a text header plus binary data format for N-dimensional scientific images.
//!
//! It only deals with the pixel data. Parsing and writing the textual header is left to the users
//! of this crate, who hand the relevant metadata (dimensions, element type, declared byte order
//! and compression) to the engine as a [`Layout`].
//!
//! ### Features
//!
//! - Strided reads and writes of whole images, [`read_data_with_strides`] and
//!   [`write_data_with_strides`], so data can be moved to and from arbitrary memory layouts
//! - Region of interest extraction with subsampling, [`read_roi`]
//! - A gzip container ([`data::gzip`]) around raw deflate streams, written and read block by
//!   block
//! - Decoding of legacy `compress` (`.Z`) data, [`data::lzw`]. There is no encoder: data written
//!   with [`Compression::Compress`] is stored as gzip.
//! - Byte order normalization, so data is always handed out in native order
//! - In-place random access reads and writes on uncompressed single-file images,
//!   [`RandomAccess`]
//!
//! ### Usage
//!
//! #### Writing and reading back an image
//!
//! ```rust
//! use libics::{Compression, DataSource, DataType, Layout};
//!
//! fn main() -> anyhow::Result<()> {
//!     let layout = Layout::builder()
//!         .data_type(DataType::Uint16)
//!         .dims(vec![64, 32])
//!         .compression(Compression::Gzip)
//!         .build();
//!     let pixels: Vec<u8> = (0..layout.data_size()).map(|i| (i % 251) as u8).collect();
//!
//!     let path = std::env::temp_dir().join("libics_doc_example.ids");
//!     let mut file = std::fs::File::create(&path)?;
//!     let _ = libics::write_data(&layout, &pixels, &mut file)?;
//!     drop(file);
//!
//!     let mut back = vec![0; layout.data_size()];
//!     let outcome = libics::read_data(&layout, &DataSource::external(&path, 0), &mut back)?;
//!     assert!(outcome.is_complete());
//!     assert_eq!(back, pixels);
//! #   std::fs::remove_file(&path)?;
//!     Ok(())
//! }
//! ```
//!
//! #### Errors and soft mismatches
//!
//! Every fallible operation returns [`Result`]. Transfers that can succeed while leaving part of
//! the destination untouched (a buffer larger than the data, for instance) return an
//! [`Outcome`] instead of failing, the data already transferred is valid.
//!

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

/// Per-element byte order handling
pub mod byte_order;
/// Reading and writing of whole images, regions and previews
pub mod data;
mod error;
mod layout;
/// In-place access to uncompressed single-file images
pub mod random_access;
/// N-dimensional region iteration
pub mod stride;

pub use byte_order::ByteOrder;
pub use data::copy::copy_data;
pub use data::preview::read_preview;
pub use data::reader::DataReader;
pub use data::roi::{read_roi, Roi};
pub use data::{read_data, read_data_with_strides, write_data, write_data_with_strides};
pub use error::{Error, ErrorKind, Outcome, Result, SoftMismatch};
pub use layout::{contiguous_strides, Compression, DataSource, DataType, Layout, SourceKind};
pub use random_access::{AccessMode, FileRegion, HeaderWriter, MemoryRegion, RandomAccess};

/// Maximum number of image dimensions
pub const MAX_DIMS: usize = 10;
/// Maximum size of one image element in bytes
pub const MAX_IMEL_SIZE: usize = 16;
/// Size of the staging buffers used for compressed i/o
pub const BUF_SIZE: usize = 16 * 1024;
