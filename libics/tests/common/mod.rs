#![allow(dead_code)]

use std::{fs::File, io::BufWriter, path::Path};

use libics::Layout;
use mktemp::Temp;

/// Plain bytes every `.Z` fixture decodes to
pub const REFERENCE_RAW: &str = "tests/data/reference.raw";
/// `compress -b 12`, block mode, dictionary cleared several times
pub const REFERENCE_12BIT: &str = "tests/data/reference_12bit.Z";
/// `compress -b 16`
pub const REFERENCE_16BIT: &str = "tests/data/reference_16bit.Z";
/// `compress -b 9` without block mode
pub const REFERENCE_9BIT_NOBLOCK: &str = "tests/data/reference_9bit_noblock.Z";
/// Length of [`REFERENCE_RAW`]
pub const REFERENCE_LEN: usize = 60_000;

/// Deterministic, poorly compressible bytes
pub fn pattern(len: usize, seed: u32) -> Vec<u8> {
    let mut x = seed;
    (0..len)
        .map(|_| {
            x = x.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (x >> 16) as u8
        })
        .collect()
}

/// Native-order `u16` pixels whose value is their linear index modulo 2^16
pub fn index_pixels(len: usize) -> Vec<u8> {
    (0..len).flat_map(|i| (i as u16).to_ne_bytes()).collect()
}

/// Path of a temporary file
pub fn path(tmp: &Temp) -> &Path {
    tmp.as_ref()
}

/// Writes `pixels` with `layout` to a new temporary file
pub fn write_image(layout: &Layout, pixels: &[u8]) -> anyhow::Result<Temp> {
    let tmp = Temp::new_file()?;
    let mut out = BufWriter::new(File::create(&tmp)?);
    let outcome = libics::write_data(layout, pixels, &mut out)?;
    assert!(outcome.is_complete());
    Ok(tmp)
}

/// Reads the whole data file at `path`
pub fn read_image(layout: &Layout, path: &Path) -> anyhow::Result<Vec<u8>> {
    let mut buf = vec![0; layout.data_size()];
    let outcome = libics::read_data(layout, &libics::DataSource::external(path, 0), &mut buf)?;
    assert!(outcome.is_complete());
    Ok(buf)
}
