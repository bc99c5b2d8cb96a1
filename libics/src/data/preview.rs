use tracing::instrument;

use crate::{
    error::{alloc_buffer, SoftMismatch},
    DataReader, DataSource, DataType, Error, Layout, Outcome, Result,
};

/// Width and height of one preview plane: dimensions 0 and 1 of the image
#[must_use]
pub fn plane_dims(layout: &Layout) -> (usize, usize) {
    let dims = layout.dims();
    (
        dims.first().copied().unwrap_or(1),
        dims.get(1).copied().unwrap_or(1),
    )
}

/// Number of planes in the image: the product of dimensions 2 and up
#[must_use]
pub fn plane_count(layout: &Layout) -> usize {
    layout.dims().iter().skip(2).product()
}

/// Reads plane `plane` of the image and stretches it to 8 bits
///
/// The smallest value of the plane maps to 0 and the largest to 255. Complex data is shown by
/// magnitude. `buf` receives `width * height` bytes, row by row.
///
/// # Errors
///
/// - [`Error::IllegalRoi`] if there is no plane `plane`
/// - [`Error::BufferTooSmall`] if `buf` cannot hold a plane
/// - errors of [`DataReader`]
///
/// A `buf` larger than a plane is reported as [`SoftMismatch::OutputNotFilled`].
#[instrument(skip(layout, buf), level = "debug")]
pub fn read_preview(
    layout: &Layout,
    source: &DataSource,
    plane: usize,
    buf: &mut [u8],
) -> Result<Outcome> {
    if buf.is_empty() {
        return Ok(Outcome::Complete);
    }
    layout.validate()?;
    if plane >= plane_count(layout) {
        return Err(Error::IllegalRoi);
    }
    let (width, height) = plane_dims(layout);
    let plane_len = width * height;
    if buf.len() < plane_len {
        return Err(Error::BufferTooSmall {
            needed: plane_len,
            got: buf.len(),
        });
    }
    let imel = layout.imel_size();
    let mut raw = alloc_buffer(plane_len * imel)?;
    let mut reader = DataReader::open(layout, source)?;
    if plane > 0 {
        reader.skip_block((plane * raw.len()) as u64)?;
    }
    let outcome = reader.read_block(&mut raw)?;
    reader.close();

    stretch(layout.data_type(), &raw, &mut buf[..plane_len]);
    if buf.len() > plane_len {
        return Ok(outcome.and(Outcome::Partial(SoftMismatch::OutputNotFilled {
            filled: plane_len,
            capacity: buf.len(),
        })));
    }
    Ok(outcome)
}

fn take<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut array = [0u8; N];
    array.copy_from_slice(&bytes[..N]);
    array
}

/// Value of one native-order element
fn value(data_type: DataType, bytes: &[u8]) -> f64 {
    match data_type {
        DataType::Uint8 => f64::from(bytes[0]),
        DataType::Sint8 => f64::from(i8::from_ne_bytes(take(bytes))),
        DataType::Uint16 => f64::from(u16::from_ne_bytes(take(bytes))),
        DataType::Sint16 => f64::from(i16::from_ne_bytes(take(bytes))),
        DataType::Uint32 => f64::from(u32::from_ne_bytes(take(bytes))),
        DataType::Sint32 => f64::from(i32::from_ne_bytes(take(bytes))),
        DataType::Real32 => f64::from(f32::from_ne_bytes(take(bytes))),
        DataType::Real64 => f64::from_ne_bytes(take(bytes)),
        DataType::Complex32 => {
            let re = f32::from_ne_bytes(take(bytes));
            let im = f32::from_ne_bytes(take(&bytes[4..]));
            f64::from(re).hypot(f64::from(im))
        }
        DataType::Complex64 => {
            let re = f64::from_ne_bytes(take(bytes));
            let im = f64::from_ne_bytes(take(&bytes[8..]));
            re.hypot(im)
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn stretch(data_type: DataType, raw: &[u8], out: &mut [u8]) {
    let values = raw
        .chunks_exact(data_type.size())
        .map(|bytes| value(data_type, bytes));
    let (min, max) = values
        .clone()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    for (dst, v) in out.iter_mut().zip(values) {
        *dst = if range > 0.0 {
            ((v - min) * 255.0 / range) as u8
        } else {
            0
        };
    }
}
