use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
};

use anyhow::{bail, Result};
use image::{codecs::png::PngEncoder, ImageEncoder};
use libics::{
    data::preview::plane_dims, read_data, read_preview, read_roi, write_data, Compression,
    DataSource, Layout, Outcome, Roi, SoftMismatch,
};
use tracing::{debug, info, instrument, warn};

fn create(output_name: &Path) -> Result<File> {
    Ok(File::options()
        .create(true)
        .write(true)
        .truncate(true)
        .open(output_name)?)
}

/// Bytes actually transferred, warning about partial transfers
fn filled(outcome: Outcome, len: usize) -> usize {
    match outcome {
        Outcome::Complete => len,
        Outcome::Partial(SoftMismatch::OutputNotFilled { filled, .. }) => {
            warn!("the data ended after {filled} of {len} bytes");
            filled
        }
        Outcome::Partial(mismatch) => {
            warn!(?mismatch, "partial transfer");
            len
        }
    }
}

#[instrument(skip(layout))]
pub fn plane_to_png(
    layout: &Layout,
    source: &DataSource,
    plane: usize,
    output_name: &Path,
) -> Result<()> {
    let (width, height) = plane_dims(layout);
    let mut buf = vec![0u8; width * height];
    let _ = read_preview(layout, source, plane, &mut buf)?;
    debug!("Read plane {plane} of {width}x{height}");

    info!("Writing preview to {}", output_name.display());
    let encoder = PngEncoder::new(create(output_name)?);
    encoder.write_image(
        &buf,
        u32::try_from(width)?,
        u32::try_from(height)?,
        image::ExtendedColorType::L8,
    )?;
    info!("Successfully wrote preview to {}", output_name.display());
    Ok(())
}

#[instrument(skip(layout))]
pub fn roi_to_raw(
    layout: &Layout,
    source: &DataSource,
    roi: &Roi,
    output_name: &Path,
) -> Result<usize> {
    let region = roi.resolve(layout.dims())?;
    let len = region.len() * layout.imel_size();
    debug!("Region {:?} holds {len} bytes", region.extent());

    let mut buf = vec![0u8; len];
    let len = filled(read_roi(layout, source, roi, &mut buf)?, len);
    fs::write(output_name, &buf[..len])?;
    info!("Wrote {len} bytes to {}", output_name.display());
    Ok(len)
}

#[instrument(skip(layout))]
pub fn pack(layout: &Layout, raw_file: &Path, output_name: &Path) -> Result<()> {
    let raw = fs::read(raw_file)?;
    if raw.len() < layout.data_size() {
        bail!(
            "{} holds {} bytes, the image needs {}",
            raw_file.display(),
            raw.len(),
            layout.data_size()
        );
    }
    let layout = match layout.compression() {
        Compression::Uncompressed => layout.with_compression(Compression::Gzip),
        _ => layout.clone(),
    };
    let mut out = BufWriter::new(create(output_name)?);
    if let Outcome::Partial(mismatch) = write_data(&layout, &raw, &mut out)? {
        warn!(?mismatch, "only the image part of the raw file was packed");
    }
    out.flush()?;
    info!("Packed {} into {}", raw_file.display(), output_name.display());
    Ok(())
}

#[instrument(skip(layout))]
pub fn unpack(layout: &Layout, source: &DataSource, output_name: &Path) -> Result<usize> {
    let mut buf = vec![0u8; layout.data_size()];
    let len = filled(read_data(layout, source, &mut buf)?, buf.len());
    fs::write(output_name, &buf[..len])?;
    info!("Unpacked {len} bytes to {}", output_name.display());
    Ok(len)
}
