use std::{
    fs::{File, OpenOptions},
    io::{self, BufReader, BufWriter, Seek, SeekFrom, Write},
    path::Path,
};

use tracing::{debug, instrument};

use crate::{Error, Result, BUF_SIZE};

/// Appends the bytes of `input` from `offset` to its end onto `output`
///
/// Used to carry the data of an image over unchanged when its header is rewritten. `output` is
/// created if it does not exist. Returns the number of bytes copied.
///
/// # Errors
///
/// Returns [`Error::Io`] if either file cannot be opened, or on any read or write failure
#[instrument(
    skip(input, output),
    fields(input = %input.as_ref().display(), output = %output.as_ref().display()),
    level = "debug"
)]
pub fn copy_data(input: impl AsRef<Path>, offset: u64, output: impl AsRef<Path>) -> Result<u64> {
    let mut source = File::open(input.as_ref()).map_err(Error::io("opening the data file"))?;
    source
        .seek(SeekFrom::Start(offset))
        .map_err(Error::io("seeking to the data"))?;
    let sink = OpenOptions::new()
        .create(true)
        .append(true)
        .open(output.as_ref())
        .map_err(Error::io("opening the output file"))?;
    let mut source = BufReader::with_capacity(BUF_SIZE, source);
    let mut sink = BufWriter::with_capacity(BUF_SIZE, sink);
    let copied = io::copy(&mut source, &mut sink).map_err(Error::io("copying data"))?;
    sink.flush().map_err(Error::io("writing data"))?;
    debug!(copied, "copied data");
    Ok(copied)
}
