use icstool::{pack, plane_to_png, roi_to_raw, unpack};
use libics::{ByteOrder, Compression, DataSource, DataType, Layout, Roi};
use std::path::{Path, PathBuf};
use tracing::{info, Level};

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};

#[cfg(not(debug_assertions))]
const DEFAULT_DEBUG_LEVEL: u8 = 1;
#[cfg(debug_assertions)]
const DEFAULT_DEBUG_LEVEL: u8 = 99;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Turn debugging information on
    #[arg(short, long, default_value_t = DEFAULT_DEBUG_LEVEL, action = clap::ArgAction::Count)]
    verbosity: u8,

    #[command(subcommand)]
    command: Commands,
}

/// How the binary data is laid out, as the ICS header would declare it
#[derive(Args)]
struct LayoutArgs {
    /// Extent of each dimension, dimension 0 first
    #[arg(long, value_delimiter = ',', required = true)]
    dims: Vec<usize>,

    /// Element type
    #[arg(long, default_value_t = DataType::Uint8)]
    data_type: DataType,

    /// Compression of the data
    #[arg(long, default_value_t = Compression::Uncompressed)]
    compression: Compression,

    /// Storage order of the bytes of each element, e.g. 2,1 for big endian 16 bit data
    #[arg(long, value_delimiter = ',')]
    byte_order: Option<Vec<u8>>,

    /// Position of the first data byte in the file
    #[arg(long, default_value_t = 0)]
    offset: u64,
}

impl LayoutArgs {
    fn layout(&self) -> Result<Layout> {
        let byte_order = self.byte_order.as_deref().map(ByteOrder::new).transpose()?;
        let layout = Layout::builder()
            .data_type(self.data_type)
            .dims(self.dims.clone())
            .maybe_byte_order(byte_order)
            .compression(self.compression)
            .build();
        layout.validate()?;
        Ok(layout)
    }

    fn source(&self, data_file: &Path) -> DataSource {
        DataSource::external(data_file, self.offset)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// writes one plane of an image to a PNG file
    #[command(name = "preview")]
    Preview {
        /// The data file
        data_file: PathBuf,

        #[command(flatten)]
        layout: LayoutArgs,

        /// Index of the plane, counting over dimensions 2 and up
        #[arg(short, long, default_value_t = 0)]
        plane: usize,

        /// The output file name
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// extracts a region of interest to a raw file
    #[command(name = "roi")]
    Roi {
        /// The data file
        data_file: PathBuf,

        #[command(flatten)]
        layout: LayoutArgs,

        /// First element of the region along each dimension
        #[arg(long, value_delimiter = ',')]
        origin: Option<Vec<usize>>,

        /// Extent of the region along each dimension
        #[arg(long, value_delimiter = ',')]
        size: Option<Vec<usize>>,

        /// Sampling interval along each dimension
        #[arg(long, value_delimiter = ',')]
        sampling: Option<Vec<usize>>,

        /// The output file name
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// compresses a raw native order array into a gzip data file
    #[command(name = "pack")]
    Pack {
        /// The raw file
        raw_file: PathBuf,

        #[command(flatten)]
        layout: LayoutArgs,

        /// The output file name
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// decodes a data file to a raw native order array
    #[command(name = "unpack")]
    Unpack {
        /// The data file
        data_file: PathBuf,

        #[command(flatten)]
        layout: LayoutArgs,

        /// The output file name
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn output_name(output: Option<PathBuf>, input: &Path, suffix: &str) -> Result<PathBuf> {
    if let Some(o) = output {
        return Ok(o);
    }
    let mut output = PathBuf::new();
    let Some(dir) = input.parent() else {
        bail!("Invalid data file");
    };
    let Some(Some(filename)) = input.file_stem().map(|os| os.to_str()) else {
        bail!("Invalid data file");
    };
    output.push(dir);
    output.push(format!("{filename}.{suffix}"));
    info!("output name: {}", output.display());
    Ok(output)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_file(true)
        .with_line_number(true)
        .init();

    match cli.command {
        Commands::Preview {
            data_file,
            layout,
            plane,
            output,
        } => {
            let output = output_name(output, &data_file, "png")?;
            plane_to_png(&layout.layout()?, &layout.source(&data_file), plane, &output)?;
        }
        Commands::Roi {
            data_file,
            layout,
            origin,
            size,
            sampling,
            output,
        } => {
            let output = output_name(output, &data_file, "roi.raw")?;
            let roi = Roi::builder()
                .maybe_offset(origin)
                .maybe_size(size)
                .maybe_sampling(sampling)
                .build();
            roi_to_raw(&layout.layout()?, &layout.source(&data_file), &roi, &output)?;
        }
        Commands::Pack {
            raw_file,
            layout,
            output,
        } => {
            let output = output_name(output, &raw_file, "ids.gz")?;
            pack(&layout.layout()?, &raw_file, &output)?;
        }
        Commands::Unpack {
            data_file,
            layout,
            output,
        } => {
            let output = output_name(output, &data_file, "raw")?;
            unpack(&layout.layout()?, &layout.source(&data_file), &output)?;
        }
    }
    Ok(())
}
