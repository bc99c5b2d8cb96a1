use std::{fs, io, io::Write};

mod common;
use common::{path, pattern};
use libics::{
    AccessMode, ByteOrder, Compression, DataSource, DataType, Error, FileRegion, HeaderWriter,
    Layout, MemoryRegion, RandomAccess,
};
use mktemp::Temp;

/// Minimal version 2 header, just enough for the data to follow it
struct Header;

impl HeaderWriter for Header {
    fn write_header(&self, layout: &Layout, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "\t\nics_version\t2.0")?;
        writeln!(out, "layout\tparameters\t{}", layout.ndims() + 1)?;
        let sizes: Vec<String> = layout.dims().iter().map(ToString::to_string).collect();
        writeln!(out, "layout\tsizes\t{}\t{}", layout.imel_size() * 8, sizes.join("\t"))?;
        writeln!(out, "representation\tformat\t{}", layout.data_type())?;
        writeln!(out, "end")
    }
}

fn create(tmp: &Temp, layout: &Layout) -> anyhow::Result<DataSource> {
    let offset = RandomAccess::create(path(tmp), layout, &Header)?;
    Ok(DataSource::embedded(path(tmp), offset))
}

fn u16_layout(dims: Vec<usize>) -> Layout {
    Layout::builder()
        .data_type(DataType::Uint16)
        .dims(dims)
        .build()
}

fn values(buf: &[u8]) -> Vec<u16> {
    buf.chunks_exact(2)
        .map(|b| u16::from_ne_bytes([b[0], b[1]]))
        .collect()
}

#[test]
fn create_sizes_the_file_after_the_header() -> anyhow::Result<()> {
    let tmp = Temp::new_file()?;
    let layout = u16_layout(vec![40, 30, 5]);
    let source = create(&tmp, &layout)?;
    let contents = fs::read(&tmp)?;
    let offset = usize::try_from(source.offset)?;
    assert!(contents[..offset].ends_with(b"end\n"));
    assert_eq!(contents.len(), offset + layout.data_size());
    assert!(contents[offset..].iter().all(|&b| b == 0));
    Ok(())
}

#[test]
fn written_region_reads_back_after_reopening() -> anyhow::Result<()> {
    let tmp = Temp::new_file()?;
    let layout = Layout::builder()
        .data_type(DataType::Uint16)
        .dims(vec![40, 30, 5])
        .byte_order(ByteOrder::big_endian(2)?)
        .build();
    let source = create(&tmp, &layout)?;

    let region = FileRegion::builder()
        .count(vec![10, 8, 2])
        .origin(vec![5, 5, 1])
        .build();
    let patch: Vec<u8> = (1u16..=160).flat_map(u16::to_ne_bytes).collect();
    let memory = MemoryRegion::contiguous(&[10, 8, 2]);

    let mut handle = RandomAccess::open(&layout, &source, AccessMode::ReadWrite)?;
    handle.write(&region, &patch, &memory)?;
    handle.close()?;

    let mut handle = RandomAccess::open(&layout, &source, AccessMode::ReadOnly)?;
    let mut back = vec![0u8; patch.len()];
    handle.read(&region, &mut back, &memory)?;
    assert_eq!(back, patch);

    // a disjoint region is untouched
    let other = FileRegion::builder()
        .count(vec![10, 8, 2])
        .origin(vec![20, 5, 1])
        .build();
    handle.read(&other, &mut back, &memory)?;
    assert!(back.iter().all(|&b| b == 0));
    handle.close()?;

    // the data is stored big endian at the expected positions
    let contents = fs::read(&tmp)?;
    let offset = usize::try_from(source.offset)?;
    let at = |x: usize, y: usize, z: usize| offset + 2 * (x + 40 * (y + 30 * z));
    assert_eq!(contents[at(5, 5, 1)..at(5, 5, 1) + 2], 1u16.to_be_bytes());
    assert_eq!(contents[at(14, 12, 2)..at(14, 12, 2) + 2], 160u16.to_be_bytes());
    assert_eq!(contents[at(15, 12, 2)..at(15, 12, 2) + 2], [0, 0]);
    Ok(())
}

#[test]
fn whole_image_matches_the_stream_reader() -> anyhow::Result<()> {
    let tmp = Temp::new_file()?;
    let layout = u16_layout(vec![7, 6, 5]);
    let source = create(&tmp, &layout)?;
    let pixels = pattern(layout.data_size(), 21);

    let mut handle = RandomAccess::open(&layout, &source, AccessMode::ReadWrite)?;
    handle.write(
        &FileRegion::default(),
        &pixels,
        &MemoryRegion::contiguous(layout.dims()),
    )?;
    handle.close()?;

    let mut back = vec![0u8; pixels.len()];
    assert!(libics::read_data(&layout, &source, &mut back)?.is_complete());
    assert_eq!(back, pixels);
    Ok(())
}

#[test]
fn negative_intervals_walk_backwards() -> anyhow::Result<()> {
    let tmp = Temp::new_file()?;
    let layout = u16_layout(vec![6, 4]);
    let source = create(&tmp, &layout)?;
    let pixels: Vec<u8> = (0u16..24).flat_map(u16::to_ne_bytes).collect();

    let mut handle = RandomAccess::open(&layout, &source, AccessMode::ReadWrite)?;
    let memory = MemoryRegion::contiguous(&[6, 4]);
    handle.write(&FileRegion::default(), &pixels, &memory)?;

    // rows reversed, every other column from the right
    let region = FileRegion::builder()
        .count(vec![3, 4])
        .origin(vec![5, 3])
        .interval(vec![-2, -1])
        .build();
    let mut buf = vec![0u8; 3 * 4 * 2];
    handle.read(&region, &mut buf, &MemoryRegion::contiguous(&[3, 4]))?;
    assert_eq!(
        values(&buf),
        vec![23, 21, 19, 17, 15, 13, 11, 9, 7, 5, 3, 1]
    );

    // a negative memory interval mirrors instead
    let mirrored = MemoryRegion::builder()
        .strides(vec![1, 6])
        .dims(vec![6, 4])
        .origin(vec![5, 0])
        .interval(vec![-1, 1])
        .build();
    let mut buf = vec![0u8; pixels.len()];
    handle.read(&FileRegion::default(), &mut buf, &mirrored)?;
    let row: Vec<u16> = values(&buf)[..6].to_vec();
    assert_eq!(row, vec![5, 4, 3, 2, 1, 0]);
    handle.close()?;
    Ok(())
}

#[test]
fn memory_strides_transpose() -> anyhow::Result<()> {
    let tmp = Temp::new_file()?;
    let layout = u16_layout(vec![3, 2]);
    let source = create(&tmp, &layout)?;
    let mut handle = RandomAccess::open(&layout, &source, AccessMode::ReadWrite)?;
    let pixels: Vec<u8> = [1u16, 2, 3, 4, 5, 6].iter().flat_map(|v| v.to_ne_bytes()).collect();
    handle.write(&FileRegion::default(), &pixels, &MemoryRegion::contiguous(&[3, 2]))?;

    let transposed = MemoryRegion::builder().strides(vec![2, 1]).build();
    let mut buf = vec![0u8; pixels.len()];
    handle.read(&FileRegion::default(), &mut buf, &transposed)?;
    assert_eq!(values(&buf), vec![1, 4, 2, 5, 3, 6]);
    handle.close()?;
    Ok(())
}

#[test]
fn columns_of_a_large_image_page_through() -> anyhow::Result<()> {
    let tmp = Temp::new_file()?;
    let layout = Layout::builder()
        .data_type(DataType::Uint8)
        .dims(vec![3000, 3000])
        .build();
    assert!(layout.data_size() > libics::random_access::PAGE_SIZE);
    let source = create(&tmp, &layout)?;
    let column = pattern(3000, 4);
    let region = FileRegion::builder()
        .count(vec![1, 3000])
        .origin(vec![7, 0])
        .build();
    let memory = MemoryRegion::builder().strides(vec![1, 1]).build();

    let mut handle = RandomAccess::open(&layout, &source, AccessMode::ReadWrite)?;
    handle.write(&region, &column, &memory)?;
    handle.close()?;

    let mut handle = RandomAccess::open(&layout, &source, AccessMode::ReadOnly)?;
    let mut back = vec![0u8; 3000];
    handle.read(&region, &mut back, &memory)?;
    assert_eq!(back, column);
    handle.close()?;

    let contents = fs::read(&tmp)?;
    let offset = usize::try_from(source.offset)?;
    let data = &contents[offset..];
    for (y, &value) in column.iter().enumerate() {
        assert_eq!(data[7 + 3000 * y], value);
        assert_eq!(data[8 + 3000 * y], 0);
    }
    Ok(())
}

#[test]
fn preconditions_are_checked() -> anyhow::Result<()> {
    let tmp = Temp::new_file()?;
    let layout = u16_layout(vec![4, 4]);
    let source = create(&tmp, &layout)?;

    assert!(matches!(
        RandomAccess::open(
            &layout,
            &DataSource::external(path(&tmp), source.offset),
            AccessMode::ReadOnly
        ),
        Err(Error::RaOnlySingleFile)
    ));
    assert!(matches!(
        RandomAccess::open(
            &layout.with_compression(Compression::Gzip),
            &source,
            AccessMode::ReadOnly
        ),
        Err(Error::RaOnlyUncompressed)
    ));
    assert!(matches!(
        RandomAccess::create(
            path(&tmp),
            &layout.with_compression(Compression::Gzip),
            &Header
        ),
        Err(Error::RaOnlyUncompressed)
    ));
    let larger = u16_layout(vec![4, 400]);
    assert!(matches!(
        RandomAccess::open(&larger, &source, AccessMode::ReadOnly),
        Err(Error::EndOfStream)
    ));

    let mut handle = RandomAccess::open(&layout, &source, AccessMode::ReadOnly)?;
    let memory = MemoryRegion::contiguous(&[4, 4]);
    let mut buf = vec![0u8; 32];
    assert!(matches!(
        handle.write(&FileRegion::default(), &buf, &memory),
        Err(Error::ReadOnly)
    ));
    assert!(matches!(
        handle.read(
            &FileRegion::builder().count(vec![4]).build(),
            &mut buf,
            &memory
        ),
        Err(Error::DimensionalityMismatch {
            expected: 2,
            got: 1
        })
    ));
    assert!(matches!(
        handle.read(
            &FileRegion::builder().origin(vec![1, 0]).build(),
            &mut buf,
            &memory
        ),
        Err(Error::IllegalRoi)
    ));
    assert!(matches!(
        handle.read(&FileRegion::default(), &mut buf[..31], &memory),
        Err(Error::BufferTooSmall {
            needed: 32,
            got: 31
        })
    ));
    handle.close()?;

    // the rejected write left the data alone
    let contents = fs::read(&tmp)?;
    assert!(contents[usize::try_from(source.offset)?..].iter().all(|&b| b == 0));
    Ok(())
}

#[test]
fn huge_memory_strides_are_rejected() -> anyhow::Result<()> {
    let tmp = Temp::new_file()?;
    let layout = u16_layout(vec![2, 2]);
    let source = create(&tmp, &layout)?;
    let mut handle = RandomAccess::open(&layout, &source, AccessMode::ReadOnly)?;
    let mut buf = vec![0u8; 8];

    let huge = MemoryRegion::builder().strides(vec![1 << 61, 1 << 61]).build();
    assert!(matches!(
        handle.read(&FileRegion::default(), &mut buf, &huge),
        Err(Error::IllegalParameter(_))
    ));
    let backwards = FileRegion::builder()
        .origin(vec![1, 1])
        .interval(vec![-1, -1])
        .build();
    assert!(matches!(
        handle.read(&backwards, &mut buf, &huge),
        Err(Error::IllegalParameter(_))
    ));
    handle.close()?;
    Ok(())
}

#[test]
fn every_type_round_trips_through_random_access() -> anyhow::Result<()> {
    use strum::IntoEnumIterator;

    for data_type in DataType::iter() {
        let tmp = Temp::new_file()?;
        let layout = Layout::builder()
            .data_type(data_type)
            .dims(vec![5, 3, 2])
            .byte_order(swapped(data_type)?)
            .build();
        let source = create(&tmp, &layout)?;
        let pixels = pattern(layout.data_size(), 8);
        let memory = MemoryRegion::contiguous(layout.dims());

        let mut handle = RandomAccess::open(&layout, &source, AccessMode::ReadWrite)?;
        handle.write(&FileRegion::default(), &pixels, &memory)?;
        handle.close()?;

        let mut back = vec![0u8; pixels.len()];
        assert!(libics::read_data(&layout, &source, &mut back)?.is_complete());
        assert_eq!(back, pixels, "{data_type}");
    }
    Ok(())
}

/// Reverse of the native order, per component
fn swapped(data_type: DataType) -> libics::Result<ByteOrder> {
    let native = ByteOrder::native(data_type);
    let component = data_type.size() / data_type.components();
    let order: Vec<u8> = native
        .as_slice()
        .chunks(component)
        .flat_map(|c| c.iter().rev().copied())
        .collect();
    ByteOrder::new(&order)
}
