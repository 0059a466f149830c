use std::io;

use crate::{error::Result, Coordinate, GraphError};

pub(crate) const DIRECTED_TAG: u32 = 1;
pub(crate) const UNDIRECTED_TAG: u32 = 2;

const NO_SHAPE: u32 = u32::MAX;

// Counts read from a stream are untrusted, never preallocate more than this.
const MAX_PREALLOCATE: u32 = 1 << 16;

/// Reads `count` items, growing the buffer as they arrive so a corrupt
/// count ends in an `UnexpectedEof` instead of a huge allocation.
pub(crate) fn read_items<T>(count: u32, mut read: impl FnMut() -> io::Result<T>) -> io::Result<Vec<T>> {
    let mut items = Vec::with_capacity(count.min(MAX_PREALLOCATE) as usize);
    for _ in 0..count {
        items.push(read()?);
    }
    Ok(items)
}

pub(crate) fn write_u32(writer: &mut impl io::Write, value: u32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

pub(crate) fn read_u32(buf: &mut [u8; 4], reader: &mut impl io::Read) -> io::Result<u32> {
    reader.read_exact(buf)?;
    Ok(u32::from_le_bytes(*buf))
}

pub(crate) fn write_coordinate(writer: &mut impl io::Write, coordinate: Coordinate) -> io::Result<()> {
    writer.write_all(&coordinate.lat.to_le_bytes())?;
    writer.write_all(&coordinate.lon.to_le_bytes())
}

pub(crate) fn read_coordinate(buf: &mut [u8; 4], reader: &mut impl io::Read) -> io::Result<Coordinate> {
    reader.read_exact(buf)?;
    let lat = f32::from_le_bytes(*buf);
    reader.read_exact(buf)?;
    let lon = f32::from_le_bytes(*buf);
    Ok(Coordinate { lat, lon })
}

pub(crate) fn write_shape(writer: &mut impl io::Write, shape: Option<&[Coordinate]>) -> io::Result<()> {
    match shape {
        None => write_u32(writer, NO_SHAPE),
        Some(coordinates) => {
            write_u32(writer, coordinates.len() as u32)?;
            for &coordinate in coordinates {
                write_coordinate(writer, coordinate)?;
            }
            Ok(())
        }
    }
}

pub(crate) fn read_shape(
    buf: &mut [u8; 4],
    reader: &mut impl io::Read,
) -> io::Result<Option<Box<[Coordinate]>>> {
    let len = read_u32(buf, reader)?;
    if len == NO_SHAPE {
        return Ok(None);
    }

    let coordinates = read_items(len, || read_coordinate(buf, reader))?;
    Ok(Some(coordinates.into_boxed_slice()))
}

pub(crate) fn read_tag(buf: &mut [u8; 4], reader: &mut impl io::Read, expected: u32) -> Result<()> {
    let tag = read_u32(buf, reader)?;
    if tag != expected {
        return Err(GraphError::CorruptData(format!(
            "graph type tag {tag} does not match the expected tag {expected}"
        )));
    }
    Ok(())
}

/// Writes the raw bytes of a Pod payload, used by `save`.
pub(crate) fn write_pod<E: bytemuck::Pod>(data: &E, writer: &mut dyn io::Write) -> io::Result<()> {
    writer.write_all(bytemuck::bytes_of(data))
}

pub(crate) fn read_pod<E: bytemuck::Pod>(reader: &mut dyn io::Read) -> io::Result<E> {
    let mut value = E::zeroed();
    reader.read_exact(bytemuck::bytes_of_mut(&mut value))?;
    Ok(value)
}
