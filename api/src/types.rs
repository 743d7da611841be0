//! Types shared by all layers of the sector file system: byte buffers, sectors, sector numbers and the superblock.

use super::error_given;
use super::error_given::APIError;
use lazy_static::lazy_static;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io::prelude::*;
use std::io::{Cursor, SeekFrom};

/// Fixed-size chunk of bytes on the heap.
/// Supports raw reads and writes at an offset, as well as (de)serialization of structures implementing the serde traits.
#[derive(Debug, PartialEq, Eq)]
pub struct Buffer {
    /// Contents of the buffer; buffers never change size once created
    contents: Box<[u8]>,
}

impl Buffer {
    /// Create a new buffer holding `data`
    pub fn new(data: Box<[u8]>) -> Buffer {
        Buffer { contents: data }
    }

    /// Create an all-zero buffer of `len` bytes
    pub fn new_zero(len: u64) -> Buffer {
        Buffer {
            contents: vec![0; len as usize].into_boxed_slice(),
        }
    }

    /// Size of the buffer in bytes
    pub fn len(&self) -> u64 {
        self.contents.len() as u64
    }

    /// Whether the buffer holds no bytes at all
    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// Return a reference to this buffer's contents
    pub fn contents_as_ref(&self) -> &[u8] {
        &self.contents
    }

    /// Fill `data` with the bytes starting at `offset`.
    /// Fails without reading anything if the range does not fit in the buffer.
    pub fn read_data(&self, data: &mut [u8], offset: u64) -> error_given::Result<()> {
        if offset + data.len() as u64 > self.len() {
            return Err(APIError::SectorInput(
                "Trying to read beyond the bounds of the sector",
            ));
        }

        let mut c = Cursor::new(&self.contents);
        c.seek(SeekFrom::Start(offset))?;
        c.read_exact(data).map_err(|e| e.into())
    }

    /// Copy `data` into the buffer starting at `offset`.
    /// Fails without writing anything if the range does not fit in the buffer.
    pub fn write_data(&mut self, data: &[u8], offset: u64) -> error_given::Result<()> {
        if offset + data.len() as u64 > self.len() {
            return Err(APIError::SectorInput(
                "Trying to write beyond the bounds of the sector",
            ));
        }

        let mut c = Cursor::new(&mut self.contents[..]);
        c.seek(SeekFrom::Start(offset))?;
        c.write_all(data).map_err(|e| e.into())
    }

    /// Deserialize a value from the bytes starting at `offset`.
    /// Uses bincode's default encoding: fixed-width, little-endian integers.
    pub fn deserialize_from<S>(&self, offset: u64) -> error_given::Result<S>
    where
        S: DeserializeOwned,
    {
        if offset > self.len() {
            return Err(APIError::SectorInput(
                "Trying to read beyond the bounds of the sector",
            ));
        }
        let mut c = Cursor::new(&self.contents);
        c.seek(SeekFrom::Start(offset))?;
        Ok((bincode::deserialize_from(c))?)
    }

    /// Serialize `stru` into the buffer at `offset`.
    /// Goes through `write_data`, so an oversized value is rejected instead of growing the buffer.
    pub fn serialize_into<S>(&mut self, stru: &S, offset: u64) -> error_given::Result<()>
    where
        S: Serialize,
    {
        let stru_bin = bincode::serialize(stru)?;
        self.write_data(&stru_bin, offset)
    }
}

/// One sector read from or destined for the device.
/// Remembers its own index so it can be written back to the right place.
#[derive(Debug, PartialEq, Eq)]
pub struct Sector {
    /// Index of this sector on the disk
    pub sector_no: u64,
    /// Contents of the sector; all accessors delegate to this buffer
    buf: Buffer,
}

impl Sector {
    /// Create sector `sector_no` holding `data`
    pub fn new(sector_no: u64, data: Box<[u8]>) -> Sector {
        Sector {
            sector_no,
            buf: Buffer::new(data),
        }
    }

    /// Create an all-zero sector of `len` bytes
    pub fn new_zero(sector_no: u64, len: u64) -> Sector {
        Sector {
            sector_no,
            buf: Buffer::new_zero(len),
        }
    }

    /// Size of the sector in bytes
    pub fn len(&self) -> u64 {
        self.buf.len()
    }

    /// Whether the sector holds no bytes at all
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Return a reference to this sector's contents
    pub fn contents_as_ref(&self) -> &[u8] {
        self.buf.contents_as_ref()
    }

    /// See [`Buffer::read_data`]
    pub fn read_data(&self, data: &mut [u8], offset: u64) -> error_given::Result<()> {
        self.buf.read_data(data, offset)
    }

    /// See [`Buffer::write_data`]
    pub fn write_data(&mut self, data: &[u8], offset: u64) -> error_given::Result<()> {
        self.buf.write_data(data, offset)
    }

    /// See [`Buffer::deserialize_from`]
    pub fn deserialize_from<S>(&self, offset: u64) -> error_given::Result<S>
    where
        S: DeserializeOwned,
    {
        self.buf.deserialize_from(offset)
    }

    /// See [`Buffer::serialize_into`]
    pub fn serialize_into<S>(&mut self, stru: &S, offset: u64) -> error_given::Result<()>
    where
        S: Serialize,
    {
        self.buf.serialize_into(stru, offset)
    }
}

/// Absolute index of a sector on the device, as stored in pointer tables
pub type SectorNo = u32;

/// Pointer table entry meaning "no sector assigned"
pub const UNASSIGNED: SectorNo = SectorNo::MAX;

/// Size in bytes of one pointer table entry on disk
pub const ENTRY_SIZE: u64 = 4;

/// Geometry of a file system, stored at the start of sector 0.
///
/// The layout of the device is
///     \[super sector | free bit map | data sectors\]
/// 1. *super sector*: this structure, read first when mounting.
/// 2. *free bit map*: one bit per data sector, bit *n* set iff data sector *n* is in use.
/// 3. *data sectors*: file contents, file headers and indirect blocks, all handed out by the free-sector allocator.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    ///Size of the sectors in bytes; must match the device's sector size
    pub sector_size: u64,
    ///Number of sectors in the entire file system, all regions included
    pub nsectors: u64,
    ///Number of data sectors tracked by the free bit map
    pub ndatasectors: u64,
    ///Index of the first sector of the free bit map region, which runs until `datastart`
    pub bmapstart: u64,
    ///Index of the first data sector
    pub datastart: u64,
}

impl SuperBlock {
    /// Number of sectors the free bit map needs to track `ndatasectors` sectors
    pub fn bmap_sectors(&self) -> u64 {
        let bits_per_sector = self.sector_size * 8;
        (self.ndatasectors + bits_per_sector - 1) / bits_per_sector
    }
}

lazy_static! {
    /// Size of a serialized superblock in bytes.
    /// Only known at runtime, as it depends on the bincode encoding.
    pub static ref SUPERBLOCK_SIZE : u64 = bincode::serialized_size(&SuperBlock::default()).unwrap_or(u64::MAX);
}
