//! Sector layer: superblock handling and the free-sector allocator.
//!
//! The allocator keeps one bit per data sector in the free bit map region.
//! Within each bit map byte, bits are numbered from the least significant bit, i.e. the byte `0b0000_0001` marks its bit 0 as in use.
//! Bit *n* of the region belongs to data sector *n*, which lives at absolute sector `datastart + n`.

use std::convert::TryFrom;
use std::path::Path;

use bit_field::BitField;
use log::{debug, trace};
use sectorfs_api::controller::Device;
use sectorfs_api::fs::{FileSysSupport, SectorSupport};
use sectorfs_api::types::{Sector, SectorNo, SuperBlock, ENTRY_SIZE, SUPERBLOCK_SIZE, UNASSIGNED};

use super::error_fs::SectorLayerError;

/// Message of the error returned when the allocator runs dry
pub const NO_SPACE: &str = "No free sector left";

/// Smallest sector size we accept: a file header needs room for its two counters, the two tier pointers and at least a few direct entries.
pub const MIN_SECTOR_SIZE: u64 = 32;

const BITS_PER_BYTE: u64 = 8;

/// File system that only knows about sectors and which of them are free
#[derive(Debug)]
pub struct SectorLayerFS {
    ///the SuperBlock for fast access
    super_block: SuperBlock,

    /// the encapsulated device
    device: Device,
}

/// Where the bit of one data sector lives in the bit map region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BitLocation {
    /// absolute index of the bit map sector
    sector: u64,
    /// byte within that sector
    byte: u64,
    /// bit within that byte
    bit: usize,
}

impl SectorLayerFS {
    /// Size of every sector on this file system
    pub fn sector_size(&self) -> u64 {
        self.super_block.sector_size
    }

    /// Index of `s` within the data region, if it lies inside it
    fn data_index(&self, s: SectorNo) -> Result<u64, SectorLayerError> {
        let s = u64::from(s);
        let sb = &self.super_block;
        if s < sb.datastart || s >= sb.datastart + sb.ndatasectors {
            return Err(SectorLayerError::SectorLayerInput(
                "Sector is outside the data region",
            ));
        }
        Ok(s - sb.datastart)
    }

    fn bit_location(&self, s: SectorNo) -> Result<BitLocation, SectorLayerError> {
        let i = self.data_index(s)?;
        let bits_per_sector = self.super_block.sector_size * BITS_PER_BYTE;
        let in_sector = i % bits_per_sector;
        Ok(BitLocation {
            sector: self.super_block.bmapstart + i / bits_per_sector,
            byte: in_sector / BITS_PER_BYTE,
            bit: (in_sector % BITS_PER_BYTE) as usize,
        })
    }

    fn read_bit(&self, loc: BitLocation) -> Result<(Sector, u8), SectorLayerError> {
        let bmap = self.s_get(loc.sector)?;
        let mut byte = [0u8; 1];
        bmap.read_data(&mut byte, loc.byte)?;
        Ok((bmap, byte[0]))
    }

    /// Zero data sector `s` without touching its allocation state
    pub fn s_zero(&mut self, s: SectorNo) -> Result<(), SectorLayerError> {
        self.data_index(s)?;
        let zero = Sector::new_zero(u64::from(s), self.super_block.sector_size);
        self.s_put(&zero)
    }
}

impl FileSysSupport for SectorLayerFS {
    type Error = SectorLayerError;

    fn sb_valid(sb: &SuperBlock) -> bool {
        if sb.sector_size < MIN_SECTOR_SIZE
            || sb.sector_size % ENTRY_SIZE != 0
            || sb.sector_size < *SUPERBLOCK_SIZE
            || sb.ndatasectors == 0
        {
            return false;
        }
        // every data sector number has to fit in a pointer entry without colliding with the sentinel
        let last_data = sb.datastart + sb.ndatasectors - 1;
        sb.bmapstart == 1
            && sb.bmapstart + sb.bmap_sectors() <= sb.datastart
            && last_data < sb.nsectors
            && last_data < u64::from(UNASSIGNED)
    }

    fn mkfs<P: AsRef<Path>>(path: P, sb: &SuperBlock) -> Result<Self, Self::Error> {
        if !Self::sb_valid(sb) {
            return Err(SectorLayerError::SectorLayerInput("SuperBlock not valid"));
        }
        let mut device = Device::new(path, sb.sector_size, sb.nsectors)?;
        let mut super_sector = Sector::new_zero(0, sb.sector_size);
        super_sector.serialize_into(sb, 0)?;
        device.write_sector(&super_sector)?;
        debug!(
            "mkfs: {} sectors of {} bytes, {} data sectors from sector {}",
            sb.nsectors, sb.sector_size, sb.ndatasectors, sb.datastart
        );
        Ok(SectorLayerFS {
            super_block: *sb,
            device,
        })
    }

    fn mountfs(dev: Device) -> Result<Self, Self::Error> {
        let super_sector = dev.read_sector(0)?;
        let super_block = super_sector.deserialize_from::<SuperBlock>(0)?;
        if !Self::sb_valid(&super_block)
            || super_block.sector_size != dev.sector_size
            || super_block.nsectors != dev.nsectors
        {
            return Err(SectorLayerError::SectorLayerInput("SuperBlock not valid"));
        }
        Ok(SectorLayerFS {
            super_block,
            device: dev,
        })
    }

    fn unmountfs(self) -> Device {
        self.device
    }
}

impl SectorSupport for SectorLayerFS {
    fn s_get(&self, i: u64) -> Result<Sector, Self::Error> {
        Ok(self.device.read_sector(i)?)
    }

    fn s_put(&mut self, s: &Sector) -> Result<(), Self::Error> {
        Ok(self.device.write_sector(s)?)
    }

    fn s_alloc(&mut self) -> Result<SectorNo, Self::Error> {
        let sb = self.super_block;
        let mut bit: u64 = 0;
        for bl in 0..sb.bmap_sectors() {
            let mut bmap = self.s_get(sb.bmapstart + bl)?;
            let found = bmap
                .contents_as_ref()
                .iter()
                .enumerate()
                .find(|(_, &byte)| byte != u8::MAX)
                .map(|(by, &byte)| (by as u64, byte, byte.trailing_ones() as u64));
            match found {
                Some((by, mut byte, inner)) => {
                    let index = bit + by * BITS_PER_BYTE + inner;
                    // the last bit map byte may have padding bits past the data region
                    if index >= sb.ndatasectors {
                        break;
                    }
                    byte.set_bit(inner as usize, true);
                    bmap.write_data(&[byte], by)?;
                    self.s_put(&bmap)?;

                    let s = SectorNo::try_from(sb.datastart + index)
                        .map_err(|_| SectorLayerError::SectorLayerInput("SuperBlock not valid"))?;
                    self.s_zero(s)?;
                    trace!("allocated sector {}", s);
                    return Ok(s);
                }
                None => bit += sb.sector_size * BITS_PER_BYTE,
            }
        }
        Err(SectorLayerError::SectorLayerOp(NO_SPACE))
    }

    fn s_free(&mut self, s: SectorNo) -> Result<(), Self::Error> {
        let loc = self.bit_location(s)?;
        let (mut bmap, mut byte) = self.read_bit(loc)?;
        if !byte.get_bit(loc.bit) {
            return Err(SectorLayerError::SectorLayerOp(
                "Trying to free a free sector",
            ));
        }
        byte.set_bit(loc.bit, false);
        bmap.write_data(&[byte], loc.byte)?;
        self.s_put(&bmap)?;
        trace!("released sector {}", s);
        Ok(())
    }

    fn s_in_use(&self, s: SectorNo) -> Result<bool, Self::Error> {
        let loc = self.bit_location(s)?;
        let (_, byte) = self.read_bit(loc)?;
        Ok(byte.get_bit(loc.bit))
    }

    fn s_count_free(&self) -> Result<u64, Self::Error> {
        let sb = &self.super_block;
        let bits_per_sector = sb.sector_size * BITS_PER_BYTE;
        let mut used = 0;
        for bl in 0..sb.bmap_sectors() {
            let bmap = self.s_get(sb.bmapstart + bl)?;
            // bits past the data region are never set, but do not count them if they were
            let bits_here = (sb.ndatasectors - bl * bits_per_sector).min(bits_per_sector);
            for (by, byte) in bmap.contents_as_ref().iter().enumerate() {
                let first = by as u64 * BITS_PER_BYTE;
                if first >= bits_here {
                    break;
                }
                let valid = (bits_here - first).min(BITS_PER_BYTE) as usize;
                used += u64::from(byte.get_bits(0..valid).count_ones());
            }
        }
        Ok(sb.ndatasectors - used)
    }

    fn sup_get(&self) -> Result<SuperBlock, Self::Error> {
        Ok(self.super_block)
    }

    fn sup_put(&mut self, sup: &SuperBlock) -> Result<(), Self::Error> {
        let mut super_sector = self.device.read_sector(0)?;
        super_sector.serialize_into(sup, 0)?;
        self.device.write_sector(&super_sector)?;
        self.super_block = *sup;
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../api/fs-tests/a_test.rs"]
mod tests;
