//! On-disk form of a pointer table.
//!
//! A table fills exactly one sector with `sector_size / 4` consecutive sector numbers, each a 4-byte little-endian integer.
//! The assigned entries come first; every entry after them holds [`UNASSIGNED`]. There is no header, checksum or version.
//!
//! In memory a table is just the slice of assigned entries, so its length is the number of sectors in use and holes cannot be represented.
//! Holes can only show up in a corrupt sector on disk, which [`read_table`] rejects.

use log::trace;
use sectorfs_api::fs::SectorSupport;
use sectorfs_api::types::{Sector, SectorNo, ENTRY_SIZE, UNASSIGNED};

use super::error_fs::IndirectLayerError;

/// Number of sector numbers that fit in one table
pub fn entries_per_sector(sector_size: u64) -> u64 {
    sector_size / ENTRY_SIZE
}

/// Write `pointers` into the `count` entries of `sector` starting at byte `offset`, padding the remaining entries with the sentinel.
/// Also used for tables embedded in a larger structure, such as the direct entries of a file header.
pub fn put_entries(
    sector: &mut Sector,
    offset: u64,
    count: u64,
    pointers: &[SectorNo],
) -> Result<(), IndirectLayerError> {
    if pointers.len() as u64 > count {
        return Err(IndirectLayerError::IndirectLayerInput(
            "Pointer table does not fit in its entries",
        ));
    }
    let padding = std::iter::repeat(&UNASSIGNED).take(count as usize - pointers.len());
    for (i, entry) in pointers.iter().chain(padding).enumerate() {
        sector.serialize_into(entry, offset + i as u64 * ENTRY_SIZE)?;
    }
    Ok(())
}

/// Read the assigned prefix of the `count` entries of `sector` starting at byte `offset`.
/// Fails with [`IndirectLayerError::CorruptTable`] if an assigned entry follows an unassigned one.
pub fn get_entries(
    sector: &Sector,
    offset: u64,
    count: u64,
) -> Result<Vec<SectorNo>, IndirectLayerError> {
    let mut pointers = Vec::new();
    let mut ended = false;
    for i in 0..count {
        let entry = sector.deserialize_from::<SectorNo>(offset + i * ENTRY_SIZE)?;
        match (entry == UNASSIGNED, ended) {
            (true, _) => ended = true,
            (false, false) => pointers.push(entry),
            (false, true) => return Err(IndirectLayerError::CorruptTable(sector.sector_no)),
        }
    }
    Ok(pointers)
}

/// Encode `pointers` into a fresh sector `at`, padding the rest of the table with the sentinel.
pub fn encode_table(
    at: SectorNo,
    sector_size: u64,
    pointers: &[SectorNo],
) -> Result<Sector, IndirectLayerError> {
    let mut sector = Sector::new_zero(u64::from(at), sector_size);
    put_entries(&mut sector, 0, entries_per_sector(sector_size), pointers)?;
    Ok(sector)
}

/// Decode the assigned prefix of the table stored in `sector`
pub fn decode_table(sector: &Sector) -> Result<Vec<SectorNo>, IndirectLayerError> {
    get_entries(sector, 0, sector.len() / ENTRY_SIZE)
}

/// Persist `pointers` as the table in sector `at`
pub fn write_table<F>(
    fs: &mut F,
    at: SectorNo,
    sector_size: u64,
    pointers: &[SectorNo],
) -> Result<(), IndirectLayerError>
where
    F: SectorSupport,
    IndirectLayerError: From<F::Error>,
{
    let sector = encode_table(at, sector_size, pointers)?;
    fs.s_put(&sector)?;
    trace!("wrote {} pointers to sector {}", pointers.len(), at);
    Ok(())
}

/// Load the assigned entries of the table in sector `at`
pub fn read_table<F>(fs: &F, at: SectorNo) -> Result<Vec<SectorNo>, IndirectLayerError>
where
    F: SectorSupport,
    IndirectLayerError: From<F::Error>,
{
    let sector = fs.s_get(u64::from(at))?;
    let pointers = decode_table(&sector)?;
    trace!("read {} pointers from sector {}", pointers.len(), at);
    Ok(pointers)
}

#[cfg(test)]
#[path = "../../api/fs-tests/b_test.rs"]
mod tests;
