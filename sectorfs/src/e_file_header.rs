//! File header: the direct region composed with both indirection tiers.
//!
//! A header fills exactly one sector. With `N = sector_size / 4` its layout is
//!
//! | bytes                  | content                                        |
//! |------------------------|------------------------------------------------|
//! | `0..4`                 | file length in bytes (`u32`)                   |
//! | `4..8`                 | number of data sectors (`u32`)                 |
//! | `8..8 + 4D`            | `D = N - 4` direct entries                     |
//! | next 4 bytes           | single-indirect descriptor sector, or sentinel |
//! | last 4 bytes           | double-indirect descriptor sector, or sentinel |
//!
//! all little-endian. Byte offset `o` of the file lives in the direct region while `o < D * sector_size`,
//! then in the single-indirect tier for the next `N * sector_size` bytes, then in the double-indirect tier.
//!
//! Growth is all-or-nothing across tiers: the header plans every tier's share plus the descriptor sectors of tiers that become active,
//! checks the total against one snapshot of the allocator's free count, and only then allocates.

use std::convert::TryFrom;
use std::fmt;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sectorfs_api::fs::SectorSupport;
use sectorfs_api::types::{Sector, SectorNo, ENTRY_SIZE, UNASSIGNED};

use super::b_pointer_table::{entries_per_sector, get_entries, put_entries};
use super::c_single_indirect::{div_ceil, SingleIndirect};
use super::d_double_indirect::{DoubleIndirect, GrowthPlan};
use super::error_fs::{HeaderLayerError, IndirectLayerError};

/// Byte offset of the direct entries, right after the [`HeaderCounts`]
const DIRECT_AT: u64 = 8;
/// Entries of a header sector not available for direct pointers: two counters and two tier descriptors
const RESERVED_ENTRIES: u64 = 4;

/// Number of direct entries in a header for sectors of `sector_size` bytes
pub fn direct_entries(sector_size: u64) -> u64 {
    entries_per_sector(sector_size).saturating_sub(RESERVED_ENTRIES)
}

/// Fixed-width prefix of a header sector
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
struct HeaderCounts {
    num_bytes: u32,
    /// Data sectors only, descriptors are not counted
    num_sectors: u32,
}

/// How many bytes of a file of a given size fall in each tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TierBytes {
    direct: u64,
    single: u64,
    double: u64,
}

impl TierBytes {
    fn total(&self) -> u64 {
        self.direct + self.single + self.double
    }
}

/// Everything a growth of the file would do, computed before anything is touched
#[derive(Debug, Clone, PartialEq, Eq)]
struct HeaderPlan {
    from: TierBytes,
    to: TierBytes,
    double: GrowthPlan,
    sectors: u64,
}

/// In-memory form of a file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    sector_size: u64,
    num_bytes: u64,
    direct: Vec<SectorNo>,
    single_sector: Option<SectorNo>,
    single: SingleIndirect,
    double_sector: Option<SectorNo>,
    double: DoubleIndirect,
}

impl FileHeader {
    /// An empty file for a file system with sectors of `sector_size` bytes
    pub fn new(sector_size: u64) -> FileHeader {
        FileHeader {
            sector_size,
            num_bytes: 0,
            direct: Vec::new(),
            single_sector: None,
            single: SingleIndirect::new(sector_size),
            double_sector: None,
            double: DoubleIndirect::new(sector_size),
        }
    }

    /// Length of the file in bytes
    pub fn file_length(&self) -> u64 {
        self.num_bytes
    }

    /// Number of data sectors of the file
    pub fn num_sectors(&self) -> u64 {
        div_ceil(self.num_bytes, self.sector_size)
    }

    /// Bytes addressed by the direct region
    pub fn direct_capacity(&self) -> u64 {
        direct_entries(self.sector_size) * self.sector_size
    }

    /// Largest file a header can describe; also bounded by the width of the on-disk length field
    pub fn max_file_size(&self) -> u64 {
        let tiers = self.direct_capacity() + self.single.max_bytes() + self.double.max_bytes();
        tiers.min(u64::from(u32::MAX))
    }

    /// Every data sector of the file, in offset order
    pub fn data_sectors(&self) -> impl Iterator<Item = SectorNo> + '_ {
        self.direct
            .iter()
            .copied()
            .chain(self.single.sectors().iter().copied())
            .chain(self.double.data_sectors())
    }

    /// Sectors holding indirect tables rather than file data
    pub fn descriptor_sectors(&self) -> Vec<SectorNo> {
        self.single_sector
            .iter()
            .chain(self.double_sector.iter())
            .chain(self.double.child_sectors())
            .copied()
            .collect()
    }

    /// Number of sectors held by the file, data and descriptors together, not counting the header sector
    pub fn sector_count(&self) -> u64 {
        let tiers = self.single_sector.iter().chain(self.double_sector.iter()).count();
        (self.direct.len() + self.single.len() + tiers) as u64 + self.double.sector_count()
    }

    fn split(&self, size: u64) -> TierBytes {
        let direct = size.min(self.direct_capacity());
        let single = (size - direct).min(self.single.max_bytes());
        TierBytes {
            direct,
            single,
            double: size - direct - single,
        }
    }

    /// Sector holding the byte at `offset`
    pub fn byte_to_sector(&self, offset: u64) -> Result<SectorNo, HeaderLayerError> {
        if offset >= self.num_bytes {
            return Err(HeaderLayerError::HeaderLayerInput(
                "Offset past the end of the file",
            ));
        }
        let direct_capacity = self.direct_capacity();
        let single_end = direct_capacity + self.single.max_bytes();
        let sector = if offset < direct_capacity {
            self.direct.get((offset / self.sector_size) as usize).copied()
        } else if offset < single_end {
            self.single.byte_to_sector(offset - direct_capacity)
        } else {
            self.double.byte_to_sector(offset - single_end)
        };
        sector.ok_or(HeaderLayerError::HeaderLayerInput(
            "Offset is not mapped by the file header",
        ))
    }

    fn plan(&self, additional: u64) -> Result<HeaderPlan, HeaderLayerError> {
        let too_large = |requested| HeaderLayerError::FileTooLarge {
            requested,
            max: self.max_file_size(),
        };
        let new_size = self
            .num_bytes
            .checked_add(additional)
            .ok_or_else(|| too_large(u64::MAX))?;
        if new_size > self.max_file_size() {
            return Err(too_large(new_size));
        }
        let from = self.split(self.num_bytes);
        let to = self.split(new_size);
        if div_ceil(from.direct, self.sector_size) != self.direct.len() as u64 {
            return Err(HeaderLayerError::HeaderLayerInput(
                "File length does not match the direct sectors",
            ));
        }

        let mut sectors = div_ceil(to.direct, self.sector_size) - self.direct.len() as u64;
        if to.single > from.single {
            sectors += self.single.sectors_needed(to.single - from.single, from.single)?;
            sectors += u64::from(self.single_sector.is_none());
        }
        let double = self.double.plan(to.double - from.double, from.double)?;
        if !double.is_empty() {
            sectors += double.sectors() + u64::from(self.double_sector.is_none());
        }
        Ok(HeaderPlan {
            from,
            to,
            double,
            sectors,
        })
    }

    /// Grow the file by `additional` bytes, filling the direct region, then the single-indirect tier, then the double-indirect tier.
    ///
    /// All-or-nothing: on error neither the allocator nor the header has changed.
    /// - [`HeaderLayerError::FileTooLarge`] if the grown file exceeds [`max_file_size`](Self::max_file_size)
    /// - [`IndirectLayerError::BudgetExhausted`] (wrapped) if the disk cannot hold the grown file
    pub fn extend<F>(&mut self, fs: &mut F, additional: u64) -> Result<(), HeaderLayerError>
    where
        F: SectorSupport,
        IndirectLayerError: From<F::Error>,
        HeaderLayerError: From<F::Error>,
    {
        let plan = self.plan(additional)?;
        if plan.sectors > 0 {
            let available = fs.s_count_free()?;
            if available < plan.sectors {
                warn!(
                    "growing a {} byte file by {} bytes refused: {} sectors needed, {} free",
                    self.num_bytes, additional, plan.sectors, available
                );
                return Err(IndirectLayerError::BudgetExhausted {
                    needed: plan.sectors,
                    available,
                }
                .into());
            }
        }
        self.commit(fs, &plan)?;
        self.num_bytes = plan.to.total();
        Ok(())
    }

    /// Carry out a plan whose budget has been checked, undoing every tier on failure
    fn commit<F>(&mut self, fs: &mut F, plan: &HeaderPlan) -> Result<(), HeaderLayerError>
    where
        F: SectorSupport,
        IndirectLayerError: From<F::Error>,
        HeaderLayerError: From<F::Error>,
    {
        match self.commit_tiers(fs, plan) {
            Ok(()) => {
                debug!(
                    "file grew from {} to {} bytes with {} new sectors",
                    plan.from.total(),
                    plan.to.total(),
                    plan.sectors
                );
                Ok(())
            }
            Err(e) => {
                warn!("file growth failed, rolling back: {}", e);
                if let Err(undo) = self.release_past(fs, plan.from.total()) {
                    warn!("file growth rollback failed: {}", undo);
                }
                Err(e)
            }
        }
    }

    fn commit_tiers<F>(&mut self, fs: &mut F, plan: &HeaderPlan) -> Result<(), HeaderLayerError>
    where
        F: SectorSupport,
        IndirectLayerError: From<F::Error>,
        HeaderLayerError: From<F::Error>,
    {
        let direct_sectors = div_ceil(plan.to.direct, self.sector_size) as usize;
        while self.direct.len() < direct_sectors {
            let s = fs.s_alloc()?;
            self.direct.push(s);
        }
        if plan.to.single > plan.from.single {
            if self.single_sector.is_none() {
                self.single_sector = Some(fs.s_alloc()?);
            }
            self.single
                .commit_additional(fs, plan.to.single - plan.from.single, plan.from.single)?;
        }
        if !plan.double.is_empty() {
            if self.double_sector.is_none() {
                self.double_sector = Some(fs.s_alloc()?);
            }
            self.double.commit(fs, &plan.double)?;
        }
        Ok(())
    }

    /// Give a fresh file its first `size` bytes
    pub fn allocate<F>(&mut self, fs: &mut F, size: u64) -> Result<(), HeaderLayerError>
    where
        F: SectorSupport,
        IndirectLayerError: From<F::Error>,
        HeaderLayerError: From<F::Error>,
    {
        if self.num_bytes != 0 || self.sector_count() != 0 {
            return Err(HeaderLayerError::HeaderLayerInput(
                "Cannot allocate a file that already holds sectors",
            ));
        }
        self.extend(fs, size)
    }

    /// Release every sector past what a file of `size` bytes needs, including descriptors of tiers it no longer reaches.
    /// Works from the sectors actually held, so it also cleans up after a partially committed growth.
    fn release_past<F>(&mut self, fs: &mut F, size: u64) -> Result<(), HeaderLayerError>
    where
        F: SectorSupport,
        IndirectLayerError: From<F::Error>,
        HeaderLayerError: From<F::Error>,
    {
        let keep = self.split(size);
        self.double.truncate(fs, keep.double)?;
        if let (0, Some(s)) = (keep.double, self.double_sector) {
            fs.s_free(s)?;
            self.double_sector = None;
        }
        self.single.truncate(fs, keep.single)?;
        if let (0, Some(s)) = (keep.single, self.single_sector) {
            fs.s_free(s)?;
            self.single_sector = None;
        }
        let direct_sectors = div_ceil(keep.direct, self.sector_size) as usize;
        while self.direct.len() > direct_sectors {
            let last = self.direct.len() - 1;
            fs.s_free(self.direct[last])?;
            self.direct.pop();
        }
        Ok(())
    }

    /// Shrink the file to `new_size` bytes, releasing data sectors and the descriptors of tiers that become unused
    pub fn truncate<F>(&mut self, fs: &mut F, new_size: u64) -> Result<(), HeaderLayerError>
    where
        F: SectorSupport,
        IndirectLayerError: From<F::Error>,
        HeaderLayerError: From<F::Error>,
    {
        if new_size > self.num_bytes {
            return Err(HeaderLayerError::HeaderLayerInput(
                "Cannot truncate a file to a larger size",
            ));
        }
        self.release_past(fs, new_size)?;
        debug!("file truncated from {} to {} bytes", self.num_bytes, new_size);
        self.num_bytes = new_size;
        Ok(())
    }

    /// Give every data and descriptor sector back to the allocator, leaving an empty file
    pub fn deallocate<F>(&mut self, fs: &mut F) -> Result<(), HeaderLayerError>
    where
        F: SectorSupport,
        IndirectLayerError: From<F::Error>,
        HeaderLayerError: From<F::Error>,
    {
        self.truncate(fs, 0)
    }

    /// Replace this header with the one stored in `sector`, loading both tiers from their descriptor sectors
    pub fn fetch_from<F>(&mut self, fs: &F, sector: SectorNo) -> Result<(), HeaderLayerError>
    where
        F: SectorSupport,
        IndirectLayerError: From<F::Error>,
        HeaderLayerError: From<F::Error>,
    {
        let raw = fs.s_get(u64::from(sector))?;
        let corrupt = || HeaderLayerError::CorruptHeader(u64::from(sector));

        let mut header = FileHeader::new(self.sector_size);
        let counts = raw.deserialize_from::<HeaderCounts>(0)?;
        header.num_bytes = u64::from(counts.num_bytes);
        let num_sectors = u64::from(counts.num_sectors);
        let count = direct_entries(self.sector_size);
        header.direct = get_entries(&raw, DIRECT_AT, count)?;
        let tiers_at = DIRECT_AT + count * ENTRY_SIZE;
        let descriptor = |at: u64| -> Result<Option<SectorNo>, HeaderLayerError> {
            let s = raw.deserialize_from::<SectorNo>(at)?;
            Ok(Some(s).filter(|&s| s != UNASSIGNED))
        };
        header.single_sector = descriptor(tiers_at)?;
        header.double_sector = descriptor(tiers_at + ENTRY_SIZE)?;

        if header.num_bytes > header.max_file_size() || num_sectors != header.num_sectors() {
            return Err(corrupt());
        }
        let bytes = header.split(header.num_bytes);
        if div_ceil(bytes.direct, self.sector_size) != header.direct.len() as u64
            || (bytes.single > 0) != header.single_sector.is_some()
            || (bytes.double > 0) != header.double_sector.is_some()
        {
            return Err(corrupt());
        }
        if let Some(s) = header.single_sector {
            header.single.fetch_from(fs, s)?;
        }
        if let Some(s) = header.double_sector {
            header.double.fetch_from(fs, s)?;
        }
        // each tier holds exactly its share of the file, so offsets resolve where the length says they are
        if !header.single.covers(bytes.single) || !header.double.covers(bytes.double) {
            return Err(corrupt());
        }
        *self = header;
        Ok(())
    }

    /// Store this header in `sector`, and both tiers in their descriptor sectors
    pub fn write_back<F>(&self, fs: &mut F, sector: SectorNo) -> Result<(), HeaderLayerError>
    where
        F: SectorSupport,
        IndirectLayerError: From<F::Error>,
        HeaderLayerError: From<F::Error>,
    {
        let too_long = |_: std::num::TryFromIntError| {
            HeaderLayerError::HeaderLayerInput("File length does not fit in a header")
        };
        let counts = HeaderCounts {
            num_bytes: u32::try_from(self.num_bytes).map_err(too_long)?,
            num_sectors: u32::try_from(self.num_sectors()).map_err(too_long)?,
        };

        let mut raw = Sector::new_zero(u64::from(sector), self.sector_size);
        raw.serialize_into(&counts, 0)?;
        let count = direct_entries(self.sector_size);
        put_entries(&mut raw, DIRECT_AT, count, &self.direct)?;
        let tiers_at = DIRECT_AT + count * ENTRY_SIZE;
        raw.serialize_into(&self.single_sector.unwrap_or(UNASSIGNED), tiers_at)?;
        raw.serialize_into(&self.double_sector.unwrap_or(UNASSIGNED), tiers_at + ENTRY_SIZE)?;
        fs.s_put(&raw)?;

        if let Some(s) = self.single_sector {
            self.single.write_back(fs, s)?;
        }
        if let Some(s) = self.double_sector {
            self.double.write_back(fs, s)?;
        }
        Ok(())
    }
}

impl fmt::Display for FileHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FileHeader: {} bytes in {} sectors, direct {:?}",
            self.num_bytes,
            self.num_sectors(),
            self.direct
        )?;
        if let Some(s) = self.single_sector {
            write!(f, ", single @{} {:?}", s, self.single.sectors())?;
        }
        if let Some(s) = self.double_sector {
            write!(f, ", double @{} children {:?}", s, self.double.child_sectors())?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../api/fs-tests/e_test.rs"]
mod tests;
