//! Single-indirect tier: one pointer table whose entries name data sectors directly.
//!
//! With `N = sector_size / 4` entries the tier addresses at most `N * sector_size` bytes.
//! The tier does not know how many bytes of it are in use; the owner passes that count in on every growth,
//! and the tier checks it against the number of sectors it holds.
//!
//! Growth is planned before anything is touched: a request that does not fit in the tier, or that needs more sectors than the allocator has free,
//! fails without changing the allocator or the table.

use log::{debug, warn};
use sectorfs_api::fs::SectorSupport;
use sectorfs_api::types::SectorNo;

use super::b_pointer_table::{entries_per_sector, read_table, write_table};
use super::error_fs::IndirectLayerError;

/// Number of `unit`-sized pieces needed to hold `bytes` bytes
pub(crate) fn div_ceil(bytes: u64, unit: u64) -> u64 {
    (bytes + unit - 1) / unit
}

/// In-memory form of a single-indirect block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleIndirect {
    sector_size: u64,
    /// Data sectors in offset order; the length is the number of sectors in use
    pointers: Vec<SectorNo>,
}

impl SingleIndirect {
    /// An empty tier for a file system with sectors of `sector_size` bytes
    pub fn new(sector_size: u64) -> SingleIndirect {
        SingleIndirect {
            sector_size,
            pointers: Vec::new(),
        }
    }

    /// Maximum number of data sectors, `N`
    pub fn entries(&self) -> u64 {
        entries_per_sector(self.sector_size)
    }

    /// Number of bytes this tier can address, `N * sector_size`
    pub fn max_bytes(&self) -> u64 {
        self.entries() * self.sector_size
    }

    /// Number of data sectors assigned
    pub fn len(&self) -> usize {
        self.pointers.len()
    }

    /// Whether no data sector is assigned
    pub fn is_empty(&self) -> bool {
        self.pointers.is_empty()
    }

    /// Whether every entry of the table is assigned
    pub fn is_full(&self) -> bool {
        self.pointers.len() as u64 == self.entries()
    }

    /// The assigned data sectors, in offset order
    pub fn sectors(&self) -> &[SectorNo] {
        &self.pointers
    }

    /// The `index`th data sector of this tier, if assigned
    pub fn sector_at(&self, index: u64) -> Option<SectorNo> {
        self.pointers.get(index as usize).copied()
    }

    /// Sector holding the byte at `local_offset`, counted from the start of this tier
    pub fn byte_to_sector(&self, local_offset: u64) -> Option<SectorNo> {
        self.sector_at(local_offset / self.sector_size)
    }

    /// Check that `current_bytes_used` describes this tier, returning the number of sectors it covers
    fn used_sectors(&self, current_bytes_used: u64) -> Result<u64, IndirectLayerError> {
        if current_bytes_used > self.max_bytes() {
            return Err(IndirectLayerError::IndirectLayerInput(
                "Byte count exceeds the capacity of the single-indirect tier",
            ));
        }
        let used = div_ceil(current_bytes_used, self.sector_size);
        if used != self.pointers.len() as u64 {
            return Err(IndirectLayerError::IndirectLayerInput(
                "Byte count does not match the sectors held by the single-indirect tier",
            ));
        }
        Ok(used)
    }

    /// Whether the sectors held are exactly those a tier covering `bytes` bytes needs
    pub fn covers(&self, bytes: u64) -> bool {
        bytes <= self.max_bytes() && div_ceil(bytes, self.sector_size) == self.pointers.len() as u64
    }

    /// Number of new data sectors that growing by `additional_bytes` would take, without allocating anything.
    /// Fails with [`IndirectLayerError::TierExhausted`] if the grown size would not fit in this tier.
    pub fn sectors_needed(
        &self,
        additional_bytes: u64,
        current_bytes_used: u64,
    ) -> Result<u64, IndirectLayerError> {
        let used = self.used_sectors(current_bytes_used)?;
        let exhausted = |requested| IndirectLayerError::TierExhausted {
            requested,
            max: self.max_bytes(),
        };
        let total_bytes = current_bytes_used
            .checked_add(additional_bytes)
            .ok_or_else(|| exhausted(u64::MAX))?;
        if total_bytes > self.max_bytes() {
            return Err(exhausted(total_bytes));
        }
        Ok(div_ceil(total_bytes, self.sector_size) - used)
    }

    /// Grow the tier so it covers `current_bytes_used + additional_bytes` bytes.
    ///
    /// Either every needed sector is taken from the allocator and recorded, or the call fails and neither the allocator nor the table changes:
    /// - [`IndirectLayerError::TierExhausted`] if the grown size exceeds [`max_bytes`](Self::max_bytes)
    /// - [`IndirectLayerError::BudgetExhausted`] if the allocator has too few free sectors
    pub fn allocate_additional<F>(
        &mut self,
        fs: &mut F,
        additional_bytes: u64,
        current_bytes_used: u64,
    ) -> Result<(), IndirectLayerError>
    where
        F: SectorSupport,
        IndirectLayerError: From<F::Error>,
    {
        let needed = self.sectors_needed(additional_bytes, current_bytes_used)?;
        if needed == 0 {
            return Ok(());
        }
        let available = fs.s_count_free()?;
        if available < needed {
            warn!(
                "single-indirect growth by {} bytes refused: {} sectors needed, {} free",
                additional_bytes, needed, available
            );
            return Err(IndirectLayerError::BudgetExhausted { needed, available });
        }
        self.commit_sectors(fs, needed)
    }

    /// Grow by `additional_bytes` without checking the allocator's budget first.
    /// Only for callers that already checked the budget of a larger plan this growth is part of.
    pub(crate) fn commit_additional<F>(
        &mut self,
        fs: &mut F,
        additional_bytes: u64,
        current_bytes_used: u64,
    ) -> Result<(), IndirectLayerError>
    where
        F: SectorSupport,
        IndirectLayerError: From<F::Error>,
    {
        let needed = self.sectors_needed(additional_bytes, current_bytes_used)?;
        self.commit_sectors(fs, needed)
    }

    /// Append `count` freshly allocated sectors.
    /// If the allocator fails halfway, the sectors taken by this call are given back before the error is returned.
    fn commit_sectors<F>(&mut self, fs: &mut F, count: u64) -> Result<(), IndirectLayerError>
    where
        F: SectorSupport,
        IndirectLayerError: From<F::Error>,
    {
        if count == 0 {
            return Ok(());
        }
        let before = self.pointers.len();
        for _ in 0..count {
            match fs.s_alloc() {
                Ok(s) => self.pointers.push(s),
                Err(e) => {
                    warn!(
                        "single-indirect growth failed after {} of {} sectors, rolling back",
                        self.pointers.len() - before,
                        count
                    );
                    if let Err(undo) = self.release_tail(fs, before) {
                        warn!("single-indirect rollback failed: {}", undo);
                    }
                    return Err(e.into());
                }
            }
        }
        debug!(
            "single-indirect tier grew by {} sectors to {}",
            count,
            self.pointers.len()
        );
        Ok(())
    }

    /// Release data sectors from the end of the table until `keep` remain.
    /// Sectors are dropped from the table one at a time, so on error the table still lists exactly the sectors that were not released.
    fn release_tail<F>(&mut self, fs: &mut F, keep: usize) -> Result<(), IndirectLayerError>
    where
        F: SectorSupport,
        IndirectLayerError: From<F::Error>,
    {
        while self.pointers.len() > keep {
            if let Some(&s) = self.pointers.last() {
                debug_assert!(
                    fs.s_in_use(s).unwrap_or(false),
                    "sector {} held by a single-indirect tier is not marked in use",
                    s
                );
                fs.s_free(s)?;
                self.pointers.pop();
            }
        }
        Ok(())
    }

    /// Give every data sector back to the allocator, leaving the tier empty
    pub fn deallocate<F>(&mut self, fs: &mut F) -> Result<(), IndirectLayerError>
    where
        F: SectorSupport,
        IndirectLayerError: From<F::Error>,
    {
        let released = self.pointers.len();
        self.release_tail(fs, 0)?;
        debug!("single-indirect tier released {} sectors", released);
        Ok(())
    }

    /// Shrink the tier so it covers only `new_bytes` bytes, releasing the data sectors past that point
    pub fn truncate<F>(&mut self, fs: &mut F, new_bytes: u64) -> Result<(), IndirectLayerError>
    where
        F: SectorSupport,
        IndirectLayerError: From<F::Error>,
    {
        let keep = div_ceil(new_bytes, self.sector_size);
        if keep > self.pointers.len() as u64 {
            return Err(IndirectLayerError::IndirectLayerInput(
                "Cannot truncate the single-indirect tier to a larger size",
            ));
        }
        self.release_tail(fs, keep as usize)
    }

    /// Replace the table with the one stored in `sector`
    pub fn fetch_from<F>(&mut self, fs: &F, sector: SectorNo) -> Result<(), IndirectLayerError>
    where
        F: SectorSupport,
        IndirectLayerError: From<F::Error>,
    {
        let pointers = read_table(fs, sector)?;
        if pointers.len() as u64 > self.entries() {
            return Err(IndirectLayerError::CorruptTable(u64::from(sector)));
        }
        self.pointers = pointers;
        Ok(())
    }

    /// Store the table in `sector`
    pub fn write_back<F>(&self, fs: &mut F, sector: SectorNo) -> Result<(), IndirectLayerError>
    where
        F: SectorSupport,
        IndirectLayerError: From<F::Error>,
    {
        write_table(fs, sector, self.sector_size, &self.pointers)
    }
}

#[cfg(test)]
#[path = "../../api/fs-tests/c_test.rs"]
mod tests;
