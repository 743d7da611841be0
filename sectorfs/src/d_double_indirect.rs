//! Double-indirect tier: a pointer table whose entries name the descriptor sectors of single-indirect children.
//!
//! Each child addresses `N * sector_size` bytes, so the tier addresses `N² * sector_size` bytes with at most `N` children.
//! Children become active in order; only the last active child may be partially filled.
//!
//! Growth runs in two phases. [`DoubleIndirect::plan`] splits the request over the children and counts every sector it would take,
//! descriptors included, without touching the allocator. Only a plan that fits in the tier and in the allocator's free count is committed.
//! A commit that still fails (the device itself erroring) is rolled back before the error is returned.

use log::{debug, warn};
use sectorfs_api::fs::SectorSupport;
use sectorfs_api::types::SectorNo;

use super::b_pointer_table::{entries_per_sector, read_table, write_table};
use super::c_single_indirect::{div_ceil, SingleIndirect};
use super::error_fs::IndirectLayerError;

/// The share of a growth that lands in one child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildShare {
    /// Index of the child in the double-indirect table
    pub index: usize,
    /// Bytes added to the child
    pub additional: u64,
    /// Bytes the child held before the growth
    pub used: u64,
}

/// Everything a growth of the double-indirect tier would do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrowthPlan {
    /// Children activated by the growth, each taking one descriptor sector
    pub new_children: u64,
    /// Data sectors taken by all children together
    pub data_sectors: u64,
    /// Per-child shares of the growth, in offset order
    pub shares: Vec<ChildShare>,
}

impl GrowthPlan {
    /// Total number of sectors the growth takes from the allocator
    pub fn sectors(&self) -> u64 {
        self.new_children + self.data_sectors
    }

    /// Whether the growth is a no-op
    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }
}

/// In-memory form of a double-indirect block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoubleIndirect {
    sector_size: u64,
    /// Descriptor sectors of the active children
    pointers: Vec<SectorNo>,
    /// Active children, index-aligned with `pointers`
    children: Vec<SingleIndirect>,
}

impl DoubleIndirect {
    /// An empty tier for a file system with sectors of `sector_size` bytes
    pub fn new(sector_size: u64) -> DoubleIndirect {
        DoubleIndirect {
            sector_size,
            pointers: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Maximum number of children, `N`
    pub fn entries(&self) -> u64 {
        entries_per_sector(self.sector_size)
    }

    /// Bytes addressed by one child
    pub fn child_capacity(&self) -> u64 {
        self.entries() * self.sector_size
    }

    /// Number of bytes this tier can address, `N * child_capacity`
    pub fn max_bytes(&self) -> u64 {
        self.entries() * self.child_capacity()
    }

    /// Whether no child is active
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// The active children, in offset order
    pub fn children(&self) -> &[SingleIndirect] {
        &self.children
    }

    /// Descriptor sectors of the active children
    pub fn child_sectors(&self) -> &[SectorNo] {
        &self.pointers
    }

    /// All data sectors of this tier, in offset order
    pub fn data_sectors(&self) -> impl Iterator<Item = SectorNo> + '_ {
        self.children
            .iter()
            .flat_map(|child| child.sectors().iter().copied())
    }

    /// Number of sectors held by this tier, child descriptors included
    pub fn sector_count(&self) -> u64 {
        self.pointers.len() as u64 + self.data_sectors().count() as u64
    }

    /// Sector holding the byte at `local_offset`, counted from the start of this tier
    pub fn byte_to_sector(&self, local_offset: u64) -> Option<SectorNo> {
        let index = local_offset / self.sector_size;
        let child = (index / self.entries()) as usize;
        let within = index % self.entries();
        self.children.get(child)?.sector_at(within)
    }

    /// Whether the children are exactly those a tier covering `bytes` bytes holds:
    /// every child but the last full, the last one covering the remainder
    pub fn covers(&self, bytes: u64) -> bool {
        let child_capacity = self.child_capacity();
        if bytes > self.max_bytes() || div_ceil(bytes, child_capacity) != self.children.len() as u64 {
            return false;
        }
        self.children.iter().enumerate().all(|(i, child)| {
            let start = i as u64 * child_capacity;
            child.covers((bytes - start).min(child_capacity))
        })
    }

    /// Split a growth of `additional_bytes` over the children and count the sectors it takes, without touching anything.
    ///
    /// The last partially used child is topped up first; every newly activated child is filled completely except the final one,
    /// which receives the remainder.
    pub fn plan(
        &self,
        additional_bytes: u64,
        current_bytes_used: u64,
    ) -> Result<GrowthPlan, IndirectLayerError> {
        if additional_bytes == 0 {
            return Ok(GrowthPlan::default());
        }
        let child_capacity = self.child_capacity();
        if current_bytes_used > self.max_bytes() {
            return Err(IndirectLayerError::IndirectLayerInput(
                "Byte count exceeds the capacity of the double-indirect tier",
            ));
        }
        let exhausted = |requested| IndirectLayerError::TierExhausted {
            requested,
            max: self.max_bytes(),
        };
        let total_bytes = current_bytes_used
            .checked_add(additional_bytes)
            .ok_or_else(|| exhausted(u64::MAX))?;
        let children_needed = div_ceil(total_bytes, child_capacity);
        if children_needed > self.entries() {
            return Err(exhausted(total_bytes));
        }
        let used_children = div_ceil(current_bytes_used, child_capacity);
        if used_children != self.children.len() as u64 {
            return Err(IndirectLayerError::IndirectLayerInput(
                "Byte count does not match the children of the double-indirect tier",
            ));
        }

        let mut plan = GrowthPlan {
            new_children: children_needed - used_children,
            ..GrowthPlan::default()
        };
        let mut remaining = additional_bytes;
        let partial = current_bytes_used % child_capacity;
        if partial != 0 {
            let index = used_children as usize - 1;
            let additional = remaining.min(child_capacity - partial);
            plan.data_sectors += self.children[index].sectors_needed(additional, partial)?;
            plan.shares.push(ChildShare {
                index,
                additional,
                used: partial,
            });
            remaining -= additional;
        }
        let fresh = SingleIndirect::new(self.sector_size);
        for index in used_children..children_needed {
            let additional = remaining.min(child_capacity);
            plan.data_sectors += fresh.sectors_needed(additional, 0)?;
            plan.shares.push(ChildShare {
                index: index as usize,
                additional,
                used: 0,
            });
            remaining -= additional;
        }
        debug_assert_eq!(remaining, 0);
        Ok(plan)
    }

    /// Number of sectors, child descriptors included, that growing by `additional_bytes` would take
    pub fn sectors_needed(
        &self,
        additional_bytes: u64,
        current_bytes_used: u64,
    ) -> Result<u64, IndirectLayerError> {
        Ok(self.plan(additional_bytes, current_bytes_used)?.sectors())
    }

    /// Grow the tier so it covers `current_bytes_used + additional_bytes` bytes.
    ///
    /// All-or-nothing: on error neither the allocator nor any table has changed.
    /// - [`IndirectLayerError::TierExhausted`] if more than `N` children would be needed
    /// - [`IndirectLayerError::BudgetExhausted`] if the allocator cannot supply every data and descriptor sector
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
        let plan = self.plan(additional_bytes, current_bytes_used)?;
        if plan.is_empty() {
            return Ok(());
        }
        let needed = plan.sectors();
        let available = fs.s_count_free()?;
        if available < needed {
            warn!(
                "double-indirect growth by {} bytes refused: {} sectors needed, {} free",
                additional_bytes, needed, available
            );
            return Err(IndirectLayerError::BudgetExhausted { needed, available });
        }
        self.commit(fs, &plan)
    }

    /// Carry out a plan whose budget has already been checked
    pub(crate) fn commit<F>(&mut self, fs: &mut F, plan: &GrowthPlan) -> Result<(), IndirectLayerError>
    where
        F: SectorSupport,
        IndirectLayerError: From<F::Error>,
    {
        let before = self.children.len();
        match self.commit_shares(fs, plan) {
            Ok(()) => {
                debug!(
                    "double-indirect tier grew by {} children and {} data sectors to {} children",
                    plan.new_children,
                    plan.data_sectors,
                    self.children.len()
                );
                Ok(())
            }
            Err(e) => {
                warn!("double-indirect growth failed, rolling back: {}", e);
                if let Err(undo) = self.undo(fs, plan, before) {
                    warn!("double-indirect rollback failed: {}", undo);
                }
                Err(e)
            }
        }
    }

    fn commit_shares<F>(&mut self, fs: &mut F, plan: &GrowthPlan) -> Result<(), IndirectLayerError>
    where
        F: SectorSupport,
        IndirectLayerError: From<F::Error>,
    {
        for _ in 0..plan.new_children {
            let descriptor = fs.s_alloc()?;
            self.pointers.push(descriptor);
            self.children.push(SingleIndirect::new(self.sector_size));
        }
        for share in &plan.shares {
            self.children[share.index].commit_additional(fs, share.additional, share.used)?;
        }
        Ok(())
    }

    /// Undo a partially committed plan: drop the children it activated and shrink the child it topped up
    fn undo<F>(&mut self, fs: &mut F, plan: &GrowthPlan, before: usize) -> Result<(), IndirectLayerError>
    where
        F: SectorSupport,
        IndirectLayerError: From<F::Error>,
    {
        self.release_children(fs, before)?;
        if let Some(top_up) = plan.shares.iter().find(|share| share.index < before) {
            self.children[top_up.index].truncate(fs, top_up.used)?;
        }
        Ok(())
    }

    /// Deallocate children from the end until `keep` remain, releasing their data sectors and then their descriptor sector
    fn release_children<F>(&mut self, fs: &mut F, keep: usize) -> Result<(), IndirectLayerError>
    where
        F: SectorSupport,
        IndirectLayerError: From<F::Error>,
    {
        while self.children.len() > keep {
            let last = self.children.len() - 1;
            self.children[last].deallocate(fs)?;
            fs.s_free(self.pointers[last])?;
            self.children.pop();
            self.pointers.pop();
        }
        Ok(())
    }

    /// Give every sector of this tier back to the allocator: each child's data sectors and the child's own descriptor sector
    pub fn deallocate<F>(&mut self, fs: &mut F) -> Result<(), IndirectLayerError>
    where
        F: SectorSupport,
        IndirectLayerError: From<F::Error>,
    {
        let released = self.children.len();
        self.release_children(fs, 0)?;
        debug!("double-indirect tier released {} children", released);
        Ok(())
    }

    /// Shrink the tier so it covers only `new_bytes` bytes
    pub fn truncate<F>(&mut self, fs: &mut F, new_bytes: u64) -> Result<(), IndirectLayerError>
    where
        F: SectorSupport,
        IndirectLayerError: From<F::Error>,
    {
        let child_capacity = self.child_capacity();
        let keep = div_ceil(new_bytes, child_capacity);
        if keep > self.children.len() as u64 {
            return Err(IndirectLayerError::IndirectLayerInput(
                "Cannot truncate the double-indirect tier to a larger size",
            ));
        }
        self.release_children(fs, keep as usize)?;
        if let Some(last) = self.children.last_mut() {
            last.truncate(fs, new_bytes - (keep - 1) * child_capacity)?;
        }
        Ok(())
    }

    /// Replace this tier with the one stored in `sector`, loading every active child from its descriptor sector
    pub fn fetch_from<F>(&mut self, fs: &F, sector: SectorNo) -> Result<(), IndirectLayerError>
    where
        F: SectorSupport,
        IndirectLayerError: From<F::Error>,
    {
        let pointers = read_table(fs, sector)?;
        let mut children = Vec::with_capacity(pointers.len());
        for &descriptor in &pointers {
            let mut child = SingleIndirect::new(self.sector_size);
            child.fetch_from(fs, descriptor)?;
            children.push(child);
        }
        self.pointers = pointers;
        self.children = children;
        Ok(())
    }

    /// Store this tier's table in `sector`, and every active child in its own descriptor sector
    pub fn write_back<F>(&self, fs: &mut F, sector: SectorNo) -> Result<(), IndirectLayerError>
    where
        F: SectorSupport,
        IndirectLayerError: From<F::Error>,
    {
        write_table(fs, sector, self.sector_size, &self.pointers)?;
        for (child, &descriptor) in self.children.iter().zip(&self.pointers) {
            child.write_back(fs, descriptor)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../api/fs-tests/d_test.rs"]
mod tests;
