//! Traits implemented by the layers of the sector file system.
//!
//! Each layer wraps the one below it and re-implements the traits of that layer by delegation, adding its own steps on top.
//! Every file system implements at least [`FileSysSupport`]; the free-sector allocator used by the indirection tiers is [`SectorSupport`].

use super::{
    controller::Device,
    types::{Sector, SectorNo, SuperBlock},
};
use std::{error, path::Path};

/// Setting up, tearing down and loading a file system, plus the error type shared by all other traits of the same layer.
pub trait FileSysSupport: Sized {
    /// The errors of this layer.
    type Error: error::Error;

    /// Check whether `sb` describes a file system that can exist:
    /// - the sector size can hold the superblock and is a whole number of pointer entries
    /// - the free bit map region starts at sector 1 and is large enough for `ndatasectors` bits
    /// - the regions appear in order and all fall within the first `nsectors` sectors
    fn sb_valid(sb: &SuperBlock) -> bool;

    /// Create a new device at `path`, lay out the regions described by `sb` on it and mount it.
    /// After this call the superblock is stored in sector 0 and every data sector is free.
    fn mkfs<P: AsRef<Path>>(path: P, sb: &SuperBlock) -> Result<Self, Self::Error>;

    /// Mount an existing device, after checking that its superblock is valid and agrees with the device's geometry.
    fn mountfs(dev: Device) -> Result<Self, Self::Error>;

    /// Unmount the file system, giving back the device backing it
    fn unmountfs(self) -> Device;
}

/// Sector-level access and the free-sector allocator.
///
/// Sector numbers handed out and taken back by the allocator are *absolute* sector indices on the device, so they can be stored in pointer tables as is.
/// Only sectors in the data region are ever allocated.
///
/// The allocator is shared by every file on the device. Implementations take `&mut self` for every state change,
/// so callers that share one allocator between threads have to serialize access themselves (e.g. behind a `Mutex`).
pub trait SectorSupport: FileSysSupport {
    /// Read sector `i` of the entire disk
    fn s_get(&self, i: u64) -> Result<Sector, Self::Error>;

    /// Write a sector of the entire disk, at its own index
    fn s_put(&mut self, s: &Sector) -> Result<(), Self::Error>;

    /// Find the first free data sector, mark it as in use, zero its contents and return its absolute index.
    /// Errors if no free sector is left.
    fn s_alloc(&mut self) -> Result<SectorNo, Self::Error>;

    /// Release data sector `s` back to the free pool.
    /// Errors, without changing anything, if `s` is outside the data region or already free.
    fn s_free(&mut self, s: SectorNo) -> Result<(), Self::Error>;

    /// Whether data sector `s` is currently marked as in use.
    /// Errors if `s` is outside the data region.
    fn s_in_use(&self, s: SectorNo) -> Result<bool, Self::Error>;

    /// Number of data sectors that are still free
    fn s_count_free(&self) -> Result<u64, Self::Error>;

    /// Get the superblock describing the current file system
    fn sup_get(&self) -> Result<SuperBlock, Self::Error>;

    /// Write the superblock to sector 0 (leaving the rest of that sector untouched) and cache it
    fn sup_put(&mut self, sup: &SuperBlock) -> Result<(), Self::Error>;
}
