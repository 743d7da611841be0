//! Sector store backed by a memory-mapped image file.
//!
//! A `Device` is created over a path that does not exist yet (a fresh, all-zero image is made) or loaded from an existing image whose size is checked.
//! All I/O happens one whole sector at a time through [`Device::read_sector`] and [`Device::write_sector`]; the raw byte-level accessors stay private.
//!
//! No locking is done on the image file, so do not touch it while a file system is mounted on it.

use super::error_given;
use super::error_given::APIError;
use super::types::Sector;
use memmap::MmapMut;
use std::{
    fs::{remove_file, OpenOptions},
    path::{Path, PathBuf},
};

/// A disk made of `nsectors` sectors of `sector_size` bytes each.
/// The sector size is fixed when the device is created and every sector written to it must have exactly that size.
#[derive(Debug)]
pub struct Device {
    /// Size of the sectors that this disk reads and writes
    pub sector_size: u64,
    /// Total number of sectors this disk consists of
    pub nsectors: u64,
    /// Path of the image file emulating the disk
    path: PathBuf,
    /// Memory-mapped contents of the image file
    contents: MmapMut,
}

/// Whether we expect to create a new image or to open an existing one
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum DiskState {
    /// Creating a new disk image
    New,
    /// Loading an old disk image
    Load,
}

use self::DiskState::*;
impl DiskState {
    /// `Load` if the image exists already, `New` otherwise
    pub fn new(ex: bool) -> DiskState {
        match ex {
            true => Load,
            false => New,
        }
    }
}

impl Drop for Device {
    /// Persist all writes before the mapping goes away, as long as the image still exists
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = self.contents.flush() {
                log::warn!("failed to flush {}: {}", self.path.display(), e);
            }
        }
    }
}

impl Device {
    /// Shared implementation of `new` and `load`
    pub fn create_device<P: AsRef<Path>>(
        path: P,
        sector_size: u64,
        nsectors: u64,
        ds: DiskState,
    ) -> error_given::Result<Device> {
        if sector_size == 0 {
            return Err(APIError::ControllerInput("Sector size must be positive"));
        }
        let path_buf = path.as_ref().to_path_buf();
        let mmapf = mmap_path(path, sector_size * nsectors, ds)?;
        Ok(Device {
            sector_size,
            nsectors,
            path: path_buf,
            contents: mmapf,
        })
    }

    /// Create a *new*, all-zero device of `nsectors` sectors of `sector_size` bytes, backed by the image at `path`.
    /// Fails if `path` already exists.
    pub fn new<P: AsRef<Path>>(
        path: P,
        sector_size: u64,
        nsectors: u64,
    ) -> error_given::Result<Device> {
        Device::create_device(path, sector_size, nsectors, New)
    }

    /// Load an *existing* device image.
    /// Fails if `path` does not exist or its size does not match the given geometry.
    pub fn load<P: AsRef<Path>>(
        path: P,
        sector_size: u64,
        nsectors: u64,
    ) -> error_given::Result<Device> {
        Device::create_device(path, sector_size, nsectors, Load)
    }

    /// End the lifetime of this disk and remove its image file
    pub fn destruct(self) -> error_given::Result<()> {
        remove_file(&self.path)?;
        Ok(())
    }

    /// Size of this device in bytes
    pub fn device_size(&self) -> u64 {
        self.sector_size * self.nsectors
    }

    /// Path of the file backing this device
    pub fn device_path(&self) -> &Path {
        &self.path
    }

    fn index_to_addr(&self, index: u64) -> u64 {
        self.sector_size * index
    }

    /// Read `nb` bytes starting at byte address `addr`
    fn read(&self, addr: u64, nb: u64) -> error_given::Result<Box<[u8]>> {
        if addr + nb > self.device_size() {
            return Err(APIError::ControllerInput("Read past the end of the device"));
        }
        let start = addr as usize;
        let end = (addr + nb) as usize;
        Ok(self.contents[start..end].into())
    }

    /// Read the sector with index `index`
    pub fn read_sector(&self, index: u64) -> error_given::Result<Sector> {
        if index >= self.nsectors {
            return Err(APIError::ControllerInput("Sector index out of bounds"));
        }
        let addr = self.index_to_addr(index);
        let data = self.read(addr, self.sector_size)?;
        Ok(Sector::new(index, data))
    }

    /// Write `b` at byte address `addr`
    fn write(&mut self, addr: u64, b: &[u8]) -> error_given::Result<()> {
        if addr + b.len() as u64 > self.device_size() {
            return Err(APIError::ControllerInput(
                "Write past the end of the device",
            ));
        }
        let start = addr as usize;
        let end = (addr as usize) + b.len();
        self.contents[start..end].copy_from_slice(b);
        Ok(())
    }

    /// Write sector `s` to its own index on the device.
    /// Fails if `s` is not exactly sector-sized or its index is out of bounds.
    pub fn write_sector(&mut self, s: &Sector) -> error_given::Result<()> {
        if s.len() != self.sector_size {
            return Err(APIError::ControllerInput(
                "Trying to write a non-sector-sized sector",
            ));
        }
        if s.sector_no >= self.nsectors {
            return Err(APIError::ControllerInput("Sector index out of bounds"));
        }
        let addr = self.index_to_addr(s.sector_no);
        self.write(addr, s.contents_as_ref())
    }
}

/// Open or create the image at `path` and map it into memory.
/// An existing image must have exactly `dsize` bytes; a new one is extended to `dsize` zero bytes.
fn mmap_path<P: AsRef<Path>>(path: P, dsize: u64, ex: DiskState) -> error_given::Result<MmapMut> {
    let exists = DiskState::new(path.as_ref().exists());
    if exists != ex {
        if ex == Load {
            return Err(APIError::ControllerInput(
                "Tried to load a non-existing file path",
            ));
        } else {
            return Err(APIError::ControllerInput(
                "Tried to create a pre-existing file path",
            ));
        }
    }

    let f = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)?;

    if ex == Load {
        if f.metadata()?.len() != dsize {
            return Err(APIError::ControllerInput(
                "Device size does not match provided size",
            ));
        }
    } else {
        f.set_len(dsize)?;
    }

    let data = unsafe { memmap::MmapOptions::new().map_mut(&f)? };
    Ok(data)
}
