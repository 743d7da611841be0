#![allow(dead_code)]

//Testing utilities shared by the scenario tests
use sectorfs_api::controller::Device;
use sectorfs_api::types::{Sector, SuperBlock};
use std::fs::{create_dir_all, remove_dir, remove_file};
use std::path::{Path, PathBuf};

//Sector size used throughout the scenario tests: 32 entries per pointer table
pub static SECTOR_SIZE: u64 = 128;
pub static ENTRIES: u64 = SECTOR_SIZE / 4;

//A 128-byte sector geometry with `ndatasectors` data sectors behind a single bit map sector
pub fn superblock(ndatasectors: u64) -> SuperBlock {
    SuperBlock {
        sector_size: SECTOR_SIZE,
        nsectors: ndatasectors + 2,
        ndatasectors,
        bmapstart: 1,
        datastart: 2,
    }
}

//Create the directory `name` under the crate root, and make sure `img_name` does not exist in it yet, so we start from a fresh disk
pub fn disk_prep_path(name: &str, img_name: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push(name);
    path.push(img_name);

    if path.exists() {
        remove_file(&path).unwrap();
    }
    create_dir_all(path.parent().unwrap()).unwrap();

    path
}

//Undo folder creation, including removing the parent
pub fn disk_unprep_path(path: &Path) {
    remove_file(path).unwrap();

    let parent = path.parent().unwrap();
    remove_dir(parent).unwrap(); //only remove if empty
}

//Create a fresh device
pub fn disk_setup(path: &Path, sector_size: u64, nsectors: u64) -> Device {
    Device::new(path, sector_size, nsectors).unwrap()
}

//Open an existing device
pub fn disk_open(path: &Path, sector_size: u64, nsectors: u64) -> Device {
    Device::load(path, sector_size, nsectors).unwrap()
}

//Destruct the given device and remove the parent directory that is was located in
pub fn disk_destruct(dev: Device) {
    let path = dev.device_path().to_owned();
    drop(dev); //Flush and unmap before removing the image
    disk_unprep_path(&path);
}

//Create a sector consisting of all zeroes
pub fn zero_sector(sector_no: u64, sector_size: u64) -> Sector {
    n_sector(sector_no, sector_size, 0)
}

//Create a sector consisting of all n
pub fn n_sector(sector_no: u64, sector_size: u64, n: u8) -> Sector {
    Sector::new(sector_no, vec![n; sector_size as usize].into_boxed_slice())
}
