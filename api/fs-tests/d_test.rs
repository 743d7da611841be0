use super::{ChildShare, DoubleIndirect};
use crate::a_sector_support::SectorLayerFS;
use crate::b_pointer_table::read_table;
use crate::error_fs::IndirectLayerError;
use sectorfs_api::fs::{FileSysSupport, SectorSupport};
use std::path::PathBuf;

#[path = "utils.rs"]
mod utils;

use utils::{ENTRIES, SECTOR_SIZE};

static CHILD: u64 = ENTRIES * SECTOR_SIZE;

fn disk_prep_path(name: &str) -> PathBuf {
    utils::disk_prep_path(&("fs-images-d-".to_string() + name), "img")
}

fn mkfs(name: &str, ndatasectors: u64) -> SectorLayerFS {
    SectorLayerFS::mkfs(disk_prep_path(name), &utils::superblock(ndatasectors)).unwrap()
}

fn teardown(my_fs: SectorLayerFS) {
    utils::disk_destruct(my_fs.unmountfs());
}

#[test]
fn geometry() {
    let tier = DoubleIndirect::new(SECTOR_SIZE);
    assert_eq!(tier.entries(), ENTRIES);
    assert_eq!(tier.child_capacity(), 4096);
    assert_eq!(tier.max_bytes(), 32 * 4096);
    assert!(tier.is_empty());
    assert_eq!(tier.byte_to_sector(0), None);

    //Filling the whole tier takes every child descriptor plus every data sector
    assert_eq!(tier.sectors_needed(tier.max_bytes(), 0).unwrap(), 32 + 32 * 32);
    assert_eq!(tier.sectors_needed(0, 0).unwrap(), 0);
}

#[test]
fn tier_exhausted() {
    let mut my_fs = mkfs("tier_exhausted", 50);
    let mut tier = DoubleIndirect::new(SECTOR_SIZE);

    match tier.allocate_additional(&mut my_fs, 32 * CHILD + 1, 0) {
        Err(IndirectLayerError::TierExhausted { requested, max }) => {
            assert_eq!(requested, 32 * CHILD + 1);
            assert_eq!(max, 32 * CHILD);
        }
        other => panic!("expected the tier to be exhausted, got {:?}", other),
    }
    assert!(tier.is_empty());
    assert_eq!(my_fs.s_count_free().unwrap(), 50);

    teardown(my_fs);
}

#[test]
fn fresh_growth() {
    let mut my_fs = mkfs("fresh_growth", 100);
    let mut tier = DoubleIndirect::new(SECTOR_SIZE);

    let plan = tier.plan(5000, 0).unwrap();
    assert_eq!(plan.new_children, 2);
    assert_eq!(
        plan.shares,
        vec![
            ChildShare {
                index: 0,
                additional: CHILD,
                used: 0
            },
            ChildShare {
                index: 1,
                additional: 5000 - CHILD,
                used: 0
            },
        ]
    );
    assert_eq!(plan.data_sectors, 32 + 8); //ceil(904 / 128) in the second child
    assert_eq!(plan.sectors(), 42);

    tier.allocate_additional(&mut my_fs, 5000, 0).unwrap();
    assert_eq!(tier.children().len(), 2);
    assert!(tier.children()[0].is_full());
    assert_eq!(tier.children()[1].len(), 8);
    assert_eq!(tier.sector_count(), 42);
    assert_eq!(my_fs.s_count_free().unwrap(), 58);

    teardown(my_fs);
}

#[test]
fn child_boundary_split() {
    let mut my_fs = mkfs("child_boundary_split", 100);
    let mut tier = DoubleIndirect::new(SECTOR_SIZE);
    tier.allocate_additional(&mut my_fs, 4000, 0).unwrap();
    assert_eq!(tier.children().len(), 1);
    assert_eq!(tier.children()[0].len(), 32); //ceil(4000 / 128)
    assert_eq!(my_fs.s_count_free().unwrap(), 100 - 33);

    //The first 96 bytes top up child 0 inside its last sector, the other 104 open child 1
    let plan = tier.plan(200, 4000).unwrap();
    assert_eq!(plan.new_children, 1);
    assert_eq!(plan.shares[0].additional, 96);
    assert_eq!(plan.shares[0].used, 4000);
    assert_eq!(plan.shares[1].additional, 104);
    assert_eq!(plan.sectors(), 2);

    tier.allocate_additional(&mut my_fs, 200, 4000).unwrap();
    assert!(tier.children()[0].is_full());
    assert_eq!(tier.children()[1].len(), 1);
    assert_eq!(my_fs.s_count_free().unwrap(), 100 - 35);

    //Growth that stays inside the last partial sector takes nothing
    assert_eq!(tier.sectors_needed(24, 4200).unwrap(), 0);

    teardown(my_fs);
}

#[test]
fn budget_exhausted() {
    let mut my_fs = mkfs("budget_exhausted", 40);
    let mut tier = DoubleIndirect::new(SECTOR_SIZE);

    //Data sectors alone would fit, the descriptors push it over
    match tier.allocate_additional(&mut my_fs, 5000, 0) {
        Err(IndirectLayerError::BudgetExhausted { needed, available }) => {
            assert_eq!(needed, 42);
            assert_eq!(available, 40);
        }
        other => panic!("expected the budget to be exhausted, got {:?}", other),
    }
    assert!(tier.is_empty());
    assert_eq!(my_fs.s_count_free().unwrap(), 40);

    tier.allocate_additional(&mut my_fs, CHILD, 0).unwrap();
    assert_eq!(my_fs.s_count_free().unwrap(), 40 - 33);

    teardown(my_fs);
}

#[test]
fn rollback_of_new_children() {
    let mut my_fs = mkfs("rollback_of_new_children", 20);
    let mut tier = DoubleIndirect::new(SECTOR_SIZE);

    //Skip the budget check so the allocator runs dry halfway through the commit
    let plan = tier.plan(5000, 0).unwrap();
    let err = tier.commit(&mut my_fs, &plan).unwrap_err();
    assert!(err.is_disk_full());
    assert!(tier.is_empty());
    assert_eq!(my_fs.s_count_free().unwrap(), 20);

    teardown(my_fs);
}

#[test]
fn rollback_of_top_up() {
    let mut my_fs = mkfs("rollback_of_top_up", 40);
    let mut tier = DoubleIndirect::new(SECTOR_SIZE);
    tier.allocate_additional(&mut my_fs, 100, 0).unwrap();
    let before = tier.clone();
    assert_eq!(my_fs.s_count_free().unwrap(), 38);

    //Child 0 is topped up with 31 sectors before child 1 runs out of space
    let plan = tier.plan(5000, 100).unwrap();
    assert_eq!(plan.sectors(), 1 + 31 + 8);
    let err = tier.commit(&mut my_fs, &plan).unwrap_err();
    assert!(err.is_disk_full());
    assert_eq!(tier, before);
    assert_eq!(my_fs.s_count_free().unwrap(), 38);

    teardown(my_fs);
}

#[test]
fn coverage() {
    let mut my_fs = mkfs("coverage", 100);
    let mut tier = DoubleIndirect::new(SECTOR_SIZE);
    let bytes = 5000;
    tier.allocate_additional(&mut my_fs, bytes, 0).unwrap();
    let data: Vec<_> = tier.data_sectors().collect();
    assert_eq!(data.len(), 40);

    for offset in 0..bytes {
        let s = tier.byte_to_sector(offset).unwrap();
        assert_eq!(s, data[(offset / SECTOR_SIZE) as usize]);
        assert!(my_fs.s_in_use(s).unwrap());
    }
    assert!(tier.byte_to_sector(40 * SECTOR_SIZE - 1).is_some());
    assert_eq!(tier.byte_to_sector(40 * SECTOR_SIZE), None);

    //Descriptors never double as data sectors
    for d in tier.child_sectors() {
        assert!(!data.contains(d));
        assert!(my_fs.s_in_use(*d).unwrap());
    }

    teardown(my_fs);
}

#[test]
fn inconsistent_byte_count() {
    let mut my_fs = mkfs("inconsistent_byte_count", 100);
    let mut tier = DoubleIndirect::new(SECTOR_SIZE);
    tier.allocate_additional(&mut my_fs, 5000, 0).unwrap();

    //Two children are active, 100 bytes would need only one
    assert!(matches!(
        tier.allocate_additional(&mut my_fs, 10, 100),
        Err(IndirectLayerError::IndirectLayerInput(_))
    ));
    //Right number of children, wrong number of sectors in the last one
    assert!(matches!(
        tier.allocate_additional(&mut my_fs, 10, 4200),
        Err(IndirectLayerError::IndirectLayerInput(_))
    ));
    assert_eq!(tier.sector_count(), 42);

    teardown(my_fs);
}

#[test]
fn deallocate_releases_descriptors() {
    let mut my_fs = mkfs("deallocate_releases_descriptors", 100);
    let mut tier = DoubleIndirect::new(SECTOR_SIZE);
    tier.allocate_additional(&mut my_fs, 5000, 0).unwrap();
    let descriptors = tier.child_sectors().to_vec();
    let data: Vec<_> = tier.data_sectors().collect();
    assert_eq!(my_fs.s_count_free().unwrap(), 58);

    tier.deallocate(&mut my_fs).unwrap();
    assert!(tier.is_empty());
    assert_eq!(my_fs.s_count_free().unwrap(), 100);
    for s in descriptors.into_iter().chain(data) {
        assert!(!my_fs.s_in_use(s).unwrap());
    }

    teardown(my_fs);
}

#[test]
fn truncate() {
    let mut my_fs = mkfs("truncate", 100);
    let mut tier = DoubleIndirect::new(SECTOR_SIZE);
    tier.allocate_additional(&mut my_fs, 5000, 0).unwrap();

    //Dropping child 1 also drops its descriptor
    tier.truncate(&mut my_fs, CHILD).unwrap();
    assert_eq!(tier.children().len(), 1);
    assert_eq!(my_fs.s_count_free().unwrap(), 100 - 33);

    tier.truncate(&mut my_fs, 300).unwrap();
    assert_eq!(tier.children()[0].len(), 3);
    assert_eq!(my_fs.s_count_free().unwrap(), 100 - 4);
    assert!(tier.truncate(&mut my_fs, 5000).is_err());

    tier.allocate_additional(&mut my_fs, 5000, 300).unwrap();
    assert_eq!(tier.children().len(), 2);

    tier.truncate(&mut my_fs, 0).unwrap();
    assert!(tier.is_empty());
    assert_eq!(my_fs.s_count_free().unwrap(), 100);

    teardown(my_fs);
}

#[test]
fn round_trip() {
    let mut my_fs = mkfs("round_trip", 100);
    let mut tier = DoubleIndirect::new(SECTOR_SIZE);
    tier.allocate_additional(&mut my_fs, 5000, 0).unwrap();
    let descriptor = my_fs.s_alloc().unwrap();
    tier.write_back(&mut my_fs, descriptor).unwrap();

    let dev = my_fs.unmountfs();
    let my_fs = SectorLayerFS::mountfs(dev).unwrap();

    //The top table names the children, each child table names its data sectors
    assert_eq!(
        read_table(&my_fs, descriptor).unwrap(),
        tier.child_sectors().to_vec()
    );
    assert_eq!(read_table(&my_fs, tier.child_sectors()[1]).unwrap().len(), 8);

    let mut loaded = DoubleIndirect::new(SECTOR_SIZE);
    loaded.fetch_from(&my_fs, descriptor).unwrap();
    assert_eq!(loaded, tier);
    assert_eq!(loaded.byte_to_sector(4999), tier.byte_to_sector(4999));

    teardown(my_fs);
}

#[test]
fn overflowing_growth() {
    let mut my_fs = mkfs("overflowing_growth", 100);
    let mut tier = DoubleIndirect::new(SECTOR_SIZE);
    tier.allocate_additional(&mut my_fs, 5000, 0).unwrap();
    let before = tier.clone();

    match tier.allocate_additional(&mut my_fs, u64::MAX, 5000) {
        Err(IndirectLayerError::TierExhausted { requested, max }) => {
            assert_eq!(requested, u64::MAX);
            assert_eq!(max, 32 * CHILD);
        }
        other => panic!("expected the tier to be exhausted, got {:?}", other),
    }
    assert!(matches!(
        tier.sectors_needed(u64::MAX, 5000),
        Err(IndirectLayerError::TierExhausted { .. })
    ));
    assert_eq!(tier, before);
    assert_eq!(my_fs.s_count_free().unwrap(), 58);

    teardown(my_fs);
}

#[test]
fn covers_exact_split() {
    let mut my_fs = mkfs("covers_exact_split", 100);
    let mut tier = DoubleIndirect::new(SECTOR_SIZE);
    assert!(tier.covers(0));
    tier.allocate_additional(&mut my_fs, 5000, 0).unwrap();

    assert!(tier.covers(5000));
    //Same sectors, the last one just fuller
    assert!(tier.covers(5100));
    //Two children, but the second would hold a single sector
    assert!(!tier.covers(4200));
    //One child too many
    assert!(!tier.covers(CHILD));
    assert!(!tier.covers(0));

    teardown(my_fs);
}
