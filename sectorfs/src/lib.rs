//! Sector file system with indirect-block addressing
//!
//! Files grow past the few sectors their header references directly by chaining fixed-size pointer tables.
//! The crate is layered, each module building on the previous ones:
//!
//! 1. [`a_sector_support`]: the superblock and the free-sector allocator, on top of the device from `sectorfs_api`
//! 2. [`b_pointer_table`]: the on-disk form of a pointer table
//! 3. [`c_single_indirect`]: one pointer table addressing data sectors directly
//! 4. [`d_double_indirect`]: one pointer table addressing single-indirect children
//! 5. [`e_file_header`]: the direct region of a file followed by both tiers
//!
//! Errors of every layer are collected in [`error_fs`].
//! The tiers log growth and release through the `log` facade; installing a logger is up to the binary using the crate.

#![deny(missing_docs)]

pub mod a_sector_support;
pub mod b_pointer_table;
pub mod c_single_indirect;
pub mod d_double_indirect;
pub mod e_file_header;
pub mod error_fs;
