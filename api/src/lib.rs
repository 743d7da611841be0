//! Shared API of the sector file system
//!
//! This crate contains the sector store (a memory-mapped disk image), the basic
//! sector and superblock types, and the traits that the layers of the file system implement.
//! The indirection tiers and the file header that build on top of it live in the `sectorfs` crate.
//!
//! The scenario tests under `fs-tests/` are written against these traits and mounted into the implementation crate.

#![deny(missing_docs)]

//Implementation of the controller layer
pub mod controller;
pub mod error_given;

//Basic modules for types
pub mod types;

//Traits implemented by the file system layers
pub mod fs;
