//! Error types of the layers in this crate.
//!
//! Each layer embeds the error of the layer below it with `#[from]`, so a failure deep down (e.g. a device read past the end of the image)
//! reaches the caller of the top layer unchanged, wrapped once per layer it passed through.

use sectorfs_api::error_given::APIError;
use thiserror::Error;

///Errors of the sector layer and its free-sector allocator
#[derive(Error, Debug)]
pub enum SectorLayerError {
    /// Error in the controller or in a sector buffer
    #[error("Error in the controller layer")]
    ControllerError(#[from] APIError),
    /// Invalid input to the sector layer, e.g. a sector index outside the data region
    #[error("Invalid sector layer input: {0}")]
    SectorLayerInput(&'static str),
    /// An allocator operation that cannot be performed in the current state, e.g. freeing a free sector
    #[error("Sector layer operation failed: {0}")]
    SectorLayerOp(&'static str),
}

///Errors of the single- and double-indirect tiers
#[derive(Error, Debug)]
pub enum IndirectLayerError {
    /// Error raised by the sector layer
    #[error("Error in the sector layer")]
    SectorLayer(#[from] SectorLayerError),
    /// The requested total size does not fit in this tier; the caller has to promote the growth to the next tier
    #[error("Tier exhausted: {requested} bytes requested, tier addresses at most {max} bytes")]
    TierExhausted {
        /// Total number of bytes the tier would have to address
        requested: u64,
        /// Capacity of the tier in bytes
        max: u64,
    },
    /// The allocator cannot supply enough free sectors for the growth; the disk is full
    #[error("Budget exhausted: {needed} free sectors needed, only {available} available")]
    BudgetExhausted {
        /// Number of sectors the growth would take
        needed: u64,
        /// Number of sectors that are free
        available: u64,
    },
    /// Arguments that contradict the tier's current state
    #[error("Invalid indirect layer input: {0}")]
    IndirectLayerInput(&'static str),
    /// A pointer table read from disk that breaks the packing invariant
    #[error("Corrupt pointer table in sector {0}")]
    CorruptTable(u64),
}

///Errors of the file header layer
#[derive(Error, Debug)]
pub enum HeaderLayerError {
    /// Error raised by one of the indirection tiers or below
    #[error("Error in the indirect layer")]
    IndirectLayer(#[from] IndirectLayerError),
    /// Invalid input to the header layer, e.g. an offset past the end of the file
    #[error("Invalid header layer input: {0}")]
    HeaderLayerInput(&'static str),
    /// The file would outgrow the direct region and both indirection tiers
    #[error("File too large: {requested} bytes requested, a file holds at most {max} bytes")]
    FileTooLarge {
        /// Requested file size in bytes
        requested: u64,
        /// Largest file size the header can describe
        max: u64,
    },
    /// A file header read from disk whose counters disagree with the sectors it lists
    #[error("Corrupt file header in sector {0}")]
    CorruptHeader(u64),
}

impl From<SectorLayerError> for HeaderLayerError {
    fn from(e: SectorLayerError) -> Self {
        HeaderLayerError::IndirectLayer(e.into())
    }
}

impl From<APIError> for IndirectLayerError {
    fn from(e: APIError) -> Self {
        IndirectLayerError::SectorLayer(e.into())
    }
}

impl From<APIError> for HeaderLayerError {
    fn from(e: APIError) -> Self {
        HeaderLayerError::IndirectLayer(e.into())
    }
}

impl IndirectLayerError {
    /// Whether this error means the disk ran out of free sectors, directly or through the allocator
    pub fn is_disk_full(&self) -> bool {
        matches!(
            self,
            IndirectLayerError::BudgetExhausted { .. }
                | IndirectLayerError::SectorLayer(SectorLayerError::SectorLayerOp(
                    crate::a_sector_support::NO_SPACE
                ))
        )
    }
}

impl HeaderLayerError {
    /// Whether this error means the disk ran out of free sectors
    pub fn is_disk_full(&self) -> bool {
        matches!(self, HeaderLayerError::IndirectLayer(e) if e.is_disk_full())
    }
}
