//! Errors raised by the controller and the sector buffers.
//!
//! Every layer of the file system defines its own error enum with [`thiserror`](https://docs.rs/thiserror/1.0.21/thiserror/) and embeds the error of the layer below it, e.g.
//! ```ignore
//! #[error("Error in the controller layer")]
//! ControllerError(#[from] error_given::APIError),
//! ```
//! so that the `?` operator lifts lower-level failures into the caller's error type without explicit mapping.

use std::io;
use thiserror::Error;

///Error type of the controller layer and the `Buffer`/`Sector` types
/// The `#[error]` tag takes care of the `Display` implementation, the `#[from]` tag generates the `From` conversions used by the `?` operator.
#[derive(Error, Debug)]
pub enum APIError {
    /// Error caused when performing IO on the device image
    #[error("Issue using IO in the controller layer")]
    APIO(#[from] io::Error),
    /// Error caused when (de)serializing a structure into a sector
    #[error("Issue with serialization in the controller layer")]
    APISerialize(#[from] bincode::Error),
    /// Invalid input to the controller layer
    #[error("Invalid controller input: {0}")]
    ControllerInput(&'static str),
    /// Invalid input to a sector buffer
    #[error("Invalid sector input: {0}")]
    SectorInput(&'static str),

    ///Catch-all for errors that do not warrant their own variant, e.g. failures of tooling layered on top of the controller.
    ///Prefer a dedicated variant whenever the caller needs to match on the failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error), // source and Display delegate to anyhow::Error
}

/// Generic alias for a `Result` with the error type `APIError`.
pub type Result<T> = std::result::Result<T, APIError>;
