//! Error types for the core crate.

use thiserror::Error;

/// Core error type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Invalid data error
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A volume marker whose transform cannot define a local frame
    #[error("Degenerate volume: {0}")]
    DegenerateVolume(String),

    /// A value outside its permitted range
    #[error("Out of range: {0}")]
    OutOfRange(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
