use std::path::PathBuf;

use thiserror::Error;

/// Setup and mount failures surfaced by the binary.
///
/// Per-operation failures never reach this type: the FUSE boundary speaks
/// raw errno values and the engine speaks `std::io::Result`.
#[derive(Debug, Error)]
pub enum StitchError {
    /// The configured source is missing or not a directory.
    #[error("source directory {0:?} does not exist or is not a directory")]
    NotADirectory(PathBuf),

    /// Mount or other I/O failure during startup.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StitchError>;
