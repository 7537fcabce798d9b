//! Error types shared by host extensions

use thiserror::Error;

/// Errors raised while parsing a mount path
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MountPathError {
    #[error("Mount path is empty")]
    Empty,

    #[error("Mount path must start with '/': {0}")]
    NotAbsolute(String),

    #[error("Mount path contains an empty or relative segment: {0}")]
    InvalidSegment(String),
}

/// Errors raised by a management registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManagementError {
    #[error("Component already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Management registry unavailable: {0}")]
    Unavailable(String),
}
