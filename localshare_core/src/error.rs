//! Typed errors for the seams between the coordinator, the event source and
//! the control channel. Everything else uses `anyhow`.

use crate::FileStatus;
use thiserror::Error;

/// Why the connection event source could not service a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum P2pFailure {
    #[error("Internal error")]
    Internal,
    #[error("Framework busy, unable to service request")]
    Busy,
    #[error("P2P unsupported on this device")]
    Unsupported,
    #[error("Unknown error code - {0}")]
    Unknown(i32),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusError {
    #[error("no file at index {index} (session has {len} files)")]
    OutOfRange { index: usize, len: usize },

    #[error("file {index} cannot move from {from} to {to}")]
    IllegalTransition {
        index: usize,
        from: FileStatus,
        to: FileStatus,
    },
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Message too large: {len} bytes (max {max})")]
    TooLarge { len: usize, max: usize },

    #[error("Message is not valid UTF-8")]
    InvalidText(#[from] std::string::FromUtf8Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
