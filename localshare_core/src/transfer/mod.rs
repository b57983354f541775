//! Socket-level part of a session.
//!
//! This module provides:
//! - Control-channel framing
//! - The handshake (protocol check + file manifest exchange)
//! - Sequential file sending and receiving over the data channel
//! - The per-file status model both legs update

pub mod constants;
pub mod handshake;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod status;
pub mod utils;

// Re-export public API
pub use handshake::{HandshakeOutcome, perform_handshake};
pub use receiver::receive_files;
pub use sender::send_files;
