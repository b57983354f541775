use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod lan;
pub mod session;
pub mod transfer;

pub use coordinator::PeerConnectionCoordinator;
pub use error::{FrameError, P2pFailure, StatusError};
pub use events::{ConnectConfig, ConnectionEventSource, ConnectionInfo, P2pEvent};
pub use session::{TransferRole, TransferSession};
pub use transfer::status::TransferStatusModel;

/// Magic bytes to identify our app's discovery packets (6 bytes: "LSHR1\0")
pub const MAGIC_BYTES: &[u8] = b"LSHR1\x00";

/// Per-file transfer state. Moves forward only within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    ToBeSent,
    Sending,
    Sent,
    Error,
}

impl FileStatus {
    /// `Sent` and `Error` are final for the rest of the session.
    pub fn is_terminal(self) -> bool {
        matches!(self, FileStatus::Sent | FileStatus::Error)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FileStatus::ToBeSent => "to be sent",
            FileStatus::Sending => "sending",
            FileStatus::Sent => "sent",
            FileStatus::Error => "error",
        };
        f.write_str(text)
    }
}

/// One entry of the session's ordered file list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileItem {
    pub file_name: String,
    ///Readable content on the sending side; receivers never have one
    #[serde(skip)]
    pub file_path: Option<PathBuf>,
    pub status: FileStatus,
}

impl FileItem {
    /// Item queued by the sender, named after the last component of `path`.
    pub fn from_path(path: PathBuf) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self {
            file_name,
            file_path: Some(path),
            status: FileStatus::ToBeSent,
        }
    }

    /// Item learned from the manifest during the handshake.
    pub fn expected(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            file_path: None,
            status: FileStatus::ToBeSent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    Available,
    Invited,
    Connected,
    Failed,
    Unavailable,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DeviceStatus::Available => "Available",
            DeviceStatus::Invited => "Invited",
            DeviceStatus::Connected => "Connected",
            DeviceStatus::Failed => "Failed",
            DeviceStatus::Unavailable => "Unavailable",
        };
        f.write_str(text)
    }
}

/// A nearby device as reported by the connection event source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDevice {
    /// Link-layer address (or whatever the event source uses to address a peer)
    pub address: String,
    pub display_name: String,
    pub status: DeviceStatus,
}

//Commands from UI to Core
#[derive(Debug, Clone)]
pub enum AppCommand {
    ///Ask the event source to look for nearby peers
    DiscoverPeers,
    ///User tapped a peer in the list (sender only)
    SendToDevice(PeerDevice),
    ///Answer to `AppEvent::RequestTransferConfirmation`
    ConfirmTransfer { accepted: bool },
    ///Tear down the session and everything it owns
    EndSession,
}

//Reports from Core to UI
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    Status(String),
    Error(String),

    /// Whole peer list, replaced on every change
    PeersAvailable(Vec<PeerDevice>),

    LocalDeviceAvailable(PeerDevice),

    /// Sender: ask the user before connecting to `peer`
    RequestTransferConfirmation {
        peer: PeerDevice,
    },

    /// Receiver: manifest learned from the handshake
    FilesForTransferAvailable(Vec<FileItem>),

    FileStatusChanged {
        index: usize,
        file_name: String,
        status: FileStatus,
    },

    ConnectionLost,

    /// Handshake ended without a peer address; no data was transferred
    HandshakeFailed,

    TransferComplete {
        success: bool,
    },

    /// The session can no longer recover on its own
    SessionTerminated {
        reason: String,
    },
}
