//! Contract with the platform facility that discovers peers and forms groups.
//!
//! The coordinator never talks to a radio directly. It issues requests
//! through [`ConnectionEventSource`] and reacts to [`P2pEvent`]s delivered on
//! a channel, so any backend (a link-layer P2P stack, the LAN emulation in
//! [`crate::lan`], or a scripted test double) can drive it.

use crate::{P2pFailure, PeerDevice};
use std::future::Future;
use std::net::IpAddr;

/// Group state reported after a connection has been established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub group_formed: bool,
    pub is_group_owner: bool,
    pub group_owner_address: Option<IpAddr>,
}

/// How the peer should be invited to the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectConfig {
    /// Push-button setup, no PIN
    #[default]
    PushButton,
}

#[derive(Debug, Clone, PartialEq)]
pub enum P2pEvent {
    RadioStateChanged(bool),
    PeersChanged,
    ConnectionChanged(bool),
    ConnectionInfoAvailable(ConnectionInfo),
    LocalDeviceChanged(PeerDevice),
    /// The event source lost its channel to the underlying framework
    ChannelLost,
}

pub trait ConnectionEventSource: Send + Sync + 'static {
    /// (Re-)open the channel to the underlying framework.
    fn initialize(&self) -> impl Future<Output = Result<(), P2pFailure>> + Send;

    /// Start discovery. Results arrive later as `P2pEvent::PeersChanged`.
    fn discover_peers(&self) -> impl Future<Output = Result<(), P2pFailure>> + Send;

    /// Current peer list, fetched after `PeersChanged`.
    fn request_peers(&self) -> impl Future<Output = Result<Vec<PeerDevice>, P2pFailure>> + Send;

    fn connect(
        &self,
        address: &str,
        config: ConnectConfig,
    ) -> impl Future<Output = Result<(), P2pFailure>> + Send;

    /// Ask for group details; they arrive as `P2pEvent::ConnectionInfoAvailable`.
    fn request_connection_info(&self) -> impl Future<Output = Result<(), P2pFailure>> + Send;

    fn remove_group(&self) -> impl Future<Output = Result<(), P2pFailure>> + Send;

    fn close(&self) -> impl Future<Output = ()> + Send;
}
