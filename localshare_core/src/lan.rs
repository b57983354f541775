//! [`ConnectionEventSource`] over an ordinary IP network.
//!
//! Peers find each other with UDP broadcast announcements and form a
//! two-device "group" with a connect request/accept pair. Every packet is
//! `MAGIC_BYTES` followed by a JSON [`LanMsg`]; anything else on the port is
//! dropped.

use crate::config::{AppConfig, DEFAULT_DISCOVERY_PORT};
use crate::events::{ConnectConfig, ConnectionEventSource, ConnectionInfo, P2pEvent};
use crate::{DeviceStatus, MAGIC_BYTES, P2pFailure, PeerDevice};
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default eagerness to become group owner (0..=15)
pub const DEFAULT_GROUP_OWNER_INTENT: u8 = 7;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LanMsg {
    Announce {
        device_id: String,
        name: String,
    },
    AnnounceReply {
        device_id: String,
        name: String,
    },
    ConnectRequest {
        device_id: String,
        name: String,
        group_owner_intent: u8,
    },
    ConnectAccept {
        device_id: String,
        name: String,
        group_owner_intent: u8,
    },
    Disconnect {
        device_id: String,
    },
}

impl LanMsg {
    fn to_packet(&self) -> Option<Vec<u8>> {
        let json_bytes = serde_json::to_vec(self).ok()?;
        let mut packet = MAGIC_BYTES.to_vec();
        packet.extend_from_slice(&json_bytes);
        Some(packet)
    }

    fn from_packet(packet: &[u8]) -> Option<Self> {
        let data = packet.strip_prefix(MAGIC_BYTES)?;
        serde_json::from_slice(data).ok()
    }
}

#[derive(Debug, Clone)]
pub struct LanSettings {
    pub device_name: String,
    /// Local UDP port; 0 lets the OS pick one
    pub discovery_port: u16,
    /// Where announcements go
    pub broadcast_addr: SocketAddr,
    pub group_owner_intent: u8,
}

impl LanSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            device_name: config.device_name(),
            discovery_port: config.discovery_port,
            broadcast_addr: SocketAddr::from((Ipv4Addr::BROADCAST, config.discovery_port)),
            group_owner_intent: DEFAULT_GROUP_OWNER_INTENT,
        }
    }
}

impl Default for LanSettings {
    fn default() -> Self {
        Self {
            device_name: "Unknown-Device".to_string(),
            discovery_port: DEFAULT_DISCOVERY_PORT,
            broadcast_addr: SocketAddr::from((Ipv4Addr::BROADCAST, DEFAULT_DISCOVERY_PORT)),
            group_owner_intent: DEFAULT_GROUP_OWNER_INTENT,
        }
    }
}

#[derive(Debug, Clone)]
struct LanPeer {
    device: PeerDevice,
    addr: SocketAddr,
}

#[derive(Debug, Clone, Copy)]
struct LanGroup {
    peer_addr: SocketAddr,
    is_group_owner: bool,
}

#[derive(Default)]
struct LanState {
    socket: Option<Arc<UdpSocket>>,
    listener: Option<JoinHandle<()>>,
    peers: HashMap<String, LanPeer>,
    group: Option<(String, LanGroup)>,
}

/// Identity of this device as carried in every message.
#[derive(Debug, Clone)]
struct LocalIdentity {
    device_id: String,
    name: String,
    group_owner_intent: u8,
}

impl LocalIdentity {
    /// Larger intent wins; the device id breaks ties so both sides agree.
    fn owns_group_with(&self, peer_id: &str, peer_intent: u8) -> bool {
        (self.group_owner_intent, self.device_id.as_str()) > (peer_intent, peer_id)
    }
}

pub struct LanEventSource {
    identity: LocalIdentity,
    settings: LanSettings,
    event_tx: mpsc::Sender<P2pEvent>,
    state: Arc<RwLock<LanState>>,
}

impl LanEventSource {
    pub fn new(settings: LanSettings, event_tx: mpsc::Sender<P2pEvent>) -> Self {
        let identity = LocalIdentity {
            device_id: uuid::Uuid::new_v4().to_string(),
            name: settings.device_name.clone(),
            group_owner_intent: settings.group_owner_intent,
        };
        Self {
            identity,
            settings,
            event_tx,
            state: Arc::new(RwLock::new(LanState::default())),
        }
    }

    /// Address other devices use to reach this one in `connect`.
    pub fn device_id(&self) -> &str {
        &self.identity.device_id
    }

    /// Port the discovery socket is bound to, once initialized.
    pub async fn local_port(&self) -> Option<u16> {
        let state = self.state.read().await;
        let socket = state.socket.as_ref()?;
        socket.local_addr().ok().map(|addr| addr.port())
    }

    fn local_device(&self) -> PeerDevice {
        PeerDevice {
            address: self.identity.device_id.clone(),
            display_name: self.identity.name.clone(),
            status: DeviceStatus::Available,
        }
    }

    async fn socket(&self) -> Result<Arc<UdpSocket>, P2pFailure> {
        self.state.read().await.socket.clone().ok_or(P2pFailure::Busy)
    }
}

fn bind_discovery_socket(port: u16) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    // A re-initialized source rebinds while the old socket may still be closing
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())?;
    UdpSocket::from_std(socket.into())
}

async fn send_packet(socket: &UdpSocket, msg: &LanMsg, target: SocketAddr) -> Result<(), P2pFailure> {
    let packet = msg.to_packet().ok_or(P2pFailure::Internal)?;
    socket.send_to(&packet, target).await.map_err(|e| {
        warn!("Failed to send {:?} to {}: {}", msg, target, e);
        P2pFailure::Internal
    })?;
    Ok(())
}

impl ConnectionEventSource for LanEventSource {
    async fn initialize(&self) -> Result<(), P2pFailure> {
        let socket = match bind_discovery_socket(self.settings.discovery_port) {
            Ok(socket) => Arc::new(socket),
            Err(e) => {
                warn!(
                    "Cannot bind discovery socket on port {}: {}",
                    self.settings.discovery_port, e
                );
                return Err(P2pFailure::Unsupported);
            }
        };

        let listener = tokio::spawn(listen(
            socket.clone(),
            self.state.clone(),
            self.identity.clone(),
            self.event_tx.clone(),
        ));

        {
            let mut state = self.state.write().await;
            if let Some(old) = state.listener.replace(listener) {
                old.abort();
            }
            state.socket = Some(socket);
        }
        info!(
            "LAN discovery ready as {} ({})",
            self.identity.name, self.identity.device_id
        );

        let _ = self.event_tx.send(P2pEvent::RadioStateChanged(true)).await;
        let _ = self
            .event_tx
            .send(P2pEvent::LocalDeviceChanged(self.local_device()))
            .await;
        Ok(())
    }

    async fn discover_peers(&self) -> Result<(), P2pFailure> {
        let socket = self.socket().await?;
        let msg = LanMsg::Announce {
            device_id: self.identity.device_id.clone(),
            name: self.identity.name.clone(),
        };
        debug!("Announcing to {}", self.settings.broadcast_addr);
        send_packet(&socket, &msg, self.settings.broadcast_addr).await
    }

    async fn request_peers(&self) -> Result<Vec<PeerDevice>, P2pFailure> {
        let state = self.state.read().await;
        let mut peers: Vec<PeerDevice> = state.peers.values().map(|p| p.device.clone()).collect();
        peers.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Ok(peers)
    }

    async fn connect(&self, address: &str, _config: ConnectConfig) -> Result<(), P2pFailure> {
        let socket = self.socket().await?;
        let target = {
            let mut state = self.state.write().await;
            let peer = state.peers.get_mut(address).ok_or_else(|| {
                warn!("Connect requested to unknown device {}", address);
                P2pFailure::Internal
            })?;
            peer.device.status = DeviceStatus::Invited;
            peer.addr
        };

        let msg = LanMsg::ConnectRequest {
            device_id: self.identity.device_id.clone(),
            name: self.identity.name.clone(),
            group_owner_intent: self.identity.group_owner_intent,
        };
        let _ = self.event_tx.send(P2pEvent::PeersChanged).await;
        send_packet(&socket, &msg, target).await
    }

    async fn request_connection_info(&self) -> Result<(), P2pFailure> {
        let group = self.state.read().await.group.clone();
        let info = match group {
            Some((_, group)) if group.is_group_owner => ConnectionInfo {
                group_formed: true,
                is_group_owner: true,
                group_owner_address: local_ip_address::local_ip().ok(),
            },
            Some((_, group)) => ConnectionInfo {
                group_formed: true,
                is_group_owner: false,
                group_owner_address: Some(group.peer_addr.ip()),
            },
            None => ConnectionInfo {
                group_formed: false,
                is_group_owner: false,
                group_owner_address: None,
            },
        };
        let _ = self
            .event_tx
            .send(P2pEvent::ConnectionInfoAvailable(info))
            .await;
        Ok(())
    }

    async fn remove_group(&self) -> Result<(), P2pFailure> {
        let socket = self.socket().await?;
        let (peer_id, group) = {
            let mut state = self.state.write().await;
            let Some((peer_id, group)) = state.group.take() else {
                return Err(P2pFailure::Busy);
            };
            if let Some(peer) = state.peers.get_mut(&peer_id) {
                peer.device.status = DeviceStatus::Available;
            }
            (peer_id, group)
        };

        debug!("Leaving group with {}", peer_id);
        let msg = LanMsg::Disconnect {
            device_id: self.identity.device_id.clone(),
        };
        send_packet(&socket, &msg, group.peer_addr).await
    }

    async fn close(&self) {
        let mut state = self.state.write().await;
        if let Some(listener) = state.listener.take() {
            listener.abort();
        }
        state.socket = None;
        debug!("LAN discovery closed");
    }
}

/// Receive loop. Ends with `ChannelLost` on a socket error.
async fn listen(
    socket: Arc<UdpSocket>,
    state: Arc<RwLock<LanState>>,
    identity: LocalIdentity,
    event_tx: mpsc::Sender<P2pEvent>,
) {
    let mut buf = [0u8; 2048];
    loop {
        let (len, addr) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!("Discovery socket failed: {}", e);
                let _ = event_tx.send(P2pEvent::ChannelLost).await;
                break;
            }
        };

        let Some(msg) = LanMsg::from_packet(&buf[..len]) else {
            continue;
        };
        handle_message(msg, addr, &socket, &state, &identity, &event_tx).await;
    }
}

async fn handle_message(
    msg: LanMsg,
    addr: SocketAddr,
    socket: &UdpSocket,
    state: &RwLock<LanState>,
    identity: &LocalIdentity,
    event_tx: &mpsc::Sender<P2pEvent>,
) {
    match msg {
        LanMsg::Announce { device_id, name } => {
            // Broadcasts loop back to the sender
            if device_id == identity.device_id {
                return;
            }
            let reply = LanMsg::AnnounceReply {
                device_id: identity.device_id.clone(),
                name: identity.name.clone(),
            };
            let _ = send_packet(socket, &reply, addr).await;
            upsert_peer(state, device_id, name, addr).await;
            let _ = event_tx.send(P2pEvent::PeersChanged).await;
        }
        LanMsg::AnnounceReply { device_id, name } => {
            if device_id == identity.device_id {
                return;
            }
            upsert_peer(state, device_id, name, addr).await;
            let _ = event_tx.send(P2pEvent::PeersChanged).await;
        }
        LanMsg::ConnectRequest {
            device_id,
            name,
            group_owner_intent,
        } => {
            info!("Connection request from {} ({})", name, addr);
            upsert_peer(state, device_id.clone(), name, addr).await;
            let accept = LanMsg::ConnectAccept {
                device_id: identity.device_id.clone(),
                name: identity.name.clone(),
                group_owner_intent: identity.group_owner_intent,
            };
            if send_packet(socket, &accept, addr).await.is_ok() {
                let is_group_owner = identity.owns_group_with(&device_id, group_owner_intent);
                join_group(state, device_id, addr, is_group_owner, event_tx).await;
            }
        }
        LanMsg::ConnectAccept {
            device_id,
            name,
            group_owner_intent,
        } => {
            upsert_peer(state, device_id.clone(), name, addr).await;
            let is_group_owner = identity.owns_group_with(&device_id, group_owner_intent);
            join_group(state, device_id, addr, is_group_owner, event_tx).await;
        }
        LanMsg::Disconnect { device_id } => {
            let left = {
                let mut guard = state.write().await;
                let in_group = guard.group.as_ref().is_some_and(|(id, _)| *id == device_id);
                if in_group {
                    guard.group = None;
                    if let Some(peer) = guard.peers.get_mut(&device_id) {
                        peer.device.status = DeviceStatus::Available;
                    }
                }
                in_group
            };
            if left {
                info!("Peer {} left the group", device_id);
                let _ = event_tx.send(P2pEvent::ConnectionChanged(false)).await;
                let _ = event_tx.send(P2pEvent::PeersChanged).await;
            }
        }
    }
}

async fn upsert_peer(state: &RwLock<LanState>, device_id: String, name: String, addr: SocketAddr) {
    let mut state = state.write().await;
    let status = state
        .peers
        .get(&device_id)
        .map_or(DeviceStatus::Available, |p| p.device.status);
    state.peers.insert(
        device_id.clone(),
        LanPeer {
            device: PeerDevice {
                address: device_id,
                display_name: name,
                status,
            },
            addr,
        },
    );
}

async fn join_group(
    state: &RwLock<LanState>,
    peer_id: String,
    peer_addr: SocketAddr,
    is_group_owner: bool,
    event_tx: &mpsc::Sender<P2pEvent>,
) {
    {
        let mut state = state.write().await;
        if let Some(peer) = state.peers.get_mut(&peer_id) {
            peer.device.status = DeviceStatus::Connected;
        }
        state.group = Some((
            peer_id,
            LanGroup {
                peer_addr,
                is_group_owner,
            },
        ));
    }
    debug!("Group formed (group owner: {})", is_group_owner);
    let _ = event_tx.send(P2pEvent::PeersChanged).await;
    let _ = event_tx.send(P2pEvent::ConnectionChanged(true)).await;
}
