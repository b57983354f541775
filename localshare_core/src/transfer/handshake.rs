//! Control-channel handshake run once a group has formed.
//!
//! Which side listens depends only on group ownership: the group owner
//! accepts one connection on the control port, the client connects to the
//! owner. Independently, the file sender writes the manifest (count, then
//! each name in order) and the receiver reads it, so all four combinations of
//! {sender, receiver} x {owner, client} run the same code.

use crate::config::TransferSettings;
use crate::events::ConnectionInfo;
use crate::session::TransferRole;
use crate::transfer::status::TransferStatusModel;
use anyhow::{Context, Result, anyhow, bail};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::constants::HANDSHAKE_MESSAGE;
use super::protocol::{recv_msg, send_msg};

/// Pause between connect attempts while the owner is not listening yet
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Address of the peer the data channel should use
    Resolved(IpAddr),
    Failed,
}

impl HandshakeOutcome {
    pub fn peer_address(self) -> Option<IpAddr> {
        match self {
            HandshakeOutcome::Resolved(addr) => Some(addr),
            HandshakeOutcome::Failed => None,
        }
    }
}

/// Run the handshake in the position `info` gives this device.
///
/// On a receiver, `files` is replaced by the manifest read from the sender.
pub async fn perform_handshake(
    info: &ConnectionInfo,
    role: TransferRole,
    files: &mut TransferStatusModel,
    settings: &TransferSettings,
) -> HandshakeOutcome {
    if !info.group_formed {
        warn!("Handshake requested but no group has formed");
        return HandshakeOutcome::Failed;
    }

    if info.is_group_owner {
        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, settings.control_port));
        match TcpListener::bind(bind_addr).await {
            Ok(listener) => accept_as_group_owner(listener, role, files).await,
            Err(e) => {
                warn!("Cannot listen on control port {}: {}", settings.control_port, e);
                HandshakeOutcome::Failed
            }
        }
    } else {
        match info.group_owner_address {
            Some(owner) => {
                let owner_addr = SocketAddr::new(owner, settings.control_port);
                connect_as_client(owner_addr, role, files, settings.connect_timeout).await
            }
            None => {
                warn!("Group formed without a group owner address");
                HandshakeOutcome::Failed
            }
        }
    }
}

/// Group owner: accept exactly one control connection and check the phrase.
pub async fn accept_as_group_owner(
    listener: TcpListener,
    role: TransferRole,
    files: &mut TransferStatusModel,
) -> HandshakeOutcome {
    debug!("Handshake in progress (group owner)");
    match owner_exchange(listener, role, files).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("Handshake failed: {:#}", e);
            HandshakeOutcome::Failed
        }
    }
}

async fn owner_exchange(
    listener: TcpListener,
    role: TransferRole,
    files: &mut TransferStatusModel,
) -> Result<HandshakeOutcome> {
    let (mut stream, remote_addr) = listener
        .accept()
        .await
        .context("Failed to accept control connection")?;
    // Only one peer per session
    drop(listener);

    let phrase = recv_msg(&mut stream)
        .await
        .context("Failed to read handshake phrase")?;
    if phrase != HANDSHAKE_MESSAGE {
        warn!(
            "Rejected control connection from {}: not a compatible peer",
            remote_addr
        );
        return Ok(HandshakeOutcome::Failed);
    }

    info!("Client IP address: {}", remote_addr.ip());
    exchange_file_transfer_metadata(&mut stream, role, files).await?;
    Ok(HandshakeOutcome::Resolved(remote_addr.ip()))
}

/// Group client: connect to the owner within `connect_timeout` and introduce ourselves.
pub async fn connect_as_client(
    owner_addr: SocketAddr,
    role: TransferRole,
    files: &mut TransferStatusModel,
    connect_timeout: Duration,
) -> HandshakeOutcome {
    debug!("Handshake in progress (client of {})", owner_addr);
    match client_exchange(owner_addr, role, files, connect_timeout).await {
        Ok(()) => HandshakeOutcome::Resolved(owner_addr.ip()),
        Err(e) => {
            warn!("Handshake with {} failed: {:#}", owner_addr, e);
            HandshakeOutcome::Failed
        }
    }
}

async fn client_exchange(
    owner_addr: SocketAddr,
    role: TransferRole,
    files: &mut TransferStatusModel,
    connect_timeout: Duration,
) -> Result<()> {
    let mut stream = connect_before_deadline(owner_addr, connect_timeout).await?;

    send_msg(&mut stream, HANDSHAKE_MESSAGE)
        .await
        .context("Failed to send handshake phrase")?;
    exchange_file_transfer_metadata(&mut stream, role, files).await
}

/// Keep trying until the owner accepts or the timeout elapses; the owner may
/// still be opening its listening socket when we learn about the group.
pub(crate) async fn connect_before_deadline(
    addr: SocketAddr,
    connect_timeout: Duration,
) -> Result<TcpStream> {
    let deadline = Instant::now() + connect_timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            bail!("Timed out connecting to {}", addr);
        }
        match tokio::time::timeout(remaining, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                debug!("{} not listening yet, retrying", addr);
                tokio::time::sleep(CONNECT_RETRY_INTERVAL.min(remaining)).await;
            }
            Ok(Err(e)) => return Err(e).context(format!("Failed to connect to {}", addr)),
            Err(_) => bail!("Timed out connecting to {}", addr),
        }
    }
}

/// Sender writes the manifest, receiver reads it and rebuilds `files` in order.
async fn exchange_file_transfer_metadata<S>(
    stream: &mut S,
    role: TransferRole,
    files: &mut TransferStatusModel,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match role {
        TransferRole::Sender => {
            send_msg(stream, &files.len().to_string()).await?;
            for name in files.names() {
                send_msg(stream, name).await?;
                debug!("Sending manifest entry {}", name);
            }
            stream.flush().await?;
            stream.shutdown().await?;
        }
        TransferRole::Receiver => {
            let count_msg = recv_msg(stream).await.context("Failed to read file count")?;
            let total: usize = count_msg
                .trim()
                .parse()
                .map_err(|_| anyhow!("Invalid file count {:?}", count_msg))?;
            debug!("Metadata: {} files", total);

            let mut names = Vec::with_capacity(total.min(1024));
            for i in 0..total {
                let name = recv_msg(stream)
                    .await
                    .with_context(|| format!("Failed to read name {} of {}", i + 1, total))?;
                debug!("Expecting {}", name);
                names.push(name);
            }
            *files = TransferStatusModel::from_names(names);
        }
    }
    Ok(())
}
