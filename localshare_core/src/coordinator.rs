//! Turns connection events and UI commands into session decisions.
//!
//! The coordinator owns the [`TransferSession`] between steps. Once a group
//! forms it moves the session into a pipeline task (handshake, then transfer)
//! and gets it back when that task ends, so the file list only ever has one
//! writer. All socket work happens inside the pipeline; the coordinator keeps
//! handling events while it runs.

use crate::config::TransferSettings;
use crate::events::{ConnectConfig, ConnectionEventSource, ConnectionInfo, P2pEvent};
use crate::session::TransferSession;
use crate::transfer::utils::change_status;
use crate::transfer::{perform_handshake, receive_files, send_files};
use crate::{AppCommand, AppEvent, FileStatus, PeerDevice};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct PeerConnectionCoordinator<C: ConnectionEventSource> {
    source: Arc<C>,
    settings: TransferSettings,
    event_tx: mpsc::Sender<AppEvent>,

    /// `None` while the pipeline task owns it
    session: Option<TransferSession>,
    pipeline: Option<JoinHandle<TransferSession>>,
    pipeline_cancel: Option<CancellationToken>,
    cancel: CancellationToken,

    is_file_sender: bool,
    // Whether the channel may still be re-initialized after a loss
    should_retry: bool,
    has_sender_started_connection: bool,
    has_started_handshake: bool,
    pending_peer: Option<PeerDevice>,
    terminated: bool,
}

impl<C: ConnectionEventSource> PeerConnectionCoordinator<C> {
    /// Start a new session. A non-empty `files_for_transfer` makes this device the sender.
    pub fn new(
        source: Arc<C>,
        settings: TransferSettings,
        files_for_transfer: Vec<PathBuf>,
        event_tx: mpsc::Sender<AppEvent>,
    ) -> Self {
        let session = TransferSession::new(files_for_transfer);
        let is_file_sender = session.is_file_sender();

        Self {
            source,
            settings,
            event_tx,
            session: Some(session),
            pipeline: None,
            pipeline_cancel: None,
            cancel: CancellationToken::new(),
            is_file_sender,
            should_retry: true,
            has_sender_started_connection: false,
            has_started_handshake: false,
            pending_peer: None,
            terminated: false,
        }
    }

    pub fn is_file_sender(&self) -> bool {
        self.is_file_sender
    }

    /// Token that ends the session when cancelled, same as `AppCommand::EndSession`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drive the session until it ends. Returns the session with its final
    /// file statuses.
    pub async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<AppCommand>,
        mut p2p_rx: mpsc::Receiver<P2pEvent>,
    ) -> Option<TransferSession> {
        if let Err(e) = self.source.initialize().await {
            self.emit(AppEvent::Error(format!("Cannot start peer-to-peer: {}", e)))
                .await;
        }

        while !self.terminated {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                cmd = cmd_rx.recv() => match cmd {
                    Some(AppCommand::EndSession) | None => break,
                    Some(cmd) => self.handle_command(cmd).await,
                },
                event = p2p_rx.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!("Connection event source went away");
                        break;
                    }
                },
                finished = join_pipeline(&mut self.pipeline) => self.on_pipeline_finished(finished).await,
            }
        }

        self.stop().await
    }

    async fn handle_command(&mut self, cmd: AppCommand) {
        match cmd {
            AppCommand::DiscoverPeers => self.discover_peers().await,
            AppCommand::SendToDevice(peer) => self.send_to_device(peer).await,
            AppCommand::ConfirmTransfer { accepted } => self.confirm_transfer(accepted).await,
            AppCommand::EndSession => {}
        }
    }

    async fn discover_peers(&mut self) {
        match self.source.discover_peers().await {
            Ok(()) => self.emit(AppEvent::Status("Discovery initiated".to_string())).await,
            Err(e) => {
                debug!("Discovery failed: {}", e);
                self.emit(AppEvent::Error(format!("Discovery failed: {}", e)))
                    .await;
            }
        }
    }

    /// Only the sender initiates, and only once per session.
    async fn send_to_device(&mut self, peer: PeerDevice) {
        if !self.is_file_sender || self.has_sender_started_connection {
            debug!("Ignoring connection request to {}", peer.display_name);
            return;
        }
        self.pending_peer = Some(peer.clone());
        self.emit(AppEvent::RequestTransferConfirmation { peer }).await;
    }

    async fn confirm_transfer(&mut self, accepted: bool) {
        let Some(peer) = self.pending_peer.take() else {
            return;
        };
        if !accepted || self.has_sender_started_connection {
            return;
        }

        self.has_sender_started_connection = true;
        info!("Connecting to {} ({})", peer.display_name, peer.address);
        self.emit(AppEvent::Status("Performing handshake...".to_string()))
            .await;

        if let Err(e) = self
            .source
            .connect(&peer.address, ConnectConfig::PushButton)
            .await
        {
            debug!("Connection failed: {}", e);
            self.emit(AppEvent::Error(format!("Connection failed: {}", e)))
                .await;
        }
    }

    async fn handle_event(&mut self, event: P2pEvent) {
        match event {
            P2pEvent::RadioStateChanged(enabled) => {
                debug!("P2P state changed - {}", enabled);
                if !enabled {
                    self.emit(AppEvent::Status(
                        "Discovery needs peer-to-peer networking enabled".to_string(),
                    ))
                    .await;
                    self.on_connection_lost().await;
                }
            }
            P2pEvent::PeersChanged => match self.source.request_peers().await {
                Ok(peers) => self.emit(AppEvent::PeersAvailable(peers)).await,
                Err(e) => warn!("Cannot fetch peer list: {}", e),
            },
            P2pEvent::ConnectionChanged(true) => {
                if let Err(e) = self.source.request_connection_info().await {
                    warn!("Cannot request connection info: {}", e);
                }
            }
            P2pEvent::ConnectionChanged(false) => self.on_connection_lost().await,
            P2pEvent::ConnectionInfoAvailable(info) => self.start_pipeline(info),
            P2pEvent::LocalDeviceChanged(device) => {
                self.emit(AppEvent::LocalDeviceAvailable(device)).await
            }
            P2pEvent::ChannelLost => self.on_channel_lost().await,
        }
    }

    async fn on_channel_lost(&mut self) {
        if self.should_retry {
            debug!("Channel lost, trying again");
            self.emit(AppEvent::ConnectionLost).await;
            self.should_retry = false;
            if let Err(e) = self.source.initialize().await {
                warn!("Channel re-initialization failed: {}", e);
            }
        } else {
            error!("Channel lost again, giving up");
            self.emit(AppEvent::SessionTerminated {
                reason: "Severe loss of the peer-to-peer channel".to_string(),
            })
            .await;
            self.terminated = true;
        }
    }

    /// The peer is gone: abandon whatever the pipeline is doing.
    async fn on_connection_lost(&mut self) {
        if let Some(token) = &self.pipeline_cancel {
            token.cancel();
        }
        self.emit(AppEvent::ConnectionLost).await;
    }

    fn start_pipeline(&mut self, info: ConnectionInfo) {
        if !info.group_formed {
            debug!("Connection info without a formed group");
            return;
        }
        if self.has_started_handshake {
            debug!("Handshake already performed for this session");
            return;
        }
        let Some(mut session) = self.session.take() else {
            return;
        };

        self.has_started_handshake = true;
        session.is_group_owner = info.is_group_owner;
        debug!(
            "Starting handshake (sender: {}, group owner: {})",
            session.is_file_sender(),
            info.is_group_owner
        );

        let token = self.cancel.child_token();
        self.pipeline_cancel = Some(token.clone());
        self.pipeline = Some(tokio::spawn(run_pipeline(
            session,
            info,
            self.settings.clone(),
            self.event_tx.clone(),
            token,
        )));
    }

    async fn on_pipeline_finished(&mut self, finished: Result<TransferSession, JoinError>) {
        self.pipeline_cancel = None;
        match finished {
            Ok(session) => self.session = Some(session),
            Err(e) => {
                error!("Transfer task failed: {}", e);
                self.emit(AppEvent::SessionTerminated {
                    reason: format!("Transfer task failed: {}", e),
                })
                .await;
                self.terminated = true;
            }
        }
    }

    /// Cancel outstanding work and release the event source.
    async fn stop(mut self) -> Option<TransferSession> {
        self.cancel.cancel();
        if let Some(handle) = self.pipeline.take() {
            match handle.await {
                Ok(session) => self.session = Some(session),
                Err(e) => warn!("Transfer task ended abnormally: {}", e),
            }
        }

        if self.is_file_sender {
            self.source.close().await;
        } else {
            match self.source.remove_group().await {
                Ok(()) => debug!("Disconnect successful"),
                Err(e) => debug!("Disconnect failed. Reason: {}", e),
            }
            self.source.close().await;
        }
        self.session
    }

    async fn emit(&self, event: AppEvent) {
        let _ = self.event_tx.send(event).await;
    }
}

/// Resolves when the running pipeline ends; never resolves if there is none.
async fn join_pipeline(
    pipeline: &mut Option<JoinHandle<TransferSession>>,
) -> Result<TransferSession, JoinError> {
    match pipeline.as_mut() {
        Some(handle) => {
            let finished = handle.await;
            *pipeline = None;
            finished
        }
        None => std::future::pending().await,
    }
}

/// Handshake, then transfer in the resolved direction. Always hands the
/// session back, whatever happened.
async fn run_pipeline(
    mut session: TransferSession,
    info: ConnectionInfo,
    settings: TransferSettings,
    event_tx: mpsc::Sender<AppEvent>,
    cancel: CancellationToken,
) -> TransferSession {
    let outcome = tokio::select! {
        _ = cancel.cancelled() => None,
        outcome = perform_handshake(&info, session.role, &mut session.files, &settings) => Some(outcome),
    };
    let Some(outcome) = outcome else {
        info!("Handshake cancelled");
        return session;
    };

    let Some(peer) = outcome.peer_address() else {
        let _ = event_tx.send(AppEvent::HandshakeFailed).await;
        return session;
    };
    session.peer_address = Some(peer);

    let success = if session.is_file_sender() {
        let target = SocketAddr::new(peer, settings.data_port);
        tokio::select! {
            _ = cancel.cancelled() => None,
            ok = send_files(target, &mut session.files, &settings, &event_tx) => Some(ok),
        }
    } else {
        let _ = event_tx
            .send(AppEvent::FilesForTransferAvailable(session.files.snapshot()))
            .await;
        if session.files.is_empty() {
            Some(true)
        } else {
            let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, settings.data_port));
            match TcpListener::bind(bind_addr).await {
                Ok(listener) => tokio::select! {
                    _ = cancel.cancelled() => None,
                    ok = receive_files(listener, &mut session.files, &settings.storage_root, &event_tx) => Some(ok),
                },
                Err(e) => {
                    error!("Cannot open data socket on port {}: {}", settings.data_port, e);
                    for index in 0..session.files.len() {
                        change_status(&mut session.files, index, FileStatus::Error, &event_tx)
                            .await;
                    }
                    Some(false)
                }
            }
        }
    };

    match success {
        Some(success) => {
            let message = if success {
                "File transfer complete"
            } else {
                "An error was encountered during transfer"
            };
            let _ = event_tx.send(AppEvent::Status(message.to_string())).await;
            let _ = event_tx.send(AppEvent::TransferComplete { success }).await;
        }
        None => info!("Transfer abandoned"),
    }
    session
}
