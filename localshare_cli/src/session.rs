//! Terminal front end for one transfer session.

use anyhow::{Result, bail};
use localshare_core::config::AppConfig;
use localshare_core::lan::{LanEventSource, LanSettings};
use localshare_core::{AppCommand, AppEvent, DeviceStatus, PeerConnectionCoordinator, PeerDevice};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// How often discovery is repeated until a group forms
const DISCOVERY_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Default)]
pub struct SessionOptions {
    pub peer_name: Option<String>,
    pub auto_confirm: bool,
}

pub async fn run(config: AppConfig, files: Vec<PathBuf>, options: SessionOptions) -> Result<()> {
    let (tx_cmd, rx_cmd) = mpsc::channel::<AppCommand>(1000);
    let (tx_event, mut rx_event) = mpsc::channel::<AppEvent>(1000);
    let (tx_p2p, rx_p2p) = mpsc::channel(1000);

    for path in &files {
        if !path.is_file() {
            tracing::warn!("{} is not a readable file and will fail", path.display());
        }
    }

    let source = Arc::new(LanEventSource::new(LanSettings::from_config(&config), tx_p2p));
    let coordinator = PeerConnectionCoordinator::new(
        source,
        config.transfer_settings(),
        files,
        tx_event,
    );
    let is_sender = coordinator.is_file_sender();
    let backend = tokio::spawn(coordinator.run(rx_cmd, rx_p2p));

    if is_sender {
        println!("Looking for devices...");
    } else {
        println!(
            "Waiting for files, saving to {}",
            config.storage_root.display()
        );
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut discovery = tokio::time::interval(DISCOVERY_INTERVAL);
    let mut discovering = false;
    let mut chosen_peer: Option<PeerDevice> = None;
    let mut awaiting_confirmation = false;
    let mut ending = false;
    let mut outcome: Option<bool> = None;

    loop {
        tokio::select! {
            event = rx_event.recv() => {
                let Some(event) = event else { break };
                match event {
                    AppEvent::Status(text) => println!("{}", text),
                    AppEvent::Error(text) => eprintln!("Error: {}", text),
                    AppEvent::LocalDeviceAvailable(device) => {
                        println!("This device: {}", device.display_name);
                        let _ = tx_cmd.send(AppCommand::DiscoverPeers).await;
                        // Receivers answer announcements; only the sender keeps looking
                        discovering = is_sender;
                    }
                    AppEvent::PeersAvailable(peers) => {
                        for peer in &peers {
                            println!("  {} [{}]", peer.display_name, peer.status);
                        }
                        if is_sender && chosen_peer.is_none() {
                            if let Some(peer) = pick_peer(&peers, options.peer_name.as_deref()) {
                                chosen_peer = Some(peer.clone());
                                discovering = false;
                                let _ = tx_cmd.send(AppCommand::SendToDevice(peer.clone())).await;
                            }
                        }
                    }
                    AppEvent::RequestTransferConfirmation { peer } => {
                        if options.auto_confirm {
                            let _ = tx_cmd.send(AppCommand::ConfirmTransfer { accepted: true }).await;
                        } else {
                            println!("Send files to {}? [y/N]", peer.display_name);
                            awaiting_confirmation = true;
                        }
                    }
                    AppEvent::FilesForTransferAvailable(items) => {
                        println!("Receiving {} file(s):", items.len());
                        for item in &items {
                            println!("  {}", item.file_name);
                        }
                    }
                    AppEvent::FileStatusChanged { index, file_name, status } => {
                        println!("[{}] {}: {}", index + 1, file_name, status);
                    }
                    AppEvent::ConnectionLost => println!("Connection lost"),
                    AppEvent::HandshakeFailed => {
                        eprintln!("Handshake failed, no files were transferred");
                        outcome = Some(false);
                        end_session(&tx_cmd, &mut ending).await;
                    }
                    AppEvent::TransferComplete { success } => {
                        outcome = Some(success);
                        end_session(&tx_cmd, &mut ending).await;
                    }
                    AppEvent::SessionTerminated { reason } => {
                        eprintln!("Session ended: {}", reason);
                        outcome.get_or_insert(false);
                    }
                }
            }
            line = stdin.next_line(), if awaiting_confirmation => {
                awaiting_confirmation = false;
                let accepted = matches!(line, Ok(Some(answer)) if answer.trim().eq_ignore_ascii_case("y"));
                if !accepted {
                    // Let the next peer list offer this device again
                    chosen_peer = None;
                    discovering = true;
                }
                let _ = tx_cmd.send(AppCommand::ConfirmTransfer { accepted }).await;
            }
            _ = discovery.tick(), if discovering && !ending => {
                let _ = tx_cmd.send(AppCommand::DiscoverPeers).await;
            }
            _ = tokio::signal::ctrl_c(), if !ending => {
                println!("Stopping...");
                end_session(&tx_cmd, &mut ending).await;
            }
        }
    }

    if let Err(e) = backend.await {
        bail!("Session task failed: {}", e);
    }

    match outcome {
        Some(false) => bail!("Transfer did not complete"),
        _ => Ok(()),
    }
}

/// The requested device by name, or the first available one.
fn pick_peer<'a>(peers: &'a [PeerDevice], name: Option<&str>) -> Option<&'a PeerDevice> {
    match name {
        Some(name) => peers.iter().find(|p| p.display_name == name),
        None => peers.iter().find(|p| p.status == DeviceStatus::Available),
    }
}

async fn end_session(tx_cmd: &mpsc::Sender<AppCommand>, ending: &mut bool) {
    if !*ending {
        *ending = true;
        let _ = tx_cmd.send(AppCommand::EndSession).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(name: &str, status: DeviceStatus) -> PeerDevice {
        PeerDevice {
            address: format!("{}-id", name),
            display_name: name.to_string(),
            status,
        }
    }

    #[test]
    fn test_pick_peer_by_name_or_first_available() {
        let peers = vec![
            peer("phone", DeviceStatus::Connected),
            peer("tablet", DeviceStatus::Available),
        ];

        assert_eq!(pick_peer(&peers, Some("phone")), Some(&peers[0]));
        assert_eq!(pick_peer(&peers, None), Some(&peers[1]));
        assert_eq!(pick_peer(&peers, Some("laptop")), None);
    }
}
