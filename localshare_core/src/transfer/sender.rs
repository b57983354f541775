use crate::AppEvent;
use crate::FileStatus;
use crate::config::TransferSettings;
use crate::transfer::status::TransferStatusModel;
use anyhow::{Context, Result, anyhow};
use std::net::SocketAddr;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::constants::BUFFER_SIZE;
use super::handshake::connect_before_deadline;
use super::utils::{abort_on_close, change_status};

/// Send every file in `files`, in order, each over its own connection to `target`.
///
/// A failed file is marked `Error` and the batch carries on with the next
/// one. Returns `true` only if every file was sent.
pub async fn send_files(
    target: SocketAddr,
    files: &mut TransferStatusModel,
    settings: &TransferSettings,
    event_tx: &mpsc::Sender<AppEvent>,
) -> bool {
    if files.is_empty() {
        return true;
    }

    let _ = event_tx
        .send(AppEvent::Status("Preparing files...".to_string()))
        .await;
    // Give a slower receiver time to open its data socket
    tokio::time::sleep(settings.warmup_delay).await;

    info!("Starting file transfer to {} ({} files)", target, files.len());
    let mut is_transfer_error_free = true;

    for index in 0..files.len() {
        change_status(files, index, FileStatus::Sending, event_tx).await;

        let source = files.get(index).and_then(|item| item.file_path.clone());
        let result = match source {
            Some(path) => send_single_file(target, &path, settings).await,
            None => Err(anyhow!("No readable content for file {}", index)),
        };

        match result {
            Ok(bytes) => {
                debug!("Sender: {} bytes written for file {}", bytes, index);
                change_status(files, index, FileStatus::Sent, event_tx).await;
            }
            Err(e) => {
                error!("Error sending file {}: {:#}", index, e);
                is_transfer_error_free = false;
                change_status(files, index, FileStatus::Error, event_tx).await;
            }
        }
    }

    is_transfer_error_free
}

/// Stream one file over a fresh data connection.
async fn send_single_file(
    target: SocketAddr,
    file_path: &Path,
    settings: &TransferSettings,
) -> Result<u64> {
    let mut socket = connect_before_deadline(target, settings.connect_timeout).await?;
    debug!("Sender socket connected to {}", target);

    let result = stream_file(&mut socket, file_path).await;
    if result.is_err() {
        // The receiver already accepted this connection for the current
        // index; reset it so that index fails there too.
        if let Err(e) = abort_on_close(&socket) {
            warn!("Cannot reset data connection to {}: {}", target, e);
        }
    }
    result
}

async fn stream_file(socket: &mut TcpStream, file_path: &Path) -> Result<u64> {
    let file = File::open(file_path)
        .await
        .with_context(|| format!("Failed to open {}", file_path.display()))?;

    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
    let bytes = tokio::io::copy_buf(&mut reader, socket)
        .await
        .with_context(|| format!("Failed to stream {}", file_path.display()))?;
    socket.shutdown().await?;
    Ok(bytes)
}
