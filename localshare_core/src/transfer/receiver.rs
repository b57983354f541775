use crate::AppEvent;
use crate::FileStatus;
use crate::transfer::status::TransferStatusModel;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::constants::BUFFER_SIZE;
use super::utils::{change_status, destination_path};

/// Accept one connection per expected file, in manifest order, and store
/// each under `storage_root`.
///
/// Failures are isolated to their file; the loop always runs to the end of
/// the list. Returns `true` only if every file was received.
pub async fn receive_files(
    listener: TcpListener,
    files: &mut TransferStatusModel,
    storage_root: &Path,
    event_tx: &mpsc::Sender<AppEvent>,
) -> bool {
    if files.is_empty() {
        return true;
    }

    if let Ok(addr) = listener.local_addr() {
        info!("Receiver: data socket opened at {} ({} files)", addr, files.len());
    }
    let mut all_files_received = true;
    let mut written: HashSet<PathBuf> = HashSet::new();

    for index in 0..files.len() {
        let stream = match listener.accept().await {
            Ok((stream, remote_addr)) => {
                debug!("Receiver: client {} connected for file {}", remote_addr, index);
                stream
            }
            Err(e) => {
                error!("Failed to accept data connection for file {}: {}", index, e);
                all_files_received = false;
                change_status(files, index, FileStatus::Error, event_tx).await;
                continue;
            }
        };

        change_status(files, index, FileStatus::Sending, event_tx).await;

        let file_name = files
            .get(index)
            .map(|item| item.file_name.clone())
            .unwrap_or_default();
        let file_path = destination_path(storage_root, &file_name);
        if !written.insert(file_path.clone()) {
            warn!(
                "{} resolves to {}, already written in this session; overwriting",
                file_name,
                file_path.display()
            );
        }

        match receive_single_file(stream, &file_path).await {
            Ok(bytes) => {
                debug!("Receiver: {} bytes stored for {}", bytes, file_name);
                change_status(files, index, FileStatus::Sent, event_tx).await;
            }
            Err(e) => {
                error!("Error receiving {}: {:#}", file_name, e);
                all_files_received = false;
                change_status(files, index, FileStatus::Error, event_tx).await;
            }
        }
    }

    all_files_received
}

/// Copy one inbound connection into a freshly created file.
async fn receive_single_file(mut stream: TcpStream, file_path: &Path) -> Result<u64> {
    if let Some(parent) = file_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let file = File::create(file_path)
        .await
        .with_context(|| format!("Failed to create {}", file_path.display()))?;
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, file);

    let bytes = tokio::io::copy(&mut stream, &mut writer)
        .await
        .context("Connection failed while receiving")?;
    writer.flush().await?;
    Ok(bytes)
}
