use crate::transfer::constants::MAX_FILENAME_LENGTH;
use crate::transfer::status::TransferStatusModel;
use crate::{AppEvent, FileStatus};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

const FALLBACK_NAME: &str = "unknown_file";

const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Reduce a name received from a peer to a single safe path component.
pub fn sanitize_file_name(file_name: &str) -> String {
    // Last component only, whichever separator the peer used
    let last = file_name.rsplit(['/', '\\']).next().unwrap_or_default();
    let mut clean: String = last.chars().filter(|c| !c.is_control()).collect();

    if clean.trim().is_empty()
        || clean == "."
        || clean == ".."
        || RESERVED_NAMES.iter().any(|r| clean.eq_ignore_ascii_case(r))
    {
        return FALLBACK_NAME.to_string();
    }

    if clean.len() > MAX_FILENAME_LENGTH {
        let ext = clean
            .rfind('.')
            .map(|idx| clean[idx..].to_string())
            .filter(|ext| ext.len() < 20);
        let keep = MAX_FILENAME_LENGTH - ext.as_ref().map_or(0, String::len);
        let stem_end = ext.as_ref().map_or(clean.len(), |e| clean.len() - e.len());
        let mut cutoff = keep.min(stem_end);
        while !clean.is_char_boundary(cutoff) {
            cutoff -= 1;
        }
        clean.truncate(cutoff);
        if let Some(ext) = ext {
            clean.push_str(&ext);
        }
    }

    clean
}

/// Where a received file named `file_name` is written.
pub fn destination_path(storage_root: &Path, file_name: &str) -> PathBuf {
    storage_root.join(sanitize_file_name(file_name))
}

/// Make dropping `stream` reset the connection instead of closing it
/// cleanly, so the peer sees an error rather than an empty file.
pub fn abort_on_close(stream: &TcpStream) -> std::io::Result<()> {
    socket2::SockRef::from(stream).set_linger(Some(Duration::ZERO))
}

/// Record a status change and report it to the UI.
pub async fn change_status(
    files: &mut TransferStatusModel,
    index: usize,
    status: FileStatus,
    event_tx: &mpsc::Sender<AppEvent>,
) {
    if let Err(e) = files.set_status(index, status) {
        tracing::warn!("Ignoring status update: {}", e);
        return;
    }
    let file_name = files
        .get(index)
        .map(|item| item.file_name.clone())
        .unwrap_or_default();

    if status == FileStatus::Error {
        let _ = event_tx
            .send(AppEvent::Error(format!("Error transferring {}", file_name)))
            .await;
    }
    let _ = event_tx
        .send(AppEvent::FileStatusChanged {
            index,
            file_name,
            status,
        })
        .await;
}
