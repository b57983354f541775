use crate::transfer::status::TransferStatusModel;
use crate::FileItem;
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferRole {
    Sender,
    Receiver,
}

impl TransferRole {
    pub fn is_sender(self) -> bool {
        self == TransferRole::Sender
    }
}

/// One discovery-to-completion lifecycle.
///
/// The session owns the file list. It is moved into the handshake/transfer
/// pipeline while that runs and handed back when the pipeline finishes, so
/// exactly one task mutates the list at any time.
#[derive(Debug)]
pub struct TransferSession {
    pub role: TransferRole,
    pub is_group_owner: bool,
    pub peer_address: Option<IpAddr>,
    pub files: TransferStatusModel,
}

impl TransferSession {
    /// The device with files to send is the sender; an empty list makes a receiver.
    pub fn new(files_for_transfer: Vec<PathBuf>) -> Self {
        let role = if files_for_transfer.is_empty() {
            TransferRole::Receiver
        } else {
            TransferRole::Sender
        };
        let items = files_for_transfer
            .into_iter()
            .map(FileItem::from_path)
            .collect();

        let mut files = TransferStatusModel::new(items);
        files.reset_all();

        Self {
            role,
            is_group_owner: false,
            peer_address: None,
            files,
        }
    }

    pub fn is_file_sender(&self) -> bool {
        self.role.is_sender()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FileStatus;

    #[test]
    fn test_role_follows_files_for_transfer() {
        let sender = TransferSession::new(vec![PathBuf::from("/data/wiki.zim")]);
        assert_eq!(sender.role, TransferRole::Sender);
        assert_eq!(sender.files.items()[0].file_name, "wiki.zim");
        assert_eq!(sender.files.items()[0].status, FileStatus::ToBeSent);

        let receiver = TransferSession::new(Vec::new());
        assert_eq!(receiver.role, TransferRole::Receiver);
        assert!(receiver.files.is_empty());
        assert!(receiver.peer_address.is_none());
    }
}
