use crate::{FileItem, FileStatus, StatusError};

/// Ordered file list of a session together with each item's status.
///
/// Shape (count and order) is fixed once the list is built; only statuses
/// change, along `ToBeSent -> Sending -> Sent | Error`. An item that fails
/// before its transfer could start may go straight from `ToBeSent` to `Error`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferStatusModel {
    items: Vec<FileItem>,
}

impl TransferStatusModel {
    pub fn new(items: Vec<FileItem>) -> Self {
        Self { items }
    }

    /// Receiver side: build the list from the manifest, keeping its order.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            items: names.into_iter().map(FileItem::expected).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[FileItem] {
        &self.items
    }

    pub fn get(&self, index: usize) -> Option<&FileItem> {
        self.items.get(index)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.file_name.as_str())
    }

    /// Read-only copy for the UI.
    pub fn snapshot(&self) -> Vec<FileItem> {
        self.items.clone()
    }

    pub fn set_status(&mut self, index: usize, status: FileStatus) -> Result<(), StatusError> {
        let len = self.items.len();
        let item = self
            .items
            .get_mut(index)
            .ok_or(StatusError::OutOfRange { index, len })?;

        let allowed = matches!(
            (item.status, status),
            (FileStatus::ToBeSent, FileStatus::Sending)
                | (FileStatus::ToBeSent, FileStatus::Error)
                | (FileStatus::Sending, FileStatus::Sent)
                | (FileStatus::Sending, FileStatus::Error)
        );
        if !allowed {
            return Err(StatusError::IllegalTransition {
                index,
                from: item.status,
                to: status,
            });
        }

        item.status = status;
        Ok(())
    }

    /// Only used when a brand-new session starts.
    pub fn reset_all(&mut self) {
        for item in &mut self.items {
            item.status = FileStatus::ToBeSent;
        }
    }

    pub fn all_sent(&self) -> bool {
        self.items.iter().all(|item| item.status == FileStatus::Sent)
    }

    pub fn count_with(&self, status: FileStatus) -> usize {
        self.items.iter().filter(|item| item.status == status).count()
    }
}
