//! Holding areas for work awaiting a manual retry.

use std::sync::{Mutex, MutexGuard};

use fraglift_protocol::FileRecord;
use uuid::Uuid;

use crate::types::{QueuedFile, UploadRequest};

/// Failed work parked until the user retries it. Shared by the stages
/// that park and the session that re-injects.
#[derive(Default)]
pub struct SessionStashes {
    /// Requests that failed terminally (including requests referencing
    /// gone files).
    failed_requests: Mutex<Vec<UploadRequest>>,
    /// Files whose source bytes vanished during production.
    gone_files: Mutex<Vec<QueuedFile>>,
    /// Records the backend refused to persist.
    failed_records: Mutex<Vec<FileRecord>>,
}

impl SessionStashes {
    fn lock<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push_failed_request(&self, request: UploadRequest) {
        Self::lock(&self.failed_requests).push(request);
    }

    /// Removes and returns every stashed request.
    pub fn drain_failed_requests(&self) -> Vec<UploadRequest> {
        Self::lock(&self.failed_requests).drain(..).collect()
    }

    /// Removes and returns the stashed requests referencing `file_id`.
    pub fn take_requests_for_file(&self, file_id: Uuid) -> Vec<UploadRequest> {
        let mut stash = Self::lock(&self.failed_requests);
        let (matching, rest): (Vec<_>, Vec<_>) = stash
            .drain(..)
            .partition(|r| r.attachments.iter().any(|a| a.file_id == file_id));
        *stash = rest;
        matching
    }

    pub fn push_gone_file(&self, file: QueuedFile) {
        Self::lock(&self.gone_files).push(file);
    }

    pub fn take_gone_file(&self, file_id: Uuid) -> Option<QueuedFile> {
        let mut stash = Self::lock(&self.gone_files);
        let index = stash.iter().position(|f| f.file_id == file_id)?;
        Some(stash.remove(index))
    }

    pub fn push_failed_record(&self, record: FileRecord) {
        Self::lock(&self.failed_records).push(record);
    }

    pub fn drain_failed_records(&self) -> Vec<FileRecord> {
        Self::lock(&self.failed_records).drain(..).collect()
    }
}
