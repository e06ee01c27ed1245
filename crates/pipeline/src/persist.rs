//! Persistence consumer: batches completed file records to the backend.
//!
//! Records are buffered and written in bulk. A flush happens when the
//! buffer passes a record-count or byte threshold, when every active file
//! is complete, or when the pipeline drains. Repeated backend failures
//! trip a circuit breaker that pauses the whole session.

use std::collections::HashMap;
use std::sync::Arc;

use fraglift_host::{BackendApi, HostError};
use fraglift_protocol::{CreateFileBatch, FileRecord};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::SessionStatus;
use crate::queue::BoundedQueue;
use crate::runtime::UploadRuntime;
use crate::stash::SessionStashes;
use crate::state::{FileEvent, UploadStatus};

const MAX_BUFFERED_RECORDS: usize = 20;
const MAX_BUFFERED_BYTES: u64 = 100 * 1024 * 1024;
const DATABASE_ERROR_LIMIT: u32 = 2;

pub struct PersistConsumer {
    runtime: UploadRuntime,
    backend: Arc<dyn BackendApi>,
    persist_queue: BoundedQueue<FileRecord>,
    stashes: Arc<SessionStashes>,
    resource_passwords: HashMap<String, String>,
    /// Poked by the session on resume so buffered records retry without
    /// waiting for new input.
    flush_nudge: Arc<Notify>,
    /// Session shutdown; stops the connectivity wait from outliving the
    /// pipeline.
    shutdown: CancellationToken,

    buffer: Vec<FileRecord>,
    database_errors: u32,
}

impl PersistConsumer {
    pub fn new(
        runtime: UploadRuntime,
        backend: Arc<dyn BackendApi>,
        persist_queue: BoundedQueue<FileRecord>,
        stashes: Arc<SessionStashes>,
        resource_passwords: HashMap<String, String>,
        flush_nudge: Arc<Notify>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            runtime,
            backend,
            persist_queue,
            stashes,
            resource_passwords,
            flush_nudge,
            shutdown,
            buffer: Vec::new(),
            database_errors: 0,
        }
    }

    pub async fn run(mut self) {
        loop {
            self.wait_for_connectivity().await;

            let step = tokio::select! {
                taken = self.persist_queue.take() => Some(taken),
                _ = self.flush_nudge.notified() => None,
            };
            match step {
                Some(Some(record)) => {
                    self.buffer.push(record);
                    if self.should_flush() {
                        self.flush().await;
                    }
                }
                // Queue closed and drained.
                Some(None) => break,
                // Nudged: retry whatever is buffered.
                None => self.flush().await,
            }
        }

        self.flush().await;
        debug!("persist consumer finished");
    }

    async fn wait_for_connectivity(&self) {
        let wait = async {
            let mut rx = self.runtime.watch_status();
            while *rx.borrow_and_update() == SessionStatus::NoConnectivity {
                if rx.changed().await.is_err() {
                    return;
                }
            }
        };
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = wait => {}
        }
    }

    fn should_flush(&self) -> bool {
        let buffered_bytes: u64 = self.buffer.iter().map(|r| r.size).sum();
        self.buffer.len() > MAX_BUFFERED_RECORDS
            || buffered_bytes > MAX_BUFFERED_BYTES
            || self.runtime.all_active_complete()
    }

    async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let batch = CreateFileBatch {
            files: std::mem::take(&mut self.buffer),
            resource_passwords: self.resource_passwords.clone(),
        };

        match self.backend.create_files(&batch).await {
            Ok(()) => {
                info!(files = batch.files.len(), "file records persisted");
                for record in &batch.files {
                    self.runtime
                        .set_file_status(record.file_id, UploadStatus::Saved);
                    self.runtime.mark_file_saved(record.file_id);
                }
                self.database_errors = self.database_errors.saturating_sub(1);
            }
            Err(HostError::Connectivity(reason)) => {
                warn!(reason = %reason, "backend unreachable, records held");
                self.buffer = batch.files;
                self.runtime.set_status(SessionStatus::NoConnectivity);
            }
            Err(err @ (HostError::Server { .. } | HostError::RateLimited { .. })) => {
                self.buffer = batch.files;
                self.database_errors += 1;
                warn!(%err, errors = self.database_errors, "record persistence failed");
                if self.database_errors > DATABASE_ERROR_LIMIT {
                    self.runtime.trip_breaker();
                    self.database_errors = 0;
                }
            }
            Err(err) => {
                warn!(%err, files = batch.files.len(), "records rejected by backend");
                for record in batch.files {
                    self.runtime
                        .set_file_status(record.file_id, UploadStatus::SaveFailed);
                    self.runtime.apply(
                        record.file_id,
                        FileEvent::ErrorSet {
                            message: err.to_string(),
                        },
                    );
                    self.stashes.push_failed_record(record);
                }
            }
        }
    }
}
