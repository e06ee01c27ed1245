//! Upload consumer: encrypts request payloads and drives them through the
//! host transport.
//!
//! Several consumers run concurrently against the same request queue.
//! Failure handling is per-request: optimistic progress is rolled back,
//! and the request is retried, requeued, or stashed depending on the
//! error class.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use fraglift_crypto::{CryptoError, Secrets, encrypt};
use fraglift_host::{HostError, HostTransport, ProgressFn};
use fraglift_protocol::EncryptionMethod;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::queue::BoundedQueue;
use crate::runtime::{RequestMeta, UploadRuntime};
use crate::state::{FileEvent, UploadStatus};
use crate::stash::SessionStashes;
use crate::types::{AttachmentPayload, CompletedUpload, UploadRequest};

const SERVER_RETRY_ATTEMPTS: u32 = 3;
const SERVER_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Swappable cancellation source for in-flight transfers.
///
/// Pausing cancels the current token and installs a fresh one, so
/// transfers started after resume are unaffected.
#[derive(Clone, Default)]
pub struct InflightCancel {
    inner: Arc<Mutex<CancellationToken>>,
}

impl InflightCancel {
    fn lock(&self) -> std::sync::MutexGuard<'_, CancellationToken> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Child token tied to the current generation of transfers.
    pub fn child(&self) -> CancellationToken {
        self.lock().child_token()
    }

    /// Cancels everything in flight and starts a new generation.
    pub fn cancel_and_reset(&self) {
        let mut guard = self.lock();
        guard.cancel();
        *guard = CancellationToken::new();
    }
}

pub struct UploadConsumer {
    runtime: UploadRuntime,
    transport: Arc<dyn HostTransport>,
    request_queue: BoundedQueue<UploadRequest>,
    completed_queue: BoundedQueue<CompletedUpload>,
    stashes: Arc<SessionStashes>,
    attachment_name: String,
    inflight: InflightCancel,
    stop: CancellationToken,
}

impl UploadConsumer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runtime: UploadRuntime,
        transport: Arc<dyn HostTransport>,
        request_queue: BoundedQueue<UploadRequest>,
        completed_queue: BoundedQueue<CompletedUpload>,
        stashes: Arc<SessionStashes>,
        attachment_name: String,
        inflight: InflightCancel,
        stop: CancellationToken,
    ) -> Self {
        Self {
            runtime,
            transport,
            request_queue,
            completed_queue,
            stashes,
            attachment_name,
            inflight,
            stop,
        }
    }

    pub async fn run(self) {
        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = self.runtime.wait_until_uploading() => {}
            }
            let request = tokio::select! {
                _ = self.stop.cancelled() => break,
                taken = self.request_queue.take() => match taken {
                    Some(request) => request,
                    None => break,
                },
            };
            if self.process(request).await.is_err() {
                debug!("downstream queue closed, upload consumer stopping");
                return;
            }
        }
        debug!("upload consumer finished");
    }

    async fn process(&self, request: UploadRequest) -> Result<(), crate::queue::QueueClosed> {
        let meta = RequestMeta::from(&request);
        for file_id in &meta.files {
            self.runtime.set_file_status(*file_id, UploadStatus::Uploading);
        }

        let parts = match self.encrypt_parts(&request).await {
            Ok(parts) => parts,
            Err(err) => {
                warn!(request = %request.id, %err, "payload encryption failed");
                self.fail_request(&meta, request, err.to_string());
                return Ok(());
            }
        };

        let mut server_attempts = 0u32;
        loop {
            let cancel = self.inflight.child();
            let progress: ProgressFn = {
                let runtime = self.runtime.clone();
                let meta = meta.clone();
                Arc::new(move |cumulative| runtime.on_request_progress(&meta, cumulative))
            };

            let result = self
                .transport
                .upload(parts.clone(), &self.attachment_name, progress, cancel.clone())
                .await;

            match result {
                Ok(message) => {
                    self.runtime.finish_request(&meta);
                    return self
                        .completed_queue
                        .put(CompletedUpload { request, message })
                        .await;
                }
                Err(HostError::Cancelled) => {
                    // Pause or shutdown; the request goes back untouched.
                    self.runtime.rollback_request(&meta);
                    return self.requeue(request).await;
                }
                Err(HostError::Connectivity(reason)) => {
                    debug!(request = %request.id, reason = %reason, "host unreachable");
                    self.runtime.rollback_request(&meta);
                    self.runtime
                        .set_status(crate::events::SessionStatus::NoConnectivity);
                    return self.requeue(request).await;
                }
                Err(HostError::RateLimited { retry_after }) => {
                    debug!(
                        request = %request.id,
                        wait_ms = retry_after.as_millis() as u64,
                        "rate limited"
                    );
                    // Pause and shutdown both cut the wait short; the
                    // request goes back for a later attempt.
                    tokio::select! {
                        _ = self.stop.cancelled() => {
                            self.runtime.rollback_request(&meta);
                            return self.requeue(request).await;
                        }
                        _ = cancel.cancelled() => {
                            self.runtime.rollback_request(&meta);
                            return self.requeue(request).await;
                        }
                        _ = tokio::time::sleep(retry_after) => {}
                    }
                    // Same attachment set, fresh attempt; cumulative
                    // progress bookkeeping carries over.
                }
                Err(err @ HostError::Server { .. }) => {
                    server_attempts += 1;
                    if server_attempts < SERVER_RETRY_ATTEMPTS {
                        warn!(request = %request.id, %err, attempt = server_attempts, "host error, retrying");
                        tokio::select! {
                            _ = self.stop.cancelled() => {
                                self.runtime.rollback_request(&meta);
                                return self.requeue(request).await;
                            }
                            _ = cancel.cancelled() => {
                                self.runtime.rollback_request(&meta);
                                return self.requeue(request).await;
                            }
                            _ = tokio::time::sleep(SERVER_RETRY_DELAY) => {}
                        }
                        continue;
                    }
                    warn!(request = %request.id, %err, "host error, giving up");
                    self.fail_request(&meta, request, err.to_string());
                    return Ok(());
                }
                Err(HostError::Gone { status }) => {
                    warn!(request = %request.id, status, "upload target gone");
                    self.runtime.rollback_request(&meta);
                    for file_id in &meta.files {
                        self.runtime.set_file_status(*file_id, UploadStatus::FileGone);
                    }
                    self.stashes.push_failed_request(request);
                    return Ok(());
                }
                Err(err) => {
                    warn!(request = %request.id, %err, "upload rejected");
                    self.fail_request(&meta, request, err.to_string());
                    return Ok(());
                }
            }
        }
    }

    /// Encrypts every attachment of the request on a blocking thread.
    /// Fragments use the owning file's secrets seeked to their byte
    /// offset; thumbnails and subtitles carry their own secrets.
    async fn encrypt_parts(&self, request: &UploadRequest) -> Result<Vec<Bytes>, PipelineError> {
        let mut jobs: Vec<(Bytes, EncryptionMethod, Option<Secrets>, u64)> =
            Vec::with_capacity(request.attachments.len());
        for attachment in &request.attachments {
            let state = self.runtime.file(attachment.file_id);
            let method = state
                .as_ref()
                .map(|s| s.encryption_method)
                .unwrap_or_default();
            let (secrets, offset) = match &attachment.payload {
                AttachmentPayload::Fragment { offset, .. } => {
                    (state.and_then(|s| s.secrets), *offset)
                }
                _ => (attachment.secrets.clone(), 0),
            };
            jobs.push((attachment.bytes.clone(), method, secrets, offset));
        }

        let encrypted = tokio::task::spawn_blocking(move || {
            jobs.into_iter()
                .map(|(bytes, method, secrets, offset)| {
                    encrypt(bytes.to_vec(), method, secrets.as_ref(), offset).map(Bytes::from)
                })
                .collect::<Result<Vec<Bytes>, CryptoError>>()
        })
        .await
        .map_err(std::io::Error::other)??;
        Ok(encrypted)
    }

    fn fail_request(&self, meta: &RequestMeta, request: UploadRequest, message: String) {
        self.runtime.rollback_request(meta);
        for file_id in &meta.files {
            self.runtime
                .set_file_status(*file_id, UploadStatus::UploadFailed);
            self.runtime.apply(
                *file_id,
                FileEvent::ErrorSet {
                    message: message.clone(),
                },
            );
        }
        self.stashes.push_failed_request(request);
    }

    /// Returns a request to the queue for a later attempt; requests that
    /// find the queue closed go to the failed stash instead of being lost.
    async fn requeue(&self, request: UploadRequest) -> Result<(), crate::queue::QueueClosed> {
        if self.request_queue.put(request.clone()).await.is_err() {
            self.stashes.push_failed_request(request);
        }
        Ok(())
    }
}
