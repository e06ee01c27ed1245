//! Session orchestration: wires the stages together and owns their
//! lifecycle.
//!
//! A session is started once over a set of filesystem roots. The scanner
//! feeds the registrar, the registrar feeds the producer, the producer
//! feeds a pool of upload consumers, and completed uploads flow through
//! the response consumer into persistence. Pause, resume, connectivity
//! probing, and manual retries all act on the shared queues and runtime
//! rather than on stage internals.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use fraglift_host::{BackendApi, HostTransport};
use fraglift_protocol::{AttachmentReference, FileRecord};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::batcher::AttachmentBatcher;
use crate::config::SessionConfig;
use crate::consumer::{InflightCancel, UploadConsumer};
use crate::error::PipelineError;
use crate::events::{PipelineEvent, SessionSnapshot, SessionStatus};
use crate::persist::PersistConsumer;
use crate::producer::RequestProducer;
use crate::queue::BoundedQueue;
use crate::response::ResponseConsumer;
use crate::runtime::UploadRuntime;
use crate::scan::spawn_scanner;
use crate::stash::SessionStashes;
use crate::state::{FileState, UploadStatus};
use crate::types::{
    CompletedUpload, FsSource, QueuedFile, ThumbnailExtractor, UploadEntry, UploadRequest,
};

pub struct UploadSession {
    config: SessionConfig,
    runtime: UploadRuntime,
    transport: Arc<dyn HostTransport>,
    backend: Arc<dyn BackendApi>,
    thumbnails: Arc<dyn ThumbnailExtractor>,
    stashes: Arc<SessionStashes>,

    file_queue: BoundedQueue<QueuedFile>,
    request_queue: BoundedQueue<UploadRequest>,
    completed_queue: BoundedQueue<CompletedUpload>,
    persist_queue: BoundedQueue<FileRecord>,
    reference_queue: BoundedQueue<AttachmentReference>,

    inflight: InflightCancel,
    flush_nudge: Arc<Notify>,
    shutdown: CancellationToken,

    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    consumers: Mutex<Vec<(CancellationToken, JoinHandle<()>)>>,
}

impl UploadSession {
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn HostTransport>,
        backend: Arc<dyn BackendApi>,
        thumbnails: Arc<dyn ThumbnailExtractor>,
    ) -> Self {
        let file_queue = BoundedQueue::new(config.file_queue_capacity);
        let request_queue = BoundedQueue::new(config.request_queue_capacity);
        Self {
            runtime: UploadRuntime::new(),
            transport,
            backend,
            thumbnails,
            stashes: Arc::new(SessionStashes::default()),
            file_queue,
            request_queue,
            completed_queue: BoundedQueue::unbounded(),
            persist_queue: BoundedQueue::unbounded(),
            reference_queue: BoundedQueue::unbounded(),
            inflight: InflightCancel::default(),
            flush_nudge: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
            consumers: Mutex::new(Vec::new()),
            config,
        }
    }

    fn lock<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn runtime(&self) -> &UploadRuntime {
        &self.runtime
    }

    pub fn stashes(&self) -> &SessionStashes {
        &self.stashes
    }

    pub fn events(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.runtime.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        self.runtime.status()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.runtime.snapshot()
    }

    /// Starts the pipeline over the given filesystem roots. A session
    /// runs at most once.
    pub fn start(&self, roots: Vec<PathBuf>) -> Result<(), PipelineError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::AlreadyStarted);
        }
        info!(roots = roots.len(), "upload session starting");
        self.runtime.set_status(SessionStatus::Uploading);

        let scan_queue: BoundedQueue<Vec<UploadEntry>> = BoundedQueue::new(2);
        let (more_tx, more_rx) = mpsc::channel(1);
        let mut tasks = Self::lock(&self.tasks);

        tasks.push(spawn_scanner(
            roots,
            self.config.scan_batch_size,
            scan_queue.clone(),
            more_rx,
        ));
        tasks.push(tokio::spawn(registrar(
            self.runtime.clone(),
            scan_queue,
            self.file_queue.clone(),
            self.config.clone(),
        )));

        let producer = RequestProducer::new(
            self.runtime.clone(),
            self.backend.clone(),
            self.thumbnails.clone(),
            self.file_queue.clone(),
            self.request_queue.clone(),
            self.persist_queue.clone(),
            self.stashes.clone(),
            self.config.limits,
            self.config.encryption_method,
            more_tx,
        );
        tasks.push(tokio::spawn(producer.run()));

        let response = ResponseConsumer::new(
            self.runtime.clone(),
            self.completed_queue.clone(),
            self.persist_queue.clone(),
            self.reference_queue.clone(),
        );
        tasks.push(tokio::spawn(response.run()));

        let batcher = AttachmentBatcher::new(
            &self.runtime,
            self.backend.clone(),
            self.reference_queue.clone(),
        );
        tasks.push(tokio::spawn(batcher.run()));

        let persist = PersistConsumer::new(
            self.runtime.clone(),
            self.backend.clone(),
            self.persist_queue.clone(),
            self.stashes.clone(),
            self.config.resource_passwords.clone(),
            self.flush_nudge.clone(),
            self.shutdown.clone(),
        );
        tasks.push(tokio::spawn(persist.run()));

        tasks.push(tokio::spawn(probe_loop(
            self.runtime.clone(),
            self.backend.clone(),
            self.config.probe_interval,
            self.flush_nudge.clone(),
            self.shutdown.clone(),
        )));
        drop(tasks);

        self.set_concurrency(self.config.concurrency);
        Ok(())
    }

    /// Grows or shrinks the upload consumer pool to `target` workers.
    pub fn set_concurrency(&self, target: usize) {
        let mut pool = Self::lock(&self.consumers);
        pool.retain(|(_, handle)| !handle.is_finished());
        while pool.len() > target {
            if let Some((stop, _)) = pool.pop() {
                stop.cancel();
            }
        }
        while pool.len() < target {
            let stop = self.shutdown.child_token();
            let consumer = UploadConsumer::new(
                self.runtime.clone(),
                self.transport.clone(),
                self.request_queue.clone(),
                self.completed_queue.clone(),
                self.stashes.clone(),
                self.config.attachment_name.clone(),
                self.inflight.clone(),
                stop.clone(),
            );
            pool.push((stop, tokio::spawn(consumer.run())));
        }
        debug!(consumers = pool.len(), "consumer pool sized");
    }

    /// Pauses the session: in-flight transfers abort and their requests
    /// return to the queue; consumers idle until resume.
    pub fn pause(&self) {
        self.runtime.set_status(SessionStatus::Paused);
        self.inflight.cancel_and_reset();
    }

    /// Resumes a paused (or breaker-tripped, or offline) session and
    /// retries any held persistence records.
    pub fn resume(&self) {
        self.runtime.set_status(SessionStatus::Uploading);
        self.flush_nudge.notify_one();
    }

    /// Re-queues every terminally failed request.
    pub async fn retry_failed_requests(&self) {
        for request in self.stashes.drain_failed_requests() {
            for file_id in request.file_ids() {
                self.runtime.set_file_status(file_id, UploadStatus::Retrying);
            }
            if self.request_queue.put(request).await.is_err() {
                warn!("request queue closed, retry dropped");
                return;
            }
        }
    }

    /// Retries a file whose source vanished or whose upload target
    /// disappeared: stashed requests go back to the upload queue and the
    /// file itself resumes production from its recorded offset.
    pub async fn retry_gone_file(&self, file_id: Uuid) {
        self.runtime.set_file_status(file_id, UploadStatus::Retrying);
        for request in self.stashes.take_requests_for_file(file_id) {
            if self.request_queue.put(request).await.is_err() {
                warn!("request queue closed, retry dropped");
                return;
            }
        }
        if let Some(file) = self.stashes.take_gone_file(file_id)
            && self.file_queue.put(file).await.is_err()
        {
            warn!("file queue closed, retry dropped");
        }
    }

    /// Re-queues records the backend previously refused.
    pub async fn retry_failed_saves(&self) {
        for record in self.stashes.drain_failed_records() {
            self.runtime
                .set_file_status(record.file_id, UploadStatus::WaitingForSave);
            if self.persist_queue.put(record).await.is_err() {
                warn!("persist queue closed, retry dropped");
                return;
            }
        }
        self.flush_nudge.notify_one();
    }

    /// Stops everything: queues close in pipeline order so each stage
    /// drains what its predecessor already produced, then the stage tasks
    /// are joined.
    pub async fn shutdown(&self) {
        info!("upload session shutting down");
        self.file_queue.close();
        self.request_queue.close();
        self.completed_queue.close();
        self.persist_queue.close();
        self.reference_queue.close();
        self.inflight.cancel_and_reset();
        self.shutdown.cancel();

        let consumers = std::mem::take(&mut *Self::lock(&self.consumers));
        for (_, handle) in consumers {
            let _ = handle.await;
        }
        let tasks = std::mem::take(&mut *Self::lock(&self.tasks));
        for handle in tasks {
            let _ = handle.await;
        }
    }
}

/// Moves scanned entries into the pipeline: registers each file with the
/// runtime and hands it to the producer. Closes the producer's input once
/// the scan is exhausted.
async fn registrar(
    runtime: UploadRuntime,
    scan_queue: BoundedQueue<Vec<UploadEntry>>,
    file_queue: BoundedQueue<QueuedFile>,
    config: SessionConfig,
) {
    while let Some(batch) = scan_queue.take().await {
        runtime.set_pending_scan(batch.len());
        for entry in batch {
            let state = FileState::new(
                entry.name.clone(),
                entry.size,
                entry.relative_path.clone(),
                config.folder_context.clone(),
                config.encryption_method,
            );
            let file_id = state.id;
            runtime.register_file(state);

            let queued = QueuedFile {
                file_id,
                source: Arc::new(FsSource::new(entry.path.clone())),
                entry,
            };
            if file_queue.put(queued).await.is_err() {
                debug!("file queue closed, registrar stopping");
                return;
            }
        }
        runtime.set_pending_scan(0);
    }
    file_queue.close();
    debug!("registrar finished");
}

/// While the session is offline, probes the backend until it answers,
/// then resumes uploading.
async fn probe_loop(
    runtime: UploadRuntime,
    backend: Arc<dyn BackendApi>,
    interval: std::time::Duration,
    flush_nudge: Arc<Notify>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        if runtime.status() != SessionStatus::NoConnectivity {
            continue;
        }
        if backend.probe().await {
            info!("connectivity restored, resuming uploads");
            runtime.set_status(SessionStatus::Uploading);
            flush_nudge.notify_one();
        }
    }
}
