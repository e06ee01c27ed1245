//! Attachment reference batcher.
//!
//! References come in as uploads complete, but the backend only accepts
//! them for files it already knows about. So references are held per file
//! until that file's record is confirmed saved, then released into
//! per-kind buffers and registered in fixed-size batches. Registration is
//! a secondary bookkeeping path: failures are logged, never retried, and
//! never affect upload state.

use std::collections::HashMap;
use std::sync::Arc;

use fraglift_host::BackendApi;
use fraglift_protocol::{AttachmentReference, AttachmentReferenceKind, RegisterAttachmentsBatch};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::events::PipelineEvent;
use crate::queue::BoundedQueue;
use crate::runtime::UploadRuntime;

const REGISTRATION_BATCH_SIZE: usize = 50;

pub struct AttachmentBatcher {
    backend: Arc<dyn BackendApi>,
    reference_queue: BoundedQueue<AttachmentReference>,
    events: broadcast::Receiver<PipelineEvent>,

    /// References whose file is not yet saved.
    pending: HashMap<Uuid, Vec<AttachmentReference>>,
    /// Released references awaiting registration, by kind.
    ready: HashMap<AttachmentReferenceKind, Vec<AttachmentReference>>,
}

impl AttachmentBatcher {
    pub fn new(
        runtime: &UploadRuntime,
        backend: Arc<dyn BackendApi>,
        reference_queue: BoundedQueue<AttachmentReference>,
    ) -> Self {
        Self {
            backend,
            reference_queue,
            events: runtime.subscribe(),
            pending: HashMap::new(),
            ready: HashMap::new(),
        }
    }

    pub async fn run(mut self) {
        enum Step {
            Reference(Option<AttachmentReference>),
            Event(Result<PipelineEvent, broadcast::error::RecvError>),
        }

        loop {
            let step = tokio::select! {
                taken = self.reference_queue.take() => Step::Reference(taken),
                event = self.events.recv() => Step::Event(event),
            };
            match step {
                Step::Reference(Some(reference)) => {
                    self.pending
                        .entry(reference.file_id)
                        .or_default()
                        .push(reference);
                }
                Step::Reference(None) => break,
                Step::Event(Ok(PipelineEvent::FileSaved { file_id })) => {
                    self.release(file_id);
                    self.flush_full().await;
                }
                Step::Event(Ok(_)) => {}
                Step::Event(Err(broadcast::error::RecvError::Lagged(missed))) => {
                    warn!(missed, "attachment batcher lagged behind the event stream");
                }
                Step::Event(Err(broadcast::error::RecvError::Closed)) => break,
            }
        }

        // Save confirmations that raced with queue shutdown.
        loop {
            match self.events.try_recv() {
                Ok(PipelineEvent::FileSaved { file_id }) => self.release(file_id),
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => break,
            }
        }

        // Drain: whatever was released gets registered; references of
        // files that never saved are dropped with their files.
        self.flush_all().await;
        debug!("attachment batcher finished");
    }

    /// Moves a saved file's references into the ready buffers.
    fn release(&mut self, file_id: Uuid) {
        let Some(references) = self.pending.remove(&file_id) else {
            return;
        };
        for reference in references {
            self.ready.entry(reference.kind).or_default().push(reference);
        }
    }

    async fn flush_full(&mut self) {
        let kinds: Vec<AttachmentReferenceKind> = self
            .ready
            .iter()
            .filter(|(_, refs)| refs.len() >= REGISTRATION_BATCH_SIZE)
            .map(|(kind, _)| *kind)
            .collect();
        for kind in kinds {
            while self
                .ready
                .get(&kind)
                .is_some_and(|refs| refs.len() >= REGISTRATION_BATCH_SIZE)
            {
                let batch: Vec<AttachmentReference> = self
                    .ready
                    .get_mut(&kind)
                    .map(|refs| refs.drain(..REGISTRATION_BATCH_SIZE).collect())
                    .unwrap_or_default();
                self.register(kind, batch).await;
            }
        }
    }

    async fn flush_all(&mut self) {
        let ready = std::mem::take(&mut self.ready);
        for (kind, references) in ready {
            for chunk in references.chunks(REGISTRATION_BATCH_SIZE) {
                self.register(kind, chunk.to_vec()).await;
            }
        }
    }

    async fn register(&self, kind: AttachmentReferenceKind, attachments: Vec<AttachmentReference>) {
        if attachments.is_empty() {
            return;
        }
        let count = attachments.len();
        if let Err(err) = self
            .backend
            .register_attachments(&RegisterAttachmentsBatch { kind, attachments })
            .await
        {
            warn!(?kind, count, %err, "attachment registration failed");
        } else {
            debug!(?kind, count, "attachments registered");
        }
    }
}
