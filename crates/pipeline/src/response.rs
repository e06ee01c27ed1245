//! Response consumer: turns host messages into file records.
//!
//! Accumulates one [`FileRecord`] per file as its attachments come back
//! from the host, forwards lightweight references to the attachment
//! batcher, and hands the record to the persistence stage exactly once,
//! on the file's first transition to fully uploaded.

use std::collections::HashMap;

use fraglift_protocol::{
    AttachmentReference, AttachmentReferenceKind, FileRecord, FragmentDescriptor,
    SubtitleDescriptor, ThumbnailDescriptor,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::queue::BoundedQueue;
use crate::runtime::UploadRuntime;
use crate::state::{FileEvent, FileState, UploadStatus};
use crate::types::{AttachmentPayload, CompletedUpload};

/// Seeds a record from a file's current state. Descriptors are filled in
/// as host responses arrive; the empty-file shortcut persists the seed as
/// is.
pub(crate) fn new_record(state: &FileState) -> FileRecord {
    FileRecord {
        name: state.name.clone(),
        parent_id: state
            .folder_id
            .clone()
            .unwrap_or_else(|| state.folder_context.clone()),
        size: state.size,
        file_id: state.id,
        encryption_method: state.encryption_method,
        created_at: state.created_at,
        crc: state.crc,
        duration: state.duration,
        iv: state.secrets.as_ref().map(|s| s.iv.clone()),
        key: state.secrets.as_ref().map(|s| s.key.clone()),
        fragments: Vec::new(),
        thumbnail: None,
        subtitles: Vec::new(),
        video_metadata: None,
    }
}

pub struct ResponseConsumer {
    runtime: UploadRuntime,
    completed_queue: BoundedQueue<CompletedUpload>,
    persist_queue: BoundedQueue<FileRecord>,
    reference_queue: BoundedQueue<AttachmentReference>,

    /// Records under construction, keyed by file id.
    records: HashMap<Uuid, FileRecord>,
}

impl ResponseConsumer {
    pub fn new(
        runtime: UploadRuntime,
        completed_queue: BoundedQueue<CompletedUpload>,
        persist_queue: BoundedQueue<FileRecord>,
        reference_queue: BoundedQueue<AttachmentReference>,
    ) -> Self {
        Self {
            runtime,
            completed_queue,
            persist_queue,
            reference_queue,
            records: HashMap::new(),
        }
    }

    pub async fn run(mut self) {
        while let Some(completed) = self.completed_queue.take().await {
            if self.handle_completed(completed).await.is_err() {
                debug!("persist queue closed, response consumer stopping");
                return;
            }
        }
        debug!("response consumer finished");
    }

    async fn handle_completed(
        &mut self,
        completed: CompletedUpload,
    ) -> Result<(), crate::queue::QueueClosed> {
        let message = &completed.message;
        let request = &completed.request;

        if message.attachments.len() != request.attachments.len() {
            warn!(
                request = %request.id,
                sent = request.attachments.len(),
                received = message.attachments.len(),
                "host returned a different attachment count"
            );
        }

        for (attachment, host) in request.attachments.iter().zip(&message.attachments) {
            let file_id = attachment.file_id;
            let Some(state) = self.runtime.file(file_id) else {
                warn!(%file_id, "response for unknown file, dropped");
                continue;
            };
            let record = self
                .records
                .entry(file_id)
                .or_insert_with(|| new_record(&state));

            let size = attachment.bytes.len() as u64;
            let kind = match &attachment.payload {
                AttachmentPayload::Fragment {
                    sequence,
                    offset,
                    crc,
                } => {
                    record.fragments.push(FragmentDescriptor {
                        fragment_sequence: *sequence,
                        fragment_size: size,
                        offset: *offset,
                        crc: *crc,
                        channel_id: message.channel_id.clone(),
                        message_id: message.id.clone(),
                        attachment_id: host.id.clone(),
                        message_author_id: message.author.id.clone(),
                    });
                    self.runtime.apply(file_id, FileEvent::ChunkUploaded);
                    AttachmentReferenceKind::Fragment
                }
                AttachmentPayload::Thumbnail => {
                    record.thumbnail = Some(ThumbnailDescriptor {
                        size,
                        channel_id: message.channel_id.clone(),
                        message_id: message.id.clone(),
                        attachment_id: host.id.clone(),
                        message_author_id: message.author.id.clone(),
                        iv: attachment.secrets.as_ref().map(|s| s.iv.clone()),
                        key: attachment.secrets.as_ref().map(|s| s.key.clone()),
                    });
                    self.runtime.apply(file_id, FileEvent::ThumbnailUploaded);
                    AttachmentReferenceKind::Thumbnail
                }
                AttachmentPayload::Subtitle { name, forced } => {
                    record.subtitles.push(SubtitleDescriptor {
                        size,
                        language: name.clone(),
                        is_forced: *forced,
                        channel_id: message.channel_id.clone(),
                        message_id: message.id.clone(),
                        attachment_id: host.id.clone(),
                        message_author_id: message.author.id.clone(),
                        iv: attachment.secrets.as_ref().map(|s| s.iv.clone()),
                        key: attachment.secrets.as_ref().map(|s| s.key.clone()),
                    });
                    if state.subtitles_extracted
                        && record.subtitles.len() as u32 >= state.expected_subtitles
                    {
                        self.runtime.apply(file_id, FileEvent::SubtitlesUploaded);
                    }
                    AttachmentReferenceKind::Subtitle
                }
            };

            let _ = self
                .reference_queue
                .put(AttachmentReference {
                    file_id,
                    kind,
                    message_id: message.id.clone(),
                    attachment_id: host.id.clone(),
                })
                .await;
        }

        for file_id in request.file_ids() {
            self.finish_if_complete(file_id).await?;
        }
        Ok(())
    }

    /// First transition to fully uploaded: marks the file waiting for save
    /// and enqueues its record. Later re-evaluations are no-ops.
    async fn finish_if_complete(&mut self, file_id: Uuid) -> Result<(), crate::queue::QueueClosed> {
        let Some(state) = self.runtime.file(file_id) else {
            return Ok(());
        };
        if !state.is_fully_uploaded()
            || matches!(
                state.status,
                UploadStatus::Uploaded | UploadStatus::WaitingForSave | UploadStatus::Saved
            )
        {
            return Ok(());
        }
        self.runtime.set_file_status(file_id, UploadStatus::Uploaded);
        self.runtime
            .set_file_status(file_id, UploadStatus::WaitingForSave);

        let mut record = self
            .records
            .remove(&file_id)
            .unwrap_or_else(|| new_record(&state));
        // Fields that settled after the record was seeded.
        record.crc = state.crc;
        record.duration = state.duration;
        record.video_metadata = state.video_metadata.clone();
        record.iv = state.secrets.as_ref().map(|s| s.iv.clone());
        record.key = state.secrets.as_ref().map(|s| s.key.clone());
        // Concurrent upload consumers complete requests out of order.
        record.fragments.sort_by_key(|f| f.fragment_sequence);

        debug!(file = %record.name, fragments = record.fragments.len(), "record complete");
        self.persist_queue.put(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use fraglift_crypto::Secrets;
    use fraglift_protocol::{EncryptionMethod, HostAttachment, HostAuthor, HostMessage};
    use crate::types::{Attachment, UploadRequest};

    fn message(attachment_count: usize) -> HostMessage {
        HostMessage {
            id: "m1".into(),
            channel_id: "c1".into(),
            author: HostAuthor { id: "u1".into() },
            attachments: (0..attachment_count)
                .map(|i| HostAttachment {
                    id: format!("att{i}"),
                    filename: "blob".into(),
                    size: 0,
                })
                .collect(),
        }
    }

    fn fragment(file_id: Uuid, sequence: u32, offset: u64, len: usize) -> Attachment {
        Attachment {
            file_id,
            payload: AttachmentPayload::Fragment {
                sequence,
                offset,
                crc: 7,
            },
            bytes: Bytes::from(vec![0u8; len]),
            secrets: None,
        }
    }

    fn consumer(runtime: UploadRuntime) -> (ResponseConsumer, BoundedQueue<FileRecord>) {
        let persist = BoundedQueue::new(8);
        let consumer = ResponseConsumer::new(
            runtime,
            BoundedQueue::new(8),
            persist.clone(),
            BoundedQueue::new(64),
        );
        (consumer, persist)
    }

    fn registered_file(runtime: &UploadRuntime, size: u64) -> Uuid {
        let state = FileState::new("f.bin", size, "", "root", EncryptionMethod::NotEncrypted);
        let id = state.id;
        runtime.register_file(state.clone());
        id
    }

    #[tokio::test]
    async fn fragments_fill_the_record_and_complete_once() {
        let runtime = UploadRuntime::new();
        let file_id = registered_file(&runtime, 200);
        runtime.apply(file_id, FileEvent::TotalChunksSet { total: 2 });

        let (mut consumer, persist) = consumer(runtime.clone());
        let completed = CompletedUpload {
            request: UploadRequest {
                id: Uuid::new_v4(),
                total_size: 200,
                attachments: vec![
                    fragment(file_id, 2, 100, 100),
                    fragment(file_id, 1, 0, 100),
                ],
            },
            message: message(2),
        };
        consumer.handle_completed(completed).await.unwrap();

        let record = persist.take().await.unwrap();
        assert_eq!(record.file_id, file_id);
        assert_eq!(record.fragments.len(), 2);
        // Sorted by sequence regardless of arrival order.
        assert_eq!(record.fragments[0].fragment_sequence, 1);
        assert_eq!(record.fragments[0].attachment_id, "att1");
        assert_eq!(record.fragments[1].attachment_id, "att0");
        assert_eq!(
            runtime.file(file_id).unwrap().status,
            UploadStatus::WaitingForSave
        );

        // Re-evaluating the same completion does not enqueue again.
        consumer.finish_if_complete(file_id).await.unwrap();
        assert!(persist.is_empty());
    }

    #[tokio::test]
    async fn thumbnail_secrets_land_in_the_descriptor() {
        let runtime = UploadRuntime::new();
        let file_id = registered_file(&runtime, 100);
        runtime.apply(file_id, FileEvent::ThumbnailExtracted);
        runtime.apply(file_id, FileEvent::TotalChunksSet { total: 1 });

        let secrets = Secrets::generate(EncryptionMethod::ChaCha20).unwrap();
        let (mut consumer, persist) = consumer(runtime.clone());
        let thumbnail = Attachment {
            file_id,
            payload: AttachmentPayload::Thumbnail,
            bytes: Bytes::from_static(b"jpeg"),
            secrets: Some(secrets.clone()),
        };
        consumer
            .handle_completed(CompletedUpload {
                request: UploadRequest {
                    id: Uuid::new_v4(),
                    total_size: 164,
                    attachments: vec![thumbnail, fragment(file_id, 1, 0, 100)],
                },
                message: message(2),
            })
            .await
            .unwrap();

        let record = persist.take().await.unwrap();
        let descriptor = record.thumbnail.unwrap();
        assert_eq!(descriptor.iv.as_deref(), Some(secrets.iv.as_str()));
        assert_eq!(descriptor.key.as_deref(), Some(secrets.key.as_str()));
        assert_eq!(descriptor.attachment_id, "att0");
    }

    #[tokio::test]
    async fn subtitles_gate_completion_until_all_uploaded() {
        let runtime = UploadRuntime::new();
        let file_id = registered_file(&runtime, 100);
        runtime.apply(file_id, FileEvent::TotalChunksSet { total: 1 });
        runtime.apply(file_id, FileEvent::SubtitlesRequired { expected: 2 });
        runtime.apply(file_id, FileEvent::SubtitleExtracted);
        runtime.apply(file_id, FileEvent::SubtitleExtracted);
        runtime.apply(file_id, FileEvent::SubtitlesExtracted);

        let subtitle = |name: &str| Attachment {
            file_id,
            payload: AttachmentPayload::Subtitle {
                name: name.into(),
                forced: false,
            },
            bytes: Bytes::from_static(b"WEBVTT\n\n"),
            secrets: None,
        };

        let (mut consumer, persist) = consumer(runtime.clone());
        consumer
            .handle_completed(CompletedUpload {
                request: UploadRequest {
                    id: Uuid::new_v4(),
                    total_size: 164,
                    attachments: vec![fragment(file_id, 1, 0, 100), subtitle("eng")],
                },
                message: message(2),
            })
            .await
            .unwrap();
        // One of two subtitle tracks back: not complete yet.
        assert!(persist.is_empty());

        consumer
            .handle_completed(CompletedUpload {
                request: UploadRequest {
                    id: Uuid::new_v4(),
                    total_size: 64,
                    attachments: vec![subtitle("spa")],
                },
                message: message(1),
            })
            .await
            .unwrap();

        let record = persist.take().await.unwrap();
        assert_eq!(record.subtitles.len(), 2);
        assert_eq!(record.subtitles[1].language, "spa");
    }

    #[test]
    fn new_record_prefers_resolved_folder() {
        let mut state = FileState::new("a", 1, "sub", "ctx", EncryptionMethod::AesCtr);
        assert_eq!(new_record(&state).parent_id, "ctx");
        state.apply(FileEvent::FolderResolved {
            folder_id: "f9".into(),
        });
        assert_eq!(new_record(&state).parent_id, "f9");
    }
}
