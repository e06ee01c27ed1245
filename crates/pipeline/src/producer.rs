//! Request producer: turns raw files into size-bounded upload requests.
//!
//! Files are consumed strictly one at a time. The producer resolves
//! destination folders, generates per-file secrets, extracts thumbnails,
//! feeds video bytes through the MP4 scanner, and walks the file into
//! fragments that fill the in-progress batch. The batch caps are enforced
//! here and nowhere else.

use std::collections::HashMap;
use std::sync::Arc;

use fraglift_crypto::{Secrets, fold_crc32};
use fraglift_host::BackendApi;
use fraglift_media::{
    MediaEvent, Mp4Scanner, build_vtt, is_audio_file, is_image_file, is_video_file,
};
use fraglift_protocol::{CreateFolderRequest, EncryptionMethod, FileRecord, HostLimits};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::queue::BoundedQueue;
use crate::runtime::UploadRuntime;
use crate::stash::SessionStashes;
use crate::state::{FileEvent, FileState, UploadStatus};
use crate::types::{
    Attachment, AttachmentPayload, QueuedFile, RequestBatch, ThumbnailExtractor, UploadRequest,
};

pub struct RequestProducer {
    runtime: UploadRuntime,
    backend: Arc<dyn BackendApi>,
    thumbnails: Arc<dyn ThumbnailExtractor>,
    file_queue: BoundedQueue<QueuedFile>,
    request_queue: BoundedQueue<UploadRequest>,
    persist_queue: BoundedQueue<FileRecord>,
    stashes: Arc<SessionStashes>,
    limits: HostLimits,
    encryption: EncryptionMethod,
    /// Distinguishes folder memoization entries across sessions targeting
    /// the same paths.
    upload_id: Uuid,
    request_more: mpsc::Sender<()>,

    created_folders: HashMap<String, String>,
    scanners: HashMap<Uuid, Mp4Scanner>,
    pending_subtitles: HashMap<Uuid, Vec<Attachment>>,
    subtitle_names: HashMap<String, u32>,
    batch: RequestBatch,
}

impl RequestProducer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runtime: UploadRuntime,
        backend: Arc<dyn BackendApi>,
        thumbnails: Arc<dyn ThumbnailExtractor>,
        file_queue: BoundedQueue<QueuedFile>,
        request_queue: BoundedQueue<UploadRequest>,
        persist_queue: BoundedQueue<FileRecord>,
        stashes: Arc<SessionStashes>,
        limits: HostLimits,
        encryption: EncryptionMethod,
        request_more: mpsc::Sender<()>,
    ) -> Self {
        Self {
            runtime,
            backend,
            thumbnails,
            file_queue,
            request_queue,
            persist_queue,
            stashes,
            batch: RequestBatch::new(limits),
            limits,
            encryption,
            upload_id: Uuid::new_v4(),
            request_more,
            created_folders: HashMap::new(),
            scanners: HashMap::new(),
            pending_subtitles: HashMap::new(),
            subtitle_names: HashMap::new(),
        }
    }

    pub async fn run(mut self) {
        loop {
            // Nudge the scanner so the next batch of files is on its way
            // while we work.
            let _ = self.request_more.try_send(());

            let Some(file) = self.file_queue.take().await else {
                break;
            };
            let file_id = file.file_id;

            match self.produce_file(&file).await {
                Ok(()) => {}
                Err(PipelineError::QueueClosed(_)) => {
                    debug!("request queue closed, producer stopping");
                    return;
                }
                Err(PipelineError::Io(err))
                    if err.kind() == std::io::ErrorKind::NotFound =>
                {
                    warn!(file = %file.entry.name, "source file gone during production");
                    self.runtime
                        .set_file_status(file_id, UploadStatus::FileGone);
                    self.stashes.push_gone_file(file);
                    self.forget_media_state(file_id);
                }
                Err(err) => {
                    warn!(file = %file.entry.name, %err, "production failed");
                    self.runtime
                        .set_file_status(file_id, UploadStatus::ErrorOccurred);
                    self.runtime.apply(
                        file_id,
                        FileEvent::ErrorSet {
                            message: err.to_string(),
                        },
                    );
                    self.forget_media_state(file_id);
                }
            }
        }

        // Trailing partial batch from the last file.
        if let Some(request) = self.batch.take() {
            let _ = self.request_queue.put(request).await;
        }
        debug!("producer finished");
    }

    async fn produce_file(&mut self, file: &QueuedFile) -> Result<(), PipelineError> {
        let file_id = file.file_id;
        let Some(mut state) = self.runtime.file(file_id) else {
            warn!(file = %file.entry.name, "no registered state, skipping");
            return Ok(());
        };
        let folder_id = self.resolve_folder(&state).await?;
        self.runtime
            .apply(file_id, FileEvent::FolderResolved { folder_id });
        state = self.runtime.file(file_id).unwrap_or(state);

        // Nothing to extract or encrypt; the file skips straight to
        // waiting-for-save and never enters the extracting state.
        if state.size == 0 {
            return self.finish_empty_file(&state).await;
        }

        self.runtime
            .set_file_status(file_id, UploadStatus::Extracting);
        if self.encryption != EncryptionMethod::NotEncrypted && state.secrets.is_none() {
            if let Some(secrets) = Secrets::generate(self.encryption) {
                self.runtime
                    .apply(file_id, FileEvent::SecretsGenerated { secrets });
            }
        }
        state = self.runtime.file(file_id).unwrap_or(state);

        self.extract_thumbnail(file, &state).await?;
        self.ensure_scanner(&state);
        self.walk_fragments(file).await?;
        self.forget_media_state(file_id);
        Ok(())
    }

    /// Zero-byte files bypass fragmentation entirely: straight to
    /// waiting-for-save with an empty record.
    async fn finish_empty_file(&mut self, state: &FileState) -> Result<(), PipelineError> {
        let file_id = state.id;
        self.runtime
            .apply(file_id, FileEvent::TotalChunksSet { total: 0 });
        self.runtime.set_file_status(file_id, UploadStatus::Uploaded);
        self.runtime
            .set_file_status(file_id, UploadStatus::WaitingForSave);

        let state = self.runtime.file(file_id).unwrap_or_else(|| state.clone());
        let record = crate::response::new_record(&state);
        self.persist_queue.put(record).await?;
        debug!(file = %state.name, "empty file shortcut");
        Ok(())
    }

    /// Creates (at most once per distinct path) every folder on the
    /// file's relative path, returning the id of the innermost one.
    async fn resolve_folder(&mut self, state: &FileState) -> Result<String, PipelineError> {
        if state.relative_path.is_empty() {
            return Ok(state.folder_context.clone());
        }

        let mut parent = state.folder_context.clone();
        let mut prefix = String::new();
        for part in state.relative_path.split('/') {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(part);

            let key = format!("{}{}", self.upload_id, prefix);
            if let Some(existing) = self.created_folders.get(&key) {
                parent = existing.clone();
                continue;
            }
            let created = self
                .backend
                .create_folder(&CreateFolderRequest {
                    parent_id: parent.clone(),
                    name: part.to_string(),
                })
                .await?;
            self.created_folders.insert(key, created.id.clone());
            parent = created.id;
        }
        Ok(parent)
    }

    /// Extracts the thumbnail, flushing the in-progress batch first when
    /// the artifact would not fit alongside the file's first fragment.
    async fn extract_thumbnail(
        &mut self,
        file: &QueuedFile,
        state: &FileState,
    ) -> Result<(), PipelineError> {
        if state.thumbnail_extracted {
            return Ok(());
        }
        // Only media files can yield a thumbnail: a video frame, a scaled
        // image, or audio cover art.
        let name = &file.entry.name;
        if !is_video_file(name) && !is_image_file(name) && !is_audio_file(name) {
            return Ok(());
        }
        let Some(artifact) = self
            .thumbnails
            .extract(&file.entry, file.source.as_ref())
            .await
        else {
            return Ok(());
        };
        let file_id = file.file_id;

        if let Some(seconds) = artifact.duration {
            self.runtime
                .apply(file_id, FileEvent::DurationSet { seconds });
        }
        let attachment = Attachment {
            file_id,
            payload: AttachmentPayload::Thumbnail,
            bytes: artifact.bytes,
            secrets: Secrets::generate(self.encryption),
        };
        if attachment.padded_size() > self.limits.max_payload_size {
            warn!(file = %file.entry.name, "thumbnail exceeds host payload cap, dropped");
            return Ok(());
        }
        self.runtime.apply(file_id, FileEvent::ThumbnailExtracted);
        if !self.batch.fits(attachment.padded_size()) {
            warn!(
                file = %file.entry.name,
                "thumbnail does not fit alongside first fragment, flushing batch"
            );
            self.flush_batch().await?;
        }
        self.batch.push(attachment);
        Ok(())
    }

    fn ensure_scanner(&mut self, state: &FileState) {
        if state.video_metadata_extracted || self.scanners.contains_key(&state.id) {
            return;
        }
        if !is_video_file(&state.name) {
            return;
        }
        self.scanners.insert(state.id, Mp4Scanner::new());
        self.runtime.apply(state.id, FileEvent::VideoMetadataRequired);
    }

    /// Walks the file's bytes from the recorded resume point, producing
    /// fragments that fill the remaining batch capacity.
    async fn walk_fragments(&mut self, file: &QueuedFile) -> Result<(), PipelineError> {
        let file_id = file.file_id;
        let size = file.entry.size;
        let cap = self.limits.max_payload_size;

        let state = self
            .runtime
            .file(file_id)
            .ok_or_else(|| std::io::Error::other("file state disappeared"))?;
        let mut offset = state.offset;
        let mut sequence = state.extracted_chunks;
        let mut crc = state.crc;

        while offset < size {
            let remaining_file = size - offset;

            // Early flush: a nearly-full batch would otherwise lead with a
            // pathologically small fragment of a large file, which hurts
            // streaming playback of the reassembled data.
            let early_flush =
                self.batch.remaining_size() < cap / 3 && remaining_file > cap / 3;
            if early_flush || !self.batch.fits(64) {
                self.flush_batch().await?;
            }

            // Size the fragment so its 64-byte-padded footprint still
            // fits the batch budget.
            let budget = self.batch.remaining_size();
            let mut len = budget.min(remaining_file);
            if fraglift_crypto::round_up_to_64(len) > budget {
                len = (budget - budget % 64).min(remaining_file);
            }
            let chunk = file.source.read_chunk(offset, len as usize).await?;
            if chunk.is_empty() {
                // Source shrank under us.
                return Err(std::io::Error::from(std::io::ErrorKind::NotFound).into());
            }

            self.feed_scanner(file_id, &chunk).await?;

            let fragment_crc = fold_crc32(0, &chunk);
            crc = fold_crc32(crc, &chunk);
            offset += chunk.len() as u64;
            sequence += 1;

            self.batch.push(Attachment {
                file_id,
                payload: AttachmentPayload::Fragment {
                    sequence,
                    offset: offset - chunk.len() as u64,
                    crc: fragment_crc,
                },
                bytes: chunk,
                secrets: None,
            });
            self.runtime
                .apply(file_id, FileEvent::ChunkExtracted { offset, sequence });
            self.runtime.apply(file_id, FileEvent::CrcSet { crc });

            if self.batch.total_size() >= cap
                || self.batch.len() >= self.limits.max_attachments.saturating_sub(1)
            {
                self.flush_batch().await?;
            }
        }

        self.runtime
            .apply(file_id, FileEvent::TotalChunksSet { total: sequence });
        debug!(file = %file.entry.name, fragments = sequence, "file fully split");
        Ok(())
    }

    async fn flush_batch(&mut self) -> Result<(), PipelineError> {
        if let Some(request) = self.batch.take() {
            self.request_queue.put(request).await?;
        }
        Ok(())
    }

    /// Feeds fragment bytes to the file's MP4 scanner while metadata or
    /// subtitles are still outstanding. Scan errors are not fatal to the
    /// upload: the scanner is dropped and the completion predicate falls
    /// back to the fully-split rule.
    async fn feed_scanner(&mut self, file_id: Uuid, chunk: &[u8]) -> Result<(), PipelineError> {
        let Some(state) = self.runtime.file(file_id) else {
            return Ok(());
        };
        if !self.scanners.contains_key(&file_id)
            || (state.video_metadata_extracted && state.subtitles_extracted)
        {
            return Ok(());
        }
        let events = {
            let Some(scanner) = self.scanners.get_mut(&file_id) else {
                return Ok(());
            };
            match scanner.feed(chunk) {
                Ok(events) => events,
                Err(err) => {
                    warn!(%file_id, %err, "media scan abandoned");
                    self.scanners.remove(&file_id);
                    return Ok(());
                }
            }
        };
        self.handle_media_events(file_id, events).await
    }

    async fn handle_media_events(
        &mut self,
        file_id: Uuid,
        events: Vec<MediaEvent>,
    ) -> Result<(), PipelineError> {
        for event in events {
            match event {
                MediaEvent::Metadata {
                    metadata,
                    subtitle_track_count,
                } => {
                    if let Some(duration) = metadata.duration {
                        self.runtime.apply(
                            file_id,
                            FileEvent::DurationSet {
                                seconds: duration.round() as u32,
                            },
                        );
                    }
                    self.runtime
                        .apply(file_id, FileEvent::VideoMetadataExtracted { metadata });
                    if subtitle_track_count > 0 {
                        self.runtime.apply(
                            file_id,
                            FileEvent::SubtitlesRequired {
                                expected: subtitle_track_count as u32,
                            },
                        );
                    }
                }
                MediaEvent::SubtitleTrack(track) => {
                    let vtt = build_vtt(&track.cues);
                    if vtt.len() as u64 > self.limits.max_payload_size {
                        // Never counted as extracted; the fully-split
                        // fallback completes the file instead.
                        warn!(%file_id, track = track.track_id, "subtitle track too large, dropped");
                        continue;
                    }
                    let name = self.unique_subtitle_name(&track);
                    self.runtime.apply(file_id, FileEvent::SubtitleExtracted);
                    self.pending_subtitles
                        .entry(file_id)
                        .or_default()
                        .push(Attachment {
                            file_id,
                            payload: AttachmentPayload::Subtitle {
                                name,
                                forced: track.forced,
                            },
                            bytes: vtt.into_bytes().into(),
                            secrets: Secrets::generate(self.encryption),
                        });
                    self.emit_subtitles_if_complete(file_id).await?;
                }
            }
        }
        Ok(())
    }

    /// Base name is the track name, falling back to language, falling
    /// back to the track id; duplicates get `-<track id>` suffixes.
    fn unique_subtitle_name(&mut self, track: &fraglift_media::SubtitleTrack) -> String {
        let base = track
            .name
            .as_deref()
            .filter(|n| !n.trim().is_empty() && *n != "SubtitleHandler")
            .or(track.language.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| track.track_id.to_string());

        let count = self.subtitle_names.entry(base.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            base
        } else {
            format!("{base}-{}", track.track_id)
        }
    }

    /// Once every expected track is in, subtitles go out as their own
    /// requests, bypassing the in-progress fragment batch.
    async fn emit_subtitles_if_complete(&mut self, file_id: Uuid) -> Result<(), PipelineError> {
        let Some(state) = self.runtime.file(file_id) else {
            return Ok(());
        };
        if state.expected_subtitles == 0 || state.extracted_subtitles != state.expected_subtitles {
            return Ok(());
        }
        let Some(attachments) = self.pending_subtitles.remove(&file_id) else {
            return Ok(());
        };
        self.runtime.apply(file_id, FileEvent::SubtitlesExtracted);
        info!(%file_id, tracks = attachments.len(), "emitting subtitle requests");

        let mut batch = RequestBatch::new(self.limits);
        for attachment in attachments {
            if !batch.fits(attachment.padded_size()) {
                if let Some(request) = batch.take() {
                    self.request_queue.put(request).await?;
                }
            }
            batch.push(attachment);
        }
        if let Some(request) = batch.take() {
            self.request_queue.put(request).await?;
        }
        Ok(())
    }

    fn forget_media_state(&mut self, file_id: Uuid) {
        self.scanners.remove(&file_id);
        self.pending_subtitles.remove(&file_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use fraglift_host::HostError;
    use fraglift_media::SubtitleTrack;
    use fraglift_protocol::{
        CreateFileBatch, CreateFolderResponse, RegisterAttachmentsBatch,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::types::{FileSource, NoThumbnails, ThumbnailArtifact, UploadEntry};

    struct CountingBackend {
        folders: AtomicUsize,
    }

    #[async_trait]
    impl BackendApi for CountingBackend {
        async fn create_folder(
            &self,
            _request: &CreateFolderRequest,
        ) -> Result<CreateFolderResponse, HostError> {
            let n = self.folders.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(CreateFolderResponse {
                id: format!("folder-{n}"),
            })
        }

        async fn create_files(&self, _batch: &CreateFileBatch) -> Result<(), HostError> {
            Ok(())
        }

        async fn register_attachments(
            &self,
            _batch: &RegisterAttachmentsBatch,
        ) -> Result<(), HostError> {
            Ok(())
        }

        async fn probe(&self) -> bool {
            true
        }
    }

    struct MemSource(Vec<u8>);

    #[async_trait]
    impl FileSource for MemSource {
        async fn read_chunk(&self, offset: u64, len: usize) -> std::io::Result<Bytes> {
            let start = (offset as usize).min(self.0.len());
            let end = (start + len).min(self.0.len());
            Ok(Bytes::copy_from_slice(&self.0[start..end]))
        }
    }

    struct Fixture {
        runtime: UploadRuntime,
        backend: std::sync::Arc<CountingBackend>,
        request_queue: BoundedQueue<UploadRequest>,
        persist_queue: BoundedQueue<fraglift_protocol::FileRecord>,
        producer: RequestProducer,
    }

    fn fixture(limits: HostLimits) -> Fixture {
        fixture_with(limits, std::sync::Arc::new(NoThumbnails))
    }

    fn fixture_with(
        limits: HostLimits,
        thumbnails: std::sync::Arc<dyn ThumbnailExtractor>,
    ) -> Fixture {
        let runtime = UploadRuntime::new();
        let backend = std::sync::Arc::new(CountingBackend {
            folders: AtomicUsize::new(0),
        });
        let request_queue = BoundedQueue::unbounded();
        let persist_queue = BoundedQueue::unbounded();
        let (more_tx, _more_rx) = mpsc::channel(1);
        let producer = RequestProducer::new(
            runtime.clone(),
            backend.clone(),
            thumbnails,
            BoundedQueue::new(4),
            request_queue.clone(),
            persist_queue.clone(),
            std::sync::Arc::new(crate::stash::SessionStashes::default()),
            limits,
            EncryptionMethod::NotEncrypted,
            more_tx,
        );
        Fixture {
            runtime,
            backend,
            request_queue,
            persist_queue,
            producer,
        }
    }

    fn limits(size: u64, count: usize) -> HostLimits {
        HostLimits {
            max_payload_size: size,
            max_attachments: count,
        }
    }

    fn queued(runtime: &UploadRuntime, name: &str, bytes: Vec<u8>, path: &str) -> QueuedFile {
        let state = FileState::new(
            name,
            bytes.len() as u64,
            path,
            "ctx",
            EncryptionMethod::NotEncrypted,
        );
        let file_id = state.id;
        runtime.register_file(state);
        QueuedFile {
            file_id,
            entry: UploadEntry {
                name: name.into(),
                size: bytes.len() as u64,
                relative_path: path.into(),
                path: std::path::PathBuf::from(name),
            },
            source: std::sync::Arc::new(MemSource(bytes)),
        }
    }

    #[tokio::test]
    async fn folders_created_once_per_path_prefix() {
        let mut fx = fixture(limits(10_000, 10));
        let first = queued(&fx.runtime, "a.bin", vec![1; 10], "photos/raw");
        let second = queued(&fx.runtime, "b.bin", vec![2; 10], "photos/raw");

        fx.producer.produce_file(&first).await.unwrap();
        assert_eq!(fx.backend.folders.load(Ordering::SeqCst), 2);
        fx.producer.produce_file(&second).await.unwrap();
        // Cached, no further backend calls.
        assert_eq!(fx.backend.folders.load(Ordering::SeqCst), 2);

        let state = fx.runtime.file(second.file_id).unwrap();
        assert_eq!(state.folder_id.as_deref(), Some("folder-2"));
    }

    #[tokio::test]
    async fn fragment_walk_partitions_within_padded_cap() {
        let mut fx = fixture(limits(2500, 10));
        let file = queued(&fx.runtime, "big.bin", vec![7; 3000], "");

        fx.producer.produce_file(&file).await.unwrap();
        let trailing = fx.producer.batch.take();

        let mut sizes = Vec::new();
        while let Some(request) = {
            let q = &fx.request_queue;
            if q.is_empty() { None } else { q.take().await }
        } {
            let padded: u64 = request.attachments.iter().map(|a| a.padded_size()).sum();
            assert!(padded <= 2500);
            sizes.extend(request.attachments.iter().map(|a| a.bytes.len() as u64));
        }
        if let Some(request) = trailing {
            sizes.extend(request.attachments.iter().map(|a| a.bytes.len() as u64));
        }

        assert_eq!(sizes.iter().sum::<u64>(), 3000);
        assert_eq!(sizes.len(), 2);

        let state = fx.runtime.file(file.file_id).unwrap();
        assert_eq!(state.total_chunks, Some(2));
        assert!(state.is_fully_split());
        assert_eq!(state.crc, fold_crc32(0, &vec![7u8; 3000]));
    }

    #[tokio::test]
    async fn empty_file_goes_straight_to_persistence() {
        let mut fx = fixture(limits(2500, 10));
        let file = queued(&fx.runtime, "empty.bin", Vec::new(), "");
        let mut events = fx.runtime.subscribe();

        fx.producer.produce_file(&file).await.unwrap();

        let record = fx.persist_queue.take().await.unwrap();
        assert_eq!(record.file_id, file.file_id);
        assert!(record.fragments.is_empty());
        assert_eq!(
            fx.runtime.file(file.file_id).unwrap().status,
            UploadStatus::WaitingForSave
        );
        assert!(fx.request_queue.is_empty());

        // preparing, then uploaded and waiting-for-save; the extracting
        // state is never entered.
        let mut statuses = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let crate::events::PipelineEvent::FileChanged(change) = event {
                statuses.push(change.status);
            }
        }
        statuses.dedup();
        assert_eq!(
            statuses,
            vec![
                UploadStatus::Preparing,
                UploadStatus::Uploaded,
                UploadStatus::WaitingForSave,
            ]
        );
    }

    struct CountingThumbnails {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ThumbnailExtractor for CountingThumbnails {
        async fn extract(
            &self,
            _entry: &UploadEntry,
            _source: &dyn FileSource,
        ) -> Option<ThumbnailArtifact> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            None
        }
    }

    #[tokio::test]
    async fn thumbnail_extraction_skips_non_media_files() {
        let thumbnails = std::sync::Arc::new(CountingThumbnails {
            calls: AtomicUsize::new(0),
        });
        let mut fx = fixture_with(limits(10_000, 10), thumbnails.clone());

        let doc = queued(&fx.runtime, "notes.txt", vec![1; 10], "");
        fx.producer.produce_file(&doc).await.unwrap();
        assert_eq!(thumbnails.calls.load(Ordering::SeqCst), 0);

        let photo = queued(&fx.runtime, "photo.jpg", vec![2; 10], "");
        fx.producer.produce_file(&photo).await.unwrap();
        assert_eq!(thumbnails.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn subtitle_names_fall_back_and_deduplicate() {
        let mut fx = fixture(limits(2500, 10));
        let track = |id: u32, name: Option<&str>, language: Option<&str>| SubtitleTrack {
            track_id: id,
            name: name.map(Into::into),
            language: language.map(Into::into),
            forced: false,
            cues: Vec::new(),
        };

        assert_eq!(
            fx.producer.unique_subtitle_name(&track(2, Some("English"), Some("eng"))),
            "English"
        );
        assert_eq!(
            fx.producer.unique_subtitle_name(&track(3, Some("English"), Some("eng"))),
            "English-3"
        );
        // Placeholder handler names are ignored in favor of the language.
        assert_eq!(
            fx.producer
                .unique_subtitle_name(&track(4, Some("SubtitleHandler"), Some("spa"))),
            "spa"
        );
        // Nothing usable at all: the track id.
        assert_eq!(fx.producer.unique_subtitle_name(&track(5, None, None)), "5");
    }
}
