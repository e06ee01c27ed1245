//! Payload types flowing between pipeline stages.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use fraglift_crypto::{Secrets, round_up_to_64};
use fraglift_protocol::{HostLimits, HostMessage};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use uuid::Uuid;

/// Kind-specific data of one attachment.
#[derive(Debug, Clone)]
pub enum AttachmentPayload {
    Fragment {
        /// 1-based position within the file.
        sequence: u32,
        offset: u64,
        /// CRC-32 of this fragment's plaintext alone.
        crc: u32,
    },
    Thumbnail,
    Subtitle {
        name: String,
        forced: bool,
    },
}

/// One unit of bytes bound for the host.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_id: Uuid,
    pub payload: AttachmentPayload,
    pub bytes: Bytes,
    /// Fresh per-artifact secrets for thumbnails and subtitles. Fragments
    /// carry `None` and are encrypted with the owning file's secrets at
    /// their byte offset.
    pub secrets: Option<Secrets>,
}

impl Attachment {
    pub fn is_fragment(&self) -> bool {
        matches!(self.payload, AttachmentPayload::Fragment { .. })
    }

    /// Size counted against the batch budget: rounded up to 64 bytes so
    /// ciphertext padding never overflows the host cap.
    pub fn padded_size(&self) -> u64 {
        round_up_to_64(self.bytes.len() as u64)
    }
}

/// One host-bound batch. Size and count caps are enforced at construction
/// by [`RequestBatch`]; nothing downstream re-checks them.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub id: Uuid,
    pub total_size: u64,
    pub attachments: Vec<Attachment>,
}

impl UploadRequest {
    /// Distinct files referenced by this request, in first-seen order.
    pub fn file_ids(&self) -> Vec<Uuid> {
        let mut ids = Vec::new();
        for att in &self.attachments {
            if !ids.contains(&att.file_id) {
                ids.push(att.file_id);
            }
        }
        ids
    }
}

/// In-progress batch owned by the producer; the single place where the
/// host caps are enforced.
#[derive(Debug)]
pub struct RequestBatch {
    limits: HostLimits,
    total_size: u64,
    attachments: Vec<Attachment>,
}

impl RequestBatch {
    pub fn new(limits: HostLimits) -> Self {
        Self {
            limits,
            total_size: 0,
            attachments: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.attachments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attachments.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn remaining_size(&self) -> u64 {
        self.limits.max_payload_size.saturating_sub(self.total_size)
    }

    pub fn is_full(&self) -> bool {
        self.total_size >= self.limits.max_payload_size
            || self.attachments.len() >= self.limits.max_attachments
    }

    /// Whether an attachment of `padded` bytes fits the remaining budget.
    pub fn fits(&self, padded: u64) -> bool {
        self.attachments.len() < self.limits.max_attachments && padded <= self.remaining_size()
    }

    pub fn push(&mut self, attachment: Attachment) {
        debug_assert!(self.fits(attachment.padded_size()));
        self.total_size += attachment.padded_size();
        self.attachments.push(attachment);
    }

    /// Drains the batch into a request, or `None` when empty.
    pub fn take(&mut self) -> Option<UploadRequest> {
        if self.attachments.is_empty() {
            return None;
        }
        let attachments = std::mem::take(&mut self.attachments);
        let total_size = std::mem::replace(&mut self.total_size, 0);
        Some(UploadRequest {
            id: Uuid::new_v4(),
            total_size,
            attachments,
        })
    }
}

/// Successful host upload flowing to the response consumer.
#[derive(Debug, Clone)]
pub struct CompletedUpload {
    pub request: UploadRequest,
    pub message: HostMessage,
}

/// A file discovered by the scanner, not yet entered into the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadEntry {
    pub name: String,
    pub size: u64,
    /// Directory part relative to the scanned root, `""` for top-level
    /// files. Forward slashes.
    pub relative_path: String,
    pub path: PathBuf,
}

/// Random access to a file's raw bytes.
///
/// The producer re-reads from the recorded offset on resume, so sources
/// must tolerate repeated reads of the same range.
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Reads up to `len` bytes at `offset`; short only at end of file.
    async fn read_chunk(&self, offset: u64, len: usize) -> std::io::Result<Bytes>;
}

/// Filesystem-backed [`FileSource`].
pub struct FsSource {
    path: PathBuf,
}

impl FsSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl FileSource for FsSource {
    async fn read_chunk(&self, offset: u64, len: usize) -> std::io::Result<Bytes> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len];
        let mut read = 0;
        while read < len {
            let n = file.read(&mut buf[read..]).await?;
            if n == 0 {
                break;
            }
            read += n;
        }
        buf.truncate(read);
        Ok(Bytes::from(buf))
    }
}

/// One file handed to the producer, joined to its registered state by id.
#[derive(Clone)]
pub struct QueuedFile {
    pub file_id: Uuid,
    pub entry: UploadEntry,
    pub source: Arc<dyn FileSource>,
}

impl std::fmt::Debug for QueuedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedFile")
            .field("file_id", &self.file_id)
            .field("entry", &self.entry)
            .finish_non_exhaustive()
    }
}

/// Thumbnail/duration probing seam.
///
/// Pixel decoding is host-application territory; the pipeline only needs
/// the encoded artifact back. [`NoThumbnails`] is the default.
#[async_trait]
pub trait ThumbnailExtractor: Send + Sync {
    async fn extract(&self, entry: &UploadEntry, source: &dyn FileSource)
    -> Option<ThumbnailArtifact>;
}

pub struct ThumbnailArtifact {
    pub bytes: Bytes,
    /// Playback duration in whole seconds, when the extractor learned it.
    pub duration: Option<u32>,
}

/// Extractor that never produces a thumbnail.
pub struct NoThumbnails;

#[async_trait]
impl ThumbnailExtractor for NoThumbnails {
    async fn extract(
        &self,
        _entry: &UploadEntry,
        _source: &dyn FileSource,
    ) -> Option<ThumbnailArtifact> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> HostLimits {
        HostLimits {
            max_payload_size: 1000,
            max_attachments: 3,
        }
    }

    fn fragment(len: usize) -> Attachment {
        Attachment {
            file_id: Uuid::new_v4(),
            payload: AttachmentPayload::Fragment {
                sequence: 1,
                offset: 0,
                crc: 0,
            },
            bytes: Bytes::from(vec![0u8; len]),
            secrets: None,
        }
    }

    #[test]
    fn batch_enforces_size_cap() {
        let mut batch = RequestBatch::new(limits());
        assert!(batch.fits(960));
        batch.push(fragment(960));
        assert!(!batch.fits(64));
        assert!(!batch.is_full());
        assert_eq!(batch.remaining_size(), 40);
    }

    #[test]
    fn batch_enforces_count_cap() {
        let mut batch = RequestBatch::new(limits());
        for _ in 0..3 {
            batch.push(fragment(10));
        }
        assert!(batch.is_full());
        assert!(!batch.fits(64));
    }

    #[test]
    fn padded_size_rounds_to_64() {
        assert_eq!(fragment(1).padded_size(), 64);
        assert_eq!(fragment(64).padded_size(), 64);
        assert_eq!(fragment(65).padded_size(), 128);
    }

    #[test]
    fn take_resets_batch() {
        let mut batch = RequestBatch::new(limits());
        assert!(batch.take().is_none());
        batch.push(fragment(100));
        let request = batch.take().unwrap();
        assert_eq!(request.attachments.len(), 1);
        assert_eq!(request.total_size, 128);
        assert!(batch.is_empty());
        assert_eq!(batch.total_size(), 0);
    }

    #[test]
    fn request_file_ids_deduplicate() {
        let a = fragment(10);
        let mut b = fragment(10);
        b.file_id = a.file_id;
        let c = fragment(10);
        let request = UploadRequest {
            id: Uuid::new_v4(),
            total_size: 0,
            attachments: vec![a.clone(), b, c.clone()],
        };
        assert_eq!(request.file_ids(), vec![a.file_id, c.file_id]);
    }

    #[tokio::test]
    async fn fs_source_reads_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        tokio::fs::write(&path, (0u8..200).collect::<Vec<u8>>())
            .await
            .unwrap();

        let source = FsSource::new(path);
        let chunk = source.read_chunk(10, 5).await.unwrap();
        assert_eq!(&chunk[..], &[10, 11, 12, 13, 14]);

        // Short read at EOF.
        let tail = source.read_chunk(190, 50).await.unwrap();
        assert_eq!(tail.len(), 10);
    }
}
