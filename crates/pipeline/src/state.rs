//! Per-file upload state machine.

use chrono::{DateTime, Utc};
use fraglift_protocol::{EncryptionMethod, VideoMetadata};
use fraglift_crypto::Secrets;
use uuid::Uuid;

/// Lifecycle of one file moving through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Preparing,
    Extracting,
    Uploading,
    Retrying,
    Uploaded,
    WaitingForSave,
    Saved,
    UploadFailed,
    SaveFailed,
    FileGone,
    ErrorOccurred,
}

impl UploadStatus {
    pub fn is_error(self) -> bool {
        matches!(
            self,
            UploadStatus::UploadFailed
                | UploadStatus::SaveFailed
                | UploadStatus::FileGone
                | UploadStatus::ErrorOccurred
        )
    }
}

/// Transition input for [`FileState::apply`]. Every mutation of a file's
/// state goes through exactly one of these.
#[derive(Debug, Clone)]
pub enum FileEvent {
    FolderResolved { folder_id: String },
    SecretsGenerated { secrets: Secrets },
    /// A fragment was sliced off; moves the resume point forward.
    ChunkExtracted { offset: u64, sequence: u32 },
    TotalChunksSet { total: u32 },
    ChunkUploaded,
    ThumbnailExtracted,
    ThumbnailUploaded,
    VideoMetadataRequired,
    VideoMetadataExtracted { metadata: VideoMetadata },
    SubtitlesRequired { expected: u32 },
    SubtitleExtracted,
    SubtitlesExtracted,
    SubtitlesUploaded,
    DurationSet { seconds: u32 },
    CrcSet { crc: u32 },
    /// Bytes attributed by the runtime's progress model, not actual wire
    /// truth; may be corrected by rollback or shortfall events.
    BytesAttributed { delta: u64 },
    BytesRolledBack { amount: u64 },
    StatusSet { status: UploadStatus },
    ErrorSet { message: String },
}

/// Snapshot emitted after each applied event.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub file_id: Uuid,
    pub event: FileEvent,
    pub status: UploadStatus,
    pub progress: u8,
}

/// All bookkeeping for one file in flight.
#[derive(Debug, Clone)]
pub struct FileState {
    pub id: Uuid,
    pub name: String,
    pub size: u64,
    /// Path of the file within the uploaded tree, `""` when it sits
    /// directly in the destination folder. Forward slashes.
    pub relative_path: String,
    /// Destination folder the upload was started into.
    pub folder_context: String,
    /// Folder resolved for this file's relative path.
    pub folder_id: Option<String>,

    /// Resume point of the producer: next byte offset to fragment.
    pub offset: u64,
    pub total_chunks: Option<u32>,
    pub extracted_chunks: u32,
    pub uploaded_chunks: u32,

    pub thumbnail_extracted: bool,
    pub thumbnail_uploaded: bool,

    pub video_metadata_required: bool,
    pub video_metadata_extracted: bool,
    pub video_metadata: Option<VideoMetadata>,

    pub subtitles_required: bool,
    pub expected_subtitles: u32,
    pub extracted_subtitles: u32,
    pub subtitles_extracted: bool,
    pub subtitles_uploaded: bool,

    /// CRC-32 folded over fragment bytes in offset order.
    pub crc: u32,
    pub encryption_method: EncryptionMethod,
    pub secrets: Option<Secrets>,
    pub duration: Option<u32>,

    pub status: UploadStatus,
    pub uploaded_bytes: u64,
    pub progress: u8,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FileState {
    pub fn new(
        name: impl Into<String>,
        size: u64,
        relative_path: impl Into<String>,
        folder_context: impl Into<String>,
        encryption_method: EncryptionMethod,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            size,
            relative_path: relative_path.into(),
            folder_context: folder_context.into(),
            folder_id: None,
            offset: 0,
            total_chunks: None,
            extracted_chunks: 0,
            uploaded_chunks: 0,
            thumbnail_extracted: false,
            thumbnail_uploaded: false,
            video_metadata_required: false,
            video_metadata_extracted: false,
            video_metadata: None,
            subtitles_required: false,
            expected_subtitles: 0,
            extracted_subtitles: 0,
            subtitles_extracted: false,
            subtitles_uploaded: false,
            crc: 0,
            encryption_method,
            secrets: None,
            duration: None,
            status: UploadStatus::Preparing,
            uploaded_bytes: 0,
            progress: 0,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Applies one event and returns the resulting change notification.
    pub fn apply(&mut self, event: FileEvent) -> StateChange {
        match &event {
            FileEvent::FolderResolved { folder_id } => {
                self.folder_id = Some(folder_id.clone());
            }
            FileEvent::SecretsGenerated { secrets } => {
                self.secrets = Some(secrets.clone());
            }
            FileEvent::ChunkExtracted { offset, sequence } => {
                self.offset = *offset;
                self.extracted_chunks = *sequence;
            }
            FileEvent::TotalChunksSet { total } => {
                self.total_chunks = Some(*total);
            }
            FileEvent::ChunkUploaded => {
                self.uploaded_chunks += 1;
            }
            FileEvent::ThumbnailExtracted => {
                self.thumbnail_extracted = true;
            }
            FileEvent::ThumbnailUploaded => {
                self.thumbnail_uploaded = true;
            }
            FileEvent::VideoMetadataRequired => {
                self.video_metadata_required = true;
            }
            FileEvent::VideoMetadataExtracted { metadata } => {
                self.video_metadata = Some(metadata.clone());
                self.video_metadata_extracted = true;
            }
            FileEvent::SubtitlesRequired { expected } => {
                self.subtitles_required = true;
                self.expected_subtitles = *expected;
            }
            FileEvent::SubtitleExtracted => {
                self.extracted_subtitles += 1;
            }
            FileEvent::SubtitlesExtracted => {
                self.subtitles_extracted = true;
            }
            FileEvent::SubtitlesUploaded => {
                self.subtitles_uploaded = true;
            }
            FileEvent::DurationSet { seconds } => {
                self.duration = Some(*seconds);
            }
            FileEvent::CrcSet { crc } => {
                self.crc = *crc;
            }
            FileEvent::BytesAttributed { delta } => {
                self.uploaded_bytes += delta;
                self.update_progress();
            }
            FileEvent::BytesRolledBack { amount } => {
                self.uploaded_bytes = self.uploaded_bytes.saturating_sub(*amount);
                self.update_progress();
            }
            FileEvent::StatusSet { status } => {
                self.status = *status;
                if !status.is_error() {
                    self.error = None;
                }
            }
            FileEvent::ErrorSet { message } => {
                self.error = Some(message.clone());
            }
        }
        StateChange {
            file_id: self.id,
            event,
            status: self.status,
            progress: self.progress,
        }
    }

    fn update_progress(&mut self) {
        if self.size == 0 {
            self.progress = 100;
            return;
        }
        self.progress = (self.uploaded_bytes * 100 / self.size).min(100) as u8;
    }

    /// The producer has walked every byte of the file.
    pub fn is_fully_split(&self) -> bool {
        self.total_chunks == Some(self.extracted_chunks)
    }

    /// Completion predicate: every required artifact is confirmed uploaded.
    ///
    /// Subtitles count as done when extraction never succeeded but the
    /// file is fully split (the scanner gave up, e.g. samples stored
    /// before a trailing `moov`). Video metadata falls back the same way.
    /// Zero-byte files are trivially complete.
    pub fn is_fully_uploaded(&self) -> bool {
        if self.size == 0 {
            return true;
        }
        let total_known = self.total_chunks.is_some();
        let chunks_done = self.total_chunks == Some(self.uploaded_chunks);
        let thumbnail_done = !self.thumbnail_extracted || self.thumbnail_uploaded;
        let video_metadata_done =
            !self.video_metadata_required || self.video_metadata_extracted || self.is_fully_split();
        let subtitles_done = !self.subtitles_required
            || (self.subtitles_extracted && self.subtitles_uploaded)
            || (!self.subtitles_extracted && self.is_fully_split());

        total_known && chunks_done && thumbnail_done && video_metadata_done && subtitles_done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(size: u64) -> FileState {
        FileState::new("a.bin", size, "", "root", EncryptionMethod::NotEncrypted)
    }

    #[test]
    fn empty_file_is_trivially_complete() {
        assert!(state(0).is_fully_uploaded());
    }

    #[test]
    fn incomplete_until_total_known() {
        let mut s = state(100);
        s.apply(FileEvent::ChunkUploaded);
        assert!(!s.is_fully_uploaded());
        s.apply(FileEvent::TotalChunksSet { total: 1 });
        assert!(s.is_fully_uploaded());
    }

    #[test]
    fn thumbnail_gates_completion_once_extracted() {
        let mut s = state(100);
        s.apply(FileEvent::TotalChunksSet { total: 1 });
        s.apply(FileEvent::ChunkUploaded);
        s.apply(FileEvent::ThumbnailExtracted);
        assert!(!s.is_fully_uploaded());
        s.apply(FileEvent::ThumbnailUploaded);
        assert!(s.is_fully_uploaded());
    }

    #[test]
    fn subtitle_fallback_when_extraction_never_finished() {
        let mut s = state(100);
        s.apply(FileEvent::SubtitlesRequired { expected: 2 });
        s.apply(FileEvent::ChunkExtracted {
            offset: 100,
            sequence: 1,
        });
        s.apply(FileEvent::TotalChunksSet { total: 1 });
        s.apply(FileEvent::ChunkUploaded);
        // Required but never extracted: completes because the file is
        // fully split.
        assert!(s.is_fully_uploaded());
    }

    #[test]
    fn extracted_subtitles_must_also_upload() {
        let mut s = state(100);
        s.apply(FileEvent::SubtitlesRequired { expected: 1 });
        s.apply(FileEvent::SubtitlesExtracted);
        s.apply(FileEvent::ChunkExtracted {
            offset: 100,
            sequence: 1,
        });
        s.apply(FileEvent::TotalChunksSet { total: 1 });
        s.apply(FileEvent::ChunkUploaded);
        assert!(!s.is_fully_uploaded());
        s.apply(FileEvent::SubtitlesUploaded);
        assert!(s.is_fully_uploaded());
    }

    #[test]
    fn video_metadata_fallback_on_full_split() {
        let mut s = state(100);
        s.apply(FileEvent::VideoMetadataRequired);
        s.apply(FileEvent::TotalChunksSet { total: 1 });
        s.apply(FileEvent::ChunkUploaded);
        assert!(!s.is_fully_uploaded());
        s.apply(FileEvent::ChunkExtracted {
            offset: 100,
            sequence: 1,
        });
        assert!(s.is_fully_uploaded());
    }

    #[test]
    fn non_error_status_clears_error() {
        let mut s = state(10);
        s.apply(FileEvent::StatusSet {
            status: UploadStatus::UploadFailed,
        });
        s.apply(FileEvent::ErrorSet {
            message: "boom".into(),
        });
        assert!(s.error.is_some());
        s.apply(FileEvent::StatusSet {
            status: UploadStatus::Retrying,
        });
        assert!(s.error.is_none());

        s.apply(FileEvent::ErrorSet {
            message: "boom".into(),
        });
        s.apply(FileEvent::StatusSet {
            status: UploadStatus::SaveFailed,
        });
        assert!(s.error.is_some());
    }

    #[test]
    fn progress_is_capped_at_100() {
        let mut s = state(100);
        s.apply(FileEvent::BytesAttributed { delta: 250 });
        assert_eq!(s.progress, 100);
        s.apply(FileEvent::BytesRolledBack { amount: 200 });
        assert_eq!(s.progress, 50);
        s.apply(FileEvent::BytesRolledBack { amount: 500 });
        assert_eq!(s.uploaded_bytes, 0);
    }
}
