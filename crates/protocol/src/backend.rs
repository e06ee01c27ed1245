use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Host identifiers of one uploaded fragment, as the backend persists them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentDescriptor {
    pub fragment_sequence: u32,
    pub fragment_size: u64,
    pub offset: u64,
    pub crc: u32,
    pub channel_id: String,
    pub message_id: String,
    pub attachment_id: String,
    pub message_author_id: String,
}

/// Host identifiers of a file's thumbnail. Thumbnails are encrypted with
/// their own secrets, separate from the file stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailDescriptor {
    pub size: u64,
    pub channel_id: String,
    pub message_id: String,
    pub attachment_id: String,
    pub message_author_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Host identifiers of one extracted subtitle track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleDescriptor {
    pub size: u64,
    pub language: String,
    pub is_forced: bool,
    pub channel_id: String,
    pub message_id: String,
    pub attachment_id: String,
    pub message_author_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// One media track inside [`VideoMetadata`]. Fields not applicable to the
/// track kind are left `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub track_number: u32,
    pub codec: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_count: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
}

/// Structural metadata parsed from a video container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    pub brands: String,
    pub video_tracks: Vec<TrackInfo>,
    pub audio_tracks: Vec<TrackInfo>,
    pub subtitle_tracks: Vec<TrackInfo>,
}

/// Everything the backend must persist for one fully uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub name: String,
    pub parent_id: String,
    pub size: u64,
    pub file_id: Uuid,
    pub encryption_method: crate::EncryptionMethod,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub crc: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub fragments: Vec<FragmentDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<ThumbnailDescriptor>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub subtitles: Vec<SubtitleDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_metadata: Option<VideoMetadata>,
}

/// Batch of file records sent to the backend registration endpoint, plus
/// any passwords needed to authorize the owning folders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFileBatch {
    pub files: Vec<FileRecord>,
    #[serde(rename = "resourcePasswords")]
    pub resource_passwords: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFolderRequest {
    pub parent_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFolderResponse {
    pub id: String,
}

/// Kind discriminator for secondary attachment registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentReferenceKind {
    Fragment,
    Thumbnail,
    Subtitle,
}

/// Lightweight reference to an uploaded attachment, registered in bulk
/// after the owning file is saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentReference {
    pub file_id: Uuid,
    pub kind: AttachmentReferenceKind,
    pub message_id: String,
    pub attachment_id: String,
}

/// Fixed-size batch of attachment references for bulk registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAttachmentsBatch {
    pub kind: AttachmentReferenceKind,
    pub attachments: Vec<AttachmentReference>,
}
