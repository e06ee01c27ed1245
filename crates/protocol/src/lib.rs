//! Wire types shared across the fraglift upload pipeline.
//!
//! Everything that crosses a process boundary lives here: the attachment
//! host's upload response shapes, the backend's file-registration records,
//! and the limits both services impose on a single request.

mod backend;
mod host;
mod types;

pub use backend::{
    AttachmentReference, AttachmentReferenceKind, CreateFileBatch, CreateFolderRequest,
    CreateFolderResponse, FileRecord, FragmentDescriptor, RegisterAttachmentsBatch,
    SubtitleDescriptor, ThumbnailDescriptor, TrackInfo, VideoMetadata,
};
pub use host::{AttachmentManifest, HostAttachment, HostAuthor, HostMessage, ManifestEntry};
pub use types::{EncryptionMethod, HostLimits, ProtocolError};
