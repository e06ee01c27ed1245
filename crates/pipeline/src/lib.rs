//! Encrypted fragment upload pipeline.
//!
//! Files are split into size-bounded encrypted fragments, packed into
//! host-limited requests together with thumbnails and extracted subtitle
//! tracks, uploaded with bounded concurrency, and finally registered with
//! the backend as aggregated file records.

mod batcher;
mod config;
mod consumer;
mod error;
mod estimator;
mod events;
mod orchestrator;
mod persist;
mod producer;
mod queue;
mod response;
mod runtime;
mod scan;
mod stash;
mod state;
mod types;

pub use config::SessionConfig;
pub use error::PipelineError;
pub use events::{PipelineEvent, SessionSnapshot, SessionStatus};
pub use orchestrator::UploadSession;
pub use queue::{BoundedQueue, QueueClosed};
pub use runtime::UploadRuntime;
pub use scan::scan_upload_entries;
pub use stash::SessionStashes;
pub use state::{FileEvent, FileState, StateChange, UploadStatus};
pub use types::{
    Attachment, AttachmentPayload, CompletedUpload, FileSource, FsSource, NoThumbnails,
    QueuedFile, ThumbnailArtifact, ThumbnailExtractor, UploadEntry, UploadRequest,
};
