//! Network seams implemented by the reqwest clients and mocked in tests.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use fraglift_protocol::{
    CreateFileBatch, CreateFolderRequest, CreateFolderResponse, HostMessage,
    RegisterAttachmentsBatch,
};
use tokio_util::sync::CancellationToken;

use crate::error::HostError;

/// Progress callback invoked with the cumulative payload bytes pushed to
/// the wire so far. May be called from the request body stream at any rate;
/// callers throttle on their side.
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Upload transport to the attachment host.
#[async_trait]
pub trait HostTransport: Send + Sync {
    /// Uploads the already-encrypted parts as one multipart message.
    ///
    /// Returns the host message holding every attachment in part order.
    /// Cancelling `cancel` aborts the transfer and yields
    /// [`HostError::Cancelled`].
    async fn upload(
        &self,
        parts: Vec<Bytes>,
        filename: &str,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<HostMessage, HostError>;
}

/// Metadata backend operations the pipeline needs.
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Creates a destination folder, returning its id.
    async fn create_folder(
        &self,
        request: &CreateFolderRequest,
    ) -> Result<CreateFolderResponse, HostError>;

    /// Registers a batch of fully uploaded file records.
    async fn create_files(&self, batch: &CreateFileBatch) -> Result<(), HostError>;

    /// Bulk-registers secondary attachment references.
    async fn register_attachments(&self, batch: &RegisterAttachmentsBatch)
    -> Result<(), HostError>;

    /// Cheap reachability check used by the connectivity probe loop. Any
    /// HTTP response, even an error status, counts as reachable.
    async fn probe(&self) -> bool;
}
